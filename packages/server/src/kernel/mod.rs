//! Kernel module - server infrastructure and dependencies.

pub mod ai;
pub mod sse;
pub mod stream_hub;
pub mod test_dependencies;
pub mod traits;

pub use ai::{OpenAIEmbeddingService, OpenAIService};
pub use openai_client::OpenAIClient;
pub use stream_hub::StreamHub;
