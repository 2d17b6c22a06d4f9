//! Document ingestion: extraction, clarification, and approval.
//!
//! Components, leaves first: the entity resolver fuzzy-matches names, the
//! tool engine executes side-effecting calls behind a uniform envelope, the
//! confirmation policy gates which calls need a human, the invoker runs the
//! two-phase model conversation, and the ingestion service drives the
//! sequential approval state machine over the resulting batch session.

pub mod clarification;
pub mod data;
pub mod detector;
pub mod invoker;
pub mod models;
pub mod policy;
pub mod progress;
pub mod resolver;
pub mod service;
pub mod store;
pub mod tools;

pub use clarification::{ClarificationReply, ClarificationService, ConfirmationQuestion};
pub use detector::{Detection, DocumentDetector};
pub use invoker::ExtractionInvoker;
pub use policy::ConfirmationPolicy;
pub use progress::{ProgressReporter, ProgressStep};
pub use resolver::EntityResolver;
pub use service::{IngestionService, InitiationOutcome, InitiationResult, StepOutcome};
pub use tools::ToolEngine;
