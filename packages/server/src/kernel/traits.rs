// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Business logic (extraction, approval, clarification) lives in domain
// services that consume these traits.
//
// Naming convention: Base* for trait names (e.g., BaseAI, BaseEmbeddingService)

use anyhow::Result;
use async_trait::async_trait;

pub use openai_client::{ToolCall, Usage};

// =============================================================================
// AI Trait (Infrastructure - Generic LLM capabilities)
// =============================================================================

/// The assistant turn produced by a tool-bound model call.
#[derive(Debug, Clone)]
pub struct AssistantTurn {
    /// Text content, if the model answered directly.
    pub content: Option<String>,

    /// Tool calls requested by the model (may be empty).
    pub tool_calls: Vec<ToolCall>,

    /// The raw assistant message, for appending back into message history.
    pub raw_message: serde_json::Value,

    /// Token usage for cost accounting by a wrapping collaborator.
    pub usage: Option<Usage>,
}

/// The reply of a structured-output model call.
#[derive(Debug, Clone)]
pub struct StructuredReply {
    /// JSON document conforming to the requested schema.
    pub json: String,

    /// Token usage for cost accounting by a wrapping collaborator.
    pub usage: Option<Usage>,
}

/// Model invoker: tool-calling chat and schema-constrained generation.
///
/// No timeout is enforced here; a wrapping collaborator applies one.
#[async_trait]
pub trait BaseAI: Send + Sync {
    /// One model call with tools bound and `tool_choice: auto`.
    async fn generate_with_tools(
        &self,
        messages: &[serde_json::Value],
        tools: &serde_json::Value,
    ) -> Result<AssistantTurn>;

    /// One model call constrained to a strict JSON schema.
    async fn generate_structured(
        &self,
        messages: Vec<serde_json::Value>,
        schema: serde_json::Value,
    ) -> Result<StructuredReply>;
}

// =============================================================================
// Embedding Service Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseEmbeddingService: Send + Sync {
    /// Generate embedding for text (returns 1536-dimensional vector)
    async fn generate(&self, text: &str) -> Result<Vec<f32>>;
}

// =============================================================================
// Text Extraction Trait (Infrastructure - OCR/parsing collaborator)
// =============================================================================

/// Output of the text-extraction collaborator.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub metadata: serde_json::Value,
}

/// Raw-document text extraction (OCR, PDF parsing). Out of scope here;
/// consumed through this narrow contract.
#[async_trait]
pub trait BaseTextExtractor: Send + Sync {
    async fn extract(&self, source_ref: &str) -> Result<ExtractedText>;
}
