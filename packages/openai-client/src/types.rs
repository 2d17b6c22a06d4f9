//! OpenAI API request and response types.

use serde::{Deserialize, Serialize};

// =============================================================================
// Messages
// =============================================================================

/// Chat message for plain (non-tool) turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role: "system", "user", "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    /// Convert to the raw JSON form used by tool-calling requests.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "role": self.role, "content": self.content })
    }
}

/// Build a raw `tool` role message carrying a tool result.
///
/// Tool-calling conversations mix plain messages with assistant tool-call
/// turns and tool-result turns, so those requests use raw JSON messages.
pub fn tool_result_message(tool_call_id: &str, content: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "role": "tool",
        "tool_call_id": tool_call_id,
        "content": content.into(),
    })
}

/// Token usage statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,

    /// Total tokens used
    pub total_tokens: u32,
}

// =============================================================================
// Tool-calling chat
// =============================================================================

/// Chat request with tool definitions bound.
#[derive(Debug, Serialize)]
pub struct ToolChatRequest {
    /// Model to use
    pub model: String,

    /// Conversation messages (raw JSON, may include tool turns)
    pub messages: Vec<serde_json::Value>,

    /// Tool definitions in OpenAI format
    pub tools: serde_json::Value,

    /// Tool choice strategy
    pub tool_choice: String,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ToolChatRequest {
    /// Create a new tool chat request with `tool_choice: auto`.
    pub fn new(
        model: impl Into<String>,
        messages: Vec<serde_json::Value>,
        tools: serde_json::Value,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            tools,
            tool_choice: "auto".to_string(),
            temperature: None,
        }
    }
}

/// The assistant turn returned by a tool-calling chat.
#[derive(Debug, Clone)]
pub struct ToolChatResponse {
    /// Text content, if the model answered directly.
    pub content: Option<String>,

    /// Tool calls requested by the model (may be empty).
    pub tool_calls: Vec<crate::tool::ToolCall>,

    /// The raw assistant message, for appending back into the conversation.
    pub raw_message: serde_json::Value,

    /// Token usage for the call.
    pub usage: Option<Usage>,
}

// =============================================================================
// Structured output
// =============================================================================

/// Structured output request with a strict JSON schema.
#[derive(Debug, Serialize)]
pub struct StructuredRequest {
    /// Model to use
    pub model: String,

    /// Conversation messages
    pub messages: Vec<serde_json::Value>,

    /// Temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Response format with JSON schema
    pub response_format: ResponseFormat,
}

impl StructuredRequest {
    /// Create a structured request from a system and user prompt.
    pub fn new(
        model: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
        schema: serde_json::Value,
    ) -> Self {
        Self::with_messages(
            model,
            vec![
                Message::system(system).to_value(),
                Message::user(user).to_value(),
            ],
            schema,
        )
    }

    /// Create a structured request from pre-built message history.
    ///
    /// Used when the structured call must see earlier tool turns.
    pub fn with_messages(
        model: impl Into<String>,
        messages: Vec<serde_json::Value>,
        schema: serde_json::Value,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: Some(0.0),
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaFormat {
                    name: "structured_response".to_string(),
                    strict: true,
                    schema,
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    pub json_schema: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub strict: bool,
    pub schema: serde_json::Value,
}

/// Structured output response: raw JSON text plus usage.
#[derive(Debug, Clone)]
pub struct StructuredResponse {
    /// The JSON document conforming to the requested schema.
    pub content: String,

    /// Token usage for the call.
    pub usage: Option<Usage>,
}

// =============================================================================
// Raw response parsing
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponseRaw {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: serde_json::Value,
}

// =============================================================================
// Embeddings
// =============================================================================

/// Embedding request.
#[derive(Debug, Serialize)]
pub(crate) struct EmbeddingRequest {
    /// Model to use (e.g., "text-embedding-3-small")
    pub model: String,

    /// Text to embed
    pub input: String,
}

/// Embedding response.
#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingData {
    pub embedding: Vec<f32>,
}
