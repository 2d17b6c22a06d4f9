//! Pure OpenAI REST API client
//!
//! A clean, minimal client for the OpenAI API with no domain-specific logic.
//! Supports tool-calling chat, strict structured outputs, and embeddings.
//! Every response carries token usage so callers can do their own cost
//! accounting.
//!
//! # Example
//!
//! ```rust,ignore
//! use openai_client::{OpenAIClient, Message, ToolChatRequest};
//!
//! let client = OpenAIClient::from_env()?;
//!
//! // Tool-calling chat
//! let response = client
//!     .chat_with_tools(ToolChatRequest::new(
//!         "gpt-4o",
//!         vec![Message::user("Extract the transactions").to_value()],
//!         tool_definitions,
//!     ))
//!     .await?;
//!
//! // Type-safe structured output
//! let parsed: MyShape = client
//!     .extract::<MyShape>("gpt-4o", system_prompt, user_prompt)
//!     .await?;
//! ```

pub mod error;
pub mod schema;
pub mod tool;
pub mod types;

pub use error::{OpenAIError, Result};
pub use schema::StructuredOutput;
pub use tool::{ErasedTool, Tool, ToolCall, ToolDefinition, ToolError};
pub use types::*;

use reqwest::Client;
use tracing::{debug, warn};

/// Pure OpenAI API client.
#[derive(Clone)]
pub struct OpenAIClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create a new OpenAI client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Create from environment variable `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| OpenAIError::Config("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL (for Azure, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Chat completion with tools bound and `tool_choice: auto`.
    ///
    /// Returns the assistant turn: either text content, tool calls, or both.
    pub async fn chat_with_tools(&self, request: ToolChatRequest) -> Result<ToolChatResponse> {
        let start = std::time::Instant::now();

        let raw = self.post_chat(&serde_json::to_value(&request).map_err(|e| {
            OpenAIError::Parse(format!("Failed to serialize request: {}", e))
        })?)
        .await?;

        let message = raw
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| OpenAIError::Api("No response from OpenAI".into()))?;

        let tool_calls = message
            .get("tool_calls")
            .and_then(|tc| tc.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(ToolCall::from_openai_value)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .map(String::from);

        debug!(
            model = %request.model,
            tool_call_count = tool_calls.len(),
            duration_ms = start.elapsed().as_millis(),
            "OpenAI tool chat completion"
        );

        Ok(ToolChatResponse {
            content,
            tool_calls,
            raw_message: message,
            usage: raw.usage,
        })
    }

    /// Structured output with a strict JSON schema.
    ///
    /// Uses OpenAI's `json_schema` response format for guaranteed valid JSON.
    pub async fn structured_output(&self, request: StructuredRequest) -> Result<StructuredResponse> {
        let raw = self.post_chat(&serde_json::to_value(&request).map_err(|e| {
            OpenAIError::Parse(format!("Failed to serialize request: {}", e))
        })?)
        .await?;

        let usage = raw.usage.clone();
        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.get("content").and_then(|v| v.as_str()).map(String::from))
            .ok_or_else(|| OpenAIError::Api("No response from OpenAI".into()))?;

        Ok(StructuredResponse { content, usage })
    }

    /// Type-safe structured output extraction.
    ///
    /// Generates a JSON schema from `T` using `schemars`, sends it to OpenAI,
    /// and deserializes the response.
    pub async fn extract<T: StructuredOutput>(
        &self,
        model: &str,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<T> {
        let schema = T::openai_schema();

        debug!(
            type_name = T::type_name(),
            "Generated OpenAI schema for extraction"
        );

        let request = StructuredRequest::new(model, system_prompt, user_prompt, schema);
        let response = self.structured_output(request).await?;

        serde_json::from_str(&response.content)
            .map_err(|e| OpenAIError::Parse(format!("Failed to deserialize response: {}", e)))
    }

    /// Create embedding for text.
    ///
    /// Returns a vector (typically 1536 dimensions for text-embedding-3-small).
    pub async fn create_embedding(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let request = types::EmbeddingRequest {
            model: model.to_string(),
            input: text.to_string(),
        };

        let response = self
            .http_client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Embedding request failed");
                OpenAIError::Network(e.to_string())
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(error = %error_text, "OpenAI embedding error");
            return Err(OpenAIError::Api(format!(
                "OpenAI embedding error: {}",
                error_text
            )));
        }

        let embed_response: types::EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))?;

        embed_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| OpenAIError::Api("No embedding from OpenAI".into()))
    }

    /// POST a chat-completions request body and parse the raw response.
    async fn post_chat(&self, body: &serde_json::Value) -> Result<types::ChatResponseRaw> {
        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "OpenAI request failed");
                OpenAIError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "OpenAI API error");
            return Err(OpenAIError::Api(format!("OpenAI API error: {}", error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = OpenAIClient::new("sk-test").with_base_url("https://custom.api.com");

        assert_eq!(client.api_key, "sk-test");
        assert_eq!(client.base_url, "https://custom.api.com");
    }
}
