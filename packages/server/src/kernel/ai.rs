//! OpenAI-backed implementations of the kernel AI traits.
//!
//! Thin adapters between the pure `openai-client` crate and the `Base*`
//! infrastructure traits the domain services consume.

use anyhow::{Context, Result};
use async_trait::async_trait;
use openai_client::{OpenAIClient, StructuredRequest, ToolChatRequest};

use super::traits::{AssistantTurn, BaseAI, BaseEmbeddingService, StructuredReply};

/// OpenAI adapter for tool-calling and structured generation.
#[derive(Clone)]
pub struct OpenAIService {
    client: OpenAIClient,
    model: String,
}

impl OpenAIService {
    pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl BaseAI for OpenAIService {
    async fn generate_with_tools(
        &self,
        messages: &[serde_json::Value],
        tools: &serde_json::Value,
    ) -> Result<AssistantTurn> {
        let request = ToolChatRequest::new(&self.model, messages.to_vec(), tools.clone());
        let response = self
            .client
            .chat_with_tools(request)
            .await
            .context("Tool-calling chat failed")?;

        Ok(AssistantTurn {
            content: response.content,
            tool_calls: response.tool_calls,
            raw_message: response.raw_message,
            usage: response.usage,
        })
    }

    async fn generate_structured(
        &self,
        messages: Vec<serde_json::Value>,
        schema: serde_json::Value,
    ) -> Result<StructuredReply> {
        let request = StructuredRequest::with_messages(&self.model, messages, schema);
        let response = self
            .client
            .structured_output(request)
            .await
            .context("Structured output call failed")?;

        Ok(StructuredReply {
            json: response.content,
            usage: response.usage,
        })
    }
}

/// OpenAI adapter for the similarity-index embeddings.
#[derive(Clone)]
pub struct OpenAIEmbeddingService {
    client: OpenAIClient,
    model: String,
}

impl OpenAIEmbeddingService {
    pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl BaseEmbeddingService for OpenAIEmbeddingService {
    async fn generate(&self, text: &str) -> Result<Vec<f32>> {
        self.client
            .create_embedding(text, &self.model)
            .await
            .context("Embedding generation failed")
    }
}
