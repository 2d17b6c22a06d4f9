//! Two-phase model invocation.
//!
//! Phase one binds the full tool set and lets the model act; returned tool
//! calls are partitioned by the confirmation policy into auto-executable and
//! confirmation-required. If any call requires confirmation the flow
//! short-circuits and the caller must resolve the pending calls first. Phase
//! two is a structured-output call that turns document text plus accumulated
//! tool results into extraction records.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use openai_client::{tool_result_message, StructuredOutput};

use super::models::{
    BatchDraft, ExtractionRecord, PendingCall, RecordDraft, ToolInvocation, ToolResult,
};
use super::policy::{confirmation_question, ConfirmationPolicy, ConfirmationRule};
use super::tools::ToolEngine;
use crate::common::{AppError, AppResult};
use crate::kernel::traits::{AssistantTurn, BaseAI};

const EXTRACTION_SYSTEM_PROMPT: &str = "You are a financial document extraction assistant. \
Read the document text and use the available tools to resolve every contact, category, and \
account you encounter before extracting transactions. Always act through tools first.";

const STRUCTURED_INSTRUCTION: &str = "Using the document text and the tool results above, \
produce the structured extraction result. For each transaction, set is_complete to true only \
when every required field is known; otherwise leave the transaction empty and list the missing \
fields and clarification questions.";

/// Result of one tool-bound model turn, after partitioning.
#[derive(Debug)]
pub struct ToolPass {
    pub assistant: AssistantTurn,
    pub invocations: Vec<ToolInvocation>,
    /// Results of auto-executed calls, keyed by tool name.
    pub auto_results: HashMap<String, ToolResult>,
    /// Calls held back for human confirmation. Non-empty means the caller
    /// must short-circuit.
    pub pending: Vec<PendingCall>,
}

impl ToolPass {
    pub fn needs_confirmation(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Result of the structured extraction phase.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub records: Vec<ExtractionRecord>,
    pub overall_confidence: f32,
    pub notes: Option<String>,
}

pub struct ExtractionInvoker {
    ai: Arc<dyn BaseAI>,
    engine: Arc<ToolEngine>,
    policy: ConfirmationPolicy,
}

impl ExtractionInvoker {
    pub fn new(ai: Arc<dyn BaseAI>, engine: Arc<ToolEngine>, policy: ConfirmationPolicy) -> Self {
        Self { ai, engine, policy }
    }

    /// Initial messages for a document extraction conversation.
    pub fn extraction_messages(document_text: &str) -> Vec<Value> {
        vec![
            json!({"role": "system", "content": EXTRACTION_SYSTEM_PROMPT}),
            json!({"role": "user", "content": document_text}),
        ]
    }

    /// Phase one for initial extraction. The model is expected to always act
    /// through tools here; zero tool calls fails the whole batch.
    pub async fn extract_pass(&self, messages: &[Value]) -> AppResult<ToolPass> {
        let pass = self.tool_pass(messages).await?;
        if pass.invocations.is_empty() {
            return Err(AppError::extraction(
                "extract_pass",
                "model returned no tool calls",
            ));
        }
        Ok(pass)
    }

    /// Phase one for clarification turns, where a plain-text answer without
    /// tool calls is legitimate.
    pub async fn clarify_pass(&self, messages: &[Value]) -> AppResult<ToolPass> {
        self.tool_pass(messages).await
    }

    async fn tool_pass(&self, messages: &[Value]) -> AppResult<ToolPass> {
        let assistant = self
            .ai
            .generate_with_tools(messages, &self.engine.definitions())
            .await
            .map_err(|e| AppError::internal("invoke_model", e))?;

        if let Some(usage) = &assistant.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "tool pass usage"
            );
        }

        let invocations: Vec<ToolInvocation> = assistant
            .tool_calls
            .iter()
            .map(|call| ToolInvocation {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                call_id: call.id.clone(),
            })
            .collect();

        // `always` calls never run before approval; everything else executes
        // concurrently, and `conditional` results that created an entity are
        // pulled back out as provisional pending calls.
        let mut pending = Vec::new();
        let mut executable = Vec::new();
        for invocation in &invocations {
            match self.policy.rule(&invocation.name) {
                ConfirmationRule::Always => pending.push(PendingCall {
                    question: confirmation_question(invocation, None),
                    invocation: invocation.clone(),
                    provisional: None,
                }),
                ConfirmationRule::Never | ConfirmationRule::Conditional => {
                    executable.push(invocation.clone());
                }
            }
        }

        let mut auto_results = self.engine.execute_batch(&executable).await?;
        for invocation in &executable {
            let needs_confirmation = auto_results
                .get(&invocation.name)
                .is_some_and(|r| self.policy.requires_confirmation(&invocation.name, Some(r)));
            if needs_confirmation {
                let provisional = auto_results.remove(&invocation.name);
                pending.push(PendingCall {
                    question: confirmation_question(invocation, provisional.as_ref()),
                    invocation: invocation.clone(),
                    provisional,
                });
            }
        }

        Ok(ToolPass {
            assistant,
            invocations,
            auto_results,
            pending,
        })
    }

    /// Append the assistant turn and its tool results to the conversation,
    /// ready for the structured phase or the next clarification turn.
    pub fn append_tool_results(
        messages: &mut Vec<Value>,
        assistant: &AssistantTurn,
        results: &HashMap<String, ToolResult>,
        invocations: &[ToolInvocation],
    ) {
        if assistant.tool_calls.is_empty() {
            return;
        }
        messages.push(assistant.raw_message.clone());
        for invocation in invocations {
            let content = results
                .get(&invocation.name)
                .and_then(|r| serde_json::to_string(r).ok())
                .unwrap_or_else(|| "{\"success\":false,\"error\":\"not executed\"}".into());
            messages.push(tool_result_message(
                invocation.call_id.as_deref().unwrap_or(""),
                content,
            ));
        }
    }

    /// Phase two: structured extraction of the full batch.
    pub async fn structured_batch(&self, mut messages: Vec<Value>) -> AppResult<ExtractionOutcome> {
        messages.push(json!({"role": "user", "content": STRUCTURED_INSTRUCTION}));
        let reply = self
            .ai
            .generate_structured(messages, BatchDraft::openai_schema())
            .await
            .map_err(|e| AppError::internal("structured_extraction", e))?;

        let draft: BatchDraft = serde_json::from_str(&reply.json).map_err(|e| {
            AppError::extraction("structured_extraction", format!("malformed batch: {e}"))
        })?;

        let mut records = Vec::with_capacity(draft.records.len());
        for (position, mut record_draft) in draft.records.into_iter().enumerate() {
            // Indices are positional; the model's echo is not trusted.
            record_draft.index = position;
            let record = record_draft
                .into_record()
                .map_err(|e| AppError::extraction("structured_extraction", e))?;
            records.push(record);
        }

        Ok(ExtractionOutcome {
            records,
            overall_confidence: draft.overall_confidence.clamp(0.0, 1.0),
            notes: draft.notes,
        })
    }

    /// Phase two for a single record, used by clarification turns.
    pub async fn structured_record(
        &self,
        mut messages: Vec<Value>,
        index: usize,
    ) -> AppResult<ExtractionRecord> {
        messages.push(json!({"role": "user", "content": STRUCTURED_INSTRUCTION}));
        let reply = self
            .ai
            .generate_structured(messages, RecordDraft::openai_schema())
            .await
            .map_err(|e| AppError::internal("structured_record", e))?;

        let mut draft: RecordDraft = serde_json::from_str(&reply.json).map_err(|e| {
            AppError::extraction("structured_record", format!("malformed record: {e}"))
        })?;
        draft.index = index;
        draft
            .into_record()
            .map_err(|e| AppError::extraction("structured_record", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::ingestion::tools;
    use crate::kernel::test_dependencies::{InMemoryEntityStore, MockAI};
    use serde_json::json;

    fn invoker_with(ai: Arc<MockAI>, store: Arc<InMemoryEntityStore>) -> ExtractionInvoker {
        let engine = Arc::new(ToolEngine::new(store));
        ExtractionInvoker::new(ai, engine, ConfirmationPolicy::default())
    }

    #[tokio::test]
    async fn test_zero_tool_calls_is_fatal() {
        let ai = Arc::new(MockAI::new());
        ai.push_turn(MockAI::text_turn("I cannot read this document"));
        let invoker = invoker_with(ai, Arc::new(InMemoryEntityStore::default()));

        let messages = ExtractionInvoker::extraction_messages("blank page");
        let err = invoker.extract_pass(&messages).await.unwrap_err();
        assert_eq!(err.status_code(), 422);
    }

    #[tokio::test]
    async fn test_always_tool_short_circuits_without_executing() {
        let ai = Arc::new(MockAI::new());
        ai.push_turn(MockAI::tool_turn(vec![(
            tools::CREATE_BANK_ACCOUNT,
            json!({"name": "Checking"}),
        )]));
        let store = Arc::new(InMemoryEntityStore::default());
        let invoker = invoker_with(ai, store.clone());

        let messages = ExtractionInvoker::extraction_messages("statement text");
        let pass = invoker.extract_pass(&messages).await.unwrap();

        assert!(pass.needs_confirmation());
        assert_eq!(pass.pending.len(), 1);
        assert!(pass.pending[0].provisional.is_none());
        assert!(pass.pending[0].question.contains("Checking"));
        // The account was not created behind the user's back.
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn test_conditional_create_is_held_provisionally() {
        let ai = Arc::new(MockAI::new());
        ai.push_turn(MockAI::tool_turn(vec![(
            tools::RESOLVE_CONTACT,
            json!({"name": "Brand New Vendor"}),
        )]));
        let invoker = invoker_with(ai, Arc::new(InMemoryEntityStore::default()));

        let messages = ExtractionInvoker::extraction_messages("receipt text");
        let pass = invoker.extract_pass(&messages).await.unwrap();

        assert!(pass.needs_confirmation());
        let pending = &pass.pending[0];
        assert!(pending.provisional.as_ref().unwrap().created());
        assert!(pass.auto_results.is_empty());
    }

    #[tokio::test]
    async fn test_never_tools_execute_automatically() {
        let ai = Arc::new(MockAI::new());
        ai.push_turn(MockAI::tool_turn(vec![(
            tools::VALIDATE_TRANSACTION_TYPE,
            json!({"value": "expense"}),
        )]));
        let invoker = invoker_with(ai, Arc::new(InMemoryEntityStore::default()));

        let messages = ExtractionInvoker::extraction_messages("receipt text");
        let pass = invoker.extract_pass(&messages).await.unwrap();

        assert!(!pass.needs_confirmation());
        assert!(pass.auto_results[tools::VALIDATE_TRANSACTION_TYPE].success);
    }

    #[tokio::test]
    async fn test_structured_batch_enforces_completeness_shape() {
        let ai = Arc::new(MockAI::new());
        // Incomplete record with a populated transaction violates the shape.
        ai.push_structured(
            json!({
                "records": [{
                    "index": 0,
                    "is_complete": false,
                    "confidence": 0.5,
                    "transaction": {
                        "amount": "10.00", "currency": "EUR",
                        "transaction_type": "expense", "direction": "debit",
                        "payment_method": null, "counterparty": null,
                        "occurred_at": "2026-01-01T00:00:00Z",
                        "description": "x", "reference": null
                    },
                    "enrichment": {"category_id": null, "contact_id": null,
                        "source_account_id": null, "destination_account_id": null,
                        "self_transfer": false},
                    "missing_fields": ["amount"], "questions": [], "notes": null
                }],
                "overall_confidence": 0.5,
                "notes": null
            })
            .to_string(),
        );
        let invoker = invoker_with(ai, Arc::new(InMemoryEntityStore::default()));

        let err = invoker
            .structured_batch(ExtractionInvoker::extraction_messages("doc"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 422);
    }

    #[tokio::test]
    async fn test_structured_batch_reindexes_positionally() {
        let ai = Arc::new(MockAI::new());
        ai.push_structured(
            json!({
                "records": [{
                    "index": 7,
                    "is_complete": false,
                    "confidence": 0.5,
                    "transaction": null,
                    "enrichment": {"category_id": null, "contact_id": null,
                        "source_account_id": null, "destination_account_id": null,
                        "self_transfer": false},
                    "missing_fields": ["amount"], "questions": [], "notes": null
                }],
                "overall_confidence": 0.8,
                "notes": null
            })
            .to_string(),
        );
        let invoker = invoker_with(ai, Arc::new(InMemoryEntityStore::default()));

        let outcome = invoker
            .structured_batch(ExtractionInvoker::extraction_messages("doc"))
            .await
            .unwrap();
        assert_eq!(outcome.records[0].index, 0);
    }
}
