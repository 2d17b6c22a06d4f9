//! Turn-based clarification of incomplete records.
//!
//! Each incomplete record gets a sub-conversation: the human answers the
//! model's questions, the model may call more tools (gated exactly like the
//! initial extraction), and a structured re-invocation produces the updated
//! record. Confirmation-gated calls park the session in
//! `pending_confirmation` until the human approves or declines each one.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use super::invoker::ExtractionInvoker;
use super::models::{
    ClarificationSession, ClarificationStatus, ExtractionRecord, SequentialBatchSession,
    ToolResult, TurnRole,
};
use super::store::SessionStore;
use super::tools::ToolEngine;
use crate::common::{AppError, AppResult, ClarificationId, UserId};

const CLARIFICATION_SYSTEM_PROMPT: &str = "You are helping complete one partially extracted \
financial transaction. Use the conversation and the available tools to fill in the missing \
fields. Ask a concrete question when information is still missing.";

/// Message length under which a reply counts as "simple" for the
/// response-reuse heuristic.
const SIMPLE_REPLY_MAX_CHARS: usize = 40;

/// Outcome of a clarification turn.
#[derive(Debug)]
pub enum ClarificationReply {
    /// The record was re-extracted (or reused) after this turn.
    Updated {
        record: ExtractionRecord,
        assistant_message: Option<String>,
    },
    /// Confirmation-gated tool calls were held back; the session is parked
    /// until `resolve_confirmation` answers them.
    ConfirmationRequired { questions: Vec<ConfirmationQuestion> },
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConfirmationQuestion {
    pub tool_name: String,
    pub question: String,
}

pub struct ClarificationService {
    store: Arc<dyn SessionStore>,
    invoker: Arc<ExtractionInvoker>,
    engine: Arc<ToolEngine>,
    /// Skips the structured re-invocation for short replies that produced no
    /// new tool results, serving the previous record verbatim. A deliberate
    /// latency/cost trade that can serve a stale record; off by default.
    reuse_simple_replies: bool,
}

impl ClarificationService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        invoker: Arc<ExtractionInvoker>,
        engine: Arc<ToolEngine>,
        reuse_simple_replies: bool,
    ) -> Self {
        Self {
            store,
            invoker,
            engine,
            reuse_simple_replies,
        }
    }

    /// One human turn: append the message, let the model act, and either
    /// return the updated record or a confirmation request.
    pub async fn send_message(
        &self,
        clarification_id: ClarificationId,
        user_id: UserId,
        text: &str,
    ) -> AppResult<ClarificationReply> {
        const OP: &str = "send_message";

        if text.trim().is_empty() {
            return Err(AppError::validation(OP, "message must not be empty"));
        }

        let (mut clarification, mut session, document_text) =
            self.load(clarification_id, user_id, OP).await?;
        match clarification.status {
            ClarificationStatus::Completed => {
                return Err(AppError::state(OP, "clarification session is completed"))
            }
            ClarificationStatus::PendingConfirmation => {
                return Err(AppError::state(
                    OP,
                    "confirmation pending; resolve it before sending messages",
                ))
            }
            ClarificationStatus::Active => {}
        }

        clarification.append_user(text);

        let mut messages = self.conversation_messages(&clarification, &session, &document_text);
        let pass = self.invoker.clarify_pass(&messages).await?;

        if pass.needs_confirmation() {
            let questions = pass
                .pending
                .iter()
                .map(|p| ConfirmationQuestion {
                    tool_name: p.invocation.name.clone(),
                    question: p.question.clone(),
                })
                .collect();
            clarification.merge_results(pass.auto_results);
            clarification.park_pending(pass.pending);
            self.store.update_clarification(&clarification).await.map_err(|e| AppError::internal(OP, e))?;
            return Ok(ClarificationReply::ConfirmationRequired { questions });
        }

        let produced_results = !pass.auto_results.is_empty();
        ExtractionInvoker::append_tool_results(
            &mut messages,
            &pass.assistant,
            &pass.auto_results,
            &pass.invocations,
        );
        clarification.merge_results(pass.auto_results);

        // Heuristic shortcut: a short reply with no new tool results and a
        // previously valid record is answered from cache.
        if self.reuse_simple_replies
            && !produced_results
            && text.trim().len() <= SIMPLE_REPLY_MAX_CHARS
        {
            if let Some(cached) = clarification
                .last_record
                .clone()
                .filter(|r| r.validate().is_ok())
            {
                tracing::debug!(clarification_id = %clarification.id, "reusing cached record for simple reply");
                let assistant_message = pass.assistant.content.clone();
                if let Some(content) = &assistant_message {
                    clarification.append_assistant(content.clone());
                }
                self.store.update_clarification(&clarification).await.map_err(|e| AppError::internal(OP, e))?;
                return Ok(ClarificationReply::Updated {
                    record: cached,
                    assistant_message,
                });
            }
        }

        let record = self
            .reextract(&mut clarification, &mut session, messages, OP)
            .await?;
        Ok(ClarificationReply::Updated {
            assistant_message: clarification.turns.iter().rev().find_map(|t| {
                (t.role == TurnRole::Assistant).then(|| t.content.clone())
            }),
            record,
        })
    }

    /// Answer parked confirmation calls. Approved calls execute (or have
    /// their provisional result accepted); declined ones are recorded as an
    /// explicit declined result, never an error.
    pub async fn resolve_confirmation(
        &self,
        clarification_id: ClarificationId,
        user_id: UserId,
        approvals: &HashMap<String, bool>,
    ) -> AppResult<ClarificationReply> {
        const OP: &str = "resolve_confirmation";

        let (mut clarification, mut session, document_text) =
            self.load(clarification_id, user_id, OP).await?;
        if clarification.status != ClarificationStatus::PendingConfirmation {
            return Err(AppError::state(OP, "no confirmation is pending"));
        }

        let pending = clarification.clear_pending();
        let mut results: HashMap<String, ToolResult> = HashMap::new();
        for call in pending {
            let name = call.invocation.name.clone();
            let approved = approvals.get(&name).copied().unwrap_or(false);
            let result = if !approved {
                ToolResult::declined(&name)
            } else if let Some(provisional) = call.provisional {
                provisional
            } else {
                self.engine.execute(&call.invocation).await?
            };
            results.insert(name, result);
        }

        let mut messages = self.conversation_messages(&clarification, &session, &document_text);
        messages.push(json!({
            "role": "user",
            "content": format!(
                "Confirmation results: {}",
                serde_json::to_string(&results).unwrap_or_default()
            )
        }));
        clarification.merge_results(results);

        let record = self
            .reextract(&mut clarification, &mut session, messages, OP)
            .await?;
        Ok(ClarificationReply::Updated {
            assistant_message: None,
            record,
        })
    }

    async fn load(
        &self,
        clarification_id: ClarificationId,
        user_id: UserId,
        operation: &'static str,
    ) -> AppResult<(ClarificationSession, SequentialBatchSession, String)> {
        let clarification = self
            .store
            .get_clarification(clarification_id)
            .await
            .map_err(|e| AppError::internal(operation, e))?
            .ok_or_else(|| {
                AppError::not_found(operation, format!("clarification {clarification_id}"))
            })?;

        let session = self
            .store
            .get_session(clarification.batch_session_id)
            .await
            .map_err(|e| AppError::internal(operation, e))?
            .ok_or_else(|| {
                AppError::not_found(
                    operation,
                    format!("session {}", clarification.batch_session_id),
                )
            })?;
        session.ensure_owned_by(user_id, operation)?;

        let document_text = self
            .store
            .get_document(session.document_id)
            .await
            .map_err(|e| AppError::internal(operation, e))?
            .and_then(|d| d.raw_text)
            .unwrap_or_default();

        Ok((clarification, session, document_text))
    }

    fn conversation_messages(
        &self,
        clarification: &ClarificationSession,
        session: &SequentialBatchSession,
        document_text: &str,
    ) -> Vec<Value> {
        let mut messages = vec![
            json!({"role": "system", "content": CLARIFICATION_SYSTEM_PROMPT}),
            json!({"role": "user", "content": format!("Document text:\n{document_text}")}),
        ];

        if let Some(record) = session.records.get(clarification.record_index) {
            let state = json!({
                "record": record,
                "tool_results": clarification.tool_results,
            });
            messages.push(json!({
                "role": "user",
                "content": format!("Current extraction state:\n{state}")
            }));
        }

        for turn in &clarification.turns {
            let role = match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
            };
            messages.push(json!({"role": role, "content": turn.content}));
        }
        messages
    }

    /// Structured re-invocation plus write-back into the owning session.
    async fn reextract(
        &self,
        clarification: &mut ClarificationSession,
        session: &mut SequentialBatchSession,
        messages: Vec<Value>,
        operation: &'static str,
    ) -> AppResult<ExtractionRecord> {
        let index = clarification.record_index;
        let mut record = self.invoker.structured_record(messages, index).await?;
        record.clarification_id = Some(clarification.id);

        let assistant_text = if record.is_complete {
            "I have everything I need for this transaction now.".to_string()
        } else if record.questions.is_empty() {
            format!("Still missing: {}", record.missing_fields.join(", "))
        } else {
            record.questions.join(" ")
        };
        clarification.append_assistant(assistant_text);
        clarification.last_record = Some(record.clone());

        let slot = session.record_mut(index, operation)?;
        *slot = record.clone();

        self.store
            .update_session(session)
            .await
            .map_err(|e| AppError::internal(operation, e))?;
        self.store
            .update_clarification(clarification)
            .await
            .map_err(|e| AppError::internal(operation, e))?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::ingestion::models::{
        Document, Enrichment, ProcessingMode,
    };
    use crate::domains::ingestion::policy::ConfirmationPolicy;
    use crate::domains::ingestion::tools;
    use crate::kernel::test_dependencies::{InMemoryEntityStore, InMemorySessionStore, MockAI};
    use serde_json::json;

    fn incomplete_record(index: usize) -> ExtractionRecord {
        ExtractionRecord {
            index,
            is_complete: false,
            confidence: 0.4,
            transaction: None,
            enrichment: Enrichment::default(),
            missing_fields: vec!["description".into()],
            questions: vec!["What was this payment for?".into()],
            notes: None,
            clarification_id: None,
            committed_id: None,
        }
    }

    fn complete_record_json(index: usize) -> String {
        json!({
            "index": index,
            "is_complete": true,
            "confidence": 0.9,
            "transaction": {
                "amount": "12.50", "currency": "EUR",
                "transaction_type": "expense", "direction": "debit",
                "payment_method": "card", "counterparty": "Edeka",
                "occurred_at": "2026-02-01T12:00:00Z",
                "description": "Groceries", "reference": null
            },
            "enrichment": {"category_id": null, "contact_id": null,
                "source_account_id": null, "destination_account_id": null,
                "self_transfer": false},
            "missing_fields": [], "questions": [], "notes": null
        })
        .to_string()
    }

    struct Fixture {
        service: ClarificationService,
        store: Arc<InMemorySessionStore>,
        ai: Arc<MockAI>,
        clarification_id: ClarificationId,
        user_id: UserId,
    }

    async fn fixture(reuse: bool) -> Fixture {
        let ai = Arc::new(MockAI::new());
        let entity_store = Arc::new(InMemoryEntityStore::default());
        let session_store = Arc::new(InMemorySessionStore::default());
        let engine = Arc::new(ToolEngine::new(entity_store));
        let invoker = Arc::new(ExtractionInvoker::new(
            ai.clone(),
            engine.clone(),
            ConfirmationPolicy::default(),
        ));

        let user_id = UserId::new();
        let mut document = Document::new(user_id, "uploads/r.jpg");
        document.raw_text = Some("EDEKA 12.50 EUR".into());
        session_store.insert_document(&document).await.unwrap();

        let session = SequentialBatchSession::new(
            document.id,
            user_id,
            ProcessingMode::Single,
            vec![incomplete_record(0)],
            1,
        );
        session_store.insert_session(&session).await.unwrap();

        let clarification = ClarificationSession::new(session.id, 0);
        session_store
            .insert_clarification(&clarification)
            .await
            .unwrap();

        Fixture {
            service: ClarificationService::new(
                session_store.clone(),
                invoker,
                engine,
                reuse,
            ),
            store: session_store,
            ai,
            clarification_id: clarification.id,
            user_id,
        }
    }

    #[tokio::test]
    async fn test_message_completes_record() {
        let f = fixture(false).await;
        f.ai.push_turn(MockAI::text_turn("Thanks, that fills the gap."));
        f.ai.push_structured(complete_record_json(0));

        let reply = f
            .service
            .send_message(f.clarification_id, f.user_id, "It was groceries at Edeka")
            .await
            .unwrap();

        let ClarificationReply::Updated { record, .. } = reply else {
            panic!("expected updated record");
        };
        assert!(record.is_complete);
        assert!(record.missing_fields.is_empty());

        // The owning session sees the updated record.
        let clarification = f
            .store
            .get_clarification(f.clarification_id)
            .await
            .unwrap()
            .unwrap();
        let session = f
            .store
            .get_session(clarification.batch_session_id)
            .await
            .unwrap()
            .unwrap();
        assert!(session.records[0].is_complete);
        assert_eq!(session.records[0].clarification_id, Some(f.clarification_id));
    }

    #[tokio::test]
    async fn test_confirmation_gated_call_parks_session() {
        let f = fixture(false).await;
        f.ai.push_turn(MockAI::tool_turn(vec![(
            tools::CREATE_BANK_ACCOUNT,
            json!({"name": "Savings"}),
        )]));

        let reply = f
            .service
            .send_message(f.clarification_id, f.user_id, "It came from my savings account")
            .await
            .unwrap();

        let ClarificationReply::ConfirmationRequired { questions } = reply else {
            panic!("expected confirmation request");
        };
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].tool_name, tools::CREATE_BANK_ACCOUNT);

        let clarification = f
            .store
            .get_clarification(f.clarification_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(clarification.status, ClarificationStatus::PendingConfirmation);

        // Messages are refused while parked.
        let err = f
            .service
            .send_message(f.clarification_id, f.user_id, "hello?")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn test_declined_confirmation_is_not_an_error() {
        let f = fixture(false).await;
        f.ai.push_turn(MockAI::tool_turn(vec![(
            tools::CREATE_BANK_ACCOUNT,
            json!({"name": "Savings"}),
        )]));
        f.ai.push_structured(complete_record_json(0));

        f.service
            .send_message(f.clarification_id, f.user_id, "From savings")
            .await
            .unwrap();

        let approvals = HashMap::from([(tools::CREATE_BANK_ACCOUNT.to_string(), false)]);
        let reply = f
            .service
            .resolve_confirmation(f.clarification_id, f.user_id, &approvals)
            .await
            .unwrap();
        assert!(matches!(reply, ClarificationReply::Updated { .. }));

        let clarification = f
            .store
            .get_clarification(f.clarification_id)
            .await
            .unwrap()
            .unwrap();
        let declined = &clarification.tool_results[tools::CREATE_BANK_ACCOUNT];
        assert!(declined.success);
        assert_eq!(clarification.status, ClarificationStatus::Active);
    }

    #[tokio::test]
    async fn test_resolve_without_pending_is_state_error() {
        let f = fixture(false).await;
        let err = f
            .service
            .resolve_confirmation(f.clarification_id, f.user_id, &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn test_simple_reply_reuses_cached_record() {
        let f = fixture(true).await;

        // First turn produces a structured record the cache can serve later.
        f.ai.push_turn(MockAI::text_turn("Noted."));
        f.ai.push_structured(complete_record_json(0));
        f.service
            .send_message(f.clarification_id, f.user_id, "It was groceries at Edeka")
            .await
            .unwrap();

        // Second short turn: only a text turn is scripted; reaching the
        // structured call would fail the test.
        f.ai.push_turn(MockAI::text_turn("Understood."));
        let reply = f
            .service
            .send_message(f.clarification_id, f.user_id, "ok thanks")
            .await
            .unwrap();

        let ClarificationReply::Updated { record, .. } = reply else {
            panic!("expected updated record");
        };
        assert!(record.is_complete);
        assert_eq!(f.ai.structured_calls(), 1);
    }

    #[tokio::test]
    async fn test_other_users_session_is_forbidden() {
        let f = fixture(false).await;
        let err = f
            .service
            .send_message(f.clarification_id, UserId::new(), "hi")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }
}
