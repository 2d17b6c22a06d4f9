//! Batch initiation and the sequential approval loop.
//!
//! This is the top of the orchestration stack: it classifies a document,
//! runs the two-phase extraction, creates the batch session, and drives the
//! approve/skip/goto/complete/reject state machine over it.
//!
//! Cursor and record mutations are not safe under concurrent writers, so
//! every mutating operation serializes on a per-session (or per-document)
//! async mutex taken from a shared lock map.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use super::clarification::ConfirmationQuestion;
use super::detector::{Detection, DocumentDetector};
use super::invoker::{ExtractionInvoker, ToolPass};
use super::models::{
    ClarificationSession, Document, DocumentStatus, ExtractionRecord, PendingCall, RecordEdits,
    SequentialBatchSession, SessionStatus, ToolResult,
};
use super::progress::{ProgressReporter, ProgressStep};
use super::store::{SessionStore, SimilarityIndex, TransactionStore};
use super::tools::ToolEngine;
use crate::common::{AppError, AppResult, BatchSessionId, DocumentId, TransactionId, UserId};
use crate::kernel::stream_hub::StreamHub;
use crate::kernel::traits::{AssistantTurn, BaseTextExtractor};

/// Result of a successful (or resumed) batch initiation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InitiationResult {
    pub session_id: BatchSessionId,
    pub total_records: usize,
    pub successfully_initiated: bool,
    pub records: Vec<ExtractionRecord>,
    pub overall_confidence: f32,
    pub notes: Option<String>,
    /// The record at the cursor, awaiting human action.
    pub current: Option<ExtractionRecord>,
    /// True when an in-progress session already existed and no model call
    /// was made.
    pub resumed: bool,
}

/// Initiation either produces a session or pauses on confirmations.
#[derive(Debug)]
pub enum InitiationOutcome {
    Started(InitiationResult),
    /// Confirmation-gated tool calls fired during extraction; no session
    /// exists yet. Resolve via [`IngestionService::resolve_initiation_confirmation`].
    ConfirmationRequired { questions: Vec<ConfirmationQuestion> },
}

/// Outcome of approve/skip/goto operations.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StepOutcome {
    pub session_id: BatchSessionId,
    pub status: SessionStatus,
    pub cursor: usize,
    pub current: Option<ExtractionRecord>,
    pub committed_id: Option<TransactionId>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchApprovalError {
    pub index: usize,
    pub message: String,
}

/// Result of approving every complete record at once. Per-record commit
/// failures are collected, not propagated; they never abort the remainder.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchApprovalResult {
    pub committed: Vec<(usize, TransactionId)>,
    pub errors: Vec<BatchApprovalError>,
    pub status: SessionStatus,
}

/// Extraction state parked while initiation waits on human confirmation.
struct PendingInitiation {
    user_id: UserId,
    detection: Detection,
    messages: Vec<Value>,
    assistant: AssistantTurn,
    invocations: Vec<super::models::ToolInvocation>,
    auto_results: HashMap<String, ToolResult>,
    pending: Vec<PendingCall>,
}

pub struct IngestionService {
    store: Arc<dyn SessionStore>,
    transactions: Arc<dyn TransactionStore>,
    similarity: Arc<dyn SimilarityIndex>,
    text_extractor: Arc<dyn BaseTextExtractor>,
    invoker: Arc<ExtractionInvoker>,
    engine: Arc<ToolEngine>,
    detector: DocumentDetector,
    hub: StreamHub,
    session_locks: RwLock<HashMap<BatchSessionId, Arc<Mutex<()>>>>,
    document_locks: RwLock<HashMap<DocumentId, Arc<Mutex<()>>>>,
    pending_initiations: Mutex<HashMap<DocumentId, PendingInitiation>>,
}

impl IngestionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SessionStore>,
        transactions: Arc<dyn TransactionStore>,
        similarity: Arc<dyn SimilarityIndex>,
        text_extractor: Arc<dyn BaseTextExtractor>,
        invoker: Arc<ExtractionInvoker>,
        engine: Arc<ToolEngine>,
        detector: DocumentDetector,
        hub: StreamHub,
    ) -> Self {
        Self {
            store,
            transactions,
            similarity,
            text_extractor,
            invoker,
            engine,
            detector,
            hub,
            session_locks: RwLock::new(HashMap::new()),
            document_locks: RwLock::new(HashMap::new()),
            pending_initiations: Mutex::new(HashMap::new()),
        }
    }

    async fn session_lock(&self, id: BatchSessionId) -> Arc<Mutex<()>> {
        self.session_locks
            .write()
            .await
            .entry(id)
            .or_default()
            .clone()
    }

    async fn document_lock(&self, id: DocumentId) -> Arc<Mutex<()>> {
        self.document_locks
            .write()
            .await
            .entry(id)
            .or_default()
            .clone()
    }

    // =========================================================================
    // Initiation
    // =========================================================================

    /// Process a document into a batch session, emitting progress events on
    /// the document's topic. Idempotent: an existing in-progress session for
    /// the same document and user is resumed without a model call.
    pub async fn initiate(
        &self,
        user_id: UserId,
        document_id: DocumentId,
    ) -> AppResult<InitiationOutcome> {
        let lock = self.document_lock(document_id).await;
        let _guard = lock.lock().await;

        let reporter = ProgressReporter::new(self.hub.clone(), document_id);
        match self.run_initiation(user_id, document_id, &reporter).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                reporter.error(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run_initiation(
        &self,
        user_id: UserId,
        document_id: DocumentId,
        reporter: &ProgressReporter,
    ) -> AppResult<InitiationOutcome> {
        const OP: &str = "initiate";

        reporter
            .emit(ProgressStep::Validating, "Validating request", 5)
            .await;
        let mut document = self
            .store
            .get_document(document_id)
            .await
            .map_err(|e| AppError::internal(OP, e))?
            .ok_or_else(|| AppError::not_found(OP, format!("document {document_id}")))?;
        if document.user_id != user_id {
            return Err(AppError::authorization(
                OP,
                format!("document {document_id} belongs to another user"),
            ));
        }

        reporter
            .emit(ProgressStep::CheckingSession, "Checking for existing session", 15)
            .await;
        if let Some(existing) = self
            .store
            .find_active_session(document_id, user_id)
            .await
            .map_err(|e| AppError::internal(OP, e))?
        {
            reporter
                .complete(
                    "Resumed existing session",
                    Some(json!({"session_id": existing.id.to_string(), "resumed": true})),
                )
                .await;
            let current = existing.current_record().cloned();
            return Ok(InitiationOutcome::Started(InitiationResult {
                session_id: existing.id,
                total_records: existing.records.len(),
                successfully_initiated: true,
                overall_confidence: 0.0,
                notes: None,
                records: existing.records,
                current,
                resumed: true,
            }));
        }

        reporter
            .emit(ProgressStep::FetchingUserData, "Reading document text", 25)
            .await;
        let text = match &document.raw_text {
            Some(text) => text.clone(),
            None => {
                let extracted = self
                    .text_extractor
                    .extract(&document.source_ref)
                    .await
                    .map_err(|e| AppError::internal(OP, e))?;
                document.raw_text = Some(extracted.text.clone());
                self.store
                    .update_document(&document)
                    .await
                    .map_err(|e| AppError::internal(OP, e))?;
                extracted.text
            }
        };
        if text.trim().is_empty() {
            return Err(AppError::validation(OP, "document has no extractable text"));
        }

        reporter
            .emit(ProgressStep::InvokingAi, "Classifying document", 40)
            .await;
        let detection = self.detector.detect(&text).await?;
        document.document_type = Some(detection.document_type);
        document.expected_transaction_count = Some(detection.expected_count);
        self.store
            .update_document(&document)
            .await
            .map_err(|e| AppError::internal(OP, e))?;

        reporter
            .emit(ProgressStep::Analyzing, "Extracting transactions", 50)
            .await;
        let messages = ExtractionInvoker::extraction_messages(&text);
        reporter
            .emit(ProgressStep::ExecutingTools, "Resolving entities", 60)
            .await;
        let pass = self.invoker.extract_pass(&messages).await?;

        if pass.needs_confirmation() {
            let questions: Vec<ConfirmationQuestion> = pass
                .pending
                .iter()
                .map(|p| ConfirmationQuestion {
                    tool_name: p.invocation.name.clone(),
                    question: p.question.clone(),
                })
                .collect();
            let ToolPass {
                assistant,
                invocations,
                auto_results,
                pending,
            } = pass;
            self.pending_initiations.lock().await.insert(
                document_id,
                PendingInitiation {
                    user_id,
                    detection,
                    messages,
                    assistant,
                    invocations,
                    auto_results,
                    pending,
                },
            );
            reporter
                .complete(
                    "Waiting for confirmation",
                    Some(json!({
                        "pending_confirmations": questions,
                    })),
                )
                .await;
            return Ok(InitiationOutcome::ConfirmationRequired { questions });
        }

        let mut messages = messages;
        ExtractionInvoker::append_tool_results(
            &mut messages,
            &pass.assistant,
            &pass.auto_results,
            &pass.invocations,
        );
        self.finish_initiation(user_id, document, detection, messages, reporter)
            .await
            .map(InitiationOutcome::Started)
    }

    /// Answer confirmations raised during initiation, then finish the
    /// extraction and create the session.
    pub async fn resolve_initiation_confirmation(
        &self,
        user_id: UserId,
        document_id: DocumentId,
        approvals: &HashMap<String, bool>,
    ) -> AppResult<InitiationResult> {
        const OP: &str = "resolve_initiation_confirmation";

        let lock = self.document_lock(document_id).await;
        let _guard = lock.lock().await;

        let parked = {
            let mut pending = self.pending_initiations.lock().await;
            pending
                .remove(&document_id)
                .ok_or_else(|| AppError::state(OP, "no confirmation is pending for this document"))?
        };
        if parked.user_id != user_id {
            // Put it back; another user cannot consume it.
            self.pending_initiations
                .lock()
                .await
                .insert(document_id, parked);
            return Err(AppError::authorization(
                OP,
                "pending initiation belongs to another user",
            ));
        }

        let document = self
            .store
            .get_document(document_id)
            .await
            .map_err(|e| AppError::internal(OP, e))?
            .ok_or_else(|| AppError::not_found(OP, format!("document {document_id}")))?;

        let mut results = parked.auto_results;
        for call in parked.pending {
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

        let mut messages = parked.messages;
        ExtractionInvoker::append_tool_results(
            &mut messages,
            &parked.assistant,
            &results,
            &parked.invocations,
        );

        let reporter = ProgressReporter::new(self.hub.clone(), document_id);
        match self
            .finish_initiation(user_id, document, parked.detection, messages, &reporter)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => {
                reporter.error(e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Structured extraction, session creation, and clarification setup for
    /// the first incomplete record.
    async fn finish_initiation(
        &self,
        user_id: UserId,
        mut document: Document,
        detection: Detection,
        messages: Vec<Value>,
        reporter: &ProgressReporter,
    ) -> AppResult<InitiationResult> {
        const OP: &str = "initiate";

        reporter
            .emit(ProgressStep::EnrichingData, "Structuring extracted data", 75)
            .await;
        let outcome = self.invoker.structured_batch(messages).await?;
        if outcome.records.is_empty() {
            document.status = DocumentStatus::Failed;
            self.store
                .update_document(&document)
                .await
                .map_err(|e| AppError::internal(OP, e))?;
            return Err(AppError::extraction(OP, "no transactions detected"));
        }

        reporter
            .emit(ProgressStep::CreatingSession, "Creating batch session", 85)
            .await;
        let mut session = SequentialBatchSession::new(
            document.id,
            user_id,
            detection.mode,
            outcome.records,
            detection.expected_count,
        );
        let cursor = session.cursor;
        self.open_clarification_if_needed(&mut session, cursor, OP)
            .await?;
        self.store
            .insert_session(&session)
            .await
            .map_err(|e| AppError::internal(OP, e))?;

        reporter
            .emit(ProgressStep::Finalizing, "Finalizing", 95)
            .await;
        document.status = DocumentStatus::Processed;
        self.store
            .update_document(&document)
            .await
            .map_err(|e| AppError::internal(OP, e))?;

        reporter
            .complete(
                "Batch session created",
                Some(json!({
                    "session_id": session.id.to_string(),
                    "total_records": session.records.len(),
                })),
            )
            .await;
        tracing::info!(
            session_id = %session.id,
            document_id = %document.id,
            records = session.records.len(),
            "batch session created"
        );

        let current = session.current_record().cloned();
        Ok(InitiationResult {
            session_id: session.id,
            total_records: session.records.len(),
            successfully_initiated: true,
            overall_confidence: outcome.overall_confidence,
            notes: outcome.notes,
            records: session.records,
            current,
            resumed: false,
        })
    }

    // =========================================================================
    // Approval loop
    // =========================================================================

    /// Commit the record at the cursor, with optional field edits.
    pub async fn approve(
        &self,
        user_id: UserId,
        session_id: BatchSessionId,
        index: usize,
        edits: Option<RecordEdits>,
    ) -> AppResult<StepOutcome> {
        const OP: &str = "approve_record";

        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.load_session(session_id, user_id, OP).await?;
        session.ensure_active(OP)?;
        session.ensure_at_cursor(index, OP)?;

        let record = session.record(index, OP)?;
        if !record.is_complete {
            return Err(AppError::state(
                OP,
                format!("record {index} is incomplete and cannot be approved"),
            ));
        }
        if record.is_committed() {
            return Err(AppError::state(OP, format!("record {index} is already committed")));
        }

        let mut record = record.clone();
        if let Some(edits) = edits {
            edits.apply(&mut record);
        }

        let committed_id = self.commit_record(user_id, &mut record, OP).await?;
        *session.record_mut(index, OP)? = record;
        session.processed_count += 1;
        session.advance_cursor();
        if session.status == SessionStatus::InProgress {
            let cursor = session.cursor;
            self.open_clarification_if_needed(&mut session, cursor, OP)
                .await?;
        }
        self.store
            .update_session(&session)
            .await
            .map_err(|e| AppError::internal(OP, e))?;

        Ok(StepOutcome {
            session_id,
            status: session.status,
            cursor: session.cursor,
            current: session.current_record().cloned(),
            committed_id: Some(committed_id),
        })
    }

    /// Pass over the record at the cursor without committing it.
    pub async fn skip(
        &self,
        user_id: UserId,
        session_id: BatchSessionId,
        index: usize,
    ) -> AppResult<StepOutcome> {
        const OP: &str = "skip_record";

        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.load_session(session_id, user_id, OP).await?;
        session.ensure_active(OP)?;
        session.ensure_at_cursor(index, OP)?;

        let clarification_id = session.record(index, OP)?.clarification_id;
        self.close_clarification(clarification_id, None, OP).await?;

        session.skipped_count += 1;
        session.advance_cursor();
        if session.status == SessionStatus::InProgress {
            let cursor = session.cursor;
            self.open_clarification_if_needed(&mut session, cursor, OP)
                .await?;
        }
        self.store
            .update_session(&session)
            .await
            .map_err(|e| AppError::internal(OP, e))?;

        Ok(StepOutcome {
            session_id,
            status: session.status,
            cursor: session.cursor,
            current: session.current_record().cloned(),
            committed_id: None,
        })
    }

    /// Explicit non-linear navigation. The only operation that can move the
    /// cursor backward; reopens a completed session.
    pub async fn goto(
        &self,
        user_id: UserId,
        session_id: BatchSessionId,
        target: usize,
    ) -> AppResult<StepOutcome> {
        const OP: &str = "goto_record";

        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.load_session(session_id, user_id, OP).await?;
        if matches!(session.status, SessionStatus::Failed | SessionStatus::Rejected) {
            return Err(AppError::state(
                OP,
                format!("session {session_id} is {:?}", session.status),
            ));
        }

        // Leaving the current record closes its open clarification session.
        if let Some(record) = session.current_record() {
            self.close_clarification(record.clarification_id, None, OP)
                .await?;
        }

        session.move_cursor_to(target, OP)?;
        self.open_clarification_if_needed(&mut session, target, OP)
            .await?;
        self.store
            .update_session(&session)
            .await
            .map_err(|e| AppError::internal(OP, e))?;

        Ok(StepOutcome {
            session_id,
            status: session.status,
            cursor: session.cursor,
            current: session.current_record().cloned(),
            committed_id: None,
        })
    }

    /// Commit every complete, uncommitted record at once. Per-record commit
    /// failures are collected rather than aborting the rest.
    pub async fn approve_all_complete(
        &self,
        user_id: UserId,
        session_id: BatchSessionId,
    ) -> AppResult<BatchApprovalResult> {
        const OP: &str = "approve_all_complete";

        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.load_session(session_id, user_id, OP).await?;
        session.ensure_active(OP)?;

        let mut committed = Vec::new();
        let mut errors = Vec::new();
        for index in 0..session.records.len() {
            let record = session.record(index, OP)?;
            if !record.is_complete || record.is_committed() {
                continue;
            }
            let mut record = record.clone();
            match self.commit_record(user_id, &mut record, OP).await {
                Ok(id) => {
                    *session.record_mut(index, OP)? = record;
                    session.processed_count += 1;
                    committed.push((index, id));
                }
                Err(e) => errors.push(BatchApprovalError {
                    index,
                    message: e.to_string(),
                }),
            }
        }

        // Move the cursor past everything already dealt with.
        while session.status == SessionStatus::InProgress
            && session
                .current_record()
                .is_some_and(ExtractionRecord::is_committed)
        {
            session.advance_cursor();
        }
        if session.status == SessionStatus::InProgress {
            let cursor = session.cursor;
            self.open_clarification_if_needed(&mut session, cursor, OP)
                .await?;
        }
        self.store
            .update_session(&session)
            .await
            .map_err(|e| AppError::internal(OP, e))?;

        Ok(BatchApprovalResult {
            committed,
            errors,
            status: session.status,
        })
    }

    /// Explicit early termination; remaining records count as skipped.
    pub async fn complete(
        &self,
        user_id: UserId,
        session_id: BatchSessionId,
    ) -> AppResult<StepOutcome> {
        const OP: &str = "complete_session";

        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.load_session(session_id, user_id, OP).await?;
        session.ensure_active(OP)?;

        if let Some(record) = session.current_record() {
            self.close_clarification(record.clarification_id, None, OP)
                .await?;
        }
        session.complete_early();
        self.store
            .update_session(&session)
            .await
            .map_err(|e| AppError::internal(OP, e))?;

        Ok(StepOutcome {
            session_id,
            status: session.status,
            cursor: session.cursor,
            current: None,
            committed_id: None,
        })
    }

    /// Explicit abandonment; no further mutation allowed afterward.
    pub async fn reject(
        &self,
        user_id: UserId,
        session_id: BatchSessionId,
    ) -> AppResult<StepOutcome> {
        const OP: &str = "reject_session";

        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.load_session(session_id, user_id, OP).await?;
        session.ensure_active(OP)?;

        if let Some(record) = session.current_record() {
            self.close_clarification(record.clarification_id, None, OP)
                .await?;
        }
        session.reject();
        self.store
            .update_session(&session)
            .await
            .map_err(|e| AppError::internal(OP, e))?;

        Ok(StepOutcome {
            session_id,
            status: session.status,
            cursor: session.cursor,
            current: None,
            committed_id: None,
        })
    }

    pub async fn get_session(
        &self,
        user_id: UserId,
        session_id: BatchSessionId,
    ) -> AppResult<SequentialBatchSession> {
        const OP: &str = "get_session";
        self.load_session(session_id, user_id, OP).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load_session(
        &self,
        session_id: BatchSessionId,
        user_id: UserId,
        operation: &'static str,
    ) -> AppResult<SequentialBatchSession> {
        let session = self
            .store
            .get_session(session_id)
            .await
            .map_err(|e| AppError::internal(operation, e))?
            .ok_or_else(|| AppError::not_found(operation, format!("session {session_id}")))?;
        session.ensure_owned_by(user_id, operation)?;
        Ok(session)
    }

    async fn commit_record(
        &self,
        user_id: UserId,
        record: &mut ExtractionRecord,
        operation: &'static str,
    ) -> AppResult<TransactionId> {
        let transaction = record.transaction.as_ref().ok_or_else(|| {
            AppError::state(operation, format!("record {} has no transaction", record.index))
        })?;

        let transaction_id = self
            .transactions
            .commit(user_id, transaction, &record.enrichment)
            .await
            .map_err(|e| AppError::commit(operation, record.index, e.to_string()))?;
        record.committed_id = Some(transaction_id);

        // Indexing failures degrade search, not the commit.
        let text = match &transaction.counterparty {
            Some(counterparty) => format!("{} {}", transaction.description, counterparty),
            None => transaction.description.clone(),
        };
        if let Err(e) = self.similarity.index(transaction_id, &text).await {
            tracing::warn!(transaction_id = %transaction_id, error = %e, "similarity indexing failed");
        }

        self.close_clarification(record.clarification_id, Some(transaction_id), operation)
            .await?;
        Ok(transaction_id)
    }

    async fn close_clarification(
        &self,
        clarification_id: Option<crate::common::ClarificationId>,
        committed: Option<TransactionId>,
        operation: &'static str,
    ) -> AppResult<()> {
        let Some(id) = clarification_id else {
            return Ok(());
        };
        let Some(mut clarification) = self
            .store
            .get_clarification(id)
            .await
            .map_err(|e| AppError::internal(operation, e))?
        else {
            return Ok(());
        };
        if clarification.is_terminal() {
            return Ok(());
        }
        clarification.complete(committed);
        self.store
            .update_clarification(&clarification)
            .await
            .map_err(|e| AppError::internal(operation, e))
    }

    /// Lazily open (or reuse) a clarification session for an incomplete
    /// record with outstanding questions.
    async fn open_clarification_if_needed(
        &self,
        session: &mut SequentialBatchSession,
        index: usize,
        operation: &'static str,
    ) -> AppResult<()> {
        let Some(record) = session.records.get(index) else {
            return Ok(());
        };
        if record.is_complete || (record.questions.is_empty() && record.missing_fields.is_empty()) {
            return Ok(());
        }

        if let Some(existing_id) = record.clarification_id {
            let reusable = self
                .store
                .get_clarification(existing_id)
                .await
                .map_err(|e| AppError::internal(operation, e))?
                .is_some_and(|c| !c.is_terminal());
            if reusable {
                return Ok(());
            }
        }

        let clarification = ClarificationSession::new(session.id, index);
        let clarification_id = clarification.id;
        self.store
            .insert_clarification(&clarification)
            .await
            .map_err(|e| AppError::internal(operation, e))?;
        session.record_mut(index, operation)?.clarification_id = Some(clarification_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::ingestion::policy::ConfirmationPolicy;
    use crate::domains::ingestion::tools;
    use crate::kernel::test_dependencies::{
        InMemoryEntityStore, InMemorySessionStore, InMemoryTransactionStore, MockAI,
        MockTextExtractor, RecordingSimilarityIndex,
    };

    struct Fixture {
        service: IngestionService,
        ai: Arc<MockAI>,
        store: Arc<InMemorySessionStore>,
        transactions: Arc<InMemoryTransactionStore>,
        entity_store: Arc<InMemoryEntityStore>,
        similarity: Arc<RecordingSimilarityIndex>,
        user_id: UserId,
        document_id: DocumentId,
    }

    async fn fixture() -> Fixture {
        let ai = Arc::new(MockAI::new());
        let entity_store = Arc::new(InMemoryEntityStore::default());
        let store = Arc::new(InMemorySessionStore::default());
        let transactions = Arc::new(InMemoryTransactionStore::default());
        let similarity = Arc::new(RecordingSimilarityIndex::default());
        let engine = Arc::new(ToolEngine::new(entity_store.clone()));
        let invoker = Arc::new(ExtractionInvoker::new(
            ai.clone(),
            engine.clone(),
            ConfirmationPolicy::default(),
        ));
        let detector = DocumentDetector::new(ai.clone());

        let user_id = UserId::new();
        let mut document = Document::new(user_id, "uploads/statement.pdf");
        document.raw_text = Some("2026-02-01 EDEKA -12.50\n2026-02-02 REWE -8.00\n2026-02-03 ??? -3.00".into());
        store.insert_document(&document).await.unwrap();

        Fixture {
            service: IngestionService::new(
                store.clone(),
                transactions.clone(),
                similarity.clone(),
                Arc::new(MockTextExtractor::new("unused")),
                invoker,
                engine,
                detector,
                StreamHub::new(),
            ),
            ai,
            store,
            transactions,
            entity_store,
            similarity,
            user_id,
            document_id: document.id,
        }
    }

    fn record_json(index: usize, complete: bool, description: &str) -> serde_json::Value {
        if complete {
            json!({
                "index": index,
                "is_complete": true,
                "confidence": 0.9,
                "transaction": {
                    "amount": "12.50", "currency": "EUR",
                    "transaction_type": "expense", "direction": "debit",
                    "payment_method": "card", "counterparty": "Edeka",
                    "occurred_at": "2026-02-01T12:00:00Z",
                    "description": description, "reference": null
                },
                "enrichment": {"category_id": null, "contact_id": null,
                    "source_account_id": null, "destination_account_id": null,
                    "self_transfer": false},
                "missing_fields": [], "questions": [], "notes": null
            })
        } else {
            json!({
                "index": index,
                "is_complete": false,
                "confidence": 0.4,
                "transaction": null,
                "enrichment": {"category_id": null, "contact_id": null,
                    "source_account_id": null, "destination_account_id": null,
                    "self_transfer": false},
                "missing_fields": ["description"],
                "questions": ["What was this payment for?"],
                "notes": null
            })
        }
    }

    fn detection_json(count: u32) -> String {
        json!({
            "document_type": "statement",
            "transaction_count": count,
            "reasoning": "test"
        })
        .to_string()
    }

    fn batch_json(records: Vec<serde_json::Value>) -> String {
        json!({
            "records": records,
            "overall_confidence": 0.8,
            "notes": null
        })
        .to_string()
    }

    /// Script a full three-record initiation: detection, one auto tool call,
    /// and a batch with record 0 complete, records 1-2 incomplete.
    fn script_three_record_initiation(ai: &MockAI) {
        ai.push_structured(detection_json(3));
        ai.push_turn(MockAI::tool_turn(vec![(
            tools::VALIDATE_TRANSACTION_TYPE,
            json!({"value": "expense"}),
        )]));
        ai.push_structured(batch_json(vec![
            record_json(0, true, "Groceries"),
            record_json(1, false, ""),
            record_json(2, false, ""),
        ]));
    }

    #[tokio::test]
    async fn test_three_record_initiation_and_approval() {
        let f = fixture().await;
        script_three_record_initiation(&f.ai);

        let InitiationOutcome::Started(result) =
            f.service.initiate(f.user_id, f.document_id).await.unwrap()
        else {
            panic!("expected started session");
        };
        assert_eq!(result.total_records, 3);
        assert_eq!(result.current.as_ref().unwrap().index, 0);
        assert!(result.current.as_ref().unwrap().is_complete);
        assert!(!result.resumed);

        // Approving record 0 commits it and lands on incomplete record 1
        // with a linked clarification session.
        let outcome = f
            .service
            .approve(f.user_id, result.session_id, 0, None)
            .await
            .unwrap();
        assert_eq!(outcome.cursor, 1);
        assert!(outcome.committed_id.is_some());
        let current = outcome.current.unwrap();
        assert!(!current.is_complete);
        assert!(current.clarification_id.is_some());

        assert_eq!(f.transactions.committed().len(), 1);
        assert_eq!(f.similarity.indexed().len(), 1);
    }

    #[tokio::test]
    async fn test_initiation_is_idempotent() {
        let f = fixture().await;
        script_three_record_initiation(&f.ai);

        let InitiationOutcome::Started(first) =
            f.service.initiate(f.user_id, f.document_id).await.unwrap()
        else {
            panic!("expected started session");
        };
        let calls_after_first = f.ai.tool_calls() + f.ai.structured_calls();

        // Second initiate resumes without any model call; nothing further
        // is scripted, so a model call would fail the test anyway.
        let InitiationOutcome::Started(second) =
            f.service.initiate(f.user_id, f.document_id).await.unwrap()
        else {
            panic!("expected resumed session");
        };
        assert!(second.resumed);
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.current.unwrap().index, 0);
        assert_eq!(f.ai.tool_calls() + f.ai.structured_calls(), calls_after_first);
    }

    #[tokio::test]
    async fn test_zero_records_fails_batch_without_leaving_session() {
        let f = fixture().await;
        f.ai.push_structured(detection_json(1));
        f.ai.push_turn(MockAI::tool_turn(vec![(
            tools::VALIDATE_TRANSACTION_TYPE,
            json!({"value": "expense"}),
        )]));
        f.ai.push_structured(batch_json(vec![]));

        let err = f.service.initiate(f.user_id, f.document_id).await.unwrap_err();
        assert_eq!(err.status_code(), 422);

        let document = f.store.get_document(f.document_id).await.unwrap().unwrap();
        assert_eq!(document.status, DocumentStatus::Failed);
        assert!(f
            .store
            .find_active_session(f.document_id, f.user_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_always_tool_parks_initiation_until_confirmed() {
        let f = fixture().await;
        f.ai.push_structured(detection_json(1));
        f.ai.push_turn(MockAI::tool_turn(vec![(
            tools::CREATE_BANK_ACCOUNT,
            json!({"name": "Checking"}),
        )]));

        let InitiationOutcome::ConfirmationRequired { questions } =
            f.service.initiate(f.user_id, f.document_id).await.unwrap()
        else {
            panic!("expected confirmation request");
        };
        assert_eq!(questions.len(), 1);
        assert!(f.entity_store.all().is_empty());

        // Approval executes the call and finishes the extraction.
        f.ai.push_structured(batch_json(vec![record_json(0, true, "Opening balance")]));
        let approvals = HashMap::from([(tools::CREATE_BANK_ACCOUNT.to_string(), true)]);
        let result = f
            .service
            .resolve_initiation_confirmation(f.user_id, f.document_id, &approvals)
            .await
            .unwrap();
        assert_eq!(result.total_records, 1);
        assert_eq!(f.entity_store.all().len(), 1);
    }

    #[tokio::test]
    async fn test_approve_requires_cursor_and_completeness() {
        let f = fixture().await;
        script_three_record_initiation(&f.ai);
        let InitiationOutcome::Started(result) =
            f.service.initiate(f.user_id, f.document_id).await.unwrap()
        else {
            panic!("expected started session");
        };

        // Off-cursor approval is a state error.
        let err = f
            .service
            .approve(f.user_id, result.session_id, 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);

        // Approving the incomplete record at the cursor is also refused.
        f.service.approve(f.user_id, result.session_id, 0, None).await.unwrap();
        let err = f
            .service
            .approve(f.user_id, result.session_id, 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn test_skip_advances_without_commit() {
        let f = fixture().await;
        script_three_record_initiation(&f.ai);
        let InitiationOutcome::Started(result) =
            f.service.initiate(f.user_id, f.document_id).await.unwrap()
        else {
            panic!("expected started session");
        };

        let outcome = f.service.skip(f.user_id, result.session_id, 0).await.unwrap();
        assert_eq!(outcome.cursor, 1);
        assert!(outcome.committed_id.is_none());
        assert!(f.transactions.committed().is_empty());

        let session = f.service.get_session(f.user_id, result.session_id).await.unwrap();
        assert_eq!(session.skipped_count, 1);
        assert_eq!(session.processed_count, 0);
    }

    #[tokio::test]
    async fn test_goto_closes_current_clarification_and_opens_target() {
        let f = fixture().await;
        script_three_record_initiation(&f.ai);
        let InitiationOutcome::Started(result) =
            f.service.initiate(f.user_id, f.document_id).await.unwrap()
        else {
            panic!("expected started session");
        };
        let session_id = result.session_id;

        // Approve record 0, landing on record 1 with an open clarification.
        f.service.approve(f.user_id, session_id, 0, None).await.unwrap();
        let session = f.service.get_session(f.user_id, session_id).await.unwrap();
        let clar_1 = session.records[1].clarification_id.unwrap();

        let outcome = f.service.goto(f.user_id, session_id, 2).await.unwrap();
        assert_eq!(outcome.cursor, 2);

        // Record 1's session is closed, record 2 got one of its own.
        let closed = f.store.get_clarification(clar_1).await.unwrap().unwrap();
        assert!(closed.is_terminal());
        let session = f.service.get_session(f.user_id, session_id).await.unwrap();
        assert!(session.records[2].clarification_id.is_some());
        assert_ne!(session.records[2].clarification_id, Some(clar_1));
    }

    #[tokio::test]
    async fn test_goto_reopens_completed_session() {
        let f = fixture().await;
        f.ai.push_structured(detection_json(1));
        f.ai.push_turn(MockAI::tool_turn(vec![(
            tools::VALIDATE_TRANSACTION_TYPE,
            json!({"value": "expense"}),
        )]));
        f.ai.push_structured(batch_json(vec![record_json(0, true, "Groceries")]));

        let InitiationOutcome::Started(result) =
            f.service.initiate(f.user_id, f.document_id).await.unwrap()
        else {
            panic!("expected started session");
        };
        let outcome = f.service.approve(f.user_id, result.session_id, 0, None).await.unwrap();
        assert_eq!(outcome.status, SessionStatus::Completed);

        let outcome = f.service.goto(f.user_id, result.session_id, 0).await.unwrap();
        assert_eq!(outcome.status, SessionStatus::InProgress);
        assert_eq!(outcome.cursor, 0);
    }

    #[tokio::test]
    async fn test_complete_counts_remaining_as_skipped() {
        let f = fixture().await;
        script_three_record_initiation(&f.ai);
        let InitiationOutcome::Started(result) =
            f.service.initiate(f.user_id, f.document_id).await.unwrap()
        else {
            panic!("expected started session");
        };

        f.service.approve(f.user_id, result.session_id, 0, None).await.unwrap();
        let outcome = f.service.complete(f.user_id, result.session_id).await.unwrap();
        assert_eq!(outcome.status, SessionStatus::Completed);

        let session = f.service.get_session(f.user_id, result.session_id).await.unwrap();
        assert_eq!(session.processed_count, 1);
        assert_eq!(session.skipped_count, 2);
    }

    #[tokio::test]
    async fn test_rejected_session_refuses_mutation() {
        let f = fixture().await;
        script_three_record_initiation(&f.ai);
        let InitiationOutcome::Started(result) =
            f.service.initiate(f.user_id, f.document_id).await.unwrap()
        else {
            panic!("expected started session");
        };

        f.service.reject(f.user_id, result.session_id).await.unwrap();
        let err = f
            .service
            .approve(f.user_id, result.session_id, 0, None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
        let err = f.service.goto(f.user_id, result.session_id, 0).await.unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn test_batch_approval_collects_per_record_errors() {
        let f = fixture().await;
        f.ai.push_structured(detection_json(3));
        f.ai.push_turn(MockAI::tool_turn(vec![(
            tools::VALIDATE_TRANSACTION_TYPE,
            json!({"value": "expense"}),
        )]));
        f.ai.push_structured(batch_json(vec![
            record_json(0, true, "Groceries"),
            record_json(1, true, "poison"),
            record_json(2, true, "Fuel"),
        ]));
        f.transactions.fail_on_description("poison");

        let InitiationOutcome::Started(result) =
            f.service.initiate(f.user_id, f.document_id).await.unwrap()
        else {
            panic!("expected started session");
        };

        let batch = f
            .service
            .approve_all_complete(f.user_id, result.session_id)
            .await
            .unwrap();
        assert_eq!(batch.committed.len(), 2);
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].index, 1);
        // The failed record keeps the session open at its index.
        assert_eq!(batch.status, SessionStatus::InProgress);

        let session = f.service.get_session(f.user_id, result.session_id).await.unwrap();
        assert_eq!(session.cursor, 1);
    }

    #[tokio::test]
    async fn test_other_users_document_is_forbidden() {
        let f = fixture().await;
        let err = f
            .service
            .initiate(UserId::new(), f.document_id)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_progress_stream_terminates_once() {
        let f = fixture().await;
        script_three_record_initiation(&f.ai);

        let topic = ProgressReporter::topic_for(f.document_id);
        let mut rx = f.service.hub.subscribe(&topic).await;

        f.service.initiate(f.user_id, f.document_id).await.unwrap();

        let mut events = Vec::new();
        while let Ok(value) = rx.try_recv() {
            events.push(value);
        }
        let terminal: Vec<_> = events
            .iter()
            .filter(|e| matches!(e["step"].as_str(), Some("complete") | Some("error")))
            .collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0]["step"], "complete");

        // Progress is monotonic across the stream.
        let progresses: Vec<u64> = events.iter().map(|e| e["progress"].as_u64().unwrap()).collect();
        assert!(progresses.windows(2).all(|w| w[0] <= w[1]));
    }
}
