//! The sequential batch session aggregate.
//!
//! Owns the ordered record list and the approval cursor. Pure state
//! transitions and guards live here; IO (commits, model calls, persistence)
//! is driven by the ingestion service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::ExtractionRecord;
use crate::common::{AppError, AppResult, BatchSessionId, DocumentId, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Single,
    Sequential,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Failed,
    Rejected,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        self != SessionStatus::InProgress
    }
}

/// The resumable aggregate tracking all records from one document and the
/// approval cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequentialBatchSession {
    pub id: BatchSessionId,
    pub document_id: DocumentId,
    pub user_id: UserId,
    pub mode: ProcessingMode,
    /// Ordered, index-addressed; exclusively owned by this session.
    pub records: Vec<ExtractionRecord>,
    /// Index of the record currently awaiting human action.
    pub cursor: usize,
    pub expected_count: usize,
    pub processed_count: usize,
    pub skipped_count: usize,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SequentialBatchSession {
    pub fn new(
        document_id: DocumentId,
        user_id: UserId,
        mode: ProcessingMode,
        records: Vec<ExtractionRecord>,
        expected_count: usize,
    ) -> Self {
        Self {
            id: BatchSessionId::new(),
            document_id,
            user_id,
            mode,
            records,
            cursor: 0,
            expected_count,
            processed_count: 0,
            skipped_count: 0,
            status: SessionStatus::InProgress,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    // =========================================================================
    // Guards
    // =========================================================================

    pub fn ensure_owned_by(&self, user_id: UserId, operation: &'static str) -> AppResult<()> {
        if self.user_id != user_id {
            return Err(AppError::authorization(
                operation,
                format!("session {} belongs to another user", self.id),
            ));
        }
        Ok(())
    }

    /// Terminal states are absorbing; no mutation is allowed in them.
    pub fn ensure_active(&self, operation: &'static str) -> AppResult<()> {
        if self.status.is_terminal() {
            return Err(AppError::state(
                operation,
                format!("session {} is {:?}", self.id, self.status),
            ));
        }
        Ok(())
    }

    pub fn ensure_at_cursor(&self, index: usize, operation: &'static str) -> AppResult<()> {
        if index != self.cursor {
            return Err(AppError::state(
                operation,
                format!("index {} is not at cursor {}", index, self.cursor),
            ));
        }
        Ok(())
    }

    pub fn record(&self, index: usize, operation: &'static str) -> AppResult<&ExtractionRecord> {
        self.records.get(index).ok_or_else(|| {
            AppError::not_found(
                operation,
                format!("record index {} out of range 0..{}", index, self.records.len()),
            )
        })
    }

    pub fn record_mut(
        &mut self,
        index: usize,
        operation: &'static str,
    ) -> AppResult<&mut ExtractionRecord> {
        let len = self.records.len();
        self.records.get_mut(index).ok_or_else(|| {
            AppError::not_found(
                operation,
                format!("record index {} out of range 0..{}", index, len),
            )
        })
    }

    /// The record currently awaiting human action, if any remain.
    pub fn current_record(&self) -> Option<&ExtractionRecord> {
        self.records.get(self.cursor)
    }

    pub fn remaining(&self) -> usize {
        self.records.len().saturating_sub(self.cursor)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Advance the cursor by exactly one. Reaching the end completes the
    /// session. Only `goto` may ever move the cursor backward.
    pub fn advance_cursor(&mut self) {
        self.cursor += 1;
        if self.cursor >= self.records.len() {
            self.status = SessionStatus::Completed;
            self.completed_at = Some(Utc::now());
        }
    }

    /// Move the cursor to an arbitrary in-range index. Reopens a completed
    /// session.
    pub fn move_cursor_to(&mut self, target: usize, operation: &'static str) -> AppResult<()> {
        if target >= self.records.len() {
            return Err(AppError::not_found(
                operation,
                format!("record index {} out of range 0..{}", target, self.records.len()),
            ));
        }
        self.cursor = target;
        if self.status == SessionStatus::Completed {
            self.status = SessionStatus::InProgress;
            self.completed_at = None;
        }
        Ok(())
    }

    /// Early termination: remaining records are counted as skipped.
    pub fn complete_early(&mut self) {
        self.skipped_count += self.remaining();
        self.status = SessionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn reject(&mut self) {
        self.status = SessionStatus::Rejected;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self) {
        self.status = SessionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::ingestion::models::record::{Enrichment, ExtractionRecord};

    fn incomplete_record(index: usize) -> ExtractionRecord {
        ExtractionRecord {
            index,
            is_complete: false,
            confidence: 0.5,
            transaction: None,
            enrichment: Enrichment::default(),
            missing_fields: vec!["amount".into()],
            questions: vec![],
            notes: None,
            clarification_id: None,
            committed_id: None,
        }
    }

    fn session_with(n: usize) -> SequentialBatchSession {
        let records = (0..n).map(incomplete_record).collect();
        SequentialBatchSession::new(
            DocumentId::new(),
            UserId::new(),
            ProcessingMode::Sequential,
            records,
            n,
        )
    }

    #[test]
    fn test_cursor_advances_and_completes() {
        let mut session = session_with(2);
        session.advance_cursor();
        assert_eq!(session.cursor, 1);
        assert_eq!(session.status, SessionStatus::InProgress);

        session.advance_cursor();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.completed_at.is_some());
    }

    #[test]
    fn test_goto_reopens_completed_session() {
        let mut session = session_with(2);
        session.advance_cursor();
        session.advance_cursor();
        assert_eq!(session.status, SessionStatus::Completed);

        session.move_cursor_to(0, "goto_record").unwrap();
        assert_eq!(session.cursor, 0);
        assert_eq!(session.status, SessionStatus::InProgress);
        assert!(session.completed_at.is_none());
    }

    #[test]
    fn test_goto_out_of_range_is_not_found() {
        let mut session = session_with(2);
        let err = session.move_cursor_to(5, "goto_record").unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let mut session = session_with(1);
        session.reject();
        assert!(session.ensure_active("approve_record").is_err());

        let mut failed = session_with(1);
        failed.fail();
        assert!(failed.ensure_active("skip_record").is_err());
    }

    #[test]
    fn test_complete_early_counts_remaining_as_skipped() {
        let mut session = session_with(3);
        session.advance_cursor();
        session.complete_early();

        assert_eq!(session.skipped_count, 2);
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[test]
    fn test_cursor_guard() {
        let session = session_with(3);
        assert!(session.ensure_at_cursor(0, "approve_record").is_ok());
        let err = session.ensure_at_cursor(2, "approve_record").unwrap_err();
        assert_eq!(err.status_code(), 409);
    }
}
