use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::record::ExtractionRecord;
use super::tooling::{PendingCall, ToolResult};
use crate::common::{BatchSessionId, ClarificationId, TransactionId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One conversation turn. The log is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationStatus {
    Active,
    PendingConfirmation,
    Completed,
}

/// A per-record sub-conversation resolving an incomplete record.
///
/// Created lazily the first time a record is incomplete or a
/// confirmation-gated tool fires; terminal when the record completes or is
/// abandoned/skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationSession {
    pub id: ClarificationId,
    pub batch_session_id: BatchSessionId,
    pub record_index: usize,
    pub turns: Vec<Turn>,
    /// Tool results accumulated so far, keyed by tool name.
    pub tool_results: HashMap<String, ToolResult>,
    /// Tool calls awaiting human confirmation, when status is
    /// `pending_confirmation`.
    pub pending: Option<Vec<PendingCall>>,
    pub status: ClarificationStatus,
    pub created_at: DateTime<Utc>,
    /// Set when the record is committed, linking the session to the
    /// externally persisted transaction.
    pub committed_transaction_id: Option<TransactionId>,
    /// Last structured record the assistant produced; feeds the
    /// response-reuse heuristic.
    pub last_record: Option<ExtractionRecord>,
}

impl ClarificationSession {
    pub fn new(batch_session_id: BatchSessionId, record_index: usize) -> Self {
        Self {
            id: ClarificationId::new(),
            batch_session_id,
            record_index,
            turns: Vec::new(),
            tool_results: HashMap::new(),
            pending: None,
            status: ClarificationStatus::Active,
            created_at: Utc::now(),
            committed_transaction_id: None,
            last_record: None,
        }
    }

    pub fn append_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: TurnRole::User,
            content: content.into(),
            at: Utc::now(),
        });
    }

    pub fn append_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: TurnRole::Assistant,
            content: content.into(),
            at: Utc::now(),
        });
    }

    /// Park the given calls for confirmation.
    pub fn park_pending(&mut self, calls: Vec<PendingCall>) {
        self.pending = Some(calls);
        self.status = ClarificationStatus::PendingConfirmation;
    }

    /// Clear pending state and return to active.
    pub fn clear_pending(&mut self) -> Vec<PendingCall> {
        self.status = ClarificationStatus::Active;
        self.pending.take().unwrap_or_default()
    }

    /// Merge new tool results into the cache (newest wins per tool name).
    pub fn merge_results(&mut self, results: HashMap<String, ToolResult>) {
        self.tool_results.extend(results);
    }

    /// Close the session, optionally linking the committed transaction.
    pub fn complete(&mut self, committed: Option<TransactionId>) {
        self.status = ClarificationStatus::Completed;
        self.committed_transaction_id = committed;
        self.pending = None;
    }

    pub fn is_terminal(&self) -> bool {
        self.status == ClarificationStatus::Completed
    }
}
