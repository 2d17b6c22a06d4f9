//! Persistence contracts for the ingestion domain.
//!
//! The orchestration layer only ever talks to these traits; the Postgres
//! implementations live in `data/postgres.rs` and the in-memory test doubles
//! in `kernel/test_dependencies.rs`.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{
    ClarificationSession, Document, EntityKind, Enrichment, SequentialBatchSession, StoredEntity,
    TransactionDraft,
};
use crate::common::{
    BatchSessionId, ClarificationId, DocumentId, TransactionId, UserId,
};

/// Store for resolvable entities (contacts, categories, accounts).
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Exact case-insensitive lookup on the display name.
    async fn find_by_name(&self, kind: EntityKind, name: &str) -> Result<Option<StoredEntity>>;

    /// All entities of one kind, for alias and fuzzy matching.
    async fn list(&self, kind: EntityKind) -> Result<Vec<StoredEntity>>;

    /// Insert a new entity. `(kind, normalized_name)` is unique; on conflict
    /// the already-stored entity is returned instead of a duplicate.
    async fn insert(&self, entity: StoredEntity) -> Result<StoredEntity>;
}

/// Store for documents, batch sessions, and clarification sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_document(&self, document: &Document) -> Result<()>;
    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;
    async fn update_document(&self, document: &Document) -> Result<()>;

    /// The idempotency lookup: an `in_progress` session for the same
    /// document, user, and mode, if one exists.
    async fn find_active_session(
        &self,
        document_id: DocumentId,
        user_id: UserId,
    ) -> Result<Option<SequentialBatchSession>>;

    async fn insert_session(&self, session: &SequentialBatchSession) -> Result<()>;
    async fn get_session(&self, id: BatchSessionId) -> Result<Option<SequentialBatchSession>>;
    async fn update_session(&self, session: &SequentialBatchSession) -> Result<()>;

    async fn insert_clarification(&self, session: &ClarificationSession) -> Result<()>;
    async fn get_clarification(
        &self,
        id: ClarificationId,
    ) -> Result<Option<ClarificationSession>>;
    async fn update_clarification(&self, session: &ClarificationSession) -> Result<()>;
}

/// Store for committed transactions. Commit is the only write; committed
/// records are immutable afterward.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn commit(
        &self,
        user_id: UserId,
        transaction: &TransactionDraft,
        enrichment: &Enrichment,
    ) -> Result<TransactionId>;
}

/// Semantic-search index, fed once per committed transaction.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn index(&self, transaction_id: TransactionId, text: &str) -> Result<()>;
}
