//! PostgreSQL-backed store implementations.
//!
//! Batch sessions keep their record array as a JSONB column (the aggregate
//! is always loaded and written whole, under the service's per-session
//! lock); entities and committed transactions get proper columns. Entity
//! uniqueness is enforced by a `(kind, normalized_name)` constraint, with
//! insert-on-conflict resolving concurrent creates of the same name to one
//! row.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::common::{BatchSessionId, ClarificationId, DocumentId, TransactionId, UserId};
use crate::domains::ingestion::models::{
    ClarificationSession, ClarificationStatus, Document, DocumentStatus, DocumentType, EntityKind,
    Enrichment, ExtractionRecord, PendingCall, ProcessingMode, SequentialBatchSession,
    SessionStatus, StoredEntity, ToolResult, TransactionDraft, Turn,
};
use crate::domains::ingestion::store::{
    EntityStore, SessionStore, SimilarityIndex, TransactionStore,
};
use crate::kernel::traits::BaseEmbeddingService;

// =============================================================================
// Entities
// =============================================================================

#[derive(sqlx::FromRow)]
struct EntityRow {
    id: Uuid,
    kind: String,
    name: String,
    normalized_name: String,
    variations: Vec<String>,
}

impl EntityRow {
    fn into_entity(self) -> Result<StoredEntity> {
        Ok(StoredEntity {
            id: self.id,
            kind: parse_entity_kind(&self.kind)?,
            name: self.name,
            normalized_name: self.normalized_name,
            variations: self.variations,
        })
    }
}

fn entity_kind_str(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Contact => "contact",
        EntityKind::Category => "category",
        EntityKind::Account => "account",
    }
}

fn parse_entity_kind(s: &str) -> Result<EntityKind> {
    match s {
        "contact" => Ok(EntityKind::Contact),
        "category" => Ok(EntityKind::Category),
        "account" => Ok(EntityKind::Account),
        other => Err(anyhow!("unknown entity kind '{other}'")),
    }
}

pub struct PostgresEntityStore {
    pool: PgPool,
}

impl PostgresEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    async fn find_by_name(&self, kind: EntityKind, name: &str) -> Result<Option<StoredEntity>> {
        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT id, kind, name, normalized_name, variations
            FROM entities
            WHERE kind = $1 AND lower(name) = lower($2)
            LIMIT 1
            "#,
        )
        .bind(entity_kind_str(kind))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EntityRow::into_entity).transpose()
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<StoredEntity>> {
        let rows = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT id, kind, name, normalized_name, variations
            FROM entities
            WHERE kind = $1
            ORDER BY name
            "#,
        )
        .bind(entity_kind_str(kind))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EntityRow::into_entity).collect()
    }

    async fn insert(&self, entity: StoredEntity) -> Result<StoredEntity> {
        let inserted = sqlx::query_as::<_, EntityRow>(
            r#"
            INSERT INTO entities (id, kind, name, normalized_name, variations)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (kind, normalized_name) DO NOTHING
            RETURNING id, kind, name, normalized_name, variations
            "#,
        )
        .bind(entity.id)
        .bind(entity_kind_str(entity.kind))
        .bind(&entity.name)
        .bind(&entity.normalized_name)
        .bind(&entity.variations)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return row.into_entity();
        }

        // Lost the race; the winner's row is the entity.
        let existing = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT id, kind, name, normalized_name, variations
            FROM entities
            WHERE kind = $1 AND normalized_name = $2
            "#,
        )
        .bind(entity_kind_str(entity.kind))
        .bind(&entity.normalized_name)
        .fetch_one(&self.pool)
        .await?;
        existing.into_entity()
    }
}

// =============================================================================
// Documents, sessions, clarifications
// =============================================================================

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    user_id: Uuid,
    source_ref: String,
    raw_text: Option<String>,
    document_type: Option<String>,
    expected_transaction_count: Option<i32>,
    status: String,
    created_at: DateTime<Utc>,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document> {
        Ok(Document {
            id: DocumentId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            source_ref: self.source_ref,
            raw_text: self.raw_text,
            document_type: self
                .document_type
                .map(|s| s.parse::<DocumentType>())
                .transpose()?,
            expected_transaction_count: self.expected_transaction_count.map(|c| c as usize),
            status: parse_document_status(&self.status)?,
            created_at: self.created_at,
        })
    }
}

fn document_status_str(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Pending => "pending",
        DocumentStatus::Processed => "processed",
        DocumentStatus::Failed => "failed",
    }
}

fn parse_document_status(s: &str) -> Result<DocumentStatus> {
    match s {
        "pending" => Ok(DocumentStatus::Pending),
        "processed" => Ok(DocumentStatus::Processed),
        "failed" => Ok(DocumentStatus::Failed),
        other => Err(anyhow!("unknown document status '{other}'")),
    }
}

fn session_status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::InProgress => "in_progress",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Rejected => "rejected",
    }
}

fn parse_session_status(s: &str) -> Result<SessionStatus> {
    match s {
        "in_progress" => Ok(SessionStatus::InProgress),
        "completed" => Ok(SessionStatus::Completed),
        "failed" => Ok(SessionStatus::Failed),
        "rejected" => Ok(SessionStatus::Rejected),
        other => Err(anyhow!("unknown session status '{other}'")),
    }
}

fn mode_str(mode: ProcessingMode) -> &'static str {
    match mode {
        ProcessingMode::Single => "single",
        ProcessingMode::Sequential => "sequential",
    }
}

fn parse_mode(s: &str) -> Result<ProcessingMode> {
    match s {
        "single" => Ok(ProcessingMode::Single),
        "sequential" => Ok(ProcessingMode::Sequential),
        other => Err(anyhow!("unknown processing mode '{other}'")),
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    document_id: Uuid,
    user_id: Uuid,
    mode: String,
    records: serde_json::Value,
    cursor_index: i32,
    expected_count: i32,
    processed_count: i32,
    skipped_count: i32,
    status: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    fn into_session(self) -> Result<SequentialBatchSession> {
        let records: Vec<ExtractionRecord> = serde_json::from_value(self.records)?;
        Ok(SequentialBatchSession {
            id: BatchSessionId::from_uuid(self.id),
            document_id: DocumentId::from_uuid(self.document_id),
            user_id: UserId::from_uuid(self.user_id),
            mode: parse_mode(&self.mode)?,
            records,
            cursor: self.cursor_index as usize,
            expected_count: self.expected_count as usize,
            processed_count: self.processed_count as usize,
            skipped_count: self.skipped_count as usize,
            status: parse_session_status(&self.status)?,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ClarificationRow {
    id: Uuid,
    batch_session_id: Uuid,
    record_index: i32,
    turns: serde_json::Value,
    tool_results: serde_json::Value,
    pending: Option<serde_json::Value>,
    status: String,
    created_at: DateTime<Utc>,
    committed_transaction_id: Option<Uuid>,
    last_record: Option<serde_json::Value>,
}

impl ClarificationRow {
    fn into_clarification(self) -> Result<ClarificationSession> {
        let turns: Vec<Turn> = serde_json::from_value(self.turns)?;
        let tool_results: std::collections::HashMap<String, ToolResult> =
            serde_json::from_value(self.tool_results)?;
        let pending: Option<Vec<PendingCall>> =
            self.pending.map(serde_json::from_value).transpose()?;
        let last_record: Option<ExtractionRecord> =
            self.last_record.map(serde_json::from_value).transpose()?;
        Ok(ClarificationSession {
            id: ClarificationId::from_uuid(self.id),
            batch_session_id: BatchSessionId::from_uuid(self.batch_session_id),
            record_index: self.record_index as usize,
            turns,
            tool_results,
            pending,
            status: parse_clarification_status(&self.status)?,
            created_at: self.created_at,
            committed_transaction_id: self.committed_transaction_id.map(TransactionId::from_uuid),
            last_record,
        })
    }
}

fn clarification_status_str(status: ClarificationStatus) -> &'static str {
    match status {
        ClarificationStatus::Active => "active",
        ClarificationStatus::PendingConfirmation => "pending_confirmation",
        ClarificationStatus::Completed => "completed",
    }
}

fn parse_clarification_status(s: &str) -> Result<ClarificationStatus> {
    match s {
        "active" => Ok(ClarificationStatus::Active),
        "pending_confirmation" => Ok(ClarificationStatus::PendingConfirmation),
        "completed" => Ok(ClarificationStatus::Completed),
        other => Err(anyhow!("unknown clarification status '{other}'")),
    }
}

pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn insert_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, user_id, source_ref, raw_text, document_type,
                 expected_transaction_count, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(document.id)
        .bind(document.user_id)
        .bind(&document.source_ref)
        .bind(&document.raw_text)
        .bind(document.document_type.map(|t| t.to_string()))
        .bind(document.expected_transaction_count.map(|c| c as i32))
        .bind(document_status_str(document.status))
        .bind(document.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, user_id, source_ref, raw_text, document_type,
                   expected_transaction_count, status, created_at
            FROM documents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DocumentRow::into_document).transpose()
    }

    async fn update_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET raw_text = $2, document_type = $3,
                expected_transaction_count = $4, status = $5
            WHERE id = $1
            "#,
        )
        .bind(document.id)
        .bind(&document.raw_text)
        .bind(document.document_type.map(|t| t.to_string()))
        .bind(document.expected_transaction_count.map(|c| c as i32))
        .bind(document_status_str(document.status))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_active_session(
        &self,
        document_id: DocumentId,
        user_id: UserId,
    ) -> Result<Option<SequentialBatchSession>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, document_id, user_id, mode, records, cursor_index,
                   expected_count, processed_count, skipped_count, status,
                   created_at, completed_at
            FROM batch_sessions
            WHERE document_id = $1 AND user_id = $2 AND status = 'in_progress'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(document_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SessionRow::into_session).transpose()
    }

    async fn insert_session(&self, session: &SequentialBatchSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO batch_sessions
                (id, document_id, user_id, mode, records, cursor_index,
                 expected_count, processed_count, skipped_count, status,
                 created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(session.id)
        .bind(session.document_id)
        .bind(session.user_id)
        .bind(mode_str(session.mode))
        .bind(serde_json::to_value(&session.records)?)
        .bind(session.cursor as i32)
        .bind(session.expected_count as i32)
        .bind(session.processed_count as i32)
        .bind(session.skipped_count as i32)
        .bind(session_status_str(session.status))
        .bind(session.created_at)
        .bind(session.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: BatchSessionId) -> Result<Option<SequentialBatchSession>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, document_id, user_id, mode, records, cursor_index,
                   expected_count, processed_count, skipped_count, status,
                   created_at, completed_at
            FROM batch_sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SessionRow::into_session).transpose()
    }

    async fn update_session(&self, session: &SequentialBatchSession) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE batch_sessions
            SET records = $2, cursor_index = $3, processed_count = $4,
                skipped_count = $5, status = $6, completed_at = $7
            WHERE id = $1
            "#,
        )
        .bind(session.id)
        .bind(serde_json::to_value(&session.records)?)
        .bind(session.cursor as i32)
        .bind(session.processed_count as i32)
        .bind(session.skipped_count as i32)
        .bind(session_status_str(session.status))
        .bind(session.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_clarification(&self, session: &ClarificationSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO clarification_sessions
                (id, batch_session_id, record_index, turns, tool_results,
                 pending, status, created_at, committed_transaction_id, last_record)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(session.id)
        .bind(session.batch_session_id)
        .bind(session.record_index as i32)
        .bind(serde_json::to_value(&session.turns)?)
        .bind(serde_json::to_value(&session.tool_results)?)
        .bind(session.pending.as_ref().map(serde_json::to_value).transpose()?)
        .bind(clarification_status_str(session.status))
        .bind(session.created_at)
        .bind(session.committed_transaction_id)
        .bind(session.last_record.as_ref().map(serde_json::to_value).transpose()?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_clarification(
        &self,
        id: ClarificationId,
    ) -> Result<Option<ClarificationSession>> {
        let row = sqlx::query_as::<_, ClarificationRow>(
            r#"
            SELECT id, batch_session_id, record_index, turns, tool_results,
                   pending, status, created_at, committed_transaction_id, last_record
            FROM clarification_sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ClarificationRow::into_clarification).transpose()
    }

    async fn update_clarification(&self, session: &ClarificationSession) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE clarification_sessions
            SET turns = $2, tool_results = $3, pending = $4, status = $5,
                committed_transaction_id = $6, last_record = $7
            WHERE id = $1
            "#,
        )
        .bind(session.id)
        .bind(serde_json::to_value(&session.turns)?)
        .bind(serde_json::to_value(&session.tool_results)?)
        .bind(session.pending.as_ref().map(serde_json::to_value).transpose()?)
        .bind(clarification_status_str(session.status))
        .bind(session.committed_transaction_id)
        .bind(session.last_record.as_ref().map(serde_json::to_value).transpose()?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Committed transactions
// =============================================================================

pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn commit(
        &self,
        user_id: UserId,
        transaction: &TransactionDraft,
        enrichment: &Enrichment,
    ) -> Result<TransactionId> {
        let id = TransactionId::new();
        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, user_id, amount, currency, transaction_type, direction,
                 payment_method, counterparty, occurred_at, description,
                 reference, category_id, contact_id, source_account_id,
                 destination_account_id, self_transfer)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(serde_plain_str(&transaction.transaction_type)?)
        .bind(serde_plain_str(&transaction.direction)?)
        .bind(&transaction.payment_method)
        .bind(&transaction.counterparty)
        .bind(transaction.occurred_at)
        .bind(&transaction.description)
        .bind(&transaction.reference)
        .bind(enrichment.category_id)
        .bind(enrichment.contact_id)
        .bind(enrichment.source_account_id)
        .bind(enrichment.destination_account_id)
        .bind(enrichment.self_transfer)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }
}

/// Serialize a unit-variant enum to its snake_case string form.
fn serde_plain_str<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(anyhow!("expected string-serializable enum, got {other}")),
    }
}

// =============================================================================
// Similarity index
// =============================================================================

/// pgvector-backed similarity index; one embedding per committed
/// transaction.
pub struct PgVectorSimilarityIndex {
    pool: PgPool,
    embeddings: Arc<dyn BaseEmbeddingService>,
}

impl PgVectorSimilarityIndex {
    pub fn new(pool: PgPool, embeddings: Arc<dyn BaseEmbeddingService>) -> Self {
        Self { pool, embeddings }
    }
}

#[async_trait]
impl SimilarityIndex for PgVectorSimilarityIndex {
    async fn index(&self, transaction_id: TransactionId, text: &str) -> Result<()> {
        let embedding = self.embeddings.generate(text).await?;
        sqlx::query(
            r#"
            INSERT INTO transaction_embeddings (transaction_id, content, embedding)
            VALUES ($1, $2, $3)
            ON CONFLICT (transaction_id)
            DO UPDATE SET content = EXCLUDED.content, embedding = EXCLUDED.embedding
            "#,
        )
        .bind(transaction_id)
        .bind(text)
        .bind(Vector::from(embedding))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
