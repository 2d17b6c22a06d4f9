//! Data model for the ingestion domain.

pub mod clarification;
pub mod document;
pub mod entity;
pub mod record;
pub mod session;
pub mod tooling;

pub use clarification::{ClarificationSession, ClarificationStatus, Turn, TurnRole};
pub use document::{Document, DocumentStatus, DocumentType};
pub use entity::{EntityKind, Resolution, StoredEntity};
pub use record::{
    BatchDraft, Direction, Enrichment, EnrichmentWire, ExtractionRecord, RecordDraft, RecordEdits,
    TransactionDraft, TransactionType, TransactionWire, VALID_TRANSACTION_TYPES,
};
pub use session::{ProcessingMode, SequentialBatchSession, SessionStatus};
pub use tooling::{PendingCall, ToolData, ToolInvocation, ToolResult};
