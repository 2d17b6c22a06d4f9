//! Typed ID definitions for all domain entities.
//!
//! Type aliases over [`Id`] give compile-time safety for ID usage: a
//! `ContactId` cannot be passed where a `BatchSessionId` is expected.

pub use super::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for User entities (document owners).
pub struct User;

/// Marker type for Document entities (uploaded receipts/statements).
pub struct Document;

/// Marker type for SequentialBatchSession aggregates.
pub struct BatchSession;

/// Marker type for ClarificationSession sub-conversations.
pub struct Clarification;

/// Marker type for Contact entities (transaction parties).
pub struct Contact;

/// Marker type for Category entities.
pub struct Category;

/// Marker type for Account entities (bank accounts).
pub struct Account;

/// Marker type for committed Transaction records.
pub struct Transaction;

// ============================================================================
// Type aliases
// ============================================================================

pub type UserId = Id<User>;
pub type DocumentId = Id<Document>;
pub type BatchSessionId = Id<BatchSession>;
pub type ClarificationId = Id<Clarification>;
pub type ContactId = Id<Contact>;
pub type CategoryId = Id<Category>;
pub type AccountId = Id<Account>;
pub type TransactionId = Id<Transaction>;
