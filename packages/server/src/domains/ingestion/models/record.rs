//! Extraction records and the completeness invariant.
//!
//! An [`ExtractionRecord`] is one candidate transaction extracted from a
//! document. Its two legal shapes are mutually exclusive:
//!
//! - incomplete: `transaction` is `None` and `missing_fields` is non-empty
//! - complete: `transaction` is populated and `missing_fields`/`questions`
//!   are empty
//!
//! [`ExtractionRecord::validate`] enforces this on every record produced by
//! a model call; a partially populated transaction is never accepted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::common::{AccountId, CategoryId, ClarificationId, ContactId, TransactionId};

/// Transaction kinds accepted by the record store.
pub const VALID_TRANSACTION_TYPES: &[&str] = &["expense", "income", "transfer"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Expense,
    Income,
    Transfer,
}

impl FromStr for TransactionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "expense" => Ok(TransactionType::Expense),
            "income" => Ok(TransactionType::Income),
            "transfer" => Ok(TransactionType::Transfer),
            _ => Err(anyhow::anyhow!("Invalid transaction type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Debit,
    Credit,
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "debit" => Ok(Direction::Debit),
            "credit" => Ok(Direction::Credit),
            _ => Err(anyhow::anyhow!("Invalid direction: {}", s)),
        }
    }
}

/// The extracted transaction fields of a complete record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionDraft {
    pub amount: Decimal,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub direction: Direction,
    pub payment_method: Option<String>,
    /// Free-text counterparty name as it appeared in the document.
    pub counterparty: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub description: String,
    pub reference: Option<String>,
}

/// Resolved foreign identifiers attached to a record by tool execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Enrichment {
    pub category_id: Option<CategoryId>,
    pub contact_id: Option<ContactId>,
    pub source_account_id: Option<AccountId>,
    pub destination_account_id: Option<AccountId>,
    pub self_transfer: bool,
}

/// One candidate transaction extracted from a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    /// 0-based position in the batch; stable for the life of the batch.
    pub index: usize,
    pub is_complete: bool,
    /// Extraction confidence, 0.0–1.0.
    pub confidence: f32,
    pub transaction: Option<TransactionDraft>,
    pub enrichment: Enrichment,
    pub missing_fields: Vec<String>,
    pub questions: Vec<String>,
    pub notes: Option<String>,
    pub clarification_id: Option<ClarificationId>,
    /// Set on commit; the record is immutable afterward.
    pub committed_id: Option<TransactionId>,
}

impl ExtractionRecord {
    /// Enforce the completeness invariant.
    ///
    /// Incomplete records must carry no transaction and at least one missing
    /// field; complete records must carry a transaction and no missing
    /// fields or questions.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_complete {
            if self.transaction.is_none() {
                return Err(format!("record {}: complete but transaction absent", self.index));
            }
            if !self.missing_fields.is_empty() {
                return Err(format!(
                    "record {}: complete but missing_fields non-empty",
                    self.index
                ));
            }
            if !self.questions.is_empty() {
                return Err(format!("record {}: complete but questions non-empty", self.index));
            }
        } else {
            if self.transaction.is_some() {
                return Err(format!(
                    "record {}: incomplete but transaction populated",
                    self.index
                ));
            }
            if self.missing_fields.is_empty() {
                return Err(format!("record {}: incomplete but missing_fields empty", self.index));
            }
        }
        Ok(())
    }

    pub fn is_committed(&self) -> bool {
        self.committed_id.is_some()
    }
}

// =============================================================================
// Model-facing wire shapes
// =============================================================================

/// Transaction shape as produced by the structured model call.
///
/// Amounts and timestamps arrive as strings and are parsed into `Decimal`
/// and `DateTime<Utc>` during conversion, so a malformed value is caught at
/// the extraction boundary instead of at commit time.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct TransactionWire {
    /// Decimal amount, e.g. "42.90"
    pub amount: String,
    /// ISO 4217 code, e.g. "EUR"
    pub currency: String,
    /// One of: expense, income, transfer
    pub transaction_type: String,
    /// One of: debit, credit
    pub direction: String,
    pub payment_method: Option<String>,
    pub counterparty: Option<String>,
    /// RFC 3339 timestamp
    pub occurred_at: String,
    pub description: String,
    pub reference: Option<String>,
}

/// Enrichment shape as produced by the structured model call. IDs are echoed
/// back from tool results as UUID strings.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct EnrichmentWire {
    pub category_id: Option<String>,
    pub contact_id: Option<String>,
    pub source_account_id: Option<String>,
    pub destination_account_id: Option<String>,
    pub self_transfer: bool,
}

/// One record as produced by the structured model call.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct RecordDraft {
    pub index: usize,
    pub is_complete: bool,
    pub confidence: f32,
    pub transaction: Option<TransactionWire>,
    pub enrichment: EnrichmentWire,
    pub missing_fields: Vec<String>,
    pub questions: Vec<String>,
    pub notes: Option<String>,
}

/// The full structured extraction response.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct BatchDraft {
    pub records: Vec<RecordDraft>,
    /// Overall extraction confidence, 0.0–1.0.
    pub overall_confidence: f32,
    pub notes: Option<String>,
}

impl TransactionWire {
    fn parse(self) -> Result<TransactionDraft, String> {
        let amount = Decimal::from_str(&self.amount)
            .map_err(|e| format!("invalid amount '{}': {}", self.amount, e))?;
        let transaction_type = self
            .transaction_type
            .parse::<TransactionType>()
            .map_err(|e| e.to_string())?;
        let direction = self.direction.parse::<Direction>().map_err(|e| e.to_string())?;
        let occurred_at = DateTime::parse_from_rfc3339(&self.occurred_at)
            .map_err(|e| format!("invalid timestamp '{}': {}", self.occurred_at, e))?
            .with_timezone(&Utc);

        Ok(TransactionDraft {
            amount,
            currency: self.currency,
            transaction_type,
            direction,
            payment_method: self.payment_method,
            counterparty: self.counterparty,
            occurred_at,
            description: self.description,
            reference: self.reference,
        })
    }
}

fn parse_id<T>(field: &str, value: Option<String>) -> Result<Option<crate::common::Id<T>>, String> {
    match value {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => Uuid::parse_str(&s)
            .map(|u| Some(crate::common::Id::from_uuid(u)))
            .map_err(|e| format!("invalid {} '{}': {}", field, s, e)),
    }
}

impl RecordDraft {
    /// Convert the wire shape into a typed record, enforcing the
    /// completeness invariant.
    pub fn into_record(self) -> Result<ExtractionRecord, String> {
        let transaction = self.transaction.map(TransactionWire::parse).transpose()?;

        let enrichment = Enrichment {
            category_id: parse_id("category_id", self.enrichment.category_id)?,
            contact_id: parse_id("contact_id", self.enrichment.contact_id)?,
            source_account_id: parse_id("source_account_id", self.enrichment.source_account_id)?,
            destination_account_id: parse_id(
                "destination_account_id",
                self.enrichment.destination_account_id,
            )?,
            self_transfer: self.enrichment.self_transfer,
        };

        let record = ExtractionRecord {
            index: self.index,
            is_complete: self.is_complete,
            confidence: self.confidence.clamp(0.0, 1.0),
            transaction,
            enrichment,
            missing_fields: self.missing_fields,
            questions: self.questions,
            notes: self.notes,
            clarification_id: None,
            committed_id: None,
        };

        record.validate()?;
        Ok(record)
    }
}

// =============================================================================
// Approval-time edits
// =============================================================================

/// Field overrides a human may apply at approval time, before commit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordEdits {
    pub category_id: Option<CategoryId>,
    pub contact_id: Option<ContactId>,
    pub source_account_id: Option<AccountId>,
    pub destination_account_id: Option<AccountId>,
    pub amount: Option<Decimal>,
    pub description: Option<String>,
    pub payment_method: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl RecordEdits {
    /// Apply the overrides to a complete record.
    pub fn apply(self, record: &mut ExtractionRecord) {
        if let Some(id) = self.category_id {
            record.enrichment.category_id = Some(id);
        }
        if let Some(id) = self.contact_id {
            record.enrichment.contact_id = Some(id);
        }
        if let Some(id) = self.source_account_id {
            record.enrichment.source_account_id = Some(id);
        }
        if let Some(id) = self.destination_account_id {
            record.enrichment.destination_account_id = Some(id);
        }

        if let Some(tx) = record.transaction.as_mut() {
            if let Some(amount) = self.amount {
                tx.amount = amount;
            }
            if let Some(description) = self.description {
                tx.description = description;
            }
            if let Some(payment_method) = self.payment_method {
                tx.payment_method = Some(payment_method);
            }
            if let Some(occurred_at) = self.occurred_at {
                tx.occurred_at = occurred_at;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_wire(index: usize) -> RecordDraft {
        RecordDraft {
            index,
            is_complete: true,
            confidence: 0.92,
            transaction: Some(TransactionWire {
                amount: "42.90".into(),
                currency: "EUR".into(),
                transaction_type: "expense".into(),
                direction: "debit".into(),
                payment_method: Some("card".into()),
                counterparty: Some("Edeka".into()),
                occurred_at: "2026-03-14T10:30:00Z".into(),
                description: "Groceries".into(),
                reference: None,
            }),
            enrichment: EnrichmentWire::default(),
            missing_fields: vec![],
            questions: vec![],
            notes: None,
        }
    }

    fn incomplete_wire(index: usize) -> RecordDraft {
        RecordDraft {
            index,
            is_complete: false,
            confidence: 0.4,
            transaction: None,
            enrichment: EnrichmentWire::default(),
            missing_fields: vec!["description".into()],
            questions: vec!["What was this payment for?".into()],
            notes: None,
        }
    }

    #[test]
    fn test_complete_record_parses() {
        let record = complete_wire(0).into_record().unwrap();
        assert!(record.is_complete);
        let tx = record.transaction.unwrap();
        assert_eq!(tx.amount, Decimal::from_str("42.90").unwrap());
        assert_eq!(tx.transaction_type, TransactionType::Expense);
    }

    #[test]
    fn test_incomplete_record_parses() {
        let record = incomplete_wire(1).into_record().unwrap();
        assert!(!record.is_complete);
        assert!(record.transaction.is_none());
        assert_eq!(record.missing_fields, vec!["description".to_string()]);
    }

    #[test]
    fn test_invariant_rejects_incomplete_with_transaction() {
        let mut draft = complete_wire(0);
        draft.is_complete = false;
        draft.missing_fields = vec!["amount".into()];
        let err = draft.into_record().unwrap_err();
        assert!(err.contains("incomplete but transaction populated"));
    }

    #[test]
    fn test_invariant_rejects_complete_without_transaction() {
        let mut draft = incomplete_wire(0);
        draft.is_complete = true;
        let err = draft.into_record().unwrap_err();
        assert!(err.contains("complete but transaction absent"));
    }

    #[test]
    fn test_invariant_rejects_complete_with_missing_fields() {
        let mut draft = complete_wire(0);
        draft.missing_fields = vec!["reference".into()];
        let err = draft.into_record().unwrap_err();
        assert!(err.contains("missing_fields non-empty"));
    }

    #[test]
    fn test_invariant_rejects_incomplete_without_missing_fields() {
        let mut draft = incomplete_wire(0);
        draft.missing_fields.clear();
        let err = draft.into_record().unwrap_err();
        assert!(err.contains("missing_fields empty"));
    }

    #[test]
    fn test_invalid_amount_rejected_at_boundary() {
        let mut draft = complete_wire(0);
        draft.transaction.as_mut().unwrap().amount = "forty-two".into();
        let err = draft.into_record().unwrap_err();
        assert!(err.contains("invalid amount"));
    }

    #[test]
    fn test_invalid_type_rejected_at_boundary() {
        let mut draft = complete_wire(0);
        draft.transaction.as_mut().unwrap().transaction_type = "donation".into();
        assert!(draft.into_record().is_err());
    }

    #[test]
    fn test_edits_override_fields() {
        let mut record = complete_wire(0).into_record().unwrap();
        let edits = RecordEdits {
            amount: Some(Decimal::from_str("99.00").unwrap()),
            description: Some("Weekly groceries".into()),
            ..Default::default()
        };
        edits.apply(&mut record);

        let tx = record.transaction.unwrap();
        assert_eq!(tx.amount, Decimal::from_str("99.00").unwrap());
        assert_eq!(tx.description, "Weekly groceries");
        // Untouched fields survive
        assert_eq!(tx.currency, "EUR");
    }
}
