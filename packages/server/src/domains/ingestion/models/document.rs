use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{DocumentId, UserId};

/// Document classification produced by the detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentType {
    SingleReceipt,
    MultiItemReceipt,
    Statement,
    Invoice,
    ExpenseReport,
    Other,
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentType::SingleReceipt => "single-receipt",
            DocumentType::MultiItemReceipt => "multi-item-receipt",
            DocumentType::Statement => "statement",
            DocumentType::Invoice => "invoice",
            DocumentType::ExpenseReport => "expense-report",
            DocumentType::Other => "other",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for DocumentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "single-receipt" => Ok(DocumentType::SingleReceipt),
            "multi-item-receipt" => Ok(DocumentType::MultiItemReceipt),
            "statement" => Ok(DocumentType::Statement),
            "invoice" => Ok(DocumentType::Invoice),
            "expense-report" => Ok(DocumentType::ExpenseReport),
            "other" => Ok(DocumentType::Other),
            _ => Err(anyhow::anyhow!("Invalid document type: {}", s)),
        }
    }
}

/// Lifecycle of an uploaded document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processed,
    Failed,
}

/// An uploaded financial document.
///
/// Created on upload; mutated once by text extraction + detection; immutable
/// afterward except for status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub user_id: UserId,
    /// Reference into external file storage (out of scope here).
    pub source_ref: String,
    /// Raw text produced by the text-extraction collaborator.
    pub raw_text: Option<String>,
    pub document_type: Option<DocumentType>,
    /// How many distinct transactions the detector expects.
    pub expected_transaction_count: Option<usize>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(user_id: UserId, source_ref: impl Into<String>) -> Self {
        Self {
            id: DocumentId::new(),
            user_id,
            source_ref: source_ref.into(),
            raw_text: None,
            document_type: None,
            expected_transaction_count: None,
            status: DocumentStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_document_type_roundtrip() {
        for ty in [
            DocumentType::SingleReceipt,
            DocumentType::MultiItemReceipt,
            DocumentType::Statement,
            DocumentType::Invoice,
            DocumentType::ExpenseReport,
            DocumentType::Other,
        ] {
            assert_eq!(DocumentType::from_str(&ty.to_string()).unwrap(), ty);
        }
    }

    #[test]
    fn test_new_document_is_pending() {
        let doc = Document::new(UserId::new(), "uploads/receipt-1.jpg");
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert!(doc.raw_text.is_none());
        assert!(doc.document_type.is_none());
    }
}
