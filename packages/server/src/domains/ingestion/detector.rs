//! Document classification.
//!
//! One structured model call decides what kind of document this is and how
//! many distinct transactions it contains, which in turn selects the
//! processing mode.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use openai_client::StructuredOutput;

use super::models::{DocumentType, ProcessingMode};
use crate::common::{AppError, AppResult};
use crate::kernel::traits::BaseAI;

const DETECTION_SYSTEM_PROMPT: &str = "You classify financial documents. Given the raw text of \
a document, decide its type and count how many distinct transactions it describes. A receipt \
with several line items paid in one total is still one transaction; a bank statement lists one \
transaction per movement.";

/// Classification wire shape returned by the model.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct DetectionDraft {
    /// One of: single-receipt, multi-item-receipt, statement, invoice,
    /// expense-report, other
    document_type: String,
    /// Number of distinct transactions in the document.
    transaction_count: u32,
    /// Short rationale, for diagnostics only.
    reasoning: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub document_type: DocumentType,
    pub expected_count: usize,
    pub mode: ProcessingMode,
}

pub struct DocumentDetector {
    ai: Arc<dyn BaseAI>,
}

impl DocumentDetector {
    pub fn new(ai: Arc<dyn BaseAI>) -> Self {
        Self { ai }
    }

    pub async fn detect(&self, document_text: &str) -> AppResult<Detection> {
        let messages = vec![
            json!({"role": "system", "content": DETECTION_SYSTEM_PROMPT}),
            json!({"role": "user", "content": document_text}),
        ];
        let reply = self
            .ai
            .generate_structured(messages, DetectionDraft::openai_schema())
            .await
            .map_err(|e| AppError::internal("detect_document", e))?;

        let draft: DetectionDraft = serde_json::from_str(&reply.json).map_err(|e| {
            AppError::extraction("detect_document", format!("malformed detection: {e}"))
        })?;

        // An unrecognized label degrades to Other rather than failing the run.
        let document_type = draft
            .document_type
            .parse::<DocumentType>()
            .unwrap_or(DocumentType::Other);
        let expected_count = draft.transaction_count as usize;
        let mode = if expected_count > 1 {
            ProcessingMode::Sequential
        } else {
            ProcessingMode::Single
        };

        tracing::info!(
            document_type = %document_type,
            expected_count,
            reasoning = %draft.reasoning,
            "document classified"
        );

        Ok(Detection {
            document_type,
            expected_count,
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::MockAI;

    fn detection_json(document_type: &str, count: u32) -> String {
        json!({
            "document_type": document_type,
            "transaction_count": count,
            "reasoning": "test"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_statement_selects_sequential_mode() {
        let ai = Arc::new(MockAI::new());
        ai.push_structured(detection_json("statement", 5));
        let detector = DocumentDetector::new(ai);

        let detection = detector.detect("bank statement text").await.unwrap();
        assert_eq!(detection.document_type, DocumentType::Statement);
        assert_eq!(detection.expected_count, 5);
        assert_eq!(detection.mode, ProcessingMode::Sequential);
    }

    #[tokio::test]
    async fn test_single_receipt_selects_single_mode() {
        let ai = Arc::new(MockAI::new());
        ai.push_structured(detection_json("single-receipt", 1));
        let detector = DocumentDetector::new(ai);

        let detection = detector.detect("receipt text").await.unwrap();
        assert_eq!(detection.mode, ProcessingMode::Single);
    }

    #[tokio::test]
    async fn test_unknown_label_degrades_to_other() {
        let ai = Arc::new(MockAI::new());
        ai.push_structured(detection_json("parking-ticket", 1));
        let detector = DocumentDetector::new(ai);

        let detection = detector.detect("text").await.unwrap();
        assert_eq!(detection.document_type, DocumentType::Other);
    }
}
