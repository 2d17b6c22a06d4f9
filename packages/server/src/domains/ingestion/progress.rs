//! Progress reporting for batch initiation.
//!
//! Emits an ordered event stream over the [`StreamHub`] while a document is
//! being processed. Progress is clamped monotonic and the stream ends with
//! exactly one terminal event (`complete` or `error`); everything after the
//! terminal event is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::common::DocumentId;
use crate::kernel::stream_hub::StreamHub;

/// Fixed step vocabulary, in emission order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStep {
    Validating,
    FetchingUserData,
    CheckingSession,
    InvokingAi,
    Analyzing,
    ExecutingTools,
    CreatingSession,
    EnrichingData,
    Finalizing,
    Complete,
    Error,
}

impl ProgressStep {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressStep::Complete | ProgressStep::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: ProgressStep,
    pub message: String,
    /// 0-100, never decreasing within one stream.
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Per-initiation reporter. One instance per `initiate` call; the topic is
/// derived from the document id so a client can subscribe before initiating.
pub struct ProgressReporter {
    hub: StreamHub,
    topic: String,
    highest: AtomicU8,
    terminated: AtomicBool,
}

impl ProgressReporter {
    pub fn new(hub: StreamHub, document_id: DocumentId) -> Self {
        Self {
            hub,
            topic: Self::topic_for(document_id),
            highest: AtomicU8::new(0),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn topic_for(document_id: DocumentId) -> String {
        format!("ingestion:{document_id}")
    }

    pub async fn emit(&self, step: ProgressStep, message: impl Into<String>, progress: u8) {
        self.emit_with(step, message, progress, None).await;
    }

    pub async fn emit_with(
        &self,
        step: ProgressStep,
        message: impl Into<String>,
        progress: u8,
        metadata: Option<serde_json::Value>,
    ) {
        if self.terminated.load(Ordering::Acquire) {
            return;
        }
        if step.is_terminal() {
            // First terminal event wins; the stream never terminates twice.
            if self.terminated.swap(true, Ordering::AcqRel) {
                return;
            }
        }

        let clamped = progress.min(100);
        let progress = self.highest.fetch_max(clamped, Ordering::AcqRel).max(clamped);

        let event = ProgressEvent {
            step,
            message: message.into(),
            progress,
            timestamp: Utc::now(),
            metadata,
        };
        if let Ok(value) = serde_json::to_value(&event) {
            self.hub.publish(&self.topic, value).await;
        }
    }

    pub async fn complete(&self, message: impl Into<String>, metadata: Option<serde_json::Value>) {
        self.emit_with(ProgressStep::Complete, message, 100, metadata)
            .await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.emit_with(ProgressStep::Error, message, 100, None).await;
    }
}
