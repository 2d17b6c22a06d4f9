//! Application error taxonomy.
//!
//! Every error names the originating operation for diagnostics and maps to
//! an HTTP-style status code. Internal model/store failures are wrapped here
//! rather than leaking raw errors to callers.
//!
//! A declined confirmation is NOT an error; it is recorded as an explicit
//! "declined by user" tool result and extraction proceeds without it.

use thiserror::Error;

/// Result type for orchestration operations.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Orchestration errors.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed input. Rejected immediately, never retried.
    #[error("{operation}: validation failed: {message}")]
    Validation {
        operation: &'static str,
        message: String,
    },

    /// Acting on another user's document or session.
    #[error("{operation}: not authorized: {message}")]
    Authorization {
        operation: &'static str,
        message: String,
    },

    /// Unknown document, session, or record index.
    #[error("{operation}: not found: {message}")]
    NotFound {
        operation: &'static str,
        message: String,
    },

    /// Operation invalid in the current state (terminal session, approving
    /// an incomplete record, confirming when nothing is pending).
    #[error("{operation}: invalid state: {message}")]
    State {
        operation: &'static str,
        message: String,
    },

    /// Extraction-level failure (model returned no tool calls, zero records
    /// detected). Fails the whole batch, not one record.
    #[error("{operation}: extraction failed: {message}")]
    Extraction {
        operation: &'static str,
        message: String,
    },

    /// Per-record commit failure (invalid date, invalid type enum).
    /// Isolated to that record during batch approval.
    #[error("{operation}: commit failed for record {index}: {message}")]
    Commit {
        operation: &'static str,
        index: usize,
        message: String,
    },

    /// Wrapped internal failure from a model or store collaborator.
    #[error("{operation}: internal error: {source}")]
    Internal {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn validation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            operation,
            message: message.into(),
        }
    }

    pub fn authorization(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Authorization {
            operation,
            message: message.into(),
        }
    }

    pub fn not_found(operation: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            operation,
            message: message.into(),
        }
    }

    pub fn state(operation: &'static str, message: impl Into<String>) -> Self {
        Self::State {
            operation,
            message: message.into(),
        }
    }

    pub fn extraction(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Extraction {
            operation,
            message: message.into(),
        }
    }

    pub fn commit(operation: &'static str, index: usize, message: impl Into<String>) -> Self {
        Self::Commit {
            operation,
            index,
            message: message.into(),
        }
    }

    pub fn internal(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            operation,
            source: source.into(),
        }
    }

    /// The operation this error originated from.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Validation { operation, .. }
            | Self::Authorization { operation, .. }
            | Self::NotFound { operation, .. }
            | Self::State { operation, .. }
            | Self::Extraction { operation, .. }
            | Self::Commit { operation, .. }
            | Self::Internal { operation, .. } => operation,
        }
    }

    /// HTTP-style status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Authorization { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::State { .. } => 409,
            Self::Extraction { .. } => 422,
            Self::Commit { .. } => 422,
            Self::Internal { .. } => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::validation("op", "m").status_code(), 400);
        assert_eq!(AppError::authorization("op", "m").status_code(), 403);
        assert_eq!(AppError::not_found("op", "m").status_code(), 404);
        assert_eq!(AppError::state("op", "m").status_code(), 409);
        assert_eq!(AppError::extraction("op", "m").status_code(), 422);
        assert_eq!(AppError::commit("op", 2, "m").status_code(), 422);
    }

    #[test]
    fn test_error_carries_operation() {
        let err = AppError::state("approve_record", "session is terminal");
        assert_eq!(err.operation(), "approve_record");
        assert!(err.to_string().contains("approve_record"));
    }
}
