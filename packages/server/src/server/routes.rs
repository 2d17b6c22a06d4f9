//! HTTP handlers for the ingestion API.
//!
//! Authentication is out of scope; callers identify themselves with an
//! `x-user-id` header that a real deployment would replace with auth
//! middleware.

use std::collections::HashMap;

use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::common::{AppError, BatchSessionId, ClarificationId, DocumentId, UserId};
use crate::domains::ingestion::models::{Document, RecordEdits};
use crate::domains::ingestion::{ClarificationReply, InitiationOutcome};
use crate::server::app::AppState;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(operation = self.operation(), error = %self, "request failed");
        }
        let body = json!({
            "error": self.to_string(),
            "operation": self.operation(),
        });
        (status, Json(body)).into_response()
    }
}

fn user_id(headers: &HeaderMap) -> Result<UserId, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<UserId>().ok())
        .ok_or_else(|| AppError::validation("authenticate", "missing or invalid x-user-id header"))
}

// =============================================================================
// Documents
// =============================================================================

#[derive(Deserialize)]
pub struct CreateDocumentRequest {
    pub source_ref: String,
    /// Pre-extracted text; when absent the text-extraction collaborator is
    /// invoked at initiation time.
    pub text: Option<String>,
}

pub async fn create_document_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<impl IntoResponse, AppError> {
    const OP: &str = "create_document";
    let user_id = user_id(&headers)?;
    if request.source_ref.trim().is_empty() {
        return Err(AppError::validation(OP, "source_ref must not be empty"));
    }

    let mut document = Document::new(user_id, request.source_ref);
    document.raw_text = request.text;
    state
        .store
        .insert_document(&document)
        .await
        .map_err(|e| AppError::internal(OP, e))?;

    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn initiate_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(document_id): Path<DocumentId>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = user_id(&headers)?;
    let outcome = state.ingestion.initiate(user_id, document_id).await?;
    Ok(Json(initiation_json(outcome)))
}

#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub approvals: HashMap<String, bool>,
}

pub async fn confirm_initiation_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(document_id): Path<DocumentId>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = user_id(&headers)?;
    let result = state
        .ingestion
        .resolve_initiation_confirmation(user_id, document_id, &request.approvals)
        .await?;
    Ok(Json(json!({"status": "started", "result": result})))
}

fn initiation_json(outcome: InitiationOutcome) -> serde_json::Value {
    match outcome {
        InitiationOutcome::Started(result) => json!({"status": "started", "result": result}),
        InitiationOutcome::ConfirmationRequired { questions } => {
            json!({"status": "confirmation_required", "questions": questions})
        }
    }
}

// =============================================================================
// Sessions
// =============================================================================

pub async fn get_session_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<BatchSessionId>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id(&headers)?;
    let session = state.ingestion.get_session(user_id, session_id).await?;
    Ok(Json(session))
}

#[derive(Deserialize, Default)]
pub struct ApproveRequest {
    pub edits: Option<RecordEdits>,
}

pub async fn approve_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path((session_id, index)): Path<(BatchSessionId, usize)>,
    Json(request): Json<ApproveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id(&headers)?;
    let outcome = state
        .ingestion
        .approve(user_id, session_id, index, request.edits)
        .await?;
    Ok(Json(outcome))
}

pub async fn skip_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path((session_id, index)): Path<(BatchSessionId, usize)>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id(&headers)?;
    let outcome = state.ingestion.skip(user_id, session_id, index).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct GotoRequest {
    pub index: usize,
}

pub async fn goto_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<BatchSessionId>,
    Json(request): Json<GotoRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id(&headers)?;
    let outcome = state
        .ingestion
        .goto(user_id, session_id, request.index)
        .await?;
    Ok(Json(outcome))
}

pub async fn complete_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<BatchSessionId>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id(&headers)?;
    let outcome = state.ingestion.complete(user_id, session_id).await?;
    Ok(Json(outcome))
}

pub async fn reject_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<BatchSessionId>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id(&headers)?;
    let outcome = state.ingestion.reject(user_id, session_id).await?;
    Ok(Json(outcome))
}

pub async fn approve_all_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<BatchSessionId>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id(&headers)?;
    let result = state
        .ingestion
        .approve_all_complete(user_id, session_id)
        .await?;
    Ok(Json(result))
}

// =============================================================================
// Clarifications
// =============================================================================

#[derive(Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

pub async fn send_message_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(clarification_id): Path<ClarificationId>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = user_id(&headers)?;
    let reply = state
        .clarifications
        .send_message(clarification_id, user_id, &request.text)
        .await?;
    Ok(Json(clarification_json(reply)))
}

pub async fn resolve_confirmation_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(clarification_id): Path<ClarificationId>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = user_id(&headers)?;
    let reply = state
        .clarifications
        .resolve_confirmation(clarification_id, user_id, &request.approvals)
        .await?;
    Ok(Json(clarification_json(reply)))
}

fn clarification_json(reply: ClarificationReply) -> serde_json::Value {
    match reply {
        ClarificationReply::Updated {
            record,
            assistant_message,
        } => json!({
            "status": "updated",
            "record": record,
            "assistant_message": assistant_message,
        }),
        ClarificationReply::ConfirmationRequired { questions } => json!({
            "status": "confirmation_required",
            "questions": questions,
        }),
    }
}

// =============================================================================
// Health
// =============================================================================

pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let database = match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        sqlx::query("SELECT 1").execute(&state.db_pool),
    )
    .await
    {
        Ok(Ok(_)) => "ok",
        Ok(Err(_)) => "error",
        Err(_) => "timeout",
    };

    let status = if database == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({"status": database})))
}
