//! Application setup and server configuration.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::extract::Extension;
use axum::http::header::CONTENT_TYPE;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::domains::ingestion::data::{
    PgVectorSimilarityIndex, PostgresEntityStore, PostgresSessionStore, PostgresTransactionStore,
};
use crate::domains::ingestion::store::{
    EntityStore, SessionStore, SimilarityIndex, TransactionStore,
};
use crate::domains::ingestion::{
    ClarificationService, ConfirmationPolicy, DocumentDetector, ExtractionInvoker,
    IngestionService, ToolEngine,
};
use crate::kernel::sse::{self, SseState};
use crate::kernel::traits::{BaseAI, BaseEmbeddingService, BaseTextExtractor, ExtractedText};
use crate::kernel::{OpenAIClient, OpenAIEmbeddingService, OpenAIService, StreamHub};
use crate::server::routes::{
    approve_all_handler, approve_handler, complete_handler, confirm_initiation_handler,
    create_document_handler, get_session_handler, goto_handler, health_handler, initiate_handler,
    reject_handler, resolve_confirmation_handler, send_message_handler, skip_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub store: Arc<dyn SessionStore>,
    pub ingestion: Arc<IngestionService>,
    pub clarifications: Arc<ClarificationService>,
    pub stream_hub: StreamHub,
}

/// Stand-in for an OCR/PDF pipeline. Documents are expected to arrive with
/// pre-extracted text on upload; a real extractor plugs in behind
/// `BaseTextExtractor` without touching the ingestion service.
struct RawTextOnlyExtractor;

#[async_trait]
impl BaseTextExtractor for RawTextOnlyExtractor {
    async fn extract(&self, source_ref: &str) -> Result<ExtractedText> {
        bail!("no text extractor configured for source '{source_ref}'; upload documents with pre-extracted text")
    }
}

/// Build the Axum application router and the shared service graph.
pub fn build_app(pool: PgPool, config: &Config) -> Router {
    // One OpenAI client shared by the chat and embedding adapters
    let openai_client = OpenAIClient::new(config.openai_api_key.clone());
    let ai: Arc<dyn BaseAI> = Arc::new(OpenAIService::new(
        openai_client.clone(),
        &config.extraction_model,
    ));
    let embeddings: Arc<dyn BaseEmbeddingService> = Arc::new(OpenAIEmbeddingService::new(
        openai_client,
        &config.embedding_model,
    ));

    // Postgres-backed stores
    let entity_store: Arc<dyn EntityStore> = Arc::new(PostgresEntityStore::new(pool.clone()));
    let session_store: Arc<dyn SessionStore> = Arc::new(PostgresSessionStore::new(pool.clone()));
    let transactions: Arc<dyn TransactionStore> =
        Arc::new(PostgresTransactionStore::new(pool.clone()));
    let similarity: Arc<dyn SimilarityIndex> =
        Arc::new(PgVectorSimilarityIndex::new(pool.clone(), embeddings));

    // Extraction pipeline
    let engine = Arc::new(ToolEngine::new(entity_store));
    let invoker = Arc::new(ExtractionInvoker::new(
        ai.clone(),
        engine.clone(),
        ConfirmationPolicy::default(),
    ));
    let detector = DocumentDetector::new(ai);
    let stream_hub = StreamHub::new();

    let ingestion = Arc::new(IngestionService::new(
        session_store.clone(),
        transactions,
        similarity,
        Arc::new(RawTextOnlyExtractor),
        invoker.clone(),
        engine.clone(),
        detector,
        stream_hub.clone(),
    ));
    let clarifications = Arc::new(ClarificationService::new(
        session_store.clone(),
        invoker,
        engine,
        config.reuse_simple_replies,
    ));

    let app_state = AppState {
        db_pool: pool,
        store: session_store,
        ingestion,
        clarifications,
        stream_hub: stream_hub.clone(),
    };

    // CORS configuration - allow any origin for development
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/api/documents", post(create_document_handler))
        .route("/api/documents/:id/initiate", post(initiate_handler))
        .route(
            "/api/documents/:id/confirm-initiation",
            post(confirm_initiation_handler),
        )
        .route("/api/sessions/:id", get(get_session_handler))
        .route(
            "/api/sessions/:id/records/:index/approve",
            post(approve_handler),
        )
        .route("/api/sessions/:id/records/:index/skip", post(skip_handler))
        .route("/api/sessions/:id/goto", post(goto_handler))
        .route("/api/sessions/:id/approve-all", post(approve_all_handler))
        .route("/api/sessions/:id/complete", post(complete_handler))
        .route("/api/sessions/:id/reject", post(reject_handler))
        .route(
            "/api/clarifications/:id/messages",
            post(send_message_handler),
        )
        .route(
            "/api/clarifications/:id/confirm",
            post(resolve_confirmation_handler),
        )
        .route("/health", get(health_handler))
        .merge(sse::router(SseState { stream_hub }))
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
