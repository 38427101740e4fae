//! HTTP API for the DocVault service.
//!
//! This module provides the REST API endpoints for:
//! - Health and metrics monitoring
//! - Document upload, versions, listing and deletion
//! - Extracted text, reprocessing and download URLs
//! - Signed object retrieval
//! - Runtime settings

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::DocVaultService;
use crate::storage::UrlSigner;

pub mod documents;
pub mod objects;
pub mod settings;
use documents::{
    delete_document_handler, download_url_handler, extracted_text_handler, get_document_handler,
    list_documents_handler, list_versions_handler, reprocess_document_handler,
    upload_document_handler, upload_version_handler,
};
use objects::get_object_handler;
use settings::{get_settings_handler, update_settings_handler};

/// Room for multipart boundaries and the small text fields
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state
pub struct AppState {
    pub service: Arc<DocVaultService>,
    /// Verifies `/objects` requests against the URLs the store hands out
    pub signer: UrlSigner,
    pub metrics: PrometheusHandle,
    pub start_time: Instant,
}

/// Build the API router
pub fn router(service: Arc<DocVaultService>, signer: UrlSigner, metrics: PrometheusHandle) -> Router {
    // Body limit is fixed at startup; the service re-checks the live setting
    let max_body_size = (service
        .runtime_config
        .dynamic()
        .limits
        .max_document_size_bytes as usize)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let state = Arc::new(AppState {
        service,
        signer,
        metrics,
        start_time: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Document endpoints - with larger body limit for file uploads
        .route(
            "/documents",
            get(list_documents_handler)
                .post(upload_document_handler)
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route(
            "/documents/{id}",
            get(get_document_handler).delete(delete_document_handler),
        )
        .route("/documents/{id}/text", get(extracted_text_handler))
        .route(
            "/documents/{id}/versions",
            get(list_versions_handler)
                .post(upload_version_handler)
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/documents/{id}/reprocess", post(reprocess_document_handler))
        .route("/documents/{id}/download", get(download_url_handler))
        // Settings endpoints
        .route(
            "/settings",
            get(get_settings_handler).put(update_settings_handler),
        );

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/objects/{*path}", get(get_object_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    uptime_seconds: u64,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
