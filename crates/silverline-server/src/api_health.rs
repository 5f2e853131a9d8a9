//! `GET /health`.

use crate::AppState;
use axum::extract::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct CollaboratorStatus {
    pub name: &'static str,
    /// `false` means calls are served by the degraded stand-in.
    pub live: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: bool,
    pub transcription: CollaboratorStatus,
    pub language_model: CollaboratorStatus,
    pub signature_validation: bool,
}

/// Reports version and which collaborators are live. Always 200: a degraded
/// collaborator still answers calls.
pub async fn health_handler(Extension(state): Extension<Arc<AppState>>) -> Json<HealthResponse> {
    let pool = state.pool.clone();
    let database = tokio::task::spawn_blocking(move || {
        pool.get()
            .ok()
            .and_then(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).ok())
            .is_some()
    })
    .await
    .unwrap_or(false);

    let services = state.orchestrator.services();
    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        transcription: CollaboratorStatus {
            name: services.transcription.engine_name(),
            live: services.transcription.is_available(),
        },
        language_model: CollaboratorStatus {
            name: services.answers.model_name(),
            live: services.answers.model_available(),
        },
        signature_validation: state.signature.is_some(),
    })
}
