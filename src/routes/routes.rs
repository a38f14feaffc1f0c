//! Route table for the analysis pipeline and its collaborators.
//!
//! ## Structure
//! - **Analysis endpoints**
//!   - `POST /ingredients/analyze`      — upload + compress + infer
//!   - `POST /ingredients/commit`       — persist a reviewed analysis
//!   - `POST /ingredients/decline`      — discard an analysis
//!   - `GET  /ingredients/history`      — keyset-paginated committed records
//!   - `GET  /ingredients/analysis/{id}` — full record fetch
//!
//! - **Object storage endpoints**
//!   - `POST /storage/upload`           — store a file in the temp namespace
//!   - `GET  /storage/retrieve/{key}`   — stream an object (uploads, then temp)
//!   - `GET  /storage/exists/{key}`     — namespace probe
//!   - `POST /storage/commit`           — promote temp → permanent
//!   - `POST /storage/decline`          — drop a temp object
//!
//! Uploads are capped at 10 MiB via the body limit layer.

use crate::{
    handlers::{
        analysis_handlers::{analyze, commit, decline, get_analysis, history},
        health_handlers::{healthz, readyz},
        storage_handlers::{commit_object, decline_object, exists, retrieve, upload},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Build the router for all endpoints. The router carries shared state
/// (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // analysis pipeline
        .route("/ingredients/analyze", post(analyze))
        .route("/ingredients/commit", post(commit))
        .route("/ingredients/decline", post(decline))
        .route("/ingredients/history", get(history))
        .route("/ingredients/analysis/{id}", get(get_analysis))
        // object storage
        .route("/storage/upload", post(upload))
        .route("/storage/retrieve/{key}", get(retrieve))
        .route("/storage/exists/{key}", get(exists))
        .route("/storage/commit", post(commit_object))
        .route("/storage/decline", post(decline_object))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
