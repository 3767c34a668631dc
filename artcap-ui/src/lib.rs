//! artcap-ui library - Artifact Capture web service
//!
//! HTTP surface over the capture core: photo/metadata submission,
//! existence checks, record browsing and editing, image detach, CSV and
//! GeoJSON export, and static serving of the derived content files.

use artcap_common::config::ArtcapConfig;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;
pub mod session;

/// Uploads can carry full-resolution photos
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Resolved configuration including normalized object type schemas
    pub config: Arc<ArtcapConfig>,
    /// Per-session current-record pointers
    pub sessions: session::SessionStore,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Arc<ArtcapConfig>) -> Self {
        Self {
            db,
            config,
            sessions: session::SessionStore::new(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let upload_dir = state.config.upload_dir.clone();

    Router::new()
        .route("/health", get(api::health::health))
        .route("/api/submit", post(api::capture::submit))
        .route("/api/exists", post(api::capture::exists))
        .route("/api/records/:otype", get(api::records::list))
        .route(
            "/api/records/:otype/:id",
            get(api::records::get_one).post(api::records::edit),
        )
        .route("/api/records/:otype/:id/delete", post(api::records::delete))
        .route(
            "/api/records/:otype/:id/images/:idx/delete",
            post(api::records::delete_image),
        )
        .route("/api/export/csv/:otype", get(api::export::export_csv))
        .route("/api/export/geojson/:otype", get(api::export::export_geojson))
        .route("/api/import/csv/:otype", post(api::export::import_csv))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
