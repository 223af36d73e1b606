//! HTTP API handlers for the published map data.
//!
//! The server only ever reads: the snapshot file the pipeline replaced
//! atomically and the publication log. A request never observes a partly
//! written document.
//!
//! - **GET /latest**: the current snapshot as `application/geo+json`
//! - **GET /health**: liveness plus the most recent publication record
//! - **GET /styles**: display styles per zone label, including the fallback
//! - **GET /styles/:label**: style for one label, unknown labels included

use std::path::PathBuf;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::storage::{PublicationLog, PublicationRecord};
use crate::style::{StyleTable, ZoneStyle, style_for_label};

/// Media type of the published snapshot.
pub const GEOJSON_CONTENT_TYPE: &str = "application/geo+json";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub latest_path: PathBuf,
    pub log: PublicationLog,
}

/// Build the router with every route and request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/latest", get(get_latest))
        .route("/health", get(health_check))
        .route("/styles", get(get_styles))
        .route("/styles/:label", get(get_style))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// GET /latest - The published snapshot, byte for byte.
///
/// Returns `404 Not Found` until the first publication.
#[instrument(skip(state))]
pub async fn get_latest(State(state): State<AppState>) -> Response {
    match tokio::fs::read(&state.latest_path).await {
        Ok(bytes) => {
            info!(bytes = bytes.len(), "Snapshot served");
            ([(header::CONTENT_TYPE, GEOJSON_CONTENT_TYPE)], bytes).into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "nothing has been published yet" })),
        )
            .into_response(),
        Err(e) => {
            warn!(path = %state.latest_path.display(), error = %e, "Failed to read snapshot");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub latest: Option<PublicationRecord>,
}

/// GET /health - Liveness and the latest publication.
///
/// # Response
///
/// ```json
/// {
///     "status": "ok",
///     "latest": {
///         "id": 12,
///         "published_at": "2025-01-15T03:00:04Z",
///         "content_sha256": "9f2c...",
///         "byte_len": 48211,
///         "feature_count": 37,
///         "archive_path": "data/archive/buffer_zones_data_20250115T030004Z_9f2c01ab77de.geojson"
///     }
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    match state.log.latest().await {
        Ok(latest) => Ok(Json(HealthResponse {
            status: "ok",
            latest,
        })),
        Err(e) => {
            warn!(error = %e, "Failed to read publication log");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// GET /styles - Style table for the map viewer.
pub async fn get_styles() -> Json<StyleTable> {
    Json(StyleTable::default())
}

/// GET /styles/:label - Style for a single label.
///
/// Unknown labels get the grey fallback rather than an error.
pub async fn get_style(Path(label): Path<String>) -> Json<ZoneStyle> {
    Json(style_for_label(&label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::sqlite_url;

    async fn app(dir: &tempfile::TempDir) -> Router {
        let log = PublicationLog::new(&sqlite_url(&dir.path().join("log.db")))
            .await
            .unwrap();
        router(AppState {
            latest_path: dir.path().join("latest.geojson"),
            log,
        })
    }

    #[tokio::test]
    async fn test_latest_missing_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();

        let response = app(&dir)
            .await
            .oneshot(Request::get("/latest").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_latest_has_geojson_content_type() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("latest.geojson"), "{}\n").unwrap();

        let response = app(&dir)
            .await
            .oneshot(Request::get("/latest").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            GEOJSON_CONTENT_TYPE
        );
    }
}
