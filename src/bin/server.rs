//! Dashsync Server
//!
//! A small layout server for development and multi-device testing. It keeps
//! one layout per user as a JSON file and rejects structurally broken layouts.
//!
//! # Configuration
//!
//! Environment variables:
//! - `DASHSYNC_PORT`: Port to listen on (default: 8080)
//! - `DASHSYNC_DATA_DIR`: Directory to store layouts (default: ~/.local/share/dashsync-server)
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint
//! - `GET /layouts/{user_id}`: The user's layout, 404 if none
//! - `PUT /layouts/{user_id}`: Replace the user's layout, 204 on success

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use dash_sync_core::{FileStore, KeyValueStore, Layout, LayoutValidator, StorageError};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ============================================================================
// Configuration
// ============================================================================

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Directory to store layouts
    data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("DASHSYNC_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let data_dir = std::env::var("DASHSYNC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("dashsync-server")
            });

        Self { port, data_dir }
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    store: Arc<dyn KeyValueStore>,
    validator: Arc<LayoutValidator>,
}

fn layout_key(user_id: &str) -> String {
    format!("layout_{}", user_id)
}

/// Handler error rendered as a plain-text body
enum ApiError {
    Storage(StorageError),
    Invalid(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Storage(e) => {
                tracing::error!("storage error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("storage unavailable: {}", e)).into_response()
            }
            ApiError::Invalid(message) => (StatusCode::UNPROCESSABLE_ENTITY, message).into_response(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Storage(e)
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_layout(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.store.get(&layout_key(&user_id))? {
        Some(json) => {
            let layout: Layout = serde_json::from_str(&json).map_err(StorageError::from)?;
            Ok(Json(layout).into_response())
        }
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

async fn put_layout(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(layout): Json<Layout>,
) -> Result<StatusCode, ApiError> {
    for widgets in [&layout.desktop, &layout.mobile] {
        let report = state.validator.validate_widgets(widgets);
        if !report.valid {
            tracing::warn!(user_id = %user_id, issues = %report.summary(), "rejected layout");
            return Err(ApiError::Invalid(format!("invalid layout: {}", report.summary())));
        }
    }

    let json = serde_json::to_string(&layout).map_err(StorageError::from)?;
    state.store.set(&layout_key(&user_id), &json)?;
    tracing::info!(user_id = %user_id, version = layout.version, "stored layout");
    Ok(StatusCode::NO_CONTENT)
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/layouts/{user_id}", get(get_layout).put(put_layout))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dashsync_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    // Ensure data directory exists
    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        tracing::error!("Failed to create data directory: {}", e);
        std::process::exit(1);
    }
    tracing::info!("Data directory: {}", config.data_dir.display());

    let state = AppState {
        store: Arc::new(FileStore::new(config.data_dir)),
        validator: Arc::new(LayoutValidator::builtin()),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app(state)).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
