//! HTTP API for the tripwire daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Status (rule counts, session orders, dry-run flag)
//! - Tracked copy-trade positions

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use tripwire_exec::{EngineStatus, SignalEngine, TrackedPosition};

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState {
    pub engine: Arc<SignalEngine>,
    pub profile: String,
    pub started_at: DateTime<Utc>,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub profile: String,
    pub pid: u32,
    pub version: String,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub engine: EngineStatus,
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/positions", get(positions_handler))
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn status_handler(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        profile: state.profile.clone(),
        pid: std::process::id(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: state.started_at,
        engine: state.engine.status().await,
    })
}

async fn positions_handler(State(state): State<Arc<ApiState>>) -> Json<Vec<TrackedPosition>> {
    Json(state.engine.tracked_positions().await)
}
