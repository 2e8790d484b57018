// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP and WebSocket front end.
//!
//! Each area exposes its own `routes()`; [`build_router`] merges them, adds
//! the static file fallback and the CORS/trace layers.

mod devices;
mod health;
mod home;
mod topology;

pub use topology::ClientSession;

use crate::orchestrator::{Pipeline, RegisterError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared application state
pub struct AppState {
    pipeline: Arc<Pipeline>,
    max_clients: usize,
    started_at: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, max_clients: usize) -> Self {
        Self {
            pipeline,
            max_clients,
            started_at: Instant::now(),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

/// Build the full application router. `public_dir` backs the static fallback.
pub fn build_router(state: Arc<AppState>, public_dir: &Path) -> Router {
    Router::new()
        .merge(home::routes())
        .merge(topology::routes())
        .merge(devices::routes())
        .merge(health::routes())
        .fallback_service(ServeDir::new(public_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: status.as_u16(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<RegisterError> for ApiError {
    fn from(err: RegisterError) -> Self {
        let status = match err {
            RegisterError::Invalid(_) => StatusCode::BAD_REQUEST,
            RegisterError::Duplicate(_) => StatusCode::CONFLICT,
            RegisterError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, err.to_string())
    }
}
