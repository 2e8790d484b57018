// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::AppState;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_handler))
}

/// Health check endpoint
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pipeline = state.pipeline();
    let hub = pipeline.hub().stats();

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "devices": pipeline.device_count(),
        "clients": hub.clients,
        "max_clients": state.max_clients,
        "latest_seq": hub.latest_seq,
        "frames_sent": hub.frames_sent,
        "clients_dropped": hub.clients_dropped,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
