// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device list and runtime registration.

use super::{ApiError, AppState};
use crate::model::{Device, DeviceSummary};
use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tracing::info;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/devices", get(list_devices).post(add_device))
}

/// GET /api/devices
async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceSummary>> {
    Json(state.pipeline().devices())
}

/// POST /api/devices
///
/// Starts collecting from the device right away. The inventory file is not
/// rewritten.
async fn add_device(
    State(state): State<Arc<AppState>>,
    Json(device): Json<Device>,
) -> Result<(StatusCode, Json<DeviceSummary>), ApiError> {
    let summary = state.pipeline().add_device(device)?;
    info!("Device '{}' registered at runtime", summary.name);
    Ok((StatusCode::CREATED, Json(summary)))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::model::Device;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};

    fn post(json: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/devices")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn test_list_hides_credentials() {
        let mut r1 = Device::new("R1", "10.0.0.1", 57400);
        r1.username = "admin".into();
        r1.password = "hunter2".into();
        let app = app(vec![r1]);

        let (status, body) = call(&app.router, get("/api/devices")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"R1\""));
        assert!(!body.contains("hunter2"));
        assert!(!body.contains("admin"));
    }

    #[tokio::test]
    async fn test_register_device() {
        let app = app(vec![Device::new("R1", "10.0.0.1", 57400)]);

        let (status, body) = call(
            &app.router,
            post(r#"{"name": "R2", "ip": "10.0.0.2", "port": 57400, "password": "x"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body.contains("\"R2\""));
        assert_eq!(app.state.pipeline().device_count(), 2);

        let (status, body) = call(
            &app.router,
            post(r#"{"name": "R1", "ip": "10.0.0.9", "port": 57400}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.contains("already exists"));

        let (status, _) = call(
            &app.router,
            post(r#"{"name": "R3", "ip": "10.0.0.3", "port": 0}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
