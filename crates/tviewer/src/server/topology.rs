// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topology websocket endpoint.
//!
//! Each upgraded socket registers with the hub and gets a session that:
//! - forwards queued topology frames to the browser
//! - answers pings and resync requests
//! - closes the socket once the hub drops the client

use super::AppState;
use crate::hub::{BroadcastHub, ClientSubscription};
use crate::protocol::{ClientMessage, ErrorCode, ServerMessage};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

type SessionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws/topology", get(ws_handler))
}

/// WebSocket upgrade handler
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !state.pipeline().hub().has_capacity() {
        warn!("Connection rejected: max clients reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, state))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let hub = Arc::clone(state.pipeline().hub());
    // Capacity may have run out between the check and the upgrade.
    let subscription = match hub.register() {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("Connection dropped after upgrade: {}", e);
            return;
        }
    };

    if let Err(e) = ClientSession::new(hub, subscription).run(socket).await {
        debug!("Session error: {}", e);
    }
}

/// One browser connected to the topology stream.
pub struct ClientSession {
    hub: Arc<BroadcastHub>,
    subscription: ClientSubscription,
    /// Session ID for logging
    session_id: String,
}

impl ClientSession {
    pub fn new(hub: Arc<BroadcastHub>, subscription: ClientSubscription) -> Self {
        let session_id = subscription.id.to_string()[..8].to_string();
        info!("[{}] Client connected ({} total)", session_id, hub.client_count());
        Self {
            hub,
            subscription,
            session_id,
        }
    }

    /// Run the session until either side goes away. The client is always
    /// unregistered on return.
    pub async fn run(mut self, socket: WebSocket) -> SessionResult {
        let (mut ws_tx, mut ws_rx) = socket.split();
        let result = self.pump(&mut ws_tx, &mut ws_rx).await;

        self.hub.unregister(&self.subscription.id);
        info!("[{}] Session ended", self.session_id);
        result
    }

    async fn pump(
        &mut self,
        ws_tx: &mut SplitSink<WebSocket, Message>,
        ws_rx: &mut SplitStream<WebSocket>,
    ) -> SessionResult {
        let welcome = ServerMessage::welcome(self.subscription.id.to_string()).to_json()?;
        ws_tx.send(Message::Text(welcome)).await?;

        loop {
            tokio::select! {
                frame = self.subscription.recv() => {
                    let Some(frame) = frame else {
                        // Dropped by the hub: too slow, or shutting down.
                        debug!("[{}] Outbound queue closed", self.session_id);
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(());
                    };
                    ws_tx.send(Message::Text(frame.to_string())).await?;
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = self.handle_message(&text)? {
                                ws_tx.send(Message::Text(reply)).await?;
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            let error = ServerMessage::error(
                                ErrorCode::UnsupportedFrame,
                                "Binary messages not supported",
                            );
                            ws_tx.send(Message::Text(error.to_json()?)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("[{}] Client closed connection", self.session_id);
                            return Ok(());
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            // Axum handles pong automatically
                        }
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    /// Reply to one client text frame, if a reply is due.
    fn handle_message(&self, text: &str) -> Result<Option<String>, serde_json::Error> {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                let error =
                    ServerMessage::error(ErrorCode::InvalidMessage, format!("Invalid JSON: {}", e));
                return error.to_json().map(Some);
            }
        };

        debug!("[{}] Received: {:?}", self.session_id, msg);

        match msg {
            ClientMessage::Ping { id } => ServerMessage::Pong { id }.to_json().map(Some),
            ClientMessage::Resync => {
                // Queued, never written directly: keeps the outbound order.
                if !self.hub.resync(&self.subscription.id) {
                    debug!("[{}] Already up to date", self.session_id);
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::{BroadcastHub, ClientSession};
    use crate::model::TopologySnapshot;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::sync::Arc;

    fn snapshot(seq: u64) -> Arc<TopologySnapshot> {
        Arc::new(TopologySnapshot {
            seq,
            generated_at: chrono::Utc::now(),
            nodes: vec![],
            edges: vec![],
        })
    }

    fn upgrade_request() -> Request<Body> {
        Request::builder()
            .uri("/ws/topology")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn test_upgrade_rejected_when_full() {
        let app = app(vec![]);
        let hub = app.state.pipeline().hub();
        let _a = hub.register().expect("first");
        let _b = hub.register().expect("second");

        let (status, body) = call(&app.router, upgrade_request()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "Too many connections");
        assert_eq!(hub.client_count(), 2);
    }

    #[tokio::test]
    async fn test_plain_get_is_not_upgraded() {
        let app = app(vec![]);
        let (status, _) = call(&app.router, get("/ws/topology")).await;
        assert!(status.is_client_error());
        assert_eq!(app.state.pipeline().hub().client_count(), 0);
    }

    #[test]
    fn test_session_replies() {
        let hub = Arc::new(BroadcastHub::new(4, 4));
        let subscription = hub.register().expect("register");
        let session = ClientSession::new(Arc::clone(&hub), subscription);

        let reply = session.handle_message(r#"{"type":"ping","id":3}"#).unwrap();
        assert_eq!(reply.as_deref(), Some(r#"{"type":"pong","id":3}"#));

        // Nothing published yet: resync has nothing to send.
        assert!(session.handle_message(r#"{"type":"resync"}"#).unwrap().is_none());

        let reply = session.handle_message("not json").unwrap().unwrap();
        assert!(reply.contains("INVALID_MESSAGE"));
    }

    #[tokio::test]
    async fn test_resync_never_goes_backwards() {
        let hub = Arc::new(BroadcastHub::new(4, 8));
        let subscription = hub.register().expect("register");
        let mut session = ClientSession::new(Arc::clone(&hub), subscription);

        hub.broadcast(&snapshot(6));
        hub.broadcast(&snapshot(7));

        // Anything a resync produces must come out of the same queue.
        assert!(session.handle_message(r#"{"type":"resync"}"#).unwrap().is_none());

        hub.unregister(&session.subscription.id);
        let mut written = Vec::new();
        while let Some(frame) = session.subscription.recv().await {
            let value: serde_json::Value = serde_json::from_str(&frame).expect("json");
            written.push(value["seq"].as_u64().expect("seq"));
        }
        assert_eq!(written, vec![6, 7]);
    }
}
