// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket protocol messages for the topology stream.
//!
//! JSON text frames, tagged by `type`. The browser mostly listens; the only
//! requests it can make are keepalive pings and a resync.

use crate::model::TopologySnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Client → Server messages
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keepalive
    Ping {
        #[serde(default)]
        id: Option<u64>,
    },

    /// Ask for the latest snapshot again
    Resync,
}

/// Server → Client messages
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once right after the upgrade
    Welcome { version: String, client_id: String },

    /// Full topology snapshot
    Topology(Arc<TopologySnapshot>),

    /// Pong response
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },

    /// Error occurred
    Error { code: ErrorCode, message: String },
}

/// Error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid message format
    InvalidMessage,
    /// Binary frames are not part of the protocol
    UnsupportedFrame,
}

impl ServerMessage {
    pub fn welcome(client_id: impl Into<String>) -> Self {
        Self::Welcome {
            version: env!("CARGO_PKG_VERSION").to_string(),
            client_id: client_id.into(),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Serialize to the text frame payload.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
