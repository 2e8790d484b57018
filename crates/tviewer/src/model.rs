// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Value types passed between pipeline stages.
//!
//! Everything here is immutable once built: devices are loaded once,
//! records are produced by exactly one collector and consumed once by the
//! aggregator, snapshots are shared behind an `Arc`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A managed network device, as stored in the inventory.
#[derive(Clone, Deserialize, Serialize)]
pub struct Device {
    pub name: String,
    /// Hostname or IP address of the telemetry endpoint.
    #[serde(alias = "ip")]
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Certificate staged for this device. Filled in at startup.
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
}

// Credentials stay out of logs.
impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("cert_path", &self.cert_path)
            .finish_non_exhaustive()
    }
}

impl Device {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            username: String::new(),
            password: String::new(),
            cert_path: None,
        }
    }

    /// `address:port` of the telemetry endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            name: self.name.clone(),
            address: self.address.clone(),
            port: self.port,
        }
    }
}

/// Device identity as exposed over HTTP (no credentials).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub name: String,
    pub address: String,
    pub port: u16,
}

/// Which sensor produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Interfaces,
    IsisNeighbors,
    /// Synthetic records from the staleness watchdog.
    Watchdog,
}

/// Interface counter sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStat {
    pub interface: String,
    #[serde(default)]
    pub oper_up: bool,
    #[serde(default)]
    pub counters: InterfaceCounters,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    #[serde(default)]
    pub bytes_in: u64,
    #[serde(default)]
    pub bytes_out: u64,
    #[serde(default)]
    pub packets_in: u64,
    #[serde(default)]
    pub packets_out: u64,
    #[serde(default)]
    pub errors_in: u64,
    #[serde(default)]
    pub errors_out: u64,
}

/// IS-IS adjacency state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjacencyState {
    Up,
    Init,
    Down,
    Failed,
}

/// IS-IS neighbor sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsisNeighbor {
    /// Neighbor system id (hostname when dynamic hostname resolution is on).
    pub neighbor: String,
    pub state: AdjacencyState,
    /// Local interface the adjacency was formed on.
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub level: Option<u8>,
}

/// Raised by the watchdog when a device stops producing telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDown {
    /// How long the device had been silent when the record was raised.
    pub silent_for: Duration,
}

/// One sample as delivered by a telemetry subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sample {
    Interface(InterfaceStat),
    IsisNeighbor(IsisNeighbor),
}

/// Kind-specific payload of a [`TelemetryRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryPayload {
    InterfaceStat(InterfaceStat),
    IsisNeighbor(IsisNeighbor),
    DeviceDown(DeviceDown),
}

/// One timestamped observation from a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub device: String,
    pub timestamp: DateTime<Utc>,
    pub payload: TelemetryPayload,
}

impl TelemetryRecord {
    pub fn from_sample(device: impl Into<String>, sample: Sample) -> Self {
        let payload = match sample {
            Sample::Interface(stat) => TelemetryPayload::InterfaceStat(stat),
            Sample::IsisNeighbor(neighbor) => TelemetryPayload::IsisNeighbor(neighbor),
        };
        Self {
            device: device.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn device_down(device: impl Into<String>, silent_for: Duration) -> Self {
        Self {
            device: device.into(),
            timestamp: Utc::now(),
            payload: TelemetryPayload::DeviceDown(DeviceDown { silent_for }),
        }
    }

    pub fn kind(&self) -> SensorKind {
        match self.payload {
            TelemetryPayload::InterfaceStat(_) => SensorKind::Interfaces,
            TelemetryPayload::IsisNeighbor(_) => SensorKind::IsisNeighbors,
            TelemetryPayload::DeviceDown(_) => SensorKind::Watchdog,
        }
    }
}

/// Node status in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Managed device currently reporting telemetry.
    Up,
    /// Seen only as somebody's IS-IS neighbor.
    Unmanaged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: String,
    pub status: NodeStatus,
    /// Interfaces reported by the device, sorted.
    pub interfaces: Vec<String>,
}

/// Undirected IS-IS adjacency in the Up state. `source < target` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    /// Highest IS-IS level reported for the adjacency.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    /// Local interfaces named by the reporting ends.
    pub interfaces: Vec<String>,
    /// Devices that reported this adjacency.
    pub reported_by: Vec<String>,
}

impl Edge {
    /// Whether this edge touches `device`.
    pub fn touches(&self, device: &str) -> bool {
        self.source == device || self.target == device
    }
}

/// Immutable point-in-time copy of the topology graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologySnapshot {
    /// Strictly increasing per aggregator.
    pub seq: u64,
    pub generated_at: DateTime<Utc>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl TopologySnapshot {
    /// The snapshot published before any telemetry has arrived.
    pub fn empty() -> Self {
        Self {
            seq: 0,
            generated_at: Utc::now(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, a: &str, b: &str) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| (e.source == a && e.target == b) || (e.source == b && e.target == a))
    }

    /// True when `device` appears neither as a node nor as an edge endpoint.
    pub fn is_absent(&self, device: &str) -> bool {
        self.node(device).is_none() && !self.edges.iter().any(|e| e.touches(device))
    }
}
