// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! tviewer: streaming telemetry collector and live IS-IS topology viewer.
//!
//! Collects interface counters and IS-IS neighbor state from a fleet of
//! network devices and pushes a live topology graph to browsers.
//!
//! # Pipeline
//!
//! - **Collectors**: three tasks per device (interfaces, IS-IS, watchdog)
//! - **Bus**: bounded fan-in channel, full means the producer waits
//! - **Aggregator**: single owner of the topology state, publishes snapshots
//! - **Hub**: fans each snapshot out to websocket clients without waiting
//!
//! # Quick Start
//!
//! ```bash
//! # devices.json: [{"name": "R1", "ip": "10.0.0.1", "port": 57400, ...}]
//! tviewer --inventory devices.json --port 8080
//!
//! # Using config file
//! tviewer --config tviewer.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! [server]
//! port = 8080
//! max_clients = 100
//!
//! [telemetry]
//! sample_interval_ms = 2000
//! stale_after_intervals = 3
//!
//! [paths]
//! base_path = "/var/lib/tviewer"
//! inventory = "devices.json"
//! ```

pub mod aggregator;
pub mod bus;
pub mod collector;
pub mod config;
pub mod hub;
pub mod inventory;
pub mod model;
pub mod orchestrator;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod source;

pub use aggregator::{SnapshotReceiver, TopologyAggregator, TopologyState};
pub use config::{AppConfig, ConfigError};
pub use hub::{BroadcastHub, HubError};
pub use inventory::{CertStore, InventoryError, InventoryStore, JsonFileInventory, StaticInventory};
pub use model::{Device, TelemetryRecord, TopologySnapshot};
pub use orchestrator::{Pipeline, RegisterError, StartupError};
pub use source::{ChannelSource, JsonLinesSource, SourceError, TelemetrySource};
