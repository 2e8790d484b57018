// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Startup and teardown of the telemetry pipeline.
//!
//! Everything shared is built here and handed out explicitly:
//!
//! ```text
//! DeviceCollector (x N) -> bus -> TopologyAggregator -> snapshot slot -> BroadcastHub
//! ```

use crate::aggregator::{SnapshotReceiver, TopologyAggregator};
use crate::bus::{self, BusSender};
use crate::collector::{CollectorHandle, CollectorSettings, DeviceCollector};
use crate::config::{AppConfig, ConfigError};
use crate::hub::BroadcastHub;
use crate::inventory::{validate_device, CertStore, InventoryError, InventoryStore};
use crate::model::{Device, DeviceSummary};
use crate::shutdown::{self, Shutdown, ShutdownTrigger};
use crate::source::TelemetrySource;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Anything that stops the process before it starts serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("cannot create certificate directory {path}: {source}")]
    CertDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a device could not be added at runtime.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(transparent)]
    Invalid(#[from] InventoryError),

    #[error("device '{0}' already exists")]
    Duplicate(String),

    #[error("shutting down")]
    ShuttingDown,
}

type Spawner = Box<dyn Fn(Device, Shutdown) -> CollectorHandle + Send + Sync>;

struct RunningDevice {
    device: Device,
    handle: CollectorHandle,
}

/// The running pipeline: collectors, aggregator and hub.
pub struct Pipeline {
    collectors: DashMap<String, RunningDevice>,
    spawner: Spawner,
    certs: CertStore,
    hub: Arc<BroadcastHub>,
    snapshots: SnapshotReceiver,
    trigger: ShutdownTrigger,
    shutdown: Shutdown,
    core_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Load the inventory and start every task. Must run inside a tokio runtime.
    pub fn start<S: TelemetrySource>(
        config: &AppConfig,
        inventory: &dyn InventoryStore,
        source: Arc<S>,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let cert_dir = config.paths.cert_dir();
        let certs = CertStore::open(&cert_dir).map_err(|source| StartupError::CertDir {
            path: cert_dir.clone(),
            source,
        })?;
        let devices = inventory.load_devices()?;

        let (trigger, shutdown) = shutdown::channel();
        let (bus_tx, bus_rx) = bus::channel(config.telemetry.bus_capacity);

        let (aggregator, snapshots) = TopologyAggregator::new(
            bus_rx,
            config.telemetry.staleness_window(),
            config.telemetry.sweep_interval(),
        );
        let hub = Arc::new(BroadcastHub::new(
            config.server.max_clients,
            config.server.client_buffer,
        ));

        let core_tasks = vec![
            tokio::spawn(aggregator.run(shutdown.clone())),
            tokio::spawn(Arc::clone(&hub).run(snapshots.clone(), shutdown.clone())),
        ];

        let settings = CollectorSettings::from(&config.telemetry);
        let pipeline = Self {
            collectors: DashMap::new(),
            spawner: make_spawner(source, bus_tx, settings),
            certs,
            hub,
            snapshots,
            trigger,
            shutdown,
            core_tasks: Mutex::new(core_tasks),
        };

        for device in devices {
            pipeline.add_device(device).map_err(|e| match e {
                RegisterError::Invalid(e) => StartupError::Inventory(e),
                other => StartupError::Inventory(InventoryError::Invalid(other.to_string())),
            })?;
        }

        info!(
            "Telemetry pipeline started with {} devices",
            pipeline.device_count()
        );
        Ok(pipeline)
    }

    /// Validate a device, stage its certificate path and start its collector.
    pub fn add_device(&self, mut device: Device) -> Result<DeviceSummary, RegisterError> {
        if self.shutdown.is_triggered() {
            return Err(RegisterError::ShuttingDown);
        }
        validate_device(&device)?;
        self.certs.assign(&mut device);

        match self.collectors.entry(device.name.clone()) {
            Entry::Occupied(_) => Err(RegisterError::Duplicate(device.name)),
            Entry::Vacant(slot) => {
                let summary = device.summary();
                let handle = (self.spawner)(device.clone(), self.shutdown.clone());
                slot.insert(RunningDevice { device, handle });
                Ok(summary)
            }
        }
    }

    /// Managed devices, sorted by name, without credentials.
    pub fn devices(&self) -> Vec<DeviceSummary> {
        let mut devices: Vec<_> = self
            .collectors
            .iter()
            .map(|entry| entry.value().device.summary())
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    pub fn device_count(&self) -> usize {
        self.collectors.len()
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// A fresh receiver on the aggregator's snapshot slot.
    pub fn snapshots(&self) -> SnapshotReceiver {
        self.snapshots.clone()
    }

    /// Listener for the pipeline-wide shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Ask every task to stop. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown.is_triggered() {
            info!("Shutting down telemetry pipeline");
        }
        self.trigger.trigger();
    }

    /// Trigger shutdown and wait for every task to finish.
    ///
    /// Works through a shared reference, so sessions still holding the
    /// pipeline do not keep it from being joined. Collectors are removed
    /// from the device list as they are joined.
    pub async fn join(&self) {
        self.shutdown();

        let names: Vec<String> = self
            .collectors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for name in names {
            if let Some((_, running)) = self.collectors.remove(&name) {
                running.handle.join().await;
            }
        }
        let core_tasks = std::mem::take(&mut *self.core_tasks.lock());
        for task in core_tasks {
            if let Err(e) = task.await {
                warn!("Pipeline task failed: {}", e);
            }
        }
        info!("Telemetry pipeline stopped");
    }
}

fn make_spawner<S: TelemetrySource>(
    source: Arc<S>,
    bus: BusSender,
    settings: CollectorSettings,
) -> Spawner {
    Box::new(move |device, shutdown| {
        DeviceCollector::new(device, Arc::clone(&source), bus.clone(), settings.clone())
            .spawn(shutdown)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{JsonFileInventory, StaticInventory};
    use crate::source::ChannelSource;

    fn config(base: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.paths.base_path = base.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_start_and_register() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inventory = StaticInventory::new(vec![
            Device::new("R2", "10.0.0.2", 57400),
            Device::new("R1", "10.0.0.1", 57400),
        ]);
        let pipeline = Pipeline::start(
            &config(dir.path()),
            &inventory,
            Arc::new(ChannelSource::new()),
        )
        .expect("start");

        assert!(dir.path().join("certs").is_dir());
        let names: Vec<_> = pipeline.devices().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["R1", "R2"]);

        let added = pipeline
            .add_device(Device::new("R3", "10.0.0.3", 57400))
            .expect("add");
        assert_eq!(added.name, "R3");
        assert!(matches!(
            pipeline.add_device(Device::new("R3", "10.0.0.9", 57400)),
            Err(RegisterError::Duplicate(_))
        ));
        assert!(matches!(
            pipeline.add_device(Device::new("", "10.0.0.9", 57400)),
            Err(RegisterError::Invalid(_))
        ));
        assert_eq!(pipeline.device_count(), 3);

        pipeline.join().await;
    }

    #[tokio::test]
    async fn test_missing_inventory_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inventory = JsonFileInventory::new(dir.path().join("missing.json"));
        let result = Pipeline::start(
            &config(dir.path()),
            &inventory,
            Arc::new(ChannelSource::new()),
        );
        assert!(matches!(result, Err(StartupError::Inventory(_))));
    }

    #[tokio::test]
    async fn test_join_stops_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inventory = StaticInventory::new(vec![Device::new("R1", "10.0.0.1", 57400)]);
        let pipeline = Pipeline::start(
            &config(dir.path()),
            &inventory,
            Arc::new(ChannelSource::new()),
        )
        .expect("start");

        let hub = Arc::clone(pipeline.hub());
        let mut client = hub.register().expect("register");
        let signal = pipeline.shutdown_signal();

        tokio::time::timeout(std::time::Duration::from_secs(5), pipeline.join())
            .await
            .expect("joined");
        assert!(signal.is_triggered());
        assert!(client.recv().await.is_none());
        assert!(matches!(hub.register(), Err(crate::hub::HubError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_join_while_shared() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inventory = StaticInventory::new(vec![
            Device::new("R1", "10.0.0.1", 57400),
            Device::new("R2", "10.0.0.2", 57400),
        ]);
        let pipeline = Arc::new(
            Pipeline::start(
                &config(dir.path()),
                &inventory,
                Arc::new(ChannelSource::new()),
            )
            .expect("start"),
        );
        // Another owner, like a websocket session still closing.
        let session_owner = Arc::clone(&pipeline);

        tokio::time::timeout(std::time::Duration::from_secs(5), pipeline.join())
            .await
            .expect("joined");
        assert_eq!(pipeline.device_count(), 0);
        assert!(matches!(
            session_owner.add_device(Device::new("R3", "10.0.0.3", 57400)),
            Err(RegisterError::ShuttingDown)
        ));

        // A second join has nothing left to wait for.
        session_owner.join().await;
    }
}
