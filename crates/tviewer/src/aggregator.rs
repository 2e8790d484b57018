// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topology aggregation.
//!
//! The aggregator is the only consumer of the telemetry bus and the only
//! owner of [`TopologyState`]. Each record is folded into the state; every
//! change visible in the graph produces a fresh [`TopologySnapshot`] that is
//! published into a latest-value slot, so publishing never waits on the
//! broadcast side and a newer snapshot simply replaces an unread older one.

use crate::bus::BusReceiver;
use crate::model::{
    AdjacencyState, Edge, InterfaceStat, IsisNeighbor, Node, NodeStatus, TelemetryPayload,
    TelemetryRecord, TopologySnapshot,
};
use crate::shutdown::Shutdown;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Receiving end of the snapshot slot.
pub type SnapshotReceiver = watch::Receiver<Arc<TopologySnapshot>>;

#[derive(Debug, Clone)]
struct InterfaceEntry {
    stat: InterfaceStat,
    last_update: Instant,
}

#[derive(Debug, Clone)]
struct NeighborEntry {
    interface: Option<String>,
    level: Option<u8>,
    last_update: Instant,
}

#[derive(Debug, Clone)]
struct DeviceEntry {
    interfaces: BTreeMap<String, InterfaceEntry>,
    neighbors: BTreeMap<String, NeighborEntry>,
    last_update: Instant,
}

impl DeviceEntry {
    fn new(now: Instant) -> Self {
        Self {
            interfaces: BTreeMap::new(),
            neighbors: BTreeMap::new(),
            last_update: now,
        }
    }
}

/// Working set of the aggregator: what every device last reported.
///
/// IS-IS adjacencies are undirected. Reports from both ends of a link fold
/// into one edge keyed by the ordered pair of device names.
#[derive(Debug, Default)]
pub struct TopologyState {
    devices: BTreeMap<String, DeviceEntry>,
}

impl TopologyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the state. Returns `true` when the graph changed.
    pub fn apply(&mut self, record: &TelemetryRecord, now: Instant) -> bool {
        match &record.payload {
            TelemetryPayload::InterfaceStat(stat) => self.upsert_interface(&record.device, stat, now),
            TelemetryPayload::IsisNeighbor(neighbor) => {
                self.upsert_neighbor(&record.device, neighbor, now)
            }
            TelemetryPayload::DeviceDown(_) => {
                self.remove_device(&record.device);
                true
            }
        }
    }

    fn device_entry(&mut self, device: &str, now: Instant) -> (&mut DeviceEntry, bool) {
        let is_new = !self.devices.contains_key(device);
        let entry = self
            .devices
            .entry(device.to_string())
            .or_insert_with(|| DeviceEntry::new(now));
        entry.last_update = now;
        (entry, is_new)
    }

    fn upsert_interface(&mut self, device: &str, stat: &InterfaceStat, now: Instant) -> bool {
        let (entry, new_device) = self.device_entry(device, now);
        let previous = entry.interfaces.insert(
            stat.interface.clone(),
            InterfaceEntry {
                stat: stat.clone(),
                last_update: now,
            },
        );
        new_device || previous.is_none()
    }

    fn upsert_neighbor(&mut self, device: &str, neighbor: &IsisNeighbor, now: Instant) -> bool {
        let (entry, new_device) = self.device_entry(device, now);
        if neighbor.neighbor == device {
            return new_device;
        }

        if neighbor.state != AdjacencyState::Up {
            let removed = entry.neighbors.remove(&neighbor.neighbor).is_some();
            return new_device || removed;
        }

        let previous = entry.neighbors.insert(
            neighbor.neighbor.clone(),
            NeighborEntry {
                interface: neighbor.interface.clone(),
                level: neighbor.level,
                last_update: now,
            },
        );
        let changed = match previous {
            None => true,
            Some(prev) => prev.interface != neighbor.interface || prev.level != neighbor.level,
        };
        new_device || changed
    }

    /// Drop a device together with every adjacency pointing at it.
    pub fn remove_device(&mut self, device: &str) -> bool {
        let mut changed = self.devices.remove(device).is_some();
        for entry in self.devices.values_mut() {
            changed |= entry.neighbors.remove(device).is_some();
        }
        changed
    }

    /// Evict every entry older than `window`. Returns `true` if anything went.
    pub fn evict_stale(&mut self, window: Duration, now: Instant) -> bool {
        let fresh = |t: Instant| now.saturating_duration_since(t) <= window;
        let mut changed = false;

        let before = self.devices.len();
        self.devices.retain(|_, entry| fresh(entry.last_update));
        changed |= self.devices.len() != before;

        for entry in self.devices.values_mut() {
            let before = entry.interfaces.len() + entry.neighbors.len();
            entry.interfaces.retain(|_, e| fresh(e.last_update));
            entry.neighbors.retain(|_, e| fresh(e.last_update));
            changed |= entry.interfaces.len() + entry.neighbors.len() != before;
        }
        changed
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn contains_device(&self, device: &str) -> bool {
        self.devices.contains_key(device)
    }

    /// Last interface sample seen for `device`/`interface`.
    pub fn interface(&self, device: &str, interface: &str) -> Option<&InterfaceStat> {
        self.devices
            .get(device)?
            .interfaces
            .get(interface)
            .map(|e| &e.stat)
    }

    /// Build an immutable copy of the current graph.
    pub fn snapshot(&self, seq: u64) -> TopologySnapshot {
        let mut nodes: Vec<Node> = self
            .devices
            .iter()
            .map(|(name, entry)| Node {
                id: name.clone(),
                status: NodeStatus::Up,
                interfaces: entry.interfaces.keys().cloned().collect(),
            })
            .collect();

        let mut unmanaged = BTreeSet::new();
        let mut edges: BTreeMap<(&str, &str), Edge> = BTreeMap::new();
        for (name, entry) in &self.devices {
            for (peer, neighbor) in &entry.neighbors {
                if !self.devices.contains_key(peer) {
                    unmanaged.insert(peer.as_str());
                }
                let key = if name.as_str() < peer.as_str() {
                    (name.as_str(), peer.as_str())
                } else {
                    (peer.as_str(), name.as_str())
                };
                let edge = edges.entry(key).or_insert_with(|| Edge {
                    source: key.0.to_string(),
                    target: key.1.to_string(),
                    level: None,
                    interfaces: Vec::new(),
                    reported_by: Vec::new(),
                });
                edge.level = edge.level.max(neighbor.level);
                if let Some(ref ifname) = neighbor.interface {
                    edge.interfaces.push(format!("{}:{}", name, ifname));
                }
                edge.reported_by.push(name.clone());
            }
        }

        nodes.extend(unmanaged.into_iter().map(|id| Node {
            id: id.to_string(),
            status: NodeStatus::Unmanaged,
            interfaces: Vec::new(),
        }));
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        TopologySnapshot {
            seq,
            generated_at: Utc::now(),
            nodes,
            edges: edges.into_values().collect(),
        }
    }
}

/// Sole consumer of the telemetry bus.
pub struct TopologyAggregator {
    state: TopologyState,
    bus: BusReceiver,
    publisher: watch::Sender<Arc<TopologySnapshot>>,
    seq: u64,
    staleness_window: Duration,
    sweep_interval: Duration,
}

impl TopologyAggregator {
    /// Create the aggregator and the receiver side of its snapshot slot.
    pub fn new(
        bus: BusReceiver,
        staleness_window: Duration,
        sweep_interval: Duration,
    ) -> (Self, SnapshotReceiver) {
        let (publisher, receiver) = watch::channel(Arc::new(TopologySnapshot::empty()));
        let aggregator = Self {
            state: TopologyState::new(),
            bus,
            publisher,
            seq: 0,
            staleness_window,
            sweep_interval,
        };
        (aggregator, receiver)
    }

    /// Consume the bus until shutdown or until every collector is gone.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Topology aggregator started (staleness window {:?})",
            self.staleness_window
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                record = self.bus.recv() => {
                    let Some(record) = record else {
                        debug!("Telemetry bus closed");
                        break;
                    };
                    if self.state.apply(&record, Instant::now()) {
                        debug!("{:?} from {} changed the topology", record.kind(), record.device);
                        self.publish();
                    }
                }
                _ = sweep.tick() => {
                    if self.state.evict_stale(self.staleness_window, Instant::now()) {
                        debug!("Evicted stale topology entries");
                        self.publish();
                    }
                }
            }
        }

        // Wake any collector still waiting for room.
        self.bus.close();
        info!("Topology aggregator stopped after {} snapshots", self.seq);
    }

    fn publish(&mut self) {
        self.seq += 1;
        let snapshot = Arc::new(self.state.snapshot(self.seq));
        self.publisher.send_replace(snapshot);
    }
}
