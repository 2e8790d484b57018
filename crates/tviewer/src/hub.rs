// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broadcast hub: fans topology snapshots out to websocket clients.
//!
//! Each client owns a small bounded queue of encoded frames. Fan-out never
//! waits: a client whose queue is full (or whose session is gone) is removed
//! from the registry, which drops the sender and lets the session close the
//! socket.
//!
//! # Ordering
//!
//! Every client remembers the last sequence number queued to it. Priming on
//! register and fan-out both run under the registry lock and skip anything
//! not newer, so a client sees a strictly increasing (possibly sparse) run of
//! snapshots. Resync requests go through the same check.

use crate::aggregator::SnapshotReceiver;
use crate::model::TopologySnapshot;
use crate::protocol::ServerMessage;
use crate::shutdown::Shutdown;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifier handed to each websocket session.
pub type ClientId = Uuid;

/// One encoded `topology` text frame, shared by every client.
pub type Frame = Arc<str>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("client limit reached ({0})")]
    TooManyClients(usize),

    #[error("hub is shutting down")]
    ShuttingDown,
}

/// Registration of one client: its id and the receiving end of its queue.
#[derive(Debug)]
pub struct ClientSubscription {
    pub id: ClientId,
    rx: mpsc::Receiver<Frame>,
}

impl ClientSubscription {
    /// Next frame, or `None` once the hub has dropped this client.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    /// Clients removed because their queue was full or closed.
    pub dropped: usize,
}

/// Hub statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct HubStats {
    pub clients: usize,
    pub frames_sent: u64,
    pub clients_dropped: u64,
    pub latest_seq: u64,
}

struct ClientHandle {
    tx: mpsc::Sender<Frame>,
    last_seq: u64,
}

#[derive(Default)]
struct Registry {
    clients: HashMap<ClientId, ClientHandle>,
    latest: Option<(u64, Frame)>,
    closed: bool,
}

pub struct BroadcastHub {
    registry: Mutex<Registry>,
    max_clients: usize,
    client_buffer: usize,
    frames_sent: AtomicU64,
    clients_dropped: AtomicU64,
}

impl BroadcastHub {
    pub fn new(max_clients: usize, client_buffer: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            max_clients,
            client_buffer: client_buffer.max(1),
            frames_sent: AtomicU64::new(0),
            clients_dropped: AtomicU64::new(0),
        }
    }

    /// Cheap pre-check used before accepting a websocket upgrade.
    pub fn has_capacity(&self) -> bool {
        let registry = self.registry.lock();
        !registry.closed && registry.clients.len() < self.max_clients
    }

    /// Add a client and queue the latest snapshot for it right away.
    pub fn register(&self) -> Result<ClientSubscription, HubError> {
        let mut registry = self.registry.lock();
        if registry.closed {
            return Err(HubError::ShuttingDown);
        }
        if registry.clients.len() >= self.max_clients {
            return Err(HubError::TooManyClients(self.max_clients));
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.client_buffer);
        let mut handle = ClientHandle { tx, last_seq: 0 };

        if let Some((seq, frame)) = &registry.latest {
            // Fresh queue: cannot be full.
            if handle.tx.try_send(Arc::clone(frame)).is_ok() {
                handle.last_seq = *seq;
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
        }

        registry.clients.insert(id, handle);
        debug!(
            "[{}] Client registered ({} connected)",
            short_id(&id),
            registry.clients.len()
        );
        Ok(ClientSubscription { id, rx })
    }

    /// Remove a client. Unknown ids are ignored.
    pub fn unregister(&self, id: &ClientId) -> bool {
        let removed = self.registry.lock().clients.remove(id).is_some();
        if removed {
            debug!("[{}] Client unregistered", short_id(id));
        }
        removed
    }

    /// Encode `snapshot` once and queue it to every client.
    pub fn broadcast(&self, snapshot: &Arc<TopologySnapshot>) -> FanOut {
        let seq = snapshot.seq;
        let frame: Frame = match ServerMessage::Topology(Arc::clone(snapshot)).to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                warn!("Failed to encode snapshot {}: {}", seq, e);
                return FanOut::default();
            }
        };

        let mut report = FanOut::default();
        let mut registry = self.registry.lock();
        if registry.closed {
            return report;
        }
        registry.latest = Some((seq, Arc::clone(&frame)));

        registry.clients.retain(|id, client| {
            if client.last_seq >= seq {
                return true;
            }
            match client.tx.try_send(Arc::clone(&frame)) {
                Ok(()) => {
                    client.last_seq = seq;
                    report.delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("[{}] Client too slow, dropping", short_id(id));
                    report.dropped += 1;
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("[{}] Client gone", short_id(id));
                    report.dropped += 1;
                    false
                }
            }
        });
        drop(registry);

        self.frames_sent
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.clients_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        report
    }

    /// Make sure one client has the latest snapshot queued.
    ///
    /// The frame goes through the client's own queue, behind anything still
    /// pending there, and only when it is newer than what the client already
    /// got. Returns `true` if a frame was queued.
    pub fn resync(&self, id: &ClientId) -> bool {
        let mut registry = self.registry.lock();
        let Some((seq, frame)) = registry.latest.clone() else {
            return false;
        };
        let Some(client) = registry.clients.get_mut(id) else {
            return false;
        };
        if client.last_seq >= seq {
            return false;
        }
        match client.tx.try_send(frame) {
            Ok(()) => {
                client.last_seq = seq;
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                debug!("[{}] Resync skipped, queue busy", short_id(id));
                false
            }
        }
    }

    pub fn latest_seq(&self) -> u64 {
        self.registry
            .lock()
            .latest
            .as_ref()
            .map_or(0, |(seq, _)| *seq)
    }

    pub fn client_count(&self) -> usize {
        self.registry.lock().clients.len()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.registry.lock().clients.contains_key(id)
    }

    pub fn stats(&self) -> HubStats {
        let registry = self.registry.lock();
        HubStats {
            clients: registry.clients.len(),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            clients_dropped: self.clients_dropped.load(Ordering::Relaxed),
            latest_seq: registry.latest.as_ref().map_or(0, |(seq, _)| *seq),
        }
    }

    /// Refuse new clients and drop every existing one.
    pub fn close(&self) {
        let mut registry = self.registry.lock();
        registry.closed = true;
        let count = registry.clients.len();
        registry.clients.clear();
        if count > 0 {
            info!("Disconnected {} websocket clients", count);
        }
    }

    /// Fan out every snapshot published by the aggregator until shutdown.
    pub async fn run(self: Arc<Self>, mut snapshots: SnapshotReceiver, mut shutdown: Shutdown) {
        info!("Broadcast hub started (max {} clients)", self.max_clients);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        debug!("Snapshot publisher gone");
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    let report = self.broadcast(&snapshot);
                    debug!(
                        "Snapshot {} sent to {} clients ({} dropped)",
                        snapshot.seq, report.delivered, report.dropped
                    );
                }
            }
        }
        self.close();
        info!("Broadcast hub stopped");
    }
}

fn short_id(id: &ClientId) -> String {
    id.to_string()[..8].to_string()
}
