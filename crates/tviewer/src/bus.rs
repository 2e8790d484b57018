// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry bus: bounded fan-in channel from every collector to the aggregator.
//!
//! A full bus blocks the sending collector instead of dropping records. Each
//! send races the shutdown signal so no collector stays parked on a send
//! after the aggregator has gone away.

use crate::model::TelemetryRecord;
use crate::shutdown::Shutdown;
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a record could not be delivered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("telemetry bus closed")]
    Closed,

    #[error("shutdown requested")]
    Shutdown,
}

/// Producer side, cloned into every collector loop.
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: mpsc::Sender<TelemetryRecord>,
}

/// Consumer side, owned by the aggregator.
#[derive(Debug)]
pub struct BusReceiver {
    rx: mpsc::Receiver<TelemetryRecord>,
}

/// Create a bus holding at most `capacity` in-flight records.
pub fn channel(capacity: usize) -> (BusSender, BusReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (BusSender { tx }, BusReceiver { rx })
}

impl BusSender {
    /// Send a record, waiting for room if the bus is full.
    pub async fn send(
        &self,
        record: TelemetryRecord,
        shutdown: &mut Shutdown,
    ) -> Result<(), BusError> {
        if shutdown.is_triggered() {
            return Err(BusError::Shutdown);
        }
        tokio::select! {
            biased;
            _ = shutdown.wait() => Err(BusError::Shutdown),
            res = self.tx.send(record) => res.map_err(|_| BusError::Closed),
        }
    }

    /// Free slots left right now.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

impl BusReceiver {
    /// Next record, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<TelemetryRecord> {
        self.rx.recv().await
    }

    /// Refuse further sends; records already queued can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
