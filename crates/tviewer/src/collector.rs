// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-device telemetry collection.
//!
//! Every managed device gets three tasks:
//! - an interface counters subscription loop
//! - an IS-IS neighbor subscription loop
//! - a staleness watchdog
//!
//! Subscription failures are retried with exponential backoff and never
//! leave the device's own tasks. Sustained failure shows up downstream as a
//! single `DeviceDown` record from the watchdog.

use crate::bus::BusSender;
use crate::config::TelemetryConfig;
use crate::model::{Device, TelemetryRecord};
use crate::shutdown::Shutdown;
use crate::source::{SubscriptionRequest, TelemetrySource};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Timing policy for one collector.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub sample_interval: Duration,
    /// Silence after which the watchdog declares the device down.
    pub staleness_window: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl From<&TelemetryConfig> for CollectorSettings {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            sample_interval: config.sample_interval(),
            staleness_window: config.staleness_window(),
            backoff_initial: config.backoff_initial(),
            backoff_max: config.backoff_max(),
        }
    }
}

impl CollectorSettings {
    fn sample_interval_ms(&self) -> u64 {
        self.sample_interval.as_millis() as u64
    }
}

/// Last-seen bookkeeping shared by the loops of one device.
#[derive(Debug)]
pub struct Freshness {
    state: Mutex<FreshnessState>,
}

#[derive(Debug)]
struct FreshnessState {
    last_seen: Instant,
    down_reported: bool,
}

impl Freshness {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FreshnessState {
                last_seen: Instant::now(),
                down_reported: false,
            }),
        }
    }

    /// The device just produced a record. Re-arms the watchdog.
    pub fn touch(&self) {
        let mut state = self.state.lock();
        state.last_seen = Instant::now();
        state.down_reported = false;
    }

    pub fn silent_for(&self) -> Duration {
        self.state.lock().last_seen.elapsed()
    }

    /// Edge-triggered staleness check.
    ///
    /// Returns the silence duration the first time it exceeds `window`, then
    /// `None` until [`touch`](Self::touch) is called again. The silence is
    /// measured and the report flagged under one lock, so a concurrent touch
    /// either lands before (no report) or after (report re-armed).
    pub fn check(&self, window: Duration) -> Option<Duration> {
        let mut state = self.state.lock();
        let silent = state.last_seen.elapsed();
        if silent <= window || state.down_reported {
            return None;
        }
        state.down_reported = true;
        Some(silent)
    }

    /// Undo a [`check`](Self::check) whose record could not be delivered.
    fn rearm(&self) {
        self.state.lock().down_reported = false;
    }
}

impl Default for Freshness {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential retry delay.
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Collection tasks for one device.
pub struct DeviceCollector<S> {
    device: Arc<Device>,
    source: Arc<S>,
    bus: BusSender,
    settings: CollectorSettings,
    freshness: Arc<Freshness>,
}

impl<S: TelemetrySource> DeviceCollector<S> {
    /// The collector takes ownership of the device for its whole lifetime.
    pub fn new(
        device: Device,
        source: Arc<S>,
        bus: BusSender,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            device: Arc::new(device),
            source,
            bus,
            settings,
            freshness: Arc::new(Freshness::new()),
        }
    }

    /// Start the interface, IS-IS and watchdog tasks.
    pub fn spawn(self, shutdown: Shutdown) -> CollectorHandle {
        let interval_ms = self.settings.sample_interval_ms();
        let name = self.device.name.clone();
        let this = Arc::new(self);

        info!(device = %name, "Starting telemetry collection");

        let interfaces = SubscriptionRequest::interfaces(interval_ms);
        let isis = SubscriptionRequest::isis(interval_ms);
        let tasks = vec![
            tokio::spawn(Arc::clone(&this).run_subscription(interfaces, shutdown.clone())),
            tokio::spawn(Arc::clone(&this).run_subscription(isis, shutdown.clone())),
            tokio::spawn(this.run_watchdog(shutdown)),
        ];

        CollectorHandle { device: name, tasks }
    }

    async fn run_subscription(
        self: Arc<Self>,
        request: SubscriptionRequest,
        mut shutdown: Shutdown,
    ) {
        let name = self.device.name.as_str();
        let mut backoff = Backoff::new(self.settings.backoff_initial, self.settings.backoff_max);

        while !shutdown.is_triggered() {
            let subscribed = tokio::select! {
                _ = shutdown.wait() => break,
                res = self.source.subscribe(&self.device, &request) => res,
            };

            match subscribed {
                Ok(mut samples) => {
                    info!(
                        device = %name,
                        subscription = %request.subscription_id,
                        "Subscribed to {}",
                        request.sensor_group
                    );
                    loop {
                        let item = tokio::select! {
                            _ = shutdown.wait() => return,
                            item = samples.next() => item,
                        };
                        match item {
                            Some(Ok(sample)) => {
                                backoff.reset();
                                self.freshness.touch();
                                let record = TelemetryRecord::from_sample(name, sample);
                                if let Err(e) = self.bus.send(record, &mut shutdown).await {
                                    debug!(
                                        device = %name,
                                        "Stopping {}: {}",
                                        request.subscription_id,
                                        e
                                    );
                                    return;
                                }
                            }
                            Some(Err(e)) if e.is_recoverable() => {
                                warn!(device = %name, "Skipping sample: {}", e);
                            }
                            Some(Err(e)) => {
                                warn!(
                                    device = %name,
                                    subscription = %request.subscription_id,
                                    "Subscription failed: {}",
                                    e
                                );
                                break;
                            }
                            None => {
                                warn!(
                                    device = %name,
                                    subscription = %request.subscription_id,
                                    "Subscription ended"
                                );
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        device = %name,
                        subscription = %request.subscription_id,
                        "Subscribe failed: {}",
                        e
                    );
                }
            }

            let delay = backoff.next_delay();
            debug!(device = %name, "Retrying {} in {:?}", request.subscription_id, delay);
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(device = %name, "{} loop stopped", request.subscription_id);
    }

    async fn run_watchdog(self: Arc<Self>, mut shutdown: Shutdown) {
        let name = self.device.name.as_str();
        let window = self.settings.staleness_window;
        let mut ticker = tokio::time::interval(self.settings.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            let Some(silent) = self.freshness.check(window) else {
                continue;
            };
            warn!(device = %name, "No telemetry for {:?}, marking device down", silent);
            let record = TelemetryRecord::device_down(name, silent);
            if let Err(e) = self.bus.send(record, &mut shutdown).await {
                self.freshness.rearm();
                debug!(device = %name, "Watchdog stopping: {}", e);
                break;
            }
        }
    }
}

/// Join handles of one device's tasks.
#[derive(Debug)]
pub struct CollectorHandle {
    device: String,
    tasks: Vec<JoinHandle<()>>,
}

impl CollectorHandle {
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.is_finished())
    }

    /// Wait for every task to stop. Call after triggering shutdown.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(device = %self.device, "Collector task failed: {}", e);
            }
        }
    }
}
