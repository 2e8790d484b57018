// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end pipeline tests driven by an in-memory telemetry source.

use std::sync::Arc;
use std::time::Duration;
use tviewer::model::{
    AdjacencyState, InterfaceCounters, InterfaceStat, IsisNeighbor, NodeStatus, Sample,
    TopologySnapshot,
};
use tviewer::source::{INTERFACE_SENSOR_GROUP, ISIS_SENSOR_GROUP};
use tviewer::{AppConfig, ChannelSource, Device, Pipeline, SnapshotReceiver, StaticInventory};

fn start(dir: &tempfile::TempDir, names: &[&str], source: Arc<ChannelSource>) -> Pipeline {
    start_with(AppConfig::default(), dir, names, source)
}

fn start_with(
    mut config: AppConfig,
    dir: &tempfile::TempDir,
    names: &[&str],
    source: Arc<ChannelSource>,
) -> Pipeline {
    config.paths.base_path = dir.path().to_path_buf();
    let devices = names
        .iter()
        .enumerate()
        .map(|(i, name)| Device::new(*name, format!("10.0.0.{}", i + 1), 57400))
        .collect();
    Pipeline::start(&config, &StaticInventory::new(devices), source).expect("start")
}

/// Wait for the first snapshot matching `pred`.
async fn wait_for(
    snapshots: &mut SnapshotReceiver,
    pred: impl Fn(&TopologySnapshot) -> bool,
) -> Arc<TopologySnapshot> {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            {
                let current = snapshots.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            snapshots.changed().await.expect("aggregator alive");
        }
    })
    .await
    .expect("snapshot in time")
}

fn isis_up(neighbor: &str, interface: &str) -> Sample {
    Sample::IsisNeighbor(IsisNeighbor {
        neighbor: neighbor.into(),
        state: AdjacencyState::Up,
        interface: Some(interface.into()),
        level: Some(2),
    })
}

#[tokio::test(start_paused = true)]
async fn silent_device_disappears_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(ChannelSource::new());
    let r1_ifaces = source.feed("R1", INTERFACE_SENSOR_GROUP);

    // Sweep far out of reach: only the watchdog's DeviceDown can remove R1.
    let mut config = AppConfig::default();
    config.telemetry.sweep_interval_ms = 3_600_000;
    let window = config.telemetry.staleness_window();
    let tick = config.telemetry.sample_interval();
    let pipeline = start_with(config, &dir, &["R1"], Arc::clone(&source));
    let mut snapshots = pipeline.snapshots();

    let sent_at = tokio::time::Instant::now();
    r1_ifaces
        .send(Sample::Interface(InterfaceStat {
            interface: "Gi0/0".into(),
            oper_up: true,
            counters: InterfaceCounters::default(),
        }))
        .await
        .expect("feed open");

    let seen = wait_for(&mut snapshots, |s| s.node("R1").is_some()).await;
    assert_eq!(seen.node("R1").unwrap().interfaces, vec!["Gi0/0"]);

    // Silence past the 6s window.
    let gone = wait_for(&mut snapshots, |s| s.is_absent("R1")).await;
    assert!(gone.seq > seen.seq);
    assert!(sent_at.elapsed() > window);
    assert!(sent_at.elapsed() <= window + tick);

    // A continuing outage produces no further DeviceDown, hence no snapshots.
    tokio::time::sleep(Duration::from_secs(4)).await;
    let settled = snapshots.borrow().seq;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(snapshots.borrow().seq, settled);
    assert!(snapshots.borrow().is_absent("R1"));

    drop(r1_ifaces);
    pipeline.join().await;
}

#[tokio::test(start_paused = true)]
async fn mutual_neighbors_reach_clients_as_one_edge() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(ChannelSource::new());
    let r1_isis = source.feed("R1", ISIS_SENSOR_GROUP);
    let r2_isis = source.feed("R2", ISIS_SENSOR_GROUP);
    let pipeline = start(&dir, &["R1", "R2"], Arc::clone(&source));

    let hub = Arc::clone(pipeline.hub());
    let mut client = hub.register().expect("register");

    r1_isis.send(isis_up("R2", "Gi0/0")).await.expect("feed");
    r2_isis.send(isis_up("R1", "Gi0/1")).await.expect("feed");

    let mut last_seq = 0;
    let edge = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = client.recv().await.expect("client registered");
            let value: serde_json::Value = serde_json::from_str(&frame).expect("json");
            assert_eq!(value["type"], "topology");

            let seq = value["seq"].as_u64().expect("seq");
            assert!(seq > last_seq, "sequence must increase");
            last_seq = seq;

            let edges = value["edges"].as_array().expect("edges").clone();
            assert!(edges.len() <= 1);
            if edges.len() == 1 && edges[0]["reported_by"].as_array().map(Vec::len) == Some(2) {
                return edges[0].clone();
            }
        }
    })
    .await
    .expect("edge in time");

    assert_eq!(edge["source"], "R1");
    assert_eq!(edge["target"], "R2");
    assert_eq!(edge["level"], 2);

    let snapshot = pipeline.snapshots().borrow().clone();
    assert_eq!(snapshot.edge("R1", "R2"), snapshot.edge("R2", "R1"));
    assert_eq!(snapshot.node("R1").unwrap().status, NodeStatus::Up);
    assert_eq!(snapshot.node("R2").unwrap().status, NodeStatus::Up);

    pipeline.join().await;
    assert!(!hub.contains(&client.id));
    // Whatever was still queued drains, then the queue reports closed.
    while client.recv().await.is_some() {}
}

#[tokio::test(start_paused = true)]
async fn late_client_is_primed_and_runtime_device_collected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(ChannelSource::new());
    let r1_ifaces = source.feed("R1", INTERFACE_SENSOR_GROUP);
    let r9_ifaces = source.feed("R9", INTERFACE_SENSOR_GROUP);
    let pipeline = start(&dir, &["R1"], Arc::clone(&source));
    let mut snapshots = pipeline.snapshots();

    r1_ifaces
        .send(Sample::Interface(InterfaceStat {
            interface: "Gi0/0".into(),
            oper_up: true,
            counters: InterfaceCounters::default(),
        }))
        .await
        .expect("feed");
    wait_for(&mut snapshots, |s| s.node("R1").is_some()).await;

    // Give the hub a turn to fan the snapshot out.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut late = pipeline.hub().register().expect("register");
    let frame = late.recv().await.expect("primed");
    assert!(frame.contains("\"R1\""));

    pipeline
        .add_device(Device::new("R9", "10.0.0.9", 57400))
        .expect("add");
    r9_ifaces
        .send(Sample::Interface(InterfaceStat {
            interface: "Te0/0/0".into(),
            oper_up: true,
            counters: InterfaceCounters::default(),
        }))
        .await
        .expect("feed");
    let snap = wait_for(&mut snapshots, |s| s.node("R9").is_some()).await;
    assert_eq!(snap.node("R9").unwrap().interfaces, vec!["Te0/0/0"]);
    assert_eq!(pipeline.device_count(), 2);

    pipeline.join().await;
}
