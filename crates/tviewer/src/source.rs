// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Upstream telemetry subscriptions.
//!
//! A [`TelemetrySource`] opens one subscription per sensor group and hands
//! back a stream of decoded [`Sample`]s. The wire format behind it is the
//! source's business; [`JsonLinesSource`] speaks a newline-delimited JSON
//! dial-in protocol:
//!
//! ```text
//! -> {"subscription_id":"tviewerIFCS","sensor_group":"tviewerInterfaces","sample_interval_ms":2000,...}
//! <- {"status":"ok"}
//! <- {"kind":"interface","interface":"Gi0/0","oper_up":true,"counters":{...}}
//! <- ...
//! ```

use crate::model::{Device, Sample};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Interface counters subscription.
pub const INTERFACE_SUBSCRIPTION_ID: &str = "tviewerIFCS";
pub const INTERFACE_SENSOR_GROUP: &str = "tviewerInterfaces";

/// IS-IS neighbor subscription.
pub const ISIS_SUBSCRIPTION_ID: &str = "tviewerISIS";
pub const ISIS_SENSOR_GROUP: &str = "tviewerISISNeighbor";

/// Longest line accepted from a device, terminator excluded.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Subscription failures. None of them is fatal; collectors retry.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("subscription rejected: {0}")]
    Rejected(String),

    #[error("malformed sample: {0}")]
    Malformed(String),

    #[error("no sample for {0:?}")]
    Idle(Duration),

    #[error("stream closed by device")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// A bad sample poisons only itself; everything else ends the subscription.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub subscription_id: String,
    pub sensor_group: String,
    pub sample_interval_ms: u64,
}

impl SubscriptionRequest {
    pub fn interfaces(sample_interval_ms: u64) -> Self {
        Self {
            subscription_id: INTERFACE_SUBSCRIPTION_ID.into(),
            sensor_group: INTERFACE_SENSOR_GROUP.into(),
            sample_interval_ms,
        }
    }

    pub fn isis(sample_interval_ms: u64) -> Self {
        Self {
            subscription_id: ISIS_SUBSCRIPTION_ID.into(),
            sensor_group: ISIS_SENSOR_GROUP.into(),
            sample_interval_ms,
        }
    }
}

pub type SampleStream = BoxStream<'static, Result<Sample, SourceError>>;

/// Something that can open telemetry subscriptions on a device.
pub trait TelemetrySource: Send + Sync + 'static {
    fn subscribe(
        &self,
        device: &Device,
        request: &SubscriptionRequest,
    ) -> impl Future<Output = Result<SampleStream, SourceError>> + Send;
}

#[derive(Serialize)]
struct SubscribeFrame<'a> {
    subscription_id: &'a str,
    sensor_group: &'a str,
    sample_interval_ms: u64,
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AckFrame {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Line framing with a length cap.
///
/// An oversized line is consumed up to its newline in bounded chunks and
/// reported as malformed, so the next line still parses.
struct LineReader<R> {
    reader: BufReader<R>,
    max_len: usize,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            max_len,
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator, `None` at end of stream.
    async fn next_line(&mut self) -> Result<Option<String>, SourceError> {
        self.buf.clear();
        let limit = self.max_len as u64 + 1;
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        } else if self.buf.len() > self.max_len {
            self.skip_line().await?;
            return Err(SourceError::Malformed(format!(
                "line longer than {} bytes",
                self.max_len
            )));
        }

        std::str::from_utf8(&self.buf)
            .map(|line| Some(line.to_owned()))
            .map_err(|e| SourceError::Malformed(e.to_string()))
    }

    async fn skip_line(&mut self) -> Result<(), SourceError> {
        loop {
            self.buf.clear();
            let n = (&mut self.reader)
                .take(self.max_len as u64)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if n == 0 || self.buf.last() == Some(&b'\n') {
                return Ok(());
            }
        }
    }
}

/// Newline-delimited JSON dial-in over TCP.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    connect_timeout: Duration,
    idle_timeout: Duration,
    max_line_len: usize,
}

impl JsonLinesSource {
    /// `idle_timeout` bounds the wait for any single line, so a half-dead
    /// TCP session ends in a resubscribe instead of hanging forever.
    pub fn new(connect_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            idle_timeout,
            max_line_len: MAX_LINE_LEN,
        }
    }

    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len.max(1);
        self
    }
}

impl TelemetrySource for JsonLinesSource {
    async fn subscribe(
        &self,
        device: &Device,
        request: &SubscriptionRequest,
    ) -> Result<SampleStream, SourceError> {
        let endpoint = device.endpoint();
        let connect = TcpStream::connect(&endpoint);
        let stream = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(SourceError::Connect { endpoint, source }),
            Err(_) => return Err(SourceError::ConnectTimeout(endpoint)),
        };

        let (read_half, mut write_half) = stream.into_split();
        let frame = SubscribeFrame {
            subscription_id: &request.subscription_id,
            sensor_group: &request.sensor_group,
            sample_interval_ms: request.sample_interval_ms,
            username: &device.username,
            password: &device.password,
        };
        let mut line =
            serde_json::to_vec(&frame).map_err(|e| SourceError::Malformed(e.to_string()))?;
        line.push(b'\n');
        write_half.write_all(&line).await?;

        let mut lines = LineReader::new(read_half, self.max_line_len);
        let ack = match tokio::time::timeout(self.idle_timeout, lines.next_line()).await {
            Ok(Ok(Some(ack))) => ack,
            Ok(Ok(None)) => return Err(SourceError::Closed),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(SourceError::Idle(self.idle_timeout)),
        };
        let ack: AckFrame =
            serde_json::from_str(&ack).map_err(|e| SourceError::Malformed(e.to_string()))?;
        if ack.status != "ok" {
            return Err(SourceError::Rejected(ack.message.unwrap_or(ack.status)));
        }

        let idle = self.idle_timeout;
        // The write half stays alive inside the stream state: dropping it
        // would half-close the socket and some agents treat that as cancel.
        let samples = stream::unfold(Some((lines, write_half)), move |state| async move {
            let (mut lines, writer) = state?;
            let item = match tokio::time::timeout(idle, lines.next_line()).await {
                Ok(Ok(Some(text))) => serde_json::from_str::<Sample>(&text)
                    .map_err(|e| SourceError::Malformed(e.to_string())),
                Ok(Ok(None)) => Err(SourceError::Closed),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(SourceError::Idle(idle)),
            };
            let next = match &item {
                Err(e) if !e.is_recoverable() => None,
                _ => Some((lines, writer)),
            };
            Some((item, next))
        });
        Ok(samples.boxed())
    }
}

/// In-memory source fed through channels, one per device and sensor group.
///
/// Each registered feed can be subscribed to once; when its sender is
/// dropped the stream ends like a device hanging up.
#[derive(Debug, Default)]
pub struct ChannelSource {
    feeds: DashMap<(String, String), mpsc::Receiver<Sample>>,
    subscriptions: AtomicUsize,
}

impl ChannelSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feed and return the sender side.
    pub fn feed(&self, device: &str, sensor_group: &str) -> mpsc::Sender<Sample> {
        let (tx, rx) = mpsc::channel(64);
        self.feeds
            .insert((device.to_string(), sensor_group.to_string()), rx);
        tx
    }

    /// Subscription attempts so far, successful or not.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::Relaxed)
    }
}

impl TelemetrySource for ChannelSource {
    async fn subscribe(
        &self,
        device: &Device,
        request: &SubscriptionRequest,
    ) -> Result<SampleStream, SourceError> {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
        let key = (device.name.clone(), request.sensor_group.clone());
        let (_, rx) = self.feeds.remove(&key).ok_or_else(|| {
            SourceError::Rejected(format!(
                "no feed for {} / {}",
                device.name, request.sensor_group
            ))
        })?;
        let samples = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|sample| (Ok(sample), rx))
        });
        Ok(samples.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AdjacencyState;
    use tokio::net::TcpListener;

    async fn agent(
        replies: Vec<impl AsRef<str> + Send + 'static>,
    ) -> (Device, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let request = lines.next_line().await.unwrap().unwrap();
            for reply in replies {
                write_half.write_all(reply.as_ref().as_bytes()).await.unwrap();
                write_half.write_all(b"\n").await.unwrap();
            }
            request
        });
        let mut device = Device::new("R1", "127.0.0.1", port);
        device.username = "admin".into();
        device.password = "pw".into();
        (device, handle)
    }

    fn source() -> JsonLinesSource {
        JsonLinesSource::new(Duration::from_secs(2), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_subscribe_and_stream() {
        let (device, agent) = agent(vec![
            r#"{"status":"ok"}"#,
            r#"{"kind":"isis_neighbor","neighbor":"R2","state":"up"}"#,
            r#"not json"#,
            r#"{"kind":"interface","interface":"Gi0/0"}"#,
        ])
        .await;

        let mut samples = source()
            .subscribe(&device, &SubscriptionRequest::isis(2000))
            .await
            .expect("subscribe");

        match samples.next().await {
            Some(Ok(Sample::IsisNeighbor(n))) => {
                assert_eq!(n.neighbor, "R2");
                assert_eq!(n.state, AdjacencyState::Up);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            samples.next().await,
            Some(Err(SourceError::Malformed(_)))
        ));
        assert!(matches!(
            samples.next().await,
            Some(Ok(Sample::Interface(_)))
        ));

        let request = agent.await.unwrap();
        assert!(request.contains(ISIS_SUBSCRIPTION_ID));
        assert!(request.contains(ISIS_SENSOR_GROUP));
        assert!(request.contains("\"sample_interval_ms\":2000"));

        // Agent hung up: stream reports it once, then ends.
        assert!(matches!(samples.next().await, Some(Err(SourceError::Closed))));
        assert!(samples.next().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped() {
        let (device, _agent) = agent(vec![
            r#"{"status":"ok"}"#.to_string(),
            "x".repeat(1000),
            r#"{"kind":"isis_neighbor","neighbor":"R2","state":"up"}"#.to_string(),
        ])
        .await;

        let mut samples = source()
            .with_max_line_len(64)
            .subscribe(&device, &SubscriptionRequest::isis(2000))
            .await
            .expect("subscribe");

        match samples.next().await {
            Some(Err(SourceError::Malformed(message))) => assert!(message.contains("64")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            samples.next().await,
            Some(Ok(Sample::IsisNeighbor(_)))
        ));
    }

    #[tokio::test]
    async fn test_rejected_subscription() {
        let (device, _agent) =
            agent(vec![r#"{"status":"error","message":"authentication failed"}"#]).await;
        let err = source()
            .subscribe(&device, &SubscriptionRequest::interfaces(2000))
            .await
            .err()
            .expect("rejected");
        assert!(matches!(err, SourceError::Rejected(ref m) if m == "authentication failed"));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let device = Device::new("R1", "127.0.0.1", port);
        let err = source()
            .subscribe(&device, &SubscriptionRequest::interfaces(2000))
            .await
            .err()
            .expect("refused");
        assert!(matches!(err, SourceError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_channel_source_single_use() {
        let source = ChannelSource::new();
        let device = Device::new("R1", "127.0.0.1", 1);
        let tx = source.feed("R1", INTERFACE_SENSOR_GROUP);

        let request = SubscriptionRequest::interfaces(2000);
        let mut samples = source.subscribe(&device, &request).await.expect("feed");
        assert!(source.subscribe(&device, &request).await.is_err());
        assert!(source
            .subscribe(&device, &SubscriptionRequest::isis(2000))
            .await
            .is_err());
        assert_eq!(source.subscription_count(), 3);

        let sample = Sample::Interface(crate::model::InterfaceStat {
            interface: "Gi0/0".into(),
            oper_up: true,
            counters: Default::default(),
        });
        tx.send(sample.clone()).await.expect("send");
        drop(tx);
        assert_eq!(samples.next().await.map(|r| r.ok()), Some(Some(sample)));
        assert!(samples.next().await.is_none());
    }
}
