//! Streaming session coordinator
//!
//! One client connection wanting live traffic for one device across one or
//! more interfaces. All streams write through a single outbound writer
//! behind a mutex, and share one cancellation scope with the client reader:
//! a client disconnect or a failed write ends the whole session and
//! unregisters every subscription it opened.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::{Stream, StreamExt};
use rosgw_core::{DeviceId, GatewayError, GatewayResult, TelemetrySample};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::multiplexer::{SubscriptionHandle, TelemetryMultiplexer};

// =============================================================================
// Wire events
// =============================================================================

/// Event sent to a streaming client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Connected {
        message: String,
        timestamp: DateTime<Utc>,
    },
    TrafficUpdate {
        interface: String,
        data: TelemetrySample,
        timestamp: DateTime<Utc>,
    },
    Error {
        error: String,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    pub fn connected(message: impl Into<String>) -> Self {
        MonitorEvent::Connected {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn traffic_update(interface: impl Into<String>, data: TelemetrySample) -> Self {
        MonitorEvent::TrafficUpdate {
            interface: interface.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        MonitorEvent::Error {
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        MonitorEvent::Pong {
            timestamp: Utc::now(),
        }
    }
}

/// Control message received from a streaming client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    #[serde(other)]
    Other,
}

impl ClientMessage {
    /// Parse a text frame; anything unrecognised is [`ClientMessage::Other`]
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or(ClientMessage::Other)
    }
}

/// Outbound write failed; the client is gone
#[derive(Debug, Clone, thiserror::Error)]
#[error("outbound write failed: {0}")]
pub struct WriteError(pub String);

/// Destination for events of one client connection
#[async_trait]
pub trait EventWriter: Send + 'static {
    async fn write(&mut self, event: &MonitorEvent) -> Result<(), WriteError>;

    /// Called once when the session is over
    async fn close(&mut self) {}
}

#[async_trait]
impl EventWriter for mpsc::Sender<MonitorEvent> {
    async fn write(&mut self, event: &MonitorEvent) -> Result<(), WriteError> {
        self.send(event.clone())
            .await
            .map_err(|_| WriteError("event channel closed".into()))
    }
}

type SharedWriter<W> = Arc<AsyncMutex<W>>;

async fn write_event<W: EventWriter>(writer: &SharedWriter<W>, event: &MonitorEvent) -> bool {
    match writer.lock().await.write(event).await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "Dropping client after write failure");
            false
        }
    }
}

// =============================================================================
// Request
// =============================================================================

/// Split a comma-separated interface list, falling back to a single name
///
/// Empty entries are skipped and duplicates removed, keeping first-seen
/// order.
pub fn parse_stream_list(interfaces: Option<&str>, interface: Option<&str>) -> Vec<String> {
    let raw = match interfaces.filter(|s| !s.trim().is_empty()) {
        Some(list) => list,
        None => interface.unwrap_or(""),
    };

    let mut seen = HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

/// Validated parameters of a streaming session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingRequest {
    device_id: DeviceId,
    streams: Vec<String>,
}

impl StreamingRequest {
    pub fn new(device_id: DeviceId, streams: Vec<String>) -> GatewayResult<Self> {
        if device_id == 0 {
            return Err(GatewayError::InvalidRequest(
                "router_id is required and must be valid".into(),
            ));
        }
        if streams.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "interface or interfaces is required".into(),
            ));
        }
        Ok(Self { device_id, streams })
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn streams(&self) -> &[String] {
        &self.streams
    }
}

/// Outcome of a finished streaming session
#[derive(Debug, Clone, Default)]
pub struct StreamingSummary {
    pub device_id: DeviceId,
    pub started: Vec<String>,
    /// `"<stream>: <reason>"` for every stream that failed to start
    pub failed: Vec<String>,
    pub updates_sent: HashMap<String, u64>,
}

// =============================================================================
// Session
// =============================================================================

/// Coordinates the streams of one client connection
pub struct StreamingSession {
    request: StreamingRequest,
    cancel: CancellationToken,
}

impl StreamingSession {
    pub fn new(request: StreamingRequest) -> Self {
        Self {
            request,
            cancel: CancellationToken::new(),
        }
    }

    /// Run under an externally owned token, e.g. a child of the server's
    /// shutdown token
    pub fn with_cancel_token(request: StreamingRequest, cancel: CancellationToken) -> Self {
        Self { request, cancel }
    }

    /// Cancelling this token ends the session
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stream events to `writer` until the client leaves or every stream ends
    ///
    /// `inbound` yields the client's control messages and ends when the
    /// client disconnects. Every subscription opened here is unregistered
    /// before this returns.
    pub async fn run<W, S>(
        self,
        multiplexer: Arc<TelemetryMultiplexer>,
        writer: W,
        inbound: S,
    ) -> StreamingSummary
    where
        W: EventWriter,
        S: Stream<Item = ClientMessage> + Send + Unpin + 'static,
    {
        let StreamingRequest { device_id, streams } = self.request;
        let cancel = self.cancel;
        let writer = Arc::new(AsyncMutex::new(writer));
        let mut summary = StreamingSummary {
            device_id,
            ..Default::default()
        };

        let reader = tokio::spawn(read_client(inbound, Arc::clone(&writer), cancel.clone()));

        let capacity = multiplexer.sink_capacity();
        let attempts = join_all(streams.iter().map(|stream| {
            let multiplexer = &multiplexer;
            async move {
                let (tx, rx) = mpsc::channel(capacity);
                let result = multiplexer.subscribe(device_id, stream, tx).await;
                (stream.clone(), result.map(|handle| (handle, rx)))
            }
        }))
        .await;

        let mut started = Vec::new();
        for (stream, result) in attempts {
            match result {
                Ok((handle, rx)) => started.push((stream, handle, rx)),
                Err(e) => {
                    warn!(device_id, %stream, error = %e, "Failed to start stream");
                    summary.failed.push(format!("{}: {}", stream, failure_reason(&e)));
                }
            }
        }

        if !summary.failed.is_empty() {
            let error = GatewayError::PartialStartFailure {
                failed: summary.failed.clone(),
                requested: streams.len(),
            };
            write_event(&writer, &MonitorEvent::error(error.to_string())).await;
        }

        if started.is_empty() {
            info!(device_id, "No stream could be started, closing session");
            cancel.cancel();
            reader.abort();
            writer.lock().await.close().await;
            return summary;
        }

        summary.started = started.iter().map(|(s, _, _)| s.clone()).collect();
        let message = format!(
            "Monitoring started for router {}: {} ({} interface(s))",
            device_id,
            summary.started.join(", "),
            summary.started.len()
        );
        if !write_event(&writer, &MonitorEvent::connected(message)).await {
            cancel.cancel();
        }
        info!(device_id, streams = ?summary.started, "Streaming session started");

        let remaining = Arc::new(AtomicUsize::new(started.len()));
        let forwarders: Vec<_> = started
            .into_iter()
            .map(|(stream, handle, rx)| {
                tokio::spawn(forward(
                    stream,
                    rx,
                    handle,
                    Arc::clone(&writer),
                    cancel.clone(),
                    Arc::clone(&remaining),
                ))
            })
            .collect();

        cancel.cancelled().await;

        for result in join_all(forwarders).await {
            match result {
                Ok((stream, sent)) => {
                    summary.updates_sent.insert(stream, sent);
                }
                Err(e) => warn!(device_id, error = %e, "Stream forwarder failed"),
            }
        }
        reader.abort();
        writer.lock().await.close().await;

        info!(device_id, updates_sent = ?summary.updates_sent, "Streaming session ended");
        summary
    }
}

fn failure_reason(error: &GatewayError) -> String {
    match error {
        GatewayError::SubscribeFailed { reason, .. }
        | GatewayError::ConnectionUnavailable { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

/// Answer pings and watch for client disconnect
async fn read_client<W, S>(mut inbound: S, writer: SharedWriter<W>, cancel: CancellationToken)
where
    W: EventWriter,
    S: Stream<Item = ClientMessage> + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return,
            message = inbound.next() => message,
        };

        match message {
            Some(ClientMessage::Ping) => {
                if !write_event(&writer, &MonitorEvent::pong()).await {
                    break;
                }
            }
            Some(ClientMessage::Other) => {}
            None => {
                debug!("Client disconnected");
                break;
            }
        }
    }
    cancel.cancel();
}

/// Forward one stream's samples to the client
async fn forward<W: EventWriter>(
    stream: String,
    mut samples: mpsc::Receiver<TelemetrySample>,
    handle: SubscriptionHandle,
    writer: SharedWriter<W>,
    cancel: CancellationToken,
    remaining: Arc<AtomicUsize>,
) -> (String, u64) {
    let mut sent: u64 = 0;

    loop {
        let sample = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sample = samples.recv() => sample,
        };

        match sample {
            Some(sample) => {
                let event = MonitorEvent::traffic_update(&stream, sample);
                if !write_event(&writer, &event).await {
                    cancel.cancel();
                    break;
                }
                sent += 1;
            }
            None => {
                warn!(%stream, "Device stream ended");
                write_event(
                    &writer,
                    &MonitorEvent::error(format!("monitoring of {} ended", stream)),
                )
                .await;
                if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                    cancel.cancel();
                }
                break;
            }
        }
    }

    handle.unsubscribe();
    (stream, sent)
}
