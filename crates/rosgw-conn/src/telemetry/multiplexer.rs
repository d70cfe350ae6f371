//! Telemetry multiplexer
//!
//! One device subscription per (device, stream) key, fanned out to every
//! registered sink. The key's entry exists exactly while its sink set is
//! non-empty; removing the last sink cancels the device subscription.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use rosgw_core::{DeviceId, GatewayError, GatewayResult, Listener, SentenceKind, TelemetrySample};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::monitor_traffic_command;
use crate::connection::ConnectionManager;
use crate::gate::GateMap;

/// Samples logged per subscription at debug level
const LOGGED_SAMPLES: u64 = 3;

/// Identifies one device-side subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub device_id: DeviceId,
    pub stream: String,
}

impl SubscriptionKey {
    pub fn new(device_id: DeviceId, stream: impl Into<String>) -> Self {
        Self {
            device_id,
            stream: stream.into(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.stream)
    }
}

struct StreamEntry {
    entry_id: u64,
    cancel: CancellationToken,
    session_closed: CancellationToken,
    sinks: HashMap<u64, mpsc::Sender<TelemetrySample>>,
}

/// Key → entry map shared by the multiplexer, dispatch tasks and handles
#[derive(Default)]
struct StreamTable {
    entries: Mutex<HashMap<SubscriptionKey, StreamEntry>>,
    next_id: AtomicU64,
}

impl StreamTable {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Add a sink to an existing entry, handing it back if there is none
    ///
    /// An entry whose session is already closed is dropped instead of
    /// joined; its dispatch task is about to end.
    fn attach(
        &self,
        key: &SubscriptionKey,
        sink_id: u64,
        sink: mpsc::Sender<TelemetrySample>,
    ) -> Result<(), mpsc::Sender<TelemetrySample>> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return Err(sink);
        };
        if entry.session_closed.is_cancelled() {
            if let Some(stale) = entries.remove(key) {
                stale.cancel.cancel();
                debug!(%key, "Dropped subscription of a closed session");
            }
            return Err(sink);
        }
        entry.sinks.insert(sink_id, sink);
        Ok(())
    }

    fn detach(&self, key: &SubscriptionKey, sink_id: u64) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.sinks.remove(&sink_id).is_none() || !entry.sinks.is_empty() {
            return;
        }
        if let Some(entry) = entries.remove(key) {
            entry.cancel.cancel();
            info!(%key, "Last consumer left, device subscription cancelled");
        }
    }

    /// Deliver a sample to every sink of the entry
    ///
    /// Runs under the table lock so a sink removed by `detach` never sees a
    /// later sample.
    fn deliver(&self, key: &SubscriptionKey, entry_id: u64, sample: &TelemetrySample) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key).filter(|e| e.entry_id == entry_id) else {
            return;
        };

        entry.sinks.retain(|sink_id, sink| match sink.try_send(sample.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%key, sink_id, "Consumer is lagging, sample dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if entry.sinks.is_empty() {
            if let Some(entry) = entries.remove(key) {
                entry.cancel.cancel();
                debug!(%key, "All consumers gone, device subscription cancelled");
            }
        }
    }

    /// Drop the entry if it is still the one a dispatch task served
    fn remove_entry(&self, key: &SubscriptionKey, entry_id: u64) -> bool {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.entry_id == entry_id) {
            entries.remove(key);
            true
        } else {
            false
        }
    }
}

/// Shares device telemetry subscriptions between consumers
pub struct TelemetryMultiplexer {
    connections: Arc<ConnectionManager>,
    table: Arc<StreamTable>,
    open_gates: GateMap<SubscriptionKey>,
}

impl TelemetryMultiplexer {
    pub fn new(connections: Arc<ConnectionManager>) -> Arc<Self> {
        Arc::new(Self {
            connections,
            table: Arc::new(StreamTable::default()),
            open_gates: GateMap::new(),
        })
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Sample buffer size for consumer sinks
    pub fn sink_capacity(&self) -> usize {
        self.connections.config().sink_capacity.max(1)
    }

    /// Register `sink` for samples of `stream` on a device
    ///
    /// Opens the device subscription when this is the first consumer of the
    /// key. The returned handle unregisters the sink when dropped.
    pub async fn subscribe(
        &self,
        device_id: DeviceId,
        stream: &str,
        sink: mpsc::Sender<TelemetrySample>,
    ) -> GatewayResult<SubscriptionHandle> {
        let key = SubscriptionKey::new(device_id, stream);
        let session = self
            .connections
            .get_or_connect(device_id)
            .await
            .map_err(|e| GatewayError::ConnectionUnavailable {
                device_id,
                reason: e.to_string(),
            })?;

        let _gate = self.open_gates.acquire(&key).await;

        let sink_id = self.table.next_id();
        let sink = match self.table.attach(&key, sink_id, sink) {
            Ok(()) => {
                debug!(%key, sink_id, "Joined existing device subscription");
                return Ok(self.handle(key, sink_id));
            }
            Err(sink) => sink,
        };

        let listener = session
            .listen(&monitor_traffic_command(stream))
            .await
            .map_err(|e| {
                warn!(%key, error = %e, "Device rejected subscription");
                GatewayError::SubscribeFailed {
                    device_id,
                    stream: stream.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let entry_id = self.table.next_id();
        let cancel = listener.cancel_token();
        self.table.entries.lock().insert(
            key.clone(),
            StreamEntry {
                entry_id,
                cancel: cancel.clone(),
                session_closed: session.closed_token(),
                sinks: HashMap::from([(sink_id, sink)]),
            },
        );

        tokio::spawn(dispatch(
            Arc::clone(&self.table),
            key.clone(),
            entry_id,
            listener,
            session.closed_token(),
        ));
        info!(%key, "Device subscription opened");

        Ok(self.handle(key, sink_id))
    }

    /// Number of keys with an open device subscription
    pub fn active_subscriptions(&self) -> usize {
        self.table.entries.lock().len()
    }

    /// Registered consumers for a key (0 when not subscribed)
    pub fn consumer_count(&self, device_id: DeviceId, stream: &str) -> usize {
        self.table
            .entries
            .lock()
            .get(&SubscriptionKey::new(device_id, stream))
            .map_or(0, |e| e.sinks.len())
    }

    fn handle(&self, key: SubscriptionKey, sink_id: u64) -> SubscriptionHandle {
        SubscriptionHandle {
            table: Arc::clone(&self.table),
            key,
            sink_id,
            released: false,
        }
    }

    /// Keys with a subscription open in progress or queued
    pub fn pending_opens(&self) -> usize {
        self.open_gates.len()
    }
}

/// Reads one device subscription and fans samples out to the key's sinks
async fn dispatch(
    table: Arc<StreamTable>,
    key: SubscriptionKey,
    entry_id: u64,
    mut listener: Listener,
    session_closed: CancellationToken,
) {
    let cancel = listener.cancel_token();
    let mut delivered: u64 = 0;

    let reason = loop {
        let sentence = tokio::select! {
            _ = cancel.cancelled() => break "cancelled",
            _ = session_closed.cancelled() => break "session closed",
            next = listener.sentences.next() => next,
        };

        let Some(sentence) = sentence else {
            break "end of stream";
        };

        match &sentence.kind {
            SentenceKind::Re => {
                let sample = TelemetrySample::from_attrs(key.device_id, &key.stream, &sentence.attrs);
                delivered += 1;
                if delivered <= LOGGED_SAMPLES {
                    debug!(%key, rx_bps = %sample.rx_bits_per_second, tx_bps = %sample.tx_bits_per_second, "Sample received");
                }
                table.deliver(&key, entry_id, &sample);
            }
            SentenceKind::Trap => {
                warn!(%key, message = %sentence.message(), "Device reported error on stream, dropped");
            }
            SentenceKind::Done => {}
            SentenceKind::Fatal => {
                warn!(%key, message = %sentence.message(), "Device ended stream");
                break "fatal";
            }
            SentenceKind::Other(word) => {
                debug!(%key, %word, "Ignoring unexpected reply");
            }
        }
    };

    listener.cancel();
    if table.remove_entry(&key, entry_id) {
        info!(%key, reason, delivered, "Device subscription ended, consumers detached");
    } else {
        debug!(%key, reason, delivered, "Dispatch stopped");
    }
}

/// Registration of one sink with the multiplexer
///
/// Dropping the handle unregisters the sink.
pub struct SubscriptionHandle {
    table: Arc<StreamTable>,
    key: SubscriptionKey,
    sink_id: u64,
    released: bool,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.table.detach(&self.key, self.sink_id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("sink_id", &self.sink_id)
            .finish()
    }
}
