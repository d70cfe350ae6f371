//! Simulated device transport for testing and demos
//!
//! Each [`SimulatedDevice`] keeps interfaces, addresses and simple queues in
//! memory and answers the same command paths a real router does. Knobs
//! inject failures (rejected login, hanging dial, failing liveness checks,
//! traps on streams) and counters expose what the gateway did to it.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rosgw_core::{
    Command, DeviceSession, DialTarget, Dialer, Listener, Reply, Sentence, SessionError,
};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Bytes added to an interface's receive counter per sample
const RX_STEP: u64 = 125_000;
const TX_STEP: u64 = 62_500;
const BYTES_PER_PACKET: u64 = 1_250;

fn trap(message: impl Into<String>) -> SessionError {
    SessionError::Trap {
        message: message.into(),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value, "true" | "yes")
}

fn interface_type(name: &str) -> &'static str {
    if name.starts_with("wlan") {
        "wlan"
    } else if name.starts_with("bridge") {
        "bridge"
    } else if name.starts_with("vlan") {
        "vlan"
    } else {
        "ether"
    }
}

/// Network address for `ip/prefix`, or the bare address if it isn't IPv4
fn network_of(address: &str) -> String {
    let (ip, prefix) = address.split_once('/').unwrap_or((address, "32"));
    match (ip.parse::<Ipv4Addr>(), prefix.parse::<u32>()) {
        (Ok(ip), Ok(prefix)) if prefix <= 32 => {
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            Ipv4Addr::from(u32::from(ip) & mask).to_string()
        }
        _ => ip.to_string(),
    }
}

// =============================================================================
// Device model
// =============================================================================

#[derive(Debug, Clone)]
struct SimInterface {
    id: String,
    name: String,
    running: bool,
    disabled: bool,
    rx_bytes: u64,
    tx_bytes: u64,
}

impl SimInterface {
    fn attrs(&self) -> Vec<(String, String)> {
        vec![
            (".id".into(), self.id.clone()),
            ("name".into(), self.name.clone()),
            ("type".into(), interface_type(&self.name).into()),
            ("running".into(), self.running.to_string()),
            ("disabled".into(), self.disabled.to_string()),
            ("rx-bytes".into(), self.rx_bytes.to_string()),
            ("tx-bytes".into(), self.tx_bytes.to_string()),
            ("rx-packets".into(), (self.rx_bytes / BYTES_PER_PACKET).to_string()),
            ("tx-packets".into(), (self.tx_bytes / BYTES_PER_PACKET).to_string()),
        ]
    }

    /// Advance the counters by one sample and render the traffic record
    fn sample(&mut self) -> Vec<(String, String)> {
        let active = self.running && !self.disabled;
        let (rx, tx) = if active { (RX_STEP, TX_STEP) } else { (0, 0) };
        self.rx_bytes += rx;
        self.tx_bytes += tx;
        vec![
            ("name".into(), self.name.clone()),
            ("rx-bytes".into(), self.rx_bytes.to_string()),
            ("tx-bytes".into(), self.tx_bytes.to_string()),
            ("rx-packets".into(), (self.rx_bytes / BYTES_PER_PACKET).to_string()),
            ("tx-packets".into(), (self.tx_bytes / BYTES_PER_PACKET).to_string()),
            ("rx-bits-per-second".into(), (rx * 8).to_string()),
            ("tx-bits-per-second".into(), (tx * 8).to_string()),
        ]
    }
}

#[derive(Debug, Clone)]
struct SimAddress {
    id: String,
    address: String,
    interface: String,
}

#[derive(Debug, Clone)]
struct SimQueue {
    id: String,
    name: String,
    target: String,
    max_limit: String,
}

#[derive(Debug, Default)]
struct DeviceState {
    interfaces: Vec<SimInterface>,
    addresses: Vec<SimAddress>,
    queues: Vec<SimQueue>,
    next_id: u32,
}

impl DeviceState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("*{:X}", self.next_id)
    }

    fn interface_mut(&mut self, name: &str) -> Option<&mut SimInterface> {
        self.interfaces.iter_mut().find(|i| i.name == name)
    }
}

/// An in-memory router
pub struct SimulatedDevice {
    credentials: Option<(String, String)>,
    version: String,
    booted: Instant,
    state: Mutex<DeviceState>,

    reject_login: AtomicBool,
    hang_dial: AtomicBool,
    fail_liveness: AtomicBool,
    latency_ms: AtomicU64,
    pending_traps: AtomicUsize,

    dial_attempts: AtomicUsize,
    active_sessions: AtomicUsize,
    open_listeners: AtomicUsize,
    in_flight: AtomicUsize,
    peak_concurrent_commands: AtomicUsize,
    commands_run: AtomicUsize,
}

impl SimulatedDevice {
    /// A device with the given interfaces, all running, accepting any login
    pub fn with_interfaces<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = DeviceState::default();
        for name in names {
            let id = state.allocate_id();
            state.interfaces.push(SimInterface {
                id,
                name: name.into(),
                running: true,
                disabled: false,
                rx_bytes: 0,
                tx_bytes: 0,
            });
        }

        Self {
            credentials: None,
            version: "7.14.3 (stable)".into(),
            booted: Instant::now(),
            state: Mutex::new(state),
            reject_login: AtomicBool::new(false),
            hang_dial: AtomicBool::new(false),
            fail_liveness: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            pending_traps: AtomicUsize::new(0),
            dial_attempts: AtomicUsize::new(0),
            active_sessions: AtomicUsize::new(0),
            open_listeners: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_concurrent_commands: AtomicUsize::new(0),
            commands_run: AtomicUsize::new(0),
        }
    }

    /// Only accept this username/password
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    // ---- knobs ----

    pub fn set_reject_login(&self, reject: bool) {
        self.reject_login.store(reject, Ordering::SeqCst);
    }

    /// Make dials never complete
    pub fn set_hang_dial(&self, hang: bool) {
        self.hang_dial.store(hang, Ordering::SeqCst);
    }

    /// Make `/system/resource/print` fail with a transport error
    pub fn set_fail_liveness(&self, fail: bool) {
        self.fail_liveness.store(fail, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Replace the next `count` stream samples with traps
    pub fn inject_traps(&self, count: usize) {
        self.pending_traps.fetch_add(count, Ordering::SeqCst);
    }

    pub fn set_interface_running(&self, name: &str, running: bool) {
        if let Some(iface) = self.state.lock().interface_mut(name) {
            iface.running = running;
        }
    }

    // ---- counters ----

    pub fn dial_attempts(&self) -> usize {
        self.dial_attempts.load(Ordering::SeqCst)
    }

    /// Sessions dialed and not yet closed
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Continuous subscriptions currently producing samples
    pub fn open_listeners(&self) -> usize {
        self.open_listeners.load(Ordering::SeqCst)
    }

    /// Highest number of commands observed executing at once
    pub fn peak_concurrent_commands(&self) -> usize {
        self.peak_concurrent_commands.load(Ordering::SeqCst)
    }

    pub fn commands_run(&self) -> usize {
        self.commands_run.load(Ordering::SeqCst)
    }

    pub fn interface_disabled(&self, name: &str) -> Option<bool> {
        self.state
            .lock()
            .interfaces
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.disabled)
    }

    // ---- internals ----

    fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms.load(Ordering::SeqCst))
    }

    fn check_login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        if self.reject_login.load(Ordering::SeqCst) {
            return Err(SessionError::Auth("invalid user name or password".into()));
        }
        match &self.credentials {
            Some((user, pass)) if user != username || pass != password => {
                Err(SessionError::Auth("invalid user name or password".into()))
            }
            _ => Ok(()),
        }
    }

    fn begin_command(&self) -> CommandSlot<'_> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrent_commands
            .fetch_max(running, Ordering::SeqCst);
        self.commands_run.fetch_add(1, Ordering::SeqCst);
        CommandSlot(self)
    }

    fn take_trap(&self) -> bool {
        self.pending_traps
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn has_interface(&self, name: &str) -> bool {
        self.state.lock().interfaces.iter().any(|i| i.name == name)
    }

    fn sample(&self, interface: &str) -> Option<Vec<(String, String)>> {
        self.state.lock().interface_mut(interface).map(SimInterface::sample)
    }

    fn execute(&self, command: &Command) -> Result<Reply, SessionError> {
        let attr = |key: &str| command.attr_value(key).unwrap_or_default().to_string();
        let mut state = self.state.lock();
        let mut sentences = Vec::new();

        match command.path() {
            "/system/resource/print" => {
                if self.fail_liveness.load(Ordering::SeqCst) {
                    return Err(SessionError::Transport("connection reset by peer".into()));
                }
                sentences.push(Sentence::re([
                    ("version", self.version.clone()),
                    ("uptime", format!("{}s", self.booted.elapsed().as_secs())),
                    ("board-name", "CHR".to_string()),
                ]));
            }
            "/interface/print" => {
                let name = command.query_value("name");
                for iface in &state.interfaces {
                    if name.map_or(true, |n| n == iface.name) {
                        sentences.push(Sentence::re(iface.attrs()));
                    }
                }
            }
            "/interface/set" => {
                let id = attr(".id");
                let iface = state
                    .interfaces
                    .iter_mut()
                    .find(|i| i.id == id)
                    .ok_or_else(|| trap("no such item"))?;
                if let Some(disabled) = command.attr_value("disabled") {
                    iface.disabled = parse_flag(disabled);
                }
            }
            "/interface/monitor-traffic" => {
                let name = attr("interface");
                if let Some(iface) = state.interface_mut(&name) {
                    sentences.push(Sentence::re(iface.sample()));
                }
            }
            "/ip/address/print" => {
                for addr in &state.addresses {
                    sentences.push(Sentence::re([
                        (".id", addr.id.clone()),
                        ("address", addr.address.clone()),
                        ("interface", addr.interface.clone()),
                        ("network", network_of(&addr.address)),
                        ("disabled", "false".to_string()),
                    ]));
                }
            }
            "/ip/address/add" => {
                let address = attr("address");
                let interface = attr("interface");
                if address.is_empty() {
                    return Err(trap("missing value for address"));
                }
                if !state.interfaces.iter().any(|i| i.name == interface) {
                    return Err(trap("input does not match any value of interface"));
                }
                let id = state.allocate_id();
                state.addresses.push(SimAddress {
                    id: id.clone(),
                    address,
                    interface,
                });
                sentences.push(Sentence::re([("ret", id)]));
            }
            "/ip/address/remove" => {
                let id = attr(".id");
                let before = state.addresses.len();
                state.addresses.retain(|a| a.id != id);
                if state.addresses.len() == before {
                    return Err(trap("no such item"));
                }
            }
            "/queue/simple/print" => {
                for queue in &state.queues {
                    sentences.push(Sentence::re([
                        (".id", queue.id.clone()),
                        ("name", queue.name.clone()),
                        ("target", queue.target.clone()),
                        ("max-limit", queue.max_limit.clone()),
                        ("burst-limit", "0/0".to_string()),
                        ("disabled", "false".to_string()),
                    ]));
                }
            }
            "/queue/simple/add" => {
                let name = attr("name");
                if state.queues.iter().any(|q| q.name == name) {
                    return Err(trap("failure: already have such name"));
                }
                let id = state.allocate_id();
                state.queues.push(SimQueue {
                    id: id.clone(),
                    name,
                    target: attr("target"),
                    max_limit: attr("max-limit"),
                });
                sentences.push(Sentence::re([("ret", id)]));
            }
            "/queue/simple/remove" => {
                let id = attr(".id");
                let before = state.queues.len();
                state.queues.retain(|q| q.id != id);
                if state.queues.len() == before {
                    return Err(trap("no such item"));
                }
            }
            other => return Err(trap(format!("no such command prefix: {}", other))),
        }

        sentences.push(Sentence::done());
        Ok(Reply::new(sentences))
    }
}

struct CommandSlot<'a>(&'a SimulatedDevice);

impl Drop for CommandSlot<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ListenerSlot(Arc<SimulatedDevice>);

impl Drop for ListenerSlot {
    fn drop(&mut self) {
        self.0.open_listeners.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Session
// =============================================================================

struct SimulatedSession {
    device: Arc<SimulatedDevice>,
    closed: CancellationToken,
    sample_interval: Duration,
}

#[async_trait]
impl DeviceSession for SimulatedSession {
    async fn run(&self, command: &Command) -> Result<Reply, SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed);
        }

        let _slot = self.device.begin_command();
        let latency = self.device.latency();
        if latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = self.closed.cancelled() => return Err(SessionError::Closed),
            }
        }

        self.device.execute(command)
    }

    async fn listen(&self, command: &Command) -> Result<Listener, SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed);
        }
        if command.path() != "/interface/monitor-traffic" {
            return Err(trap(format!("{} cannot be followed", command.path())));
        }

        let interface = command.attr_value("interface").unwrap_or_default().to_string();
        if !self.device.has_interface(&interface) {
            return Err(trap("no such item"));
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);
        self.device.open_listeners.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(produce(
            ListenerSlot(Arc::clone(&self.device)),
            interface,
            tx,
            cancel.clone(),
            self.closed.clone(),
            self.sample_interval,
        ));

        Ok(Listener::new(Box::pin(ReceiverStream::new(rx)), cancel))
    }

    async fn close(&self) {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            self.device.active_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Emit periodic samples until the listener or the session is cancelled
async fn produce(
    slot: ListenerSlot,
    interface: String,
    tx: mpsc::Sender<Sentence>,
    cancel: CancellationToken,
    closed: CancellationToken,
    period: Duration,
) {
    let device = &slot.0;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = closed.cancelled() => break,
            _ = ticker.tick() => {
                let sentence = if device.take_trap() {
                    Sentence::trap("interface is busy")
                } else {
                    match device.sample(&interface) {
                        Some(attrs) => Sentence::re(attrs),
                        None => Sentence::fatal("no such item"),
                    }
                };
                match tx.try_send(sentence) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }
    }
    debug!(%interface, "Simulated listener stopped");
}

// =============================================================================
// Dialer
// =============================================================================

/// Dials simulated devices by `host:port`
pub struct SimulatedDialer {
    devices: RwLock<HashMap<String, Arc<SimulatedDevice>>>,
    auto_provision: Option<Vec<String>>,
    sample_interval: Duration,
}

impl Default for SimulatedDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDialer {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            auto_provision: None,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Create a device with these interfaces on first dial of an unknown
    /// address instead of refusing the connection
    pub fn with_auto_provision(mut self, interfaces: Vec<String>) -> Self {
        self.auto_provision = Some(interfaces);
        self
    }

    pub fn add_device(&self, address: impl Into<String>, device: SimulatedDevice) -> Arc<SimulatedDevice> {
        let device = Arc::new(device);
        self.devices.write().insert(address.into(), Arc::clone(&device));
        device
    }

    pub fn device(&self, address: &str) -> Option<Arc<SimulatedDevice>> {
        self.devices.read().get(address).cloned()
    }

    fn lookup(&self, address: &str) -> Option<Arc<SimulatedDevice>> {
        if let Some(device) = self.device(address) {
            return Some(device);
        }
        let interfaces = self.auto_provision.as_ref()?;
        let mut devices = self.devices.write();
        let device = devices
            .entry(address.to_string())
            .or_insert_with(|| {
                debug!(%address, "Provisioning simulated device");
                Arc::new(SimulatedDevice::with_interfaces(interfaces.iter().cloned()))
            })
            .clone();
        Some(device)
    }
}

#[async_trait]
impl Dialer for SimulatedDialer {
    async fn dial(&self, target: &DialTarget) -> Result<Arc<dyn DeviceSession>, SessionError> {
        let device = self.lookup(&target.address).ok_or_else(|| {
            SessionError::Transport(format!("dial tcp {}: connection refused", target.address))
        })?;
        device.dial_attempts.fetch_add(1, Ordering::SeqCst);

        if device.hang_dial.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let latency = device.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        device.check_login(&target.username, &target.password)?;
        device.active_sessions.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(SimulatedSession {
            device,
            closed: CancellationToken::new(),
            sample_interval: self.sample_interval,
        }))
    }
}
