//! BLE connection management: scan, connect, listen, reconnect.
//!
//! `CubeManager` owns the whole pipeline for a single cube. One background
//! task runs the scan/connect/listen cycle; every notification is decrypted,
//! parsed, sequenced and dispatched in order before the next one is touched.
//! Cancellation is cooperative: every wait point also listens on the stop
//! token.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::{
    COMMAND_CHAR_UUID, DEVICE_NAME_FRAGMENTS, GAN_COMPANY_ID, SERVICE_UUID, STATE_CHAR_UUID,
};
use crate::crypto::{decrypt_packet, derive_key_iv, encrypt_packet};
use crate::error::CubeError;
use crate::message::{Command, CubeEvent, CubeMove, Gen3Message};
use crate::sequencer::{HistoryRequest, MoveSequencer};
use crate::tracker::{SolvedTracker, DEFAULT_GUARD_WINDOW};

const SCAN_POLL: Duration = Duration::from_millis(250);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Settings for the scan/connect/listen cycle.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub scan_timeout: Duration,
    /// Connect attempts per discovered device before giving up on it.
    pub connect_retries: u32,
    /// Fixed delay between connect attempts.
    pub retry_backoff: Duration,
    /// Delay before a new scan after a session ends.
    pub reconnect_delay: Duration,
    /// Solved reports this close to (re)connection are suppressed.
    pub guard_window: Duration,
    /// Device-name fragments that identify a cube, matched uppercased.
    pub name_fragments: Vec<String>,
    /// Enable move-pattern solve detection for cubes without facelets.
    pub move_heuristic: bool,
    /// Pin the key-derivation identifier instead of recovering it from
    /// advertisement data. Useful on hosts that hide the real address.
    pub identifier_override: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(15),
            connect_retries: 3,
            retry_backoff: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(3),
            guard_window: DEFAULT_GUARD_WINDOW,
            name_fragments: DEVICE_NAME_FRAGMENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            move_heuristic: false,
            identifier_override: None,
        }
    }
}

/// What we know about the cube we are talking to.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub name: String,
    /// Address the host exposes for the transport; may be randomized.
    pub transport_address: String,
    /// Identifier used for key derivation: the real address recovered from
    /// manufacturer data when available, otherwise the transport address.
    pub hardware_address: String,
}

/// Handle returned by the register methods, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

pub type MoveCallback = Box<dyn Fn(&CubeMove) + Send + Sync>;
pub type SolvedCallback = Box<dyn Fn() + Send + Sync>;
pub type ConnectionCallback = Box<dyn Fn(bool) + Send + Sync>;
pub type EventCallback = Box<dyn Fn(&CubeEvent) + Send + Sync>;

// Callbacks are stored behind `Arc` so dispatch can snapshot them and
// invoke outside the registry lock.
#[derive(Default)]
struct Callbacks {
    next_id: u64,
    moves: HashMap<u64, Arc<MoveCallback>>,
    solved: HashMap<u64, Arc<SolvedCallback>>,
    connection: HashMap<u64, Arc<ConnectionCallback>>,
    events: HashMap<u64, Arc<EventCallback>>,
}

impl Callbacks {
    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

type SharedCallbacks = Arc<Mutex<Callbacks>>;

/// Manager for a single smart cube. Construct once, register callbacks,
/// then drive it with `start`/`stop`.
pub struct CubeManager {
    config: ManagerConfig,
    callbacks: SharedCallbacks,
    alarm_active: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CubeManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            callbacks: Arc::new(Mutex::new(Callbacks::default())),
            alarm_active: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            command_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Start the scan/connect/listen task. No-op when already running.
    pub fn start(&self) {
        let mut cancel_slot = match self.cancel.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if cancel_slot.is_some() {
            debug!("start called while already running");
            return;
        }
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        if let Ok(mut slot) = self.command_tx.lock() {
            *slot = Some(tx);
        }

        let handle = tokio::spawn(run_loop(
            self.config.clone(),
            self.callbacks.clone(),
            self.alarm_active.clone(),
            token.clone(),
            rx,
        ));
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(handle);
        }
        *cancel_slot = Some(token);
        info!("cube manager started");
    }

    /// Signal the task to stop and wait for it to wind down. No-op when not
    /// running.
    pub async fn stop(&self) {
        let token = match self.cancel.lock() {
            Ok(mut g) => g.take(),
            Err(p) => p.into_inner().take(),
        };
        let Some(token) = token else {
            debug!("stop called while not running");
            return;
        };
        token.cancel();

        if let Ok(mut slot) = self.command_tx.lock() {
            *slot = None;
        }
        let handle = match self.task.lock() {
            Ok(mut g) => g.take(),
            Err(p) => p.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "manager task ended abnormally");
            }
        }
        info!("cube manager stopped");
    }

    /// Queue a command for the active connection. Commands are drained one
    /// per tick; the protocol has no response correlation, so callers should
    /// not issue overlapping requests.
    pub fn send_command(&self, command: Command) -> Result<(), CubeError> {
        let slot = match self.command_tx.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        match slot.as_ref() {
            Some(tx) => tx.send(command).map_err(|_| CubeError::NotConnected),
            None => Err(CubeError::NotConnected),
        }
    }

    /// Tell the solved tracker whether an alarm is currently ringing; an
    /// active alarm bypasses the connect-time guard window.
    pub fn set_alarm_active(&self, active: bool) {
        self.alarm_active.store(active, Ordering::Relaxed);
    }

    pub fn register_move_callback(&self, f: MoveCallback) -> CallbackId {
        self.with_callbacks(|cbs| {
            let id = cbs.next();
            cbs.moves.insert(id, Arc::new(f));
            CallbackId(id)
        })
    }

    pub fn register_solved_callback(&self, f: SolvedCallback) -> CallbackId {
        self.with_callbacks(|cbs| {
            let id = cbs.next();
            cbs.solved.insert(id, Arc::new(f));
            CallbackId(id)
        })
    }

    pub fn register_connection_callback(&self, f: ConnectionCallback) -> CallbackId {
        self.with_callbacks(|cbs| {
            let id = cbs.next();
            cbs.connection.insert(id, Arc::new(f));
            CallbackId(id)
        })
    }

    /// Receive every event the pipeline produces, not just moves/solves.
    pub fn register_event_callback(&self, f: EventCallback) -> CallbackId {
        self.with_callbacks(|cbs| {
            let id = cbs.next();
            cbs.events.insert(id, Arc::new(f));
            CallbackId(id)
        })
    }

    pub fn unregister(&self, id: CallbackId) {
        self.with_callbacks(|cbs| {
            cbs.moves.remove(&id.0);
            cbs.solved.remove(&id.0);
            cbs.connection.remove(&id.0);
            cbs.events.remove(&id.0);
        });
    }

    fn with_callbacks<R>(&self, f: impl FnOnce(&mut Callbacks) -> R) -> R {
        let mut guard = match self.callbacks.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        f(&mut guard)
    }
}

/// Extract the cube's real address from GAN-tagged manufacturer data. Some
/// hosts expose only a randomized transport address, but the cube embeds
/// its hardware address in the advertisement.
fn mac_from_manufacturer_data(data: &HashMap<u16, Vec<u8>>) -> Option<String> {
    let payload = data.get(&GAN_COMPANY_ID)?;
    if payload.len() < 6 || payload[0] == 0 {
        return None;
    }
    Some(
        payload[..6]
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// Top-level task: run sessions back to back until cancelled.
async fn run_loop(
    config: ManagerConfig,
    callbacks: SharedCallbacks,
    alarm_active: Arc<AtomicBool>,
    cancel: CancellationToken,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) {
    while !cancel.is_cancelled() {
        match run_session(&config, &callbacks, &alarm_active, &cancel, &mut command_rx).await {
            Ok(()) => info!("session ended"),
            Err(e) => warn!(error = %e, "session failed"),
        }

        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(config.reconnect_delay) => {}
        }
    }
}

/// One full scan → connect → listen → disconnect cycle.
async fn run_session(
    config: &ManagerConfig,
    callbacks: &SharedCallbacks,
    alarm_active: &AtomicBool,
    cancel: &CancellationToken,
    command_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> Result<(), CubeError> {
    let (peripheral, identity) = scan(config, cancel).await?;
    if cancel.is_cancelled() {
        return Ok(());
    }
    info!(
        name = %identity.name,
        address = %identity.hardware_address,
        "connecting to cube"
    );

    let mut session = connect_with_retries(&peripheral, &identity, config, cancel).await?;
    dispatch_connection(callbacks, true);

    let result = session
        .listen(callbacks, alarm_active, cancel, command_rx)
        .await;

    // Clean transport close on every exit path. The disconnected edge is
    // only reported here, mirroring the connected edge above; sessions that
    // never connected produce neither.
    if let Err(e) = peripheral.disconnect().await {
        debug!(error = %e, "disconnect failed");
    }
    dispatch_connection(callbacks, false);
    result
}

/// Scan for a device whose name contains one of the configured fragments.
async fn scan(
    config: &ManagerConfig,
    cancel: &CancellationToken,
) -> Result<(Peripheral, DeviceIdentity), CubeError> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(CubeError::DeviceNotFound)?;

    adapter.start_scan(ScanFilter::default()).await?;
    debug!(timeout = ?config.scan_timeout, "scanning");

    let deadline = Instant::now() + config.scan_timeout;
    let mut found = None;
    'scan: while Instant::now() < deadline {
        for peripheral in adapter.peripherals().await? {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            let Some(name) = props.local_name else {
                continue;
            };
            let upper = name.to_uppercase();
            if !config
                .name_fragments
                .iter()
                .any(|f| upper.contains(&f.to_uppercase()))
            {
                continue;
            }

            let transport_address = peripheral.address().to_string();
            let hardware_address = config
                .identifier_override
                .clone()
                .or_else(|| mac_from_manufacturer_data(&props.manufacturer_data))
                .unwrap_or_else(|| transport_address.clone());

            found = Some((
                peripheral,
                DeviceIdentity {
                    name,
                    transport_address,
                    hardware_address,
                },
            ));
            break 'scan;
        }
        tokio::select! {
            _ = cancel.cancelled() => break 'scan,
            _ = sleep(SCAN_POLL) => {}
        }
    }

    if let Err(e) = adapter.stop_scan().await {
        debug!(error = %e, "stop_scan failed");
    }
    found.ok_or(CubeError::DeviceNotFound)
}

async fn connect_with_retries(
    peripheral: &Peripheral,
    identity: &DeviceIdentity,
    config: &ManagerConfig,
    cancel: &CancellationToken,
) -> Result<Session, CubeError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match connect_once(peripheral, identity, config).await {
            Ok(session) => return Ok(session),
            Err(e) if attempts < config.connect_retries => {
                warn!(attempt = attempts, error = %e, "connect attempt failed");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(CubeError::ConnectFailed { attempts }),
                    _ = sleep(config.retry_backoff) => {}
                }
            }
            Err(e) => {
                error!(attempts, error = %e, "giving up on device");
                return Err(CubeError::ConnectFailed { attempts });
            }
        }
    }
}

/// Single connect attempt: open the transport, verify the cube service,
/// subscribe, derive keys and prime the cube with hardware and battery
/// requests. The transport is closed again if any step after the connect
/// fails, so a failed attempt never leaks an open connection.
async fn connect_once(
    peripheral: &Peripheral,
    identity: &DeviceIdentity,
    config: &ManagerConfig,
) -> Result<Session, CubeError> {
    timeout(CONNECT_TIMEOUT, peripheral.connect()).await??;
    match configure_session(peripheral, identity, config).await {
        Ok(session) => Ok(session),
        Err(e) => {
            if let Err(e2) = peripheral.disconnect().await {
                debug!(error = %e2, "disconnect after failed setup");
            }
            Err(e)
        }
    }
}

async fn configure_session(
    peripheral: &Peripheral,
    identity: &DeviceIdentity,
    config: &ManagerConfig,
) -> Result<Session, CubeError> {
    peripheral.discover_services().await?;

    if !peripheral.services().iter().any(|s| s.uuid == SERVICE_UUID) {
        return Err(CubeError::ServiceNotFound);
    }

    let chars = peripheral.characteristics();
    let state_char = chars
        .iter()
        .find(|c| c.uuid == STATE_CHAR_UUID)
        .cloned()
        .ok_or(CubeError::ServiceNotFound)?;
    let command_char = chars
        .iter()
        .find(|c| c.uuid == COMMAND_CHAR_UUID)
        .cloned()
        .ok_or(CubeError::ServiceNotFound)?;

    let (key, iv) = derive_key_iv(&identity.hardware_address)?;
    peripheral.subscribe(&state_char).await?;

    let mut tracker = SolvedTracker::new(config.guard_window, config.move_heuristic);
    tracker.on_connected();

    let session = Session {
        peripheral: peripheral.clone(),
        command_char,
        key,
        iv,
        sequencer: MoveSequencer::new(),
        tracker,
    };

    // The cube does not volunteer its metadata; ask once up front.
    session.send_frame(Command::RequestHardware).await?;
    session.send_frame(Command::RequestBattery).await?;

    info!(name = %identity.name, "cube connected");
    Ok(session)
}

/// Everything owned by one live connection. Discarded on disconnect,
/// recreated from scratch on reconnect.
struct Session {
    peripheral: Peripheral,
    command_char: Characteristic,
    key: [u8; 16],
    iv: [u8; 16],
    sequencer: MoveSequencer,
    tracker: SolvedTracker,
}

impl Session {
    /// Main receive loop. Returns when cancelled or when the notification
    /// stream ends (transport lost).
    async fn listen(
        &mut self,
        callbacks: &SharedCallbacks,
        alarm_active: &AtomicBool,
        cancel: &CancellationToken,
        command_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<(), CubeError> {
        let mut notifications = self.peripheral.notifications().await?;
        let mut tick = interval(TICK_PERIOD);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("listen loop cancelled");
                    return Ok(());
                }
                notification = notifications.next() => {
                    let Some(notification) = notification else {
                        warn!("notification stream ended");
                        return Ok(());
                    };
                    let alarm = alarm_active.load(Ordering::Relaxed);
                    let (events, request) = self.process(&notification.value, alarm);
                    for event in &events {
                        dispatch(callbacks, event);
                    }
                    if let Some(req) = request {
                        self.request_history(req).await;
                    }
                }
                _ = tick.tick() => {
                    if let Some(req) = self.sequencer.watchdog(Instant::now()) {
                        self.request_history(req).await;
                    }
                    // One queued command per tick keeps outbound traffic
                    // serialized on a protocol with no response correlation.
                    if let Ok(command) = command_rx.try_recv() {
                        if command == Command::Reset {
                            self.tracker.reset();
                        }
                        if let Err(e) = self.send_frame(command).await {
                            warn!(error = %e, ?command, "command send failed");
                        }
                    }
                }
            }
        }
    }

    /// Decrypt, parse and route one notification. Per-packet failures are
    /// logged and dropped; the session keeps running.
    fn process(&mut self, raw: &[u8], alarm_active: bool) -> (Vec<CubeEvent>, Option<HistoryRequest>) {
        let mut events = Vec::new();

        let plain = match decrypt_packet(raw, &self.key, &self.iv) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, len = raw.len(), "dropping undecryptable notification");
                return (events, None);
            }
        };
        let message = match Gen3Message::parse(&plain) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping unparseable frame");
                return (events, None);
            }
        };

        let mut request = None;
        match message {
            Gen3Message::Move(mv) => {
                let out = self.sequencer.push(mv);
                request = out.request;
                for mv in out.emitted {
                    debug!(notation = %mv.notation(), serial = mv.serial, "move");
                    if self.tracker.observe_move(&mv) {
                        events.push(CubeEvent::Solved);
                    }
                    events.push(CubeEvent::Move(mv));
                }
            }
            Gen3Message::Facelets(data) => {
                // The facelets serial names the last applied move; it can
                // seed the sequencer cursor before the first move arrives.
                self.sequencer.sync_cursor(data.serial);
                let solved = self
                    .tracker
                    .observe_facelets(data.state.is_solved(), alarm_active);
                events.push(CubeEvent::Facelets(data));
                if solved {
                    info!("cube solved");
                    events.push(CubeEvent::Solved);
                }
            }
            Gen3Message::Battery(level) => {
                debug!(level, "battery report");
                events.push(CubeEvent::Battery(level));
            }
            Gen3Message::Hardware(hw) => {
                info!(?hw, "hardware report");
                events.push(CubeEvent::Hardware(hw));
            }
            Gen3Message::Unknown { event_type, payload } => {
                debug!(event_type, len = payload.len(), "ignoring unknown event");
            }
        }
        (events, request)
    }

    async fn request_history(&self, req: HistoryRequest) {
        let command = Command::RequestMoveHistory {
            start_serial: req.start_serial,
            count: req.count,
        };
        if let Err(e) = self.send_frame(command).await {
            warn!(error = %e, "history request failed");
        }
    }

    /// Encode, encrypt and write one command frame.
    async fn send_frame(&self, command: Command) -> Result<(), CubeError> {
        let frame = command.to_frame();
        let cipher = encrypt_packet(&frame, &self.key, &self.iv)?;
        self.peripheral
            .write(&self.command_char, &cipher, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }
}

/// Run one callback, containing any panic so the remaining callbacks and
/// the session itself are unaffected.
fn invoke(label: &str, f: impl FnOnce() + std::panic::UnwindSafe) {
    if catch_unwind(f).is_err() {
        warn!(label, "callback panicked");
    }
}

fn dispatch(callbacks: &SharedCallbacks, event: &CubeEvent) {
    // Snapshot under the lock and invoke outside it, so a callback may
    // register or unregister on the manager without deadlocking.
    let (event_cbs, move_cbs, solved_cbs, connection_cbs) = {
        let guard = match callbacks.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        (
            guard.events.values().cloned().collect::<Vec<_>>(),
            guard.moves.values().cloned().collect::<Vec<_>>(),
            guard.solved.values().cloned().collect::<Vec<_>>(),
            guard.connection.values().cloned().collect::<Vec<_>>(),
        )
    };

    for f in &event_cbs {
        invoke("event", AssertUnwindSafe(|| (**f)(event)));
    }
    match event {
        CubeEvent::Move(mv) => {
            for f in &move_cbs {
                invoke("move", AssertUnwindSafe(|| (**f)(mv)));
            }
        }
        CubeEvent::Solved => {
            for f in &solved_cbs {
                invoke("solved", AssertUnwindSafe(|| (**f)()));
            }
        }
        CubeEvent::ConnectionChanged(up) => {
            for f in &connection_cbs {
                invoke("connection", AssertUnwindSafe(|| (**f)(*up)));
            }
        }
        _ => {}
    }
}

fn dispatch_connection(callbacks: &SharedCallbacks, up: bool) {
    dispatch(callbacks, &CubeEvent::ConnectionChanged(up));
}
