//! The engine task and the handle callers drive it with.
//!
//! [`ScaleEngine::spawn`] opens the transport and starts a single task that
//! owns the connection session, the stability tracker, the measurement gate,
//! the reconnection policy, and the device registry. Nothing else touches
//! them, so commands, radio events, and timer expiries never race.
//!
//! Transport operations run on spawned tasks tagged with the session epoch.
//! Their results come back to the engine task, which discards any whose
//! epoch has ended and tears down whatever such a late result established,
//! unless the current session is using the same peripheral.
//!
//! # Example
//!
//! ```
//! use bodyscale_core::{DeviceRegistry, EngineConfig, MockTransport, ScaleEngine, ConnectionState};
//!
//! #[tokio::main]
//! async fn main() -> bodyscale_core::Result<()> {
//!     let mock = MockTransport::new();
//!     mock.add_scale("MIBFS");
//!
//!     let handle = ScaleEngine::spawn(mock, DeviceRegistry::in_memory(), EngineConfig::default()).await?;
//!     assert!(handle.start_scan().await?);
//!     assert_eq!(handle.state(), ConnectionState::Scanning);
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use bodyscale_types::{DeviceIdentity, MeasurementCharacteristic, frame, is_scale_name, normalize_identifier};

use crate::config::EngineConfig;
use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, ErrorCode, Result};
use crate::events::{EventDispatcher, EventReceiver, ScaleEvent};
use crate::gate::{GateOutcome, MeasurementGate};
use crate::reconnect::{ReconnectDecision, ReconnectionPolicy};
use crate::registry::DeviceRegistry;
use crate::stability::StabilityTracker;
use crate::state::{ConnectionSession, ConnectionState, SessionSnapshot, Transition};
use crate::transport::{ScaleTransport, TransportEvent, TransportSink};

const COMMAND_QUEUE_SIZE: usize = 32;

type Ack = oneshot::Sender<bool>;

#[derive(Debug)]
enum Command {
    StartScan(Ack),
    StopScan(Ack),
    SelectDevice(DeviceIdentity, Ack),
    Disconnect(Ack),
    Reconnect(Ack),
    AcknowledgeError(Ack),
    ForgetDevice(Ack),
    SetAutoConnect(bool, Ack),
    Shutdown(Ack),
}

/// Result of a spawned transport operation.
#[derive(Debug)]
enum Completion {
    ScanStarted {
        generation: u64,
        result: Result<()>,
    },
    Linked {
        epoch: u64,
        device: DeviceIdentity,
        result: Result<()>,
    },
    Subscribed {
        epoch: u64,
        device: DeviceIdentity,
        results: Vec<(MeasurementCharacteristic, Result<()>)>,
    },
}

#[derive(Debug)]
struct ActiveScan {
    generation: u64,
    deadline: Instant,
    /// Device to connect to as soon as it advertises.
    target: Option<DeviceIdentity>,
    /// Normalized ids already reported in this scan.
    seen: HashSet<String>,
}

/// Entry point for starting an engine.
#[derive(Debug)]
pub struct ScaleEngine;

impl ScaleEngine {
    /// Open `transport` and start the engine task.
    ///
    /// If the registry remembers a scale and auto-connect is on, the engine
    /// starts scanning for it straight away.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a bad config, or whatever the
    /// transport reports while opening.
    pub async fn spawn(
        transport: impl ScaleTransport,
        registry: DeviceRegistry,
        config: EngineConfig,
    ) -> Result<ScaleHandle> {
        Self::spawn_shared(Arc::new(transport), registry, config).await
    }

    /// Like [`spawn`](Self::spawn), for a transport that is already shared.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn spawn_shared(
        transport: Arc<dyn ScaleTransport>,
        registry: DeviceRegistry,
        config: EngineConfig,
    ) -> Result<ScaleHandle> {
        config.validate()?;

        let (sink, transport_events) = TransportSink::channel();
        transport.open(sink).await?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let events = EventDispatcher::new(config.event_capacity);
        let session = ConnectionSession::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(
            session.snapshot(registry.device().cloned(), registry.auto_connect()),
        );

        let engine = Engine {
            transport,
            tracker: StabilityTracker::new(config.stability.clone()),
            gate: MeasurementGate::new(config.gate.clone()),
            policy: ReconnectionPolicy::new(config.reconnect.clone()),
            config,
            session,
            registry,
            events: events.clone(),
            snapshot: snapshot_tx,
            completions: completion_tx,
            scan: None,
            scan_generation: 0,
            reconnect_at: None,
            reconnecting: false,
            auto_started: false,
        };
        tokio::spawn(engine.run(command_rx, transport_events, completion_rx));
        info!("Scale engine started");

        Ok(ScaleHandle {
            commands: command_tx,
            events,
            snapshot: snapshot_rx,
        })
    }
}

/// Cloneable handle to a running engine.
///
/// Requests return `Ok(true)` when the engine acted on them and `Ok(false)`
/// when they did not apply in the current state. They return as soon as the
/// engine has dispatched the work, never after radio I/O. Once the engine
/// has stopped every request fails with [`Error::Cancelled`].
#[derive(Debug, Clone)]
pub struct ScaleHandle {
    commands: mpsc::Sender<Command>,
    events: EventDispatcher,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl ScaleHandle {
    async fn request(&self, command: impl FnOnce(Ack) -> Command) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| Error::Cancelled)?;
        rx.await.map_err(|_| Error::Cancelled)
    }

    /// Start scanning. Only honoured while disconnected.
    ///
    /// A remembered scale with auto-connect on is connected as soon as it
    /// advertises; otherwise discovered scales are reported for
    /// [`select_device`](Self::select_device).
    pub async fn start_scan(&self) -> Result<bool> {
        self.request(Command::StartScan).await
    }

    /// Stop a running scan.
    pub async fn stop_scan(&self) -> Result<bool> {
        self.request(Command::StopScan).await
    }

    /// Connect to `device`.
    ///
    /// While scanning this connects immediately. While disconnected it
    /// scans for the device first.
    pub async fn select_device(&self, device: DeviceIdentity) -> Result<bool> {
        self.request(|ack| Command::SelectDevice(device, ack)).await
    }

    /// Tear the session down and cancel any pending reconnection.
    pub async fn disconnect(&self) -> Result<bool> {
        self.request(Command::Disconnect).await
    }

    /// Connect to the remembered scale now, with a fresh attempt budget.
    pub async fn reconnect(&self) -> Result<bool> {
        self.request(Command::Reconnect).await
    }

    /// Dismiss an error, returning to disconnected.
    pub async fn acknowledge_error(&self) -> Result<bool> {
        self.request(Command::AcknowledgeError).await
    }

    /// Disconnect and drop the remembered scale.
    ///
    /// Returns `true` if a scale was forgotten.
    pub async fn forget_device(&self) -> Result<bool> {
        self.request(Command::ForgetDevice).await
    }

    /// Enable or disable auto-connect.
    pub async fn set_auto_connect(&self, enabled: bool) -> Result<bool> {
        self.request(|ack| Command::SetAutoConnect(enabled, ack)).await
    }

    /// Disconnect and stop the engine task.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await.map(|_| ())
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// The latest session snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    /// A receiver that yields every new snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the session reaches `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the engine stops first.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<SessionSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|snapshot| snapshot.state == state)
            .await
            .map_err(|_| Error::Cancelled)?;
        Ok(snapshot.clone())
    }

    /// Whether the engine task is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct Engine {
    transport: Arc<dyn ScaleTransport>,
    config: EngineConfig,
    session: ConnectionSession,
    tracker: StabilityTracker,
    gate: MeasurementGate,
    policy: ReconnectionPolicy,
    registry: DeviceRegistry,
    events: EventDispatcher,
    snapshot: watch::Sender<SessionSnapshot>,
    completions: mpsc::UnboundedSender<Completion>,
    scan: Option<ActiveScan>,
    scan_generation: u64,
    reconnect_at: Option<Instant>,
    /// A reconnect episode is running: failures schedule another attempt.
    reconnecting: bool,
    /// Auto-connect already fired in this process.
    auto_started: bool,
}

impl Engine {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        self.maybe_auto_start();

        loop {
            let scan_deadline = self.scan.as_ref().map(|scan| scan.deadline);
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(ack)) => {
                        self.disconnect();
                        let _ = ack.send(true);
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.disconnect();
                        break;
                    }
                },
                Some(event) = transport_events.recv() => self.handle_transport_event(event),
                Some(completion) = completions.recv() => self.handle_completion(completion),
                () = sleep_until(scan_deadline) => self.scan_timed_out(),
                () = sleep_until(self.reconnect_at) => self.reconnect_due(),
            }
        }
        info!("Scale engine stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let (ack, acted) = match command {
            Command::StartScan(ack) => {
                let target = self.registry.auto_target().cloned();
                (ack, self.begin_scan(target))
            }
            Command::StopScan(ack) => (ack, self.stop_scan()),
            Command::SelectDevice(device, ack) => (ack, self.select_device(device)),
            Command::Disconnect(ack) => (ack, self.disconnect()),
            Command::Reconnect(ack) => (ack, self.manual_reconnect()),
            Command::AcknowledgeError(ack) => (ack, self.acknowledge_error()),
            Command::ForgetDevice(ack) => (ack, self.forget_device()),
            Command::SetAutoConnect(enabled, ack) => (ack, self.set_auto_connect(enabled)),
            Command::Shutdown(ack) => (ack, false),
        };
        let _ = ack.send(acted);
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Discovered { id, name, rssi } => self.device_discovered(id, name, rssi),
            TransportEvent::Disconnected { id } => self.link_dropped(&id),
            TransportEvent::Notification {
                id,
                characteristic,
                bytes,
            } => self.notification(&id, characteristic, &bytes),
            TransportEvent::AdapterLost => self.adapter_lost(),
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::ScanStarted { generation, result } => self.scan_started(generation, result),
            Completion::Linked {
                epoch,
                device,
                result,
            } => self.link_completed(epoch, device, result),
            Completion::Subscribed {
                epoch,
                device,
                results,
            } => self.subscriptions_completed(epoch, device, results),
        }
    }

    fn emit(&self, event: ScaleEvent) {
        self.events.send(event);
    }

    fn report_error(&self, error: &Error) {
        warn!(code = %error.code(), "{}", error);
        self.emit(ScaleEvent::from_error(error));
    }

    fn publish(&self) {
        self.snapshot.send_replace(
            self.session
                .snapshot(self.registry.device().cloned(), self.registry.auto_connect()),
        );
    }

    /// Apply a transition, announce a state change, and publish.
    fn apply(&mut self, transition: Transition) -> bool {
        let before = self.session.state();
        match self.session.transition(transition) {
            Ok(after) => {
                if after != before {
                    info!(from = %before, to = %after, "Connection state changed");
                    self.emit(ScaleEvent::StateChanged {
                        state: after,
                        device: self.session.device().cloned(),
                    });
                }
                self.publish();
                true
            }
            Err(e) => {
                debug!("Ignoring request: {}", e);
                false
            }
        }
    }

    fn maybe_auto_start(&mut self) {
        if self.auto_started || self.session.state() != ConnectionState::Disconnected {
            return;
        }
        let Some(target) = self.registry.auto_target().cloned() else {
            return;
        };
        info!(device = %target, "Auto-connecting to remembered scale");
        self.auto_started = true;
        self.begin_scan(Some(target));
    }

    fn begin_scan(&mut self, target: Option<DeviceIdentity>) -> bool {
        if self.session.state().apply(Transition::StartScan).is_err() {
            debug!(state = %self.session.state(), "Scan already in progress or connected");
            return false;
        }
        self.cancel_reconnect();
        self.apply(Transition::StartScan);
        self.scan_generation += 1;
        let generation = self.scan_generation;
        self.scan = Some(ActiveScan {
            generation,
            deadline: Instant::now() + self.config.scan_timeout,
            target,
            seen: HashSet::new(),
        });

        let transport = Arc::clone(&self.transport);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = transport.start_scan().await;
            let _ = completions.send(Completion::ScanStarted { generation, result });
        });
        true
    }

    fn scan_started(&mut self, generation: u64, result: Result<()>) {
        let current = self
            .scan
            .as_ref()
            .is_some_and(|scan| scan.generation == generation);
        match result {
            Ok(()) => debug!(generation, "Scan running"),
            Err(e) if current => {
                self.scan = None;
                self.report_error(&e);
                self.apply(Transition::TransportError);
            }
            Err(e) => debug!("Stale scan failed: {}", e),
        }
    }

    /// Drop the active scan and tell the radio to stop.
    fn end_scan(&mut self) -> Option<ActiveScan> {
        let scan = self.scan.take()?;
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(e) = transport.stop_scan().await {
                debug!("Stopping scan failed: {}", e);
            }
        });
        Some(scan)
    }

    fn stop_scan(&mut self) -> bool {
        if self.session.state() != ConnectionState::Scanning {
            return false;
        }
        self.end_scan();
        self.apply(Transition::ScanEnded)
    }

    fn scan_timed_out(&mut self) {
        let Some(scan) = self.end_scan() else {
            return;
        };
        if self.session.state() != ConnectionState::Scanning {
            return;
        }
        info!(timeout = ?self.config.scan_timeout, "Scan finished without a match");
        self.apply(Transition::ScanEnded);
        if scan.target.is_some() || scan.seen.is_empty() {
            self.report_error(&Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
                duration: self.config.scan_timeout,
            }));
        }
    }

    fn device_discovered(&mut self, id: String, name: Option<String>, rssi: Option<i16>) {
        if self.session.state() != ConnectionState::Scanning {
            return;
        }
        let Some(scan) = self.scan.as_mut() else {
            return;
        };

        let target = scan.target.as_ref().filter(|target| target.matches(&id));
        let looks_like_scale = name.as_deref().is_some_and(is_scale_name);
        if target.is_none() && self.config.scales_only && !looks_like_scale {
            return;
        }

        let display_name = name
            .or_else(|| target.map(|target| target.display_name.clone()))
            .unwrap_or_else(|| id.clone());
        let is_target = target.is_some();
        let first_sighting = scan.seen.insert(normalize_identifier(&id));
        let device = DeviceIdentity::new(id, display_name);

        if first_sighting {
            debug!(%device, ?rssi, "Discovered scale");
            self.emit(ScaleEvent::DeviceDiscovered {
                device: device.clone(),
                rssi,
            });
        }
        if is_target {
            info!(%device, "Found remembered scale");
            self.connect(device, Transition::DeviceFound);
        }
    }

    fn select_device(&mut self, device: DeviceIdentity) -> bool {
        match self.session.state() {
            ConnectionState::Scanning => self.connect(device, Transition::DeviceFound),
            ConnectionState::Disconnected => self.begin_scan(Some(device)),
            _ => false,
        }
    }

    /// Start a new session epoch and spawn the connect.
    fn connect(&mut self, device: DeviceIdentity, transition: Transition) -> bool {
        if self.session.state().apply(transition).is_err() {
            debug!(?transition, state = %self.session.state(), "Not connecting");
            return false;
        }
        self.end_scan();
        let (epoch, token) = self.session.begin(device.clone());
        self.tracker.reset();
        self.apply(transition);

        let transport = Arc::clone(&self.transport);
        let completions = self.completions.clone();
        let timeout = self.config.connect_timeout;
        let id = device.id.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => Err(Error::Cancelled),
                result = tokio::time::timeout(timeout, transport.connect(&id)) => {
                    result.unwrap_or_else(|_| Err(Error::timeout("connect", timeout)))
                }
            };
            let _ = completions.send(Completion::Linked {
                epoch,
                device,
                result,
            });
        });
        true
    }

    fn link_completed(&mut self, epoch: u64, device: DeviceIdentity, result: Result<()>) {
        if !self.session.is_current(epoch) {
            if result.is_ok() && !self.owns_link(&device) {
                debug!(%device, "Closing link from an abandoned session");
                self.spawn_teardown(device.id, Vec::new());
            }
            return;
        }

        match result {
            Ok(()) => {
                info!(%device, "Link established");
                self.policy.reset();
                self.reconnecting = false;
                self.reconnect_at = None;
                self.session.set_attempt(0);
                if let Err(e) = self.registry.remember(&device) {
                    self.report_error(&Error::from(e));
                }
                self.apply(Transition::LinkEstablished);
                self.spawn_subscribe(epoch, device);
            }
            Err(e) => self.fail(e),
        }
    }

    fn spawn_subscribe(&self, epoch: u64, device: DeviceIdentity) {
        let transport = Arc::clone(&self.transport);
        let completions = self.completions.clone();
        let token = self.session.cancel_token();
        let timeout = self.config.subscribe_timeout;
        let id = device.id.clone();
        tokio::spawn(async move {
            let mut results = Vec::with_capacity(MeasurementCharacteristic::ALL.len());
            for characteristic in MeasurementCharacteristic::ALL {
                let result = tokio::select! {
                    _ = token.cancelled() => return,
                    result = tokio::time::timeout(timeout, transport.subscribe(&id, characteristic)) => {
                        result.unwrap_or_else(|_| {
                            Err(Error::timeout(format!("subscribe to {characteristic}"), timeout))
                        })
                    }
                };
                results.push((characteristic, result));
            }
            let _ = completions.send(Completion::Subscribed {
                epoch,
                device,
                results,
            });
        });
    }

    fn subscriptions_completed(
        &mut self,
        epoch: u64,
        device: DeviceIdentity,
        results: Vec<(MeasurementCharacteristic, Result<()>)>,
    ) {
        if !self.session.is_current(epoch) {
            if self.owns_link(&device) {
                return;
            }
            let established = results
                .iter()
                .filter(|(_, result)| result.is_ok())
                .map(|(characteristic, _)| *characteristic)
                .collect();
            self.spawn_teardown(device.id, established);
            return;
        }

        let mut first_error = None;
        for (characteristic, result) in results {
            match result {
                Ok(()) => {
                    debug!(%characteristic, "Notifications enabled");
                    self.session.mark_subscribed(characteristic);
                }
                Err(e) => {
                    warn!(%characteristic, "Subscription failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if self.session.subscribed().is_empty() {
            let error = first_error.unwrap_or_else(|| {
                Error::subscription_failed(
                    MeasurementCharacteristic::WeightScale,
                    "no measurement characteristic available",
                )
            });
            self.fail(error);
        } else {
            self.apply(Transition::SubscribeSucceeded);
        }
    }

    /// The current session is using, or bringing up, a link to `device`.
    ///
    /// Links are per peripheral, so a late result from an abandoned session
    /// must not tear down one that a newer session shares.
    fn owns_link(&self, device: &DeviceIdentity) -> bool {
        matches!(
            self.session.state(),
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reading
        ) && self
            .session
            .device()
            .is_some_and(|current| current.matches(&device.id))
    }

    /// Unsubscribe and disconnect in the background, ignoring failures.
    fn spawn_teardown(&self, id: String, subscribed: Vec<MeasurementCharacteristic>) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            for characteristic in subscribed {
                if let Err(e) = transport.unsubscribe(&id, characteristic).await {
                    debug!(%characteristic, "Unsubscribe failed: {}", e);
                }
            }
            if let Err(e) = transport.disconnect(&id).await {
                debug!("Disconnect from {} failed: {}", id, e);
            }
        });
    }

    /// Tear down the current epoch's link, if it may exist.
    fn release_link(&self, state: ConnectionState) {
        let subscribed = self.session.subscribed().iter().copied().collect();
        let link_possible = matches!(
            state,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reading
        );
        if link_possible && let Some(device) = self.session.device() {
            self.spawn_teardown(device.id.clone(), subscribed);
        }
    }

    /// A transport operation failed: move to `Error` and retry if a reconnect
    /// episode is running.
    fn fail(&mut self, error: Error) {
        self.report_error(&error);
        let state = self.session.state();
        self.release_link(state);
        self.session.end_epoch();
        self.apply(Transition::TransportError);
        if self.reconnecting {
            self.schedule_reconnect();
        }
    }

    fn link_dropped(&mut self, id: &str) {
        let Some(device) = self
            .session
            .device()
            .filter(|device| device.matches(id))
            .cloned()
        else {
            return;
        };
        if self.session.explicit_disconnect() {
            debug!(%device, "Link closed on request");
            return;
        }

        match self.session.state() {
            ConnectionState::Connected | ConnectionState::Reading => {
                warn!(%device, "Link lost");
                self.session.end_epoch();
                self.tracker.reset();
                self.apply(Transition::LinkLost);
                if self
                    .registry
                    .auto_target()
                    .is_some_and(|target| target.matches(&device.id))
                {
                    self.reconnecting = true;
                    self.schedule_reconnect();
                }
            }
            ConnectionState::Connecting => self.fail(Error::connection_failed(
                Some(device.id),
                ConnectionFailureReason::LinkLost,
            )),
            _ => {}
        }
    }

    fn schedule_reconnect(&mut self) {
        match self.policy.record_attempt() {
            ReconnectDecision::Attempt { attempt, delay } => {
                let max_attempts = self.policy.options().max_attempts;
                info!(attempt, max_attempts, "Reconnecting in {:?}", delay);
                self.session.set_attempt(attempt);
                self.reconnect_at = Some(Instant::now() + delay);
                self.emit(ScaleEvent::ReconnectScheduled {
                    attempt,
                    max_attempts,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                });
                self.publish();
            }
            ReconnectDecision::Exhausted { attempts } => {
                let error = Error::ReconnectExhausted { attempts };
                warn!(code = %error.code(), "{}", error);
                self.reconnecting = false;
                self.reconnect_at = None;
                self.session.set_attempt(0);
                self.emit(ScaleEvent::ReconnectExhausted { attempts });
                self.apply(Transition::GiveUp);
            }
            ReconnectDecision::Idle => {
                self.reconnecting = false;
                self.reconnect_at = None;
            }
        }
    }

    fn reconnect_due(&mut self) {
        self.reconnect_at = None;
        if !self.reconnecting {
            return;
        }
        let target = self
            .registry
            .auto_target()
            .or(self.session.device())
            .cloned();
        let Some(device) = target else {
            self.reconnecting = false;
            return;
        };
        debug!(attempt = self.policy.attempts(), %device, "Reconnect attempt");
        if !self.connect(device, Transition::ReconnectAttempt) {
            self.reconnecting = false;
        }
    }

    fn cancel_reconnect(&mut self) {
        self.reconnecting = false;
        self.reconnect_at = None;
        self.policy.reset();
        self.session.set_attempt(0);
    }

    fn manual_reconnect(&mut self) -> bool {
        if !matches!(
            self.session.state(),
            ConnectionState::Disconnected | ConnectionState::Error
        ) {
            return false;
        }
        let target = self
            .registry
            .device()
            .or(self.session.device())
            .cloned();
        let Some(device) = target else {
            return false;
        };
        self.cancel_reconnect();
        self.reconnecting = self.registry.auto_connect();
        self.connect(device, Transition::ReconnectAttempt)
    }

    fn disconnect(&mut self) -> bool {
        let state = self.session.state();
        if state == ConnectionState::Disconnected && !self.reconnecting && self.scan.is_none() {
            return false;
        }
        info!(%state, "Disconnecting");
        self.cancel_reconnect();
        self.end_scan();
        self.release_link(state);
        self.session.end_explicitly();
        self.tracker.reset();
        self.apply(Transition::Reset)
    }

    fn acknowledge_error(&mut self) -> bool {
        if self.session.state() != ConnectionState::Error {
            return false;
        }
        self.cancel_reconnect();
        self.apply(Transition::AcknowledgeError)
    }

    fn forget_device(&mut self) -> bool {
        self.disconnect();
        self.session.clear_device();
        self.auto_started = false;
        let forgotten = match self.registry.forget() {
            Ok(forgotten) => forgotten.is_some(),
            Err(e) => {
                self.report_error(&Error::from(e));
                false
            }
        };
        self.publish();
        forgotten
    }

    fn set_auto_connect(&mut self, enabled: bool) -> bool {
        if let Err(e) = self.registry.set_auto_connect(enabled) {
            self.report_error(&Error::from(e));
            return false;
        }
        if !enabled && self.reconnecting {
            info!("Auto-connect disabled, cancelling reconnection");
            self.cancel_reconnect();
        }
        self.publish();
        if enabled {
            self.maybe_auto_start();
        }
        true
    }

    fn notification(&mut self, id: &str, characteristic: MeasurementCharacteristic, bytes: &Bytes) {
        if !self.session.state().is_linked()
            || !self.session.device().is_some_and(|device| device.matches(id))
        {
            return;
        }

        let reading = match frame::decode_bytes(characteristic, bytes) {
            Ok(reading) => reading.with_captured_at(OffsetDateTime::now_utc()),
            Err(e) => {
                let error = Error::from(e);
                warn!(%characteristic, "Dropping undecodable frame: {}", error);
                self.emit(ScaleEvent::from_error(&error));
                return;
            }
        };

        // Unsettled weights are display-only; only stable ones reach the gate.
        if !self.tracker.observe(&reading) {
            self.emit(ScaleEvent::LiveWeight {
                weight_kg: reading.weight_kg,
            });
            return;
        }

        match self.gate.offer(&reading) {
            GateOutcome::Accepted(measurement) => {
                info!(
                    weight_kg = measurement.weight_kg,
                    impedance_ohm = ?measurement.impedance_ohm,
                    "Measurement accepted"
                );
                self.emit(ScaleEvent::MeasurementAccepted { measurement });
            }
            GateOutcome::OutOfRange { weight_kg } => {
                debug!(code = %ErrorCode::OutOfRange, "{}", Error::OutOfRange { weight_kg });
            }
            GateOutcome::Debounced { .. } => {}
        }
    }

    fn adapter_lost(&mut self) {
        let state = self.session.state();
        self.scan = None;
        self.reconnecting = false;
        self.reconnect_at = None;
        self.release_link(state);
        self.session.end_epoch();
        self.report_error(&Error::TransportUnavailable(
            "Bluetooth adapter lost".to_string(),
        ));
        self.apply(Transition::TransportError);
    }
}
