//! Engine events for downstream consumers.
//!
//! The engine publishes every state change, live weight, accepted
//! measurement, and error as a [`ScaleEvent`] on a broadcast channel. Hosts
//! either consume the channel directly or implement [`ScaleObserver`] and
//! let [`dispatch_events`] drive it.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use bodyscale_types::{AcceptedMeasurement, DeviceIdentity};

use crate::error::{Error, ErrorCode};
use crate::state::ConnectionState;

/// Events emitted by the engine.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ScaleEvent {
    /// The connection state changed.
    StateChanged {
        state: ConnectionState,
        device: Option<DeviceIdentity>,
    },
    /// A device was seen while scanning.
    DeviceDiscovered {
        device: DeviceIdentity,
        rssi: Option<i16>,
    },
    /// A decoded weight, stable or not. For display only.
    LiveWeight { weight_kg: f64 },
    /// A validated, debounced measurement.
    MeasurementAccepted { measurement: AcceptedMeasurement },
    /// Something went wrong.
    Error {
        code: ErrorCode,
        message: String,
        recoverable: bool,
        suggestion: Option<String>,
    },
    /// A reconnection attempt is scheduled.
    ReconnectScheduled {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },
    /// Automatic reconnection gave up.
    ReconnectExhausted { attempts: u32 },
}

impl ScaleEvent {
    /// Build an `Error` event from an engine error.
    pub fn from_error(error: &Error) -> Self {
        Self::Error {
            code: error.code(),
            message: error.to_string(),
            recoverable: error.is_recoverable(),
            suggestion: error.suggestion().map(str::to_string),
        }
    }
}

/// Sender for engine events.
pub type EventSender = broadcast::Sender<ScaleEvent>;

/// Receiver for engine events.
pub type EventReceiver = broadcast::Receiver<ScaleEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: ScaleEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Callback-style consumer of engine events.
///
/// Every method has an empty default, so implement only what you need.
pub trait ScaleObserver: Send {
    fn on_state_changed(&mut self, _state: ConnectionState, _device: Option<&DeviceIdentity>) {}

    fn on_device_discovered(&mut self, _device: &DeviceIdentity, _rssi: Option<i16>) {}

    fn on_live_weight(&mut self, _weight_kg: f64) {}

    fn on_measurement_accepted(&mut self, _measurement: &AcceptedMeasurement) {}

    fn on_error(
        &mut self,
        _code: ErrorCode,
        _message: &str,
        _recoverable: bool,
        _suggestion: Option<&str>,
    ) {
    }

    fn on_reconnect_scheduled(&mut self, _attempt: u32, _max_attempts: u32, _delay_ms: u64) {}

    fn on_reconnect_exhausted(&mut self, _attempts: u32) {}
}

/// Route one event to the matching observer method.
pub fn notify(observer: &mut (impl ScaleObserver + ?Sized), event: &ScaleEvent) {
    match event {
        ScaleEvent::StateChanged { state, device } => {
            observer.on_state_changed(*state, device.as_ref())
        }
        ScaleEvent::DeviceDiscovered { device, rssi } => {
            observer.on_device_discovered(device, *rssi)
        }
        ScaleEvent::LiveWeight { weight_kg } => observer.on_live_weight(*weight_kg),
        ScaleEvent::MeasurementAccepted { measurement } => {
            observer.on_measurement_accepted(measurement)
        }
        ScaleEvent::Error {
            code,
            message,
            recoverable,
            suggestion,
        } => observer.on_error(*code, message, *recoverable, suggestion.as_deref()),
        ScaleEvent::ReconnectScheduled {
            attempt,
            max_attempts,
            delay_ms,
        } => observer.on_reconnect_scheduled(*attempt, *max_attempts, *delay_ms),
        ScaleEvent::ReconnectExhausted { attempts } => observer.on_reconnect_exhausted(*attempts),
    }
}

/// Feed events from `rx` to `observer` until the engine shuts down.
///
/// Returns the number of events skipped because the observer fell behind.
pub async fn dispatch_events(
    mut rx: EventReceiver,
    observer: &mut (impl ScaleObserver + ?Sized),
) -> u64 {
    let mut skipped = 0;
    loop {
        match rx.recv().await {
            Ok(event) => notify(observer, &event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Observer lagged behind, skipped {} events", n);
                skipped += n;
            }
            Err(broadcast::error::RecvError::Closed) => return skipped,
        }
    }
}
