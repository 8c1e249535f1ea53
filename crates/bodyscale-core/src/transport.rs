//! The radio boundary.
//!
//! The engine never touches Bluetooth directly. It drives a
//! [`ScaleTransport`] and listens to the [`TransportEvent`]s the transport
//! pushes into a [`TransportSink`]. [`crate::BtleplugTransport`] talks to a
//! real adapter; [`crate::MockTransport`] scripts one for tests and demos.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use bodyscale_types::MeasurementCharacteristic;

use crate::error::Result;

/// Something the radio observed on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A device advertised while scanning.
    Discovered {
        id: String,
        name: Option<String>,
        rssi: Option<i16>,
    },
    /// A link dropped.
    Disconnected { id: String },
    /// A subscribed characteristic notified.
    Notification {
        id: String,
        characteristic: MeasurementCharacteristic,
        bytes: Bytes,
    },
    /// The adapter went away.
    AdapterLost,
}

/// Where a transport delivers its events.
///
/// Cheap to clone; every clone feeds the same engine.
#[derive(Debug, Clone)]
pub struct TransportSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportSink {
    /// Create a sink and the receiver the engine consumes.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver an event. Returns `false` once the engine has stopped.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Report a discovered device.
    pub fn discovered(&self, id: impl Into<String>, name: Option<String>, rssi: Option<i16>) -> bool {
        self.send(TransportEvent::Discovered {
            id: id.into(),
            name,
            rssi,
        })
    }

    /// Report a dropped link.
    pub fn disconnected(&self, id: impl Into<String>) -> bool {
        self.send(TransportEvent::Disconnected { id: id.into() })
    }

    /// Report a notification.
    pub fn notification(
        &self,
        id: impl Into<String>,
        characteristic: MeasurementCharacteristic,
        bytes: impl Into<Bytes>,
    ) -> bool {
        self.send(TransportEvent::Notification {
            id: id.into(),
            characteristic,
            bytes: bytes.into(),
        })
    }

    /// Whether the engine is still listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Operations the engine needs from a radio.
///
/// Calls return once the operation has completed or failed; timeouts are
/// applied by the engine. Unsolicited events go to the sink passed to
/// [`open`](Self::open).
#[async_trait]
pub trait ScaleTransport: Send + Sync + 'static {
    /// Prepare the radio and remember where to send events.
    async fn open(&self, sink: TransportSink) -> Result<()>;

    /// Start reporting advertisements.
    async fn start_scan(&self) -> Result<()>;

    /// Stop reporting advertisements.
    async fn stop_scan(&self) -> Result<()>;

    /// Establish a link to `id` and discover its services.
    async fn connect(&self, id: &str) -> Result<()>;

    /// Enable notifications for `characteristic` on `id`.
    async fn subscribe(&self, id: &str, characteristic: MeasurementCharacteristic) -> Result<()>;

    /// Disable notifications for `characteristic` on `id`.
    async fn unsubscribe(&self, id: &str, characteristic: MeasurementCharacteristic) -> Result<()>;

    /// Drop the link to `id`.
    async fn disconnect(&self, id: &str) -> Result<()>;
}
