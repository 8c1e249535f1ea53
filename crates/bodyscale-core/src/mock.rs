//! Mock transport for testing.
//!
//! [`MockTransport`] implements [`ScaleTransport`] without any hardware. A
//! test keeps a clone to script the radio: which scales advertise, which
//! operations fail, and what the scale sends.
//!
//! # Features
//!
//! - **Failure injection**: fail scans, connects (always or the next N), or
//!   individual subscriptions
//! - **Latency simulation**: delay connects to observe intermediate states
//! - **Peer events**: drop the link or lose the adapter from the scale side
//!
//! # Example
//!
//! ```
//! use bodyscale_core::{MockTransport, ScaleTransport, TransportSink};
//! use bodyscale_types::MeasurementCharacteristic;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mock = MockTransport::new();
//!     let id = mock.add_scale("MIBFS");
//!     let (sink, _events) = TransportSink::channel();
//!
//!     mock.open(sink).await.unwrap();
//!     mock.connect(&id).await.unwrap();
//!     mock.subscribe(&id, MeasurementCharacteristic::WeightScale).await.unwrap();
//!     assert!(mock.send_weight(&id, 71.3, true));
//! }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use bodyscale_types::{MeasurementCharacteristic, normalize_identifier};

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::transport::{ScaleTransport, TransportEvent, TransportSink};

/// A scripted peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPeripheral {
    /// Identifier reported in discovery.
    pub id: String,
    /// Advertised name.
    pub name: Option<String>,
    /// Signal strength.
    pub rssi: Option<i16>,
}

#[derive(Debug, Default)]
struct MockInner {
    sink: Mutex<Option<TransportSink>>,
    peripherals: Mutex<Vec<MockPeripheral>>,
    /// Normalized id to subscribed characteristics.
    links: Mutex<HashMap<String, BTreeSet<MeasurementCharacteristic>>>,
    failing_subscriptions: Mutex<BTreeSet<MeasurementCharacteristic>>,
    scanning: AtomicBool,
    fail_open: AtomicBool,
    fail_scan: AtomicBool,
    fail_connect: AtomicBool,
    remaining_connect_failures: AtomicU32,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
    scan_count: AtomicU32,
    connect_count: AtomicU32,
    disconnect_count: AtomicU32,
}

/// State is never locked across an await, so a poisoned lock still holds
/// consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A scriptable in-memory radio.
///
/// Clones share state, so one clone can be handed to the engine while the
/// test drives the other.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// A radio with no peripherals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an advertising scale with a random identifier and return it.
    pub fn add_scale(&self, name: &str) -> String {
        let id = format!("MOCK-{:06X}", rand::random::<u32>() % 0xFF_FFFF);
        self.add_peripheral(MockPeripheral {
            id: id.clone(),
            name: Some(name.to_string()),
            rssi: Some(-55),
        });
        id
    }

    /// Add an advertising peripheral.
    pub fn add_peripheral(&self, peripheral: MockPeripheral) {
        lock(&self.inner.peripherals).push(peripheral);
    }

    /// Make `open` fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make `start_scan` fail.
    pub fn set_fail_scan(&self, fail: bool) {
        self.inner.fail_scan.store(fail, Ordering::SeqCst);
    }

    /// Make every connect fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` connects fail, then succeed.
    pub fn fail_next_connects(&self, count: u32) {
        self.inner
            .remaining_connect_failures
            .store(count, Ordering::SeqCst);
    }

    /// Make subscribing to `characteristic` fail.
    pub fn set_fail_subscribe(&self, characteristic: MeasurementCharacteristic, fail: bool) {
        let mut failing = lock(&self.inner.failing_subscriptions);
        if fail {
            failing.insert(characteristic);
        } else {
            failing.remove(&characteristic);
        }
    }

    /// Delay every connect by `latency`.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.inner
            .connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `start_scan` calls.
    pub fn scan_count(&self) -> u32 {
        self.inner.scan_count.load(Ordering::SeqCst)
    }

    /// Number of `connect` calls, failed ones included.
    pub fn connect_count(&self) -> u32 {
        self.inner.connect_count.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_count(&self) -> u32 {
        self.inner.disconnect_count.load(Ordering::SeqCst)
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::SeqCst)
    }

    /// Whether `id` is linked.
    pub fn is_connected(&self, id: &str) -> bool {
        lock(&self.inner.links).contains_key(&normalize_identifier(id))
    }

    /// Characteristics currently subscribed on `id`.
    pub fn subscriptions(&self, id: &str) -> Vec<MeasurementCharacteristic> {
        lock(&self.inner.links)
            .get(&normalize_identifier(id))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn emit(&self, event: TransportEvent) -> bool {
        lock(&self.inner.sink)
            .as_ref()
            .is_some_and(|sink| sink.send(event))
    }

    /// Send a raw notification as if the scale had notified.
    ///
    /// Returns `false` if the transport is not open.
    pub fn send_frame(
        &self,
        id: &str,
        characteristic: MeasurementCharacteristic,
        bytes: impl Into<bytes::Bytes>,
    ) -> bool {
        self.emit(TransportEvent::Notification {
            id: id.to_string(),
            characteristic,
            bytes: bytes.into(),
        })
    }

    /// Send a metric Weight Measurement frame.
    pub fn send_weight(&self, id: &str, weight_kg: f64, stable: bool) -> bool {
        self.send_frame(
            id,
            MeasurementCharacteristic::WeightScale,
            weight_frame(weight_kg, stable),
        )
    }

    /// Send a metric Body Composition Measurement frame.
    pub fn send_body_composition(&self, id: &str, weight_kg: f64, impedance_ohm: Option<f64>) -> bool {
        self.send_frame(
            id,
            MeasurementCharacteristic::BodyComposition,
            body_composition_frame(weight_kg, impedance_ohm),
        )
    }

    /// Re-announce every peripheral, as a fresh advertisement would.
    pub fn advertise(&self) {
        let peripherals = lock(&self.inner.peripherals).clone();
        for peripheral in peripherals {
            self.emit(TransportEvent::Discovered {
                id: peripheral.id,
                name: peripheral.name,
                rssi: peripheral.rssi,
            });
        }
    }

    /// Drop the link from the scale's side.
    pub fn drop_link(&self, id: &str) -> bool {
        lock(&self.inner.links).remove(&normalize_identifier(id));
        self.emit(TransportEvent::Disconnected { id: id.to_string() })
    }

    /// Simulate the adapter disappearing.
    pub fn lose_adapter(&self) -> bool {
        lock(&self.inner.links).clear();
        self.inner.scanning.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::AdapterLost)
    }

    fn take_connect_failure(&self) -> bool {
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return true;
        }
        self.inner
            .remaining_connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ScaleTransport for MockTransport {
    async fn open(&self, sink: TransportSink) -> Result<()> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(Error::TransportUnavailable("mock adapter powered off".to_string()));
        }
        *lock(&self.inner.sink) = Some(sink);
        Ok(())
    }

    async fn start_scan(&self) -> Result<()> {
        self.inner.scan_count.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_scan.load(Ordering::SeqCst) {
            return Err(Error::TransportUnavailable("mock scan failure".to_string()));
        }
        self.inner.scanning.store(true, Ordering::SeqCst);
        self.advertise();
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.inner.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<()> {
        self.inner.connect_count.fetch_add(1, Ordering::SeqCst);

        let latency = self.inner.connect_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.take_connect_failure() {
            return Err(Error::connection_failed(
                Some(id.to_string()),
                ConnectionFailureReason::Other("mock connect failure".to_string()),
            ));
        }

        let wanted = normalize_identifier(id);
        let known = lock(&self.inner.peripherals)
            .iter()
            .any(|p| normalize_identifier(&p.id) == wanted);
        if !known {
            return Err(Error::device_not_found(id));
        }

        lock(&self.inner.links).entry(wanted).or_default();
        Ok(())
    }

    async fn subscribe(&self, id: &str, characteristic: MeasurementCharacteristic) -> Result<()> {
        if lock(&self.inner.failing_subscriptions).contains(&characteristic) {
            return Err(Error::subscription_failed(
                characteristic,
                "mock subscription failure",
            ));
        }
        let mut links = lock(&self.inner.links);
        let subscribed = links
            .get_mut(&normalize_identifier(id))
            .ok_or(Error::NotConnected)?;
        subscribed.insert(characteristic);
        Ok(())
    }

    async fn unsubscribe(&self, id: &str, characteristic: MeasurementCharacteristic) -> Result<()> {
        let mut links = lock(&self.inner.links);
        let subscribed = links
            .get_mut(&normalize_identifier(id))
            .ok_or(Error::NotConnected)?;
        subscribed.remove(&characteristic);
        Ok(())
    }

    async fn disconnect(&self, id: &str) -> Result<()> {
        self.inner.disconnect_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.links).remove(&normalize_identifier(id));
        Ok(())
    }
}

/// Encode a metric Weight Measurement frame.
pub fn weight_frame(weight_kg: f64, stable: bool) -> Vec<u8> {
    let raw = (weight_kg * 100.0).round() as u16;
    let flags = if stable { 0x20 } else { 0x00 };
    let mut frame = vec![flags];
    frame.extend_from_slice(&raw.to_le_bytes());
    frame
}

/// Encode a metric Body Composition Measurement frame.
pub fn body_composition_frame(weight_kg: f64, impedance_ohm: Option<f64>) -> Vec<u8> {
    let mut flags: u16 = 0x0400;
    if impedance_ohm.is_some() {
        flags |= 0x0200;
    }
    let mut frame = flags.to_le_bytes().to_vec();
    frame.extend_from_slice(&[0x00, 0x00]);
    if let Some(ohm) = impedance_ohm {
        frame.extend_from_slice(&((ohm * 10.0).round() as u16).to_le_bytes());
    }
    frame.extend_from_slice(&((weight_kg / 0.005).round() as u16).to_le_bytes());
    frame
}
