//! [`ScaleTransport`] over a real Bluetooth adapter via btleplug.
//!
//! One task follows the adapter's central event stream and turns discovery
//! and disconnect events into [`TransportEvent`]s. Each connected scale gets
//! a second task forwarding its measurement notifications.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use bodyscale_types::{MeasurementCharacteristic, normalize_identifier, uuid};

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::transport::{ScaleTransport, TransportEvent, TransportSink};

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// The identifier a scale is known by.
///
/// Linux and Windows expose the Bluetooth address. macOS reports
/// `00:00:00:00:00:00` and only offers a CoreBluetooth UUID, which is
/// extracted from the peripheral id's debug form.
fn peripheral_identifier(address: &str, id: &PeripheralId) -> String {
    if address != "00:00:00:00:00:00" {
        return address.to_string();
    }
    let raw = format!("{:?}", id);
    raw.strip_prefix("PeripheralId(")
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(raw.as_str())
        .to_string()
}

#[derive(Debug, Default)]
struct KnownPeripherals {
    /// Normalized identifier to (identifier, peripheral).
    by_identifier: HashMap<String, (String, Peripheral)>,
    by_id: HashMap<PeripheralId, String>,
}

impl KnownPeripherals {
    fn insert(&mut self, identifier: String, peripheral: Peripheral) {
        self.by_id.insert(peripheral.id(), identifier.clone());
        self.by_identifier
            .insert(normalize_identifier(&identifier), (identifier, peripheral));
    }

    fn get(&self, identifier: &str) -> Option<Peripheral> {
        self.by_identifier
            .get(&normalize_identifier(identifier))
            .map(|(_, peripheral)| peripheral.clone())
    }

    fn identifier_of(&self, id: &PeripheralId) -> Option<String> {
        self.by_id.get(id).cloned()
    }
}

/// Bluetooth transport backed by the first system adapter.
#[derive(Default)]
pub struct BtleplugTransport {
    adapter: RwLock<Option<Adapter>>,
    known: Arc<RwLock<KnownPeripherals>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    notification_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    sink: RwLock<Option<TransportSink>>,
}

impl std::fmt::Debug for BtleplugTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugTransport").finish_non_exhaustive()
    }
}

impl BtleplugTransport {
    /// Create a transport. Nothing touches the radio until `open`.
    pub fn new() -> Self {
        Self::default()
    }

    async fn adapter(&self) -> Result<Adapter> {
        self.adapter
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::TransportUnavailable("transport not opened".to_string()))
    }

    async fn sink(&self) -> Result<TransportSink> {
        self.sink
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::TransportUnavailable("transport not opened".to_string()))
    }

    /// Resolve an identifier to a peripheral, asking the adapter if it was
    /// not seen in this process.
    async fn peripheral(&self, identifier: &str) -> Result<Peripheral> {
        if let Some(peripheral) = self.known.read().await.get(identifier) {
            return Ok(peripheral);
        }

        let adapter = self.adapter().await?;
        let wanted = normalize_identifier(identifier);
        for peripheral in adapter.peripherals().await? {
            let Some(properties) = peripheral.properties().await? else {
                continue;
            };
            let found = peripheral_identifier(&properties.address.to_string(), &peripheral.id());
            if normalize_identifier(&found) == wanted {
                self.known.write().await.insert(found, peripheral.clone());
                return Ok(peripheral);
            }
        }
        Err(Error::device_not_found(identifier))
    }

    fn characteristic(
        peripheral: &Peripheral,
        characteristic: MeasurementCharacteristic,
    ) -> Result<Characteristic> {
        let wanted = characteristic.uuid();
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == wanted)
            .ok_or_else(|| Error::subscription_failed(characteristic, "characteristic not found"))
    }

    async fn handle_central_event(
        adapter: &Adapter,
        known: &RwLock<KnownPeripherals>,
        sink: &TransportSink,
        event: CentralEvent,
    ) -> Result<()> {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let peripheral = adapter.peripheral(&id).await?;
                let Some(properties) = peripheral.properties().await? else {
                    return Ok(());
                };
                let identifier = peripheral_identifier(&properties.address.to_string(), &id);
                known.write().await.insert(identifier.clone(), peripheral);
                sink.discovered(identifier, properties.local_name, properties.rssi);
            }
            CentralEvent::DeviceDisconnected(id) => {
                if let Some(identifier) = known.read().await.identifier_of(&id) {
                    debug!("Link to {} dropped", identifier);
                    sink.disconnected(identifier);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl ScaleTransport for BtleplugTransport {
    #[tracing::instrument(level = "info", skip_all)]
    async fn open(&self, sink: TransportSink) -> Result<()> {
        let adapter = get_adapter().await.map_err(|e| match e {
            Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter) => {
                Error::TransportUnavailable("no Bluetooth adapter available".to_string())
            }
            other => other,
        })?;
        let mut events = adapter.events().await?;
        info!("Bluetooth adapter ready");

        let task_adapter = adapter.clone();
        let known = Arc::clone(&self.known);
        let task_sink = sink.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) =
                    Self::handle_central_event(&task_adapter, &known, &task_sink, event).await
                {
                    debug!("Ignoring central event: {}", e);
                }
                if task_sink.is_closed() {
                    return;
                }
            }
            warn!("Adapter event stream ended");
            task_sink.send(TransportEvent::AdapterLost);
        });

        *self.adapter.write().await = Some(adapter);
        *self.sink.write().await = Some(sink);
        if let Some(previous) = self.event_task.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn start_scan(&self) -> Result<()> {
        let adapter = self.adapter().await?;
        // Many scales advertise no service UUIDs, so filter by name upstream.
        adapter.start_scan(ScanFilter::default()).await?;
        info!("Scanning for scales...");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let adapter = self.adapter().await?;
        adapter.stop_scan().await?;
        debug!("Scan stopped");
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn connect(&self, id: &str) -> Result<()> {
        let peripheral = self.peripheral(id).await?;
        let sink = self.sink().await?;

        info!("Connecting to scale...");
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        info!("Connected, discovering services...");
        peripheral.discover_services().await?;
        let services: Vec<String> = peripheral
            .services()
            .iter()
            .map(|service| match uuid::to_short(&service.uuid) {
                Some(short) => format!("0x{short:04X}"),
                None => service.uuid.to_string(),
            })
            .collect();
        debug!(?services, "Discovered services");

        let mut notifications = peripheral.notifications().await?;
        let identifier = id.to_string();
        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let Some(characteristic) = MeasurementCharacteristic::from_uuid(&notification.uuid)
                else {
                    continue;
                };
                if !sink.notification(identifier.as_str(), characteristic, notification.value) {
                    return;
                }
            }
        });
        if let Some(previous) = self
            .notification_tasks
            .lock()
            .await
            .insert(normalize_identifier(id), handle)
        {
            previous.abort();
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn subscribe(&self, id: &str, characteristic: MeasurementCharacteristic) -> Result<()> {
        let peripheral = self.peripheral(id).await?;
        let target = Self::characteristic(&peripheral, characteristic)?;
        peripheral
            .subscribe(&target)
            .await
            .map_err(|e| Error::subscription_failed(characteristic, e.to_string()))?;
        debug!("Subscribed to {}", characteristic);
        Ok(())
    }

    async fn unsubscribe(&self, id: &str, characteristic: MeasurementCharacteristic) -> Result<()> {
        let peripheral = self.peripheral(id).await?;
        let target = Self::characteristic(&peripheral, characteristic)?;
        peripheral.unsubscribe(&target).await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn disconnect(&self, id: &str) -> Result<()> {
        if let Some(handle) = self
            .notification_tasks
            .lock()
            .await
            .remove(&normalize_identifier(id))
        {
            handle.abort();
        }
        let peripheral = self.peripheral(id).await?;
        if peripheral.is_connected().await? {
            info!("Disconnecting from scale...");
            peripheral.disconnect().await?;
        }
        Ok(())
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.event_task.get_mut().take() {
            handle.abort();
        }
        for (_, handle) in self.notification_tasks.get_mut().drain() {
            handle.abort();
        }
    }
}
