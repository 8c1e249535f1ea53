//! Connection and measurement-capture engine for Bluetooth body-composition
//! scales.
//!
//! This crate finds a scale over Bluetooth Low Energy, keeps a link to it,
//! and turns its measurement notifications into validated, debounced
//! weight measurements.
//!
//! # Features
//!
//! - **Discovery**: Scan for scales and recognise them by advertised name
//! - **Auto-connect**: Remember one scale and connect to it on start
//! - **Stability detection**: Wait for the weight to settle before accepting
//! - **Plausibility and debounce**: Drop implausible and duplicate readings
//! - **Auto-reconnection**: Bounded retries after an unexpected disconnect
//! - **Pluggable radio**: Real adapter via btleplug, or a scripted mock
//!
//! # Pipeline
//!
//! Each notification goes through the frame decoder, then the
//! [`StabilityTracker`], then the [`MeasurementGate`]. Weights that have not
//! settled are published as [`ScaleEvent::LiveWeight`]; only stable,
//! plausible, non-duplicate readings become [`ScaleEvent::MeasurementAccepted`].
//!
//! # Platform Differences
//!
//! - **macOS**: Scales are identified by a CoreBluetooth UUID that is stable
//!   on one Mac but differs between Macs.
//! - **Linux/Windows**: Scales are identified by their Bluetooth address
//!   (e.g., `AA:BB:CC:DD:EE:FF`).
//!
//! # Quick Start
//!
//! ```no_run
//! use bodyscale_core::{BtleplugTransport, DeviceRegistry, EngineConfig, ScaleEngine, ScaleEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handle = ScaleEngine::spawn(
//!         BtleplugTransport::new(),
//!         DeviceRegistry::in_memory(),
//!         EngineConfig::default(),
//!     )
//!     .await?;
//!     let mut events = handle.subscribe();
//!     handle.start_scan().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             ScaleEvent::DeviceDiscovered { device, .. } => {
//!                 handle.select_device(device).await?;
//!             }
//!             ScaleEvent::MeasurementAccepted { measurement } => {
//!                 println!("{:.2} kg", measurement.weight_kg);
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod mock;
pub mod reconnect;
pub mod registry;
pub mod stability;
pub mod state;
pub mod transport;

// Re-export types and uuid modules from bodyscale-types
pub use bodyscale_types::types;
pub use bodyscale_types::uuid;

// Core exports
pub use ble::{BtleplugTransport, get_adapter};
pub use config::EngineConfig;
pub use engine::{ScaleEngine, ScaleHandle};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, ErrorCode, Result};
pub use events::{
    EventDispatcher, EventReceiver, EventSender, ScaleEvent, ScaleObserver, dispatch_events,
    notify,
};
pub use gate::{GateConfig, GateOutcome, MeasurementGate};
pub use mock::{MockPeripheral, MockTransport};
pub use reconnect::{ReconnectDecision, ReconnectOptions, ReconnectionPolicy};
pub use registry::{
    DeviceRegistry, FileStore, MemoryStore, RegistryError, RegistryRecord, RegistryStore,
};
pub use stability::{StabilityConfig, StabilityTracker};
pub use state::{ConnectionSession, ConnectionState, InvalidTransition, SessionSnapshot, Transition};
pub use transport::{ScaleTransport, TransportEvent, TransportSink};

// Re-export from bodyscale-types
pub use bodyscale_types::{
    AcceptedMeasurement, DecodedReading, DeviceIdentity, MeasurementCharacteristic, ParseError,
    RawFrame, WeightUnit,
};
