//! Platform-agnostic types for Bluetooth body-composition scales.
//!
//! This crate holds everything about a scale that does not need a radio:
//! the data model shared by the engine and its callers, the GATT UUIDs a
//! scale exposes, and the pure decoder for measurement frames.
//!
//! # Features
//!
//! - Decoding of Weight Measurement and Body Composition Measurement frames
//! - Device identity and scale name matching
//! - UUID constants for the scale services and characteristics
//! - Error types for frame decoding
//!
//! # Example
//!
//! ```
//! use bodyscale_types::{MeasurementCharacteristic, RawFrame, frame};
//!
//! let raw = RawFrame::new(MeasurementCharacteristic::WeightScale, vec![0x20, 0xDA, 0x1B]);
//! let reading = frame::decode(&raw).unwrap();
//! assert!((reading.weight_kg - 71.3).abs() < 1e-9);
//! assert!(reading.is_stable_flag);
//! ```

pub mod error;
pub mod frame;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use frame::{FieldLayout, body_composition_layout, decode, weight_scale_layout};
pub use types::{
    AcceptedMeasurement, DecodedReading, DeviceIdentity, LB_TO_KG, MAX_PLAUSIBLE_WEIGHT_KG,
    MIN_PLAUSIBLE_WEIGHT_KG, MeasurementCharacteristic, RawFrame, WeightUnit, is_scale_name,
    normalize_identifier, round_weight,
};
