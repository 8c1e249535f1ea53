//! Core types for scale measurement data.

use core::fmt;

use bytes::Bytes;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime};

/// Pounds to kilograms.
pub const LB_TO_KG: f64 = 0.453_592;

/// Lowest weight, in kilograms, a scale reading may carry to be accepted.
pub const MIN_PLAUSIBLE_WEIGHT_KG: f64 = 2.0;

/// Highest weight, in kilograms, a scale reading may carry to be accepted.
pub const MAX_PLAUSIBLE_WEIGHT_KG: f64 = 300.0;

/// The measurement characteristics this library understands.
///
/// The characteristic that delivered a notification selects the frame
/// layout used to decode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MeasurementCharacteristic {
    /// Weight Measurement (0x2A9D).
    WeightScale,
    /// Body Composition Measurement (0x2A9C).
    BodyComposition,
}

impl MeasurementCharacteristic {
    /// Both characteristics, in subscription order.
    pub const ALL: [MeasurementCharacteristic; 2] = [
        MeasurementCharacteristic::WeightScale,
        MeasurementCharacteristic::BodyComposition,
    ];

    /// BLE characteristic UUID.
    #[must_use]
    pub fn uuid(&self) -> uuid::Uuid {
        match self {
            Self::WeightScale => crate::uuid::WEIGHT_MEASUREMENT,
            Self::BodyComposition => crate::uuid::BODY_COMPOSITION_MEASUREMENT,
        }
    }

    /// Map a characteristic UUID back to the enum, if it is one of ours.
    ///
    /// ```
    /// use bodyscale_types::{MeasurementCharacteristic, uuid};
    ///
    /// assert_eq!(
    ///     MeasurementCharacteristic::from_uuid(&uuid::BODY_COMPOSITION_MEASUREMENT),
    ///     Some(MeasurementCharacteristic::BodyComposition)
    /// );
    /// assert_eq!(MeasurementCharacteristic::from_uuid(&uuid::WEIGHT_SCALE_SERVICE), None);
    /// ```
    #[must_use]
    pub fn from_uuid(uuid: &uuid::Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == *uuid)
    }
}

impl fmt::Display for MeasurementCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WeightScale => write!(f, "Weight Measurement"),
            Self::BodyComposition => write!(f, "Body Composition Measurement"),
        }
    }
}

/// Unit system a frame was reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum WeightUnit {
    /// SI units (kg, m).
    #[default]
    Metric,
    /// Imperial units (lb, in).
    Imperial,
}

/// A remembered scale.
///
/// `id` is the platform identifier used to connect: the Bluetooth address on
/// Linux/Windows, the CoreBluetooth UUID on macOS.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceIdentity {
    /// Platform address or identifier.
    pub id: String,
    /// Advertised name, or a placeholder when the scale advertises none.
    pub display_name: String,
}

impl DeviceIdentity {
    /// Create a new identity.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Whether `other` names the same device as this identity.
    ///
    /// Comparison ignores case and the `:`/`-` separators, so a MAC address
    /// written either way matches.
    ///
    /// ```
    /// use bodyscale_types::DeviceIdentity;
    ///
    /// let scale = DeviceIdentity::new("AA:BB:CC:DD:EE:FF", "MIBFS");
    /// assert!(scale.matches("aa-bb-cc-dd-ee-ff"));
    /// assert!(!scale.matches("AA:BB:CC:DD:EE:00"));
    /// ```
    #[must_use]
    pub fn matches(&self, other: &str) -> bool {
        normalize_identifier(&self.id) == normalize_identifier(other)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// Lowercase an identifier and strip `:` and `-`.
#[must_use]
pub fn normalize_identifier(id: &str) -> String {
    id.chars()
        .filter(|c| *c != ':' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether an advertised name looks like a body-composition scale.
///
/// Matches the naming used by the Xiaomi family (`MIBFS`, `MIBCS`, `XMTZC`,
/// `MI SCALE`, "Xiaomi Scale S400") and generic "body ... scale" names.
///
/// ```
/// use bodyscale_types::is_scale_name;
///
/// assert!(is_scale_name("MIBFS"));
/// assert!(is_scale_name("Xiaomi Scale S400"));
/// assert!(is_scale_name("Smart Body Fat Scale"));
/// assert!(!is_scale_name("Mi Smart Band 7"));
/// ```
#[must_use]
pub fn is_scale_name(name: &str) -> bool {
    let lower = name.to_lowercase();

    const PREFIXES: [&str; 5] = ["mibfs", "mibcs", "xmtzc", "mi scale", "mi_scale"];
    if PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }

    let compact: String = lower.split_whitespace().collect();
    if compact.contains("miscale") {
        return true;
    }

    contains_in_order(&lower, "body", "scale")
        || contains_in_order(&lower, "xiaomi", "scale")
        || contains_in_order(&lower, "scale", "s400")
}

fn contains_in_order(haystack: &str, first: &str, second: &str) -> bool {
    haystack
        .find(first)
        .is_some_and(|pos| haystack[pos + first.len()..].contains(second))
}

/// One notification payload as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Immutable payload.
    pub bytes: Bytes,
    /// Characteristic the payload arrived on.
    pub source: MeasurementCharacteristic,
}

impl RawFrame {
    /// Create a frame from any byte container.
    pub fn new(source: MeasurementCharacteristic, bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            source,
        }
    }
}

/// A reading decoded from a single frame.
///
/// Produced by [`crate::frame::decode`] and never mutated afterwards except
/// for stamping `captured_at`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecodedReading {
    /// Weight in kilograms.
    pub weight_kg: f64,
    /// Bioelectrical impedance in ohms (body composition frames only).
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub impedance_ohm: Option<f64>,
    /// The scale's own "measurement stable" flag.
    pub is_stable_flag: bool,
    /// Unit system the scale reported in.
    pub unit: WeightUnit,
    /// User index, when the frame carries one.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub user_id: Option<u8>,
    /// Scale-side clock, when the frame carries a timestamp.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub device_time: Option<PrimitiveDateTime>,
    /// Body mass index computed by the scale.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub bmi: Option<f64>,
    /// Height in metres.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub height_m: Option<f64>,
    /// When the frame was received.
    ///
    /// Decoding leaves this `None`; the receiver stamps it.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub captured_at: Option<OffsetDateTime>,
}

impl DecodedReading {
    /// A metric weight-only reading.
    #[must_use]
    pub fn from_weight(weight_kg: f64) -> Self {
        Self {
            weight_kg,
            impedance_ohm: None,
            is_stable_flag: false,
            unit: WeightUnit::Metric,
            user_id: None,
            device_time: None,
            bmi: None,
            height_m: None,
            captured_at: None,
        }
    }

    /// Set the impedance.
    #[must_use]
    pub fn with_impedance(mut self, ohm: f64) -> Self {
        self.impedance_ohm = Some(ohm);
        self
    }

    /// Set the scale's stability flag.
    #[must_use]
    pub fn with_stable_flag(mut self, stable: bool) -> Self {
        self.is_stable_flag = stable;
        self
    }

    /// Stamp the receive time.
    #[must_use]
    pub fn with_captured_at(mut self, at: OffsetDateTime) -> Self {
        self.captured_at = Some(at);
        self
    }
}

/// A validated, debounced weight ready for downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AcceptedMeasurement {
    /// Weight in kilograms, rounded to 0.01 kg.
    pub weight_kg: f64,
    /// Impedance in ohms, if the scale measured it.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub impedance_ohm: Option<f64>,
    /// When the measurement was accepted.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

/// Round a weight to two decimal places.
///
/// ```
/// use bodyscale_types::round_weight;
///
/// assert_eq!(round_weight(71.004), 71.0);
/// assert_eq!(round_weight(71.005_1), 71.01);
/// ```
#[must_use]
pub fn round_weight(weight_kg: f64) -> f64 {
    (weight_kg * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristic_uuid_mapping() {
        for c in MeasurementCharacteristic::ALL {
            assert_eq!(MeasurementCharacteristic::from_uuid(&c.uuid()), Some(c));
        }
    }

    #[test]
    fn test_characteristic_display() {
        assert_eq!(
            MeasurementCharacteristic::WeightScale.to_string(),
            "Weight Measurement"
        );
    }

    #[test]
    fn test_identity_matching_ignores_separators_and_case() {
        let id = DeviceIdentity::new("C8:47:8C:12:34:56", "MIBCS");
        assert!(id.matches("c8478c123456"));
        assert!(id.matches("C8-47-8C-12-34-56"));
        assert!(!id.matches("C8:47:8C:12:34:57"));
    }

    #[test]
    fn test_identity_matching_macos_uuid() {
        let id = DeviceIdentity::new("5A1C0E2B-8E7F-4C55-9A55-0D9C3B1E2F10", "Scale");
        assert!(id.matches("5a1c0e2b-8e7f-4c55-9a55-0d9c3b1e2f10"));
    }

    #[test]
    fn test_scale_name_patterns() {
        for name in [
            "MIBFS",
            "MIBCS",
            "XMTZC05HM",
            "MI SCALE2",
            "MI_SCALE",
            "Mi Scale",
            "Mi  Scale",
            "Body Composition Scale",
            "Xiaomi Scale S400",
            "Scale S400",
        ] {
            assert!(is_scale_name(name), "{name} should be a scale");
        }
    }

    #[test]
    fn test_non_scale_names() {
        for name in ["", "Mi Smart Band 7", "Scale", "Bodyguard", "JBL Flip 5"] {
            assert!(!is_scale_name(name), "{name} should not be a scale");
        }
    }

    #[test]
    fn test_round_weight() {
        assert_eq!(round_weight(70.999), 71.0);
        assert_eq!(round_weight(2.0), 2.0);
        assert_eq!(round_weight(85.456), 85.46);
    }

    #[test]
    fn test_decoded_reading_builders() {
        let reading = DecodedReading::from_weight(70.0)
            .with_impedance(512.3)
            .with_stable_flag(true);
        assert_eq!(reading.impedance_ohm, Some(512.3));
        assert!(reading.is_stable_flag);
        assert!(reading.captured_at.is_none());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_accepted_measurement_serializes_rfc3339() {
        let m = AcceptedMeasurement {
            weight_kg: 71.0,
            impedance_ohm: None,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"weight_kg\":71.0"));
        assert!(json.contains("1970-01-01T00:00:00Z"));
        assert!(!json.contains("impedance_ohm"));
    }
}
