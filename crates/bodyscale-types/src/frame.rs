//! Decoding of scale measurement frames.
//!
//! Two layouts are supported, selected by the characteristic that delivered
//! the notification:
//!
//! | Characteristic | Flags | Weight resolution (metric) |
//! |----------------|-------|----------------------------|
//! | Weight Measurement (0x2A9D) | 1 byte | 0.01 kg |
//! | Body Composition Measurement (0x2A9C) | 2 bytes, LE | 0.005 kg |
//!
//! Imperial frames report weight in 0.01 lb steps in both layouts.
//!
//! Optional fields follow in ascending flag-bit order. The decoder computes
//! every offset from the flags before touching the payload, and rejects a
//! frame whose length does not cover the fields its flags declare. It never
//! returns a partially decoded reading.
//!
//! Decoding is a pure function of the bytes: `captured_at` is always `None`
//! on the result.

use bytes::Buf;
use time::{Date, Month, PrimitiveDateTime, Time};

use crate::error::{ParseError, ParseResult};
use crate::types::{DecodedReading, LB_TO_KG, MeasurementCharacteristic, RawFrame, WeightUnit};

/// Flag bits of the Weight Measurement frame.
pub mod weight_flags {
    /// Weight in 0.01 lb rather than 0.01 kg.
    pub const IMPERIAL: u8 = 0x01;
    /// 7-byte timestamp present.
    pub const TIMESTAMP: u8 = 0x02;
    /// 1-byte user id present.
    pub const USER_ID: u8 = 0x04;
    /// 2-byte BMI and 2-byte height present.
    pub const BMI_HEIGHT: u8 = 0x08;
    /// The scale considers the weight settled.
    pub const STABLE: u8 = 0x20;
}

/// Flag bits of the Body Composition Measurement frame.
pub mod body_flags {
    /// Weight in 0.01 lb rather than 0.005 kg.
    pub const IMPERIAL: u16 = 0x0001;
    /// 7-byte timestamp present.
    pub const TIMESTAMP: u16 = 0x0002;
    /// 1-byte user id present.
    pub const USER_ID: u16 = 0x0004;
    /// 2-byte BMI and 2-byte height present.
    pub const BMI_HEIGHT: u16 = 0x0008;
    /// Muscle percentage present (2 bytes, skipped).
    pub const MUSCLE_PERCENTAGE: u16 = 0x0010;
    /// Muscle mass present (2 bytes, skipped).
    pub const MUSCLE_MASS: u16 = 0x0020;
    /// Fat-free mass present (2 bytes, skipped).
    pub const FAT_FREE_MASS: u16 = 0x0040;
    /// Soft lean mass present (2 bytes, skipped).
    pub const SOFT_LEAN_MASS: u16 = 0x0080;
    /// Body water mass present (2 bytes, skipped).
    pub const BODY_WATER_MASS: u16 = 0x0100;
    /// Impedance present.
    pub const IMPEDANCE: u16 = 0x0200;
    /// Weight present.
    pub const WEIGHT: u16 = 0x0400;
}

const TIMESTAMP_LEN: usize = 7;
const USER_ID_LEN: usize = 1;
const BMI_HEIGHT_LEN: usize = 4;
const U16_LEN: usize = 2;

/// Body composition fields between BMI/height and impedance that are only
/// skipped, in bit order.
const SKIPPED_BODY_FIELDS: [u16; 5] = [
    body_flags::MUSCLE_PERCENTAGE,
    body_flags::MUSCLE_MASS,
    body_flags::FAT_FREE_MASS,
    body_flags::SOFT_LEAN_MASS,
    body_flags::BODY_WATER_MASS,
];

/// Byte offsets of every field a frame's flags declare.
///
/// `None` means the field is absent. `min_len` is the shortest buffer that
/// holds every declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldLayout {
    /// Offset of the weight field.
    pub weight: Option<usize>,
    /// Offset of the timestamp field.
    pub timestamp: Option<usize>,
    /// Offset of the user id byte.
    pub user_id: Option<usize>,
    /// Offset of the BMI/height pair.
    pub bmi_height: Option<usize>,
    /// Offset of the impedance field.
    pub impedance: Option<usize>,
    /// Minimum frame length.
    pub min_len: usize,
}

/// Walks optional fields in ascending bit order.
struct OffsetCursor {
    offset: usize,
}

impl OffsetCursor {
    fn take(&mut self, present: bool, len: usize) -> Option<usize> {
        present.then(|| {
            let at = self.offset;
            self.offset += len;
            at
        })
    }
}

/// Compute the layout of a Weight Measurement frame from its flag byte.
///
/// ```
/// use bodyscale_types::frame::{weight_flags, weight_scale_layout};
///
/// let layout = weight_scale_layout(weight_flags::TIMESTAMP | weight_flags::USER_ID);
/// assert_eq!(layout.weight, Some(1));
/// assert_eq!(layout.timestamp, Some(3));
/// assert_eq!(layout.user_id, Some(10));
/// assert_eq!(layout.min_len, 11);
/// ```
#[must_use]
pub fn weight_scale_layout(flags: u8) -> FieldLayout {
    let mut cursor = OffsetCursor { offset: 1 };
    let weight = cursor.take(true, U16_LEN);
    let timestamp = cursor.take(flags & weight_flags::TIMESTAMP != 0, TIMESTAMP_LEN);
    let user_id = cursor.take(flags & weight_flags::USER_ID != 0, USER_ID_LEN);
    let bmi_height = cursor.take(flags & weight_flags::BMI_HEIGHT != 0, BMI_HEIGHT_LEN);

    FieldLayout {
        weight,
        timestamp,
        user_id,
        bmi_height,
        impedance: None,
        min_len: cursor.offset,
    }
}

/// Compute the layout of a Body Composition Measurement frame from its flags.
///
/// The two flag bytes are followed by the mandatory body fat field, then the
/// optional fields in ascending bit order.
///
/// ```
/// use bodyscale_types::frame::{body_composition_layout, body_flags};
///
/// let layout = body_composition_layout(body_flags::IMPEDANCE | body_flags::WEIGHT);
/// assert_eq!(layout.impedance, Some(4));
/// assert_eq!(layout.weight, Some(6));
/// assert_eq!(layout.min_len, 8);
/// ```
#[must_use]
pub fn body_composition_layout(flags: u16) -> FieldLayout {
    let has = |bit: u16| flags & bit != 0;

    // flags (2) + body fat percentage (2)
    let mut cursor = OffsetCursor { offset: 4 };
    let timestamp = cursor.take(has(body_flags::TIMESTAMP), TIMESTAMP_LEN);
    let user_id = cursor.take(has(body_flags::USER_ID), USER_ID_LEN);
    let bmi_height = cursor.take(has(body_flags::BMI_HEIGHT), BMI_HEIGHT_LEN);
    for bit in SKIPPED_BODY_FIELDS {
        cursor.take(has(bit), U16_LEN);
    }
    let impedance = cursor.take(has(body_flags::IMPEDANCE), U16_LEN);
    let weight = cursor.take(has(body_flags::WEIGHT), U16_LEN);

    FieldLayout {
        weight,
        timestamp,
        user_id,
        bmi_height,
        impedance,
        min_len: cursor.offset,
    }
}

/// Decode a frame using the layout of the characteristic it arrived on.
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] if the frame is shorter than its
/// flags require, or [`ParseError::MissingWeight`] for a body composition
/// frame without a weight field.
pub fn decode(frame: &RawFrame) -> ParseResult<DecodedReading> {
    decode_bytes(frame.source, &frame.bytes)
}

/// Decode a raw payload as the given characteristic.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_bytes(source: MeasurementCharacteristic, data: &[u8]) -> ParseResult<DecodedReading> {
    match source {
        MeasurementCharacteristic::WeightScale => decode_weight_scale(data),
        MeasurementCharacteristic::BodyComposition => decode_body_composition(data),
    }
}

/// Decode a Weight Measurement (0x2A9D) frame.
///
/// The byte format is:
/// - byte 0: flags (bit 0 imperial, bit 1 timestamp, bit 2 user id,
///   bit 3 BMI/height, bit 5 stable)
/// - bytes 1-2: weight (u16 LE, 0.01 kg or 0.01 lb)
/// - optional timestamp, user id, BMI/height in that order
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] if `data` does not cover the
/// fields its flags declare.
///
/// ```
/// use bodyscale_types::frame::decode_weight_scale;
///
/// // 71.30 kg, stable
/// let reading = decode_weight_scale(&[0x20, 0xDA, 0x1B]).unwrap();
/// assert_eq!(reading.weight_kg, 7130.0 * 0.01);
/// assert!(reading.is_stable_flag);
/// ```
pub fn decode_weight_scale(data: &[u8]) -> ParseResult<DecodedReading> {
    let Some(&flags) = data.first() else {
        return Err(insufficient(MeasurementCharacteristic::WeightScale, 3, 0));
    };
    let layout = weight_scale_layout(flags);
    if data.len() < layout.min_len {
        return Err(insufficient(
            MeasurementCharacteristic::WeightScale,
            layout.min_len,
            data.len(),
        ));
    }

    let imperial = flags & weight_flags::IMPERIAL != 0;
    let raw_weight = read_u16(data, layout.weight);
    let weight_kg = if imperial {
        f64::from(raw_weight) * 0.01 * LB_TO_KG
    } else {
        f64::from(raw_weight) * 0.01
    };

    let mut reading = DecodedReading::from_weight(weight_kg)
        .with_stable_flag(flags & weight_flags::STABLE != 0);
    reading.unit = unit(imperial);
    apply_optional_fields(&mut reading, data, &layout, imperial);
    Ok(reading)
}

/// Decode a Body Composition Measurement (0x2A9C) frame.
///
/// The byte format is:
/// - bytes 0-1: flags (u16 LE)
/// - bytes 2-3: body fat percentage (always present, ignored)
/// - optional fields in ascending flag order, ending with impedance
///   (bit 9, u16 LE, 0.1 Ω) and weight (bit 10, u16 LE, 0.005 kg or 0.01 lb)
///
/// The layout has no stability flag; `is_stable_flag` is always `false`.
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] if `data` does not cover the
/// fields its flags declare, or [`ParseError::MissingWeight`] if the weight
/// flag is clear.
pub fn decode_body_composition(data: &[u8]) -> ParseResult<DecodedReading> {
    if data.len() < U16_LEN {
        return Err(insufficient(
            MeasurementCharacteristic::BodyComposition,
            4,
            data.len(),
        ));
    }
    let flags = (&data[..U16_LEN]).get_u16_le();
    let layout = body_composition_layout(flags);
    if data.len() < layout.min_len {
        return Err(insufficient(
            MeasurementCharacteristic::BodyComposition,
            layout.min_len,
            data.len(),
        ));
    }
    if layout.weight.is_none() {
        return Err(ParseError::MissingWeight { flags });
    }

    let imperial = flags & body_flags::IMPERIAL != 0;
    let raw_weight = read_u16(data, layout.weight);
    let weight_kg = if imperial {
        f64::from(raw_weight) * 0.01 * LB_TO_KG
    } else {
        f64::from(raw_weight) * 0.005
    };

    let mut reading = DecodedReading::from_weight(weight_kg);
    reading.unit = unit(imperial);
    reading.impedance_ohm = layout
        .impedance
        .map(|at| f64::from(read_u16(data, Some(at))) * 0.1);
    apply_optional_fields(&mut reading, data, &layout, imperial);
    Ok(reading)
}

fn unit(imperial: bool) -> WeightUnit {
    if imperial {
        WeightUnit::Imperial
    } else {
        WeightUnit::Metric
    }
}

fn insufficient(
    characteristic: MeasurementCharacteristic,
    expected: usize,
    actual: usize,
) -> ParseError {
    ParseError::InsufficientBytes {
        characteristic,
        expected,
        actual,
    }
}

/// Read a u16 at an offset the layout has already bounds-checked.
fn read_u16(data: &[u8], offset: Option<usize>) -> u16 {
    offset.map_or(0, |at| (&data[at..at + U16_LEN]).get_u16_le())
}

fn apply_optional_fields(
    reading: &mut DecodedReading,
    data: &[u8],
    layout: &FieldLayout,
    imperial: bool,
) {
    reading.device_time = layout
        .timestamp
        .and_then(|at| parse_date_time(&data[at..at + TIMESTAMP_LEN]));
    reading.user_id = layout.user_id.map(|at| data[at]);
    if let Some(at) = layout.bmi_height {
        let mut buf = &data[at..at + BMI_HEIGHT_LEN];
        let bmi_raw = buf.get_u16_le();
        let height_raw = buf.get_u16_le();
        reading.bmi = Some(f64::from(bmi_raw) * 0.1);
        reading.height_m = Some(if imperial {
            // 0.1 inch
            f64::from(height_raw) * 0.1 * 0.0254
        } else {
            // 1 mm
            f64::from(height_raw) * 0.001
        });
    }
}

/// Parse the GATT date-time layout: year (u16 LE), month, day, hour, minute,
/// second.
///
/// Scales send zeros for "unknown"; anything that is not a real calendar
/// time yields `None`.
fn parse_date_time(mut buf: &[u8]) -> Option<PrimitiveDateTime> {
    let year = buf.get_u16_le();
    let month = buf.get_u8();
    let day = buf.get_u8();
    let hour = buf.get_u8();
    let minute = buf.get_u8();
    let second = buf.get_u8();

    let month = Month::try_from(month).ok()?;
    let date = Date::from_calendar_date(i32::from(year), month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}
