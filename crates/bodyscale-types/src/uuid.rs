//! Bluetooth UUIDs for body-composition scales.
//!
//! All of these are Bluetooth SIG assigned numbers expanded onto the base
//! UUID `0000XXXX-0000-1000-8000-00805f9b34fb`.

use uuid::{Uuid, uuid};

/// Bluetooth SIG base UUID used to expand 16-bit assigned numbers.
pub const BLUETOOTH_BASE_UUID: Uuid = uuid!("00000000-0000-1000-8000-00805f9b34fb");

// --- Services ---

/// Weight Scale service (0x181D).
pub const WEIGHT_SCALE_SERVICE: Uuid = uuid!("0000181d-0000-1000-8000-00805f9b34fb");

/// Body Composition service (0x181B).
pub const BODY_COMPOSITION_SERVICE: Uuid = uuid!("0000181b-0000-1000-8000-00805f9b34fb");

// --- Characteristics ---

/// Weight Measurement characteristic (0x2A9D).
pub const WEIGHT_MEASUREMENT: Uuid = uuid!("00002a9d-0000-1000-8000-00805f9b34fb");

/// Body Composition Measurement characteristic (0x2A9C).
pub const BODY_COMPOSITION_MEASUREMENT: Uuid = uuid!("00002a9c-0000-1000-8000-00805f9b34fb");

/// Expand a 16-bit assigned number onto the Bluetooth base UUID.
///
/// ```
/// use bodyscale_types::uuid::{from_short, WEIGHT_MEASUREMENT};
///
/// assert_eq!(from_short(0x2A9D), WEIGHT_MEASUREMENT);
/// ```
#[must_use]
pub const fn from_short(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID.as_u128() | ((short as u128) << 96))
}

/// Return the 16-bit assigned number if `uuid` lies on the Bluetooth base UUID.
#[must_use]
pub fn to_short(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let short_mask: u128 = 0xFFFF_FFFF << 96;
    if value & !short_mask != BLUETOOTH_BASE_UUID.as_u128() || value >> 112 != 0 {
        return None;
    }
    u16::try_from(value >> 96).ok()
}
