//! Device identity types.

use std::fmt;

use crate::types::model::{DeviceModel, ModelFamily};

/// A 12-hex-digit device address synthesized from advertisement fields.
///
/// This is the stable key of a device; it is not the transport's own
/// peripheral identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(String);

impl MacAddress {
    /// Creates an address, normalising it to lowercase.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().to_ascii_lowercase())
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MacAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Transport-assigned peripheral handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(pub String);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// iBeacon-style major/minor pair broadcast by legacy devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeaconId {
    /// Major value.
    pub major: u16,
    /// Minor value.
    pub minor: u16,
}

/// Identity of a device, derived deterministically from its advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// Stable device address.
    pub mac: MacAddress,
    /// Hardware model.
    pub model: DeviceModel,
    /// Hardware generation.
    pub family: ModelFamily,
    /// Firmware model byte (Found) or firmware version (R4K).
    pub product_revision: Option<u8>,
    /// Beacon identifiers (legacy only).
    pub beacon: Option<BeaconId>,
}
