//! Device settings and cellular status values.

use crate::error::Error;

/// Buzzer volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Volume {
    /// Silent.
    Mute = 0,
    /// Low volume.
    Low = 1,
    /// Medium volume.
    Medium = 2,
    /// High volume.
    High = 3,
}

impl Volume {
    /// Converts from a raw byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Mute),
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Volume {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self, Error> {
        Self::from_byte(level).ok_or_else(|| Error::ValueNotAccepted {
            reason: format!("volume level {level} is outside 0-3"),
        })
    }
}

/// Location reporting mode of a Found device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TrackingMode {
    /// Adapts reporting to movement.
    Dynamic = 0,
    /// Maximum reporting rate.
    Emergency = 1,
    /// Reduced reporting.
    LowPower = 2,
    /// Cellular off, Bluetooth only.
    BluetoothOnly = 3,
    /// Geofenced area mode.
    Area = 10,
    /// Active finding.
    Finding = 11,
    /// Standby.
    Standby = 12,
    /// Reports on motion.
    Motion = 14,
}

impl TrackingMode {
    /// Converts from a raw byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Dynamic),
            1 => Some(Self::Emergency),
            2 => Some(Self::LowPower),
            3 => Some(Self::BluetoothOnly),
            10 => Some(Self::Area),
            11 => Some(Self::Finding),
            12 => Some(Self::Standby),
            14 => Some(Self::Motion),
            _ => None,
        }
    }
}

impl TryFrom<u8> for TrackingMode {
    type Error = Error;

    fn try_from(mode: u8) -> Result<Self, Error> {
        Self::from_byte(mode).ok_or_else(|| Error::ValueNotAccepted {
            reason: format!("unknown tracking mode {mode}"),
        })
    }
}

/// Cellular (LTE) link status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LteStatus {
    /// No cellular link.
    Disconnected,
    /// Cellular link up.
    Connected,
}

impl LteStatus {
    /// Converts from a raw byte; zero means disconnected.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        if byte == 0 {
            Self::Disconnected
        } else {
            Self::Connected
        }
    }
}

/// Charger status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChargingStatus {
    /// Not on a charger.
    NotCharging,
    /// Charging.
    Charging,
}

impl ChargingStatus {
    /// Converts from a raw byte; zero means not charging.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        if byte == 0 {
            Self::NotCharging
        } else {
            Self::Charging
        }
    }
}
