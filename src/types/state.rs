//! Live device state decoded from advertisements and protocol responses.

/// Button press reported by a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ButtonState {
    /// No press.
    #[default]
    None,
    /// Single press.
    Single,
    /// Double press.
    Double,
    /// Triple press.
    Triple,
    /// Quadruple press.
    Quadruple,
    /// Quintuple press.
    Quintuple,
    /// Long press.
    Long,
    /// Double press followed by a hold.
    DoublePressPlusHold,
    /// Triple press followed by a hold.
    TriplePressPlusHold,
}

impl ButtonState {
    /// Decodes the two-bit press code of the legacy status byte.
    #[must_use]
    pub const fn from_press_code(code: u8) -> Self {
        match code & 0x03 {
            1 => Self::Single,
            2 => Self::Long,
            3 => Self::Double,
            _ => Self::None,
        }
    }

    /// Decodes an MFi button byte. Unknown values return `None`.
    #[must_use]
    pub const fn from_mfi_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::None),
            1 => Some(Self::Single),
            2 => Some(Self::Double),
            3 => Some(Self::Triple),
            4 => Some(Self::Quadruple),
            5 => Some(Self::Quintuple),
            6 => Some(Self::Long),
            7 => Some(Self::DoublePressPlusHold),
            8 => Some(Self::TriplePressPlusHold),
            _ => None,
        }
    }
}

/// Buzzer state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BuzzState {
    /// Not buzzing.
    #[default]
    Idle,
    /// A buzz command was sent and not yet reflected by the device.
    AttemptingBuzz,
    /// Device reports it is buzzing.
    Buzzing,
    /// A stop command was sent and not yet reflected by the device.
    AttemptingStop,
}

/// Advertisement broadcast rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AdvertisementRate {
    /// Fast advertising.
    High = 1,
    /// Slow advertising.
    Low = 2,
    /// Not reported yet.
    #[default]
    Unknown = 3,
}

/// Bonding state of an MFi device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BondingState {
    /// Bonded to a phone.
    Bonded = 0,
    /// Not bonded.
    Unbonded = 1,
    /// Not reported.
    #[default]
    Unknown = 0xFF,
}

impl BondingState {
    /// Converts from a raw byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Bonded,
            1 => Self::Unbonded,
            _ => Self::Unknown,
        }
    }
}

/// Action-sequence nibble of the legacy status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionSequence {
    /// Button has never been pressed since boot.
    NeverPressed,
    /// Button was just pressed.
    JustPressed,
    /// Device is in its reset debounce window.
    Resetting,
    /// Button was pressed at some earlier point.
    PressedBefore,
    /// Any other nibble value.
    Unknown(u8),
}

impl ActionSequence {
    /// Decodes the high nibble of a status byte.
    #[must_use]
    pub const fn from_status(byte: u8) -> Self {
        match (byte & 0xF0) >> 4 {
            0 => Self::NeverPressed,
            1 => Self::JustPressed,
            2 => Self::Resetting,
            4 => Self::PressedBefore,
            other => Self::Unknown(other),
        }
    }
}

/// Firmware generation hint advertised by Honey beacons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareHint {
    /// Firmware older than the Robert revision.
    PreRobert,
    /// Robert revision firmware.
    RobertRevision,
    /// Unrecognised value.
    Unknown,
}

impl FirmwareHint {
    /// Converts from a raw byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::PreRobert,
            5 => Self::RobertRevision,
            _ => Self::Unknown,
        }
    }
}

/// Flag bits advertised by second-generation MFi devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MfiFlags {
    /// Find My Network is available.
    pub fmn_available: bool,
    /// Find My Device is available.
    pub fmd_available: bool,
    /// Find My Network is provisioned.
    pub fmn_provisioned: bool,
    /// Find My Device is provisioned.
    pub fmd_provisioned: bool,
    /// Two-bit active network selector (MSB, LSB).
    pub network_active: u8,
    /// SMP management interface is unlocked.
    pub smp_unlocked: bool,
}

/// Connection state of a device session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Connected.
    Connected,
    /// Disconnect in progress.
    Disconnecting,
}

impl ConnectionState {
    /// Returns true while a connect or disconnect is in progress.
    #[must_use]
    pub const fn is_transitioning(self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

/// Mutable per-device state refreshed by every advertisement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveState {
    /// Last reported button press.
    pub button: ButtonState,
    /// Buzzer state.
    pub buzz: BuzzState,
    /// Advertisement broadcast rate.
    pub advertisement_rate: AdvertisementRate,
    /// Battery level in percent.
    pub battery_percent: Option<f64>,
    /// Last decoded action-sequence nibble.
    pub action_sequence: Option<ActionSequence>,
    /// Bonding state (MFi only).
    pub bonding: BondingState,
    /// Flag bits (second-generation MFi only).
    pub mfi_flags: Option<MfiFlags>,
    /// Firmware hint (Honey only).
    pub firmware_hint: Option<FirmwareHint>,
    /// Advertised TX power (R4K only).
    pub tx_power: Option<u8>,
    /// Minutes the device has not moved (R4K only).
    pub stationary_minutes: Option<u8>,
}
