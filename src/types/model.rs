//! Hardware model classification and per-model capabilities.

use std::fmt;
use std::time::Duration;

/// Default advertisement refresh interval.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(615);

/// Refresh interval for the faster-advertising models.
pub const FAST_REFRESH_INTERVAL: Duration = Duration::from_secs(380);

/// Hardware generation of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    /// Original Pebblebee hardware, identified by a product ID.
    Legacy,
    /// MFi hardware, identified by a sub-family byte.
    Mfi,
}

/// Layout of the live-state fields inside the manufacturer data.
///
/// Each layout has exactly one state decoder; see
/// [`crate::protocol::advertisement::decode_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateLayout {
    /// Single packed status byte at offset 7.
    StatusByte = 0,
    /// Honey beacon: button at 6, firmware hint at 7.
    Honey = 1,
    /// First-generation MFi: button at 4, bonding at 11.
    MfiV1 = 2,
    /// Second-generation MFi: button at 4, flag byte at 11.
    MfiV2 = 3,
    /// R4K tag: button at 4, bonding bit and battery at 6.
    R4k = 4,
}

/// Where a model reports its battery level in advertisements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatterySource {
    /// No battery level is advertised.
    None,
    /// Little-endian millivolt reading rescaled between two calibration points.
    Millivolts {
        /// Byte offset of the reading.
        offset: usize,
        /// Reading that maps to 0 %.
        min_mv: f64,
        /// Reading that maps to 100 %.
        max_mv: f64,
    },
    /// A single byte holding the percentage directly.
    Percent {
        /// Byte offset of the reading.
        offset: usize,
        /// Mask applied before interpreting the byte.
        mask: u8,
    },
}

/// Static description of what a model supports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
    /// Model can be made to buzz.
    pub can_buzz: bool,
    /// A running buzz can be stopped.
    pub can_stop_buzz: bool,
    /// Buzzer volume can be set.
    pub can_set_volume: bool,
    /// Model accepts a remote reboot.
    pub can_reboot: bool,
    /// Model runs the Toshiba dual-bank bootloader.
    pub can_update_firmware: bool,
    /// Model carries a cellular modem that answers queries.
    pub can_query_cellular: bool,
    /// Model keeps a connection open on its own.
    pub auto_connectable: bool,
    /// Advertisement must list the finder service to be recognised.
    pub requires_finder_service: bool,
    /// Silence after which an unconnected device counts as out of range.
    pub refresh_interval: Duration,
    /// Battery field in the advertisement.
    pub battery: BatterySource,
}

const FINDER_BATTERY: BatterySource = BatterySource::Millivolts {
    offset: 12,
    min_mv: 2000.0,
    max_mv: 3200.0,
};

const CARD_BATTERY: BatterySource = BatterySource::Millivolts {
    offset: 12,
    min_mv: 2750.0,
    max_mv: 4200.0,
};

const FOUND_BATTERY: BatterySource = BatterySource::Percent {
    offset: 12,
    mask: 0xFF,
};

const MFI_BATTERY: BatterySource = BatterySource::Percent {
    offset: 3,
    mask: 0xFF,
};

const R4K_BATTERY: BatterySource = BatterySource::Percent {
    offset: 6,
    mask: 0x7F,
};

const BEACON: Capabilities = Capabilities {
    can_buzz: false,
    can_stop_buzz: false,
    can_set_volume: false,
    can_reboot: false,
    can_update_firmware: false,
    can_query_cellular: false,
    auto_connectable: false,
    requires_finder_service: false,
    refresh_interval: DEFAULT_REFRESH_INTERVAL,
    battery: BatterySource::None,
};

const HONEY: Capabilities = Capabilities {
    can_buzz: true,
    ..BEACON
};

const FINDER: Capabilities = Capabilities {
    can_buzz: true,
    can_stop_buzz: true,
    can_set_volume: true,
    can_reboot: true,
    requires_finder_service: true,
    battery: FINDER_BATTERY,
    ..BEACON
};

const FOUND: Capabilities = Capabilities {
    can_buzz: true,
    can_stop_buzz: true,
    can_set_volume: true,
    can_reboot: true,
    can_update_firmware: true,
    can_query_cellular: true,
    auto_connectable: true,
    refresh_interval: FAST_REFRESH_INTERVAL,
    battery: FOUND_BATTERY,
    ..BEACON
};

const MFI: Capabilities = Capabilities {
    can_buzz: true,
    can_stop_buzz: true,
    battery: MFI_BATTERY,
    ..BEACON
};

/// Every supported hardware model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceModel {
    /// Honey beacon.
    Honey,
    /// Finder.
    Finder,
    /// Finder 2.0.
    Finder2,
    /// Card.
    Card,
    /// Found (cellular).
    Found,
    /// Found with release-candidate firmware.
    FoundRc,
    /// MFi card.
    MfiCard,
    /// MFi clip.
    MfiClip,
    /// MFi tag.
    MfiTag,
    /// MFi white.
    MfiWhite,
    /// MFi green.
    MfiGreen,
    /// MFi R4K tag.
    MfiR4kTag,
    /// Second-generation MFi card.
    MfiCardV2,
    /// Second-generation MFi clip.
    MfiClipV2,
    /// Second-generation MFi tag.
    MfiTagV2,
}

/// Legacy product IDs, read big-endian from the first two manufacturer bytes.
const LEGACY_PRODUCT_IDS: [(u16, DeviceModel); 5] = [
    (0x0E0A, DeviceModel::Honey),
    (0x0E0E, DeviceModel::Finder),
    (0x0E05, DeviceModel::Card),
    (0x0E06, DeviceModel::Finder2),
    (0x0E07, DeviceModel::Found),
];

/// MFi sub-family identifiers, read from manufacturer byte 2.
const MFI_SUBFAMILIES: [(u8, DeviceModel); 9] = [
    (0x02, DeviceModel::MfiCard),
    (0x03, DeviceModel::MfiClip),
    (0x04, DeviceModel::MfiTag),
    (0x05, DeviceModel::MfiWhite),
    (0x06, DeviceModel::MfiGreen),
    (0x0D, DeviceModel::MfiR4kTag),
    (0x22, DeviceModel::MfiCardV2),
    (0x23, DeviceModel::MfiClipV2),
    (0x24, DeviceModel::MfiTagV2),
];

impl DeviceModel {
    /// Looks up a legacy model by product ID.
    #[must_use]
    pub fn from_product_id(product_id: u16) -> Option<Self> {
        LEGACY_PRODUCT_IDS
            .iter()
            .find(|(id, _)| *id == product_id)
            .map(|(_, model)| *model)
    }

    /// Looks up an MFi model by its sub-family byte.
    #[must_use]
    pub fn from_mfi_byte(byte: u8) -> Option<Self> {
        MFI_SUBFAMILIES
            .iter()
            .find(|(id, _)| *id == byte)
            .map(|(_, model)| *model)
    }

    /// Returns the legacy product ID, if any.
    #[must_use]
    pub fn product_id(self) -> Option<u16> {
        let model = if self == Self::FoundRc { Self::Found } else { self };
        LEGACY_PRODUCT_IDS
            .iter()
            .find(|(_, m)| *m == model)
            .map(|(id, _)| *id)
    }

    /// Returns the hardware generation.
    #[must_use]
    pub const fn family(self) -> ModelFamily {
        match self {
            Self::Honey | Self::Finder | Self::Finder2 | Self::Card | Self::Found | Self::FoundRc => {
                ModelFamily::Legacy
            }
            _ => ModelFamily::Mfi,
        }
    }

    /// Returns the live-state layout used by this model's advertisements.
    #[must_use]
    pub const fn state_layout(self) -> StateLayout {
        match self {
            Self::Honey => StateLayout::Honey,
            Self::Finder | Self::Finder2 | Self::Card | Self::Found | Self::FoundRc => {
                StateLayout::StatusByte
            }
            Self::MfiCard | Self::MfiClip | Self::MfiTag | Self::MfiWhite | Self::MfiGreen => {
                StateLayout::MfiV1
            }
            Self::MfiCardV2 | Self::MfiClipV2 | Self::MfiTagV2 => StateLayout::MfiV2,
            Self::MfiR4kTag => StateLayout::R4k,
        }
    }

    /// Returns the capability record for this model.
    #[must_use]
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Self::Honey => HONEY,
            Self::Finder => FINDER,
            Self::Finder2 => Capabilities {
                refresh_interval: FAST_REFRESH_INTERVAL,
                ..FINDER
            },
            Self::Card => Capabilities {
                battery: CARD_BATTERY,
                ..FINDER
            },
            Self::Found | Self::FoundRc => FOUND,
            Self::MfiR4kTag => Capabilities {
                battery: R4K_BATTERY,
                ..MFI
            },
            _ => MFI,
        }
    }

    /// Returns the vendor device type code.
    #[must_use]
    pub const fn type_code(self) -> u8 {
        match self {
            Self::Honey => 1,
            Self::Finder => 5,
            Self::Card => 11,
            Self::Finder2 => 13,
            Self::Found | Self::FoundRc => 14,
            Self::MfiCard => 16,
            Self::MfiClip => 17,
            Self::MfiTag => 18,
            Self::MfiWhite => 19,
            Self::MfiGreen => 20,
            Self::MfiR4kTag => 21,
            Self::MfiCardV2 => 22,
            Self::MfiClipV2 => 23,
            Self::MfiTagV2 => 24,
        }
    }

    /// Returns a short human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Honey => "honey",
            Self::Finder => "finder",
            Self::Finder2 => "finder2",
            Self::Card => "card",
            Self::Found => "found",
            Self::FoundRc => "found-rc",
            Self::MfiCard => "mfi-card",
            Self::MfiClip => "mfi-clip",
            Self::MfiTag => "mfi-tag",
            Self::MfiWhite => "mfi-white",
            Self::MfiGreen => "mfi-green",
            Self::MfiR4kTag => "mfi-r4k-tag",
            Self::MfiCardV2 => "mfi-card-v2",
            Self::MfiClipV2 => "mfi-clip-v2",
            Self::MfiTagV2 => "mfi-tag-v2",
        }
    }

    /// Returns true for the Found variants.
    #[must_use]
    pub const fn is_found(self) -> bool {
        matches!(self, Self::Found | Self::FoundRc)
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_lookup() {
        assert_eq!(DeviceModel::from_product_id(0x0E0E), Some(DeviceModel::Finder));
        assert_eq!(DeviceModel::from_product_id(0x0E07), Some(DeviceModel::Found));
        assert_eq!(DeviceModel::from_product_id(0x1234), None);
        assert_eq!(DeviceModel::FoundRc.product_id(), Some(0x0E07));
        assert_eq!(DeviceModel::MfiTag.product_id(), None);
    }

    #[test]
    fn test_mfi_card_is_not_legacy_card() {
        assert_eq!(DeviceModel::from_mfi_byte(0x02), Some(DeviceModel::MfiCard));
        assert_eq!(DeviceModel::MfiCard.family(), ModelFamily::Mfi);
        assert_eq!(DeviceModel::from_mfi_byte(0x0D), Some(DeviceModel::MfiR4kTag));
        assert_eq!(DeviceModel::from_mfi_byte(0x07), None);
    }

    #[test]
    fn test_capabilities() {
        let found = DeviceModel::Found.capabilities();
        assert!(found.can_update_firmware);
        assert!(found.auto_connectable);
        assert_eq!(found.refresh_interval, FAST_REFRESH_INTERVAL);

        let finder = DeviceModel::Finder.capabilities();
        assert!(finder.requires_finder_service);
        assert!(!finder.can_update_firmware);
        assert_eq!(finder.refresh_interval, DEFAULT_REFRESH_INTERVAL);
        assert_eq!(
            DeviceModel::Finder2.capabilities().refresh_interval,
            FAST_REFRESH_INTERVAL
        );

        let honey = DeviceModel::Honey.capabilities();
        assert!(honey.can_buzz);
        assert!(!honey.can_stop_buzz);
        assert!(DeviceModel::MfiClip.capabilities().can_buzz);
        assert!(!DeviceModel::MfiClip.capabilities().can_reboot);
        assert_eq!(
            DeviceModel::MfiR4kTag.capabilities().battery,
            BatterySource::Percent { offset: 6, mask: 0x7F }
        );
    }

    #[test]
    fn test_type_codes_and_layouts() {
        assert_eq!(DeviceModel::Finder2.type_code(), 13);
        assert_eq!(DeviceModel::MfiTagV2.type_code(), 24);
        assert_eq!(DeviceModel::FoundRc.state_layout(), StateLayout::StatusByte);
        assert_eq!(DeviceModel::MfiClipV2.state_layout(), StateLayout::MfiV2);
        assert_eq!(DeviceModel::MfiR4kTag.to_string(), "mfi-r4k-tag");
    }
}
