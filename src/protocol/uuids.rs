//! GATT service and characteristic identifiers.

use uuid::Uuid;

const SIG_BASE: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Expands a 16-bit Bluetooth SIG short UUID onto the base UUID.
#[must_use]
pub const fn short(value: u16) -> Uuid {
    Uuid::from_u128(((value as u128) << 96) | SIG_BASE)
}

/// Returns the 16-bit short form if `uuid` sits on the SIG base UUID.
#[must_use]
pub fn as_short(uuid: &Uuid) -> Option<u16> {
    let raw = uuid.as_u128();
    if raw & !(0xFFFF_FFFFu128 << 96) == SIG_BASE && (raw >> 112) == 0 {
        Some((raw >> 96) as u16)
    } else {
        None
    }
}

// Advertised services

/// Finder service, advertised by the legacy finder family.
pub const FINDER_SERVICE: Uuid = short(0xFA25);
/// Found (cellular) proprietary service.
pub const FOUND_SERVICE: Uuid = short(0xFA26);
/// Location beacon service.
pub const LOCATION_BEACON_SERVICE: Uuid = short(0xFB25);
/// R4K tag service.
pub const R4K_TAG_SERVICE: Uuid = short(0xFCC7);
/// Stone service.
pub const STONE_SERVICE: Uuid = short(0x8888);
/// Proprietary data service.
pub const PROPRIETARY_DATA_SERVICE: Uuid = short(0x1901);
/// Link loss service.
pub const LINK_LOSS_SERVICE: Uuid = short(0x1803);
/// Immediate alert service.
pub const IMMEDIATE_ALERT_SERVICE: Uuid = short(0x1802);
/// SMP (MCU manager) service used by MFi devices.
pub const SMP_SERVICE: Uuid = Uuid::from_u128(0x8D53_DC1D_1DB7_4CD3_868B_8A52_7460_AA84);

/// Services a scan should filter on.
pub const SCAN_SERVICES: [Uuid; 8] = [
    FINDER_SERVICE,
    R4K_TAG_SERVICE,
    SMP_SERVICE,
    STONE_SERVICE,
    PROPRIETARY_DATA_SERVICE,
    LINK_LOSS_SERVICE,
    IMMEDIATE_ALERT_SERVICE,
    LOCATION_BEACON_SERVICE,
];

// Command characteristics

/// Primary command characteristic.
pub const DATA1: Uuid = short(0x2C01);
/// Secondary command characteristic (MFi buzz, finder wake).
pub const DATA2: Uuid = short(0x2C02);
/// Request/response characteristic for cellular queries.
pub const DATA3: Uuid = short(0x2C06);
/// Debug mode flag.
pub const DEBUG_MODE: Uuid = short(0x3C01);
/// Alert level, written to make a Honey beep.
pub const ALERT_LEVEL: Uuid = short(0x2A06);

// Standard services

/// Battery service.
pub const BATTERY_SERVICE: Uuid = short(0x180F);
/// Battery level characteristic.
pub const BATTERY_LEVEL: Uuid = short(0x2A19);
/// Device information service.
pub const DEVICE_INFO_SERVICE: Uuid = short(0x180A);
/// Software revision string.
pub const SOFTWARE_REVISION: Uuid = short(0x2A28);
/// Hardware revision string.
pub const HARDWARE_REVISION: Uuid = short(0x2A27);

// Toshiba flash storage

/// Toshiba flash storage service.
pub const STORAGE_SERVICE: Uuid = Uuid::from_u128(STORAGE_BASE);
/// Opens flash memory for writing.
pub const FLASH_OPEN: Uuid = storage(0x01);
/// Closes flash memory.
pub const FLASH_CLOSE: Uuid = storage(0x02);
/// Checksum request (address and size).
pub const CHECKSUM1: Uuid = storage(0x05);
/// Checksum read-back.
pub const CHECKSUM2: Uuid = storage(0x06);
/// Page erase.
pub const ERASE: Uuid = storage(0x07);
/// Memory write (address plus payload).
pub const MEMORY_WRITE: Uuid = storage(0x08);
/// Boot flag read.
pub const CHECK_FLAG: Uuid = storage(0x09);
/// Boot flag change.
pub const FLAG_CHANGE: Uuid = storage(0x0B);
/// Bootloader version check.
pub const VERSION_CHECK: Uuid = storage(0x0C);

const STORAGE_BASE: u128 = 0x5361_6D70_6C65_4170_7044_656D_6F01_0000;

const fn storage(index: u8) -> Uuid {
    Uuid::from_u128(STORAGE_BASE | index as u128)
}

/// Services discovered on connect for the Found family.
pub const FOUND_DISCOVERY: [Uuid; 5] = [
    FINDER_SERVICE,
    FOUND_SERVICE,
    BATTERY_SERVICE,
    DEVICE_INFO_SERVICE,
    STORAGE_SERVICE,
];

/// Services discovered on connect for Honey beacons.
pub const HONEY_DISCOVERY: [Uuid; 3] = [IMMEDIATE_ALERT_SERVICE, LINK_LOSS_SERVICE, BATTERY_SERVICE];

/// Services discovered on connect for every other model.
pub const FINDER_DISCOVERY: [Uuid; 1] = [FINDER_SERVICE];
