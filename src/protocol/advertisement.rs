//! Advertisement decoding and device classification.
//!
//! Decoding is pure: identity comes from [`decode_identity`], the battery
//! reading from [`decode_battery`] and the remaining live-state fields from
//! [`decode_state`], which picks a per-layout decoder from a fixed table.
//! Fields whose bytes are missing are skipped without touching the rest of
//! the state.

use bytes::Bytes;
use uuid::Uuid;

use crate::protocol::codec::{bits_of, hex_encode, read_be_u16, read_le_u16, read_u8};
use crate::protocol::uuids::FINDER_SERVICE;
use crate::types::{
    ActionSequence, AdvertisementRate, BatterySource, BeaconId, BondingState, ButtonState,
    BuzzState, DeviceIdentity, DeviceModel, FirmwareHint, LiveState, MacAddress, MfiFlags,
    PeripheralId, StateLayout,
};

/// Manufacturer data of this length or shorter is never ours.
pub const MIN_MANUFACTURER_LEN: usize = 6;

/// MFi payloads must be longer than this.
pub const MIN_MFI_LEN: usize = 11;

/// Found payloads shorter than this come from release-candidate firmware.
const FOUND_FULL_LEN: usize = 16;

/// Lowest firmware model byte of a production Found.
const FOUND_MIN_REVISION: u8 = 15;

/// Offset of the packed status byte in legacy advertisements.
const STATUS_OFFSET: usize = 7;

/// A raw advertisement as delivered by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    /// Peripheral that sent the advertisement.
    pub peripheral: PeripheralId,
    /// Advertised service UUIDs.
    pub service_uuids: Vec<Uuid>,
    /// Vendor manufacturer data.
    pub manufacturer_data: Bytes,
    /// Advertised local name.
    pub local_name: Option<String>,
}

impl Advertisement {
    /// Returns true if `service` is listed in the advertisement.
    #[must_use]
    pub fn advertises(&self, service: &Uuid) -> bool {
        self.service_uuids.contains(service)
    }
}

/// Derives the device identity, or `None` if the advertisement is not ours.
#[must_use]
pub fn decode_identity(advertisement: &Advertisement) -> Option<DeviceIdentity> {
    let data = advertisement.manufacturer_data.as_ref();
    if data.len() <= MIN_MANUFACTURER_LEN {
        return None;
    }

    let product_id = read_be_u16(data, 0)?;
    if let Some(model) = DeviceModel::from_product_id(product_id) {
        return decode_legacy(advertisement, model, product_id);
    }

    if data.len() > MIN_MFI_LEN {
        let model = DeviceModel::from_mfi_byte(read_u8(data, 2)?)?;
        return decode_mfi(advertisement, model);
    }

    None
}

fn decode_legacy(
    advertisement: &Advertisement,
    model: DeviceModel,
    product_id: u16,
) -> Option<DeviceIdentity> {
    let data = advertisement.manufacturer_data.as_ref();

    if model.capabilities().requires_finder_service && !advertisement.advertises(&FINDER_SERVICE) {
        tracing::trace!("{} advertisement without finder service ignored", model);
        return None;
    }

    let major = read_be_u16(data, 2)?;
    let minor = read_be_u16(data, 4)?;

    let (model, product_revision) = if model == DeviceModel::Found {
        let last = data.last().copied();
        match last {
            Some(revision) if data.len() >= FOUND_FULL_LEN && revision >= FOUND_MIN_REVISION => {
                (DeviceModel::Found, Some(revision))
            }
            _ => (DeviceModel::FoundRc, last),
        }
    } else {
        (model, None)
    };

    Some(DeviceIdentity {
        mac: MacAddress::new(format!("{product_id:04x}{major:04x}{minor:04x}")),
        model,
        family: model.family(),
        product_revision,
        beacon: Some(BeaconId { major, minor }),
    })
}

fn decode_mfi(advertisement: &Advertisement, model: DeviceModel) -> Option<DeviceIdentity> {
    let data = advertisement.manufacturer_data.as_ref();

    let (mac, product_revision) = if model == DeviceModel::MfiR4kTag {
        let name = advertisement.local_name.as_deref()?;
        let chars: Vec<char> = name.chars().collect();
        if chars.len() < 4 {
            return None;
        }
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        let mut address = data.get(8..12)?.to_vec();
        address.reverse();
        (
            MacAddress::new(format!("{}{suffix}", hex_encode(&address))),
            read_u8(data, 3),
        )
    } else {
        let mut address = data.get(5..11)?.to_vec();
        address.reverse();
        (MacAddress::new(hex_encode(&address)), None)
    };

    Some(DeviceIdentity {
        mac,
        model,
        family: model.family(),
        product_revision,
        beacon: None,
    })
}

/// Reads the advertised battery level in percent, clamped to 0–100.
#[must_use]
pub fn decode_battery(model: DeviceModel, data: &[u8]) -> Option<f64> {
    let percent = match model.capabilities().battery {
        BatterySource::None => return None,
        BatterySource::Millivolts {
            offset,
            min_mv,
            max_mv,
        } => {
            // The reading is only trusted when at least one byte follows it.
            if data.len() <= offset + 2 {
                return None;
            }
            let millivolts = f64::from(read_le_u16(data, offset)?);
            (millivolts - min_mv) / (max_mv - min_mv) * 100.0
        }
        BatterySource::Percent { offset, mask } => f64::from(read_u8(data, offset)? & mask),
    };
    Some(percent.clamp(0.0, 100.0))
}

/// Signature shared by every per-layout state decoder.
pub type StateDecoder = fn(&[u8], &mut LiveState);

/// Decoders indexed by [`StateLayout`] discriminant.
const STATE_DECODERS: [StateDecoder; 5] = [
    decode_status_byte,
    decode_honey,
    decode_mfi_v1,
    decode_mfi_v2,
    decode_r4k,
];

/// Returns the decoder for a state layout.
#[must_use]
pub const fn state_decoder(layout: StateLayout) -> StateDecoder {
    STATE_DECODERS[layout as usize]
}

/// Applies the model's live-state fields from `data` onto `state`.
pub fn decode_state(model: DeviceModel, data: &[u8], state: &mut LiveState) {
    state_decoder(model.state_layout())(data, state);
}

/// Legacy status byte:
///
/// ```text
/// bit 7..4  action sequence
/// bit 3     buzzing
/// bit 2     slow advertising
/// bit 1..0  press code
/// ```
fn decode_status_byte(data: &[u8], state: &mut LiveState) {
    let Some(status) = read_u8(data, STATUS_OFFSET) else {
        return;
    };

    let sequence = ActionSequence::from_status(status);
    state.action_sequence = Some(sequence);

    if sequence == ActionSequence::Resetting {
        // Debounce window: a press code only counts if nothing was showing.
        if state.button == ButtonState::None {
            let code = status & 0x03;
            if code != 0 {
                state.button = ButtonState::from_press_code(code);
            }
        } else {
            state.button = ButtonState::None;
        }
        return;
    }

    let bits = bits_of(status);
    state.buzz = if bits[3].is_set() {
        BuzzState::Buzzing
    } else {
        BuzzState::Idle
    };
    state.advertisement_rate = if bits[2].is_set() {
        AdvertisementRate::Low
    } else {
        AdvertisementRate::High
    };
    state.button = ButtonState::from_press_code(status);
}

fn decode_honey(data: &[u8], state: &mut LiveState) {
    if let Some(button) = read_u8(data, 6) {
        state.button = if button == 1 {
            ButtonState::Single
        } else {
            ButtonState::None
        };
    }
    if let Some(hint) = read_u8(data, 7) {
        state.firmware_hint = Some(FirmwareHint::from_byte(hint));
    }
}

fn decode_mfi_button(data: &[u8], state: &mut LiveState) {
    if let Some(button) = read_u8(data, 4).and_then(ButtonState::from_mfi_byte) {
        state.button = button;
    }
}

fn decode_mfi_v1(data: &[u8], state: &mut LiveState) {
    decode_mfi_button(data, state);
    if let Some(bonding) = read_u8(data, 11) {
        state.bonding = BondingState::from_byte(bonding);
    }
}

fn decode_mfi_v2(data: &[u8], state: &mut LiveState) {
    decode_mfi_button(data, state);
    let Some(flags) = read_u8(data, 11) else {
        return;
    };

    let bits = bits_of(flags);
    state.mfi_flags = Some(MfiFlags {
        fmn_available: bits[7].is_set(),
        fmd_available: bits[6].is_set(),
        fmn_provisioned: bits[5].is_set(),
        fmd_provisioned: bits[4].is_set(),
        network_active: (u8::from(bits[3].is_set()) << 1) | u8::from(bits[2].is_set()),
        smp_unlocked: bits[1].is_set(),
    });
    state.bonding = if bits[0].is_set() {
        BondingState::Unbonded
    } else {
        BondingState::Bonded
    };
}

fn decode_r4k(data: &[u8], state: &mut LiveState) {
    decode_mfi_button(data, state);
    if let Some(byte) = read_u8(data, 6) {
        state.bonding = if bits_of(byte)[7].is_set() {
            BondingState::Bonded
        } else {
            BondingState::Unbonded
        };
    }
    if let Some(tx_power) = read_u8(data, 5) {
        state.tx_power = Some(tx_power);
    }
    if let Some(minutes) = read_u8(data, 7) {
        state.stationary_minutes = Some(minutes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelFamily;

    fn advert(data: &[u8], services: &[Uuid], name: Option<&str>) -> Advertisement {
        Advertisement {
            peripheral: PeripheralId::from("p-1"),
            service_uuids: services.to_vec(),
            manufacturer_data: Bytes::copy_from_slice(data),
            local_name: name.map(str::to_owned),
        }
    }

    #[test]
    fn test_finder_scenario() {
        let data = [0x0E, 0x0E, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00];
        let identity = decode_identity(&advert(&data, &[FINDER_SERVICE], None)).unwrap();

        assert_eq!(identity.mac.as_str(), "0e0e00010002");
        assert_eq!(identity.model, DeviceModel::Finder);
        assert_eq!(identity.family, ModelFamily::Legacy);
        assert_eq!(identity.beacon, Some(BeaconId { major: 1, minor: 2 }));
    }

    #[test]
    fn test_legacy_mac_ignores_trailing_bytes() {
        let mut data = vec![0x0E, 0x0A, 0xAB, 0xCD, 0x12, 0x34, 0x01];
        let short = decode_identity(&advert(&data, &[], None)).unwrap();
        data.extend_from_slice(&[0xFF; 20]);
        let long = decode_identity(&advert(&data, &[], None)).unwrap();

        assert_eq!(short.mac.as_str(), "0e0aabcd1234");
        assert_eq!(short.mac, long.mac);
        assert_eq!(short.model, DeviceModel::Honey);
    }

    #[test]
    fn test_rejects_short_and_unknown() {
        let six = [0x0E, 0x0E, 0x00, 0x01, 0x00, 0x02];
        assert!(decode_identity(&advert(&six, &[FINDER_SERVICE], None)).is_none());

        let unknown = [0x12, 0x34, 0x77, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(decode_identity(&advert(&unknown, &[], None)).is_none());
    }

    #[test]
    fn test_finder_requires_service() {
        let data = [0x0E, 0x05, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00];
        assert!(decode_identity(&advert(&data, &[], None)).is_none());
        let card = decode_identity(&advert(&data, &[FINDER_SERVICE], None)).unwrap();
        assert_eq!(card.model, DeviceModel::Card);
    }

    #[test]
    fn test_found_and_found_rc() {
        let mut data = vec![0x0E, 0x07, 0x00, 0x10, 0x00, 0x20];
        data.extend_from_slice(&[0; 9]);
        data.push(0x11);
        let found = decode_identity(&advert(&data, &[], None)).unwrap();
        assert_eq!(found.model, DeviceModel::Found);
        assert_eq!(found.product_revision, Some(0x11));

        *data.last_mut().unwrap() = 0x0E;
        let rc = decode_identity(&advert(&data, &[], None)).unwrap();
        assert_eq!(rc.model, DeviceModel::FoundRc);

        let short = [0x0E, 0x07, 0x00, 0x10, 0x00, 0x20, 0x00, 0x30];
        let rc = decode_identity(&advert(&short, &[], None)).unwrap();
        assert_eq!(rc.model, DeviceModel::FoundRc);
    }

    #[test]
    fn test_mfi_mac_reversed() {
        let data = [
            0x4C, 0x00, 0x04, 0x50, 0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00,
        ];
        let identity = decode_identity(&advert(&data, &[], None)).unwrap();

        assert_eq!(identity.model, DeviceModel::MfiTag);
        assert_eq!(identity.mac.as_str(), "ffeeddccbbaa");
        assert_eq!(identity.beacon, None);
    }

    #[test]
    fn test_mfi_requires_twelve_bytes() {
        let data = [0x4C, 0x00, 0x04, 0x50, 0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
        assert!(decode_identity(&advert(&data, &[], None)).is_none());
    }

    #[test]
    fn test_r4k_mac_uses_local_name() {
        let data = [
            0x4C, 0x00, 0x0D, 0x07, 0x00, 0x00, 0x00, 0x00, 0x11, 0x22, 0x33, 0x44,
        ];
        let identity =
            decode_identity(&advert(&data, &[], Some("Pebblebee 9A8B"))).unwrap();

        assert_eq!(identity.model, DeviceModel::MfiR4kTag);
        assert_eq!(identity.mac.as_str(), "443322119a8b");
        assert_eq!(identity.product_revision, Some(0x07));

        assert!(decode_identity(&advert(&data, &[], None)).is_none());
        assert!(decode_identity(&advert(&data, &[], Some("ab"))).is_none());
    }

    #[test]
    fn test_status_byte_fields() {
        let mut state = LiveState::default();
        // pressed before, buzzing, slow advertising, double press
        let data = [0, 0, 0, 0, 0, 0, 0, 0b0100_1111];
        decode_state(DeviceModel::Finder, &data, &mut state);

        assert_eq!(state.action_sequence, Some(ActionSequence::PressedBefore));
        assert_eq!(state.buzz, BuzzState::Buzzing);
        assert_eq!(state.advertisement_rate, AdvertisementRate::Low);
        assert_eq!(state.button, ButtonState::Double);
    }

    #[test]
    fn test_resetting_interprets_press_when_idle() {
        let mut state = LiveState {
            buzz: BuzzState::Buzzing,
            ..LiveState::default()
        };
        let data = [0, 0, 0, 0, 0, 0, 0, 0x21];
        decode_state(DeviceModel::Finder2, &data, &mut state);

        assert_eq!(state.button, ButtonState::Single);
        // Short-circuit: buzz and rate untouched.
        assert_eq!(state.buzz, BuzzState::Buzzing);
        assert_eq!(state.advertisement_rate, AdvertisementRate::Unknown);
    }

    #[test]
    fn test_resetting_forces_none_when_pressed() {
        let mut state = LiveState {
            button: ButtonState::Long,
            ..LiveState::default()
        };
        let data = [0, 0, 0, 0, 0, 0, 0, 0x2B];
        decode_state(DeviceModel::Card, &data, &mut state);

        assert_eq!(state.button, ButtonState::None);
        assert_eq!(state.buzz, BuzzState::Idle);
    }

    #[test]
    fn test_short_payload_skips_status() {
        let mut state = LiveState {
            button: ButtonState::Single,
            ..LiveState::default()
        };
        decode_state(DeviceModel::Finder, &[0, 0, 0, 0, 0, 0, 0], &mut state);
        assert_eq!(state.button, ButtonState::Single);
        assert_eq!(state.action_sequence, None);
    }

    #[test]
    fn test_honey_state() {
        let mut state = LiveState::default();
        decode_state(DeviceModel::Honey, &[0, 0, 0, 0, 0, 0, 1, 5], &mut state);
        assert_eq!(state.button, ButtonState::Single);
        assert_eq!(state.firmware_hint, Some(FirmwareHint::RobertRevision));
    }

    #[test]
    fn test_mfi_v1_state() {
        let mut state = LiveState::default();
        let data = [0, 0, 0x02, 80, 6, 0, 0, 0, 0, 0, 0, 1];
        decode_state(DeviceModel::MfiCard, &data, &mut state);
        assert_eq!(state.button, ButtonState::Long);
        assert_eq!(state.bonding, BondingState::Unbonded);

        let data = [0, 0, 0x02, 80, 42, 0, 0, 0, 0, 0, 0, 9];
        decode_state(DeviceModel::MfiCard, &data, &mut state);
        assert_eq!(state.button, ButtonState::Long);
        assert_eq!(state.bonding, BondingState::Unknown);
    }

    #[test]
    fn test_mfi_v2_flags() {
        let mut state = LiveState::default();
        let data = [0, 0, 0x24, 50, 1, 0, 0, 0, 0, 0, 0, 0b1010_1010];
        decode_state(DeviceModel::MfiTagV2, &data, &mut state);

        let flags = state.mfi_flags.unwrap();
        assert!(flags.fmn_available);
        assert!(!flags.fmd_available);
        assert!(flags.fmn_provisioned);
        assert!(!flags.fmd_provisioned);
        assert_eq!(flags.network_active, 0b10);
        assert!(flags.smp_unlocked);
        assert_eq!(state.bonding, BondingState::Bonded);
        assert_eq!(state.button, ButtonState::Single);
    }

    #[test]
    fn test_r4k_state() {
        let mut state = LiveState::default();
        let data = [0, 0, 0x0D, 3, 2, 0xF8, 0x80 | 55, 12, 0, 0, 0, 0];
        decode_state(DeviceModel::MfiR4kTag, &data, &mut state);

        assert_eq!(state.button, ButtonState::Double);
        assert_eq!(state.bonding, BondingState::Bonded);
        assert_eq!(state.tx_power, Some(0xF8));
        assert_eq!(state.stationary_minutes, Some(12));
        assert_eq!(decode_battery(DeviceModel::MfiR4kTag, &data), Some(55.0));
    }

    #[test]
    fn test_battery_millivolts() {
        let mut data = [0u8; 15];
        data[12..14].copy_from_slice(&2600u16.to_le_bytes());
        assert_eq!(decode_battery(DeviceModel::Finder, &data), Some(50.0));

        data[12..14].copy_from_slice(&3500u16.to_le_bytes());
        assert_eq!(decode_battery(DeviceModel::Finder, &data), Some(100.0));

        data[12..14].copy_from_slice(&1000u16.to_le_bytes());
        assert_eq!(decode_battery(DeviceModel::Card, &data), Some(0.0));

        assert_eq!(decode_battery(DeviceModel::Finder, &data[..14]), None);
        assert_eq!(decode_battery(DeviceModel::Honey, &data), None);
    }

    #[test]
    fn test_battery_percent() {
        let mut data = [0u8; 16];
        data[12] = 73;
        assert_eq!(decode_battery(DeviceModel::Found, &data), Some(73.0));
        assert_eq!(decode_battery(DeviceModel::FoundRc, &data[..12]), None);

        data[3] = 250;
        assert_eq!(decode_battery(DeviceModel::MfiClip, &data), Some(100.0));
    }
}
