//! Command payloads and response parsing.
//!
//! Each [`DeviceCommand`] encodes to one or more characteristic writes whose
//! layout depends on the model's command set. Cellular queries are written to
//! the request characteristic and answered by a notification on the same
//! characteristic.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::codec::hex_encode;
use crate::protocol::uuids::{ALERT_LEVEL, DATA1, DATA2, DATA3, DEBUG_MODE};
use crate::transport::WriteMode;
use crate::types::{
    ButtonState, ChargingStatus, DeviceModel, FirmwareHint, LteStatus, ModelFamily, TrackingMode,
    Volume,
};

/// Header of a button-action notification on the request characteristic.
const BUTTON_ACTION_HEADER: [u8; 3] = [0x08, 0x09, 0x00];

/// Alert level that makes a Honey beep.
const HONEY_BEEP: u8 = 0x02;

/// Fragment of a hardware revision string that marks bootloader firmware.
const BOOTLOADER_MARKER: &str = "BL.";

/// Which wire format a model speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandSet {
    /// Finder, Finder 2.0 and Card.
    Finder,
    /// Found and Found RC.
    Found,
    /// Every MFi model.
    Mfi,
    /// Honey, through the alert level characteristic.
    Honey,
    /// Models that accept no commands.
    None,
}

impl CommandSet {
    /// Returns the command set for a model.
    #[must_use]
    pub const fn for_model(model: DeviceModel) -> Self {
        match model {
            DeviceModel::Finder | DeviceModel::Finder2 | DeviceModel::Card => Self::Finder,
            DeviceModel::Found | DeviceModel::FoundRc => Self::Found,
            DeviceModel::Honey => Self::Honey,
            _ => match model.family() {
                ModelFamily::Mfi => Self::Mfi,
                ModelFamily::Legacy => Self::None,
            },
        }
    }
}

/// Identifies a command without its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Start buzzing.
    Buzz,
    /// Stop buzzing.
    StopBuzz,
    /// Reboot.
    Reboot,
    /// Set buzzer volume.
    SetVolume,
    /// Set tracking mode.
    SetTrackingMode,
    /// Toggle debug mode.
    SetDebugMode,
}

impl CommandKind {
    /// Human-readable operation name used in errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Buzz => "buzz",
            Self::StopBuzz => "stop buzz",
            Self::Reboot => "reboot",
            Self::SetVolume => "set volume",
            Self::SetTrackingMode => "set tracking mode",
            Self::SetDebugMode => "set debug mode",
        }
    }
}

/// A command together with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Start buzzing.
    Buzz,
    /// Stop buzzing.
    StopBuzz,
    /// Reboot the device.
    Reboot,
    /// Set buzzer volume.
    SetVolume(Volume),
    /// Set tracking mode (Found only).
    SetTrackingMode(TrackingMode),
    /// Enable or disable debug mode (Found only).
    SetDebugMode(bool),
}

/// An encoded characteristic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedWrite {
    /// Target characteristic.
    pub characteristic: Uuid,
    /// Payload bytes.
    pub payload: Bytes,
    /// Whether the write expects an acknowledgement.
    pub mode: WriteMode,
}

impl EncodedWrite {
    fn with_response(characteristic: Uuid, payload: &[u8]) -> Self {
        Self {
            characteristic,
            payload: Bytes::copy_from_slice(payload),
            mode: WriteMode::WithResponse,
        }
    }

    fn without_response(characteristic: Uuid, payload: &[u8]) -> Self {
        Self {
            characteristic,
            payload: Bytes::copy_from_slice(payload),
            mode: WriteMode::WithoutResponse,
        }
    }
}

impl DeviceCommand {
    /// Returns the argument-free kind of this command.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::Buzz => CommandKind::Buzz,
            Self::StopBuzz => CommandKind::StopBuzz,
            Self::Reboot => CommandKind::Reboot,
            Self::SetVolume(_) => CommandKind::SetVolume,
            Self::SetTrackingMode(_) => CommandKind::SetTrackingMode,
            Self::SetDebugMode(_) => CommandKind::SetDebugMode,
        }
    }

    /// Encodes the command for `model` as writes to issue in order.
    ///
    /// `hint` is the firmware generation a Honey advertises; other models
    /// ignore it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] if the model has no wire format for
    /// this command.
    pub fn encode(
        &self,
        model: DeviceModel,
        hint: Option<FirmwareHint>,
    ) -> Result<Vec<EncodedWrite>> {
        let unsupported = || Error::Unsupported {
            model,
            operation: self.kind().name(),
        };

        let write = match (CommandSet::for_model(model), *self) {
            (CommandSet::Finder, Self::Buzz) => EncodedWrite::with_response(DATA1, &[0x80, 0x01]),
            (CommandSet::Finder, Self::StopBuzz) => EncodedWrite::with_response(
                DATA1,
                &[0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01],
            ),
            (CommandSet::Finder, Self::Reboot) => EncodedWrite::with_response(
                DATA1,
                &[0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02],
            ),
            (CommandSet::Finder, Self::SetVolume(volume)) => {
                EncodedWrite::with_response(DATA1, &[0x02, 0x00, 0x00, volume as u8])
            }
            (CommandSet::Found, Self::Buzz) => EncodedWrite::with_response(DATA1, &[0x01]),
            (CommandSet::Found, Self::StopBuzz) => EncodedWrite::with_response(DATA1, &[0x02]),
            (CommandSet::Found, Self::Reboot) => EncodedWrite::with_response(DATA1, &[0x07]),
            (CommandSet::Found, Self::SetVolume(volume)) => {
                EncodedWrite::with_response(DATA1, &[0x03, volume as u8])
            }
            (CommandSet::Found, Self::SetTrackingMode(mode)) => {
                EncodedWrite::with_response(DATA1, &[0x08, mode as u8])
            }
            (CommandSet::Found, Self::SetDebugMode(enabled)) => {
                EncodedWrite::with_response(DEBUG_MODE, &[u8::from(enabled)])
            }
            (CommandSet::Mfi, Self::Buzz) => EncodedWrite::without_response(DATA2, &[0x01]),
            (CommandSet::Mfi, Self::StopBuzz) => EncodedWrite::without_response(DATA2, &[0x02]),
            (CommandSet::Honey, Self::Buzz) => return Ok(honey_alert(HONEY_BEEP, hint)),
            _ => return Err(unsupported()),
        };
        Ok(vec![write])
    }
}

/// Robert revision firmware acknowledges the alert level. Older or unknown
/// firmware needs a reset to level 0 first and takes both unacknowledged.
fn honey_alert(level: u8, hint: Option<FirmwareHint>) -> Vec<EncodedWrite> {
    match hint {
        Some(FirmwareHint::RobertRevision) => {
            vec![EncodedWrite::with_response(ALERT_LEVEL, &[level])]
        }
        Some(FirmwareHint::PreRobert | FirmwareHint::Unknown) | None => vec![
            EncodedWrite::without_response(ALERT_LEVEL, &[0x00]),
            EncodedWrite::without_response(ALERT_LEVEL, &[level]),
        ],
    }
}

/// Cellular queries answered over the request characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellularQuery {
    /// Modem IMEI.
    Imei,
    /// Current tracking mode.
    TrackingMode,
    /// LTE link status.
    LteStatus,
    /// SIM ICCID.
    Iccid,
    /// Charger status.
    ChargingStatus,
}

impl CellularQuery {
    /// Returns the request payload.
    #[must_use]
    pub fn request(self) -> Bytes {
        let header: [u8; 2] = match self {
            Self::Imei => [0x04, 0x01],
            Self::TrackingMode => [0x08, 0x05],
            Self::LteStatus => [0x08, 0x04],
            Self::Iccid => [0x20, 0x80],
            Self::ChargingStatus => [0x08, 0x03],
        };
        let mut buf = BytesMut::with_capacity(3);
        buf.put_slice(&header);
        buf.put_u8(0x00);
        buf.freeze()
    }

    /// Returns the encoded request write.
    #[must_use]
    pub fn encode(self) -> EncodedWrite {
        EncodedWrite {
            characteristic: DATA3,
            payload: self.request(),
            mode: WriteMode::WithResponse,
        }
    }

    /// Human-readable query name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Imei => "imei",
            Self::TrackingMode => "tracking mode",
            Self::LteStatus => "lte status",
            Self::Iccid => "iccid",
            Self::ChargingStatus => "charging status",
        }
    }
}

/// Parsed answer to a [`CellularQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResponse {
    /// Modem IMEI.
    Imei(String),
    /// Current tracking mode.
    TrackingMode(TrackingMode),
    /// LTE link status.
    LteStatus(LteStatus),
    /// SIM ICCID as lowercase hex.
    Iccid(String),
    /// Charger status.
    ChargingStatus(ChargingStatus),
}

/// A notification received on the request characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data3Notification {
    /// Unsolicited button action.
    ButtonAction(ButtonState),
    /// Button action with an unknown code; ignored.
    UnknownAction(u8),
    /// Answer to the in-flight query.
    Response(Bytes),
}

/// Classifies a request-characteristic notification.
#[must_use]
pub fn classify_data3(data: Bytes) -> Data3Notification {
    if data.len() > 3 && data.starts_with(&BUTTON_ACTION_HEADER) {
        return match data[3] {
            0x00 => Data3Notification::ButtonAction(ButtonState::Single),
            0x01 => Data3Notification::ButtonAction(ButtonState::Double),
            0x02 => Data3Notification::ButtonAction(ButtonState::Long),
            other => Data3Notification::UnknownAction(other),
        };
    }
    Data3Notification::Response(data)
}

fn read_failed(query: CellularQuery, data: &[u8]) -> Error {
    Error::ReadFailed {
        message: format!("{} response too short: {} bytes", query.name(), data.len()),
    }
}

/// Parses the answer to `query`.
///
/// # Errors
///
/// Returns [`Error::ReadFailed`] if the payload is too short or does not
/// decode.
pub fn parse_query_response(query: CellularQuery, data: &[u8]) -> Result<QueryResponse> {
    match query {
        CellularQuery::Imei => {
            let digits = data.get(3..18).ok_or_else(|| read_failed(query, data))?;
            let imei = std::str::from_utf8(digits).map_err(|e| Error::ReadFailed {
                message: format!("imei is not utf-8: {e}"),
            })?;
            Ok(QueryResponse::Imei(imei.to_owned()))
        }
        CellularQuery::Iccid => {
            let raw = data.get(3..13).ok_or_else(|| read_failed(query, data))?;
            Ok(QueryResponse::Iccid(hex_encode(raw)))
        }
        CellularQuery::TrackingMode => {
            let byte = *data.get(3).ok_or_else(|| read_failed(query, data))?;
            TrackingMode::from_byte(byte)
                .map(QueryResponse::TrackingMode)
                .ok_or_else(|| Error::ReadFailed {
                    message: format!("unknown tracking mode: {byte}"),
                })
        }
        CellularQuery::LteStatus => {
            let byte = *data.get(3).ok_or_else(|| read_failed(query, data))?;
            Ok(QueryResponse::LteStatus(LteStatus::from_byte(byte)))
        }
        CellularQuery::ChargingStatus => {
            let byte = *data.get(3).ok_or_else(|| read_failed(query, data))?;
            Ok(QueryResponse::ChargingStatus(ChargingStatus::from_byte(byte)))
        }
    }
}

/// Parses a battery level characteristic value.
///
/// # Errors
///
/// Returns [`Error::ReadFailed`] if the value is empty.
pub fn parse_battery_level(data: &[u8]) -> Result<f64> {
    data.first()
        .map(|percent| f64::from(*percent))
        .ok_or_else(|| Error::ReadFailed {
            message: "battery level empty".into(),
        })
}

/// Parses a UTF-8 revision string.
///
/// # Errors
///
/// Returns [`Error::ReadFailed`] if the value is not UTF-8.
pub fn parse_revision(data: &[u8]) -> Result<String> {
    std::str::from_utf8(data)
        .map(str::to_owned)
        .map_err(|e| Error::ReadFailed {
            message: format!("revision is not utf-8: {e}"),
        })
}

/// Returns true when a hardware revision string reports application
/// firmware rather than the bootloader.
#[must_use]
pub fn is_verified_hardware_revision(revision: &str) -> bool {
    !revision.contains(BOOTLOADER_MARKER)
}

/// Parses the debug mode characteristic value.
#[must_use]
pub fn parse_debug_mode(data: &[u8]) -> bool {
    data.first() == Some(&0x01)
}
