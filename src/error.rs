//! Error types for the pebblebee library.

use thiserror::Error;

use crate::ota::AppRegion;
use crate::session::RequestKind;
use crate::types::{DeviceModel, MacAddress};

/// The main error type for pebblebee operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The Bluetooth central is not authorized for use.
    #[error("bluetooth unauthorized")]
    Unauthorized,

    /// The device is mid-transition or its state could not be read.
    #[error("could not determine device state")]
    UnknownDeviceState,

    /// The transport failed to connect the peripheral.
    #[error("could not connect device")]
    ConnectionFailed,

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// A request of the same kind is already in flight for this device.
    #[error("request already pending: {kind:?}")]
    Busy { kind: RequestKind },

    /// Writing a characteristic failed.
    #[error("error writing characteristic: {message}")]
    WriteFailed { message: String },

    /// Reading a characteristic failed or returned an unusable value.
    #[error("error reading characteristic: {message}")]
    ReadFailed { message: String },

    /// A value was rejected as out of the allowed range.
    #[error("value not accepted: {reason}")]
    ValueNotAccepted { reason: String },

    /// The model does not support the requested operation.
    #[error("{model} does not support {operation}")]
    Unsupported {
        model: DeviceModel,
        operation: &'static str,
    },

    /// The connected firmware does not expose the required characteristic.
    #[error("feature not available in firmware")]
    FeatureNotAvailable,

    /// Request timed out waiting for a response.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// No session exists for the given MAC address.
    #[error("unknown device: {mac}")]
    UnknownDevice { mac: MacAddress },

    /// Error reported by the transport collaborator.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Binary field decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Firmware update failed.
    #[error("firmware update failed: {0}")]
    Firmware(#[from] FirmwareError),

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    /// Builds a timeout error from a duration.
    #[must_use]
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Binary field codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Hex string has an odd number of characters.
    #[error("odd hex length: {0} characters")]
    OddLength(usize),

    /// Hex string contains a character outside `[0-9a-fA-F]`.
    #[error("invalid hex character {character:?} at index {index}")]
    InvalidHexCharacter { character: char, index: usize },
}

/// Terminal failures of a firmware update.
///
/// Every variant ends the update attempt; the device must be flashed again
/// from the beginning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FirmwareError {
    /// Device state could not be determined before starting.
    #[error("could not determine device state")]
    UnknownDeviceState,

    /// Transport-level connection failure.
    #[error("could not connect device")]
    ConnectionFailed,

    /// A phase write was rejected by the transport.
    #[error("error writing characteristic")]
    WriteFailed,

    /// The checksum read-back failed.
    #[error("error reading characteristic")]
    ReadFailed,

    /// No acknowledgement arrived in time.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Computed flash address is outside the selected bank.
    #[error("write to overflowed address {address:#07x}")]
    OverflowedAddress { address: u32 },

    /// Image is not valid UTF-8 or a record failed to decode.
    #[error("corrupted image at line {line}: {reason}")]
    CorruptedImage { line: usize, reason: String },

    /// Device-side checksum disagrees with the locally accumulated one.
    #[error("checksum verification failed for {region}: expected {expected:#010x}, got {received:?}")]
    ChecksumMismatch {
        region: AppRegion,
        expected: u32,
        received: Option<u32>,
    },

    /// Update was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,
}

/// Result type alias for pebblebee operations.
pub type Result<T> = std::result::Result<T, Error>;
