//! Firmware image records.
//!
//! Images are Intel-HEX-like text. Each line decodes to
//! `[count, addr_hi, addr_lo, type, data.., checksum]` and the sum of all of
//! its bytes must be zero modulo 256.

use crate::error::FirmwareError;
use crate::protocol::codec::hex_decode;

/// Bytes in a record besides its data.
const RECORD_OVERHEAD: usize = 5;

/// Record types the flasher acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// Data bytes at a 16-bit offset.
    Data,
    /// End of file.
    EndOfFile,
    /// Upper address byte for the following data records.
    ExtendedAddress,
    /// Any other type; skipped.
    Other(u8),
}

impl RecordType {
    /// Converts from the raw type byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Data,
            0x01 => Self::EndOfFile,
            0x04 => Self::ExtendedAddress,
            other => Self::Other(other),
        }
    }
}

/// A decoded, checksum-verified image record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Lower 16 bits of the load address.
    pub address: u16,
    /// Record type.
    pub kind: RecordType,
    /// Data bytes.
    pub data: Vec<u8>,
}

impl HexRecord {
    /// Decodes one line. `line_number` is only used in errors.
    pub fn parse(line: &str, line_number: usize) -> Result<Self, FirmwareError> {
        let corrupted = |reason: String| FirmwareError::CorruptedImage {
            line: line_number,
            reason,
        };

        let bytes = hex_decode(line).map_err(|e| corrupted(e.to_string()))?;

        if bytes.len() < RECORD_OVERHEAD {
            return Err(corrupted(format!("record too short: {} bytes", bytes.len())));
        }

        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if sum != 0 {
            return Err(corrupted(format!("record checksum off by {sum:#04x}")));
        }

        let count = usize::from(bytes[0]);
        if bytes.len() < count + RECORD_OVERHEAD {
            return Err(corrupted(format!(
                "record declares {count} data bytes but has {}",
                bytes.len() - RECORD_OVERHEAD
            )));
        }

        Ok(Self {
            address: u16::from_be_bytes([bytes[1], bytes[2]]),
            kind: RecordType::from_byte(bytes[3]),
            data: bytes[4..4 + count].to_vec(),
        })
    }
}

/// A firmware image split into record lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    lines: Vec<String>,
}

impl FirmwareImage {
    /// Splits raw image bytes into record lines.
    ///
    /// Carriage returns and record colons are dropped.
    pub fn parse(image: &[u8]) -> Result<Self, FirmwareError> {
        let text = std::str::from_utf8(image).map_err(|e| FirmwareError::CorruptedImage {
            line: 0,
            reason: format!("image is not utf-8: {e}"),
        })?;

        let cleaned: String = text.chars().filter(|c| *c != '\r' && *c != ':').collect();
        let lines = cleaned.split('\n').map(str::to_owned).collect();
        Ok(Self { lines })
    }

    /// Number of lines, including a trailing empty one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns true if the image has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns a line by index.
    #[must_use]
    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }
}
