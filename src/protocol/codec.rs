//! Binary field helpers shared by the advertisement decoder and the OTA engine.
//!
//! All readers are bounds-checked and return `None` instead of panicking when
//! the requested range runs past the end of the buffer.

use crate::error::CodecError;

/// A single bit of a packed flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bit {
    /// Bit is cleared.
    Zero,
    /// Bit is set.
    One,
}

impl Bit {
    /// Returns true if the bit is set.
    #[must_use]
    pub const fn is_set(self) -> bool {
        matches!(self, Self::One)
    }
}

/// Integers that can be expanded into their individual bits.
pub trait BitWidth: Copy {
    /// Declared width of the integer in bits.
    const BITS: u32;

    /// Returns whether bit `index` (0 = least significant) is set.
    fn bit(self, index: u32) -> bool;
}

macro_rules! impl_bit_width {
    ($($ty:ty),*) => {
        $(
            impl BitWidth for $ty {
                const BITS: u32 = <$ty>::BITS;

                fn bit(self, index: u32) -> bool {
                    (self >> index) & 1 == 1
                }
            }
        )*
    };
}

impl_bit_width!(u8, u16, u32, u64);

/// Reads a single byte at `offset`.
#[must_use]
pub fn read_u8(bytes: &[u8], offset: usize) -> Option<u8> {
    bytes.get(offset).copied()
}

/// Reads a big-endian `u16` from `[offset, offset + 2)`.
#[must_use]
pub fn read_be_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let end = offset.checked_add(2)?;
    let slice = bytes.get(offset..end)?;
    Some(u16::from_be_bytes([slice[0], slice[1]]))
}

/// Reads a little-endian `u16` from `[offset, offset + 2)`.
#[must_use]
pub fn read_le_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let end = offset.checked_add(2)?;
    let slice = bytes.get(offset..end)?;
    Some(u16::from_le_bytes([slice[0], slice[1]]))
}

/// Reads a big-endian `u32` from `[offset, offset + 4)`.
#[must_use]
pub fn read_be_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    let slice = bytes.get(offset..end)?;
    Some(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// Expands an integer into its bits, least significant first.
///
/// The result always has exactly `T::BITS` entries, so index 0 is the lowest
/// flag of a packed byte and index 7 its highest.
#[must_use]
pub fn bits_of<T: BitWidth>(value: T) -> Vec<Bit> {
    (0..T::BITS)
        .map(|index| if value.bit(index) { Bit::One } else { Bit::Zero })
        .collect()
}

/// Encodes bytes as lowercase hex with no separators.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes a hex string.
///
/// Fails on odd length or any non-hex character. On success the output is
/// exactly half the input length.
pub fn hex_decode(text: &str) -> Result<Vec<u8>, CodecError> {
    if text.len() % 2 != 0 {
        return Err(CodecError::OddLength(text.len()));
    }
    hex::decode(text).map_err(|err| match err {
        hex::FromHexError::InvalidHexCharacter { c, index } => CodecError::InvalidHexCharacter {
            character: c,
            index,
        },
        hex::FromHexError::OddLength | hex::FromHexError::InvalidStringLength => {
            CodecError::OddLength(text.len())
        }
    })
}
