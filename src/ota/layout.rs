//! Flash memory layout of the Toshiba dual-bank bootloader.

use std::fmt;

use crate::error::FirmwareError;

/// Size of one erasable flash page.
pub const PAGE_SIZE: u32 = 0x1000;

/// Boot flag area address.
pub const BOOT_FLAG_ADDRESS: u32 = 0x5200;

/// Boot flag area size.
pub const BOOT_FLAG_SIZE: u32 = 0xE00;

/// Size of the app0 region in either bank.
pub const APP0_SIZE: u32 = 0x12000;

/// Size of the app1 region in either bank.
pub const APP1_SIZE: u32 = 0;

/// First RAM address mapped onto app0.
pub const RAM_APP0_BASE: u32 = 0x0081_0B00;

/// Last RAM address mapped onto app0.
pub const RAM_APP0_END: u32 = 0x0082_3B8B;

/// First RAM address mapped onto app1.
pub const RAM_APP1_BASE: u32 = 0x0082_4000;

/// Flash bank receiving the new image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Bank {
    /// Lower bank.
    #[default]
    A,
    /// Upper bank.
    B,
}

impl Bank {
    /// Byte written with the boot flag to activate this bank.
    #[must_use]
    pub const fn selector(self) -> u8 {
        match self {
            Self::A => 0x00,
            Self::B => 0x01,
        }
    }

    /// Image header address.
    #[must_use]
    pub const fn header_address(self) -> u32 {
        match self {
            Self::A => 0x4000,
            Self::B => 0x5000,
        }
    }

    /// First flash address of app0.
    #[must_use]
    pub const fn app0_address(self) -> u32 {
        match self {
            Self::A => 0x6000,
            Self::B => 0x18000,
        }
    }

    /// First flash address of app1.
    #[must_use]
    pub const fn app1_address(self) -> u32 {
        match self {
            Self::A => 0x20000,
            Self::B => 0x21000,
        }
    }

    /// First flash address of `region`.
    #[must_use]
    pub const fn region_address(self, region: AppRegion) -> u32 {
        match region {
            AppRegion::App0 => self.app0_address(),
            AppRegion::App1 => self.app1_address(),
        }
    }

    /// Returns an error unless `address` lies in this bank's app0 or app1
    /// range. Both ranges include their end address.
    pub fn check_address(self, address: u32) -> Result<(), FirmwareError> {
        let in_region = |start: u32, size: u32| address >= start && address <= start + size;
        if in_region(self.app0_address(), APP0_SIZE) || in_region(self.app1_address(), APP1_SIZE) {
            Ok(())
        } else {
            Err(FirmwareError::OverflowedAddress { address })
        }
    }

    /// Maps a RAM window base onto this bank's flash.
    pub fn flash_address(self, ram_address: u32) -> Result<u32, FirmwareError> {
        match AppRegion::of(ram_address) {
            AppRegion::App0 => ram_address
                .checked_sub(RAM_APP0_BASE)
                .map(|offset| self.app0_address() + offset),
            AppRegion::App1 => Some(self.app1_address() + (ram_address - RAM_APP1_BASE)),
        }
        .ok_or(FirmwareError::OverflowedAddress {
            address: ram_address,
        })
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("bank A"),
            Self::B => f.write_str("bank B"),
        }
    }
}

/// Application region of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppRegion {
    /// Main application.
    App0,
    /// Secondary application.
    App1,
}

impl AppRegion {
    /// Region a RAM address belongs to.
    #[must_use]
    pub const fn of(ram_address: u32) -> Self {
        if ram_address < RAM_APP1_BASE {
            Self::App0
        } else {
            Self::App1
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::App0 => 0,
            Self::App1 => 1,
        }
    }
}

impl fmt::Display for AppRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App0 => f.write_str("app0"),
            Self::App1 => f.write_str("app1"),
        }
    }
}

/// Running checksum and byte count per region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionTotals {
    sums: [u32; 2],
    sizes: [u32; 2],
}

impl RegionTotals {
    /// Adds one image byte to `region`.
    pub fn add(&mut self, region: AppRegion, byte: u8) {
        let i = region.index();
        self.sums[i] = self.sums[i].wrapping_add(u32::from(byte));
        self.sizes[i] += 1;
    }

    /// Accumulated checksum of `region`.
    #[must_use]
    pub const fn checksum(&self, region: AppRegion) -> u32 {
        self.sums[region.index()]
    }

    /// Accumulated byte count of `region`.
    #[must_use]
    pub const fn size(&self, region: AppRegion) -> u32 {
        self.sizes[region.index()]
    }
}
