//! Sans-IO firmware update sequencer.
//!
//! [`OtaContext`] owns the image, the RAM window and the running checksums
//! and turns every acknowledgement into the next [`Step`]. It never touches
//! the transport, so the whole protocol can be exercised synchronously.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use super::image::{FirmwareImage, HexRecord, RecordType};
use super::layout::{
    APP0_SIZE, APP1_SIZE, AppRegion, BOOT_FLAG_ADDRESS, BOOT_FLAG_SIZE, Bank, PAGE_SIZE,
    RAM_APP0_BASE, RegionTotals,
};
use crate::error::FirmwareError;
use crate::protocol::codec::read_be_u32;
use crate::protocol::uuids::{
    CHECK_FLAG, CHECKSUM1, CHECKSUM2, ERASE, FLAG_CHANGE, FLASH_CLOSE, FLASH_OPEN, MEMORY_WRITE,
    VERSION_CHECK,
};

/// Size of the RAM window filled by one analysis pass.
pub const WINDOW_SIZE: usize = 4096;

/// Payload bytes per memory write frame.
pub const FRAME_DATA_LEN: usize = 16;

/// Token written to the version check characteristic ("2.0").
pub const VERSION_TOKEN: [u8; 3] = [0x32, 0x2E, 0x30];

const OPEN_COMMAND: [u8; 5] = [0x01, 0x00, 0x00, 0x00, 0x00];
const CLOSE_COMMAND: [u8; 1] = [0x01];
const END_MAGIC: [u8; 4] = [0x10, 0x48, 0x55, 0xAA];
const END2_PADDING: usize = 14;

/// Erase sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseStep {
    /// Single header page.
    Header,
    /// App0 pages.
    App0,
    /// App1 pages.
    App1,
}

/// Update phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Version token written.
    VersionCheck,
    /// Flash opened.
    OpenMemory,
    /// Boot flag descriptor written.
    FlagRead,
    /// Erasing pages.
    EraseSequence(EraseStep),
    /// Alternating analysis and flush passes.
    MainWrite,
    /// Verifying app0.
    ChecksumVerifyA,
    /// Verifying app1.
    ChecksumVerifyB,
    /// Header record written.
    WriteEnd1,
    /// Header terminator written.
    WriteEnd2,
    /// Boot flag switched.
    FlagChange,
    /// Flash closed.
    CloseMemory,
    /// Terminal success.
    Succeeded,
    /// Terminal failure.
    Failed(FirmwareError),
}

impl Phase {
    /// Returns true for `Succeeded` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Write `payload` with response, reporting `progress` first if set.
    Write {
        characteristic: Uuid,
        payload: Bytes,
        progress: Option<u8>,
    },
    /// Read `characteristic` and feed the value to [`OtaContext::on_read`].
    Read { characteristic: Uuid },
    /// The update finished.
    Done,
}

impl Step {
    fn write(characteristic: Uuid, payload: impl Into<Bytes>, progress: Option<u8>) -> Self {
        Self::Write {
            characteristic,
            payload: payload.into(),
            progress,
        }
    }
}

/// State of one firmware update.
#[derive(Debug)]
pub struct OtaContext {
    image: FirmwareImage,
    bank: Bank,
    phase: Phase,
    cursor: usize,
    window: Box<[u8; WINDOW_SIZE]>,
    window_base: Option<u32>,
    write: usize,
    flush: usize,
    upper_address: u8,
    totals: RegionTotals,
    erase_address: u32,
}

impl OtaContext {
    /// Creates a context for `image` targeting `bank`.
    pub fn new(image: &[u8], bank: Bank) -> Result<Self, FirmwareError> {
        Ok(Self {
            image: FirmwareImage::parse(image)?,
            bank,
            phase: Phase::VersionCheck,
            cursor: 0,
            window: Box::new([0; WINDOW_SIZE]),
            window_base: None,
            write: 0,
            flush: 0,
            // Data before any extended address record lands in app0 RAM.
            upper_address: (RAM_APP0_BASE >> 16) as u8,
            totals: RegionTotals::default(),
            erase_address: 0,
        })
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Target bank.
    #[must_use]
    pub const fn bank(&self) -> Bank {
        self.bank
    }

    /// Accumulated checksum and size per region.
    #[must_use]
    pub const fn totals(&self) -> &RegionTotals {
        &self.totals
    }

    /// First step of the update.
    #[must_use]
    pub fn start(&mut self) -> Step {
        self.phase = Phase::VersionCheck;
        Step::write(VERSION_CHECK, Bytes::from_static(&VERSION_TOKEN), Some(1))
    }

    /// Advances after the previous write was acknowledged.
    pub fn on_write_ack(&mut self) -> Result<Step, FirmwareError> {
        let result = self.advance_after_write();
        self.settle(result)
    }

    /// Advances with the value of a checksum read.
    pub fn on_read(&mut self, value: &[u8]) -> Result<Step, FirmwareError> {
        let result = self.verify_checksum(value);
        self.settle(result)
    }

    /// Moves to `Failed(Cancelled)` and returns the best-effort close write.
    ///
    /// Returns `None` if the update already terminated.
    pub fn cancel(&mut self) -> Option<Step> {
        if self.phase.is_terminal() {
            return None;
        }
        self.phase = Phase::Failed(FirmwareError::Cancelled);
        Some(Step::write(FLASH_CLOSE, Bytes::from_static(&CLOSE_COMMAND), None))
    }

    /// Records a transport failure as terminal.
    pub fn fail(&mut self, error: FirmwareError) -> FirmwareError {
        self.phase = Phase::Failed(error.clone());
        error
    }

    fn settle(&mut self, result: Result<Step, FirmwareError>) -> Result<Step, FirmwareError> {
        match result {
            Ok(step) => Ok(step),
            Err(error) => Err(self.fail(error)),
        }
    }

    fn advance_after_write(&mut self) -> Result<Step, FirmwareError> {
        match self.phase {
            Phase::VersionCheck => {
                self.phase = Phase::OpenMemory;
                Ok(Step::write(FLASH_OPEN, Bytes::from_static(&OPEN_COMMAND), Some(2)))
            }
            Phase::OpenMemory => {
                self.phase = Phase::FlagRead;
                Ok(Step::write(CHECK_FLAG, flag_descriptor(), Some(3)))
            }
            Phase::FlagRead => {
                self.phase = Phase::EraseSequence(EraseStep::Header);
                Ok(erase(self.bank.header_address()))
            }
            Phase::EraseSequence(step) => self.next_erase(step),
            Phase::MainWrite => {
                if self.flush < self.write {
                    self.next_frame()
                } else {
                    self.analyze()
                }
            }
            Phase::ChecksumVerifyA | Phase::ChecksumVerifyB => Ok(Step::Read {
                characteristic: CHECKSUM2,
            }),
            Phase::WriteEnd1 => {
                self.phase = Phase::WriteEnd2;
                Ok(Step::write(MEMORY_WRITE, self.end2_record(), Some(98)))
            }
            Phase::WriteEnd2 => {
                self.phase = Phase::FlagChange;
                let mut payload = BytesMut::from(&flag_descriptor()[..]);
                payload.put_u8(self.bank.selector());
                Ok(Step::write(FLAG_CHANGE, payload.freeze(), Some(99)))
            }
            Phase::FlagChange => {
                self.phase = Phase::CloseMemory;
                Ok(Step::write(FLASH_CLOSE, Bytes::from_static(&CLOSE_COMMAND), None))
            }
            Phase::CloseMemory => {
                self.phase = Phase::Succeeded;
                Ok(Step::Done)
            }
            Phase::Succeeded | Phase::Failed(_) => Ok(Step::Done),
        }
    }

    fn next_erase(&mut self, step: EraseStep) -> Result<Step, FirmwareError> {
        let step = match step {
            EraseStep::Header => {
                self.erase_address = self.bank.app0_address();
                EraseStep::App0
            }
            other => other,
        };
        let (start, size) = match step {
            EraseStep::App1 => (self.bank.app1_address(), APP1_SIZE),
            _ => (self.bank.app0_address(), APP0_SIZE),
        };

        if self.erase_address < start + size {
            let address = self.erase_address;
            self.erase_address += PAGE_SIZE;
            self.phase = Phase::EraseSequence(step);
            return Ok(erase(address));
        }

        if step == EraseStep::App0 {
            self.erase_address = self.bank.app1_address();
            return self.next_erase(EraseStep::App1);
        }

        self.phase = Phase::MainWrite;
        self.analyze()
    }

    fn reset_window(&mut self) {
        self.window.fill(0);
        self.window_base = None;
        self.write = 0;
        self.flush = 0;
    }

    /// Fills the window from the image until it must be flushed.
    fn analyze(&mut self) -> Result<Step, FirmwareError> {
        self.reset_window();

        loop {
            let line = match self.image.line(self.cursor) {
                Some(line) if !line.is_empty() => line,
                _ => return self.end_of_image(),
            };
            let record = HexRecord::parse(line, self.cursor + 1)?;

            match record.kind {
                RecordType::Data => {
                    if !self.buffer(&record) {
                        return self.begin_flush();
                    }
                    self.cursor += 1;
                    if WINDOW_SIZE - self.write < FRAME_DATA_LEN {
                        return self.begin_flush();
                    }
                }
                RecordType::ExtendedAddress => {
                    self.cursor += 1;
                    let upper = record.data.get(1).copied().ok_or_else(|| {
                        FirmwareError::CorruptedImage {
                            line: self.cursor,
                            reason: "extended address record too short".into(),
                        }
                    })?;
                    self.upper_address = upper;
                    if !(0x81..=0x82).contains(&upper) {
                        return self.begin_flush();
                    }
                }
                RecordType::EndOfFile => {
                    self.cursor += 1;
                    if self.write == 0 {
                        return self.end_of_image();
                    }
                    return self.begin_flush();
                }
                RecordType::Other(_) => self.cursor += 1,
            }
        }
    }

    /// Copies a data record into the window. Returns false if it belongs to
    /// the next window.
    fn buffer(&mut self, record: &HexRecord) -> bool {
        let address = (u32::from(self.upper_address) << 16) | u32::from(record.address);
        let base = *self.window_base.get_or_insert(address);

        let Some(offset) = address.checked_sub(base).and_then(|o| usize::try_from(o).ok()) else {
            return false;
        };
        let end = offset + record.data.len();
        if offset < self.write || end > WINDOW_SIZE {
            return false;
        }

        self.window[offset..end].copy_from_slice(&record.data);
        let region = AppRegion::of(base);
        for byte in &record.data {
            self.totals.add(region, *byte);
        }
        self.write = end;
        true
    }

    fn end_of_image(&mut self) -> Result<Step, FirmwareError> {
        if self.write > 0 {
            return self.begin_flush();
        }
        self.phase = Phase::ChecksumVerifyA;
        Ok(self.checksum_request(AppRegion::App0, 92))
    }

    fn begin_flush(&mut self) -> Result<Step, FirmwareError> {
        if self.write == 0 {
            // Nothing buffered; keep analyzing in a fresh window.
            return self.analyze();
        }
        self.next_frame()
    }

    fn next_frame(&mut self) -> Result<Step, FirmwareError> {
        let base = self.window_base.unwrap_or_default();
        let offset = u32::try_from(self.flush).unwrap_or(u32::MAX);
        let address = self.bank.flash_address(base)?.saturating_add(offset);
        self.bank.check_address(address)?;

        let end = (self.flush + FRAME_DATA_LEN).min(self.write);
        let mut payload = BytesMut::with_capacity(4 + FRAME_DATA_LEN);
        payload.put_u32(address);
        payload.put_slice(&self.window[self.flush..end]);
        self.flush = end;

        Ok(Step::write(
            MEMORY_WRITE,
            payload.freeze(),
            Some(self.main_write_progress()),
        ))
    }

    fn main_write_progress(&self) -> u8 {
        let lines = self.image.len().max(1);
        let scaled = 10 + self.cursor.min(lines) * 80 / lines;
        u8::try_from(scaled).unwrap_or(90)
    }

    fn checksum_request(&self, region: AppRegion, progress: u8) -> Step {
        let mut payload = BytesMut::with_capacity(8);
        payload.put_u32(self.bank.region_address(region));
        payload.put_u32(self.totals.size(region));
        Step::write(CHECKSUM1, payload.freeze(), Some(progress))
    }

    fn verify_checksum(&mut self, value: &[u8]) -> Result<Step, FirmwareError> {
        let region = match self.phase {
            Phase::ChecksumVerifyA => AppRegion::App0,
            Phase::ChecksumVerifyB => AppRegion::App1,
            _ => return Err(FirmwareError::ReadFailed),
        };

        let expected = self.totals.checksum(region);
        let received = if value.len() == 4 {
            read_be_u32(value, 0)
        } else {
            None
        };
        if received != Some(expected) {
            return Err(FirmwareError::ChecksumMismatch {
                region,
                expected,
                received,
            });
        }

        tracing::debug!("{region} checksum verified: {expected:#010x}");
        Ok(match region {
            AppRegion::App0 => {
                self.phase = Phase::ChecksumVerifyB;
                self.checksum_request(AppRegion::App1, 94)
            }
            AppRegion::App1 => {
                self.phase = Phase::WriteEnd1;
                Step::write(MEMORY_WRITE, self.end1_record(), Some(96))
            }
        })
    }

    fn end1_record(&self) -> Bytes {
        let mut payload = BytesMut::with_capacity(20);
        payload.put_u32(self.bank.header_address());
        payload.put_u32(self.totals.size(AppRegion::App0));
        payload.put_u32(self.totals.checksum(AppRegion::App0));
        payload.put_slice(&END_MAGIC);
        let page = self.bank.app0_address() / PAGE_SIZE;
        payload.put_u16(u16::try_from(page).unwrap_or(u16::MAX));
        payload.put_bytes(0, 2);
        payload.freeze()
    }

    fn end2_record(&self) -> Bytes {
        let mut payload = BytesMut::with_capacity(4 + END2_PADDING);
        payload.put_u32(self.bank.header_address() + 0x10);
        payload.put_bytes(0, END2_PADDING);
        payload.freeze()
    }
}

fn flag_descriptor() -> Bytes {
    let mut payload = BytesMut::with_capacity(9);
    payload.put_u32(BOOT_FLAG_ADDRESS);
    payload.put_u32(BOOT_FLAG_SIZE);
    payload.freeze()
}

fn erase(address: u32) -> Step {
    Step::write(ERASE, address.to_be_bytes().to_vec(), Some(10))
}
