//! SPI NOR flash driver (W25Q-class command set).
//!
//! Addresses handed to [`FlashMedium`] are physical; the driver subtracts the
//! sector map base to form the 24-bit device offset.

use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

use crate::hal::{FlashError, FlashMedium, SectorMap};

const WRITE_ENABLE: u8 = 0x06;
const READ_STATUS: u8 = 0x05;
const READ_DATA: u8 = 0x03;
const PAGE_PROGRAM: u8 = 0x02;
const SECTOR_ERASE: u8 = 0x20;
const BLOCK_ERASE_32K: u8 = 0x52;
const BLOCK_ERASE_64K: u8 = 0xD8;

const STATUS_BUSY: u8 = 0x01;

pub const PAGE_SIZE: usize = 256;
const SECTOR_SIZE: u32 = 4096;
const BLOCK_SIZE_32K: u32 = 32768;
const BLOCK_SIZE_64K: u32 = 65536;

/// Status polls before a busy device is reported as [`FlashError::Timeout`].
pub const DEFAULT_POLL_LIMIT: u32 = 200_000;

pub struct SpiNorFlash<SPI, CS> {
    spi: SPI,
    cs: CS,
    map: SectorMap,
    poll_limit: u32,
}

impl<SPI, CS> SpiNorFlash<SPI, CS>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
{
    pub fn new(spi: SPI, cs: CS, map: SectorMap) -> Self {
        Self {
            spi,
            cs,
            map,
            poll_limit: DEFAULT_POLL_LIMIT,
        }
    }

    pub fn with_poll_limit(mut self, polls: u32) -> Self {
        self.poll_limit = polls.max(1);
        self
    }

    /// Gives the bus and chip-select pin back.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    fn device_offset(&self, addr: u32, len: usize) -> Result<u32, FlashError> {
        if !self.map.window().contains_range(addr, len.max(1)) {
            return Err(FlashError::OutOfRange);
        }
        Ok(addr - self.map.base())
    }

    fn select(&mut self) -> Result<(), FlashError> {
        self.cs.set_low().map_err(|_| FlashError::Bus)
    }

    fn deselect(&mut self) -> Result<(), FlashError> {
        self.cs.set_high().map_err(|_| FlashError::Bus)
    }

    /// Sends `bytes` as one chip-select framed command.
    fn command(&mut self, bytes: &[u8]) -> Result<(), FlashError> {
        self.select()?;
        let sent = self.spi.write(bytes).map_err(|_| FlashError::Bus);
        self.deselect()?;
        sent
    }

    fn read_status(&mut self) -> Result<u8, FlashError> {
        let mut frame = [READ_STATUS, 0x00];
        self.select()?;
        let status = self
            .spi
            .transfer(&mut frame)
            .map(|rx| rx[1])
            .map_err(|_| FlashError::Bus);
        self.deselect()?;
        status
    }

    fn wait_busy(&mut self) -> Result<(), FlashError> {
        for _ in 0..self.poll_limit {
            if self.read_status()? & STATUS_BUSY == 0 {
                return Ok(());
            }
        }
        log::warn!("flash: busy after {} polls", self.poll_limit);
        Err(FlashError::Timeout)
    }

    fn write_enable(&mut self) -> Result<(), FlashError> {
        self.command(&[WRITE_ENABLE])
    }

    fn erase_at(&mut self, opcode: u8, offset: u32) -> Result<(), FlashError> {
        self.wait_busy()?;
        self.write_enable()?;
        self.command(&frame(opcode, offset))?;
        self.wait_busy()
    }

    fn write_page(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        self.wait_busy()?;
        self.write_enable()?;

        self.select()?;
        let sent = self
            .spi
            .write(&frame(PAGE_PROGRAM, offset))
            .and_then(|_| self.spi.write(data))
            .map_err(|_| FlashError::Bus);
        self.deselect()?;
        sent?;

        self.wait_busy()
    }
}

impl<SPI, CS> FlashMedium for SpiNorFlash<SPI, CS>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
{
    fn sectors(&self) -> &SectorMap {
        &self.map
    }

    fn erase_sector(&mut self, index: usize) -> Result<(), FlashError> {
        let span = self.map.sector_span(index).ok_or(FlashError::OutOfRange)?;
        let offset = span.start - self.map.base();
        let size = span.end - span.start;
        log::debug!("flash: erase sector {} ({} bytes)", index, size);

        match size {
            SECTOR_SIZE => self.erase_at(SECTOR_ERASE, offset),
            BLOCK_SIZE_32K => self.erase_at(BLOCK_ERASE_32K, offset),
            BLOCK_SIZE_64K => self.erase_at(BLOCK_ERASE_64K, offset),
            _ if size % SECTOR_SIZE == 0 => {
                for sub in (0..size).step_by(SECTOR_SIZE as usize) {
                    self.erase_at(SECTOR_ERASE, offset + sub)?;
                }
                Ok(())
            }
            _ => Err(FlashError::OutOfRange),
        }
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut offset = self.device_offset(addr, data.len())?;
        let mut rest = data;
        while !rest.is_empty() {
            // A page program wraps inside its page; never cross a boundary.
            let room = PAGE_SIZE - (offset as usize % PAGE_SIZE);
            let (chunk, tail) = rest.split_at(room.min(rest.len()));
            self.write_page(offset, chunk)?;
            offset += chunk.len() as u32;
            rest = tail;
        }
        Ok(())
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        if buf.is_empty() {
            return Ok(());
        }
        let offset = self.device_offset(addr, buf.len())?;
        self.wait_busy()?;

        buf.fill(0);
        self.select()?;
        let read = self
            .spi
            .write(&frame(READ_DATA, offset))
            .map_err(|_| FlashError::Bus)
            .and_then(|_| self.spi.transfer(buf).map(|_| ()).map_err(|_| FlashError::Bus));
        self.deselect()?;
        read
    }
}

fn frame(opcode: u8, offset: u32) -> [u8; 4] {
    [opcode, (offset >> 16) as u8, (offset >> 8) as u8, offset as u8]
}
