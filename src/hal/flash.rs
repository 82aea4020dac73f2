//! Erase-before-write flash media.
//!
//! Programming a flash cell can only clear bits. Writing over bytes that were
//! not erased first silently stores `old & new`; no medium here reports that
//! as an error, so callers must erase the containing sector themselves.

use core::fmt;
use core::ops::{Range, RangeInclusive};

use super::AddressWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Address or length outside the medium.
    OutOfRange,
    /// Device stayed busy past the polling bound.
    Timeout,
    /// Transport (SPI/QSPI) failure.
    Bus,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::OutOfRange => f.write_str("address outside flash"),
            FlashError::Timeout => f.write_str("flash busy timeout"),
            FlashError::Bus => f.write_str("flash bus error"),
        }
    }
}

impl ufmt::uDebug for FlashError {
    fn fmt<W: ufmt::uWrite + ?Sized>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error> {
        f.write_str(match self {
            FlashError::OutOfRange => "OutOfRange",
            FlashError::Timeout => "Timeout",
            FlashError::Bus => "Bus",
        })
    }
}

/// Run of `count` consecutive sectors of `size` bytes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorGroup {
    pub count: u16,
    pub size: u32,
}

impl SectorGroup {
    pub const fn new(count: u16, size: u32) -> Self {
        Self { count, size }
    }
}

/// Physical layout of a flash device: sector groups laid out from `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorMap {
    base: u32,
    groups: &'static [SectorGroup],
}

impl SectorMap {
    pub const fn new(base: u32, groups: &'static [SectorGroup]) -> Self {
        Self { base, groups }
    }

    #[inline]
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.groups
            .iter()
            .map(|g| g.count as u32 * g.size)
            .sum()
    }

    pub fn window(&self) -> AddressWindow {
        AddressWindow::new(self.base, self.base + self.size())
    }

    pub fn sector_count(&self) -> usize {
        self.groups.iter().map(|g| g.count as usize).sum()
    }

    /// Index of the sector holding `addr`.
    pub fn sector_at(&self, addr: u32) -> Option<usize> {
        if addr < self.base {
            return None;
        }
        let mut offset = addr - self.base;
        let mut index = 0usize;
        for group in self.groups {
            let span = group.count as u32 * group.size;
            if offset < span {
                return Some(index + (offset / group.size) as usize);
            }
            offset -= span;
            index += group.count as usize;
        }
        None
    }

    /// Address range covered by sector `index`.
    pub fn sector_span(&self, index: usize) -> Option<Range<u32>> {
        let mut start = self.base;
        let mut first = 0usize;
        for group in self.groups {
            let count = group.count as usize;
            if index < first + count {
                let s = start + (index - first) as u32 * group.size;
                return Some(s..s + group.size);
            }
            start += group.count as u32 * group.size;
            first += count;
        }
        None
    }

    /// Sectors touched by `addr..addr + len`; `None` if any byte falls
    /// outside the map or `len` is zero.
    pub fn sectors_covering(&self, addr: u32, len: usize) -> Option<RangeInclusive<usize>> {
        if len == 0 || !self.window().contains_range(addr, len) {
            return None;
        }
        let last = addr + (len as u32 - 1);
        Some(self.sector_at(addr)?..=self.sector_at(last)?)
    }
}

/// A flash device addressed physically.
///
/// All operations block until the device is idle again; erase of a large
/// sector can take hundreds of milliseconds.
pub trait FlashMedium {
    fn sectors(&self) -> &SectorMap;

    /// Sets every byte of sector `index` to `0xFF`.
    fn erase_sector(&mut self, index: usize) -> Result<(), FlashError>;

    /// Programs `data` at `addr`. Only clears bits; see the module docs.
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError>;

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError>;
}

impl<F: FlashMedium + ?Sized> FlashMedium for &mut F {
    fn sectors(&self) -> &SectorMap {
        (**self).sectors()
    }

    fn erase_sector(&mut self, index: usize) -> Result<(), FlashError> {
        (**self).erase_sector(index)
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        (**self).program(addr, data)
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(addr, buf)
    }
}
