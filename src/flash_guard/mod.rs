//! Permission-gated flash erase and program.
//!
//! The guard never erases on its own behalf before a write. Programming only
//! clears bits, so writing over a range that was not erased stores
//! `old & new` and still reports success; the medium cannot tell. Callers
//! that need exact content (backups included) erase first.
//!
//! Every call blocks until the medium is idle. A 64 KiB sector erase is the
//! longest single operation.

pub mod backup;

use core::fmt;

use crate::hal::{FlashError, FlashMedium, SectorMap};
use crate::preferences::Preferences;

pub use backup::{BackupError, RestoreMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardError {
    /// Write permission is off; flash was not touched.
    PermissionDenied,
    /// Address, or some byte of the range, is outside every known sector.
    InvalidAddress,
    Flash(FlashError),
}

impl From<FlashError> for GuardError {
    fn from(err: FlashError) -> Self {
        GuardError::Flash(err)
    }
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardError::PermissionDenied => f.write_str("flash write not permitted"),
            GuardError::InvalidAddress => f.write_str("address outside flash sectors"),
            GuardError::Flash(err) => write!(f, "flash: {}", err),
        }
    }
}

impl ufmt::uDebug for GuardError {
    fn fmt<W: ufmt::uWrite + ?Sized>(&self, f: &mut ufmt::Formatter<'_, W>) -> core::result::Result<(), W::Error> {
        match self {
            GuardError::PermissionDenied => f.write_str("PermissionDenied"),
            GuardError::InvalidAddress => f.write_str("InvalidAddress"),
            GuardError::Flash(err) => ufmt::uwrite!(f, "Flash({:?})", err),
        }
    }
}

pub type Result<T> = core::result::Result<T, GuardError>;

/// Owns the flash medium; the only path from foreign code to flash mutation.
pub struct FlashGuard<F> {
    flash: F,
}

impl<F: FlashMedium> FlashGuard<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    pub fn sectors(&self) -> &SectorMap {
        self.flash.sectors()
    }

    pub fn medium(&self) -> &F {
        &self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Erases the sector holding `addr` and returns its index.
    pub fn erase_sector(&mut self, prefs: Preferences, addr: u32) -> Result<usize> {
        if !prefs.write_permission {
            log::debug!("guard: erase at {:#010x} refused", addr);
            return Err(GuardError::PermissionDenied);
        }
        let index = self
            .flash
            .sectors()
            .sector_at(addr)
            .ok_or(GuardError::InvalidAddress)?;
        log::info!("guard: erasing sector {}", index);
        self.flash.erase_sector(index)?;
        Ok(index)
    }

    /// Programs `data` at `dest` without erasing.
    pub fn write_memory(&mut self, prefs: Preferences, dest: u32, data: &[u8]) -> Result<()> {
        if !prefs.write_permission {
            log::debug!("guard: write at {:#010x} refused", dest);
            return Err(GuardError::PermissionDenied);
        }
        let sectors = self.flash.sectors();
        if data.is_empty() {
            return sectors
                .sector_at(dest)
                .map(|_| ())
                .ok_or(GuardError::InvalidAddress);
        }
        sectors
            .sectors_covering(dest, data.len())
            .ok_or(GuardError::InvalidAddress)?;
        self.flash.program(dest, data)?;
        Ok(())
    }

    /// Erases every sector touched by `addr..addr + len`, unconditionally.
    /// Privileged: no permission check.
    pub(crate) fn erase_range(&mut self, addr: u32, len: usize) -> Result<()> {
        let range = self
            .flash
            .sectors()
            .sectors_covering(addr, len)
            .ok_or(GuardError::InvalidAddress)?;
        for index in range {
            self.flash.erase_sector(index)?;
        }
        Ok(())
    }

    pub(crate) fn program_unchecked(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.flash.program(addr, data).map_err(GuardError::from)
    }

    pub(crate) fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.flash.read(addr, buf).map_err(GuardError::from)
    }
}
