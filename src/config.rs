//! Configuration constants and the device memory map.
//!
//! Every physical address used by the core is reached through a
//! [`MemoryMap`]; [`MemoryMap::N0110`] describes the 8 MiB external flash
//! part, other boards provide their own value.

use core::fmt;

use crate::hal::{AddressWindow, SectorGroup, SectorMap};

/// Size of the RAM record storage, and therefore of each backup.
pub const STORAGE_SIZE: usize = 32 * 1024;

/// Archive records are aligned to this boundary.
pub const ARCHIVE_BLOCK_SIZE: usize = 512;

/// Signature at the start of storage and of every backup slot.
pub const STORAGE_MAGIC: [u8; 4] = [0xBA, 0xDD, 0x0B, 0xEE];

/// Idle time after which the power-key menu falls through to normal boot.
pub const BOOT_MENU_TIMEOUT_MS: u64 = 5_000;

/// Inactivity after which a blocking key read reports the power key.
pub const KEY_INACTIVITY_MS: u64 = 3 * 60 * 1000;

pub const DEFAULT_BRIGHTNESS: u8 = 112;
pub const BRIGHTNESS_STEP: u8 = 16;
pub const BRIGHTNESS_MAX: u8 = 240;

/// Firmware versions newer than this, without a variant marker, are not
/// trusted by the boot selector.
pub const LEGACY_VERSION_CEILING: &[u8] = b"15.3.1";

const N0110_SECTORS: [SectorGroup; 3] = [
    SectorGroup::new(8, 4 * 1024),
    SectorGroup::new(1, 32 * 1024),
    SectorGroup::new(127, 64 * 1024),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Archive window is not inside the flash.
    ArchiveOutsideFlash,
    /// Foreign code could start outside the archive.
    ExecWindowOutsideArchive,
    /// A backup slot is not sector aligned or leaves the flash.
    BackupSlotMisplaced(usize),
    /// Both backup slots share a sector.
    BackupSlotsShareSector,
    FirmwareSlotOutsideFlash(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ArchiveOutsideFlash => f.write_str("archive window outside flash"),
            ConfigError::ExecWindowOutsideArchive => {
                f.write_str("execution window outside archive")
            }
            ConfigError::BackupSlotMisplaced(i) => write!(f, "backup slot {} misplaced", i),
            ConfigError::BackupSlotsShareSector => f.write_str("backup slots share a sector"),
            ConfigError::FirmwareSlotOutsideFlash(i) => {
                write!(f, "firmware slot {} outside flash", i)
            }
        }
    }
}

/// Physical layout the core operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMap {
    pub flash: SectorMap,
    /// Region walked by the archive reader.
    pub archive: AddressWindow,
    /// Addresses foreign code may be entered at.
    pub exec_window: AddressWindow,
    pub storage_size: usize,
    pub backup_slots: [u32; 2],
    pub firmware_slots: [u32; 3],
}

impl MemoryMap {
    pub const N0110: MemoryMap = MemoryMap {
        flash: SectorMap::new(0x9000_0000, &N0110_SECTORS),
        archive: AddressWindow::new(0x9020_0000, 0x9080_0000),
        exec_window: AddressWindow::new(0x9020_0000, 0x9080_0000),
        storage_size: STORAGE_SIZE,
        backup_slots: [0x9018_0000, 0x9080_0000 - 2 * STORAGE_SIZE as u32],
        firmware_slots: [0x9000_0000, 0x9040_0000, 0x9060_0000],
    };

    pub fn backup_window(&self, slot: usize) -> Option<AddressWindow> {
        let start = *self.backup_slots.get(slot)?;
        Some(AddressWindow::new(
            start,
            start.checked_add(self.storage_size as u32)?,
        ))
    }

    /// Checks the invariants the archive reader, loader and backup code
    /// rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let flash = self.flash.window();
        if !flash.contains_range(self.archive.start, self.archive.len() as usize) {
            return Err(ConfigError::ArchiveOutsideFlash);
        }
        if !self
            .archive
            .contains_range(self.exec_window.start, self.exec_window.len() as usize)
        {
            return Err(ConfigError::ExecWindowOutsideArchive);
        }

        let mut covered = [0..=0usize, 0..=0usize];
        for (i, &start) in self.backup_slots.iter().enumerate() {
            let aligned = self
                .flash
                .sector_at(start)
                .and_then(|s| self.flash.sector_span(s))
                .map_or(false, |span| span.start == start);
            let sectors = self.flash.sectors_covering(start, self.storage_size);
            match sectors {
                Some(range) if aligned => covered[i] = range,
                _ => return Err(ConfigError::BackupSlotMisplaced(i)),
            }
        }
        let (a, b) = (&covered[0], &covered[1]);
        if a.start() <= b.end() && b.start() <= a.end() {
            return Err(ConfigError::BackupSlotsShareSector);
        }

        for (i, &base) in self.firmware_slots.iter().enumerate() {
            if !flash.contains(base) {
                return Err(ConfigError::FirmwareSlotOutsideFlash(i));
            }
        }
        Ok(())
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::N0110
    }
}
