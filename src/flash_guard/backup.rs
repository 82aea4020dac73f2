//! Storage backups in the two reserved flash slots.
//!
//! A slot holds a byte copy of the storage region, which starts with
//! [`STORAGE_MAGIC`]; no extra framing is added. Saving and restoring are
//! privileged power-menu operations and ignore the write-permission flag.

use core::fmt;

use super::{FlashGuard, GuardError};
use crate::config::{MemoryMap, STORAGE_MAGIC};
use crate::drivers::storage;
use crate::hal::{FlashError, FlashMedium};

/// Bytes inspected per read while scanning or copying a slot.
const CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupError {
    InvalidSlot,
    /// Restores are refused while the exam state is active.
    ExamMode,
    /// Live storage holds no records; nothing was saved.
    StorageEmpty,
    MissingMagic,
    SlotEmpty,
    /// A write-permission check refused the operation.
    PermissionDenied,
    InvalidAddress,
    Flash(FlashError),
}

impl From<GuardError> for BackupError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Flash(err) => BackupError::Flash(err),
            GuardError::PermissionDenied => BackupError::PermissionDenied,
            GuardError::InvalidAddress => BackupError::InvalidAddress,
        }
    }
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupError::InvalidSlot => f.write_str("no such backup slot"),
            BackupError::ExamMode => f.write_str("backup restore disabled in exam mode"),
            BackupError::StorageEmpty => f.write_str("storage is empty"),
            BackupError::MissingMagic => f.write_str("backup slot holds no backup"),
            BackupError::SlotEmpty => f.write_str("backup slot is empty"),
            BackupError::PermissionDenied => f.write_str("flash write not permitted"),
            BackupError::InvalidAddress => f.write_str("backup slot outside flash"),
            BackupError::Flash(err) => write!(f, "flash: {}", err),
        }
    }
}

impl ufmt::uDebug for BackupError {
    fn fmt<W: ufmt::uWrite + ?Sized>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error> {
        match self {
            BackupError::InvalidSlot => f.write_str("InvalidSlot"),
            BackupError::ExamMode => f.write_str("ExamMode"),
            BackupError::StorageEmpty => f.write_str("StorageEmpty"),
            BackupError::MissingMagic => f.write_str("MissingMagic"),
            BackupError::SlotEmpty => f.write_str("SlotEmpty"),
            BackupError::PermissionDenied => f.write_str("PermissionDenied"),
            BackupError::InvalidAddress => f.write_str("InvalidAddress"),
            BackupError::Flash(err) => ufmt::uwrite!(f, "Flash({:?})", err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    Restore,
    /// Validate the slot only; storage is left alone.
    CheckOnly,
}

impl RestoreMode {
    /// Decodes the capability argument: `0`/`1` restore that slot, `2`/`3`
    /// check slot `mode - 2`.
    pub fn from_raw(mode: i32) -> Option<(usize, RestoreMode)> {
        match mode {
            0 | 1 => Some((mode as usize, RestoreMode::Restore)),
            2 | 3 => Some(((mode - 2) as usize, RestoreMode::CheckOnly)),
            _ => None,
        }
    }
}

impl<F: FlashMedium> FlashGuard<F> {
    /// Copies `storage` into backup `slot`, erasing the slot first if any
    /// byte of it is programmed. An empty storage is not saved.
    pub fn save_backup(
        &mut self,
        map: &MemoryMap,
        storage: &[u8],
        slot: usize,
    ) -> Result<(), BackupError> {
        let window = map.backup_window(slot).ok_or(BackupError::InvalidSlot)?;
        if storage.len() > window.len() as usize {
            return Err(BackupError::InvalidAddress);
        }
        if storage::looks_empty(storage) {
            log::info!("backup: storage empty, slot {} left alone", slot);
            return Err(BackupError::StorageEmpty);
        }

        if self.is_dirty(window.start, window.len() as usize)? {
            log::debug!("backup: erasing slot {}", slot);
            self.erase_range(window.start, window.len() as usize)?;
        }
        self.program_unchecked(window.start, storage)?;
        log::info!("backup: saved {} bytes to slot {}", storage.len(), slot);
        Ok(())
    }

    /// Validates backup `slot` and, in [`RestoreMode::Restore`], copies it
    /// over `storage`.
    ///
    /// The whole slot is read once before anything is copied, and every copy
    /// goes through a local chunk, so a failing medium never writes into
    /// `storage`. Only a fault that first appears during the copy pass, after
    /// the verify pass read the same bytes cleanly, leaves a partial copy;
    /// that case is logged as an error.
    pub fn restore_backup(
        &mut self,
        map: &MemoryMap,
        storage: &mut [u8],
        slot: usize,
        mode: RestoreMode,
    ) -> Result<(), BackupError> {
        let window = map.backup_window(slot).ok_or(BackupError::InvalidSlot)?;
        if storage.len() > window.len() as usize {
            return Err(BackupError::InvalidAddress);
        }

        let mut head = [0u8; STORAGE_MAGIC.len() + 2];
        self.read(window.start, &mut head)?;
        if !storage::has_magic(&head) {
            return Err(BackupError::MissingMagic);
        }
        if storage::looks_empty(&head) {
            return Err(BackupError::SlotEmpty);
        }
        if mode == RestoreMode::CheckOnly {
            return Ok(());
        }

        let mut chunk = [0u8; CHUNK];
        let len = storage.len();
        let mut offset = 0;
        while offset < len {
            let n = CHUNK.min(len - offset);
            self.read(window.start + offset as u32, &mut chunk[..n])?;
            offset += n;
        }

        offset = 0;
        while offset < len {
            let n = CHUNK.min(len - offset);
            if let Err(err) = self.read(window.start + offset as u32, &mut chunk[..n]) {
                log::error!("backup: slot {} failed mid-copy at {:#x}", slot, offset);
                return Err(err.into());
            }
            storage[offset..offset + n].copy_from_slice(&chunk[..n]);
            offset += n;
        }
        log::info!("backup: restored slot {}", slot);
        Ok(())
    }

    fn is_dirty(&mut self, addr: u32, len: usize) -> Result<bool, BackupError> {
        let mut chunk = [0u8; CHUNK];
        let mut offset = 0;
        while offset < len {
            let n = CHUNK.min(len - offset);
            self.read(addr + offset as u32, &mut chunk[..n])?;
            if chunk[..n].iter().any(|b| *b != 0xFF) {
                return Ok(true);
            }
            offset += n;
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::Storage;
    use crate::hal::sim::{FaultyFlash, SimFlash};
    use crate::hal::{AddressWindow, SectorGroup, SectorMap};

    const BASE: u32 = 0x9000_0000;
    static GROUPS: [SectorGroup; 1] = [SectorGroup::new(8, 0x400)];

    fn layout() -> MemoryMap {
        MemoryMap {
            flash: SectorMap::new(BASE, &GROUPS),
            archive: AddressWindow::new(BASE, BASE + 0x800),
            exec_window: AddressWindow::new(BASE, BASE + 0x800),
            storage_size: 0x400,
            backup_slots: [BASE + 0x800, BASE + 0xC00],
            firmware_slots: [BASE, BASE, BASE],
        }
    }

    fn filled_storage(buf: &mut [u8]) {
        let mut store = Storage::format(buf).unwrap();
        store.create_record(b"a.py", b"\x01x = 1").unwrap();
    }

    #[test]
    fn raw_mode_decoding() {
        assert_eq!(RestoreMode::from_raw(1), Some((1, RestoreMode::Restore)));
        assert_eq!(RestoreMode::from_raw(2), Some((0, RestoreMode::CheckOnly)));
        assert_eq!(RestoreMode::from_raw(4), None);
        assert_eq!(RestoreMode::from_raw(-1), None);
    }

    #[test]
    fn save_erases_dirty_slot_only() {
        let mut cells = vec![0u8; 0x2000];
        let mut flash = SimFlash::new(layout().flash, &mut cells).unwrap();
        let mut storage = vec![0u8; 0x400];
        filled_storage(&mut storage);

        let mut guard = FlashGuard::new(&mut flash);
        guard.save_backup(&layout(), &storage, 1).unwrap();
        drop(guard);
        assert_eq!(&flash.bytes()[0xC00..0x1000], &storage[..]);
        // Slot 0 untouched.
        assert!(flash.bytes()[0x800..0xC00].iter().all(|b| *b == 0));
        assert_eq!(flash.erase_count(), 1);
    }

    #[test]
    fn clean_slot_is_not_erased() {
        let mut cells = vec![0xFFu8; 0x2000];
        let mut flash = SimFlash::new(layout().flash, &mut cells).unwrap();
        let mut storage = vec![0u8; 0x400];
        filled_storage(&mut storage);

        FlashGuard::new(&mut flash).save_backup(&layout(), &storage, 0).unwrap();
        assert_eq!(flash.erase_count(), 0);
        assert_eq!(&flash.bytes()[0x800..0xC00], &storage[..]);
    }

    #[test]
    fn empty_storage_is_skipped_before_erasing() {
        let mut cells = vec![0u8; 0x2000];
        let mut flash = SimFlash::new(layout().flash, &mut cells).unwrap();
        let mut storage = vec![0u8; 0x400];
        Storage::format(&mut storage).unwrap();

        let mut guard = FlashGuard::new(&mut flash);
        assert_eq!(
            guard.save_backup(&layout(), &storage, 0),
            Err(BackupError::StorageEmpty)
        );
        assert_eq!(guard.save_backup(&layout(), &storage, 2), Err(BackupError::InvalidSlot));
        drop(guard);
        assert_eq!(flash.erase_count(), 0);
    }

    #[test]
    fn restore_validates_before_copying() {
        let mut cells = vec![0xFFu8; 0x2000];
        let mut flash = SimFlash::new(layout().flash, &mut cells).unwrap();
        let mut storage = vec![0x5Au8; 0x400];
        let mut guard = FlashGuard::new(&mut flash);

        assert_eq!(
            guard.restore_backup(&layout(), &mut storage, 0, RestoreMode::Restore),
            Err(BackupError::MissingMagic)
        );
        assert!(storage.iter().all(|b| *b == 0x5A));

        guard
            .write_memory(
                crate::Preferences::new().with_write_permission(true),
                BASE + 0x800,
                &[0xBA, 0xDD, 0x0B, 0xEE, 0, 0],
            )
            .unwrap();
        assert_eq!(
            guard.restore_backup(&layout(), &mut storage, 0, RestoreMode::CheckOnly),
            Err(BackupError::SlotEmpty)
        );
        assert!(storage.iter().all(|b| *b == 0x5A));
    }

    #[test]
    fn check_only_leaves_storage() {
        let mut cells = vec![0xFFu8; 0x2000];
        let mut flash = SimFlash::new(layout().flash, &mut cells).unwrap();
        let mut saved = vec![0u8; 0x400];
        filled_storage(&mut saved);
        let mut guard = FlashGuard::new(&mut flash);
        guard.save_backup(&layout(), &saved, 0).unwrap();

        let mut live = vec![0u8; 0x400];
        guard
            .restore_backup(&layout(), &mut live, 0, RestoreMode::CheckOnly)
            .unwrap();
        assert!(live.iter().all(|b| *b == 0));
        guard
            .restore_backup(&layout(), &mut live, 0, RestoreMode::Restore)
            .unwrap();
        assert_eq!(live, saved);
    }

    #[test]
    fn failed_read_leaves_storage_untouched() {
        let mut cells = vec![0xFFu8; 0x2000];
        let mut flash = SimFlash::new(layout().flash, &mut cells).unwrap();
        let mut saved = vec![0u8; 0x400];
        filled_storage(&mut saved);
        FlashGuard::new(&mut flash).save_backup(&layout(), &saved, 0).unwrap();

        let mut live = vec![0u8; 0x400];
        Storage::format(&mut live).unwrap();
        let before = live.clone();
        // The head read passes; the bulk read fails on its first or third chunk.
        for reads in [1, 3] {
            let mut guard = FlashGuard::new(FaultyFlash::new(&mut flash).fail_reads_after(reads));
            assert_eq!(
                guard.restore_backup(&layout(), &mut live, 0, RestoreMode::Restore),
                Err(BackupError::Flash(FlashError::Bus))
            );
            assert_eq!(live, before);
        }

        let mut guard = FlashGuard::new(FaultyFlash::new(&mut flash).fail_reads_after(0));
        assert_eq!(
            guard.restore_backup(&layout(), &mut live, 0, RestoreMode::CheckOnly),
            Err(BackupError::Flash(FlashError::Bus))
        );
        assert_eq!(live, before);
    }

    #[test]
    fn failed_save_keeps_the_other_slot() {
        let mut cells = vec![0xFFu8; 0x2000];
        let mut flash = SimFlash::new(layout().flash, &mut cells).unwrap();
        let mut first = vec![0u8; 0x400];
        filled_storage(&mut first);
        FlashGuard::new(&mut flash).save_backup(&layout(), &first, 0).unwrap();
        // Dirty slot 1 so the save has to erase it.
        flash.bytes_mut()[0xC10] = 0;

        let mut second = vec![0u8; 0x400];
        let mut store = Storage::format(&mut second).unwrap();
        store.create_record(b"b.py", b"\x01y = 2").unwrap();

        let mut guard = FlashGuard::new(
            FaultyFlash::new(&mut flash)
                .fail_erases_after(0)
                .with_error(FlashError::Timeout),
        );
        assert_eq!(
            guard.save_backup(&layout(), &second, 1),
            Err(BackupError::Flash(FlashError::Timeout))
        );
        drop(guard);
        let mut guard = FlashGuard::new(FaultyFlash::new(&mut flash).fail_programs_after(0));
        assert_eq!(
            guard.save_backup(&layout(), &second, 1),
            Err(BackupError::Flash(FlashError::Bus))
        );
        drop(guard);
        assert_eq!(&flash.bytes()[0x800..0xC00], &first[..]);

        let mut live = vec![0u8; 0x400];
        FlashGuard::new(&mut flash)
            .restore_backup(&layout(), &mut live, 0, RestoreMode::Restore)
            .unwrap();
        assert_eq!(live, first);
    }

    #[test]
    fn guard_errors_keep_their_cause() {
        assert_eq!(
            BackupError::from(GuardError::PermissionDenied),
            BackupError::PermissionDenied
        );
        assert_eq!(BackupError::from(GuardError::InvalidAddress), BackupError::InvalidAddress);
        assert_eq!(
            BackupError::from(GuardError::Flash(FlashError::Timeout)),
            BackupError::Flash(FlashError::Timeout)
        );
    }
}
