//! Safe implementation of every capability slot.
//!
//! [`HostApi`] is what the C shims in [`super::native`] dispatch to, and what
//! tests drive directly. Failures are reported as typed errors here and only
//! collapsed to the C conventions (bool, null, -1) at the shim.

use embedded_hal::blocking::delay::DelayMs;

use super::{keymap, SHIFTED_ARROW_BASE};
use crate::archive::header::NAME_LEN;
use crate::archive::Archive;
use crate::config::{MemoryMap, KEY_INACTIVITY_MS};
use crate::drivers::{Clipboard, Storage, StorageError};
use crate::flash_guard::{BackupError, FlashGuard, GuardError, RestoreMode};
use crate::hal::{
    Clock, Display, FlashMedium, Font, Key, KeyState, Keyboard, Rect, ShiftAlpha, SystemReset,
};
use crate::preferences::Preferences;

/// `get_key` argument bit asking whether key `arg & 0xFF` is held right now.
pub const KEY_QUERY: u32 = 0x8000_0000;

/// Sleep between keyboard polls while waiting for a key.
const KEY_POLL_MS: u32 = 10;

/// Record kinds whose stored value starts with a one-byte type tag that
/// readers never see.
const TAGGED_EXTENSIONS: [&[u8]; 2] = [b".py", b".xw"];

/// File system selector of the file slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystem {
    Ram,
    Flash,
    Both,
}

impl FileSystem {
    pub fn from_raw(raw: i32) -> Option<FileSystem> {
        match raw {
            0 => Some(FileSystem::Ram),
            1 => Some(FileSystem::Flash),
            2 => Some(FileSystem::Both),
            _ => None,
        }
    }

    #[inline]
    fn ram(self) -> bool {
        matches!(self, FileSystem::Ram | FileSystem::Both)
    }

    #[inline]
    fn flash(self) -> bool {
        matches!(self, FileSystem::Flash | FileSystem::Both)
    }
}

/// One method per [`ApiSlot`](super::ApiSlot), in slot order.
pub trait HostApi {
    fn millis(&mut self) -> u64;
    fn msleep(&mut self, ms: u32);
    fn scan_keyboard(&mut self) -> KeyState;
    fn push_rect(&mut self, rect: Rect, pixels: &[u16]);
    fn push_rect_uniform(&mut self, rect: Rect, color: u16);
    fn pull_rect(&mut self, rect: Rect, pixels: &mut [u16]);
    /// Backs both text slots. Returns the x coordinate after the text.
    #[allow(clippy::too_many_arguments)]
    fn draw_text(
        &mut self,
        font: Font,
        text: &str,
        x: i16,
        y: i16,
        fg: u16,
        bg: u16,
        measure_only: bool,
    ) -> i16;
    fn wait_for_vblank(&mut self) -> bool;
    fn clipboard_store(&mut self, text: &str);
    /// Clipboard text and its trailing NUL.
    fn clipboard_text(&self) -> &[u8];
    /// Passes up to `max` names ending in `ext` to `visit`, RAM records
    /// first, and returns how many were passed.
    fn file_list_with_extension(
        &self,
        ext: &[u8],
        fs: FileSystem,
        max: usize,
        visit: &mut dyn FnMut(&[u8]),
    ) -> usize;
    fn file_exists(&self, name: &[u8], fs: FileSystem) -> bool;
    fn file_erase(&mut self, name: &[u8], fs: FileSystem) -> Result<(), StorageError>;
    fn file_read(&self, name: &[u8], fs: FileSystem) -> Option<&[u8]>;
    fn file_write(&mut self, name: &[u8], content: &[u8], fs: FileSystem) -> Result<(), StorageError>;
    fn lock_alpha(&mut self);
    fn reset_keyboard(&mut self);
    fn get_key(&mut self, arg: u32) -> i32;
    fn restore_backup(&mut self, mode: i32) -> Result<(), BackupError>;
    fn erase_sector(&mut self, addr: u32) -> Result<usize, GuardError>;
    fn write_memory(&mut self, dest: u32, data: &[u8]) -> Result<(), GuardError>;
    fn in_exam_mode(&self) -> bool;

    /// Whether an Alpha layer is active, reported alongside `get_key`.
    fn alpha_active(&self) -> bool;
}

/// Device collaborators the host reaches through.
pub struct Devices<'a> {
    pub display: &'a mut dyn Display,
    pub keyboard: &'a mut dyn Keyboard,
    pub clock: &'a dyn Clock,
    pub delay: &'a mut dyn DelayMs<u32>,
    pub reset: &'a mut dyn SystemReset,
}

pub struct Host<'a> {
    prefs: Preferences,
    map: MemoryMap,
    archive: Archive<'a>,
    storage: Storage<'a>,
    clipboard: Clipboard,
    guard: FlashGuard<&'a mut dyn FlashMedium>,
    devices: Devices<'a>,
    shift_alpha: ShiftAlpha,
}

impl<'a> Host<'a> {
    pub fn new(
        prefs: Preferences,
        map: MemoryMap,
        archive: Archive<'a>,
        storage: Storage<'a>,
        flash: &'a mut dyn FlashMedium,
        devices: Devices<'a>,
    ) -> Self {
        Self {
            prefs,
            map,
            archive,
            storage,
            clipboard: Clipboard::new(),
            guard: FlashGuard::new(flash),
            devices,
            shift_alpha: ShiftAlpha::Default,
        }
    }

    pub fn prefs(&self) -> Preferences {
        self.prefs
    }

    /// Takes effect on the next capability call.
    pub fn set_prefs(&mut self, prefs: Preferences) {
        self.prefs = prefs;
    }

    pub fn map(&self) -> &MemoryMap {
        &self.map
    }

    pub fn archive(&self) -> Archive<'a> {
        self.archive
    }

    pub fn storage(&self) -> &Storage<'a> {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage<'a> {
        &mut self.storage
    }

    pub fn clipboard(&self) -> &Clipboard {
        &self.clipboard
    }

    pub fn devices_mut(&mut self) -> &mut Devices<'a> {
        &mut self.devices
    }

    /// Saves live storage to backup `slot`. Privileged: not gated by write
    /// permission or exam mode.
    pub fn save_backup(&mut self, slot: usize) -> Result<(), BackupError> {
        self.guard
            .save_backup(&self.map, self.storage.as_bytes(), slot)
    }

    /// Privileged restore used by the power menu.
    pub fn restore_backup_slot(&mut self, slot: usize, mode: RestoreMode) -> Result<(), BackupError> {
        self.guard
            .restore_backup(&self.map, self.storage.as_bytes_mut(), slot, mode)
    }

    fn set_shift_alpha(&mut self, status: ShiftAlpha) {
        self.shift_alpha = status;
        self.devices.keyboard.set_shift_alpha(status);
    }

    /// Blocks for the next key event other than Shift/Alpha, which only
    /// move the modifier state. Returns the key with the state it was
    /// pressed in. Reports the power key after [`KEY_INACTIVITY_MS`] without
    /// input.
    fn wait_key(&mut self) -> (Key, ShiftAlpha) {
        let mut since = self.devices.clock.millis();
        loop {
            match self.devices.keyboard.poll_key() {
                Ok(key) if key == Key::SHIFT || key == Key::ALPHA => {
                    self.set_shift_alpha(self.shift_alpha.next(key));
                    since = self.devices.clock.millis();
                }
                Ok(key) => {
                    let pressed_in = self.shift_alpha;
                    if matches!(key, Key::BACKSPACE | Key::OK | Key::BACK | Key::EXE) {
                        self.set_shift_alpha(ShiftAlpha::Default);
                    } else if pressed_in.next(key) != pressed_in {
                        self.set_shift_alpha(pressed_in.next(key));
                    }
                    return (key, pressed_in);
                }
                Err(nb::Error::WouldBlock) => {
                    let now = self.devices.clock.millis();
                    if now.saturating_sub(since) > KEY_INACTIVITY_MS {
                        log::debug!("host: key wait idle, reporting power key");
                        return (Key::ON_OFF, self.shift_alpha);
                    }
                    self.devices.delay.delay_ms(KEY_POLL_MS);
                }
                Err(nb::Error::Other(never)) => match never {},
            }
        }
    }
}

impl HostApi for Host<'_> {
    fn millis(&mut self) -> u64 {
        self.devices.clock.millis()
    }

    fn msleep(&mut self, ms: u32) {
        self.devices.delay.delay_ms(ms);
    }

    fn scan_keyboard(&mut self) -> KeyState {
        self.devices.keyboard.scan()
    }

    fn push_rect(&mut self, rect: Rect, pixels: &[u16]) {
        let n = rect.area().min(pixels.len());
        self.devices.display.push_rect(rect, &pixels[..n]);
    }

    fn push_rect_uniform(&mut self, rect: Rect, color: u16) {
        self.devices.display.push_rect_uniform(rect, color);
    }

    fn pull_rect(&mut self, rect: Rect, pixels: &mut [u16]) {
        let n = rect.area().min(pixels.len());
        self.devices.display.pull_rect(rect, &mut pixels[..n]);
    }

    fn draw_text(
        &mut self,
        font: Font,
        text: &str,
        x: i16,
        y: i16,
        fg: u16,
        bg: u16,
        measure_only: bool,
    ) -> i16 {
        self.devices
            .display
            .draw_string(text, x, y, font, fg, bg, measure_only)
    }

    fn wait_for_vblank(&mut self) -> bool {
        self.devices.display.wait_for_vblank()
    }

    fn clipboard_store(&mut self, text: &str) {
        self.clipboard.store(text);
    }

    fn clipboard_text(&self) -> &[u8] {
        self.clipboard.text_with_nul()
    }

    fn file_list_with_extension(
        &self,
        ext: &[u8],
        fs: FileSystem,
        max: usize,
        visit: &mut dyn FnMut(&[u8]),
    ) -> usize {
        let mut n = 0;
        if fs.ram() {
            for record in self.storage.records().filter(|r| r.has_extension(ext)) {
                if n == max {
                    return n;
                }
                visit(record.full_name());
                n += 1;
            }
        }
        // Archive files stay hidden in exam mode.
        if self.prefs.exam_mode || !fs.flash() {
            return n;
        }
        let names = self
            .archive
            .entries(self.prefs)
            .map_while(Result::ok)
            .filter(|e| e.is_readable() && e.name().ends_with(ext))
            // A name filling the whole field has no terminator.
            .filter(|e| e.name().len() < NAME_LEN)
            .map(|e| e.name());
        for name in names {
            if n == max {
                break;
            }
            visit(name);
            n += 1;
        }
        n
    }

    fn file_exists(&self, name: &[u8], fs: FileSystem) -> bool {
        if fs.ram() && self.storage.record_named(name).is_some() {
            return true;
        }
        fs.flash() && self.archive.index_from_name(self.prefs, name).is_some()
    }

    fn file_erase(&mut self, name: &[u8], fs: FileSystem) -> Result<(), StorageError> {
        if fs != FileSystem::Ram {
            return Err(StorageError::NotFound);
        }
        self.storage.destroy(name)
    }

    fn file_read(&self, name: &[u8], fs: FileSystem) -> Option<&[u8]> {
        if fs.ram() {
            if let Some(record) = self.storage.record_named(name) {
                let value = record.value();
                let tagged = TAGGED_EXTENSIONS.iter().any(|ext| name.ends_with(ext));
                return Some(if tagged && !value.is_empty() {
                    &value[1..]
                } else {
                    value
                });
            }
        }
        if fs.flash() {
            return self
                .archive
                .entry_named(self.prefs, name)
                .map(|entry| entry.data());
        }
        None
    }

    fn file_write(&mut self, name: &[u8], content: &[u8], fs: FileSystem) -> Result<(), StorageError> {
        if fs != FileSystem::Ram {
            return Err(StorageError::NotFound);
        }
        match self.storage.create_record(name, content) {
            Err(StorageError::NameTaken) => self.storage.set_value(name, content),
            other => other,
        }
    }

    fn lock_alpha(&mut self) {
        self.set_shift_alpha(ShiftAlpha::AlphaLock);
    }

    fn reset_keyboard(&mut self) {
        self.set_shift_alpha(ShiftAlpha::Default);
    }

    fn get_key(&mut self, arg: u32) -> i32 {
        if arg & KEY_QUERY != 0 {
            let key = Key((arg & 0xFF) as u8);
            return self.devices.keyboard.scan().key_down(key) as i32;
        }
        let (key, pressed_in) = self.wait_key();
        let column = key.code() % Key::COUNT;
        if column <= Key::RIGHT.code() && self.devices.keyboard.scan().key_down(Key::SHIFT) {
            return SHIFTED_ARROW_BASE + column as i32;
        }
        keymap::translate(key, pressed_in)
    }

    fn restore_backup(&mut self, mode: i32) -> Result<(), BackupError> {
        if self.prefs.exam_mode {
            return Err(BackupError::ExamMode);
        }
        let (slot, mode) = RestoreMode::from_raw(mode).ok_or(BackupError::InvalidSlot)?;
        self.restore_backup_slot(slot, mode)
    }

    /// Address 0 asks for a reset instead of an erase, but only once write
    /// permission is granted; otherwise it is refused like any address.
    fn erase_sector(&mut self, addr: u32) -> Result<usize, GuardError> {
        if !self.prefs.write_permission {
            return self.guard.erase_sector(self.prefs, addr);
        }
        if addr == 0 {
            log::warn!("host: erase of address 0 requested, resetting");
            self.devices.reset.reset(None);
        }
        self.guard.erase_sector(self.prefs, addr)
    }

    fn write_memory(&mut self, dest: u32, data: &[u8]) -> Result<(), GuardError> {
        self.guard.write_memory(self.prefs, dest, data)
    }

    fn in_exam_mode(&self) -> bool {
        self.prefs.exam_mode
    }

    fn alpha_active(&self) -> bool {
        self.shift_alpha.alpha()
    }
}
