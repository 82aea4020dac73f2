//! Power-key menu shown before the normal boot path.
//!
//! Keys: `1`-`3` boot a firmware slot, `4` restores the storage backup,
//! `5` saves it, `+`/`-` change brightness and Back leaves. Booting and
//! restoring ask for OK or EXE first. Without input for
//! [`BOOT_MENU_TIMEOUT_MS`] the menu falls through.

use super::{BootHandoff, SlotDetector, SlotDescriptor, Variant};
use crate::api::Host;
use crate::config::{BOOT_MENU_TIMEOUT_MS, BRIGHTNESS_MAX, BRIGHTNESS_STEP};
use crate::flash_guard::{BackupError, RestoreMode};
use crate::hal::{Backlight, Font, Key};

const POLL_MS: u32 = 10;
const BACKUP_SLOT: usize = 0;

const FG: u16 = 0xFFFF;
const BG: u16 = 0x0000;
const LINE_HEIGHT: i16 = 20;
const MARGIN: i16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuOutcome {
    /// Carry on with the normal boot path.
    Continue,
    /// The user confirmed a slot; commit the hand-off to leave.
    Boot(BootHandoff),
}

pub struct PowerMenu<'a> {
    slots: SlotDetector<'a>,
    brightness: u8,
    timeout_ms: u64,
    status: &'static str,
}

impl<'a> PowerMenu<'a> {
    pub fn new(slots: SlotDetector<'a>, brightness: u8) -> Self {
        Self {
            slots,
            brightness: brightness.min(BRIGHTNESS_MAX),
            timeout_ms: BOOT_MENU_TIMEOUT_MS,
            status: "",
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// Last message shown on the status line.
    pub fn status(&self) -> &'static str {
        self.status
    }

    pub fn run(&mut self, host: &mut Host<'_>, backlight: &mut dyn Backlight) -> MenuOutcome {
        log::debug!("menu: open");
        loop {
            self.render(host);
            let key = match self.next_key(host) {
                Some(key) => key,
                None => {
                    log::info!("menu: timed out");
                    return MenuOutcome::Continue;
                }
            };

            match key {
                Key::ONE | Key::TWO | Key::THREE => {
                    let index = match key {
                        Key::ONE => 0,
                        Key::TWO => 1,
                        _ => 2,
                    };
                    if let Some(handoff) = self.select_slot(host, index) {
                        return MenuOutcome::Boot(handoff);
                    }
                }
                Key::FOUR => self.restore(host),
                Key::FIVE => {
                    self.status = match host.save_backup(BACKUP_SLOT) {
                        Ok(()) => "Backup saved",
                        Err(BackupError::StorageEmpty) => "Nothing to save",
                        Err(err) => {
                            log::warn!("menu: backup failed: {}", err);
                            "Backup failed"
                        }
                    };
                }
                Key::PLUS => {
                    let level = self.brightness.saturating_add(BRIGHTNESS_STEP).min(BRIGHTNESS_MAX);
                    self.set_brightness(host, backlight, level);
                }
                Key::MINUS => {
                    let level = self.brightness.saturating_sub(BRIGHTNESS_STEP);
                    self.set_brightness(host, backlight, level);
                }
                Key::BACK => {
                    log::debug!("menu: dismissed");
                    return MenuOutcome::Continue;
                }
                _ => {}
            }
        }
    }

    /// Applies `level` to the backlight and stores it in the preferences.
    fn set_brightness(&mut self, host: &mut Host<'_>, backlight: &mut dyn Backlight, level: u8) {
        self.brightness = level;
        backlight.set_brightness(level);
        let mut prefs = host.prefs();
        prefs.brightness = level;
        host.set_prefs(prefs);
    }

    fn select_slot(&mut self, host: &mut Host<'_>, index: usize) -> Option<BootHandoff> {
        match self.slots.boot_slot(index) {
            Ok(handoff) => {
                if self.confirm(host, "Boot this slot? OK to confirm") {
                    log::info!("menu: booting slot {}", index);
                    return Some(handoff);
                }
                self.status = "Cancelled";
            }
            Err(err) => {
                log::info!("menu: slot {} refused: {}", index, err);
                self.status = "Cannot boot this slot";
            }
        }
        None
    }

    fn restore(&mut self, host: &mut Host<'_>) {
        self.status = match host.restore_backup_slot(BACKUP_SLOT, RestoreMode::CheckOnly) {
            Err(BackupError::MissingMagic) | Err(BackupError::SlotEmpty) => "No backup found",
            Err(err) => {
                log::warn!("menu: backup check failed: {}", err);
                "Backup unreadable"
            }
            Ok(()) if !self.confirm(host, "Overwrite storage? OK to confirm") => "Cancelled",
            Ok(()) => match host.restore_backup_slot(BACKUP_SLOT, RestoreMode::Restore) {
                Ok(()) => "Backup restored",
                Err(err) => {
                    log::warn!("menu: restore failed: {}", err);
                    "Restore failed"
                }
            },
        };
    }

    fn confirm(&mut self, host: &mut Host<'_>, question: &str) -> bool {
        let display = &mut *host.devices_mut().display;
        let y = MARGIN + LINE_HEIGHT * 6;
        display.draw_string(question, MARGIN, y, Font::Small, FG, BG, false);
        matches!(self.next_key(host), Some(Key::OK) | Some(Key::EXE))
    }

    fn next_key(&self, host: &mut Host<'_>) -> Option<Key> {
        let devices = host.devices_mut();
        let since = devices.clock.millis();
        loop {
            match devices.keyboard.poll_key() {
                Ok(key) => return Some(key),
                Err(nb::Error::WouldBlock) => {
                    if devices.clock.millis().saturating_sub(since) >= self.timeout_ms {
                        return None;
                    }
                    devices.delay.delay_ms(POLL_MS);
                }
                Err(nb::Error::Other(never)) => match never {},
            }
        }
    }

    fn render(&self, host: &mut Host<'_>) {
        let display = &mut *host.devices_mut().display;
        let mut y = MARGIN;
        display.draw_string("Power menu", MARGIN, y, Font::Large, FG, BG, false);
        for index in 0..self.slots.slot_count() {
            y += LINE_HEIGHT;
            let x = display.draw_string(key_label(index), MARGIN, y, Font::Small, FG, BG, false);
            let slot = self.slots.detect_slot(index).ok();
            let label = slot.as_ref().map_or("?", slot_label);
            let x = display.draw_string(label, x, y, Font::Small, FG, BG, false);
            if let Some(slot) = slot {
                let version = core::str::from_utf8(slot.version()).unwrap_or("");
                display.draw_string(version, x + MARGIN, y, Font::Small, FG, BG, false);
            }
        }
        y += LINE_HEIGHT;
        display.draw_string("4 Restore backup  5 Save backup", MARGIN, y, Font::Small, FG, BG, false);
        y += LINE_HEIGHT;
        display.draw_string(self.status, MARGIN, y, Font::Small, FG, BG, false);
    }
}

fn key_label(index: usize) -> &'static str {
    match index {
        0 => "1 ",
        1 => "2 ",
        _ => "3 ",
    }
}

fn slot_label(slot: &SlotDescriptor) -> &'static str {
    if !slot.valid {
        return "empty";
    }
    match slot.variant {
        Variant::VariantA => "variant A",
        Variant::VariantB => "variant B",
        Variant::VariantC => "variant C",
        Variant::LegacyLowVersion => "stock",
        Variant::Unknown => "unknown",
    }
}
