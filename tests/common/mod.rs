//! Shared board fixture: simulated devices plus separate backing buffers
//! for the archive window, the backup flash and the firmware slots.
#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard};

use embedded_hal_mock::delay::MockNoop;
use extapp_firmware::api::{Devices, Host};
use extapp_firmware::archive::{Archive, ArchiveWriter};
use extapp_firmware::bootloader::menu::PowerMenu;
use extapp_firmware::bootloader::{SlotDetector, KERNEL_MAGIC, USERLAND_MAGIC};
use extapp_firmware::drivers::Storage;
use extapp_firmware::hal::sim::{
    FaultyFlash, SimBacklight, SimClock, SimDisplay, SimFlash, SimKeyboard, SimReset,
};
use extapp_firmware::hal::{AddressWindow, MappedRegion, SectorGroup, SectorMap};
use extapp_firmware::{MemoryMap, Preferences};

pub const FLASH_BASE: u32 = 0x9000_0000;
pub const ARCHIVE_BASE: u32 = 0x9020_0000;
pub const ARCHIVE_LEN: usize = 0x4000;
pub const FIRMWARE_BASE: u32 = 0x9040_0000;
pub const FIRMWARE_SLOT_LEN: u32 = 0x2_0000;
pub const STORAGE_LEN: usize = 0x200;

pub const VARIANT_A_MAGIC: u32 = 0xEFBE_ADDE;

static GROUPS: [SectorGroup; 1] = [SectorGroup::new(8, 0x400)];

// Capability sessions are process-wide.
static SERIAL: Mutex<()> = Mutex::new(());

pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn layout() -> MemoryMap {
    MemoryMap {
        flash: SectorMap::new(FLASH_BASE, &GROUPS),
        archive: AddressWindow::new(ARCHIVE_BASE, ARCHIVE_BASE + ARCHIVE_LEN as u32),
        exec_window: AddressWindow::new(ARCHIVE_BASE, ARCHIVE_BASE + ARCHIVE_LEN as u32),
        storage_size: STORAGE_LEN,
        backup_slots: [FLASH_BASE + 0x800, FLASH_BASE + 0xC00],
        firmware_slots: [
            FIRMWARE_BASE,
            FIRMWARE_BASE + FIRMWARE_SLOT_LEN,
            FIRMWARE_BASE + 2 * FIRMWARE_SLOT_LEN,
        ],
    }
}

/// Builds an archive image of `(name, executable, payload)` records.
pub fn archive_image(records: &[(&str, bool, &[u8])]) -> Vec<u8> {
    let mut image = vec![0xFFu8; ARCHIVE_LEN];
    let mut writer = ArchiveWriter::new(&mut image);
    for (name, executable, data) in records {
        writer.append(name, *executable, data).unwrap();
    }
    image
}

pub struct Board {
    pub image: Vec<u8>,
    pub firmware: Vec<u8>,
    pub ram: Vec<u8>,
    pub cells: Vec<u8>,
    pub display: SimDisplay,
    pub keyboard: SimKeyboard,
    pub clock: SimClock,
    pub delay: MockNoop,
    pub reset: SimReset,
    pub backlight: SimBacklight,
    /// Successful flash reads allowed before every later one fails.
    pub reads_before_fault: Option<usize>,
    pub programs_before_fault: Option<usize>,
}

impl Board {
    pub fn new(records: &[(&str, bool, &[u8])]) -> Self {
        let mut ram = vec![0u8; STORAGE_LEN];
        Storage::format(&mut ram).unwrap();
        Self {
            image: archive_image(records),
            firmware: vec![0xFF; 3 * FIRMWARE_SLOT_LEN as usize],
            ram,
            cells: vec![0xFF; 0x2000],
            display: SimDisplay::default(),
            keyboard: SimKeyboard::new(),
            clock: SimClock::new(25),
            delay: MockNoop::new(),
            reset: SimReset,
            backlight: SimBacklight::default(),
            reads_before_fault: None,
            programs_before_fault: None,
        }
    }

    /// Writes kernel and userland headers into firmware slot `slot`.
    pub fn install_firmware(&mut self, slot: usize, version: &[u8], variant: Option<u32>) {
        let base = slot * FIRMWARE_SLOT_LEN as usize;
        let fw = &mut self.firmware;
        let mut put = |at: usize, bytes: &[u8]| fw[base + at..base + at + bytes.len()].copy_from_slice(bytes);
        put(0x08, &KERNEL_MAGIC.to_le_bytes());
        put(0x1C, &KERNEL_MAGIC.to_le_bytes());
        put(0x1_0000, &USERLAND_MAGIC.to_le_bytes());
        put(0x1_0024, &USERLAND_MAGIC.to_le_bytes());
        let mut v = [0u8; 8];
        v[..version.len()].copy_from_slice(version);
        put(0x1_0004, &v);
        if let Some(magic) = variant {
            put(0x1_0028, &magic.to_le_bytes());
            let mut name = [0u8; 16];
            name[..version.len()].copy_from_slice(version);
            put(0x1_002C, &name);
        }
    }

    pub fn detector(&self) -> SlotDetector<'_> {
        let region = MappedRegion::new(FIRMWARE_BASE, &self.firmware).unwrap();
        SlotDetector::new(region, &layout())
    }

    pub fn with_host<R>(&mut self, prefs: Preferences, f: impl FnOnce(&mut Host<'_>) -> R) -> R {
        self.with_menu(prefs, |_, host, _| f(host))
    }

    /// Runs `f` with a host over this board and a power menu over its
    /// firmware slots.
    pub fn with_menu<R>(
        &mut self,
        prefs: Preferences,
        f: impl FnOnce(&mut PowerMenu<'_>, &mut Host<'_>, &mut SimBacklight) -> R,
    ) -> R {
        let map = layout();
        let Board {
            image,
            firmware,
            ram,
            cells,
            display,
            keyboard,
            clock,
            delay,
            reset,
            backlight,
            reads_before_fault,
            programs_before_fault,
        } = self;

        let region = MappedRegion::new(ARCHIVE_BASE, image).unwrap();
        let storage = Storage::open(ram).unwrap();
        let mut flash = FaultyFlash::new(SimFlash::new(map.flash, cells).unwrap());
        if let Some(n) = *reads_before_fault {
            flash = flash.fail_reads_after(n);
        }
        if let Some(n) = *programs_before_fault {
            flash = flash.fail_programs_after(n);
        }
        let devices = Devices {
            display,
            keyboard,
            clock: &*clock,
            delay,
            reset,
        };
        let mut host = Host::new(prefs, map, Archive::new(region), storage, &mut flash, devices);

        let slots = SlotDetector::new(MappedRegion::new(FIRMWARE_BASE, firmware).unwrap(), &map);
        let mut menu = PowerMenu::new(slots, prefs.brightness).with_timeout(1_000);
        f(&mut menu, &mut host, backlight)
    }
}
