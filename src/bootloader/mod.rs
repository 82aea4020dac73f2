//! Firmware slot detection and reset-based hand-off.
//!
//! A firmware image carries a kernel header at its base and a userland
//! header 64 KiB further. Both carry their magic word twice. Images from
//! different firmware lineages are told apart by a variant marker after the
//! userland header; images without one are trusted only up to
//! [`LEGACY_VERSION_CEILING`](crate::config::LEGACY_VERSION_CEILING).

pub mod menu;

use core::fmt;

use crate::config::{MemoryMap, LEGACY_VERSION_CEILING};
use crate::hal::{MappedRegion, SystemReset};

pub const KERNEL_MAGIC: u32 = 0xDEC0_0DF0;
pub const USERLAND_MAGIC: u32 = 0xDEC0_EDFE;

/// The kernel header opens and closes with [`KERNEL_MAGIC`]; the closing
/// copy is the sentinel. There is no separate sentinel word, so the
/// signature is the same magic at both ends of the header, with the version
/// and patch level between them.
const KERNEL_MAGIC_AT: [u32; 2] = [0x08, 0x1C];
const KERNEL_VERSION_AT: u32 = 0x0C;
const KERNEL_VERSION_LEN: usize = 8;

const USERLAND_OFFSET: u32 = 0x1_0000;
const USERLAND_MAGIC_AT: [u32; 2] = [0x00, 0x24];
const USERLAND_VERSION_AT: u32 = 0x04;
const USERLAND_VERSION_LEN: usize = 8;
const VARIANT_MAGIC_AT: u32 = 0x28;
const VARIANT_VERSION_AT: u32 = 0x2C;
const VARIANT_VERSION_LEN: usize = 16;

const VARIANT_A_MAGIC: u32 = 0xEFBE_ADDE;
const VARIANT_B_MAGIC: u32 = 0x6973_7055;
const VARIANT_C_MAGIC: u32 = 0x2169_684B;

pub const VERSION_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Unknown,
    VariantA,
    VariantB,
    VariantC,
    /// No variant marker, version not above the legacy ceiling.
    LegacyLowVersion,
}

impl Variant {
    fn from_magic(magic: u32) -> Option<Variant> {
        match magic {
            VARIANT_A_MAGIC => Some(Variant::VariantA),
            VARIANT_B_MAGIC => Some(Variant::VariantB),
            VARIANT_C_MAGIC => Some(Variant::VariantC),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    NoSuchSlot,
    /// Kernel or userland signature missing.
    SlotInvalid,
    /// Signatures present but the lineage is unknown or too new to trust.
    SlotUnrecognized,
}

impl fmt::Display for SlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotError::NoSuchSlot => f.write_str("no such firmware slot"),
            SlotError::SlotInvalid => f.write_str("no firmware in slot"),
            SlotError::SlotUnrecognized => f.write_str("unrecognized firmware"),
        }
    }
}

impl ufmt::uDebug for SlotError {
    fn fmt<W: ufmt::uWrite + ?Sized>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error> {
        f.write_str(match self {
            SlotError::NoSuchSlot => "NoSuchSlot",
            SlotError::SlotInvalid => "SlotInvalid",
            SlotError::SlotUnrecognized => "SlotUnrecognized",
        })
    }
}

/// Result of scanning one slot. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub index: usize,
    pub base: u32,
    /// First kernel magic word as read, whether or not it matched.
    pub kernel_signature: u32,
    pub userland_signature: u32,
    version: [u8; VERSION_LEN],
    version_len: usize,
    pub variant: Variant,
    /// Both kernel and userland signatures matched.
    pub valid: bool,
}

impl SlotDescriptor {
    fn empty(index: usize, base: u32) -> Self {
        Self {
            index,
            base,
            kernel_signature: 0,
            userland_signature: 0,
            version: [0; VERSION_LEN],
            version_len: 0,
            variant: Variant::Unknown,
            valid: false,
        }
    }

    /// Version string of the userland, or of the variant when one matched.
    pub fn version(&self) -> &[u8] {
        &self.version[..self.version_len]
    }

    pub fn bootable(&self) -> Result<Variant, SlotError> {
        if !self.valid {
            return Err(SlotError::SlotInvalid);
        }
        match self.variant {
            Variant::Unknown => Err(SlotError::SlotUnrecognized),
            variant => Ok(variant),
        }
    }

    fn set_version(&mut self, raw: &[u8]) {
        let text = until_nul(raw);
        let n = text.len().min(VERSION_LEN);
        self.version[..n].copy_from_slice(&text[..n]);
        self.version_len = n;
    }
}

fn until_nul(raw: &[u8]) -> &[u8] {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    &raw[..end]
}

/// Scans the firmware slots of a [`MemoryMap`] over a view of the flash.
#[derive(Clone, Copy)]
pub struct SlotDetector<'a> {
    flash: MappedRegion<'a>,
    slots: [u32; 3],
}

impl<'a> SlotDetector<'a> {
    pub fn new(flash: MappedRegion<'a>, map: &MemoryMap) -> Self {
        Self {
            flash,
            slots: map.firmware_slots,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn detect_slot(&self, index: usize) -> Result<SlotDescriptor, SlotError> {
        let base = *self.slots.get(index).ok_or(SlotError::NoSuchSlot)?;
        let mut slot = SlotDescriptor::empty(index, base);
        let word = |offset: u32| {
            base.checked_add(offset)
                .and_then(|addr| self.flash.read_u32_le(addr))
        };
        let bytes = |offset: u32, len: usize| {
            base.checked_add(offset)
                .and_then(|addr| self.flash.bytes_at(addr, len))
        };

        let kernel = KERNEL_MAGIC_AT.map(word);
        slot.kernel_signature = kernel[0].unwrap_or(0);
        let userland = USERLAND_MAGIC_AT.map(|at| word(USERLAND_OFFSET + at));
        slot.userland_signature = userland[0].unwrap_or(0);

        let kernel_ok = kernel.iter().all(|w| *w == Some(KERNEL_MAGIC));
        let userland_ok = userland.iter().all(|w| *w == Some(USERLAND_MAGIC));
        if !(kernel_ok && userland_ok) {
            log::debug!("boot: slot {} holds no firmware", index);
            return Ok(slot);
        }
        slot.valid = true;

        let variant = word(USERLAND_OFFSET + VARIANT_MAGIC_AT).and_then(Variant::from_magic);
        if let Some(variant) = variant {
            slot.variant = variant;
            if let Some(raw) = bytes(USERLAND_OFFSET + VARIANT_VERSION_AT, VARIANT_VERSION_LEN) {
                slot.set_version(raw);
            }
            return Ok(slot);
        }

        let raw = bytes(USERLAND_OFFSET + USERLAND_VERSION_AT, USERLAND_VERSION_LEN)
            .or_else(|| bytes(KERNEL_VERSION_AT, KERNEL_VERSION_LEN))
            .unwrap_or(&[]);
        slot.set_version(raw);
        slot.variant = if slot.version() > LEGACY_VERSION_CEILING {
            Variant::Unknown
        } else {
            Variant::LegacyLowVersion
        };
        Ok(slot)
    }

    /// Validates slot `index` for booting. The device is untouched until
    /// the returned hand-off is committed.
    pub fn boot_slot(&self, index: usize) -> Result<BootHandoff, SlotError> {
        let slot = self.detect_slot(index)?;
        let variant = slot.bootable()?;
        Ok(BootHandoff {
            index,
            base: slot.base,
            variant,
        })
    }
}

/// A validated, not yet performed switch to another firmware slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a hand-off does nothing until committed"]
pub struct BootHandoff {
    pub index: usize,
    pub base: u32,
    pub variant: Variant,
}

impl BootHandoff {
    /// Resets the device with the slot recorded as boot target. Only call
    /// after the user confirmed.
    pub fn commit(self, reset: &mut dyn SystemReset) -> ! {
        log::info!("boot: resetting into slot {} at {:#010x}", self.index, self.base);
        reset.reset(Some(self.base))
    }
}
