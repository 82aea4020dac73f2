//! Cortex-M glue: reset with a boot target and views of mapped flash.

use core::ptr::{addr_of, addr_of_mut, read_volatile, write_volatile};

use super::{MappedRegion, SectorMap, SystemReset};

const BOOT_TARGET_MAGIC: u32 = 0xB007_51A7;

/// Boot target left across a reset. Survives because `.noinit` is not
/// zeroed by the startup code.
#[link_section = ".noinit"]
static mut BOOT_TARGET: [u32; 2] = [0; 2];

/// Returns and clears the slot recorded by the last [`CortexReset`], so a
/// power cycle boots the default image.
pub fn take_boot_target() -> Option<u32> {
    // SAFETY: single core; read before interrupts are enabled.
    unsafe {
        let [magic, addr] = read_volatile(addr_of!(BOOT_TARGET));
        write_volatile(addr_of_mut!(BOOT_TARGET), [0; 2]);
        (magic == BOOT_TARGET_MAGIC).then_some(addr)
    }
}

#[derive(Default)]
pub struct CortexReset;

impl SystemReset for CortexReset {
    fn reset(&mut self, boot_target: Option<u32>) -> ! {
        let record = match boot_target {
            Some(addr) => [BOOT_TARGET_MAGIC, addr],
            None => [0; 2],
        };
        // SAFETY: nothing else touches the record until after reset.
        unsafe { write_volatile(addr_of_mut!(BOOT_TARGET), record) };
        cortex_m::asm::dsb();
        cortex_m::peripheral::SCB::sys_reset()
    }
}

/// View of the whole memory-mapped flash described by `map`.
///
/// # Safety
/// The flash must be mapped at `map.base()` for `map.size()` bytes and
/// must not be reprogrammed while the view, or anything derived from it,
/// is alive.
pub unsafe fn mapped_flash(map: &SectorMap) -> Option<MappedRegion<'static>> {
    let bytes = core::slice::from_raw_parts(map.base() as *const u8, map.size() as usize);
    MappedRegion::new(map.base(), bytes)
}
