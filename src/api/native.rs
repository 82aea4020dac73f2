//! C-ABI side of the capability table.
//!
//! Foreign code receives [`NATIVE_TABLE`] and calls the `extern "C"` shims
//! below. A shim reaches the host through the [`Session`] installed for the
//! duration of a call into foreign code; outside a session every shim
//! returns its failure value. Pointers from foreign code are trusted to be
//! valid for the lengths it passes, as there is no isolation to enforce it.

use core::cell::UnsafeCell;
use core::ffi::{c_char, c_void, CStr};
use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, Ordering};

use super::host::{FileSystem, HostApi};
use super::{ApiSlot, CapabilityTable, RawSlot, TableBuilder};
use crate::hal::{Font, Rect};
use crate::loader::{EntryCall, EntryInvoker, ExecError, Loader};

/// Entry point signature of an archive executable.
pub type EntryFn = unsafe extern "C" fn(u32, *const RawSlot, *mut u8, u32) -> u32;

struct ActiveHost {
    busy: AtomicBool,
    host: UnsafeCell<Option<*mut (dyn HostApi + 'static)>>,
}

// Only touched while `busy` is held; the device is single-threaded.
unsafe impl Sync for ActiveHost {}

static ACTIVE: ActiveHost = ActiveHost {
    busy: AtomicBool::new(false),
    host: UnsafeCell::new(None),
};

impl ActiveHost {
    fn lock(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn unlock(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Makes a host reachable from the shims until dropped.
pub struct Session<'h> {
    _host: PhantomData<&'h mut dyn HostApi>,
}

impl<'h> Session<'h> {
    /// Returns `None` if a session is already active.
    pub fn install(host: &'h mut (dyn HostApi + 'h)) -> Option<Self> {
        if !ACTIVE.lock() {
            return None;
        }
        let ptr: *mut (dyn HostApi + 'h) = host;
        // SAFETY: the pointer is removed in `drop` before 'h ends, and the
        // session holds the exclusive borrow meanwhile.
        let ptr: *mut (dyn HostApi + 'static) = unsafe { core::mem::transmute(ptr) };
        unsafe {
            let slot = &mut *ACTIVE.host.get();
            if slot.is_some() {
                ACTIVE.unlock();
                return None;
            }
            *slot = Some(ptr);
        }
        ACTIVE.unlock();
        Some(Self { _host: PhantomData })
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        while !ACTIVE.lock() {
            core::hint::spin_loop();
        }
        unsafe {
            *ACTIVE.host.get() = None;
        }
        ACTIVE.unlock();
    }
}

/// Runs `f` on the active host. The host is taken out of the session while
/// `f` runs, so a nested call sees no host instead of an aliased one.
fn with_host<R>(f: impl FnOnce(&mut dyn HostApi) -> R) -> Option<R> {
    if !ACTIVE.lock() {
        return None;
    }
    let taken = unsafe { (*ACTIVE.host.get()).take() };
    ACTIVE.unlock();

    let ptr = taken?;
    // SAFETY: installed by a live `Session`, which outlives this call.
    let result = f(unsafe { &mut *ptr });

    while !ACTIVE.lock() {
        core::hint::spin_loop();
    }
    unsafe {
        *ACTIVE.host.get() = Some(ptr);
    }
    ACTIVE.unlock();
    Some(result)
}

unsafe fn c_bytes<'p>(ptr: *const c_char) -> Option<&'p [u8]> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_bytes())
    }
}

unsafe fn c_str<'p>(ptr: *const c_char) -> Option<&'p str> {
    c_bytes(ptr).and_then(|b| core::str::from_utf8(b).ok())
}

fn rect(x: i16, y: i16, w: u16, h: u16) -> Rect {
    Rect::new(x, y, w, h)
}

extern "C" fn millis() -> u64 {
    with_host(|h| h.millis()).unwrap_or(0)
}

extern "C" fn msleep(ms: u32) {
    with_host(|h| h.msleep(ms));
}

extern "C" fn scan_keyboard() -> u64 {
    with_host(|h| h.scan_keyboard().0).unwrap_or(0)
}

unsafe extern "C" fn push_rect(x: i16, y: i16, w: u16, h: u16, pixels: *const u16) {
    if pixels.is_null() {
        return;
    }
    let area = rect(x, y, w, h);
    let pixels = core::slice::from_raw_parts(pixels, area.area());
    with_host(|host| host.push_rect(area, pixels));
}

extern "C" fn push_rect_uniform(x: i16, y: i16, w: u16, h: u16, color: u16) {
    with_host(|host| host.push_rect_uniform(rect(x, y, w, h), color));
}

unsafe extern "C" fn pull_rect(x: i16, y: i16, w: u16, h: u16, pixels: *mut u16) {
    if pixels.is_null() {
        return;
    }
    let area = rect(x, y, w, h);
    let pixels = core::slice::from_raw_parts_mut(pixels, area.area());
    with_host(|host| host.pull_rect(area, pixels));
}

unsafe fn draw_text(
    font: Font,
    text: *const c_char,
    x: i16,
    y: i16,
    fg: u16,
    bg: u16,
    fake: bool,
) -> i16 {
    let bytes = match c_bytes(text) {
        Some(bytes) => bytes,
        None => return x,
    };
    // Non-UTF-8 input is drawn up to the first bad byte.
    let text = match core::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            log::warn!("native: text not UTF-8 at byte {}, truncated", err.valid_up_to());
            core::str::from_utf8(&bytes[..err.valid_up_to()]).unwrap_or_default()
        }
    };
    with_host(|h| h.draw_text(font, text, x, y, fg, bg, fake)).unwrap_or(x)
}

unsafe extern "C" fn draw_text_large(
    text: *const c_char,
    x: i16,
    y: i16,
    fg: u16,
    bg: u16,
    fake: bool,
) -> i16 {
    draw_text(Font::Large, text, x, y, fg, bg, fake)
}

unsafe extern "C" fn draw_text_small(
    text: *const c_char,
    x: i16,
    y: i16,
    fg: u16,
    bg: u16,
    fake: bool,
) -> i16 {
    draw_text(Font::Small, text, x, y, fg, bg, fake)
}

extern "C" fn wait_for_vblank() -> bool {
    with_host(|h| h.wait_for_vblank()).unwrap_or(false)
}

unsafe extern "C" fn clipboard_store(text: *const c_char) {
    if let Some(text) = c_str(text) {
        with_host(|h| h.clipboard_store(text));
    }
}

extern "C" fn clipboard_text() -> *const c_char {
    with_host(|h| h.clipboard_text().as_ptr() as *const c_char).unwrap_or(core::ptr::null())
}

unsafe extern "C" fn file_list_with_extension(
    filenames: *mut *const c_char,
    max_records: i32,
    extension: *const c_char,
    storage: i32,
) -> i32 {
    let (Some(ext), Some(fs)) = (c_bytes(extension), FileSystem::from_raw(storage)) else {
        return 0;
    };
    if filenames.is_null() || max_records <= 0 {
        return 0;
    }
    let out = core::slice::from_raw_parts_mut(filenames, max_records as usize);
    with_host(|h| {
        let mut slots = out.iter_mut();
        let n = h.file_list_with_extension(ext, fs, max_records as usize, &mut |name| {
            // Every listed name is NUL-terminated where it lives.
            if let Some(slot) = slots.next() {
                *slot = name.as_ptr() as *const c_char;
            }
        });
        n as i32
    })
    .unwrap_or(0)
}

unsafe extern "C" fn file_exists(filename: *const c_char, storage: i32) -> bool {
    match (c_bytes(filename), FileSystem::from_raw(storage)) {
        (Some(name), Some(fs)) => with_host(|h| h.file_exists(name, fs)).unwrap_or(false),
        _ => false,
    }
}

unsafe extern "C" fn file_erase(filename: *const c_char, storage: i32) -> bool {
    match (c_bytes(filename), FileSystem::from_raw(storage)) {
        (Some(name), Some(fs)) => with_host(|h| h.file_erase(name, fs).is_ok()).unwrap_or(false),
        _ => false,
    }
}

unsafe extern "C" fn file_read(filename: *const c_char, len: *mut usize, storage: i32) -> *const c_char {
    let (Some(name), Some(fs)) = (c_bytes(filename), FileSystem::from_raw(storage)) else {
        return core::ptr::null();
    };
    let found = with_host(|h| h.file_read(name, fs).map(|v| (v.as_ptr(), v.len()))).flatten();
    match found {
        Some((ptr, n)) => {
            if !len.is_null() {
                *len = n;
            }
            ptr as *const c_char
        }
        None => core::ptr::null(),
    }
}

unsafe extern "C" fn file_write(
    filename: *const c_char,
    content: *const c_char,
    len: usize,
    storage: i32,
) -> bool {
    let (Some(name), Some(fs)) = (c_bytes(filename), FileSystem::from_raw(storage)) else {
        return false;
    };
    let content = if len == 0 {
        &[][..]
    } else if content.is_null() {
        return false;
    } else {
        core::slice::from_raw_parts(content as *const u8, len)
    };
    with_host(|h| h.file_write(name, content, fs).is_ok()).unwrap_or(false)
}

extern "C" fn lock_alpha() {
    with_host(|h| h.lock_alpha());
}

extern "C" fn reset_keyboard() {
    with_host(|h| h.reset_keyboard());
}

unsafe extern "C" fn get_key(allow_suspend: i32, alpha_was_active: *mut bool) -> i32 {
    with_host(|h| {
        if !alpha_was_active.is_null() {
            *alpha_was_active = h.alpha_active();
        }
        h.get_key(allow_suspend as u32)
    })
    .unwrap_or(-1)
}

extern "C" fn restore_backup(mode: i32) -> i32 {
    with_host(|h| h.restore_backup(mode).is_ok() as i32).unwrap_or(0)
}

extern "C" fn erase_sector(ptr: *mut c_void) -> bool {
    with_host(|h| h.erase_sector(ptr as usize as u32).is_ok()).unwrap_or(false)
}

unsafe extern "C" fn write_memory(dest: *mut u8, data: *const u8, length: usize) -> bool {
    let data = if length == 0 {
        &[][..]
    } else if data.is_null() {
        return false;
    } else {
        core::slice::from_raw_parts(data, length)
    };
    with_host(|h| h.write_memory(dest as usize as u32, data).is_ok()).unwrap_or(false)
}

extern "C" fn in_exam_mode() -> bool {
    with_host(|h| h.in_exam_mode()).unwrap_or(false)
}

macro_rules! slot {
    ($f:ident : $ty:ty) => {{
        let f: $ty = $f;
        // SAFETY: only the pointer type is erased; callers cast back to the
        // signature recorded for the slot.
        unsafe { core::mem::transmute::<$ty, unsafe extern "C" fn()>(f) }
    }};
}

pub static NATIVE_TABLE: CapabilityTable = TableBuilder::new()
    .append(ApiSlot::Millis, slot!(millis: extern "C" fn() -> u64))
    .append(ApiSlot::Msleep, slot!(msleep: extern "C" fn(u32)))
    .append(ApiSlot::ScanKeyboard, slot!(scan_keyboard: extern "C" fn() -> u64))
    .append(
        ApiSlot::PushRect,
        slot!(push_rect: unsafe extern "C" fn(i16, i16, u16, u16, *const u16)),
    )
    .append(
        ApiSlot::PushRectUniform,
        slot!(push_rect_uniform: extern "C" fn(i16, i16, u16, u16, u16)),
    )
    .append(
        ApiSlot::PullRect,
        slot!(pull_rect: unsafe extern "C" fn(i16, i16, u16, u16, *mut u16)),
    )
    .append(
        ApiSlot::DrawTextLarge,
        slot!(draw_text_large: unsafe extern "C" fn(*const c_char, i16, i16, u16, u16, bool) -> i16),
    )
    .append(
        ApiSlot::DrawTextSmall,
        slot!(draw_text_small: unsafe extern "C" fn(*const c_char, i16, i16, u16, u16, bool) -> i16),
    )
    .append(ApiSlot::WaitForVblank, slot!(wait_for_vblank: extern "C" fn() -> bool))
    .append(
        ApiSlot::ClipboardStore,
        slot!(clipboard_store: unsafe extern "C" fn(*const c_char)),
    )
    .append(
        ApiSlot::ClipboardText,
        slot!(clipboard_text: extern "C" fn() -> *const c_char),
    )
    .append(
        ApiSlot::FileListWithExtension,
        slot!(file_list_with_extension: unsafe extern "C" fn(*mut *const c_char, i32, *const c_char, i32) -> i32),
    )
    .append(
        ApiSlot::FileExists,
        slot!(file_exists: unsafe extern "C" fn(*const c_char, i32) -> bool),
    )
    .append(
        ApiSlot::FileErase,
        slot!(file_erase: unsafe extern "C" fn(*const c_char, i32) -> bool),
    )
    .append(
        ApiSlot::FileRead,
        slot!(file_read: unsafe extern "C" fn(*const c_char, *mut usize, i32) -> *const c_char),
    )
    .append(
        ApiSlot::FileWrite,
        slot!(file_write: unsafe extern "C" fn(*const c_char, *const c_char, usize, i32) -> bool),
    )
    .append(ApiSlot::LockAlpha, slot!(lock_alpha: extern "C" fn()))
    .append(ApiSlot::ResetKeyboard, slot!(reset_keyboard: extern "C" fn()))
    .append(ApiSlot::GetKey, slot!(get_key: unsafe extern "C" fn(i32, *mut bool) -> i32))
    .append(ApiSlot::RestoreBackup, slot!(restore_backup: extern "C" fn(i32) -> i32))
    .append(ApiSlot::EraseSector, slot!(erase_sector: extern "C" fn(*mut c_void) -> bool))
    .append(
        ApiSlot::WriteMemory,
        slot!(write_memory: unsafe extern "C" fn(*mut u8, *const u8, usize) -> bool),
    )
    .append(ApiSlot::InExamMode, slot!(in_exam_mode: extern "C" fn() -> bool))
    .build();

/// Jumps to entry addresses as real code.
pub struct NativeInvoker {
    _private: (),
}

impl NativeInvoker {
    /// # Safety
    ///
    /// Every address the loader accepts must hold code following
    /// [`EntryFn`]. The loader only checks the address window.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl EntryInvoker for NativeInvoker {
    fn invoke(&mut self, call: EntryCall<'_>) -> u32 {
        // SAFETY: upheld by the caller of `NativeInvoker::new`.
        unsafe {
            let entry: EntryFn = core::mem::transmute(call.address as usize);
            entry(
                call.api_version,
                call.table.as_ptr(),
                call.heap.as_mut_ptr(),
                call.heap.len() as u32,
            )
        }
    }
}

/// Runs archive executable `name` on the device, with `host` serving the
/// capability table until it returns.
///
/// # Safety
///
/// See [`NativeInvoker::new`].
pub unsafe fn execute(
    host: &mut crate::api::Host<'_>,
    name: &str,
    heap: &mut [u8],
) -> Result<u32, ExecError> {
    let archive = host.archive();
    let prefs = host.prefs();
    let mut loader = Loader::new(&NATIVE_TABLE, host.map().exec_window);
    let mut invoker = NativeInvoker::new();

    let _session = Session::install(host).ok_or(ExecError::Busy)?;
    loader.execute(&archive, prefs, name, heap, &mut invoker)
}
