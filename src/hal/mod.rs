//! Hardware abstraction: address views, flash media and the device
//! collaborators the core talks to.

pub mod flash;
pub mod sim;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod device;

use core::convert::Infallible;

pub use flash::{FlashError, FlashMedium, SectorGroup, SectorMap};

/// Half-open range of physical addresses, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressWindow {
    pub start: u32,
    pub end: u32,
}

impl AddressWindow {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    #[inline]
    pub const fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    #[inline]
    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end
    }

    /// True when every byte of `addr..addr + len` lies inside the window.
    pub fn contains_range(&self, addr: u32, len: usize) -> bool {
        let end = addr as u64 + len as u64;
        addr >= self.start && end <= self.end as u64
    }

    pub const fn overlaps(&self, other: &AddressWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Non-owning view of memory-mapped flash at a known physical base.
///
/// Every accessor is bounds-checked against the view, so no address computed
/// from flash content can reach memory outside it. The view is only
/// meaningful while the underlying flash is not reprogrammed.
#[derive(Debug, Clone, Copy)]
pub struct MappedRegion<'a> {
    base: u32,
    bytes: &'a [u8],
}

impl<'a> MappedRegion<'a> {
    /// Returns `None` if the view would extend past the 32-bit address space.
    pub fn new(base: u32, bytes: &'a [u8]) -> Option<Self> {
        if base as u64 + bytes.len() as u64 > u32::MAX as u64 {
            return None;
        }
        Some(Self { base, bytes })
    }

    #[inline]
    pub fn base(&self) -> u32 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn window(&self) -> AddressWindow {
        AddressWindow::new(self.base, self.base + self.bytes.len() as u32)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn offset_of(&self, addr: u32) -> Option<usize> {
        if self.window().contains(addr) {
            Some((addr - self.base) as usize)
        } else {
            None
        }
    }

    /// Physical address of the byte at `offset`, if inside the view.
    pub fn address_of(&self, offset: usize) -> Option<u32> {
        if offset < self.bytes.len() {
            Some(self.base + offset as u32)
        } else {
            None
        }
    }

    pub fn bytes_at(&self, addr: u32, len: usize) -> Option<&'a [u8]> {
        let start = self.offset_of(addr)?;
        let end = start.checked_add(len)?;
        self.bytes.get(start..end)
    }

    pub fn read_u32_le(&self, addr: u32) -> Option<u32> {
        let raw = self.bytes_at(addr, 4)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Narrows the view to `window`, which must lie entirely inside it.
    pub fn sub_region(&self, window: AddressWindow) -> Option<MappedRegion<'a>> {
        let bytes = self.bytes_at(window.start, window.len() as usize)?;
        Some(MappedRegion {
            base: window.start,
            bytes,
        })
    }
}

/// Screen rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub const fn new(x: i16, y: i16, width: u16, height: u16) -> Self {
        Self { x, y, width, height }
    }

    #[inline]
    pub const fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Large,
    Small,
}

/// Physical key index as reported by the keyboard matrix scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Key(pub u8);

impl Key {
    pub const LEFT: Key = Key(0);
    pub const UP: Key = Key(1);
    pub const DOWN: Key = Key(2);
    pub const RIGHT: Key = Key(3);
    pub const OK: Key = Key(4);
    pub const BACK: Key = Key(5);
    pub const HOME: Key = Key(6);
    pub const ON_OFF: Key = Key(8);
    pub const SHIFT: Key = Key(12);
    pub const ALPHA: Key = Key(13);
    pub const BACKSPACE: Key = Key(17);
    pub const SEVEN: Key = Key(30);
    pub const EIGHT: Key = Key(31);
    pub const NINE: Key = Key(32);
    pub const FOUR: Key = Key(36);
    pub const FIVE: Key = Key(37);
    pub const SIX: Key = Key(38);
    pub const ONE: Key = Key(42);
    pub const TWO: Key = Key(43);
    pub const THREE: Key = Key(44);
    pub const PLUS: Key = Key(45);
    pub const MINUS: Key = Key(46);
    pub const ZERO: Key = Key(48);
    pub const EXE: Key = Key(52);

    /// Number of positions in the scan bitmap.
    pub const COUNT: u8 = 54;

    #[inline]
    pub const fn code(self) -> u8 {
        self.0
    }
}

/// Snapshot of the whole key matrix, one bit per [`Key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyState(pub u64);

impl KeyState {
    pub fn from_keys(keys: &[Key]) -> Self {
        let mut bits = 0u64;
        for key in keys {
            if key.0 < Key::COUNT {
                bits |= 1 << key.0;
            }
        }
        KeyState(bits)
    }

    #[inline]
    pub fn key_down(&self, key: Key) -> bool {
        key.0 < Key::COUNT && (self.0 >> key.0) & 1 == 1
    }
}

/// Modifier state of the keyboard. Shift and Alpha alone last for one key;
/// the lock states survive until cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftAlpha {
    Default,
    Shift,
    Alpha,
    ShiftAlpha,
    AlphaLock,
    ShiftAlphaLock,
}

impl ShiftAlpha {
    #[inline]
    pub fn shift(self) -> bool {
        matches!(self, ShiftAlpha::Shift | ShiftAlpha::ShiftAlpha | ShiftAlpha::ShiftAlphaLock)
    }

    #[inline]
    pub fn alpha(self) -> bool {
        !matches!(self, ShiftAlpha::Default | ShiftAlpha::Shift)
    }

    /// State after `key` is pressed in this state.
    pub fn next(self, key: Key) -> ShiftAlpha {
        match (key, self) {
            (Key::SHIFT, Self::Default) => Self::Shift,
            (Key::SHIFT, Self::Shift) => Self::Default,
            (Key::SHIFT, Self::Alpha) => Self::ShiftAlpha,
            (Key::SHIFT, Self::ShiftAlpha) => Self::Alpha,
            (Key::SHIFT, Self::AlphaLock) => Self::ShiftAlphaLock,
            (Key::SHIFT, Self::ShiftAlphaLock) => Self::AlphaLock,
            (Key::ALPHA, Self::Default) => Self::Alpha,
            (Key::ALPHA, Self::Alpha) => Self::AlphaLock,
            (Key::ALPHA, Self::Shift) => Self::ShiftAlpha,
            (Key::ALPHA, Self::ShiftAlpha) => Self::ShiftAlphaLock,
            (Key::ALPHA, Self::AlphaLock | Self::ShiftAlphaLock) => Self::Default,
            (_, Self::AlphaLock | Self::ShiftAlphaLock) => Self::AlphaLock,
            _ => Self::Default,
        }
    }
}

pub trait Display {
    fn push_rect(&mut self, rect: Rect, pixels: &[u16]);
    fn push_rect_uniform(&mut self, rect: Rect, color: u16);
    fn pull_rect(&mut self, rect: Rect, pixels: &mut [u16]);
    /// Draws `text` and returns the x coordinate after the last glyph. With
    /// `measure_only` nothing reaches the screen.
    fn draw_string(
        &mut self,
        text: &str,
        x: i16,
        y: i16,
        font: Font,
        fg: u16,
        bg: u16,
        measure_only: bool,
    ) -> i16;
    fn wait_for_vblank(&mut self) -> bool;
}

pub trait Keyboard {
    fn scan(&mut self) -> KeyState;
    /// Next key press event, `WouldBlock` while none is pending.
    fn poll_key(&mut self) -> nb::Result<Key, Infallible>;
    fn set_shift_alpha(&mut self, status: ShiftAlpha);
}

/// Monotonic millisecond clock.
pub trait Clock {
    fn millis(&self) -> u64;
}

pub trait Backlight {
    fn set_brightness(&mut self, level: u8);
}

/// Full device reset. `boot_target` is left for the boot stage to pick up;
/// `None` restarts the current image.
pub trait SystemReset {
    fn reset(&mut self, boot_target: Option<u32>) -> !;
}
