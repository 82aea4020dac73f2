//! RAM-backed stand-ins for the device, used by the host simulator build
//! and by tests.

use core::cell::Cell;
use core::convert::Infallible;

use super::flash::{FlashError, FlashMedium, SectorMap};
use super::{
    Backlight, Clock, Display, Font, Key, KeyState, Keyboard, MappedRegion, Rect, ShiftAlpha,
    SystemReset,
};

/// Flash simulated over a caller-provided buffer with real NOR semantics:
/// erase sets `0xFF`, programming ANDs.
pub struct SimFlash<'a> {
    map: SectorMap,
    cells: &'a mut [u8],
    erases: usize,
    programs: usize,
}

impl<'a> SimFlash<'a> {
    /// `cells` must be exactly as large as the map. Content is kept as is,
    /// so a pre-built image can be mounted.
    pub fn new(map: SectorMap, cells: &'a mut [u8]) -> Option<Self> {
        if cells.len() != map.size() as usize {
            return None;
        }
        Some(Self {
            map,
            cells,
            erases: 0,
            programs: 0,
        })
    }

    /// Like [`SimFlash::new`] but starts from a fully erased device.
    pub fn erased(map: SectorMap, cells: &'a mut [u8]) -> Option<Self> {
        let mut flash = Self::new(map, cells)?;
        flash.cells.fill(0xFF);
        Some(flash)
    }

    pub fn region(&self) -> MappedRegion<'_> {
        // SectorMap windows always fit below 4 GiB.
        MappedRegion::new(self.map.base(), &*self.cells)
            .unwrap_or_else(|| unreachable!("sector map exceeds address space"))
    }

    pub fn bytes(&self) -> &[u8] {
        &*self.cells
    }

    /// Direct access for laying down fixtures, bypassing NOR semantics.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.cells
    }

    pub fn erase_count(&self) -> usize {
        self.erases
    }

    pub fn program_count(&self) -> usize {
        self.programs
    }

    fn offset(&self, addr: u32, len: usize) -> Result<usize, FlashError> {
        if !self.map.window().contains_range(addr, len) {
            return Err(FlashError::OutOfRange);
        }
        Ok((addr - self.map.base()) as usize)
    }
}

impl FlashMedium for SimFlash<'_> {
    fn sectors(&self) -> &SectorMap {
        &self.map
    }

    fn erase_sector(&mut self, index: usize) -> Result<(), FlashError> {
        let span = self.map.sector_span(index).ok_or(FlashError::OutOfRange)?;
        let start = (span.start - self.map.base()) as usize;
        let end = (span.end - self.map.base()) as usize;
        self.cells[start..end].fill(0xFF);
        self.erases += 1;
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let start = self.offset(addr, data.len())?;
        for (cell, byte) in self.cells[start..start + data.len()].iter_mut().zip(data) {
            *cell &= *byte;
        }
        self.programs += 1;
        Ok(())
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = self.offset(addr, buf.len())?;
        buf.copy_from_slice(&self.cells[start..start + buf.len()]);
        Ok(())
    }
}

/// Wraps another medium and starts failing chosen operations after a
/// number of successful calls.
///
/// A failed read zeroes `buf` first, the way an aborted bus transfer leaves
/// a receive buffer half written.
pub struct FaultyFlash<F> {
    inner: F,
    reads_left: Option<usize>,
    programs_left: Option<usize>,
    erases_left: Option<usize>,
    error: FlashError,
}

impl<F: FlashMedium> FaultyFlash<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            reads_left: None,
            programs_left: None,
            erases_left: None,
            error: FlashError::Bus,
        }
    }

    /// Lets `n` reads through, then fails every later one.
    pub fn fail_reads_after(mut self, n: usize) -> Self {
        self.reads_left = Some(n);
        self
    }

    pub fn fail_programs_after(mut self, n: usize) -> Self {
        self.programs_left = Some(n);
        self
    }

    pub fn fail_erases_after(mut self, n: usize) -> Self {
        self.erases_left = Some(n);
        self
    }

    /// Error reported by failing calls; [`FlashError::Bus`] by default.
    pub fn with_error(mut self, error: FlashError) -> Self {
        self.error = error;
        self
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

fn countdown(left: &mut Option<usize>, error: FlashError) -> Result<(), FlashError> {
    match left {
        Some(0) => Err(error),
        Some(n) => {
            *n -= 1;
            Ok(())
        }
        None => Ok(()),
    }
}

impl<F: FlashMedium> FlashMedium for FaultyFlash<F> {
    fn sectors(&self) -> &SectorMap {
        self.inner.sectors()
    }

    fn erase_sector(&mut self, index: usize) -> Result<(), FlashError> {
        countdown(&mut self.erases_left, self.error)?;
        self.inner.erase_sector(index)
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        countdown(&mut self.programs_left, self.error)?;
        self.inner.program(addr, data)
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        if let Err(err) = countdown(&mut self.reads_left, self.error) {
            buf.fill(0);
            return Err(err);
        }
        self.inner.read(addr, buf)
    }
}

const KEY_QUEUE: usize = 32;

/// Scripted keyboard: queued presses plus a held-key bitmap.
pub struct SimKeyboard {
    queue: [Key; KEY_QUEUE],
    head: usize,
    len: usize,
    held: KeyState,
    shift_alpha: ShiftAlpha,
}

impl SimKeyboard {
    pub fn new() -> Self {
        Self {
            queue: [Key(0); KEY_QUEUE],
            head: 0,
            len: 0,
            held: KeyState::default(),
            shift_alpha: ShiftAlpha::Default,
        }
    }

    /// Queues a press event. Returns `false` when the queue is full.
    pub fn press(&mut self, key: Key) -> bool {
        if self.len == KEY_QUEUE {
            return false;
        }
        self.queue[(self.head + self.len) % KEY_QUEUE] = key;
        self.len += 1;
        true
    }

    pub fn hold(&mut self, keys: &[Key]) {
        self.held = KeyState::from_keys(keys);
    }

    pub fn shift_alpha(&self) -> ShiftAlpha {
        self.shift_alpha
    }

    pub fn pending(&self) -> usize {
        self.len
    }
}

impl Default for SimKeyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyboard for SimKeyboard {
    fn scan(&mut self) -> KeyState {
        self.held
    }

    fn poll_key(&mut self) -> nb::Result<Key, Infallible> {
        if self.len == 0 {
            return Err(nb::Error::WouldBlock);
        }
        let key = self.queue[self.head];
        self.head = (self.head + 1) % KEY_QUEUE;
        self.len -= 1;
        Ok(key)
    }

    fn set_shift_alpha(&mut self, status: ShiftAlpha) {
        self.shift_alpha = status;
    }
}

/// Clock that advances by `step` milliseconds on every read.
pub struct SimClock {
    now: Cell<u64>,
    step: u64,
}

impl SimClock {
    pub fn new(step: u64) -> Self {
        Self {
            now: Cell::new(0),
            step,
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for SimClock {
    fn millis(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}

/// Display that only keeps a fill colour and operation counters.
#[derive(Default)]
pub struct SimDisplay {
    pub fill: u16,
    pub pushes: usize,
    pub texts: usize,
}

impl Display for SimDisplay {
    fn push_rect(&mut self, _rect: Rect, pixels: &[u16]) {
        if let Some(first) = pixels.first() {
            self.fill = *first;
        }
        self.pushes += 1;
    }

    fn push_rect_uniform(&mut self, _rect: Rect, color: u16) {
        self.fill = color;
        self.pushes += 1;
    }

    fn pull_rect(&mut self, _rect: Rect, pixels: &mut [u16]) {
        pixels.fill(self.fill);
    }

    fn draw_string(
        &mut self,
        text: &str,
        x: i16,
        _y: i16,
        font: Font,
        _fg: u16,
        _bg: u16,
        measure_only: bool,
    ) -> i16 {
        let advance = match font {
            Font::Large => 10,
            Font::Small => 7,
        };
        if !measure_only {
            self.texts += 1;
        }
        x.saturating_add((text.chars().count() as i16).saturating_mul(advance))
    }

    fn wait_for_vblank(&mut self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct SimBacklight {
    pub level: u8,
}

impl Backlight for SimBacklight {
    fn set_brightness(&mut self, level: u8) {
        self.level = level;
    }
}

/// Reset that unwinds instead of restarting; tests observe it with
/// `#[should_panic]`.
#[derive(Default)]
pub struct SimReset;

impl SystemReset for SimReset {
    fn reset(&mut self, boot_target: Option<u32>) -> ! {
        match boot_target {
            Some(addr) => panic!("system reset into slot at {:#010x}", addr),
            None => panic!("system reset"),
        }
    }
}
