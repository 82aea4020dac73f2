//! RAM ring sink for the `log` facade.
//!
//! Records are formatted into fixed lines at log time and kept until a
//! console drains them through `ufmt`. When the ring is full the oldest
//! line is overwritten. A record arriving while the ring is held (an
//! interrupt logging during a drain) is counted as dropped.

use core::cell::UnsafeCell;
use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use ufmt::uWrite;

pub const LINE_LEN: usize = 64;
pub const RING_LEN: usize = 16;

#[cfg(feature = "debug")]
pub const DEFAULT_LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(not(feature = "debug"))]
pub const DEFAULT_LEVEL: LevelFilter = LevelFilter::Info;

#[derive(Clone, Copy)]
struct Line {
    level: Level,
    len: u8,
    text: [u8; LINE_LEN],
}

impl Line {
    const EMPTY: Line = Line {
        level: Level::Trace,
        len: 0,
        text: [0; LINE_LEN],
    };

    fn text(&self) -> &str {
        core::str::from_utf8(&self.text[..self.len as usize]).unwrap_or("")
    }
}

/// Truncating formatter over one line; cuts at a character boundary.
struct LineWriter<'a> {
    line: &'a mut Line,
}

impl Write for LineWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let start = self.line.len as usize;
        let mut n = s.len().min(LINE_LEN - start);
        while !s.is_char_boundary(n) {
            n -= 1;
        }
        self.line.text[start..start + n].copy_from_slice(&s.as_bytes()[..n]);
        self.line.len += n as u8;
        Ok(())
    }
}

struct Ring {
    lines: [Line; RING_LEN],
    head: usize,
    len: usize,
}

impl Ring {
    fn push(&mut self, line: Line) {
        let slot = (self.head + self.len) % RING_LEN;
        self.lines[slot] = line;
        if self.len == RING_LEN {
            self.head = (self.head + 1) % RING_LEN;
        } else {
            self.len += 1;
        }
    }

    fn pop(&mut self) -> Option<Line> {
        if self.len == 0 {
            return None;
        }
        let line = self.lines[self.head];
        self.head = (self.head + 1) % RING_LEN;
        self.len -= 1;
        Some(line)
    }
}

pub struct RingLogger {
    busy: AtomicBool,
    dropped: AtomicU32,
    level: LevelFilter,
    ring: UnsafeCell<Ring>,
}

// The ring is only touched while `busy` is held.
unsafe impl Sync for RingLogger {}

impl RingLogger {
    pub const fn new(level: LevelFilter) -> Self {
        Self {
            busy: AtomicBool::new(false),
            dropped: AtomicU32::new(0),
            level,
            ring: UnsafeCell::new(Ring {
                lines: [Line::EMPTY; RING_LEN],
                head: 0,
                len: 0,
            }),
        }
    }

    fn with_ring<R>(&self, f: impl FnOnce(&mut Ring) -> R) -> Option<R> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        // SAFETY: `busy` was false and is now ours.
        let out = f(unsafe { &mut *self.ring.get() });
        self.busy.store(false, Ordering::Release);
        Some(out)
    }

    /// Lines lost because the ring was held when they arrived.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.with_ring(|ring| ring.len).unwrap_or(0)
    }

    /// Writes every buffered line to `out`, oldest first, and returns how
    /// many were written. A line is removed from the ring before it is
    /// written, so an output error loses at most that line.
    pub fn drain<W: uWrite + ?Sized>(&self, out: &mut W) -> Result<usize, W::Error> {
        let mut written = 0;
        while let Some(Some(line)) = self.with_ring(Ring::pop) {
            ufmt::uwrite!(out, "[{}] {}\r\n", line.level.as_str(), line.text())?;
            written += 1;
        }
        Ok(written)
    }
}

impl Log for RingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut line = Line {
            level: record.level(),
            ..Line::EMPTY
        };
        let _ = write!(LineWriter { line: &mut line }, "{}", record.args());
        if self.with_ring(|ring| ring.push(line)).is_none() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self) {}
}

pub static LOGGER: RingLogger = RingLogger::new(DEFAULT_LEVEL);

/// Installs [`LOGGER`] as the global logger.
pub fn init() -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(LOGGER.level);
    Ok(())
}
