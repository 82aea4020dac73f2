//! Single shared text clipboard.
//!
//! The stored text is always followed by a NUL so it can be handed across
//! the C boundary as is.

pub const CLIPBOARD_SIZE: usize = 1024;

pub struct Clipboard {
    buf: [u8; CLIPBOARD_SIZE + 1],
    len: usize,
}

impl Clipboard {
    pub const fn new() -> Self {
        Self {
            buf: [0; CLIPBOARD_SIZE + 1],
            len: 0,
        }
    }

    /// Stores `text`, cut at a character boundary if it does not fit.
    pub fn store(&mut self, text: &str) {
        let mut len = text.len().min(CLIPBOARD_SIZE);
        while !text.is_char_boundary(len) {
            len -= 1;
        }
        self.buf[..len].copy_from_slice(&text.as_bytes()[..len]);
        self.buf[len] = 0;
        self.len = len;
    }

    pub fn text(&self) -> &str {
        // Only whole characters are ever stored.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }

    /// Text including its trailing NUL.
    pub fn text_with_nul(&self) -> &[u8] {
        &self.buf[..=self.len]
    }

    pub fn clear(&mut self) {
        self.buf[0] = 0;
        self.len = 0;
    }
}

impl Default for Clipboard {
    fn default() -> Self {
        Self::new()
    }
}
