//! On-flash record header (ustar layout, GNU magic).

use crate::config::ARCHIVE_BLOCK_SIZE;

pub const HEADER_SIZE: usize = 512;
pub const MAGIC: &[u8; 8] = b"ustar  \0";

pub(crate) const NAME: usize = 0;
pub(crate) const NAME_LEN: usize = 100;
pub(crate) const MODE: usize = 100;
pub(crate) const UID: usize = 108;
pub(crate) const GID: usize = 116;
pub(crate) const SIZE: usize = 124;
pub(crate) const MTIME: usize = 136;
pub(crate) const CHKSUM: usize = 148;
pub(crate) const TYPEFLAG: usize = 156;
pub(crate) const MAGIC_AT: usize = 257;

/// Digits actually used in the 12-byte size field.
pub const SIZE_DIGITS: usize = 11;

/// Byte of the mode field holding the owner permission digit.
const OWNER_MODE_DIGIT: usize = MODE + 4;

/// Borrowed view of one 512-byte header.
#[derive(Clone, Copy)]
pub struct Header<'a> {
    raw: &'a [u8],
}

impl<'a> Header<'a> {
    pub fn new(raw: &'a [u8]) -> Option<Self> {
        if raw.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            raw: &raw[..HEADER_SIZE],
        })
    }

    /// Magic matches and the name is neither empty nor erased flash.
    pub fn is_sane(&self) -> bool {
        let first = self.raw[NAME];
        &self.raw[MAGIC_AT..MAGIC_AT + MAGIC.len()] == MAGIC && first != 0x00 && first != 0xFF
    }

    /// Name bytes up to the first NUL.
    pub fn name(&self) -> &'a [u8] {
        let field = &self.raw[NAME..NAME + NAME_LEN];
        let end = field.iter().position(|b| *b == 0).unwrap_or(NAME_LEN);
        &field[..end]
    }

    /// Owner execute bit of the octal mode string.
    pub fn is_executable(&self) -> bool {
        self.raw[OWNER_MODE_DIGIT] & 0x01 == 0x01
    }

    /// Payload length, `None` if the size field holds anything but octal
    /// digits.
    pub fn size(&self) -> Option<u64> {
        parse_octal(&self.raw[SIZE..SIZE + SIZE_DIGITS])
    }

    pub fn typeflag(&self) -> u8 {
        self.raw[TYPEFLAG]
    }
}

/// Strict fixed-width octal: every byte must be `'0'..='7'`.
pub fn parse_octal(field: &[u8]) -> Option<u64> {
    if field.is_empty() {
        return None;
    }
    field.iter().try_fold(0u64, |acc, &c| match c {
        b'0'..=b'7' => Some(acc * 8 + (c - b'0') as u64),
        _ => None,
    })
}

/// Distance from one header to the next: header plus payload, rounded up
/// to the block size.
pub fn stride(size: u64) -> u64 {
    let block = ARCHIVE_BLOCK_SIZE as u64;
    (HEADER_SIZE as u64 + size + block - 1) / block * block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octal_is_strict() {
        assert_eq!(parse_octal(b"00000000144"), Some(100));
        assert_eq!(parse_octal(b"77777777777"), Some(0o77777777777));
        assert_eq!(parse_octal(b"0000000014 "), None);
        assert_eq!(parse_octal(b"\xFF\xFF"), None);
        assert_eq!(parse_octal(b""), None);
    }

    #[test]
    fn stride_rounds_to_blocks() {
        assert_eq!(stride(0), 512);
        assert_eq!(stride(1), 1024);
        assert_eq!(stride(512), 1024);
        assert_eq!(stride(513), 1536);
    }

    #[test]
    fn erased_header_is_not_sane() {
        let raw = [0xFFu8; HEADER_SIZE];
        assert!(!Header::new(&raw).unwrap().is_sane());
        let raw = [0u8; HEADER_SIZE];
        assert!(!Header::new(&raw).unwrap().is_sane());
    }
}
