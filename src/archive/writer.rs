//! Lays out archive images, for the simulator and for flashing tools.

use core::fmt;

use super::header::{
    self, CHKSUM, GID, HEADER_SIZE, MAGIC, MAGIC_AT, MODE, MTIME, NAME_LEN, SIZE, SIZE_DIGITS,
    TYPEFLAG, UID,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    NoSpace,
    /// Empty, too long, or containing NUL.
    BadName,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::NoSpace => f.write_str("archive image full"),
            WriteError::BadName => f.write_str("invalid entry name"),
        }
    }
}

/// Appends records to an image buffer. Unused space keeps the erased-flash
/// fill so the reader stops after the last record.
pub struct ArchiveWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> ArchiveWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        buf.fill(0xFF);
        Self { buf, offset: 0 }
    }

    /// Bytes used so far.
    pub fn len(&self) -> usize {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    /// Appends one record and returns the offset of its header.
    pub fn append(&mut self, name: &str, executable: bool, data: &[u8]) -> Result<usize, WriteError> {
        let name = name.as_bytes();
        if name.is_empty() || name.len() >= NAME_LEN || name.contains(&0) {
            return Err(WriteError::BadName);
        }
        let stride = header::stride(data.len() as u64) as usize;
        let start = self.offset;
        if start + stride > self.buf.len() {
            return Err(WriteError::NoSpace);
        }

        let record = &mut self.buf[start..start + stride];
        record.fill(0);
        let (head, payload) = record.split_at_mut(HEADER_SIZE);

        head[..name.len()].copy_from_slice(name);
        let mode: &[u8; 8] = if executable { b"0000755\0" } else { b"0000644\0" };
        head[MODE..MODE + 8].copy_from_slice(mode);
        head[UID..UID + 8].copy_from_slice(b"0000000\0");
        head[GID..GID + 8].copy_from_slice(b"0000000\0");
        write_octal(&mut head[SIZE..SIZE + SIZE_DIGITS], data.len() as u64);
        write_octal(&mut head[MTIME..MTIME + 11], 0);
        head[TYPEFLAG] = b'0';
        head[MAGIC_AT..MAGIC_AT + MAGIC.len()].copy_from_slice(MAGIC);

        // Checksum is summed with its own field read as spaces.
        head[CHKSUM..CHKSUM + 8].fill(b' ');
        let sum: u64 = head.iter().map(|b| *b as u64).sum();
        write_octal(&mut head[CHKSUM..CHKSUM + 6], sum);
        head[CHKSUM + 6] = 0;

        payload[..data.len()].copy_from_slice(data);
        self.offset += stride;
        Ok(start)
    }
}

fn write_octal(field: &mut [u8], mut value: u64) {
    for slot in field.iter_mut().rev() {
        *slot = b'0' + (value & 7) as u8;
        value >>= 3;
    }
}
