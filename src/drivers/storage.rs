//! RAM record storage.
//!
//! Layout: [`STORAGE_MAGIC`], then records `{ size: u16 LE, name\0, value }`
//! where `size` covers the whole record, then a zero size. A backup slot is
//! a byte copy of this region, which is why the same magic opens both.

use core::fmt;

use crate::config::STORAGE_MAGIC;

const MAGIC_LEN: usize = STORAGE_MAGIC.len();
const SIZE_FIELD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    BadMagic,
    NameTaken,
    NotEnoughSpace,
    /// Empty, missing an extension, or containing NUL.
    NonCompliantName,
    NotFound,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            StorageError::BadMagic => "storage signature missing",
            StorageError::NameTaken => "record name taken",
            StorageError::NotEnoughSpace => "storage full",
            StorageError::NonCompliantName => "invalid record name",
            StorageError::NotFound => "no such record",
        };
        f.write_str(msg)
    }
}

/// True when the first record size is zero: nothing worth backing up.
pub fn looks_empty(region: &[u8]) -> bool {
    matches!(region.get(MAGIC_LEN..MAGIC_LEN + SIZE_FIELD), Some([0, 0]))
}

pub fn has_magic(region: &[u8]) -> bool {
    region.starts_with(&STORAGE_MAGIC)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    name: &'a [u8],
    value: &'a [u8],
    offset: usize,
    size: usize,
}

impl<'a> Record<'a> {
    pub fn full_name(&self) -> &'a [u8] {
        self.name
    }

    pub fn value(&self) -> &'a [u8] {
        self.value
    }

    pub fn has_extension(&self, ext: &[u8]) -> bool {
        self.name.ends_with(ext)
    }
}

pub struct Records<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Record<'a>> {
        let offset = self.offset;
        let size = match self.buf.get(offset..offset + SIZE_FIELD)? {
            [lo, hi] => u16::from_le_bytes([*lo, *hi]) as usize,
            _ => return None,
        };
        let body = self.buf.get(offset + SIZE_FIELD..offset + size.max(SIZE_FIELD))?;
        let nul = body.iter().position(|b| *b == 0)?;
        self.offset += size;
        Some(Record {
            name: &body[..nul],
            value: &body[nul + 1..],
            offset,
            size,
        })
    }
}

pub struct Storage<'a> {
    buf: &'a mut [u8],
}

impl<'a> Storage<'a> {
    /// Wipes `buf` into an empty store.
    pub fn format(buf: &'a mut [u8]) -> Result<Self, StorageError> {
        if buf.len() < MAGIC_LEN + SIZE_FIELD {
            return Err(StorageError::NotEnoughSpace);
        }
        buf.fill(0);
        buf[..MAGIC_LEN].copy_from_slice(&STORAGE_MAGIC);
        Ok(Self { buf })
    }

    pub fn open(buf: &'a mut [u8]) -> Result<Self, StorageError> {
        if buf.len() < MAGIC_LEN + SIZE_FIELD || !has_magic(buf) {
            return Err(StorageError::BadMagic);
        }
        Ok(Self { buf })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &*self.buf
    }

    /// Raw region, for restoring a backup over it.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.buf
    }

    pub fn looks_empty(&self) -> bool {
        looks_empty(&*self.buf)
    }

    pub fn records(&self) -> Records<'_> {
        Records {
            buf: &*self.buf,
            offset: MAGIC_LEN,
        }
    }

    pub fn record_named(&self, name: &[u8]) -> Option<Record<'_>> {
        self.records().find(|r| r.name == name)
    }

    pub fn records_with_extension<'s>(&'s self, ext: &'s [u8]) -> impl Iterator<Item = Record<'s>> + 's {
        self.records().filter(move |r| r.has_extension(ext))
    }

    /// Offset of the terminating zero size.
    fn end(&self) -> usize {
        self.records()
            .last()
            .map_or(MAGIC_LEN, |r| r.offset + r.size)
    }

    /// Bytes left for new records.
    pub fn available(&self) -> usize {
        self.buf.len().saturating_sub(self.end() + SIZE_FIELD)
    }

    pub fn create_record(&mut self, name: &[u8], value: &[u8]) -> Result<(), StorageError> {
        if !is_compliant(name) {
            return Err(StorageError::NonCompliantName);
        }
        if self.record_named(name).is_some() {
            return Err(StorageError::NameTaken);
        }
        let size = SIZE_FIELD + name.len() + 1 + value.len();
        if size > u16::MAX as usize || size > self.available() {
            return Err(StorageError::NotEnoughSpace);
        }

        let at = self.end();
        let record = &mut self.buf[at..at + size + SIZE_FIELD];
        record[..SIZE_FIELD].copy_from_slice(&(size as u16).to_le_bytes());
        record[SIZE_FIELD..SIZE_FIELD + name.len()].copy_from_slice(name);
        record[SIZE_FIELD + name.len()] = 0;
        record[SIZE_FIELD + name.len() + 1..size].copy_from_slice(value);
        record[size..].fill(0);
        Ok(())
    }

    /// Replaces the value of an existing record; the record moves to the end.
    pub fn set_value(&mut self, name: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let old = self.record_named(name).ok_or(StorageError::NotFound)?.size;
        let size = SIZE_FIELD + name.len() + 1 + value.len();
        if size > u16::MAX as usize || size > self.available() + old {
            return Err(StorageError::NotEnoughSpace);
        }
        self.destroy(name)?;
        self.create_record(name, value)
    }

    pub fn destroy(&mut self, name: &[u8]) -> Result<(), StorageError> {
        let (offset, size) = self
            .record_named(name)
            .map(|r| (r.offset, r.size))
            .ok_or(StorageError::NotFound)?;
        let end = self.end() + SIZE_FIELD;
        self.buf.copy_within(offset + size..end, offset);
        self.buf[end - size..end].fill(0);
        Ok(())
    }
}

fn is_compliant(name: &[u8]) -> bool {
    match name.iter().rposition(|b| *b == b'.') {
        Some(dot) => dot > 0 && dot + 1 < name.len() && !name.contains(&0),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_looks_empty() {
        let mut buf = [0xAAu8; 64];
        let store = Storage::format(&mut buf).unwrap();
        assert!(store.looks_empty());
        assert_eq!(store.records().count(), 0);
        assert_eq!(store.available(), 64 - 6);
    }

    #[test]
    fn create_find_and_destroy() {
        let mut buf = [0u8; 128];
        let mut store = Storage::format(&mut buf).unwrap();
        store.create_record(b"a.py", b"\x01print(1)").unwrap();
        store.create_record(b"b.txt", b"hello").unwrap();
        assert!(!store.looks_empty());
        assert_eq!(store.create_record(b"a.py", b""), Err(StorageError::NameTaken));
        assert_eq!(store.create_record(b"noext", b""), Err(StorageError::NonCompliantName));

        assert_eq!(store.record_named(b"b.txt").unwrap().value(), b"hello");
        assert_eq!(store.records_with_extension(b".py").count(), 1);

        store.destroy(b"a.py").unwrap();
        assert_eq!(store.records().count(), 1);
        assert_eq!(store.record_named(b"b.txt").unwrap().value(), b"hello");
        assert_eq!(store.destroy(b"a.py"), Err(StorageError::NotFound));
    }

    #[test]
    fn set_value_respects_capacity() {
        let mut buf = [0u8; 32];
        let mut store = Storage::format(&mut buf).unwrap();
        store.create_record(b"x.v", b"1234").unwrap();
        store.set_value(b"x.v", b"123456789").unwrap();
        assert_eq!(store.record_named(b"x.v").unwrap().value(), b"123456789");
        assert_eq!(
            store.set_value(b"x.v", &[0u8; 32]),
            Err(StorageError::NotEnoughSpace)
        );
        assert_eq!(store.record_named(b"x.v").unwrap().value(), b"123456789");
    }

    #[test]
    fn open_requires_magic() {
        let mut buf = [0u8; 16];
        assert!(matches!(Storage::open(&mut buf), Err(StorageError::BadMagic)));
        buf[..4].copy_from_slice(&STORAGE_MAGIC);
        assert!(Storage::open(&mut buf).is_ok());
    }
}
