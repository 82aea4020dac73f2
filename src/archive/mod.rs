//! Read-only archive of named records in memory-mapped flash.
//!
//! Records are ustar headers followed by their payload, each padded to a
//! 512-byte boundary. The walk starts at the archive base on every query and
//! stops at the first header that is not sane, which is how erased flash
//! after the last record ends enumeration. Every read is bounded by the
//! mapped window; a record claiming more bytes than the window holds is
//! reported as corruption and ends the walk.

pub mod header;
pub mod writer;

use core::fmt;

use crate::config::MemoryMap;
use crate::hal::MappedRegion;
use crate::preferences::Preferences;

use header::{Header, HEADER_SIZE};

pub use writer::{ArchiveWriter, WriteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveError {
    NotFound,
    CorruptArchive,
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::NotFound => f.write_str("no such archive entry"),
            ArchiveError::CorruptArchive => f.write_str("corrupt archive record"),
        }
    }
}

impl ufmt::uDebug for ArchiveError {
    fn fmt<W: ufmt::uWrite + ?Sized>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error> {
        f.write_str(match self {
            ArchiveError::NotFound => "NotFound",
            ArchiveError::CorruptArchive => "CorruptArchive",
        })
    }
}

/// One record, aliasing the flash it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveEntry<'a> {
    name: &'a [u8],
    data: &'a [u8],
    address: u32,
    executable: bool,
    readable: bool,
}

impl<'a> ArchiveEntry<'a> {
    pub fn name(&self) -> &'a [u8] {
        self.name
    }

    /// Name as text, `None` if it is not valid UTF-8.
    pub fn name_str(&self) -> Option<&'a str> {
        core::str::from_utf8(self.name).ok()
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Physical address of the first payload byte.
    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Visible under the preferences the entry was read with: executables
    /// always, everything else only outside exam mode.
    pub fn is_readable(&self) -> bool {
        self.readable
    }
}

/// Walks the archive from its base. Yields `Err(CorruptArchive)` once and
/// then stops if a record does not fit the window.
pub struct Entries<'a> {
    region: MappedRegion<'a>,
    offset: usize,
    exam_mode: bool,
    done: bool,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<ArchiveEntry<'a>, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let bytes = self.region.as_bytes();
        let header = match bytes
            .get(self.offset..)
            .and_then(Header::new)
            .filter(Header::is_sane)
        {
            Some(header) => header,
            None => {
                self.done = true;
                return None;
            }
        };

        let data_start = self.offset + HEADER_SIZE;
        let payload = header
            .size()
            .and_then(|size| usize::try_from(size).ok())
            .and_then(|size| bytes.get(data_start..data_start.checked_add(size)?));
        let data = match payload {
            Some(data) => data,
            None => {
                log::warn!(
                    "archive: corrupt record at {:#010x}",
                    self.region.base() as usize + self.offset
                );
                self.done = true;
                return Some(Err(ArchiveError::CorruptArchive));
            }
        };

        let executable = header.is_executable();
        let entry = ArchiveEntry {
            name: header.name(),
            data,
            address: self.region.base() + data_start as u32,
            executable,
            readable: executable || !self.exam_mode,
        };
        self.offset += header::stride(data.len() as u64) as usize;
        Some(Ok(entry))
    }
}

/// The archive window. Cheap to copy; holds no state between queries.
#[derive(Debug, Clone, Copy)]
pub struct Archive<'a> {
    region: MappedRegion<'a>,
}

impl<'a> Archive<'a> {
    pub fn new(region: MappedRegion<'a>) -> Self {
        Self { region }
    }

    /// Carves the archive window out of a view of the whole flash.
    pub fn mount(flash: MappedRegion<'a>, map: &MemoryMap) -> Option<Self> {
        flash.sub_region(map.archive).map(Self::new)
    }

    pub fn region(&self) -> MappedRegion<'a> {
        self.region
    }

    pub fn entries(&self, prefs: Preferences) -> Entries<'a> {
        Entries {
            region: self.region,
            offset: 0,
            exam_mode: prefs.exam_mode,
            done: false,
        }
    }

    /// Fails closed: corruption anywhere up to `index` fails the lookup.
    pub fn try_entry_at(&self, prefs: Preferences, index: usize) -> Result<ArchiveEntry<'a>, ArchiveError> {
        for (i, item) in self.entries(prefs).enumerate() {
            let entry = item?;
            if i == index {
                return Ok(entry);
            }
        }
        Err(ArchiveError::NotFound)
    }

    pub fn entry_at(&self, prefs: Preferences, index: usize) -> Option<ArchiveEntry<'a>> {
        self.try_entry_at(prefs, index).ok()
    }

    /// Index of the first readable entry called `name`.
    pub fn index_from_name(&self, prefs: Preferences, name: impl AsRef<[u8]>) -> Option<usize> {
        let name = name.as_ref();
        self.entries(prefs)
            .map_while(Result::ok)
            .position(|e| e.is_readable() && e.name() == name)
    }

    pub fn entry_named(&self, prefs: Preferences, name: impl AsRef<[u8]>) -> Option<ArchiveEntry<'a>> {
        let name = name.as_ref();
        self.entries(prefs)
            .map_while(Result::ok)
            .find(|e| e.is_readable() && e.name() == name)
    }

    pub fn count(&self) -> usize {
        self.entries(Preferences::new())
            .map_while(Result::ok)
            .count()
    }

    pub fn executable_count(&self) -> usize {
        self.entries(Preferences::new())
            .map_while(Result::ok)
            .filter(ArchiveEntry::is_executable)
            .count()
    }

    pub fn entry_at_executable_index(&self, prefs: Preferences, index: usize) -> Option<ArchiveEntry<'a>> {
        self.entries(prefs)
            .map_while(Result::ok)
            .filter(ArchiveEntry::is_executable)
            .nth(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u32 = 0x9020_0000;

    fn image(records: &[(&str, bool, usize)]) -> Vec<u8> {
        let mut buf = vec![0u8; 16 * 1024];
        let mut writer = ArchiveWriter::new(&mut buf);
        for (name, exec, len) in records {
            let payload: Vec<u8> = (0..*len).map(|i| i as u8).collect();
            writer.append(name, *exec, &payload).unwrap();
        }
        buf
    }

    fn archive(buf: &[u8]) -> Archive<'_> {
        Archive::new(MappedRegion::new(BASE, buf).unwrap())
    }

    #[test]
    fn two_entry_scenario() {
        let buf = image(&[("A", true, 100), ("B", false, 50)]);
        let archive = archive(&buf);
        let prefs = Preferences::new();

        assert_eq!(archive.count(), 2);
        assert_eq!(archive.executable_count(), 1);
        assert_eq!(archive.entry_at_executable_index(prefs, 0).unwrap().name(), b"A");
        assert_eq!(archive.index_from_name(prefs, "B"), Some(1));
        assert_eq!(archive.index_from_name(prefs, "C"), None);

        let b = archive.entry_at(prefs, 1).unwrap();
        assert_eq!(b.len(), 50);
        assert_eq!(b.address(), BASE + 1024 + 512);
        assert_eq!(b.data()[49], 49);
    }

    #[test]
    fn empty_and_erased_archives() {
        let erased = vec![0xFFu8; 4096];
        assert_eq!(archive(&erased).count(), 0);
        let zeroed = vec![0u8; 4096];
        assert_eq!(archive(&zeroed).count(), 0);
        assert_eq!(
            archive(&erased).try_entry_at(Preferences::new(), 0),
            Err(ArchiveError::NotFound)
        );
    }

    #[test]
    fn exam_mode_hides_plain_files() {
        let buf = image(&[("A", true, 4), ("B", false, 4)]);
        let archive = archive(&buf);
        let exam = Preferences::new().with_exam_mode(true);

        let b = archive.entry_at(exam, 1).unwrap();
        assert!(!b.is_readable());
        assert!(archive.entry_at(exam, 0).unwrap().is_readable());
        assert_eq!(archive.index_from_name(exam, "B"), None);
        assert_eq!(archive.index_from_name(exam.with_exam_mode(false), "B"), Some(1));
    }

    #[test]
    fn oversized_record_is_corruption() {
        let mut buf = image(&[("A", false, 10), ("B", false, 10)]);
        // Claim 1 MiB for B, far past the 16 KiB window.
        buf[1024 + 124..1024 + 135].copy_from_slice(b"00004000000");
        let archive = archive(&buf);
        let prefs = Preferences::new();

        assert_eq!(archive.try_entry_at(prefs, 1), Err(ArchiveError::CorruptArchive));
        assert_eq!(archive.try_entry_at(prefs, 2), Err(ArchiveError::CorruptArchive));
        assert!(archive.entry_at(prefs, 0).is_some());
        assert_eq!(archive.count(), 1);
    }

    #[test]
    fn garbage_size_digits_are_corruption() {
        let mut buf = image(&[("A", false, 10)]);
        buf[124] = b'9';
        assert_eq!(
            archive(&buf).try_entry_at(Preferences::new(), 0),
            Err(ArchiveError::CorruptArchive)
        );
    }

    #[test]
    fn record_ending_at_window_edge_is_last() {
        let mut buf = vec![0u8; 1024];
        ArchiveWriter::new(&mut buf).append("edge", false, &[7; 512]).unwrap();
        let archive = archive(&buf);
        assert_eq!(archive.count(), 1);
        assert_eq!(archive.try_entry_at(Preferences::new(), 1), Err(ArchiveError::NotFound));
    }
}
