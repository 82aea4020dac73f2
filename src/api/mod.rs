//! Capability table handed to foreign code.
//!
//! The table is an array of untyped C function pointers indexed by
//! [`ApiSlot`] ordinal and terminated by a null entry. Binaries built against
//! an older table keep working only as long as existing ordinals never move,
//! so slots are only ever appended: [`TableBuilder`] refuses any other order
//! at compile time.

pub mod host;
pub mod keymap;
pub mod native;

pub use host::{Devices, FileSystem, Host, HostApi};

/// Passed as the first argument to every entry point. Bumped when the table
/// grows.
pub const API_VERSION: u32 = 2;

/// One table entry: a type-erased `extern "C"` function, `None` past the end.
pub type RawSlot = Option<unsafe extern "C" fn()>;

/// Value returned by `get_key` when an arrow key is pressed with Shift held.
pub const SHIFTED_ARROW_BASE: i32 = 31200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ApiSlot {
    Millis = 0,
    Msleep,
    ScanKeyboard,
    PushRect,
    PushRectUniform,
    PullRect,
    DrawTextLarge,
    DrawTextSmall,
    WaitForVblank,
    ClipboardStore,
    ClipboardText,
    FileListWithExtension,
    FileExists,
    FileErase,
    FileRead,
    FileWrite,
    LockAlpha,
    ResetKeyboard,
    GetKey,
    RestoreBackup,
    EraseSector,
    WriteMemory,
    InExamMode,
}

impl ApiSlot {
    pub const COUNT: usize = 23;

    pub const ALL: [ApiSlot; ApiSlot::COUNT] = [
        ApiSlot::Millis,
        ApiSlot::Msleep,
        ApiSlot::ScanKeyboard,
        ApiSlot::PushRect,
        ApiSlot::PushRectUniform,
        ApiSlot::PullRect,
        ApiSlot::DrawTextLarge,
        ApiSlot::DrawTextSmall,
        ApiSlot::WaitForVblank,
        ApiSlot::ClipboardStore,
        ApiSlot::ClipboardText,
        ApiSlot::FileListWithExtension,
        ApiSlot::FileExists,
        ApiSlot::FileErase,
        ApiSlot::FileRead,
        ApiSlot::FileWrite,
        ApiSlot::LockAlpha,
        ApiSlot::ResetKeyboard,
        ApiSlot::GetKey,
        ApiSlot::RestoreBackup,
        ApiSlot::EraseSector,
        ApiSlot::WriteMemory,
        ApiSlot::InExamMode,
    ];

    #[inline]
    pub const fn ordinal(self) -> usize {
        self as usize
    }

    pub fn from_ordinal(ordinal: usize) -> Option<ApiSlot> {
        Self::ALL.get(ordinal).copied()
    }

    /// Touches flash and must re-check write permission on every call.
    pub const fn writes_flash(self) -> bool {
        matches!(self, ApiSlot::EraseSector | ApiSlot::WriteMemory)
    }
}

/// Slots plus the null terminator.
pub const TABLE_LEN: usize = ApiSlot::COUNT + 1;

/// Immutable, null-terminated slot array. `#[repr(transparent)]` so a
/// pointer to it is a pointer to the first slot.
#[repr(transparent)]
pub struct CapabilityTable {
    slots: [RawSlot; TABLE_LEN],
}

impl CapabilityTable {
    #[inline]
    pub fn get(&self, slot: ApiSlot) -> RawSlot {
        self.slots[slot.ordinal()]
    }

    pub fn slots(&self) -> &[RawSlot; TABLE_LEN] {
        &self.slots
    }

    /// Address passed to foreign code.
    pub fn as_ptr(&self) -> *const RawSlot {
        self.slots.as_ptr()
    }
}

/// Const builder; slots go in strictly by ordinal.
///
/// ```ignore
/// static TABLE: CapabilityTable = TableBuilder::new()
///     .append(ApiSlot::Millis, millis_fn)
///     // ...every other slot, in order...
///     .build();
/// ```
pub struct TableBuilder {
    slots: [RawSlot; TABLE_LEN],
    len: usize,
}

impl TableBuilder {
    pub const fn new() -> Self {
        Self {
            slots: [None; TABLE_LEN],
            len: 0,
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Panics unless `slot` is the next ordinal.
    pub const fn append(mut self, slot: ApiSlot, f: unsafe extern "C" fn()) -> Self {
        assert!(
            slot as usize == self.len,
            "capability slots must be appended in ordinal order"
        );
        self.slots[self.len] = Some(f);
        self.len += 1;
        self
    }

    /// Panics unless every slot was appended.
    pub const fn build(self) -> CapabilityTable {
        assert!(self.len == ApiSlot::COUNT, "capability table is incomplete");
        CapabilityTable { slots: self.slots }
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn nop() {}

    #[test]
    fn ordinals_are_dense_and_stable() {
        for (i, slot) in ApiSlot::ALL.iter().enumerate() {
            assert_eq!(slot.ordinal(), i);
            assert_eq!(ApiSlot::from_ordinal(i), Some(*slot));
        }
        assert_eq!(ApiSlot::Millis.ordinal(), 0);
        assert_eq!(ApiSlot::GetKey.ordinal(), 18);
        assert_eq!(ApiSlot::InExamMode.ordinal(), 22);
        assert_eq!(ApiSlot::from_ordinal(ApiSlot::COUNT), None);
    }

    #[test]
    fn builder_fills_in_order_and_terminates() {
        let mut builder = TableBuilder::new();
        for slot in ApiSlot::ALL {
            builder = builder.append(slot, nop);
        }
        let table = builder.build();
        assert!(table.slots()[..ApiSlot::COUNT].iter().all(Option::is_some));
        assert!(table.slots()[ApiSlot::COUNT].is_none());
    }

    #[test]
    #[should_panic(expected = "ordinal order")]
    fn out_of_order_append_panics() {
        let _ = TableBuilder::new().append(ApiSlot::Msleep, nop);
    }

    #[test]
    #[should_panic(expected = "incomplete")]
    fn incomplete_table_panics() {
        let _ = TableBuilder::new().append(ApiSlot::Millis, nop).build();
    }

    #[test]
    fn only_flash_slots_write_flash() {
        let writers: Vec<_> = ApiSlot::ALL.iter().filter(|s| s.writes_flash()).collect();
        assert_eq!(writers, [&ApiSlot::EraseSector, &ApiSlot::WriteMemory]);
    }
}
