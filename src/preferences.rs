//! Runtime-toggleable device policy.

/// Snapshot of the settings that gate archive visibility and flash access.
///
/// Readers and guards take this by value on every call; nothing below the UI
/// layer keeps a copy, so a change is visible on the very next query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    /// Restricted exam state: hides non-executable archive entries.
    pub exam_mode: bool,
    /// Allows foreign code to erase and program flash.
    pub write_permission: bool,
    pub brightness: u8,
}

impl Preferences {
    pub const fn new() -> Self {
        Self {
            exam_mode: false,
            write_permission: false,
            brightness: crate::config::DEFAULT_BRIGHTNESS,
        }
    }

    pub fn with_exam_mode(mut self, on: bool) -> Self {
        self.exam_mode = on;
        self
    }

    pub fn with_write_permission(mut self, on: bool) -> Self {
        self.write_permission = on;
        self
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self::new()
    }
}
