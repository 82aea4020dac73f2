//! External archive and sandboxed execution core for calculator firmware.
//!
//! The archive lives in memory-mapped external flash and is only ever
//! viewed, never copied. Foreign code found in it is started through a
//! versioned capability table and reaches the device exclusively through
//! that table. Flash mutation goes through [`flash_guard`], and the
//! power-key menu in [`bootloader`] selects firmware slots and manages
//! storage backups.
#![cfg_attr(not(test), no_std)]

pub mod api;
pub mod archive;
pub mod bootloader;
pub mod config;
pub mod drivers;
pub mod flash_guard;
pub mod hal;
pub mod loader;
pub mod logger;
pub mod preferences;

pub use api::{ApiSlot, CapabilityTable, Host, HostApi, API_VERSION};
pub use archive::{Archive, ArchiveEntry, ArchiveError};
pub use config::MemoryMap;
pub use flash_guard::{FlashGuard, GuardError};
pub use loader::{ExecError, Loader};
pub use preferences::Preferences;
