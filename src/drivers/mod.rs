pub mod clipboard;
pub mod flash;
pub mod storage;

pub use clipboard::Clipboard;
pub use flash::SpiNorFlash;
pub use storage::{Record, Storage, StorageError};
