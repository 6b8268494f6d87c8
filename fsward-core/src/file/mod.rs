pub mod access;
pub mod backup;
pub mod hasher;
pub mod walk;

pub use access::{format_size, EntryInfo, EntryKind};
pub use backup::{BackupManager, BackupOutcome, BackupRecord};
pub use walk::{WalkEntry, WalkOptions, Walker};
