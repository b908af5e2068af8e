//! Integrity chain: data model, on-disk format, entry matching and version
//! renumbering.

pub mod entry;
pub mod format;
pub mod pattern;
pub mod version;

pub use entry::{ChainMismatch, IntegrityChain, MigrationEntry};
pub use format::{ChainFormat, SumFormat};
pub use pattern::{EntryMatcher, EntryPattern};
pub use version::{Version, VersionScheme};
