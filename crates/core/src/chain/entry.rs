//! Chain data model: migration entries and the integrity chain over them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::version::Version;
use crate::errors::ChainError;

/// One migration file as recorded in the integrity chain.
///
/// Identity is the file name; ordering is by [`Version`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationEntry {
    pub version: Version,
    pub filename: String,
    pub content_hash: String,
}

impl MigrationEntry {
    pub fn new(filename: impl Into<String>, content_hash: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            version: Version::from_file_name(&filename),
            filename,
            content_hash: content_hash.into(),
        }
    }
}

/// Ordered list of entries authenticated by a cumulative chain hash.
///
/// Always rebuilt wholesale by a [`ChainFormat`](super::ChainFormat); never
/// patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityChain {
    entries: Vec<MigrationEntry>,
    chain_hash: String,
}

impl IntegrityChain {
    pub fn new(entries: Vec<MigrationEntry>, chain_hash: impl Into<String>) -> Self {
        Self {
            entries,
            chain_hash: chain_hash.into(),
        }
    }

    pub fn entries(&self) -> &[MigrationEntry] {
        &self.entries
    }

    pub fn chain_hash(&self) -> &str {
        &self.chain_hash
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn filenames(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.filename.clone()).collect()
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.entries.iter().any(|e| e.filename == filename)
    }

    /// Check the ordering invariant: versions strictly increasing, file
    /// names unique.
    pub fn validate(&self) -> Result<(), ChainError> {
        // Same file name implies same version, so strict ordering also rules
        // out duplicate names.
        for pair in self.entries.windows(2) {
            if pair[0].version >= pair[1].version {
                return Err(ChainError::DuplicateVersion {
                    version: pair[1].version.to_string(),
                    first: pair[0].filename.clone(),
                    second: pair[1].filename.clone(),
                });
            }
        }
        Ok(())
    }

    /// Compare against the chain recomputed from disk and describe the first
    /// difference, if any.
    pub fn first_mismatch(&self, actual: &IntegrityChain) -> Option<ChainMismatch> {
        for (index, (want, got)) in self.entries.iter().zip(&actual.entries).enumerate() {
            if want.filename != got.filename {
                return Some(ChainMismatch::Entry {
                    index,
                    recorded: want.filename.clone(),
                    actual: got.filename.clone(),
                });
            }
            if want.content_hash != got.content_hash {
                return Some(ChainMismatch::Hash {
                    filename: want.filename.clone(),
                });
            }
        }
        if self.entries.len() != actual.entries.len() {
            return Some(ChainMismatch::Length {
                recorded: self.entries.len(),
                actual: actual.entries.len(),
            });
        }
        if self.chain_hash != actual.chain_hash {
            return Some(ChainMismatch::ChainHash);
        }
        None
    }
}

/// First point where a recorded chain disagrees with the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainMismatch {
    Entry {
        index: usize,
        recorded: String,
        actual: String,
    },
    Hash {
        filename: String,
    },
    Length {
        recorded: usize,
        actual: usize,
    },
    ChainHash,
}

impl fmt::Display for ChainMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry {
                index,
                recorded,
                actual,
            } => write!(
                f,
                "entry {} is '{}' in the chain file but '{}' on disk",
                index + 1,
                recorded,
                actual
            ),
            Self::Hash { filename } => write!(f, "hash of '{}' does not match its content", filename),
            Self::Length { recorded, actual } => write!(
                f,
                "chain file lists {} entries, directory has {}",
                recorded, actual
            ),
            Self::ChainHash => write!(f, "chain hash does not match its entries"),
        }
    }
}
