//! Version tokens and renumbering schemes.
//!
//! A migration file name starts with a sortable version token, followed by an
//! optional `_description` and the extension. Renumbering replaces the token
//! and keeps the rest of the name.

use std::cmp::Ordering;
use std::fmt;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::errors::ChainError;

/// `chrono` format of fixed-width timestamp versions.
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_WIDTH: usize = 14;

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Sort key of a migration entry.
///
/// All-digit versions compare numerically (so `2025030900000` sorts before
/// `20250309093454`) and sort before every other version; the rest compare
/// lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Extract the version token from a migration file name.
    pub fn from_file_name(name: &str) -> Self {
        Self(split_file_name(name).0.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` if the token is non-empty and made of ASCII digits only.
    pub fn is_numeric(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_numeric(), other.is_numeric()) {
            (true, true) => {
                let a = self.0.trim_start_matches('0');
                let b = other.0.trim_start_matches('0');
                a.len()
                    .cmp(&b.len())
                    .then_with(|| a.cmp(b))
                    .then_with(|| self.0.cmp(&other.0))
            }
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a migration file name into its version token and the remainder.
///
/// `20250309093454_init.sql` -> (`20250309093454`, `_init.sql`);
/// `20250309093454.sql` -> (`20250309093454`, `.sql`).
pub fn split_file_name(name: &str) -> (&str, &str) {
    let stem_end = name.rfind('.').unwrap_or(name.len());
    let version_end = name[..stem_end].find('_').unwrap_or(stem_end);
    name.split_at(version_end)
}

/// Build the file name a migration gets once its version is replaced.
pub fn rename_with_version(name: &str, version: &Version) -> String {
    let (_, rest) = split_file_name(name);
    format!("{}{}", version, rest)
}

// ---------------------------------------------------------------------------
// Schemes
// ---------------------------------------------------------------------------

/// How a renumbered entry's version is derived from its predecessor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VersionScheme {
    /// 14-digit `YYYYMMDDHHMMSS` timestamps, bumped by one second. Tokens
    /// that are not valid timestamps fall back to numeric bumping.
    #[default]
    Timestamp,
    /// Plain integers, bumped by one and kept at their original width.
    Numeric,
}

impl fmt::Display for VersionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp => write!(f, "timestamp"),
            Self::Numeric => write!(f, "numeric"),
        }
    }
}

impl VersionScheme {
    /// The smallest version this scheme produces that sorts after `version`.
    pub fn next_after(&self, version: &Version) -> Result<Version, ChainError> {
        if *self == Self::Timestamp {
            if let Some(next) = bump_timestamp(version) {
                return Ok(next);
            }
        }
        bump_numeric(version)
    }

    /// Produce `count` strictly increasing versions, all above `floor`.
    pub fn sequence_after(&self, floor: &Version, count: usize) -> Result<Vec<Version>, ChainError> {
        let mut out = Vec::with_capacity(count);
        let mut prev = floor.clone();
        for _ in 0..count {
            let next = self.next_after(&prev)?;
            out.push(next.clone());
            prev = next;
        }
        Ok(out)
    }
}

fn bump_timestamp(version: &Version) -> Option<Version> {
    if version.as_str().len() != TIMESTAMP_WIDTH || !version.is_numeric() {
        return None;
    }
    let ts = NaiveDateTime::parse_from_str(version.as_str(), TIMESTAMP_FORMAT).ok()?;
    let next = ts.checked_add_signed(Duration::seconds(1))?;
    let formatted = next.format(TIMESTAMP_FORMAT).to_string();
    (formatted.len() == TIMESTAMP_WIDTH).then(|| Version(formatted))
}

/// Decimal increment on the digit string, keeping its width.
fn bump_numeric(version: &Version) -> Result<Version, ChainError> {
    if !version.is_numeric() {
        return Err(ChainError::InvalidVersion(version.0.clone()));
    }
    let mut digits = version.0.clone().into_bytes();
    for d in digits.iter_mut().rev() {
        if *d == b'9' {
            *d = b'0';
        } else {
            *d += 1;
            return Ok(Version(String::from_utf8_lossy(&digits).into_owned()));
        }
    }
    Err(ChainError::VersionOverflow {
        version: version.0.clone(),
        width: version.0.len(),
    })
}
