//! On-disk format of the integrity chain file.
//!
//! ```text
//! h1:<chain hash>
//! 20250309093454_init.sql h1:<entry hash>
//! 20250309093833_second.sql h1:<entry hash>
//! ```
//!
//! Entry hashes come from one running SHA-256 state fed with each file's
//! name and then its content, in version order; entry *i* is the digest of
//! that state after file *i*. The chain hash is SHA-256 over every entry's
//! name followed by its encoded hash. All digests are standard base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::entry::{ChainMismatch, IntegrityChain, MigrationEntry};
use crate::errors::ChainError;

/// Prefix tagging hashes produced by this format.
pub const HASH_PREFIX: &str = "h1:";

/// Parse, render and compute integrity chains.
pub trait ChainFormat {
    /// Parse a complete chain file.
    fn parse_entries(&self, text: &str) -> Result<IntegrityChain, ChainError>;

    /// Render a chain back to file contents.
    fn render(&self, chain: &IntegrityChain) -> String;

    /// Compute the chain for `(file name, content)` pairs, already in
    /// version order. Always computed from scratch.
    fn hash(&self, files: &[(&str, &[u8])]) -> IntegrityChain;
}

/// The `h1:` sum-file format.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumFormat;

impl ChainFormat for SumFormat {
    fn parse_entries(&self, text: &str) -> Result<IntegrityChain, ChainError> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let chain_hash = match lines.next() {
            Some((_, header)) => header
                .trim()
                .strip_prefix(HASH_PREFIX)
                .ok_or(ChainError::MissingHeader)?
                .to_string(),
            None => return Err(ChainError::MissingHeader),
        };

        let mut entries = Vec::new();
        for (idx, line) in lines {
            let mut parts = line.split_whitespace();
            let entry = match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(hash), None) => hash
                    .strip_prefix(HASH_PREFIX)
                    .map(|h| MigrationEntry::new(name, h)),
                _ => None,
            };
            match entry {
                Some(entry) => entries.push(entry),
                None => {
                    return Err(ChainError::MalformedLine {
                        line: idx + 1,
                        content: line.to_string(),
                    })
                }
            }
        }

        debug!(entries = entries.len(), "parsed chain file");
        Ok(IntegrityChain::new(entries, chain_hash))
    }

    fn render(&self, chain: &IntegrityChain) -> String {
        let mut out = format!("{}{}\n", HASH_PREFIX, chain.chain_hash());
        for entry in chain.entries() {
            out.push_str(&format!(
                "{} {}{}\n",
                entry.filename, HASH_PREFIX, entry.content_hash
            ));
        }
        out
    }

    fn hash(&self, files: &[(&str, &[u8])]) -> IntegrityChain {
        let mut running = Sha256::new();
        let mut entries = Vec::with_capacity(files.len());
        for (name, content) in files {
            running.update(name.as_bytes());
            running.update(content);
            let digest = running.clone().finalize();
            entries.push(MigrationEntry::new(*name, STANDARD.encode(digest)));
        }

        let mut sum = Sha256::new();
        for entry in &entries {
            sum.update(entry.filename.as_bytes());
            sum.update(entry.content_hash.as_bytes());
        }
        let chain_hash = STANDARD.encode(sum.finalize());

        IntegrityChain::new(entries, chain_hash)
    }
}

impl SumFormat {
    /// Recompute the chain from `files` and report the first difference
    /// from `recorded`.
    pub fn verify(&self, recorded: &IntegrityChain, files: &[(&str, &[u8])]) -> Option<ChainMismatch> {
        recorded.first_mismatch(&self.hash(files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> Vec<(&'static str, &'static [u8])> {
        vec![
            ("20250309093454_init.sql", b"CREATE TABLE t1 (id int);\n" as &[u8]),
            ("20250309093833_second.sql", b"CREATE TABLE t2 (id int);\n" as &[u8]),
        ]
    }

    #[test]
    fn test_first_entry_hash_binds_name_and_content() {
        let chain = SumFormat.hash(&files());
        let mut expected = Sha256::new();
        expected.update(b"20250309093454_init.sql");
        expected.update(b"CREATE TABLE t1 (id int);\n");
        assert_eq!(
            chain.entries()[0].content_hash,
            STANDARD.encode(expected.finalize())
        );
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(SumFormat.hash(&files()), SumFormat.hash(&files()));
    }

    #[test]
    fn test_rename_changes_every_later_hash() {
        let original = SumFormat.hash(&files());
        let mut renamed = files();
        renamed[0].0 = "20250309093455_init.sql";
        let rehashed = SumFormat.hash(&renamed);
        assert_ne!(original.entries()[0].content_hash, rehashed.entries()[0].content_hash);
        assert_ne!(original.entries()[1].content_hash, rehashed.entries()[1].content_hash);
        assert_ne!(original.chain_hash(), rehashed.chain_hash());
    }

    #[test]
    fn test_render_then_parse() {
        let chain = SumFormat.hash(&files());
        let text = SumFormat.render(&chain);
        assert!(text.starts_with("h1:"));
        assert!(text.ends_with('\n'));
        assert_eq!(SumFormat.parse_entries(&text).unwrap(), chain);
    }

    #[test]
    fn test_parse_missing_header() {
        let err = SumFormat
            .parse_entries("20250309093454.sql h1:abc=\n")
            .unwrap_err();
        assert!(matches!(err, ChainError::MissingHeader));
        assert!(matches!(
            SumFormat.parse_entries("").unwrap_err(),
            ChainError::MissingHeader
        ));
    }

    #[test]
    fn test_parse_malformed_line() {
        let err = SumFormat
            .parse_entries("h1:abc=\n20250309093454.sql\n")
            .unwrap_err();
        assert!(matches!(err, ChainError::MalformedLine { line: 2, .. }));
    }

    #[test]
    fn test_verify_reports_edited_file() {
        let recorded = SumFormat.hash(&files());
        assert_eq!(SumFormat.verify(&recorded, &files()), None);

        let mut edited = files();
        edited[1].1 = b"CREATE TABLE t2 (id bigint);\n";
        assert_eq!(
            SumFormat.verify(&recorded, &edited),
            Some(ChainMismatch::Hash {
                filename: "20250309093833_second.sql".into()
            })
        );
    }

    #[test]
    fn test_empty_chain() {
        let chain = SumFormat.hash(&[]);
        assert!(chain.is_empty());
        let text = SumFormat.render(&chain);
        assert_eq!(text.lines().count(), 1);
    }
}
