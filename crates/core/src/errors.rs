//! Error types for the sumrebase core library.
//!
//! Each subsystem has its own error type derived with `thiserror`.
//! [`RebaseError`] wraps the chain, git and migration-tool errors for the
//! auto-rebase workflow.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Chain errors
// ---------------------------------------------------------------------------

/// Errors from parsing, hashing and renumbering integrity chains.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The chain file does not start with an `h1:` header line.
    #[error("chain file is missing its h1 header line")]
    MissingHeader,

    /// A line of the chain file is neither blank nor a `name h1:hash` entry.
    #[error("malformed chain entry at line {line}: {content}")]
    MalformedLine { line: usize, content: String },

    /// One side of a conflicted chain file lists no migration entries.
    #[error("no chain entries found on the {side} side")]
    NoEntries { side: String },

    /// A version token cannot be renumbered under the configured scheme.
    #[error("version '{0}' is not numeric and cannot be renumbered")]
    InvalidVersion(String),

    /// Renumbering would exceed the fixed width of the version format.
    #[error("version '{version}' cannot be bumped without exceeding {width} digits")]
    VersionOverflow { version: String, width: usize },

    /// Two entries of a chain share the same version.
    #[error("duplicate version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        version: String,
        first: String,
        second: String,
    },

    /// A custom entry regex failed to compile.
    #[error("invalid entry pattern '{pattern}': {detail}")]
    InvalidPattern { pattern: String, detail: String },
}

// ---------------------------------------------------------------------------
// Rebase errors
// ---------------------------------------------------------------------------

/// Errors from the reconciliation engine and the auto-rebase workflow.
#[derive(Debug, Error)]
pub enum RebaseError {
    /// A path other than the chain file is conflicted; nothing is touched.
    #[error("conflict found in files other than {chain_file}")]
    UnsafeConflict {
        chain_file: String,
        paths: Vec<String>,
    },

    /// The merge reported conflicts but none could be listed.
    #[error("conflict found but no conflicting files found")]
    NoConflictedFiles,

    /// The chain file is conflicted but carries no parseable conflict block.
    #[error("no conflict regions found in {path}")]
    NoConflictRegions { path: String },

    /// A divergent entry is referenced by the chain but absent on disk.
    #[error("migration file '{name}' is listed in the chain but missing from the directory")]
    MissingMigration { name: String },

    /// Chain parsing / renumbering failure.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// VCS driver failure.
    #[error(transparent)]
    Git(#[from] GitError),

    /// External migration CLI failure.
    #[error(transparent)]
    MigrateCli(#[from] MigrateCliError),

    /// I/O failure while staging or swapping the migration directory.
    #[error("rebase I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl RebaseError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// HEAD does not point at a branch.
    #[error("HEAD is detached; check out the branch to reconcile first")]
    DetachedHead,

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// Tracked files have uncommitted changes that an abort would discard.
    #[error("working copy has uncommitted changes: {}", .0.join(", "))]
    DirtyWorkingCopy(Vec<String>),

    /// Index conflicts remain where a clean index was required.
    #[error("git merge conflict: {0}")]
    MergeConflict(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Migration CLI errors
// ---------------------------------------------------------------------------

/// Errors from invoking the external migration tool.
#[derive(Debug, Error)]
pub enum MigrateCliError {
    /// The binary was not found on `$PATH`.
    #[error("migration tool binary not found: {0}")]
    BinaryNotFound(String),

    /// The tool exited with a non-zero status.
    #[error("migration tool failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// Generic I/O wrapper.
    #[error("migration tool I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
