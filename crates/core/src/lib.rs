//! sumrebase core library.
//!
//! Reconciles two branches that each appended migrations to the same
//! hash-chained migration directory: conflict extraction, divergence,
//! renumbering and chain rebuild, plus the git driver and the auto-rebase
//! workflow that ties them together.

pub mod autorebase;
pub mod chain;
pub mod config;
pub mod conflict;
pub mod errors;
pub mod git;
pub mod migrate_cli;
pub mod migration_dir;
pub mod rebaser;

// Re-exports for convenience.
pub use autorebase::{AutoRebase, AutoRebaseStatus, RebaseOptions};
pub use chain::{ChainFormat, IntegrityChain, SumFormat};
pub use config::AppConfig;
pub use git::{GitClient, VcsDriver};
pub use migrate_cli::MigrateCli;
pub use migration_dir::MigrationDir;
pub use rebaser::{RebaseOutcome, RebasePlan, Rebaser};
