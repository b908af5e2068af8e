//! Git operations for sumrebase.

pub mod client;
pub mod driver;

pub use client::GitClient;
pub use driver::{MergeOutcome, VcsDriver};
