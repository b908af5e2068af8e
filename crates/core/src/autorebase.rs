//! End-to-end auto-rebase of a migration directory onto a base branch.
//!
//! Fetch, merge the base branch, and when the only conflict is the chain
//! file, renumber the current branch's new migrations above the base's and
//! commit the result. A working copy with uncommitted changes is refused
//! before merging. Every failure after the merge has been written to the
//! working copy rolls back the directory swap and aborts the merge, so
//! nothing is left half-done.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::chain::{ChainFormat, SumFormat};
use crate::config::AppConfig;
use crate::conflict::{ConflictExtractor, DivergenceSet};
use crate::errors::RebaseError;
use crate::git::{MergeOutcome, VcsDriver};
use crate::migrate_cli::MigrateCli;
use crate::migration_dir::MigrationDir;
use crate::rebaser::{RebaseOutcome, RebasePlan, Rebaser, Rename};

/// Used when no base branch is configured and the remote advertises none.
const FALLBACK_BASE_BRANCH: &str = "main";

// ---------------------------------------------------------------------------
// Options & status
// ---------------------------------------------------------------------------

/// Inputs of one auto-rebase run.
#[derive(Debug, Clone)]
pub struct RebaseOptions {
    pub remote: String,
    /// Branch to rebase onto. `None` uses the remote's default branch.
    pub base_branch: Option<String>,
    /// Branch to check out first (CI jobs start on a detached HEAD).
    pub branch: Option<String>,
    /// Migration directory, relative to the working copy root.
    pub dir: PathBuf,
    pub sum_file: String,
    pub commit_message: String,
    pub push: bool,
    /// Let the migration tool re-hash the directory before committing.
    pub rehash: bool,
}

impl RebaseOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let dir = config.migrations.dir_path();
        Self {
            remote: config.repo.remote.clone(),
            base_branch: config.repo.base_branch.clone(),
            branch: None,
            commit_message: config.commit.render_message(&dir),
            dir,
            sum_file: config.migrations.sum_file.clone(),
            push: config.repo.push,
            rehash: config.migrate_cli.rehash,
        }
    }

    fn pathspec(&self) -> String {
        self.dir.to_string_lossy().replace('\\', "/")
    }
}

/// Successful result of a run. `Display` gives the status line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AutoRebaseStatus {
    Rebased {
        commit: String,
        renames: Vec<Rename>,
        pushed: bool,
    },
    NoConflict {
        base: String,
        current: String,
    },
    NothingToRebase,
}

impl fmt::Display for AutoRebaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rebased { .. } => write!(f, "Migrations rebased successfully"),
            Self::NoConflict { base, current } => {
                write!(f, "No conflict found when merging {} into {}", base, current)
            }
            Self::NothingToRebase => write!(f, "No new migration files to rebase"),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// One auto-rebase run against a working copy.
pub struct AutoRebase<'a, D: VcsDriver + ?Sized, F: ChainFormat = SumFormat> {
    driver: &'a D,
    rebaser: Rebaser<F>,
    options: RebaseOptions,
    migrate_cli: Option<MigrateCli>,
}

impl<'a, D: VcsDriver + ?Sized, F: ChainFormat> AutoRebase<'a, D, F> {
    pub fn new(driver: &'a D, rebaser: Rebaser<F>, options: RebaseOptions) -> Self {
        Self {
            driver,
            rebaser,
            options,
            migrate_cli: None,
        }
    }

    /// Migration tool used when [`RebaseOptions::rehash`] is set.
    pub fn with_migrate_cli(mut self, cli: MigrateCli) -> Self {
        self.migrate_cli = Some(cli);
        self
    }

    pub async fn run(&self) -> Result<AutoRebaseStatus, RebaseError> {
        let remote = self.options.remote.as_str();
        let base = match &self.options.base_branch {
            Some(branch) => branch.clone(),
            None => self
                .driver
                .default_branch(remote)?
                .unwrap_or_else(|| FALLBACK_BASE_BRANCH.to_string()),
        };

        self.driver.fetch(remote, &base)?;
        if let Some(branch) = &self.options.branch {
            self.driver.checkout(branch)?;
        }
        let current = self.driver.current_branch()?;
        info!(remote, base = %base, current = %current, "auto-rebase");

        let new_files = self.new_files(&format!("{}/{}", remote, base))?;
        if new_files.is_empty() {
            info!("current branch adds no migration files");
            return Ok(AutoRebaseStatus::NothingToRebase);
        }
        info!(files = ?new_files, "new migration files on current branch");

        self.driver.ensure_clean()?;
        let conflicted = match self.driver.merge_base(remote, &base)? {
            MergeOutcome::Clean => {
                return Ok(AutoRebaseStatus::NoConflict { base, current });
            }
            MergeOutcome::Conflicted(paths) => paths,
        };

        let plan = match self.plan_merged(&conflicted) {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                self.driver.abort_merge()?;
                return Ok(AutoRebaseStatus::NoConflict { base, current });
            }
            Err(e) => {
                self.abort_quietly();
                return Err(e);
            }
        };

        let commit = match self.apply(&plan).await {
            Ok(commit) => commit,
            Err(e) => {
                self.abort_quietly();
                return Err(e);
            }
        };

        if self.options.push {
            self.driver.push(remote, &current)?;
        }
        info!(commit = %commit, renames = plan.renames.len(), "migrations rebased");
        Ok(AutoRebaseStatus::Rebased {
            commit,
            renames: plan.renames,
            pushed: self.options.push,
        })
    }

    /// Chain entries on HEAD that `base_rev` does not have.
    fn new_files(&self, base_rev: &str) -> Result<Vec<String>, RebaseError> {
        let chain_file = self.rebaser.chain_file();
        let format = self.rebaser.format();
        let base = format.parse_entries(&self.driver.read_file(base_rev, chain_file)?)?;
        let head = format.parse_entries(&self.driver.read_file("HEAD", chain_file)?)?;
        Ok(DivergenceSet::diff(&base.filenames(), &head.filenames()).incoming_only)
    }

    /// `None` when both sides of the chain file list the same entries.
    fn plan_merged(&self, conflicted: &[String]) -> Result<Option<RebasePlan>, RebaseError> {
        self.rebaser.check_conflicts(conflicted)?;
        let text = self.driver.conflict_text(self.rebaser.chain_file())?;
        let regions = ConflictExtractor::new(self.driver.marker_order()).extract(&text);

        let files = self.migration_dir()?.list_files()?;
        match self.rebaser.reconcile(conflicted, &regions, &files)? {
            RebaseOutcome::NoConflict => Ok(None),
            RebaseOutcome::Rebased(plan) => Ok(Some(plan)),
        }
    }

    /// Stage, swap, optionally re-hash, then commit. Returns the commit id.
    /// A failure after the swap puts the previous directory back.
    async fn apply(&self, plan: &RebasePlan) -> Result<String, RebaseError> {
        let swapped = self.migration_dir()?.stage(plan)?.commit()?;
        match self.rehash_and_commit().await {
            Ok(commit) => Ok(commit),
            Err(e) => {
                if let Err(rollback) = swapped.rollback() {
                    warn!(error = %rollback, "failed to roll back migration directory");
                }
                Err(e)
            }
        }
    }

    async fn rehash_and_commit(&self) -> Result<String, RebaseError> {
        if self.options.rehash {
            match &self.migrate_cli {
                Some(cli) => cli.migrate_hash(&self.options.dir).await?,
                None => warn!("rehash requested but no migration tool is configured"),
            }
        }

        let commit = self
            .driver
            .commit(&[self.options.pathspec()], &self.options.commit_message)?;
        Ok(commit)
    }

    fn migration_dir(&self) -> Result<MigrationDir, RebaseError> {
        let root = self.driver.workdir()?.join(&self.options.dir);
        Ok(MigrationDir::new(
            root,
            self.options.sum_file.clone(),
            self.rebaser.matcher().clone(),
        ))
    }

    fn abort_quietly(&self) {
        if let Err(e) = self.driver.abort_merge() {
            warn!(error = %e, "failed to abort merge");
        }
    }
}
