//! The version-control seam of the auto-rebase workflow.

use std::path::PathBuf;

use crate::conflict::MarkerOrder;
use crate::errors::GitError;

/// Result of merging the base branch into the current branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merge has no conflicts. The working copy is left untouched.
    Clean,
    /// The merge was written into the working copy and these paths are
    /// conflicted (repository-relative, `/`-separated).
    Conflicted(Vec<String>),
}

/// Operations the auto-rebase workflow needs from a version-control system.
///
/// Paths are repository-relative with `/` separators. `rev` arguments accept
/// anything the VCS can resolve (`HEAD`, `origin/main`, a commit id).
pub trait VcsDriver {
    /// Root of the working copy.
    fn workdir(&self) -> Result<PathBuf, GitError>;

    /// Name of the checked-out branch. Fails on a detached HEAD.
    fn current_branch(&self) -> Result<String, GitError>;

    /// Default branch advertised by `remote`, if known locally.
    fn default_branch(&self, remote: &str) -> Result<Option<String>, GitError>;

    fn checkout(&self, branch: &str) -> Result<(), GitError>;

    /// Update `remote/branch` from the remote.
    fn fetch(&self, remote: &str, branch: &str) -> Result<(), GitError>;

    /// Contents of `path` at `rev`.
    fn read_file(&self, rev: &str, path: &str) -> Result<String, GitError>;

    /// Fail with [`GitError::DirtyWorkingCopy`] when tracked files have
    /// uncommitted changes. Untracked files are ignored.
    fn ensure_clean(&self) -> Result<(), GitError>;

    /// Merge `remote/branch` into the current branch without committing.
    fn merge_base(&self, remote: &str, branch: &str) -> Result<MergeOutcome, GitError>;

    /// Paths with unresolved conflicts in the working copy.
    fn conflicts(&self) -> Result<Vec<String>, GitError>;

    /// Working-copy text of a conflicted file, markers included.
    fn conflict_text(&self, path: &str) -> Result<String, GitError>;

    /// Which side conflict blocks written by [`merge_base`](Self::merge_base)
    /// list first.
    fn marker_order(&self) -> MarkerOrder;

    /// Drop an in-progress merge and restore the working copy to HEAD.
    fn abort_merge(&self) -> Result<(), GitError>;

    /// Stage `paths` (additions, modifications and deletions) and commit.
    /// Concludes an in-progress merge. Returns the new commit id.
    fn commit(&self, paths: &[String], message: &str) -> Result<String, GitError>;

    fn push(&self, remote: &str, branch: &str) -> Result<(), GitError>;
}
