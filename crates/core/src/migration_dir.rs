//! The live migration directory and its scratch copy.
//!
//! A rebase never edits the live directory file by file. The whole directory
//! is copied into a scratch location next to it, the plan is applied there,
//! and only then is the scratch copy swapped in with two directory renames.
//! If anything fails before the swap, the live directory is untouched.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::chain::{ChainFormat, EntryMatcher, IntegrityChain, Version};
use crate::errors::RebaseError;
use crate::rebaser::RebasePlan;

const STAGE_PREFIX: &str = ".sumrebase-stage-";
const BACKUP_PREFIX: &str = ".sumrebase-backup-";
/// Name of the directory inside each scratch `TempDir`.
const INNER: &str = "dir";
/// Where a rolled-back directory is parked until the backup is dropped.
const REPLACED: &str = "replaced";

/// One migration file read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub name: String,
    pub version: Version,
    pub content: Vec<u8>,
}

impl MigrationFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        Self {
            version: Version::from_file_name(&name),
            name,
            content: content.into(),
        }
    }
}

/// A migration directory on disk together with its chain file name.
#[derive(Debug, Clone)]
pub struct MigrationDir {
    root: PathBuf,
    sum_file: String,
    matcher: EntryMatcher,
}

impl MigrationDir {
    pub fn new(root: impl Into<PathBuf>, sum_file: impl Into<String>, matcher: EntryMatcher) -> Self {
        Self {
            root: root.into(),
            sum_file: sum_file.into(),
            matcher,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chain_path(&self) -> PathBuf {
        self.root.join(&self.sum_file)
    }

    /// Every migration file in the directory, sorted by version. Files whose
    /// names do not match the entry convention are skipped.
    pub fn list_files(&self) -> Result<Vec<MigrationFile>, RebaseError> {
        let read = fs::read_dir(&self.root).map_err(|e| RebaseError::io(&self.root, e))?;
        let mut files = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| RebaseError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == self.sum_file || !self.matcher.is_entry_name(&name) {
                continue;
            }
            let content = fs::read(&path).map_err(|e| RebaseError::io(&path, e))?;
            files.push(MigrationFile::new(name, content));
        }
        files.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.name.cmp(&b.name)));
        debug!(dir = %self.root.display(), count = files.len(), "listed migration files");
        Ok(files)
    }

    /// Parse the chain file currently on disk.
    pub fn read_chain(&self, format: &dyn ChainFormat) -> Result<IntegrityChain, RebaseError> {
        let path = self.chain_path();
        let text = fs::read_to_string(&path).map_err(|e| RebaseError::io(&path, e))?;
        Ok(format.parse_entries(&text)?)
    }

    /// Compute the chain the directory's files should have.
    pub fn compute_chain(&self, format: &dyn ChainFormat) -> Result<IntegrityChain, RebaseError> {
        let files = self.list_files()?;
        let pairs: Vec<(&str, &[u8])> = files
            .iter()
            .map(|f| (f.name.as_str(), f.content.as_slice()))
            .collect();
        Ok(format.hash(&pairs))
    }

    /// Recompute and overwrite the chain file from the directory contents.
    pub fn write_chain(&self, format: &dyn ChainFormat) -> Result<IntegrityChain, RebaseError> {
        let chain = self.compute_chain(format)?;
        chain.validate()?;
        let path = self.chain_path();
        fs::write(&path, format.render(&chain)).map_err(|e| RebaseError::io(&path, e))?;
        info!(path = %path.display(), entries = chain.len(), "wrote chain file");
        Ok(chain)
    }

    /// Build the post-rebase directory in a scratch location. The live
    /// directory is not modified.
    pub fn stage(&self, plan: &RebasePlan) -> Result<StagedDir, RebaseError> {
        let live = self.absolute_root()?;
        let parent = parent_of(&live);
        let scratch = tempfile::Builder::new()
            .prefix(STAGE_PREFIX)
            .tempdir_in(&parent)
            .map_err(|e| RebaseError::io(&parent, e))?;
        let staged = scratch.path().join(INNER);
        copy_dir(&self.root, &staged)?;

        // Removals first: a later rename may target a name an earlier one
        // vacates.
        for rename in &plan.renames {
            let from = staged.join(&rename.from);
            fs::remove_file(&from).map_err(|e| RebaseError::io(&from, e))?;
        }
        for rename in &plan.renames {
            let to = staged.join(&rename.to);
            fs::write(&to, &rename.content).map_err(|e| RebaseError::io(&to, e))?;
            debug!(from = %rename.from, to = %rename.to, "staged rename");
        }

        let chain_path = staged.join(&self.sum_file);
        fs::write(&chain_path, &plan.rendered).map_err(|e| RebaseError::io(&chain_path, e))?;

        info!(
            dir = %self.root.display(),
            renames = plan.renames.len(),
            "staged rebased migration directory"
        );
        Ok(StagedDir { live, scratch })
    }

    fn absolute_root(&self) -> Result<PathBuf, RebaseError> {
        if self.root.is_absolute() {
            return Ok(self.root.clone());
        }
        let cwd = std::env::current_dir().map_err(|e| RebaseError::io(&self.root, e))?;
        Ok(cwd.join(&self.root))
    }
}

/// A fully prepared replacement for a live migration directory.
///
/// Dropping it without calling [`commit`](Self::commit) discards the scratch
/// copy.
#[derive(Debug)]
pub struct StagedDir {
    live: PathBuf,
    scratch: TempDir,
}

impl StagedDir {
    /// Path of the staged copy.
    pub fn path(&self) -> PathBuf {
        self.scratch.path().join(INNER)
    }

    /// Swap the staged copy into place. On failure the live directory is
    /// restored. The previous directory is kept until the returned
    /// [`SwappedDir`] is dropped.
    pub fn commit(self) -> Result<SwappedDir, RebaseError> {
        let parent = parent_of(&self.live);
        let backup = tempfile::Builder::new()
            .prefix(BACKUP_PREFIX)
            .tempdir_in(&parent)
            .map_err(|e| RebaseError::io(&parent, e))?;
        let old = backup.path().join(INNER);

        fs::rename(&self.live, &old).map_err(|e| RebaseError::io(&self.live, e))?;
        if let Err(e) = fs::rename(self.path(), &self.live) {
            warn!(dir = %self.live.display(), error = %e, "swap failed, restoring live directory");
            if let Err(restore) = fs::rename(&old, &self.live) {
                warn!(error = %restore, "failed to restore live directory");
            }
            return Err(RebaseError::io(&self.live, e));
        }

        info!(dir = %self.live.display(), "migration directory replaced");
        Ok(SwappedDir {
            live: self.live,
            backup,
        })
    }
}

/// A live directory that has been replaced, with the previous contents
/// held in a backup next to it.
///
/// Dropping it discards the backup and keeps the new contents.
#[derive(Debug)]
pub struct SwappedDir {
    live: PathBuf,
    backup: TempDir,
}

impl SwappedDir {
    /// Put the previous directory back. Files that exist only in the new
    /// contents are discarded with the backup.
    pub fn rollback(self) -> Result<(), RebaseError> {
        let replaced = self.backup.path().join(REPLACED);
        fs::rename(&self.live, &replaced).map_err(|e| RebaseError::io(&self.live, e))?;
        let old = self.backup.path().join(INNER);
        fs::rename(&old, &self.live).map_err(|e| RebaseError::io(&old, e))?;
        info!(dir = %self.live.display(), "migration directory rolled back");
        Ok(())
    }
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), RebaseError> {
    fs::create_dir_all(to).map_err(|e| RebaseError::io(to, e))?;
    for entry in fs::read_dir(from).map_err(|e| RebaseError::io(from, e))? {
        let entry = entry.map_err(|e| RebaseError::io(from, e))?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| RebaseError::io(&src, e))?;
        if file_type.is_dir() {
            copy_dir(&src, &dst)?;
        } else {
            fs::copy(&src, &dst).map_err(|e| RebaseError::io(&src, e))?;
        }
    }
    Ok(())
}
