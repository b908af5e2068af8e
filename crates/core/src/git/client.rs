//! Local Git repository operations via `git2`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::build::CheckoutBuilder;
use git2::{
    Commit, Cred, FetchOptions, IndexAddOption, Oid, PushOptions, RemoteCallbacks, Repository,
    RepositoryState, ResetType, Signature, Status, StatusOptions,
};
use tracing::{debug, info, instrument, warn};

use super::driver::{MergeOutcome, VcsDriver};
use crate::conflict::MarkerOrder;
use crate::errors::GitError;

const FALLBACK_NAME: &str = "sumrebase";
const FALLBACK_EMAIL: &str = "sumrebase@localhost";

/// High-level Git client wrapping a `git2::Repository`.
pub struct GitClient {
    repo: Repository,
    repo_path: PathBuf,
    token: Option<String>,
    author: Option<(String, String)>,
}

impl GitClient {
    /// Open an existing Git repository at `repo_path`.
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
            token: None,
            author: None,
        })
    }

    /// Access token used for fetch and push.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Author and committer of commits made by this client. Without it the
    /// repository's configured identity is used.
    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author = Some((name.into(), email.into()));
        self
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Return the SHA of HEAD.
    pub fn get_head_sha(&self) -> Result<String, GitError> {
        let head = self.repo.head()?;
        let commit = head.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    fn callbacks(&self) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(tok) = self.token.clone() {
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext("x-access-token", &tok)
            });
        }
        callbacks
    }

    fn signature(&self) -> Result<Signature<'static>, GitError> {
        if let Some((name, email)) = &self.author {
            return Ok(Signature::now(name, email)?);
        }
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)?),
        }
    }

    fn head_commit(&self) -> Result<Commit<'_>, GitError> {
        Ok(self.repo.head()?.peel_to_commit()?)
    }

    /// Commits listed in `.git/MERGE_HEAD` while a merge is in progress.
    fn merge_heads(&self) -> Result<Vec<Oid>, GitError> {
        if self.repo.state() != RepositoryState::Merge {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(self.repo.path().join("MERGE_HEAD"))?;
        let mut heads = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            heads.push(Oid::from_str(line)?);
        }
        Ok(heads)
    }
}

impl VcsDriver for GitClient {
    fn workdir(&self) -> Result<PathBuf, GitError> {
        self.repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::RepositoryNotFound(format!("{} (bare)", self.repo_path.display())))
    }

    fn current_branch(&self) -> Result<String, GitError> {
        let head = self.repo.head()?;
        if !head.is_branch() {
            return Err(GitError::DetachedHead);
        }
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| GitError::RefNotFound("HEAD".into()))
    }

    fn default_branch(&self, remote: &str) -> Result<Option<String>, GitError> {
        let name = format!("refs/remotes/{}/HEAD", remote);
        let prefix = format!("refs/remotes/{}/", remote);
        Ok(self
            .repo
            .find_reference(&name)
            .ok()
            .and_then(|r| r.symbolic_target().map(str::to_string))
            .and_then(|target| target.strip_prefix(&prefix).map(str::to_string)))
    }

    #[instrument(skip(self))]
    fn checkout(&self, branch: &str) -> Result<(), GitError> {
        let refname = format!("refs/heads/{}", branch);
        let target = self
            .repo
            .revparse_single(&refname)
            .map_err(|_| GitError::RefNotFound(refname.clone()))?;
        self.repo
            .checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
        self.repo.set_head(&refname)?;
        info!(branch, "checked out branch");
        Ok(())
    }

    #[instrument(skip(self))]
    fn fetch(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        info!(remote, branch, "fetching");
        let mut handle = self.repo.find_remote(remote)?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(self.callbacks());
        let refspec = format!("+refs/heads/{}:refs/remotes/{}/{}", branch, remote, branch);
        handle.fetch(&[&refspec], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");
        Ok(())
    }

    fn read_file(&self, rev: &str, path: &str) -> Result<String, GitError> {
        let spec = format!("{}:{}", rev, path);
        let object = self
            .repo
            .revparse_single(&spec)
            .map_err(|_| GitError::RefNotFound(spec.clone()))?;
        let blob = object.peel_to_blob()?;
        Ok(String::from_utf8_lossy(blob.content()).into_owned())
    }

    #[instrument(skip(self))]
    fn merge_base(&self, remote: &str, branch: &str) -> Result<MergeOutcome, GitError> {
        let refname = format!("refs/remotes/{}/{}", remote, branch);
        let theirs_ref = self
            .repo
            .find_reference(&refname)
            .map_err(|_| GitError::RefNotFound(refname.clone()))?;
        let theirs = theirs_ref.peel_to_commit()?;
        let ours = self.head_commit()?;

        let preview = self.repo.merge_commits(&ours, &theirs, None)?;
        if !preview.has_conflicts() {
            info!(theirs = %theirs.id(), "merge is clean");
            return Ok(MergeOutcome::Clean);
        }

        let annotated = self.repo.reference_to_annotated_commit(&theirs_ref)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.allow_conflicts(true).conflict_style_merge(true);
        self.repo.merge(&[&annotated], None, Some(&mut checkout))?;

        let paths = self.conflicts()?;
        info!(count = paths.len(), "merge left conflicts");
        Ok(MergeOutcome::Conflicted(paths))
    }

    fn ensure_clean(&self) -> Result<(), GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        let dirty: Vec<String> = statuses
            .iter()
            .filter(|entry| entry.status() != Status::CURRENT)
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect();
        if !dirty.is_empty() {
            warn!(paths = ?dirty, "working copy has uncommitted changes");
            return Err(GitError::DirtyWorkingCopy(dirty));
        }
        Ok(())
    }

    fn conflicts(&self) -> Result<Vec<String>, GitError> {
        let index = self.repo.index()?;
        let mut paths = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
                paths.push(String::from_utf8_lossy(&entry.path).into_owned());
            }
        }
        paths.sort();
        paths.dedup();
        debug!(paths = ?paths, "listed conflicted paths");
        Ok(paths)
    }

    fn conflict_text(&self, path: &str) -> Result<String, GitError> {
        let full = self.workdir()?.join(path);
        Ok(std::fs::read_to_string(full)?)
    }

    /// The checked-out branch is written first.
    fn marker_order(&self) -> MarkerOrder {
        MarkerOrder::IncomingFirst
    }

    #[instrument(skip(self))]
    fn abort_merge(&self) -> Result<(), GitError> {
        let head = self.head_commit()?;
        self.repo.reset(head.as_object(), ResetType::Hard, None)?;
        self.repo.cleanup_state()?;
        info!("merge aborted, working copy reset to HEAD");
        Ok(())
    }

    #[instrument(skip(self, message))]
    fn commit(&self, paths: &[String], message: &str) -> Result<String, GitError> {
        let mut index = self.repo.index()?;
        index.add_all(paths.iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(paths.iter(), None)?;

        // Conflicted entries under the committed paths are resolved with
        // their working-copy content.
        let workdir = self.workdir()?;
        let mut resolved = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
                let path = String::from_utf8_lossy(&entry.path).into_owned();
                if paths.iter().any(|p| path == *p || path.starts_with(&format!("{}/", p))) {
                    resolved.push(path);
                }
            }
        }
        for path in resolved {
            if workdir.join(&path).exists() {
                index.add_path(Path::new(&path))?;
            } else {
                index.remove_path(Path::new(&path))?;
            }
        }

        if index.has_conflicts() {
            return Err(GitError::MergeConflict(
                "unresolved conflicts remain in the index".into(),
            ));
        }
        index.write()?;

        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = self.signature()?;

        let mut parents = match self.repo.head() {
            Ok(head) => vec![head.peel_to_commit()?],
            Err(_) => Vec::new(),
        };
        for oid in self.merge_heads()? {
            parents.push(self.repo.find_commit(oid)?);
        }
        let parent_refs: Vec<&Commit> = parents.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)?;
        self.repo.cleanup_state()?;
        info!(sha = %oid, parents = parent_refs.len(), "created commit");
        Ok(oid.to_string())
    }

    #[instrument(skip(self))]
    fn push(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        info!(remote, branch, "pushing");
        let mut handle = self.repo.find_remote(remote)?;
        let mut callbacks = self.callbacks();
        let push_error = Arc::new(Mutex::new(None::<String>));
        let push_error_clone = push_error.clone();
        callbacks.push_update_reference(move |refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                if let Ok(mut slot) = push_error_clone.lock() {
                    *slot = Some(msg.to_string());
                }
            }
            Ok(())
        });
        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);
        handle.push(&[&refspec], Some(&mut push_opts))?;

        let rejected = push_error.lock().ok().and_then(|mut slot| slot.take());
        if let Some(detail) = rejected {
            return Err(GitError::PushRejected {
                branch: branch.to_string(),
                detail,
            });
        }
        info!("push completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::RepositoryInitOptions;

    fn init_repo(path: &Path) -> Repository {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(path, &opts).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        repo
    }

    /// Write `files` into the working copy and index, then commit to
    /// `update_ref` with the given parents.
    fn commit_files(repo: &Repository, update_ref: &str, parents: &[Oid], files: &[(&str, &str)]) -> Oid {
        let workdir = repo.workdir().unwrap().to_path_buf();
        let mut index = repo.index().unwrap();
        for (path, content) in files {
            let full = workdir.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&full, content).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@test.com").unwrap();
        let parents: Vec<Commit> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
        let parent_refs: Vec<&Commit> = parents.iter().collect();
        repo.commit(Some(update_ref), &sig, &sig, "test", &tree, &parent_refs)
            .unwrap()
    }

    /// `main` with `ours` on top of a shared root, and
    /// `refs/remotes/origin/main` with `theirs` on the same root.
    fn diverged(dir: &Path, ours: &[(&str, &str)], theirs: &[(&str, &str)]) -> GitClient {
        let repo = init_repo(dir);
        let root = commit_files(&repo, "HEAD", &[], &[("shared.txt", "shared\n")]);
        commit_files(&repo, "refs/remotes/origin/main", &[root], theirs);
        // Put the index back at the root before committing our side.
        let root_commit = repo.find_commit(root).unwrap();
        repo.reset(root_commit.as_object(), ResetType::Hard, None).unwrap();
        for (path, _) in theirs {
            let _ = std::fs::remove_file(dir.join(path));
        }
        commit_files(&repo, "HEAD", &[root], ours);
        GitClient::new(dir).unwrap()
    }

    #[test]
    fn test_repo_not_found() {
        assert!(matches!(
            GitClient::new("/nonexistent"),
            Err(GitError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn test_current_branch_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let client = diverged(dir.path(), &[("a.txt", "ours\n")], &[("b.txt", "theirs\n")]);
        assert_eq!(client.current_branch().unwrap(), "main");
        assert_eq!(client.read_file("HEAD", "a.txt").unwrap(), "ours\n");
        assert_eq!(client.read_file("origin/main", "b.txt").unwrap(), "theirs\n");
        assert!(matches!(
            client.read_file("HEAD", "missing.txt"),
            Err(GitError::RefNotFound(_))
        ));
    }

    #[test]
    fn test_clean_merge_leaves_working_copy_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let client = diverged(dir.path(), &[("a.txt", "ours\n")], &[("b.txt", "theirs\n")]);
        let head = client.get_head_sha().unwrap();

        assert_eq!(client.merge_base("origin", "main").unwrap(), MergeOutcome::Clean);
        assert!(!dir.path().join("b.txt").exists());
        assert_eq!(client.get_head_sha().unwrap(), head);
        assert_eq!(client.repo().state(), RepositoryState::Clean);
    }

    #[test]
    fn test_conflicted_merge_then_abort() {
        let dir = tempfile::tempdir().unwrap();
        let client = diverged(dir.path(), &[("f.txt", "ours\n")], &[("f.txt", "theirs\n")]);

        let outcome = client.merge_base("origin", "main").unwrap();
        assert_eq!(outcome, MergeOutcome::Conflicted(vec!["f.txt".to_string()]));
        let text = client.conflict_text("f.txt").unwrap();
        assert!(text.contains("<<<<<<<"));
        let ours_at = text.find("ours").unwrap();
        let theirs_at = text.find("theirs").unwrap();
        assert!(ours_at < theirs_at);

        client.abort_merge().unwrap();
        assert!(client.conflicts().unwrap().is_empty());
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "ours\n");
        assert_eq!(client.repo().state(), RepositoryState::Clean);
    }

    #[test]
    fn test_commit_concludes_merge() {
        let dir = tempfile::tempdir().unwrap();
        let client = diverged(dir.path(), &[("f.txt", "ours\n")], &[("f.txt", "theirs\n")]);
        client.merge_base("origin", "main").unwrap();

        std::fs::write(dir.path().join("f.txt"), "resolved\n").unwrap();
        let sha = client.commit(&["f.txt".to_string()], "resolve").unwrap();

        let commit = client.repo().find_commit(Oid::from_str(&sha).unwrap()).unwrap();
        assert_eq!(commit.parent_count(), 2);
        assert_eq!(client.read_file("HEAD", "f.txt").unwrap(), "resolved\n");
        assert_eq!(client.repo().state(), RepositoryState::Clean);
    }

    #[test]
    fn test_commit_refuses_unresolved_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let client = diverged(
            dir.path(),
            &[("f.txt", "ours\n"), ("g.txt", "ours\n")],
            &[("f.txt", "theirs\n"), ("g.txt", "theirs\n")],
        );
        client.merge_base("origin", "main").unwrap();
        let err = client.commit(&["f.txt".to_string()], "partial").unwrap_err();
        assert!(matches!(err, GitError::MergeConflict(_)));
    }

    #[test]
    fn test_commit_records_deletions() {
        let dir = tempfile::tempdir().unwrap();
        let client = diverged(dir.path(), &[("d/a.txt", "a\n")], &[("b.txt", "b\n")]);
        std::fs::remove_file(dir.path().join("d/a.txt")).unwrap();
        std::fs::write(dir.path().join("d/c.txt"), "c\n").unwrap();

        client.commit(&["d".to_string()], "rename").unwrap();
        assert!(client.read_file("HEAD", "d/a.txt").is_err());
        assert_eq!(client.read_file("HEAD", "d/c.txt").unwrap(), "c\n");
    }

    #[test]
    fn test_detached_head() {
        let dir = tempfile::tempdir().unwrap();
        let client = diverged(dir.path(), &[("a.txt", "a\n")], &[("b.txt", "b\n")]);
        let head = Oid::from_str(&client.get_head_sha().unwrap()).unwrap();
        client.repo().set_head_detached(head).unwrap();
        assert!(matches!(client.current_branch(), Err(GitError::DetachedHead)));

        client.checkout("main").unwrap();
        assert_eq!(client.current_branch().unwrap(), "main");
    }

    #[test]
    fn test_ensure_clean_ignores_untracked_files() {
        let dir = tempfile::tempdir().unwrap();
        let client = diverged(dir.path(), &[("a.txt", "a\n")], &[("b.txt", "b\n")]);
        client.ensure_clean().unwrap();

        std::fs::write(dir.path().join("notes.txt"), "scratch\n").unwrap();
        client.ensure_clean().unwrap();

        std::fs::write(dir.path().join("a.txt"), "local edit\n").unwrap();
        match client.ensure_clean() {
            Err(GitError::DirtyWorkingCopy(paths)) => assert_eq!(paths, vec!["a.txt".to_string()]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_merge_heads_read_during_merge() {
        let dir = tempfile::tempdir().unwrap();
        let client = diverged(dir.path(), &[("f.txt", "ours\n")], &[("f.txt", "theirs\n")]);
        assert!(client.merge_heads().unwrap().is_empty());

        client.merge_base("origin", "main").unwrap();
        let theirs = client
            .repo()
            .find_reference("refs/remotes/origin/main")
            .unwrap()
            .peel_to_commit()
            .unwrap()
            .id();
        assert_eq!(client.merge_heads().unwrap(), vec![theirs]);
    }

    #[test]
    fn test_marker_order() {
        let dir = tempfile::tempdir().unwrap();
        let client = diverged(dir.path(), &[("a.txt", "a\n")], &[("b.txt", "b\n")]);
        assert_eq!(client.marker_order(), MarkerOrder::IncomingFirst);
        assert_eq!(client.default_branch("origin").unwrap(), None);
    }
}
