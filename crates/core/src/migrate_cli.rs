//! Asynchronous client for the external migration tool (e.g. `atlas`).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::errors::MigrateCliError;

/// Runs the migration tool as a subprocess.
#[derive(Debug, Clone)]
pub struct MigrateCli {
    binary: PathBuf,
    workdir: PathBuf,
}

impl MigrateCli {
    /// `workdir` is the directory commands are run in, normally the working
    /// copy root.
    pub fn new(binary: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        let cli = Self {
            binary: binary.into(),
            workdir: workdir.into(),
        };
        info!(binary = %cli.binary.display(), "created MigrateCli");
        cli
    }

    /// `<tool> migrate hash --dir file://<dir>`: rewrite the chain file of
    /// `dir` (relative to the working directory).
    #[instrument(skip(self), fields(binary = %self.binary.display()))]
    pub async fn migrate_hash(&self, dir: &Path) -> Result<(), MigrateCliError> {
        let url = dir_url(dir);
        self.run(&["migrate", "hash", "--dir", &url]).await?;
        info!(dir = %url, "migration tool re-hashed directory");
        Ok(())
    }

    async fn run(&self, args: &[&str]) -> Result<String, MigrateCliError> {
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(&self.workdir)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(cmd = ?format!("{} {}", self.binary.display(), args.join(" ")), "running migration tool");
        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MigrateCliError::BinaryNotFound(self.binary.display().to_string())
            } else {
                MigrateCliError::IoError(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, %stderr, "migration tool failed");
            return Err(MigrateCliError::CommandFailed { exit_code, stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn dir_url(dir: &Path) -> String {
    format!("file://{}", dir.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_url() {
        assert_eq!(dir_url(Path::new("migrations")), "file://migrations");
        assert_eq!(dir_url(Path::new("db/migrations")), "file://db/migrations");
    }

    #[tokio::test]
    async fn test_binary_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cli = MigrateCli::new("sumrebase-no-such-binary", dir.path());
        let err = cli.migrate_hash(Path::new("migrations")).await.unwrap_err();
        assert!(matches!(err, MigrateCliError::BinaryNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_failed() {
        let dir = tempfile::tempdir().unwrap();
        let cli = MigrateCli::new("false", dir.path());
        let err = cli.migrate_hash(Path::new("migrations")).await.unwrap_err();
        assert!(matches!(err, MigrateCliError::CommandFailed { exit_code: 1, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run() {
        let dir = tempfile::tempdir().unwrap();
        let cli = MigrateCli::new("echo", dir.path());
        cli.migrate_hash(Path::new("migrations")).await.unwrap();
        let out = cli.run(&["migrate", "hash"]).await.unwrap();
        assert_eq!(out.trim(), "migrate hash");
    }
}
