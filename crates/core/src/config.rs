//! TOML-based configuration for sumrebase.
//!
//! Every section is optional; a missing file yields [`AppConfig::default`].
//! Secrets are stored as `_env` fields naming environment variables and are
//! resolved once via [`AppConfig::resolve_env_vars`], so the engine itself
//! never reads the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chain::{EntryMatcher, EntryPattern, VersionScheme};
use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Working copy and remote settings.
    #[serde(default)]
    pub repo: RepoConfig,

    /// Migration directory and chain-file settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Commit produced by a successful rebase.
    #[serde(default)]
    pub commit: CommitConfig,

    /// External migration tool.
    #[serde(default)]
    pub migrate_cli: MigrateCliConfig,

    /// Logging.
    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Working copy and remote configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Path of the working copy (default `.`).
    #[serde(default = "default_repo_path")]
    pub path: PathBuf,

    /// Remote to fetch from and push to (default `origin`).
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Branch to rebase onto. Falls back to the remote's default branch.
    #[serde(default)]
    pub base_branch: Option<String>,

    /// Environment variable holding an access token for fetch / push.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Push the rebase commit (default `true`).
    #[serde(default = "default_true")]
    pub push: bool,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}
fn default_remote() -> String {
    "origin".into()
}
fn default_true() -> bool {
    true
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            path: default_repo_path(),
            remote: default_remote(),
            base_branch: None,
            token_env: None,
            push: true,
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Migrations
// ---------------------------------------------------------------------------

/// Migration directory and chain-file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Migration directory, relative to the working copy. A `file://`
    /// prefix is accepted (default `file://migrations`).
    #[serde(default = "default_dir")]
    pub dir: String,

    /// Name of the chain file inside the directory (default `atlas.sum`).
    #[serde(default = "default_sum_file")]
    pub sum_file: String,

    /// Built-in entry naming convention.
    #[serde(default)]
    pub entry_pattern: EntryPattern,

    /// Custom entry regex; overrides `entry_pattern` when set.
    #[serde(default)]
    pub entry_regex: Option<String>,

    /// How renumbered versions are produced.
    #[serde(default)]
    pub version_scheme: VersionScheme,

    /// Also replace the old file name inside renamed files.
    #[serde(default)]
    pub rewrite_embedded_version: bool,
}

fn default_dir() -> String {
    "file://migrations".into()
}
fn default_sum_file() -> String {
    "atlas.sum".into()
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            sum_file: default_sum_file(),
            entry_pattern: EntryPattern::default(),
            entry_regex: None,
            version_scheme: VersionScheme::default(),
            rewrite_embedded_version: false,
        }
    }
}

impl MigrationsConfig {
    /// Directory path relative to the working copy, without `file://`.
    pub fn dir_path(&self) -> PathBuf {
        let trimmed = self.dir.strip_prefix("file://").unwrap_or(&self.dir);
        PathBuf::from(trimmed.trim_end_matches('/'))
    }

    /// Repository-relative path of the chain file, `/`-separated as the VCS
    /// reports it.
    pub fn chain_file(&self) -> String {
        let dir = self.dir_path();
        let dir = dir.to_string_lossy().replace('\\', "/");
        if dir.is_empty() || dir == "." {
            self.sum_file.clone()
        } else {
            format!("{}/{}", dir.trim_start_matches("./"), self.sum_file)
        }
    }

    /// Compile the configured entry matcher.
    pub fn matcher(&self) -> Result<EntryMatcher, ConfigError> {
        EntryMatcher::from_config(self.entry_pattern, self.entry_regex.as_deref()).map_err(|e| {
            ConfigError::InvalidValue {
                field: "migrations.entry_regex".into(),
                detail: e.to_string(),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Commit settings for the rebase commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Message template; `{dir}` expands to the migration directory.
    #[serde(default = "default_message")]
    pub message: String,

    /// Author name; falls back to the repository's configured identity.
    #[serde(default)]
    pub author_name: Option<String>,

    /// Author email; falls back to the repository's configured identity.
    #[serde(default)]
    pub author_email: Option<String>,
}

fn default_message() -> String {
    "{dir}: rebase migration files".into()
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            message: default_message(),
            author_name: None,
            author_email: None,
        }
    }
}

impl CommitConfig {
    pub fn render_message(&self, dir: &Path) -> String {
        self.message.replace("{dir}", &dir.to_string_lossy())
    }
}

// ---------------------------------------------------------------------------
// Migration CLI
// ---------------------------------------------------------------------------

/// External migration tool settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MigrateCliConfig {
    /// Binary to invoke (e.g. `atlas`). Unset disables the tool.
    #[serde(default)]
    pub binary: Option<PathBuf>,

    /// Let the tool re-hash the directory after the rebuilt chain is staged.
    #[serde(default)]
    pub rehash: bool,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Like [`load_from_file`](Self::load_from_file), but a missing file
    /// yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load_from_file(path) {
            Err(ConfigError::FileNotFound(p)) => {
                debug!(path = %p, "no configuration file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// A missing variable only logs a warning; fetch and push then run
    /// without explicit credentials.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.repo.token_env {
            self.repo.token = resolve_optional_env(env_name, "repo.token_env");
        }
        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repo.remote.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repo.remote".into(),
                detail: "remote name must not be empty".into(),
            });
        }
        let dir = self.migrations.dir_path();
        if dir.as_os_str().is_empty() || dir == Path::new(".") {
            return Err(ConfigError::InvalidValue {
                field: "migrations.dir".into(),
                detail: "migration directory must be a subdirectory of the working copy".into(),
            });
        }
        if self.migrations.sum_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "migrations.sum_file".into(),
                detail: "chain file name must not be empty".into(),
            });
        }
        if self.migrations.sum_file.contains(['/', '\\']) {
            return Err(ConfigError::InvalidValue {
                field: "migrations.sum_file".into(),
                detail: "chain file name must not contain a path separator".into(),
            });
        }
        if self.commit.message.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "commit.message".into(),
                detail: "commit message template must not be empty".into(),
            });
        }
        self.migrations.matcher()?;
        Ok(())
    }

    /// Convenience: load (or default), resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_or_default(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
