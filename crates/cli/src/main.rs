//! sumrebase command-line tool.
//!
//! `sumrebase rebase` merges the base branch into the checked-out branch and,
//! when the only conflict is the migration chain file, renumbers the
//! branch's new migrations and commits the result. The other subcommands
//! maintain and inspect the chain file and the configuration.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use sumrebase_core::autorebase::{AutoRebase, AutoRebaseStatus, RebaseOptions};
use sumrebase_core::chain::SumFormat;
use sumrebase_core::config::AppConfig;
use sumrebase_core::conflict::{ConflictExtractor, MarkerOrder};
use sumrebase_core::git::GitClient;
use sumrebase_core::migrate_cli::MigrateCli;
use sumrebase_core::migration_dir::MigrationDir;
use sumrebase_core::rebaser::Rebaser;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Rebase hash-chained migration directories onto their base branch.
#[derive(Parser, Debug)]
#[command(
    name = "sumrebase",
    version,
    about = "Automatically rebase conflicting migration files onto the base branch"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./sumrebase.toml")]
    config: PathBuf,

    /// Log level (overrides RUST_LOG and the config file).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge the base branch and rebase conflicting migrations.
    Rebase {
        /// Branch to rebase onto (default: the remote's default branch).
        #[arg(long)]
        base_branch: Option<String>,

        /// Remote to fetch from and push to.
        #[arg(long)]
        remote: Option<String>,

        /// Branch to check out before rebasing.
        #[arg(long)]
        branch: Option<String>,

        /// Migration directory URL, e.g. file://migrations.
        #[arg(long)]
        dir: Option<String>,

        /// Commit but do not push.
        #[arg(long)]
        no_push: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rewrite the chain file from the migration files on disk.
    Hash {
        /// Migration directory URL, e.g. file://migrations.
        #[arg(long)]
        dir: Option<String>,
    },

    /// Verify that the chain file matches the migration files on disk.
    Check {
        /// Migration directory URL, e.g. file://migrations.
        #[arg(long)]
        dir: Option<String>,
    },

    /// Show the entries each side of a conflicted chain file adds.
    Diff {
        /// Conflicted chain file.
        file: PathBuf,

        /// The upper half of each conflict block is the incoming side.
        #[arg(long)]
        incoming_first: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./sumrebase.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_level = AppConfig::load_or_default(&cli.config)
        .ok()
        .map(|c| c.log.level);
    init_tracing(cli.log_level.as_deref(), config_level.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

/// `--log-level`, then `RUST_LOG`, then `[log].level`.
fn init_tracing(flag: Option<&str>, config_level: Option<&str>) {
    let filter = match flag {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config_level.unwrap_or("warn"))),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Rebase {
            base_branch,
            remote,
            branch,
            dir,
            no_push,
            json,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(base) = base_branch {
                config.repo.base_branch = Some(base);
            }
            if let Some(remote) = remote {
                config.repo.remote = remote;
            }
            if let Some(dir) = dir {
                config.migrations.dir = dir;
            }
            if no_push {
                config.repo.push = false;
            }
            config.validate().context("invalid configuration")?;
            cmd_rebase(&config, branch, json).await
        }
        Commands::Hash { dir } => cmd_hash(&with_dir(load_config(&cli.config)?, dir)?),
        Commands::Check { dir } => cmd_check(&with_dir(load_config(&cli.config)?, dir)?),
        Commands::Diff {
            file,
            incoming_first,
            json,
        } => cmd_diff(&load_config(&cli.config)?, &file, incoming_first, json),
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_and_resolve(path).context("failed to load configuration")?;
    debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

fn with_dir(mut config: AppConfig, dir: Option<String>) -> Result<AppConfig> {
    if let Some(dir) = dir {
        config.migrations.dir = dir;
        config.validate().context("invalid configuration")?;
    }
    Ok(config)
}

fn migration_dir(config: &AppConfig) -> Result<MigrationDir> {
    let matcher = config
        .migrations
        .matcher()
        .context("invalid entry pattern")?;
    Ok(MigrationDir::new(
        config.repo.path.join(config.migrations.dir_path()),
        config.migrations.sum_file.clone(),
        matcher,
    ))
}

fn rebaser(config: &AppConfig) -> Result<Rebaser> {
    let matcher = config
        .migrations
        .matcher()
        .context("invalid entry pattern")?;
    Ok(Rebaser::new(
        config.migrations.chain_file(),
        matcher,
        config.migrations.version_scheme,
    )
    .rewrite_embedded_version(config.migrations.rewrite_embedded_version))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_rebase(config: &AppConfig, branch: Option<String>, json: bool) -> Result<()> {
    let mut client = GitClient::new(&config.repo.path)
        .context("failed to open git repository")?
        .with_token(config.repo.token.clone());
    if let (Some(name), Some(email)) = (&config.commit.author_name, &config.commit.author_email) {
        client = client.with_author(name, email);
    }

    let mut options = RebaseOptions::from_config(config);
    options.branch = branch;

    let mut job = AutoRebase::new(&client, rebaser(config)?, options);
    if let Some(binary) = &config.migrate_cli.binary {
        job = job.with_migrate_cli(MigrateCli::new(binary, &config.repo.path));
    }

    let status = job.run().await.context("auto-rebase failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    match &status {
        AutoRebaseStatus::Rebased {
            commit, renames, ..
        } => {
            println!("{}", style::success(&status.to_string()));
            for rename in renames {
                println!("{}", style::rename(&rename.from, &rename.to));
            }
            println!("  {}", style::dim(&format!("commit {}", commit)));
        }
        _ => println!("{}", style::info(&status.to_string())),
    }
    Ok(())
}

fn cmd_hash(config: &AppConfig) -> Result<()> {
    let dir = migration_dir(config)?;
    let chain = dir
        .write_chain(&SumFormat)
        .context("failed to hash migration directory")?;
    println!(
        "{}",
        style::success(&format!(
            "Wrote {} ({} entries)",
            dir.chain_path().display(),
            chain.len()
        ))
    );
    Ok(())
}

fn cmd_check(config: &AppConfig) -> Result<()> {
    let dir = migration_dir(config)?;
    let recorded = dir
        .read_chain(&SumFormat)
        .context("failed to read chain file")?;
    let files = dir.list_files().context("failed to list migration files")?;
    let pairs: Vec<(&str, &[u8])> = files
        .iter()
        .map(|f| (f.name.as_str(), f.content.as_slice()))
        .collect();

    match SumFormat.verify(&recorded, &pairs) {
        None => {
            println!(
                "{}",
                style::success(&format!(
                    "{} matches {} migration files",
                    dir.chain_path().display(),
                    files.len()
                ))
            );
            Ok(())
        }
        Some(mismatch) => anyhow::bail!(
            "{} is out of date: {}",
            dir.chain_path().display(),
            mismatch
        ),
    }
}

fn cmd_diff(config: &AppConfig, file: &Path, incoming_first: bool, json: bool) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let order = if incoming_first {
        MarkerOrder::IncomingFirst
    } else {
        MarkerOrder::BaseFirst
    };
    let regions = ConflictExtractor::new(order).extract(&text);
    if regions.is_empty() {
        anyhow::bail!("no conflict regions found in {}", file.display());
    }

    let divergence = rebaser(config)?
        .divergence(&regions)
        .context("cannot compare the two sides")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&divergence)?);
        return Ok(());
    }
    println!("{}", style::header("Base only:"));
    for name in &divergence.base_only {
        println!("  {}", name);
    }
    println!("{}", style::header("Incoming only:"));
    for name in &divergence.incoming_only {
        println!("  {}", name);
    }
    if divergence.is_empty() {
        println!("{}", style::info("Both sides list the same entries"));
    }
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# sumrebase configuration

[repo]
path = "."
remote = "origin"
# base_branch = "main"
# token_env = "GITHUB_TOKEN"
push = true

[migrations]
dir = "file://migrations"
sum_file = "atlas.sum"
entry_pattern = "timestamped"
# entry_regex = '^(\d{14}(?:_\S*)?\.sql)(?:\s|$)'
version_scheme = "timestamp"
rewrite_embedded_version = false

[commit]
message = "{dir}: rebase migration files"
# author_name = "ci"
# author_email = "ci@example.com"

[migrate_cli]
# binary = "atlas"
rehash = false

[log]
level = "warn"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Point [migrations].dir at your migration directory");
    println!("  2. Set the token environment variable if pushing needs credentials");
    println!(
        "  3. Validate with: sumrebase validate --config {}",
        output.display()
    );
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    // Missing env vars are warnings only.
    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Repository    : {}", config.repo.path.display());
    println!("  Remote        : {}", config.repo.remote);
    println!(
        "  Base branch   : {}",
        config
            .repo
            .base_branch
            .as_deref()
            .unwrap_or("(remote default)")
    );
    println!(
        "  Token         : {}",
        match (&config.repo.token_env, &config.repo.token) {
            (None, _) => "not configured",
            (Some(_), Some(_)) => "set",
            (Some(_), None) => "NOT SET",
        }
    );
    println!("  Chain file    : {}", config.migrations.chain_file());
    println!("  Entry pattern : {}", config.migrations.entry_regex.as_deref().map_or_else(
        || config.migrations.entry_pattern.to_string(),
        |r| format!("custom ({})", r),
    ));
    println!("  Version scheme: {}", config.migrations.version_scheme);
    println!("  Push          : {}", if config.repo.push { "yes" } else { "no" });
    println!();
    println!("Configuration is valid.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_rebase_flags() {
        let cli = Cli::try_parse_from([
            "sumrebase",
            "rebase",
            "--base-branch",
            "master",
            "--remote",
            "upstream",
            "--no-push",
        ])
        .unwrap();
        match cli.command {
            Commands::Rebase {
                base_branch,
                remote,
                no_push,
                ..
            } => {
                assert_eq!(base_branch.as_deref(), Some("master"));
                assert_eq!(remote.as_deref(), Some("upstream"));
                assert!(no_push);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_init_writes_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sumrebase.toml");
        cmd_init(&path).unwrap();
        let config = AppConfig::load_from_file(&path).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.migrations.chain_file(), "migrations/atlas.sum");

        assert!(cmd_init(&path).is_err());
    }

    #[test]
    fn test_hash_then_check() {
        let dir = tempfile::tempdir().unwrap();
        let migrations = dir.path().join("migrations");
        std::fs::create_dir(&migrations).unwrap();
        std::fs::write(migrations.join("20250309093454_init.sql"), "CREATE TABLE t (id int);\n")
            .unwrap();

        let mut config = AppConfig::default();
        config.repo.path = dir.path().to_path_buf();
        cmd_hash(&config).unwrap();
        cmd_check(&config).unwrap();

        std::fs::write(migrations.join("20250309093454_init.sql"), "DROP TABLE t;\n").unwrap();
        let err = cmd_check(&config).unwrap_err();
        assert!(err.to_string().contains("out of date"));
    }

    #[test]
    fn test_diff_reads_conflicted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atlas.sum");
        std::fs::write(
            &path,
            "<<<<<<< HEAD\nh1:a=\n20250309093454.sql h1:x=\n20250309093833.sql h1:y=\n=======\nh1:b=\n20250309093454.sql h1:x=\n20250309093929.sql h1:z=\n>>>>>>> origin/main\n",
        )
        .unwrap();
        cmd_diff(&AppConfig::default(), &path, true, false).unwrap();

        let clean = dir.path().join("clean.sum");
        std::fs::write(&clean, "h1:a=\n").unwrap();
        assert!(cmd_diff(&AppConfig::default(), &clean, false, false).is_err());
    }
}
