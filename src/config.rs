use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr};

const MIB: i64 = 1024 * 1024;

/// Tuning for the upload driver and the capture lifecycle.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Regular multipart part size.
    pub part_size_bytes: i64,
    /// Smallest part the remote store accepts for anything but the last part.
    pub min_part_size_bytes: i64,
    /// FAILED requests are retried while `failed_attempts` stays below this.
    pub max_failed_attempts: u32,
    /// Requests driven at the same time within one sync pass.
    pub concurrent_uploads: usize,
    /// Lifetime of an upload lease. Renewed on every checkpoint, so it only
    /// has to outlast a single part.
    pub claim_ttl_secs: i64,
    /// Delete a resource's local file once its upload completes.
    pub remove_uploaded_files: bool,
    /// Root that capture folders live under.
    pub data_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            part_size_bytes: 6 * MIB,
            min_part_size_bytes: 5 * MIB,
            max_failed_attempts: 3,
            concurrent_uploads: 1,
            claim_ttl_secs: 300,
            remove_uploaded_files: false,
            data_dir: PathBuf::from("./data/captures"),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Root of the local blob store that stands in for the remote bucket.
    pub blob_dir: String,
    pub sync: SyncConfig,
}

/// What the binary should do after loading configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    SyncOnce,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Capture upload sync service")]
pub struct Args {
    /// Host to bind to (overrides CAPTURE_SYNC_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CAPTURE_SYNC_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides CAPTURE_SYNC_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Local blob store directory (overrides CAPTURE_SYNC_BLOB_DIR)
    #[arg(long)]
    pub blob_dir: Option<String>,

    /// Directory holding capture folders (overrides CAPTURE_SYNC_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Multipart part size in bytes (overrides CAPTURE_SYNC_PART_SIZE)
    #[arg(long)]
    pub part_size: Option<i64>,

    /// Minimum non-final part size in bytes (overrides CAPTURE_SYNC_MIN_PART_SIZE)
    #[arg(long)]
    pub min_part_size: Option<i64>,

    /// Retry budget for failed uploads (overrides CAPTURE_SYNC_MAX_FAILED_ATTEMPTS)
    #[arg(long)]
    pub max_failed_attempts: Option<u32>,

    /// Uploads driven in parallel (overrides CAPTURE_SYNC_CONCURRENT_UPLOADS)
    #[arg(long)]
    pub concurrent_uploads: Option<usize>,

    /// Upload lease lifetime in seconds (overrides CAPTURE_SYNC_CLAIM_TTL_SECS)
    #[arg(long)]
    pub claim_ttl_secs: Option<i64>,

    /// Remove local files after upload (overrides CAPTURE_SYNC_REMOVE_UPLOADED_FILES)
    #[arg(long)]
    pub remove_uploaded_files: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Run one sync pass and exit
    #[arg(long, conflicts_with = "migrate")]
    pub sync_once: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::resolve(Args::parse())
    }

    /// Merge parsed args over environment values over defaults.
    pub fn resolve(args: Args) -> Result<(Self, RunMode)> {
        let defaults = SyncConfig::default();

        // --- Environment fallback ---
        let env_host = env::var("CAPTURE_SYNC_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("CAPTURE_SYNC_PORT", 3000)?;
        let env_db = env::var("CAPTURE_SYNC_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/capture_sync.db".into());
        let env_blob = env::var("CAPTURE_SYNC_BLOB_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_data = env::var("CAPTURE_SYNC_DATA_DIR").map(PathBuf::from);

        // --- Merge ---
        let sync = SyncConfig {
            part_size_bytes: match args.part_size {
                Some(value) => value,
                None => env_parse("CAPTURE_SYNC_PART_SIZE", defaults.part_size_bytes)?,
            },
            min_part_size_bytes: match args.min_part_size {
                Some(value) => value,
                None => env_parse("CAPTURE_SYNC_MIN_PART_SIZE", defaults.min_part_size_bytes)?,
            },
            max_failed_attempts: match args.max_failed_attempts {
                Some(value) => value,
                None => env_parse(
                    "CAPTURE_SYNC_MAX_FAILED_ATTEMPTS",
                    defaults.max_failed_attempts,
                )?,
            },
            concurrent_uploads: match args.concurrent_uploads {
                Some(value) => value,
                None => env_parse("CAPTURE_SYNC_CONCURRENT_UPLOADS", defaults.concurrent_uploads)?,
            }
            .max(1),
            claim_ttl_secs: match args.claim_ttl_secs {
                Some(value) => value,
                None => env_parse("CAPTURE_SYNC_CLAIM_TTL_SECS", defaults.claim_ttl_secs)?,
            },
            remove_uploaded_files: args.remove_uploaded_files
                || env_parse("CAPTURE_SYNC_REMOVE_UPLOADED_FILES", false)?,
            data_dir: args
                .data_dir
                .map(PathBuf::from)
                .or(env_data.ok())
                .unwrap_or(defaults.data_dir),
        };
        if sync.part_size_bytes <= 0 {
            anyhow::bail!("part size must be positive, got {}", sync.part_size_bytes);
        }
        if sync.claim_ttl_secs <= 0 {
            anyhow::bail!("claim ttl must be positive, got {}", sync.claim_ttl_secs);
        }

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            blob_dir: args.blob_dir.unwrap_or(env_blob),
            sync,
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.sync_once {
            RunMode::SyncOnce
        } else {
            RunMode::Serve
        };
        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an environment variable, falling back when it is unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_values_win() {
        let args = Args::parse_from([
            "capture-sync",
            "--port",
            "8081",
            "--part-size",
            "100",
            "--min-part-size",
            "0",
            "--max-failed-attempts",
            "5",
            "--data-dir",
            "/tmp/captures",
            "--claim-ttl-secs",
            "60",
            "--sync-once",
        ]);
        let (cfg, mode) = AppConfig::resolve(args).unwrap();
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.sync.part_size_bytes, 100);
        assert_eq!(cfg.sync.min_part_size_bytes, 0);
        assert_eq!(cfg.sync.max_failed_attempts, 5);
        assert_eq!(cfg.sync.data_dir, PathBuf::from("/tmp/captures"));
        assert_eq!(cfg.sync.claim_ttl_secs, 60);
        assert_eq!(mode, RunMode::SyncOnce);
    }

    #[test]
    fn test_migrate_conflicts_with_sync_once() {
        assert!(Args::try_parse_from(["capture-sync", "--migrate", "--sync-once"]).is_err());
    }

    #[test]
    fn test_rejects_non_positive_part_size() {
        let args = Args::parse_from(["capture-sync", "--part-size", "0"]);
        assert!(AppConfig::resolve(args).is_err());
    }

    #[test]
    fn test_rejects_non_positive_claim_ttl() {
        let args = Args::parse_from(["capture-sync", "--claim-ttl-secs", "0"]);
        assert!(AppConfig::resolve(args).is_err());
    }
}
