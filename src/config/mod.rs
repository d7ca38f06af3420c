mod file_config;

pub use file_config::{FileConfig, StorageConfig, TranscodingConfig};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3002;
pub const DEFAULT_METRICS_PORT: u16 = 9092;
pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";
pub const DEFAULT_MAX_CONCURRENT_TRANSCODES: usize = 4;
pub const DEFAULT_TRANSCODE_TIMEOUT_SEC: u64 = 300;
pub const DEFAULT_MAX_UPLOAD_SIZE_MB: u64 = 20;
pub const DEFAULT_STORAGE_PREFIX: &str = "audio";
pub const AUDIO_DB_FILE_NAME: &str = "audio.db";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub blob_dir: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub ffmpeg_path: String,
    pub max_concurrent_transcodes: usize,
    pub transcode_timeout_sec: u64,
    pub max_upload_size_mb: u64,
    pub storage_prefix: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            blob_dir: None,
            scratch_dir: None,
            port: DEFAULT_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            logging_level: RequestsLoggingLevel::default(),
            ffmpeg_path: DEFAULT_FFMPEG_PATH.to_string(),
            max_concurrent_transcodes: DEFAULT_MAX_CONCURRENT_TRANSCODES,
            transcode_timeout_sec: DEFAULT_TRANSCODE_TIMEOUT_SEC,
            max_upload_size_mb: DEFAULT_MAX_UPLOAD_SIZE_MB,
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub blob_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub max_upload_size_mb: u64,

    pub transcoding: TranscodingSettings,
    pub storage_prefix: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodingSettings {
    pub ffmpeg_path: PathBuf,
    pub max_concurrent: usize,
    /// None when subprocesses may run forever.
    pub timeout: Option<Duration>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let blob_dir = file
            .blob_dir
            .map(PathBuf::from)
            .or_else(|| cli.blob_dir.clone())
            .unwrap_or_else(|| db_dir.join("blobs"));

        let scratch_dir = file
            .scratch_dir
            .map(PathBuf::from)
            .or_else(|| cli.scratch_dir.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("phrase-audio-scratch"));

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let max_upload_size_mb = file.max_upload_size_mb.unwrap_or(cli.max_upload_size_mb);
        if max_upload_size_mb == 0 {
            bail!("max_upload_size_mb must be at least 1");
        }

        let tc_file = file.transcoding.unwrap_or_default();
        let max_concurrent = tc_file
            .max_concurrent
            .unwrap_or(cli.max_concurrent_transcodes);
        if max_concurrent == 0 {
            bail!("max_concurrent_transcodes must be at least 1");
        }
        let timeout_sec = tc_file.timeout_sec.unwrap_or(cli.transcode_timeout_sec);
        let transcoding = TranscodingSettings {
            ffmpeg_path: PathBuf::from(tc_file.ffmpeg_path.unwrap_or_else(|| cli.ffmpeg_path.clone())),
            max_concurrent,
            timeout: (timeout_sec > 0).then(|| Duration::from_secs(timeout_sec)),
        };

        let storage_prefix = file
            .storage
            .and_then(|s| s.prefix)
            .unwrap_or_else(|| cli.storage_prefix.clone());
        if !is_valid_storage_prefix(&storage_prefix) {
            bail!(
                "storage prefix {:?} must be relative segments without '.' or '..'",
                storage_prefix
            );
        }

        Ok(AppConfig {
            db_dir,
            blob_dir,
            scratch_dir,
            port,
            metrics_port,
            logging_level,
            max_upload_size_mb,
            transcoding,
            storage_prefix,
        })
    }

    pub fn audio_db_path(&self) -> PathBuf {
        self.db_dir.join(AUDIO_DB_FILE_NAME)
    }

    pub fn max_upload_size_bytes(&self) -> usize {
        (self.max_upload_size_mb as usize).saturating_mul(1024 * 1024)
    }
}

/// Blob keys are `<prefix>/<name>`, so every segment has to be a plain name.
/// Leading and trailing slashes are dropped when keys are built. Empty means
/// no prefix.
fn is_valid_storage_prefix(prefix: &str) -> bool {
    let trimmed = prefix.trim_matches('/');
    trimmed.is_empty()
        || trimmed
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
