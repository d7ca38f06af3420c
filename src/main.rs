use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use phrase_audio_server::audio_store::SqliteAudioStore;
use phrase_audio_server::blob_store::LocalBlobStore;
use phrase_audio_server::config::{self, AppConfig, CliConfig, FileConfig};
use phrase_audio_server::conversion::{ProcessRunner, ScratchDir, Transcoder};
use phrase_audio_server::pipeline::{ConversionPipeline, PipelineConfig};
use phrase_audio_server::server::{self, run_server, RequestsLoggingLevel, ServerConfig};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the SQLite metadata database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Directory used by the local blob store. Defaults to `<db-dir>/blobs`.
    #[clap(long, value_parser = parse_path)]
    pub blob_dir: Option<PathBuf>,

    /// Directory for per-request scratch files.
    #[clap(long, value_parser = parse_path)]
    pub scratch_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = config::DEFAULT_PORT)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = config::DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// The ffmpeg executable used for probing and transcoding.
    #[clap(long, default_value = config::DEFAULT_FFMPEG_PATH)]
    pub ffmpeg_path: String,

    /// Maximum number of encoder processes running at once.
    #[clap(long, default_value_t = config::DEFAULT_MAX_CONCURRENT_TRANSCODES)]
    pub max_concurrent_transcodes: usize,

    /// Kill ffmpeg after this many seconds. 0 disables the timeout.
    #[clap(long, default_value_t = config::DEFAULT_TRANSCODE_TIMEOUT_SEC)]
    pub transcode_timeout_sec: u64,

    /// Largest accepted upload, in megabytes.
    #[clap(long, default_value_t = config::DEFAULT_MAX_UPLOAD_SIZE_MB)]
    pub max_upload_size_mb: u64,

    /// Leading path segment of stored blob keys.
    #[clap(long, default_value = config::DEFAULT_STORAGE_PREFIX)]
    pub storage_prefix: String,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            blob_dir: self.blob_dir.clone(),
            scratch_dir: self.scratch_dir.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            max_concurrent_transcodes: self.max_concurrent_transcodes,
            transcode_timeout_sec: self.transcode_timeout_sec,
            max_upload_size_mb: self.max_upload_size_mb,
            storage_prefix: self.storage_prefix.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    let db_path = app_config.audio_db_path();
    info!("Opening SQLite audio database at {:?}...", db_path);
    let audio_store = Arc::new(SqliteAudioStore::open(&db_path)?);

    let blob_store = LocalBlobStore::new(&app_config.blob_dir);
    blob_store
        .init()
        .await
        .with_context(|| format!("Failed to create blob dir {:?}", app_config.blob_dir))?;
    info!("Storing blobs under {:?}", blob_store.root());

    let scratch = ScratchDir::new(&app_config.scratch_dir);
    scratch
        .init()
        .await
        .with_context(|| format!("Failed to create scratch dir {:?}", app_config.scratch_dir))?;

    let transcoding = &app_config.transcoding;
    info!(
        "Using {:?} with at most {} concurrent ffmpeg processes (timeout {:?})",
        transcoding.ffmpeg_path, transcoding.max_concurrent, transcoding.timeout
    );
    let runner = Arc::new(ProcessRunner::new(transcoding.timeout));
    let transcoder = Transcoder::new(runner, &transcoding.ffmpeg_path, transcoding.max_concurrent);
    let pipeline = ConversionPipeline::new(
        audio_store,
        Arc::new(blob_store),
        transcoder.prober(),
        transcoder,
        scratch,
        PipelineConfig {
            storage_prefix: app_config.storage_prefix.clone(),
        },
    );

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        max_upload_size_bytes: app_config.max_upload_size_bytes(),
    };

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);
    run_server(server_config, Arc::new(pipeline), app_config.metrics_port).await
}
