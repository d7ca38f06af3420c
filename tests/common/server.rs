//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own database, blob directory
//! and scratch directory. ffmpeg is replaced by the simulated runner.

use super::constants::*;
use super::fixtures::create_test_db;
use phrase_audio_server::audio_store::{AudioStore, SqliteAudioStore};
use phrase_audio_server::blob_store::LocalBlobStore;
use phrase_audio_server::conversion::test_support::FakeRunner;
use phrase_audio_server::conversion::{ScratchDir, Transcoder};
use phrase_audio_server::pipeline::{ConversionPipeline, PipelineConfig};
use phrase_audio_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance with isolated storage
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Metadata store for direct database access in tests
    pub audio_store: Arc<dyn AudioStore>,

    /// Directory the pipeline keeps its scratch files in
    pub scratch_dir: PathBuf,

    /// Root of the local blob store
    pub blob_dir: PathBuf,

    // Private fields - keep resources alive until drop
    _temp_db_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port
    pub async fn spawn() -> Self {
        Self::spawn_with_upload_limit(TEST_MAX_UPLOAD_SIZE_BYTES).await
    }

    /// Spawns a test server that rejects uploads above `max_upload_size_bytes`
    pub async fn spawn_with_upload_limit(max_upload_size_bytes: usize) -> Self {
        let (temp_db_dir, db_path) = create_test_db().expect("Failed to create test database");
        let scratch_dir = temp_db_dir.path().join("scratch");
        let blob_dir = temp_db_dir.path().join("blobs");

        let audio_store: Arc<dyn AudioStore> =
            Arc::new(SqliteAudioStore::open(&db_path).expect("Failed to open audio store"));

        let blob_store = LocalBlobStore::new(&blob_dir);
        blob_store.init().await.expect("Failed to create blob dir");
        let scratch = ScratchDir::new(&scratch_dir);
        scratch.init().await.expect("Failed to create scratch dir");

        let transcoder = Transcoder::new(Arc::new(FakeRunner::simulated_ffmpeg()), "ffmpeg", 2);
        let pipeline = ConversionPipeline::new(
            audio_store.clone(),
            Arc::new(blob_store),
            transcoder.prober(),
            transcoder,
            scratch,
            PipelineConfig::default(),
        );

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            max_upload_size_bytes,
        };
        let app = make_app(config, Arc::new(pipeline));

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            audio_store,
            scratch_dir,
            blob_dir,
            _temp_db_dir: temp_db_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Names of the files currently left in the scratch directory
    pub fn scratch_files(&self) -> Vec<String> {
        std::fs::read_dir(&self.scratch_dir)
            .expect("Failed to read scratch dir")
            .map(|entry| {
                entry
                    .expect("Failed to read scratch entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
