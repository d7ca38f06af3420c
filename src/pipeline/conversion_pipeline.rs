//! Conversion pipeline.
//!
//! Ingest:
//! 1. Validate user and phrase
//! 2. Refuse if a live record exists
//! 3. Probe the upload, only MPEG-4/AAC is accepted
//! 4. Transcode to canonical WAV in a scratch file
//! 5. Upload canonical bytes to the blob store
//! 6. Insert the record, conditional on no live record existing
//!
//! Retrieve looks the record up, fetches the blob and transcodes on the way
//! out when the requested format isn't the canonical one.
//!
//! Every scratch file is owned by a [`ScratchFile`] guard local to the call,
//! so it is removed on every exit path including cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::audio::{AudioError, AudioRecord, Format};
use crate::audio_store::AudioStore;
use crate::blob_store::{BlobStore, BlobStoreError};
use crate::conversion::{Prober, ScratchDir, ScratchFile, Transcoder};
use crate::server::metrics;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Leading path segment of every blob key.
    pub storage_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_prefix: "audio".to_string(),
        }
    }
}

pub struct ConversionPipeline {
    audio_store: Arc<dyn AudioStore>,
    blob_store: Arc<dyn BlobStore>,
    prober: Prober,
    transcoder: Transcoder,
    scratch: ScratchDir,
    config: PipelineConfig,
}

impl ConversionPipeline {
    pub fn new(
        audio_store: Arc<dyn AudioStore>,
        blob_store: Arc<dyn BlobStore>,
        prober: Prober,
        transcoder: Transcoder,
        scratch: ScratchDir,
        config: PipelineConfig,
    ) -> Self {
        Self {
            audio_store,
            blob_store,
            prober,
            transcoder,
            scratch,
            config,
        }
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub fn audio_store(&self) -> &Arc<dyn AudioStore> {
        &self.audio_store
    }

    // =========================================================================
    // Ingest
    // =========================================================================

    /// Store `upload` as the audio for (user, phrase).
    ///
    /// Takes ownership of the uploaded scratch file; it is deleted before this
    /// returns whatever the outcome.
    pub async fn ingest(
        &self,
        user_id: &str,
        phrase_id: &str,
        upload: ScratchFile,
        description: Option<String>,
    ) -> Result<AudioRecord, AudioError> {
        let started = Instant::now();
        let result = self.run_ingest(user_id, phrase_id, &upload, description).await;
        drop(upload);

        record_outcome("ingest", &result, started);
        match &result {
            Ok(record) => info!(
                "Ingested audio {} for user {} phrase {} -> {}",
                record.id, user_id, phrase_id, record.storage_key
            ),
            Err(e) if e.is_client_error() => {
                debug!("Ingest rejected for user {} phrase {}: {}", user_id, phrase_id, e)
            }
            Err(e) => warn!("Ingest failed for user {} phrase {}: {}", user_id, phrase_id, e),
        }
        result
    }

    async fn run_ingest(
        &self,
        user_id: &str,
        phrase_id: &str,
        upload: &ScratchFile,
        description: Option<String>,
    ) -> Result<AudioRecord, AudioError> {
        self.validate_identity(user_id, phrase_id)?;

        if self.audio_store.get_live_audio(user_id, phrase_id)?.is_some() {
            return Err(already_exists(user_id, phrase_id));
        }

        match upload.size().await {
            Ok(size) => debug!("Probing {} byte upload {:?}", size, upload.path()),
            Err(e) => warn!("Upload {:?} is not readable: {}", upload.path(), e),
        }
        let probe = self.prober.probe(upload.path()).await;
        let Some(original_format) = probe.format() else {
            return Err(AudioError::FormatInvalid(format!(
                "expected MPEG-4 audio with AAC codec, found container {} codec {}",
                probe.container.as_deref().unwrap_or("unknown"),
                probe.codec.as_deref().unwrap_or("unknown"),
            )));
        };

        let canonical = self.scratch.allocate("canonical", Format::CANONICAL);
        self.transcoder
            .to_canonical(upload.path(), canonical.path())
            .await
            .map_err(|e| AudioError::UploadFailed(format!("transcoding failed: {}", e)))?;
        let bytes = canonical
            .read()
            .await
            .map_err(|e| AudioError::UploadFailed(format!("reading transcoded file: {}", e)))?;
        drop(canonical);

        let key = self.new_storage_key();
        let key = self
            .blob_store
            .put(&key, &bytes)
            .await
            .map_err(|e| AudioError::UploadFailed(format!("blob upload failed: {}", e)))?;
        debug!("Uploaded {} bytes to {}", bytes.len(), key);

        let mut record =
            AudioRecord::new(user_id, phrase_id, original_format, Format::CANONICAL, &key);
        record.description = description;

        match self.audio_store.insert_audio_if_absent(&record) {
            Ok(true) => Ok(record),
            Ok(false) => {
                self.discard_blob(&key).await;
                Err(already_exists(user_id, phrase_id))
            }
            Err(e) => {
                self.discard_blob(&key).await;
                Err(AudioError::UploadFailed(format!(
                    "saving audio record failed: {:#}",
                    e
                )))
            }
        }
    }

    fn new_storage_key(&self) -> String {
        let prefix = self.config.storage_prefix.trim_matches('/');
        let name = format!(
            "{}.{}",
            uuid::Uuid::new_v4(),
            Format::CANONICAL.extension()
        );
        if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        }
    }

    /// Best-effort removal of a blob that no record will point at.
    async fn discard_blob(&self, key: &str) {
        match self.blob_store.delete(key).await {
            Ok(()) => debug!("Removed unreferenced blob {}", key),
            Err(e) => error!("Orphaned blob {} could not be removed: {}", key, e),
        }
    }

    // =========================================================================
    // Retrieve
    // =========================================================================

    /// Like [`Self::retrieve`], parsing `format` first. An unknown format
    /// fails before any store is consulted.
    pub async fn retrieve_named(
        &self,
        user_id: &str,
        phrase_id: &str,
        format: &str,
    ) -> Result<(Format, Vec<u8>), AudioError> {
        let format = match format.parse::<Format>() {
            Ok(format) => format,
            Err(e) => {
                metrics::record_pipeline_operation("retrieve", e.code(), Duration::ZERO);
                return Err(e);
            }
        };
        let bytes = self.retrieve(user_id, phrase_id, format).await?;
        Ok((format, bytes))
    }

    /// Bytes of the live audio for (user, phrase) encoded as `format`.
    pub async fn retrieve(
        &self,
        user_id: &str,
        phrase_id: &str,
        format: Format,
    ) -> Result<Vec<u8>, AudioError> {
        let started = Instant::now();
        let result = self.run_retrieve(user_id, phrase_id, format).await;

        record_outcome("retrieve", &result, started);
        match &result {
            Ok(bytes) => info!(
                "Served {} bytes of {} for user {} phrase {}",
                bytes.len(),
                format,
                user_id,
                phrase_id
            ),
            Err(e @ AudioError::FileNotFound(_)) => error!(
                "Audio record for user {} phrase {} points at a missing blob: {}",
                user_id, phrase_id, e
            ),
            Err(e) if e.is_client_error() => {
                debug!("Retrieve rejected for user {} phrase {}: {}", user_id, phrase_id, e)
            }
            Err(e) => warn!("Retrieve failed for user {} phrase {}: {}", user_id, phrase_id, e),
        }
        result
    }

    async fn run_retrieve(
        &self,
        user_id: &str,
        phrase_id: &str,
        format: Format,
    ) -> Result<Vec<u8>, AudioError> {
        self.validate_identity(user_id, phrase_id)?;

        let record = self
            .audio_store
            .get_live_audio(user_id, phrase_id)?
            .ok_or_else(|| not_found(user_id, phrase_id))?;

        let bytes = self
            .blob_store
            .get(&record.storage_key)
            .await
            .map_err(|e| match e {
                BlobStoreError::NotFound(key) => AudioError::FileNotFound(key),
                other => AudioError::RetrieveFailed(other.to_string()),
            })?;

        if format == record.converted_format {
            return Ok(bytes);
        }

        self.transcoder
            .serve(bytes, format, &self.scratch)
            .await
            .map_err(|e| {
                AudioError::ConversionFailed(format!(
                    "{} to {}: {}",
                    record.converted_format, format, e
                ))
            })
    }

    // =========================================================================
    // Remove
    // =========================================================================

    /// Soft-delete the live audio for (user, phrase). The blob is kept.
    pub async fn remove(
        &self,
        user_id: &str,
        phrase_id: &str,
        deleted_by: &str,
    ) -> Result<AudioRecord, AudioError> {
        let started = Instant::now();
        let result = self.run_remove(user_id, phrase_id, deleted_by);

        record_outcome("remove", &result, started);
        match &result {
            Ok(record) => info!(
                "Removed audio {} for user {} phrase {} (by {})",
                record.id, user_id, phrase_id, deleted_by
            ),
            Err(e) => debug!("Remove failed for user {} phrase {}: {}", user_id, phrase_id, e),
        }
        result
    }

    fn run_remove(
        &self,
        user_id: &str,
        phrase_id: &str,
        deleted_by: &str,
    ) -> Result<AudioRecord, AudioError> {
        self.validate_identity(user_id, phrase_id)?;
        self.audio_store
            .soft_delete_audio(user_id, phrase_id, deleted_by)?
            .ok_or_else(|| not_found(user_id, phrase_id))
    }

    fn validate_identity(&self, user_id: &str, phrase_id: &str) -> Result<(), AudioError> {
        if !self.audio_store.user_exists(user_id)? {
            return Err(AudioError::UserNotFound(user_id.to_string()));
        }
        if !self.audio_store.phrase_exists(phrase_id)? {
            return Err(AudioError::PhraseNotFound(phrase_id.to_string()));
        }
        Ok(())
    }
}

fn already_exists(user_id: &str, phrase_id: &str) -> AudioError {
    AudioError::AudioAlreadyExists {
        user_id: user_id.to_string(),
        phrase_id: phrase_id.to_string(),
    }
}

fn not_found(user_id: &str, phrase_id: &str) -> AudioError {
    AudioError::AudioNotFound {
        user_id: user_id.to_string(),
        phrase_id: phrase_id.to_string(),
    }
}

fn record_outcome<T>(operation: &str, result: &Result<T, AudioError>, started: Instant) {
    let code = match result {
        Ok(_) => "SUCCESS",
        Err(e) => e.code(),
    };
    metrics::record_pipeline_operation(operation, code, started.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_store::{Phrase, SqliteAudioStore, User};
    use crate::blob_store::LocalBlobStore;
    use crate::conversion::test_support::{FakeRunner, Step, FAKE_M4A_MAGIC};
    use crate::conversion::CommandOutput;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        scratch_path: std::path::PathBuf,
        blob_path: std::path::PathBuf,
        runner: Arc<FakeRunner>,
        store: Arc<SqliteAudioStore>,
        pipeline: ConversionPipeline,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_runner(FakeRunner::simulated_ffmpeg())
        }

        fn with_runner(runner: FakeRunner) -> Self {
            let temp = TempDir::new().unwrap();
            let blob_path = temp.path().join("blobs");
            Self::build(temp, runner, Arc::new(LocalBlobStore::new(&blob_path)), blob_path)
        }

        fn build(
            temp: TempDir,
            runner: FakeRunner,
            blob_store: Arc<dyn BlobStore>,
            blob_path: std::path::PathBuf,
        ) -> Self {
            let scratch_path = temp.path().join("scratch");
            std::fs::create_dir_all(&scratch_path).unwrap();

            let runner = Arc::new(runner);
            let store = Arc::new(SqliteAudioStore::in_memory().unwrap());
            store.add_user(&User::with_id("u1", "Alice")).unwrap();
            store.add_phrase(&Phrase::with_id("p1", "hello")).unwrap();
            store.add_phrase(&Phrase::with_id("p2", "goodbye")).unwrap();

            let transcoder = Transcoder::new(runner.clone(), "ffmpeg", 2);
            let pipeline = ConversionPipeline::new(
                store.clone(),
                blob_store,
                transcoder.prober(),
                transcoder,
                ScratchDir::new(&scratch_path),
                PipelineConfig::default(),
            );

            Self {
                _temp: temp,
                scratch_path,
                blob_path,
                runner,
                store,
                pipeline,
            }
        }

        async fn upload(&self, data: &[u8]) -> ScratchFile {
            self.pipeline
                .scratch()
                .write("upload", Format::M4a, data)
                .await
                .unwrap()
        }

        async fn valid_upload(&self) -> ScratchFile {
            let mut data = FAKE_M4A_MAGIC.to_vec();
            data.extend_from_slice(b"aac-frames");
            self.upload(&data).await
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(&self.scratch_path).unwrap().next().is_none()
        }

        fn blob_count(&self) -> usize {
            fn count(dir: &Path) -> usize {
                let Ok(entries) = std::fs::read_dir(dir) else {
                    return 0;
                };
                entries
                    .map(|e| e.unwrap().path())
                    .map(|p| if p.is_dir() { count(&p) } else { 1 })
                    .sum()
            }
            count(&self.blob_path)
        }
    }

    #[tokio::test]
    async fn test_ingest_then_retrieve_wav_is_canonical_output() {
        let fx = Fixture::new();
        let upload = fx.valid_upload().await;
        let original = upload.read().await.unwrap();

        let record = fx.pipeline.ingest("u1", "p1", upload, None).await.unwrap();
        assert_eq!(record.original_format, Format::M4a);
        assert_eq!(record.converted_format, Format::Wav);
        assert!(record.storage_key.starts_with("audio/"));
        assert!(record.storage_key.ends_with(".wav"));
        assert!(fx.scratch_is_empty());

        let wav = fx.pipeline.retrieve("u1", "p1", Format::Wav).await.unwrap();
        let mut expected = b"pcm_s16le:".to_vec();
        expected.extend_from_slice(&original);
        assert_eq!(wav, expected);
        assert!(fx.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_second_ingest_is_rejected_before_probing() {
        let fx = Fixture::new();
        fx.pipeline
            .ingest("u1", "p1", fx.valid_upload().await, None)
            .await
            .unwrap();
        let calls_after_first = fx.runner.calls().len();

        let err = fx
            .pipeline
            .ingest("u1", "p1", fx.valid_upload().await, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AudioError::AudioAlreadyExists { .. }));
        assert_eq!(fx.runner.calls().len(), calls_after_first);
        assert!(fx.scratch_is_empty());
        assert_eq!(fx.blob_count(), 1);
    }

    #[tokio::test]
    async fn test_ingest_unknown_identity_touches_nothing() {
        let fx = Fixture::new();

        let err = fx
            .pipeline
            .ingest("ghost", "p1", fx.valid_upload().await, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AudioError::UserNotFound(id) if id == "ghost"));

        let err = fx
            .pipeline
            .ingest("u1", "p404", fx.valid_upload().await, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AudioError::PhraseNotFound(id) if id == "p404"));

        assert!(fx.runner.calls().is_empty());
        assert!(fx.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_ingest_rejects_non_aac_content_with_m4a_name() {
        let fx = Fixture::new();
        let upload = fx.upload(b"just some text notes").await;

        let err = fx.pipeline.ingest("u1", "p1", upload, None).await.unwrap_err();

        assert!(matches!(err, AudioError::FormatInvalid(_)));
        assert_eq!(fx.runner.calls().len(), 1);
        assert!(fx.store.get_live_audio("u1", "p1").unwrap().is_none());
        assert!(fx.scratch_is_empty());
        assert_eq!(fx.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_ingest_transcode_failure_is_upload_failed() {
        let runner = FakeRunner::simulated_ffmpeg();
        runner.push(Step::Output(CommandOutput::exited(
            0,
            "",
            "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'x':\n Stream #0:0: Audio: aac (LC)\n",
        )));
        runner.push_output(CommandOutput::exited(187, "", "Conversion failed!"));
        let fx = Fixture::with_runner(runner);

        let err = fx
            .pipeline
            .ingest("u1", "p1", fx.valid_upload().await, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AudioError::UploadFailed(_)));
        assert_eq!(err.code(), "UPLOAD_FAILED");
        assert!(fx.scratch_is_empty());
        assert_eq!(fx.blob_count(), 0);
        assert!(fx.store.get_live_audio("u1", "p1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ingest_keeps_description() {
        let fx = Fixture::new();
        let record = fx
            .pipeline
            .ingest("u1", "p1", fx.valid_upload().await, Some("studio take".to_string()))
            .await
            .unwrap();

        let stored = fx.store.get_audio(&record.id).unwrap().unwrap();
        assert_eq!(stored.description.as_deref(), Some("studio take"));
        assert_eq!(stored.created_by, "u1");
    }

    #[tokio::test]
    async fn test_cancelled_ingest_leaves_no_trace() {
        let runner = FakeRunner::simulated_ffmpeg();
        runner.push(Step::Output(CommandOutput::exited(
            0,
            "",
            "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'x':\n Stream #0:0: Audio: aac (LC)\n",
        )));
        runner.push(Step::Hang);
        let fx = Fixture::with_runner(runner);
        let upload = fx.valid_upload().await;

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            fx.pipeline.ingest("u1", "p1", upload, None),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(fx.runner.calls().len(), 2);
        assert!(fx.scratch_is_empty());
        assert_eq!(fx.blob_count(), 0);
        assert!(fx.store.get_live_audio("u1", "p1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retrieve_serve_formats() {
        let fx = Fixture::new();
        fx.pipeline
            .ingest("u1", "p1", fx.valid_upload().await, None)
            .await
            .unwrap();

        let mp3 = fx.pipeline.retrieve("u1", "p1", Format::Mp3).await.unwrap();
        assert!(mp3.starts_with(b"libmp3lame:pcm_s16le:"));

        let m4a = fx.pipeline.retrieve("u1", "p1", Format::M4a).await.unwrap();
        assert!(m4a.starts_with(b"aac:pcm_s16le:"));

        assert!(fx.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_without_ingest_is_audio_not_found() {
        let fx = Fixture::new();
        let err = fx.pipeline.retrieve("u1", "p2", Format::Wav).await.unwrap_err();
        assert!(matches!(err, AudioError::AudioNotFound { .. }));
        assert!(fx.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_named_rejects_unknown_format_before_lookup() {
        let fx = Fixture::new();
        // Unknown user too: the format must be rejected first.
        let err = fx
            .pipeline
            .retrieve_named("ghost", "p1", "ogg")
            .await
            .unwrap_err();
        assert!(matches!(err, AudioError::FormatInvalid(_)));

        fx.pipeline
            .ingest("u1", "p1", fx.valid_upload().await, None)
            .await
            .unwrap();
        let (format, wav) = fx.pipeline.retrieve_named("u1", "p1", "WAV").await.unwrap();
        assert_eq!(format, Format::Wav);
        assert!(wav.starts_with(b"pcm_s16le:"));
    }

    #[tokio::test]
    async fn test_retrieve_missing_blob_is_file_not_found() {
        let fx = Fixture::new();
        let record = fx
            .pipeline
            .ingest("u1", "p1", fx.valid_upload().await, None)
            .await
            .unwrap();
        std::fs::remove_file(fx.blob_path.join(&record.storage_key)).unwrap();

        let err = fx.pipeline.retrieve("u1", "p1", Format::Mp3).await.unwrap_err();
        assert!(matches!(err, AudioError::FileNotFound(key) if key == record.storage_key));
    }

    #[tokio::test]
    async fn test_retrieve_serve_failure_is_conversion_failed() {
        let fx = Fixture::new();
        fx.pipeline
            .ingest("u1", "p1", fx.valid_upload().await, None)
            .await
            .unwrap();
        fx.runner
            .push_output(CommandOutput::exited(1, "", "Unknown encoder 'libmp3lame'"));

        let err = fx.pipeline.retrieve("u1", "p1", Format::Mp3).await.unwrap_err();
        assert!(matches!(err, AudioError::ConversionFailed(_)));
        assert!(fx.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_remove_then_ingest_again() {
        let fx = Fixture::new();
        let first = fx
            .pipeline
            .ingest("u1", "p1", fx.valid_upload().await, None)
            .await
            .unwrap();

        let removed = fx.pipeline.remove("u1", "p1", "moderator").await.unwrap();
        assert_eq!(removed.id, first.id);
        assert_eq!(removed.deleted_by.as_deref(), Some("moderator"));

        let err = fx.pipeline.retrieve("u1", "p1", Format::Wav).await.unwrap_err();
        assert!(matches!(err, AudioError::AudioNotFound { .. }));
        let err = fx.pipeline.remove("u1", "p1", "moderator").await.unwrap_err();
        assert!(matches!(err, AudioError::AudioNotFound { .. }));

        let second = fx
            .pipeline
            .ingest("u1", "p1", fx.valid_upload().await, None)
            .await
            .unwrap();
        assert_ne!(second.id, first.id);
        // Soft delete keeps the old blob.
        assert_eq!(fx.blob_count(), 2);
    }

    /// Blob store whose uploads always fail.
    struct BrokenBlobStore;

    #[async_trait]
    impl BlobStore for BrokenBlobStore {
        async fn put(&self, _key: &str, _data: &[u8]) -> Result<String, BlobStoreError> {
            Err(BlobStoreError::Io(std::io::Error::other("bucket unavailable")))
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError> {
            Err(BlobStoreError::NotFound(key.to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), BlobStoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_blob_upload_failure_is_upload_failed() {
        let temp = TempDir::new().unwrap();
        let blob_path = temp.path().join("unused");
        let fx = Fixture::build(
            temp,
            FakeRunner::simulated_ffmpeg(),
            Arc::new(BrokenBlobStore),
            blob_path,
        );

        let err = fx
            .pipeline
            .ingest("u1", "p1", fx.valid_upload().await, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AudioError::UploadFailed(msg) if msg.contains("bucket unavailable")));
        assert!(fx.scratch_is_empty());
        assert!(fx.store.get_live_audio("u1", "p1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lost_insert_race_removes_uploaded_blob() {
        let fx = Fixture::new();
        // The duplicate check runs before the first await, so the competing
        // insert always lands between the check and the conditional insert.
        let upload = fx.valid_upload().await;
        let competing = AudioRecord::new("u1", "p1", Format::M4a, Format::Wav, "audio/other.wav");

        let store = fx.store.clone();
        let ingest = fx.pipeline.ingest("u1", "p1", upload, None);
        let (result, _) = tokio::join!(ingest, async move {
            store.insert_audio_if_absent(&competing).unwrap();
        });

        let err = result.unwrap_err();
        assert!(matches!(err, AudioError::AudioAlreadyExists { .. }));
        assert_eq!(fx.blob_count(), 0);
        assert!(fx.scratch_is_empty());
    }
}
