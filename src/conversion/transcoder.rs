//! Subprocess-driven transcoding in both directions.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::command_runner::{CommandInvocation, CommandRunner, CommandStatus};
use super::prober::Prober;
use super::scratch::ScratchDir;
use super::ConversionError;
use crate::audio::Format;
use crate::server::metrics;

/// Codec and options used to encode one output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingProfile {
    pub format: Format,
    pub codec: &'static str,
    pub options: &'static [&'static str],
}

impl EncodingProfile {
    pub fn for_format(format: Format) -> Self {
        match format {
            // 16-bit PCM, 44.1 kHz stereo
            Format::Wav => Self {
                format,
                codec: "pcm_s16le",
                options: &["-ar", "44100", "-ac", "2"],
            },
            Format::M4a => Self {
                format,
                codec: "aac",
                options: &["-b:a", "192k"],
            },
            Format::Mp3 => Self {
                format,
                codec: "libmp3lame",
                options: &["-b:a", "192k"],
            },
        }
    }

    pub fn canonical() -> Self {
        Self::for_format(Format::CANONICAL)
    }
}

/// Which way a transcode goes, used to label metrics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingest,
    Serve,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Serve => "serve",
        }
    }
}

pub struct Transcoder {
    runner: Arc<dyn CommandRunner>,
    ffmpeg_path: PathBuf,
    permits: Arc<Semaphore>,
}

impl Transcoder {
    /// `max_concurrent` bounds how many encoder processes run at once
    /// across all callers sharing this transcoder.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        ffmpeg_path: impl Into<PathBuf>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            runner,
            ffmpeg_path: ffmpeg_path.into(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// A prober running the same binary under the same process limit.
    pub fn prober(&self) -> Prober {
        Prober::new(self.runner.clone(), self.ffmpeg_path.clone())
            .with_permits(self.permits.clone())
    }

    fn invocation(&self, input: &Path, output: &Path, profile: &EncodingProfile) -> CommandInvocation {
        CommandInvocation::new(&self.ffmpeg_path)
            .args(["-y", "-hide_banner", "-i"])
            .arg(input)
            .args(["-vn", "-c:a", profile.codec])
            .args(profile.options.iter().copied())
            .arg(output)
    }

    /// Run one encoder process from `input` to `output`.
    ///
    /// The exit code decides success. Captured output is only kept for the
    /// error message.
    pub async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodingProfile,
        direction: Direction,
    ) -> Result<(), ConversionError> {
        let invocation = self.invocation(input, output, profile);

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ConversionError::Interrupted("transcoder is shutting down".to_string()))?;
        let _active = metrics::ActiveTranscodeGuard::new();

        debug!(
            "Transcoding {:?} -> {:?} ({}, {})",
            input,
            output,
            profile.codec,
            direction.as_str()
        );
        let started = Instant::now();
        let result = self
            .runner
            .run(&invocation)
            .await
            .map_err(ConversionError::Spawn)?;
        let elapsed = started.elapsed();

        match result.status {
            CommandStatus::Exited(0) => {
                metrics::record_transcode(direction.as_str(), "success", elapsed);
                debug!("Transcoded {:?} in {:?}", output, elapsed);
                Ok(())
            }
            CommandStatus::Exited(exit_code) => {
                metrics::record_transcode(direction.as_str(), "failed", elapsed);
                warn!(
                    "Encoder exited with {} for {:?}: {}",
                    exit_code,
                    input,
                    last_lines(&result.combined(), 5)
                );
                Err(ConversionError::Failed {
                    exit_code,
                    output: result.combined(),
                })
            }
            CommandStatus::Signaled => {
                metrics::record_transcode(direction.as_str(), "interrupted", elapsed);
                warn!("Encoder for {:?} was killed by a signal", input);
                Err(ConversionError::Interrupted(
                    "encoder terminated by signal".to_string(),
                ))
            }
            CommandStatus::TimedOut => {
                metrics::record_transcode(direction.as_str(), "timeout", elapsed);
                Err(ConversionError::TimedOut)
            }
        }
    }

    /// Ingest direction: any accepted input to canonical WAV.
    pub async fn to_canonical(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        self.transcode(input, output, &EncodingProfile::canonical(), Direction::Ingest)
            .await
    }

    /// Serve direction: canonical bytes to `target`.
    ///
    /// WAV is returned as is. Other formats go through a pair of scratch
    /// files which are gone by the time this returns.
    pub async fn serve(
        &self,
        canonical: Vec<u8>,
        target: Format,
        scratch: &ScratchDir,
    ) -> Result<Vec<u8>, ConversionError> {
        if target.is_canonical() {
            return Ok(canonical);
        }

        let input = scratch.write("serve_in", Format::CANONICAL, &canonical).await?;
        drop(canonical);
        let output = scratch.allocate("serve_out", target);

        self.transcode(
            input.path(),
            output.path(),
            &EncodingProfile::for_format(target),
            Direction::Serve,
        )
        .await?;

        Ok(output.read().await?)
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join(" | ")
}
