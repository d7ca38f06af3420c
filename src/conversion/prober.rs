//! Container/codec verification of uploaded files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::command_runner::{CommandInvocation, CommandRunner, CommandStatus};
use crate::audio::Format;
use crate::server::metrics;

/// Demuxer family ffmpeg reports for MPEG-4 audio containers.
const ACCEPTED_CONTAINER: &str = "mov,mp4,m4a,3gp,3g2,mj2";

const ACCEPTED_CODEC: &str = "aac";

/// Verdict about an uploaded file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    /// Container name as reported by the tool, if any was found.
    pub container: Option<String>,
    /// Audio codec name as reported by the tool, if any was found.
    pub codec: Option<String>,
    pub is_accepted_container: bool,
    pub is_accepted_codec: bool,
}

impl ProbeResult {
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn is_valid_input(&self) -> bool {
        self.is_accepted_container && self.is_accepted_codec
    }

    /// The format a valid input is recorded as.
    pub fn format(&self) -> Option<Format> {
        self.is_valid_input().then_some(Format::M4a)
    }

    /// Classify the diagnostic text printed by `ffmpeg -i`.
    ///
    /// The container comes from the unindented `Input #0, <demuxers>, from`
    /// header and the codec from the first `Stream #N:M...: Audio:` line.
    /// Metadata tags are free text chosen by the uploader and are never
    /// consulted. Line order and letter case don't matter.
    pub fn classify(output: &str) -> Self {
        let lowered = output.to_lowercase();

        let container = lowered.lines().find_map(input_header_demuxers);
        let codec = lowered.lines().find_map(audio_stream_codec);

        let is_accepted_container = container.as_deref() == Some(ACCEPTED_CONTAINER);
        let is_accepted_codec = codec.as_deref() == Some(ACCEPTED_CODEC);

        Self {
            container,
            codec,
            is_accepted_container,
            is_accepted_codec,
        }
    }
}

/// `input #0, mov,mp4, from 'x':` gives `mov,mp4`. Indented lines belong to
/// a metadata or stream section and are skipped.
fn input_header_demuxers(line: &str) -> Option<String> {
    let rest = line.strip_prefix("input #0,")?;
    let (demuxers, _) = rest.split_once(", from ")?;
    Some(demuxers.trim().to_string())
}

/// `stream #0:0(und): audio: aac (lc), ...` gives `aac`.
fn audio_stream_codec(line: &str) -> Option<String> {
    let line = line.trim_start();
    if !line.starts_with("stream #") {
        return None;
    }
    let (_, rest) = line.split_once(": audio: ")?;
    rest.split(|c: char| c == ',' || c.is_whitespace())
        .find(|token| !token.is_empty())
        .map(str::to_string)
}

/// Runs the analysis tool against local files.
#[derive(Clone)]
pub struct Prober {
    runner: Arc<dyn CommandRunner>,
    ffmpeg_path: PathBuf,
    permits: Option<Arc<Semaphore>>,
}

impl Prober {
    pub fn new(runner: Arc<dyn CommandRunner>, ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            ffmpeg_path: ffmpeg_path.into(),
            permits: None,
        }
    }

    /// Take one of `permits` for every probe, so probes and transcodes
    /// sharing the semaphore count against the same process limit.
    pub fn with_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.permits = Some(permits);
        self
    }

    fn invocation(&self, path: &Path) -> CommandInvocation {
        CommandInvocation::new(&self.ffmpeg_path)
            .arg("-hide_banner")
            .arg("-i")
            .arg(path)
            .args(["-f", "null", "-"])
    }

    /// Inspect `path`. Never fails: a tool that can't run or a timeout yields
    /// an invalid result.
    ///
    /// The exit code is ignored, the tool prints stream info even when it
    /// refuses to decode the rest of the file.
    pub async fn probe(&self, path: &Path) -> ProbeResult {
        let _permit = match &self.permits {
            Some(permits) => match permits.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!("Probe of {:?} skipped, process limiter is closed", path);
                    return ProbeResult::invalid();
                }
            },
            None => None,
        };
        let _active = metrics::ActiveTranscodeGuard::new();

        let output = match self.runner.run(&self.invocation(path)).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Could not run probe on {:?}: {}", path, e);
                return ProbeResult::invalid();
            }
        };

        if output.status == CommandStatus::TimedOut {
            warn!("Probe of {:?} timed out", path);
            return ProbeResult::invalid();
        }
        if !output.success() {
            debug!("Probe of {:?} exited with {:?}", path, output.status);
        }

        let result = ProbeResult::classify(&output.combined());
        debug!(
            "Probed {:?}: container={:?} codec={:?} valid={}",
            path,
            result.container,
            result.codec,
            result.is_valid_input()
        );
        result
    }
}
