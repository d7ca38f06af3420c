//! Scripted [`CommandRunner`] used by unit and end-to-end tests.
//!
//! Each call pops the next scripted [`Step`]. When the script is empty the
//! runner either answers with an empty successful exit or, when built with
//! [`FakeRunner::simulated_ffmpeg`], imitates the subset of ffmpeg the
//! prober and transcoder rely on.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::command_runner::{CommandInvocation, CommandOutput, CommandRunner};

/// Leading bytes that make the simulated tool report an MPEG-4/AAC input.
pub const FAKE_M4A_MAGIC: &[u8] = b"\x00\x00\x00\x20ftypM4A ";

const SIMULATED_AAC_PROBE: &str = "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'input':\n  Duration: 00:00:01.00, start: 0.000000, bitrate: 128 kb/s\n  Stream #0:0(und): Audio: aac (LC) (mp4a / 0x6134706D), 44100 Hz, stereo, fltp, 128 kb/s (default)\n";

const SIMULATED_INVALID_PROBE: &str = "input: Invalid data found when processing input\n";

#[derive(Debug, Clone)]
pub enum Step {
    /// Return this output without touching the filesystem.
    Output(CommandOutput),
    /// Write these bytes to the invocation's last argument and exit 0.
    Produce(Vec<u8>),
    /// Fail to start the process.
    SpawnError,
    /// Never finish.
    Hang,
}

pub struct FakeRunner {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<CommandInvocation>>,
    simulate: bool,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            simulate: false,
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Behave like ffmpeg once the script runs out.
    ///
    /// Probing reports MPEG-4/AAC for inputs starting with [`FAKE_M4A_MAGIC`].
    /// Transcoding writes `"<codec>:"` followed by the input bytes to the
    /// output path, so tests can tell which encoder produced a file.
    pub fn simulated_ffmpeg() -> Self {
        Self {
            simulate: true,
            ..Self::new()
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn push_output(&self, output: CommandOutput) {
        self.push(Step::Output(output));
    }

    pub fn push_spawn_error(&self) {
        self.push(Step::SpawnError);
    }

    pub fn calls(&self) -> Vec<CommandInvocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn execute(&self, invocation: &CommandInvocation) -> std::io::Result<CommandOutput> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Output(output)) => Ok(output),
            Some(Step::Produce(bytes)) => {
                tokio::fs::write(output_path(invocation), bytes).await?;
                Ok(CommandOutput::exited(0, "", ""))
            }
            Some(Step::SpawnError) => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No such file or directory (os error 2)",
            )),
            Some(Step::Hang) => std::future::pending().await,
            None if self.simulate => Ok(simulate_ffmpeg(invocation).await),
            None => Ok(CommandOutput::exited(0, "", "")),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, invocation: &CommandInvocation) -> std::io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.execute(invocation).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn output_path(invocation: &CommandInvocation) -> PathBuf {
    invocation
        .args
        .last()
        .map(PathBuf::from)
        .unwrap_or_default()
}

fn arg_after(invocation: &CommandInvocation, flag: &str) -> Option<String> {
    let args = invocation.args_lossy();
    let idx = args.iter().position(|a| a == flag)?;
    args.get(idx + 1).cloned()
}

async fn simulate_ffmpeg(invocation: &CommandInvocation) -> CommandOutput {
    let Some(input) = arg_after(invocation, "-i") else {
        return CommandOutput::exited(1, "", "missing input");
    };
    let data = match tokio::fs::read(&input).await {
        Ok(data) => data,
        Err(e) => return CommandOutput::exited(1, "", format!("{}: {}", input, e)),
    };

    let output = output_path(invocation);
    if output.as_os_str() == "-" {
        return if data.starts_with(FAKE_M4A_MAGIC) {
            CommandOutput::exited(0, "", SIMULATED_AAC_PROBE)
        } else {
            CommandOutput::exited(1, "", SIMULATED_INVALID_PROBE)
        };
    }

    let codec = arg_after(invocation, "-c:a").unwrap_or_else(|| "copy".to_string());
    let mut encoded = format!("{}:", codec).into_bytes();
    encoded.extend_from_slice(&data);
    match tokio::fs::write(&output, encoded).await {
        Ok(()) => CommandOutput::exited(0, "", ""),
        Err(e) => CommandOutput::exited(1, "", format!("{:?}: {}", output, e)),
    }
}
