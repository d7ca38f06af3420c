//! Probing and transcoding through an external ffmpeg binary.

mod command_runner;
mod prober;
mod scratch;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
mod transcoder;

pub use command_runner::{
    CommandInvocation, CommandOutput, CommandRunner, CommandStatus, ProcessRunner,
};
pub use prober::{ProbeResult, Prober};
pub use scratch::{ScratchDir, ScratchFile};
pub use transcoder::{Direction, EncodingProfile, Transcoder};

use thiserror::Error;

/// Errors that can occur while running the encoder.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Could not start encoder: {0}")]
    Spawn(std::io::Error),

    #[error("Encoder exited with code {exit_code}")]
    Failed { exit_code: i32, output: String },

    #[error("Encoder interrupted: {0}")]
    Interrupted(String),

    #[error("Encoder timed out")]
    TimedOut,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
