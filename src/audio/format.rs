use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::AudioError;

/// Audio formats the service knows how to store and serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Wav,
    M4a,
    Mp3,
}

impl Format {
    /// The storage format every accepted upload is transcoded into.
    pub const CANONICAL: Format = Format::Wav;

    pub const ALL: [Format; 3] = [Format::Wav, Format::M4a, Format::Mp3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::M4a => "m4a",
            Self::Mp3 => "mp3",
        }
    }

    /// Case-insensitive lookup, `None` for anything outside the enumeration.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s))
    }

    /// File extension used for scratch files and blob keys.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::M4a => "audio/mp4",
            Self::Mp3 => "audio/mpeg",
        }
    }

    pub fn is_canonical(&self) -> bool {
        *self == Self::CANONICAL
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| AudioError::FormatInvalid(format!("unsupported format '{}'", s)))
    }
}
