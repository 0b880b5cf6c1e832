//! External collaborators: the speech engine that turns text into audio
//! files, and the audio engine that concatenates, measures and encodes them.

mod command;
mod ffmpeg;
mod wav;

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use command::{
    detect_speech_engine, standard_language, CoquiEngine, CoquiModel, CoquiOptions, EngineKind,
    EspeakEngine,
};
pub use ffmpeg::FfmpegEngine;
pub use wav::WavEngine;

/// Text-to-speech service invoked once per unit.
pub trait SpeechEngine: Send + Sync {
    /// Writes audio for `text` to `output` and returns whatever the engine
    /// printed. Success does not guarantee the file exists; callers verify.
    fn synthesize(&self, text: &str, output: &Path) -> Result<Vec<u8>>;

    fn name(&self) -> &str;
}

/// Stream-level audio operations.
pub trait AudioEngine: Send + Sync {
    /// Joins `ordered` into `dest` without re-encoding.
    fn concat(&self, ordered: &[PathBuf], dest: &Path) -> Result<()>;

    /// Length of the file in seconds.
    fn duration(&self, path: &Path) -> Result<f64>;

    fn encode(&self, request: &EncodeRequest) -> Result<()>;
}

/// Container of the finished audiobook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    M4b,
    Mp3,
    M4a,
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::M4b => "m4b",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Wav => "wav",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "m4b" => Some(AudioFormat::M4b),
            "mp3" => Some(AudioFormat::Mp3),
            "m4a" | "aac" => Some(AudioFormat::M4a),
            "wav" => Some(AudioFormat::Wav),
            _ => None,
        }
    }
}

/// Everything the final encode step needs.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub raw_audio: PathBuf,
    pub cover_image: Option<PathBuf>,
    pub metadata: PathBuf,
    pub dest: PathBuf,
    pub format: AudioFormat,
}

/// Whether `program` resolves on `PATH`.
pub fn program_available(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
