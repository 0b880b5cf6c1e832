//! Error types for the narration pipeline

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the narrator
#[derive(Error, Debug)]
pub enum Error {
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("speech engine reported success but wrote no audio to {0}")]
    EmptyOutput(PathBuf),

    #[error("chapter {ordinal} ({title}) failed: {}", FailureList(.failures))]
    ChapterFailed {
        ordinal: usize,
        title: String,
        failures: Vec<UnitFailure>,
    },

    #[error("audio for unit {index} is missing: {path}")]
    MissingUnitAudio { index: usize, path: PathBuf },

    #[error("nothing to assemble for {0}")]
    NothingToAssemble(PathBuf),

    #[error("chapter audio for \"{title}\" is missing: {}", .path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "never assembled".into()))]
    MissingChapterAudio {
        title: String,
        path: Option<PathBuf>,
    },

    #[error("audio concatenation failed: {0}")]
    Concat(String),

    #[error("could not determine duration of {path}: {reason}")]
    Duration { path: PathBuf, reason: String },

    #[error("audiobook encoding failed: {0}")]
    Encode(String),

    #[error("no chapter produced any audio")]
    NoAudio,

    #[error("working directory {path} is not usable: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file '{0}' has already been created, use --reset to start over")]
    OutputExists(PathBuf),

    #[error("run cancelled")]
    Cancelled,

    #[error("no {0} found on PATH")]
    EngineNotFound(String),

    #[error("could not start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("EPUB error: {0}")]
    Epub(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Result type for narrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// A unit whose synthesis failed after every attempt.
#[derive(Debug)]
pub struct UnitFailure {
    pub index: usize,
    pub attempts: usize,
    pub error: Error,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unit {} after {} attempt(s): {}",
            self.index, self.attempts, self.error
        )
    }
}

struct FailureList<'a>(&'a [UnitFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}
