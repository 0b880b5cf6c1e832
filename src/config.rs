//! Configuration file and its translation into pipeline settings.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::engine::{
    standard_language, AudioEngine, AudioFormat, CoquiOptions, EngineKind, FfmpegEngine,
    WavEngine,
};
use crate::error::{Error, Result};
use crate::model::CacheKey;
use crate::pipeline::PipelineConfig;
use crate::scheduler::SchedulerConfig;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub epub: EpubConfig,
    pub output: OutputConfig,
    pub work_dir: PathBuf,
    pub tts: TtsConfig,
    pub audio: AudioConfig,
    pub cache_key: CacheKey,
    pub announce_chapters: bool,
    pub preprocessing_aggressive: bool,
    pub verbose_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            epub: EpubConfig::default(),
            output: OutputConfig::default(),
            work_dir: PathBuf::from("./.temp"),
            tts: TtsConfig::default(),
            audio: AudioConfig::default(),
            cache_key: CacheKey::Ordinal,
            announce_chapters: true,
            preprocessing_aggressive: true,
            verbose_logs: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EpubConfig {
    pub path: Option<PathBuf>,
    pub cover_image: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// File stem of the audiobook; derived from title and author when unset.
    pub filename: Option<String>,
    pub format: AudioFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./.dist"),
            filename: None,
            format: AudioFormat::M4b,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub engine: EngineKind,
    #[serde(flatten)]
    pub coqui: CoquiOptions,
    pub voice_speed: f32,
    pub voice_pitch: f32,
    pub concurrency: usize,
    pub max_retries: usize,
    pub max_chars: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        Self {
            engine: EngineKind::Auto,
            coqui: CoquiOptions::default(),
            voice_speed: 1.0,
            voice_pitch: 1.0,
            concurrency: scheduler.concurrency(),
            max_retries: scheduler.max_retries(),
            max_chars: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioBackend {
    /// ffmpeg and ffprobe subprocesses.
    #[default]
    Ffmpeg,
    /// In-process WAV handling; output format must be wav.
    Native,
}

impl AudioBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "ffmpeg" => Some(AudioBackend::Ffmpeg),
            "native" | "wav" => Some(AudioBackend::Native),
            _ => None,
        }
    }

    pub fn engine(self) -> Arc<dyn AudioEngine> {
        match self {
            AudioBackend::Ffmpeg => Arc::new(FfmpegEngine::new()),
            AudioBackend::Native => Arc::new(WavEngine::new()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub backend: AudioBackend,
}

impl Config {
    /// Reads `path`, or `config.json` when no path is given. Only an
    /// explicitly named file has to exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if required {
                return Err(Error::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            debug!("no {} found, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path)?;
        let config = Self::from_json(&text)?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(text)?;
        config.tts.coqui.language = standard_language(&config.tts.coqui.language);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.epub.path.is_none() {
            return Err(Error::Config("no EPUB file given".into()));
        }
        if self.tts.max_chars == 0 {
            return Err(Error::Config("tts.max_chars must be at least 1".into()));
        }
        if self.tts.voice_speed <= 0.0 {
            return Err(Error::Config("tts.voice_speed must be positive".into()));
        }
        if self.audio.backend == AudioBackend::Native && self.output.format != AudioFormat::Wav {
            return Err(Error::Config(format!(
                "the native audio backend cannot write {}; use --format wav or the ffmpeg backend",
                self.output.format.extension()
            )));
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(self.tts.concurrency, self.tts.max_retries)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            work_dir: self.work_dir.clone(),
            output_dir: self.output.dir.clone(),
            output_name: self.output.filename.clone(),
            format: self.output.format,
            cover_image: self.epub.cover_image.clone(),
            max_chars: self.tts.max_chars,
            scheduler: self.scheduler_config(),
            cache_key: self.cache_key,
            announce_chapters: self.announce_chapters,
        }
    }
}
