use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{program_available, SpeechEngine};
use crate::error::{Error, Result};

const XTTS_MODEL_NAME: &str = "tts_models/multilingual/multi-dataset/xtts_v2";
const VITS_MODEL_NAME: &str = "tts_models/en/vctk/vits";
const DEFAULT_VITS_SPEAKER: &str = "p287";

/// Which speech engine to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Auto,
    Coqui,
    Espeak,
}

impl EngineKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Some(EngineKind::Auto),
            "coqui" | "tts" => Some(EngineKind::Coqui),
            "espeak" | "espeak-ng" => Some(EngineKind::Espeak),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoquiModel {
    /// Multilingual voice cloning from a speaker sample.
    #[default]
    Xtts,
    /// English multi-speaker model addressed by speaker id.
    Vits,
}

/// Arguments for the Coqui `tts` command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoquiOptions {
    pub model: CoquiModel,
    /// Overrides the model id implied by `model`.
    pub model_name: Option<String>,
    pub speaker_wav: Option<PathBuf>,
    pub speaker_idx: Option<String>,
    pub language: String,
    pub device: String,
}

impl Default for CoquiOptions {
    fn default() -> Self {
        Self {
            model: CoquiModel::Xtts,
            model_name: None,
            speaker_wav: None,
            speaker_idx: None,
            language: "en".to_string(),
            device: "auto".to_string(),
        }
    }
}

impl CoquiOptions {
    pub fn to_args(&self) -> Vec<String> {
        let model_name = self.model_name.clone().unwrap_or_else(|| {
            match self.model {
                CoquiModel::Xtts => XTTS_MODEL_NAME,
                CoquiModel::Vits => VITS_MODEL_NAME,
            }
            .to_string()
        });

        let mut args = vec!["--model_name".to_string(), model_name];

        if self.device != "auto" {
            args.extend(["--device".to_string(), self.device.clone()]);
        }
        if self.device == "cuda" {
            args.extend(["--use_cuda".to_string(), "true".to_string()]);
        }

        match self.model {
            CoquiModel::Xtts => {
                if let Some(wav) = &self.speaker_wav {
                    args.extend([
                        "--speaker_wav".to_string(),
                        wav.to_string_lossy().into_owned(),
                    ]);
                } else if let Some(idx) = &self.speaker_idx {
                    args.extend(["--speaker_idx".to_string(), idx.clone()]);
                }
                args.extend([
                    "--language_idx".to_string(),
                    standard_language(&self.language),
                ]);
            }
            CoquiModel::Vits => {
                let speaker = self
                    .speaker_idx
                    .clone()
                    .unwrap_or_else(|| DEFAULT_VITS_SPEAKER.to_string());
                args.extend(["--speaker_idx".to_string(), speaker]);
            }
        }

        args
    }
}

/// Reduces tags like `en-US` to the short codes the models expect.
pub fn standard_language(tag: &str) -> String {
    let tag = tag.trim();
    if tag.eq_ignore_ascii_case("zh-hans") || tag.eq_ignore_ascii_case("zh-hant") {
        return tag.to_string();
    }
    match tag.split(['-', '_']).next() {
        Some(primary) if !primary.is_empty() => primary.to_ascii_lowercase(),
        _ => "en".to_string(),
    }
}

/// Coqui TTS through its `tts` command.
pub struct CoquiEngine {
    program: String,
    options: CoquiOptions,
}

impl CoquiEngine {
    pub fn new(options: CoquiOptions) -> Self {
        Self::with_program("tts", options)
    }

    pub fn with_program(program: impl Into<String>, options: CoquiOptions) -> Self {
        Self {
            program: program.into(),
            options,
        }
    }
}

impl SpeechEngine for CoquiEngine {
    fn synthesize(&self, text: &str, output: &Path) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.options.to_args())
            .arg("--text")
            .arg(text)
            .arg("--out_path")
            .arg(output)
            .stdin(Stdio::null());

        debug!("running {:?}", cmd);
        let out = cmd.output()?;
        let combined = combine_output(&out);

        if !out.status.success() {
            return Err(Error::Synthesis(format!(
                "{} exited with {}: {}",
                self.program,
                out.status,
                tail(&combined)
            )));
        }

        Ok(combined)
    }

    fn name(&self) -> &str {
        "coqui"
    }
}

/// espeak-ng or espeak writing WAV data on stdout.
pub struct EspeakEngine {
    program: String,
    language: String,
    voice_speed: f32,
    voice_pitch: f32,
}

impl EspeakEngine {
    pub fn new(program: impl Into<String>, language: &str, voice_speed: f32, voice_pitch: f32) -> Self {
        Self {
            program: program.into(),
            language: standard_language(language),
            voice_speed,
            voice_pitch,
        }
    }
}

impl SpeechEngine for EspeakEngine {
    fn synthesize(&self, text: &str, output: &Path) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-v")
            .arg(&self.language)
            .arg("-s")
            .arg(format!("{}", (self.voice_speed * 175.0) as u32))
            .arg("-p")
            .arg(format!("{}", (self.voice_pitch * 50.0) as u32))
            .arg("-a")
            .arg("100")
            .arg("--stdout")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("running {:?}", cmd);
        let out = cmd.output()?;

        if !out.status.success() {
            return Err(Error::Synthesis(format!(
                "{} exited with {}: {}",
                self.program,
                out.status,
                tail(&out.stderr)
            )));
        }

        fs::write(output, &out.stdout)?;
        Ok(out.stderr)
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Picks a speech engine, probing `PATH` when `kind` is `Auto`.
pub fn detect_speech_engine(
    kind: EngineKind,
    coqui: CoquiOptions,
    voice_speed: f32,
    voice_pitch: f32,
) -> Result<Arc<dyn SpeechEngine>> {
    let espeak = |program: &str| -> Arc<dyn SpeechEngine> {
        Arc::new(EspeakEngine::new(
            program,
            &coqui.language,
            voice_speed,
            voice_pitch,
        ))
    };

    let engine: Arc<dyn SpeechEngine> = match kind {
        EngineKind::Coqui => Arc::new(CoquiEngine::new(coqui.clone())),
        EngineKind::Espeak => {
            if program_available("espeak-ng") {
                espeak("espeak-ng")
            } else if program_available("espeak") {
                espeak("espeak")
            } else {
                return Err(Error::EngineNotFound("espeak-ng or espeak".into()));
            }
        }
        EngineKind::Auto => {
            if program_available("tts") {
                Arc::new(CoquiEngine::new(coqui.clone()))
            } else if program_available("espeak-ng") {
                espeak("espeak-ng")
            } else if program_available("espeak") {
                espeak("espeak")
            } else {
                return Err(Error::EngineNotFound(
                    "speech engine (tts, espeak-ng or espeak)".into(),
                ));
            }
        }
    };

    info!("using speech engine: {}", engine.name());
    Ok(engine)
}

fn combine_output(out: &Output) -> Vec<u8> {
    let mut combined = out.stdout.clone();
    combined.extend_from_slice(&out.stderr);
    combined
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(399)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}
