#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use narrator::{
    AudioFormat, Book, BookMetadata, Cancellation, Error, PipelineConfig, Result, SchedulerConfig,
    SourceChapter, SpeechEngine,
};

pub const SAMPLE_RATE: u32 = 1000;
pub const SAMPLES_PER_CHAR: usize = 2;

pub fn wav_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

pub fn write_wav(path: &Path, samples: usize) {
    let mut writer = WavWriter::create(path, wav_spec()).unwrap();
    for i in 0..samples {
        writer.write_sample((i % 64) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Speech engine that writes a WAV whose length follows the text length.
#[derive(Default)]
pub struct ScriptedSpeech {
    pub texts: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    /// Every unit containing this marker fails.
    pub poison: Option<String>,
    pub delay: Option<Duration>,
    /// Trips the token once this many calls have finished.
    pub cancel_after: Option<(usize, Cancellation)>,
    /// Keeps a copy of every unit file written, under its own name.
    pub archive: Option<PathBuf>,
}

impl ScriptedSpeech {
    pub fn poisoned(marker: &str) -> Self {
        Self {
            poison: Some(marker.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

impl SpeechEngine for ScriptedSpeech {
    fn synthesize(&self, text: &str, output: &Path) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.texts.lock().unwrap().push(text.to_string());

        let result = match &self.poison {
            Some(marker) if text.contains(marker.as_str()) => {
                Err(Error::Synthesis(format!("cannot say {marker}")))
            }
            _ => {
                write_wav(output, text.chars().count() * SAMPLES_PER_CHAR);
                if let (Some(archive), Some(name)) = (&self.archive, output.file_name()) {
                    fs::copy(output, archive.join(name)).unwrap();
                }
                Ok(Vec::new())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some((limit, cancel)) = &self.cancel_after {
            if self.calls() >= *limit {
                cancel.cancel();
            }
        }
        result
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        work_dir: root.join(".temp"),
        output_dir: root.join(".dist"),
        format: AudioFormat::Wav,
        scheduler: SchedulerConfig::new(2, 0),
        announce_chapters: false,
        ..Default::default()
    }
}

pub fn chapter(title: &str, paragraphs: &[&str]) -> SourceChapter {
    SourceChapter {
        title: title.to_string(),
        paragraphs: paragraphs.iter().map(|p| p.to_string()).collect(),
    }
}

pub fn book(chapters: Vec<SourceChapter>) -> Book {
    Book {
        metadata: BookMetadata {
            title: "Test Book".to_string(),
            author: "Test Author".to_string(),
            ..Default::default()
        },
        chapters,
        cover: None,
    }
}
