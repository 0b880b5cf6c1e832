//! # narrator
//!
//! Turns an EPUB into a chaptered audiobook by driving an external
//! text-to-speech program and ffmpeg.
//!
//! ## Features
//!
//! - **Segmentation**: chapter text is cut into units that fit the engine's
//!   input budget, at sentence, clause or word boundaries
//! - **Resumable synthesis**: unit and chapter audio is keyed by position, so
//!   an interrupted run picks up where it stopped
//! - **Bounded concurrency**: units of a chapter are synthesized on a fixed
//!   size worker pool with retries
//! - **Chapter markers**: the final m4b/mp3/m4a carries an ffmetadata chapter
//!   timeline and optional cover art
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use narrator::{
//!     detect_speech_engine, Book, Cancellation, EngineKind, FfmpegEngine, LogProgress,
//!     Pipeline, PipelineConfig, RunOptions, TextCleaner,
//! };
//!
//! let book = Book::from_epub("book.epub".as_ref(), &TextCleaner::default())?;
//! let speech = detect_speech_engine(EngineKind::Auto, Default::default(), 1.0, 1.0)?;
//! let pipeline = Pipeline::new(
//!     PipelineConfig::default(),
//!     speech,
//!     Arc::new(FfmpegEngine::new()),
//!     Arc::new(LogProgress),
//! );
//! let summary = pipeline.run(&book, RunOptions::default(), &Cancellation::new())?;
//! println!("{}", summary.output.display());
//! # Ok::<(), narrator::Error>(())
//! ```

pub mod assembler;
pub mod cancel;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod segmenter;
pub mod timeline;

pub use assembler::Assembler;
pub use cancel::Cancellation;
pub use config::{AudioBackend, Config};
pub use document::{chapter_announcement, Book, SourceChapter, TextCleaner};
pub use engine::{
    detect_speech_engine, AudioEngine, AudioFormat, CoquiOptions, EncodeRequest, EngineKind,
    FfmpegEngine, SpeechEngine, WavEngine,
};
pub use error::{Error, Result, UnitFailure};
pub use model::{CacheKey, Chapter, ChapterTimingEntry, Unit, UnitLayout};
pub use pipeline::{ChapterState, Pipeline, PipelineConfig, RunOptions, RunSummary};
pub use progress::{BarProgress, LogProgress, NoProgress, ProgressSink, SkipReason};
pub use scheduler::{Scheduler, SchedulerConfig, SynthesisReport};
pub use segmenter::{Segment, Segmenter};
pub use timeline::{build_timeline, render_ffmetadata, BookMetadata};
