//! Drives a book through segmentation, synthesis, assembly and the final
//! encode, one chapter at a time.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::assembler::Assembler;
use crate::cancel::Cancellation;
use crate::document::{chapter_announcement, Book, SourceChapter};
use crate::engine::{AudioEngine, AudioFormat, EncodeRequest, SpeechEngine};
use crate::error::{Error, Result};
use crate::model::{chapter_file, sanitize_filename, CacheKey, Chapter, ChapterTimingEntry, UnitLayout};
use crate::progress::{ProgressSink, SkipReason};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::segmenter::Segmenter;
use crate::timeline::{build_timeline, write_ffmetadata, BookMetadata};

const UNITS_DIR: &str = "units";
const CHAPTERS_DIR: &str = "chapters";
const METADATA_FILE: &str = "chapters.txt";
const COMBINED_STEM: &str = "audiobook";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Audiobook file stem; "<title> - <author>" when unset.
    pub output_name: Option<String>,
    pub format: AudioFormat,
    pub cover_image: Option<PathBuf>,
    pub max_chars: usize,
    pub scheduler: SchedulerConfig,
    pub cache_key: CacheKey,
    pub announce_chapters: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./.temp"),
            output_dir: PathBuf::from("./.dist"),
            output_name: None,
            format: AudioFormat::M4b,
            cover_image: None,
            max_chars: 250,
            scheduler: SchedulerConfig::default(),
            cache_key: CacheKey::Ordinal,
            announce_chapters: true,
        }
    }
}

impl PipelineConfig {
    pub fn units_dir(&self) -> PathBuf {
        self.work_dir.join(UNITS_DIR)
    }

    pub fn chapters_dir(&self) -> PathBuf {
        self.output_dir.join(CHAPTERS_DIR)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.work_dir.join(METADATA_FILE)
    }

    pub fn combined_path(&self) -> PathBuf {
        self.work_dir
            .join(format!("{COMBINED_STEM}.{}", AudioFormat::Wav.extension()))
    }

    pub fn output_path(&self, book: &BookMetadata) -> PathBuf {
        let stem = match &self.output_name {
            Some(name) if !name.trim().is_empty() => sanitize_filename(name.trim()),
            _ if book.author.trim().is_empty() => sanitize_filename(&book.title),
            _ => sanitize_filename(&format!("{} - {}", book.title.trim(), book.author.trim())),
        };
        self.output_dir
            .join(format!("{stem}.{}", self.format.extension()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Clear previous progress before starting.
    pub reset: bool,
    /// Build the audiobook from chapters already on disk, synthesizing nothing.
    pub finish: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterState {
    Pending,
    Segmenting,
    Synthesizing,
    Assembling,
    Complete,
    Cached,
    Skipped(SkipReason),
}

impl ChapterState {
    /// Whether the chapter has audio that belongs in the book.
    pub fn has_audio(self) -> bool {
        matches!(self, ChapterState::Complete | ChapterState::Cached)
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub output: PathBuf,
    pub timeline: Vec<ChapterTimingEntry>,
    pub synthesized_units: usize,
    pub cached_units: usize,
    pub cached_chapters: usize,
    pub skipped_chapters: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    segmenter: Segmenter,
    scheduler: Scheduler,
    assembler: Assembler,
    audio: Arc<dyn AudioEngine>,
    progress: Arc<dyn ProgressSink>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        speech: Arc<dyn SpeechEngine>,
        audio: Arc<dyn AudioEngine>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            segmenter: Segmenter::new(config.max_chars),
            scheduler: Scheduler::new(config.scheduler, speech),
            assembler: Assembler::new(audio.clone()),
            audio,
            progress,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(
        &self,
        book: &Book,
        options: RunOptions,
        cancel: &Cancellation,
    ) -> Result<RunSummary> {
        let start_time = Instant::now();
        if options.reset {
            self.reset()?;
        }
        self.prepare_dirs()?;

        let output = self.config.output_path(&book.metadata);
        if output.exists() {
            return Err(Error::OutputExists(output));
        }

        let mut summary = RunSummary {
            output,
            timeline: Vec::new(),
            synthesized_units: 0,
            cached_units: 0,
            cached_chapters: 0,
            skipped_chapters: 0,
        };
        let mut finished = Vec::new();

        for (position, source) in book.chapters.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut chapter = Chapter {
                ordinal: position + 1,
                title: source.title.clone(),
                ..Default::default()
            };

            match self.process_chapter(book, source, &mut chapter, options, cancel, &mut summary)? {
                ChapterState::Cached => {
                    summary.cached_chapters += 1;
                    finished.push(chapter);
                }
                ChapterState::Complete => finished.push(chapter),
                ChapterState::Skipped(reason) => {
                    summary.skipped_chapters += 1;
                    self.progress
                        .chapter_skipped(chapter.ordinal, &chapter.title, reason);
                }
                state => debug!("chapter {} ended in {state:?}", chapter.ordinal),
            }
        }

        if finished.is_empty() {
            return Err(Error::NoAudio);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        summary.timeline = self.finalize(book, &mut finished, &summary.output)?;

        info!(
            "✅ Audiobook completed in {:.2?}: {} ({} units synthesized, {} reused, {} chapters cached, {} skipped)",
            start_time.elapsed(),
            summary.output.display(),
            summary.synthesized_units,
            summary.cached_units,
            summary.cached_chapters,
            summary.skipped_chapters
        );
        Ok(summary)
    }

    fn process_chapter(
        &self,
        book: &Book,
        source: &SourceChapter,
        chapter: &mut Chapter,
        options: RunOptions,
        cancel: &Cancellation,
        summary: &mut RunSummary,
    ) -> Result<ChapterState> {
        let dest = chapter_file(&self.config.chapters_dir(), &book.metadata.title, chapter.ordinal);

        if dest.is_file() {
            debug!("chapter {} cached at {}", chapter.ordinal, dest.display());
            self.progress.chapter_cached(chapter.ordinal, &chapter.title);
            chapter.audio_path = Some(dest);
            return Ok(ChapterState::Cached);
        }
        if options.finish {
            return Ok(ChapterState::Skipped(SkipReason::NotSynthesized));
        }
        if self.segmenter.segment(&source.paragraphs).is_empty() {
            return Ok(ChapterState::Skipped(SkipReason::Empty));
        }

        let mut state = ChapterState::Segmenting;
        debug!("chapter {}: {state:?}", chapter.ordinal);
        let layout = UnitLayout::new(self.config.units_dir(), self.config.cache_key);
        let paragraphs = self.spoken_paragraphs(chapter.ordinal, source);
        chapter.units = self.segmenter.units(chapter.ordinal, &paragraphs, &layout);
        self.progress
            .chapter_started(chapter.ordinal, &chapter.title, chapter.units.len());

        state = ChapterState::Synthesizing;
        debug!("chapter {}: {state:?}", chapter.ordinal);
        let report = self
            .scheduler
            .synthesize(&chapter.units, cancel, self.progress.as_ref())?;
        summary.synthesized_units += report.synthesized.len();
        summary.cached_units += report.cached.len();

        if !report.failures.is_empty() {
            for failure in &report.failures {
                error!(
                    "chapter {} \"{}\": unit {} failed after {} attempt(s): {}",
                    chapter.ordinal, chapter.title, failure.index, failure.attempts, failure.error
                );
            }
            self.progress.chapter_failed(chapter.ordinal, &chapter.title);
            return Err(Error::ChapterFailed {
                ordinal: chapter.ordinal,
                title: chapter.title.clone(),
                failures: report.failures,
            });
        }
        if !report.cancelled.is_empty() || cancel.is_cancelled() {
            for failure in &report.interrupted {
                warn!(
                    "chapter {} \"{}\": unit {} stopped after {} attempt(s): {}",
                    chapter.ordinal, chapter.title, failure.index, failure.attempts, failure.error
                );
            }
            warn!(
                "chapter {} interrupted with {} unit(s) not synthesized",
                chapter.ordinal,
                report.cancelled.len()
            );
            self.progress.chapter_failed(chapter.ordinal, &chapter.title);
            return Err(Error::Cancelled);
        }

        state = ChapterState::Assembling;
        debug!("chapter {}: {state:?}", chapter.ordinal);
        if let Err(err) = self.assembler.assemble(&chapter.units, &dest) {
            self.progress.chapter_failed(chapter.ordinal, &chapter.title);
            return Err(err);
        }
        self.assembler
            .sweep_stale(layout.dir(), chapter.ordinal);

        chapter.audio_path = Some(dest);
        self.progress
            .chapter_completed(chapter.ordinal, &chapter.title);
        Ok(ChapterState::Complete)
    }

    /// Chapter text as it will be read, with the spoken heading in front.
    fn spoken_paragraphs(&self, ordinal: usize, source: &SourceChapter) -> Vec<String> {
        if !self.config.announce_chapters {
            return source.paragraphs.clone();
        }

        let mut paragraphs = Vec::with_capacity(source.paragraphs.len() + 1);
        paragraphs.push(chapter_announcement(ordinal, &source.title));

        let mut rest = source.paragraphs.iter().peekable();
        // The heading text usually opens the body too; read it once.
        if rest
            .peek()
            .is_some_and(|first| first.trim().eq_ignore_ascii_case(source.title.trim()))
        {
            rest.next();
        }
        paragraphs.extend(rest.cloned());
        paragraphs
    }

    fn finalize(
        &self,
        book: &Book,
        chapters: &mut [Chapter],
        output: &Path,
    ) -> Result<Vec<ChapterTimingEntry>> {
        self.progress.finalizing("Building chapter timeline");
        let timeline = build_timeline(chapters, self.audio.as_ref())?;
        for (chapter, entry) in chapters.iter_mut().zip(&timeline) {
            chapter.duration_ms = Some(entry.end_ms - entry.start_ms);
        }

        let metadata_path = self.config.metadata_path();
        write_ffmetadata(&metadata_path, &book.metadata, &timeline)?;

        self.progress.finalizing("Combining chapter audio");
        let combined = self.config.combined_path();
        let chapter_paths: Vec<PathBuf> = chapters
            .iter()
            .filter_map(|chapter| chapter.audio_path.clone())
            .collect();
        self.audio.concat(&chapter_paths, &combined)?;

        let cover_image = self.cover_image(book)?;

        self.progress
            .finalizing(&format!("Encoding {}", output.display()));
        self.audio.encode(&EncodeRequest {
            raw_audio: combined.clone(),
            cover_image: cover_image.clone(),
            metadata: metadata_path.clone(),
            dest: output.to_path_buf(),
            format: self.config.format,
        })?;

        let mut leftovers = vec![combined, metadata_path];
        leftovers.extend(chapter_paths);
        if self.config.cover_image.is_none() {
            leftovers.extend(cover_image);
        }
        for path in leftovers {
            remove_quietly(&path);
        }

        Ok(timeline)
    }

    /// The configured cover, else the one embedded in the EPUB.
    fn cover_image(&self, book: &Book) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.config.cover_image {
            if path.is_file() {
                return Ok(Some(path.clone()));
            }
            warn!("cover image {} not found, ignoring it", path.display());
            return Ok(None);
        }

        match &book.cover {
            Some(cover) => {
                let path = self
                    .config
                    .work_dir
                    .join(format!("cover.{}", cover.extension()));
                fs::write(&path, &cover.data)?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    fn prepare_dirs(&self) -> Result<()> {
        for dir in [
            self.config.work_dir.clone(),
            self.config.units_dir(),
            self.config.output_dir.clone(),
            self.config.chapters_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|source| Error::WorkDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Forgets previous runs: the working directory goes, and so does
    /// everything inside the output directory.
    fn reset(&self) -> Result<()> {
        info!("🧹 Removing previous progress");
        let work_dir = &self.config.work_dir;
        if work_dir.exists() {
            fs::remove_dir_all(work_dir).map_err(|source| Error::WorkDir {
                path: work_dir.clone(),
                source,
            })?;
        }

        let output_dir = &self.config.output_dir;
        if !output_dir.is_dir() {
            return Ok(());
        }
        let entries = fs::read_dir(output_dir).map_err(|source| Error::WorkDir {
            path: output_dir.clone(),
            source,
        })?;
        for entry in entries {
            let path = entry?.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|source| Error::WorkDir { path, source })?;
        }
        Ok(())
    }
}

fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!("could not remove {}: {err}", path.display());
    }
}
