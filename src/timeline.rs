//! Chapter timeline and the ffmetadata file that carries it into the final
//! encode.

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::debug;

use crate::engine::AudioEngine;
use crate::error::{Error, Result};
use crate::model::{Chapter, ChapterTimingEntry};

/// Walks chapters in book order and lays them end to end.
///
/// Durations are read to the nanosecond, then truncated to whole
/// milliseconds, so 1.001 s counts as 1001 ms. Any chapter without
/// readable audio aborts the whole timeline.
pub fn build_timeline(
    chapters: &[Chapter],
    audio: &dyn AudioEngine,
) -> Result<Vec<ChapterTimingEntry>> {
    let mut entries = Vec::with_capacity(chapters.len());
    let mut running = 0u64;

    for chapter in chapters {
        let path = match &chapter.audio_path {
            Some(path) if path.is_file() => path,
            other => {
                return Err(Error::MissingChapterAudio {
                    title: chapter.title.clone(),
                    path: other.clone(),
                })
            }
        };

        let seconds = audio.duration(path)?;
        let duration = Duration::try_from_secs_f64(seconds).map_err(|_| Error::Duration {
            path: path.clone(),
            reason: format!("unusable duration {seconds}"),
        })?;

        let duration_ms = duration.as_millis() as u64;
        let end = running + duration_ms;
        debug!(
            "chapter {} \"{}\": {running}..{end} ms",
            chapter.ordinal, chapter.title
        );
        entries.push(ChapterTimingEntry {
            title: chapter.title.clone(),
            start_ms: running,
            end_ms: end,
        });
        running = end;
    }

    Ok(entries)
}

/// Book-level tags written ahead of the chapter blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    pub description: String,
    pub publisher: String,
    pub language: String,
}

/// Renders ffmpeg's `;FFMETADATA1` format.
pub fn render_ffmetadata(book: &BookMetadata, timeline: &[ChapterTimingEntry]) -> String {
    let mut out = String::from(";FFMETADATA1\n");

    for (key, value) in [
        ("title", &book.title),
        ("artist", &book.author),
        ("album_artist", &book.author),
        ("description", &book.description),
        ("publisher", &book.publisher),
        ("language", &book.language),
    ] {
        if !value.trim().is_empty() {
            out.push_str(&format!("{key}={}\n", escape(value.trim())));
        }
    }
    out.push('\n');

    for entry in timeline {
        out.push_str("[CHAPTER]\n");
        out.push_str("TIMEBASE=1/1000\n");
        out.push_str(&format!("START={}\n", entry.start_ms));
        out.push_str(&format!("END={}\n", entry.end_ms));
        out.push_str(&format!("title={}\n\n", escape(&entry.title)));
    }

    out
}

pub fn write_ffmetadata(
    path: &Path,
    book: &BookMetadata,
    timeline: &[ChapterTimingEntry],
) -> Result<()> {
    fs::write(path, render_ffmetadata(book, timeline))?;
    Ok(())
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EncodeRequest;
    use std::collections::HashMap;
    use std::path::PathBuf;

    struct FixedDurations(HashMap<PathBuf, f64>);

    impl AudioEngine for FixedDurations {
        fn concat(&self, _ordered: &[PathBuf], _dest: &Path) -> Result<()> {
            Ok(())
        }

        fn duration(&self, path: &Path) -> Result<f64> {
            self.0.get(path).copied().ok_or_else(|| Error::Duration {
                path: path.to_path_buf(),
                reason: "unknown".into(),
            })
        }

        fn encode(&self, _request: &EncodeRequest) -> Result<()> {
            Ok(())
        }
    }

    fn chapters(dir: &Path, seconds: &[f64]) -> (Vec<Chapter>, FixedDurations) {
        let mut durations = HashMap::new();
        let chapters = seconds
            .iter()
            .enumerate()
            .map(|(i, secs)| {
                let path = dir.join(format!("ch{i}.wav"));
                fs::write(&path, b"audio").unwrap();
                durations.insert(path.clone(), *secs);
                Chapter {
                    ordinal: i + 1,
                    title: format!("Chapter {}", i + 1),
                    audio_path: Some(path),
                    ..Default::default()
                }
            })
            .collect();
        (chapters, FixedDurations(durations))
    }

    #[test]
    fn entries_are_contiguous_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (chapters, audio) = chapters(dir.path(), &[1.5, 2.0009, 0.25]);

        let timeline = build_timeline(&chapters, &audio).unwrap();

        assert_eq!(timeline[0].start_ms, 0);
        assert_eq!(timeline[0].end_ms, 1500);
        assert_eq!(timeline[1].end_ms, 3500);
        assert_eq!(timeline[2].end_ms, 3750);
        for pair in timeline.windows(2) {
            assert_eq!(pair[0].end_ms, pair[1].start_ms);
        }
    }

    #[test]
    fn decimal_seconds_keep_their_milliseconds() {
        let dir = tempfile::tempdir().unwrap();
        let (chapters, audio) = chapters(dir.path(), &[1.001, 0.29, 4.35]);

        let timeline = build_timeline(&chapters, &audio).unwrap();

        let bounds: Vec<_> = timeline.iter().map(|e| (e.start_ms, e.end_ms)).collect();
        assert_eq!(bounds, vec![(0, 1001), (1001, 1291), (1291, 5641)]);
    }

    #[test]
    fn missing_audio_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let (mut chapters, audio) = chapters(dir.path(), &[1.0, 1.0]);
        chapters[1].audio_path = None;

        let err = build_timeline(&chapters, &audio).unwrap_err();
        assert!(matches!(err, Error::MissingChapterAudio { .. }), "{err}");
    }

    #[test]
    fn bad_duration_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (chapters, _) = chapters(dir.path(), &[1.0]);
        let nan = FixedDurations(
            [(chapters[0].audio_path.clone().unwrap(), f64::NAN)]
                .into_iter()
                .collect(),
        );
        assert!(matches!(
            build_timeline(&chapters, &nan),
            Err(Error::Duration { .. })
        ));
    }

    #[test]
    fn empty_book_has_empty_timeline() {
        let audio = FixedDurations(HashMap::new());
        assert!(build_timeline(&[], &audio).unwrap().is_empty());
    }

    #[test]
    fn renders_ffmetadata_blocks() {
        let book = BookMetadata {
            title: "Moby Dick".into(),
            author: "Herman Melville".into(),
            ..Default::default()
        };
        let timeline = vec![
            ChapterTimingEntry {
                title: "Loomings".into(),
                start_ms: 0,
                end_ms: 1200,
            },
            ChapterTimingEntry {
                title: "A=B; #1".into(),
                start_ms: 1200,
                end_ms: 2000,
            },
        ];

        let text = render_ffmetadata(&book, &timeline);

        assert!(text.starts_with(";FFMETADATA1\ntitle=Moby Dick\nartist=Herman Melville\n"));
        assert!(!text.contains("description="));
        assert!(text.contains("[CHAPTER]\nTIMEBASE=1/1000\nSTART=0\nEND=1200\ntitle=Loomings\n"));
        assert!(text.contains("START=1200\nEND=2000\ntitle=A\\=B\\; \\#1\n"));
    }
}
