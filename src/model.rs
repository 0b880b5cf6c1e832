//! Units, chapters and the on-disk naming scheme that makes runs resumable.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Audio container used for every intermediate file.
pub const PROCESSING_EXTENSION: &str = "wav";

/// Smallest piece of text sent to the speech engine in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub index: usize,
    pub text: String,
    pub output_path: PathBuf,
    /// Text is longer than the budget because it could not be split.
    pub oversized: bool,
}

/// One book section. `audio_path` and `duration_ms` are filled in as the
/// chapter moves through assembly and timing.
#[derive(Debug, Clone, Default)]
pub struct Chapter {
    pub ordinal: usize,
    pub title: String,
    pub units: Vec<Unit>,
    pub audio_path: Option<PathBuf>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterTimingEntry {
    pub title: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// How unit file names are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKey {
    /// Chapter ordinal and unit index only.
    #[default]
    Ordinal,
    /// Ordinal and index plus a digest of the unit text, so edited text
    /// is synthesized again instead of reusing stale audio.
    ContentHash,
}

/// Derives unit output paths inside the working directory.
#[derive(Debug, Clone)]
pub struct UnitLayout {
    dir: PathBuf,
    cache_key: CacheKey,
}

impl UnitLayout {
    pub fn new(dir: impl Into<PathBuf>, cache_key: CacheKey) -> Self {
        Self {
            dir: dir.into(),
            cache_key,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, chapter: usize, index: usize, text: &str) -> PathBuf {
        let stem = format!("chapter-{chapter:04}-unit-{index:05}");
        let name = match self.cache_key {
            CacheKey::Ordinal => format!("{stem}.{PROCESSING_EXTENSION}"),
            CacheKey::ContentHash => {
                format!("{stem}-{}.{PROCESSING_EXTENSION}", text_digest(text))
            }
        };
        self.dir.join(name)
    }
}

fn text_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

fn unit_name_regex() -> &'static Regex {
    static UNIT_NAME: OnceLock<Regex> = OnceLock::new();
    UNIT_NAME.get_or_init(|| {
        Regex::new(r"^chapter-(\d+)-unit-(\d+)(?:-[0-9a-f]+)?\.wav$").expect("valid unit name pattern")
    })
}

/// Recovers `(chapter, index)` from a unit file name.
pub fn parse_unit_file_name(name: &str) -> Option<(usize, usize)> {
    let caps = unit_name_regex().captures(name)?;
    let chapter = caps[1].parse().ok()?;
    let index = caps[2].parse().ok()?;
    Some((chapter, index))
}

/// Every unit file of `chapter` found in `dir`, in numeric index order.
pub fn unit_files_for_chapter(dir: &Path, chapter: usize) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let parsed = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_unit_file_name);

        if let Some((owner, index)) = parsed {
            if owner == chapter {
                found.push((index, path));
            }
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Finished audio for one chapter, keyed by book title and ordinal.
pub fn chapter_file(dir: &Path, book_title: &str, ordinal: usize) -> PathBuf {
    dir.join(format!(
        "{}-{ordinal:04}.{PROCESSING_EXTENSION}",
        sanitize_filename(book_title)
    ))
}

pub fn sanitize_filename(name: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let invalid = INVALID.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("valid pattern"));
    let cleaned = invalid.replace_all(name.trim(), "_").to_string();
    if cleaned.is_empty() {
        "audiobook".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_paths_are_stable() {
        let layout = UnitLayout::new("/tmp/work/units", CacheKey::Ordinal);
        let a = layout.path_for(3, 12, "Hello.");
        let b = layout.path_for(3, 12, "Completely different text.");
        assert_eq!(a, b);
        assert_eq!(
            a,
            PathBuf::from("/tmp/work/units/chapter-0003-unit-00012.wav")
        );
    }

    #[test]
    fn content_hash_paths_follow_text() {
        let layout = UnitLayout::new("units", CacheKey::ContentHash);
        let a = layout.path_for(1, 0, "Hello.");
        let b = layout.path_for(1, 0, "Hello.");
        let c = layout.path_for(1, 0, "Goodbye.");
        assert_eq!(a, b);
        assert_ne!(a, c);
        let name = a.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_unit_file_name(name), Some((1, 0)));
    }

    #[test]
    fn parses_unit_names() {
        assert_eq!(
            parse_unit_file_name("chapter-0002-unit-00010.wav"),
            Some((2, 10))
        );
        assert_eq!(parse_unit_file_name("chapter-2-unit-x.wav"), None);
        assert_eq!(parse_unit_file_name("notes.txt"), None);
    }

    #[test]
    fn recovers_units_in_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "chapter-1-unit-10.wav",
            "chapter-1-unit-9.wav",
            "chapter-1-unit-100.wav",
            "chapter-2-unit-1.wav",
            "readme.txt",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let files = unit_files_for_chapter(dir.path(), 1).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "chapter-1-unit-9.wav",
                "chapter-1-unit-10.wav",
                "chapter-1-unit-100.wav"
            ]
        );
    }

    #[test]
    fn missing_dir_has_no_units() {
        let files = unit_files_for_chapter(Path::new("/definitely/not/here"), 1).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn sanitizes_titles() {
        assert_eq!(sanitize_filename("A/B: C?"), "A_B_ C_");
        assert_eq!(sanitize_filename("   "), "audiobook");
        let path = chapter_file(Path::new("out"), "Moby Dick", 7);
        assert_eq!(path, PathBuf::from("out/Moby Dick-0007.wav"));
    }
}
