//! Reads an EPUB into chapter titles and plain-text paragraphs.

use std::io::{Read, Seek};
use std::path::Path;

use epub::doc::EpubDoc;
use html2text::from_read;
use log::{debug, info};
use regex::Regex;

use crate::error::{Error, Result};
use crate::timeline::BookMetadata;

/// Words that already make a spoken heading on their own, so the chapter
/// number is not added in front of them.
const SELF_ANNOUNCING_TITLES: &[&str] = &[
    "chapter",
    "part",
    "book",
    "introduction",
    "acknowledgements",
    "acknowledgments",
    "prologue",
    "epilogue",
    "foreword",
    "preface",
    "afterword",
    "conclusion",
    "appendix",
    "glossary",
    "index",
];

const HTML_WIDTH: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChapter {
    pub title: String,
    pub paragraphs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CoverImage {
    pub data: Vec<u8>,
    pub mime: String,
}

impl CoverImage {
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "jpg",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Book {
    pub metadata: BookMetadata,
    pub chapters: Vec<SourceChapter>,
    pub cover: Option<CoverImage>,
}

impl Book {
    /// Opens `path` and walks its spine in reading order.
    pub fn from_epub(path: &Path, cleaner: &TextCleaner) -> Result<Self> {
        let mut doc = EpubDoc::new(path)
            .map_err(|e| Error::Epub(format!("failed to open {}: {e}", path.display())))?;

        let metadata = BookMetadata {
            title: metadata_value(&doc, "title"),
            author: metadata_value(&doc, "creator"),
            description: metadata_value(&doc, "description"),
            publisher: metadata_value(&doc, "publisher"),
            language: metadata_value(&doc, "language"),
        };

        let mut raw = Vec::new();
        let mut order = 0;
        loop {
            if let Some((html, _mime)) = doc.get_current_str() {
                raw.push(chapter_from_html(&html, order, cleaner));
                order += 1;
            }
            if !doc.go_next() {
                break;
            }
        }

        let cover = doc
            .get_cover()
            .map(|(data, mime)| CoverImage { data, mime });

        let book = Self::assemble(metadata, raw, cover);
        info!(
            "📖 {} by {}: {} chapters",
            book.metadata.title,
            book.metadata.author,
            book.chapters.len()
        );
        Ok(book)
    }

    /// Drops navigation pages and prepends a spoken introduction.
    pub fn assemble(
        metadata: BookMetadata,
        raw: Vec<SourceChapter>,
        cover: Option<CoverImage>,
    ) -> Self {
        let book_title = metadata.title.trim().to_lowercase();
        let mut chapters = Vec::with_capacity(raw.len() + 1);

        if !metadata.title.trim().is_empty() && !metadata.author.trim().is_empty() {
            chapters.push(SourceChapter {
                title: "Introduction".to_string(),
                paragraphs: vec![format!(
                    "{} written by {}.",
                    metadata.title.trim(),
                    metadata.author.trim()
                )],
            });
        }

        for chapter in raw {
            let title = chapter.title.trim().to_lowercase();
            if title == "contents" || title == "table of contents" || title == book_title {
                debug!("skipping navigation item \"{}\"", chapter.title);
                continue;
            }
            chapters.push(chapter);
        }

        Self {
            metadata,
            chapters,
            cover,
        }
    }
}

fn metadata_value<R: Read + Seek>(doc: &EpubDoc<R>, name: &str) -> String {
    doc.mdata(name)
        .map(|item| item.value.trim().to_string())
        .unwrap_or_default()
}

/// Converts one spine document into a titled list of paragraphs.
pub fn chapter_from_html(html: &str, order: usize, cleaner: &TextCleaner) -> SourceChapter {
    let plain = from_read(html.as_bytes(), HTML_WIDTH);
    let paragraphs = cleaner.paragraphs(&plain);
    let title = cleaner
        .extract_title(html)
        .or_else(|| paragraphs.first().cloned())
        .unwrap_or_else(|| format!("Chapter {}", order + 1));

    SourceChapter { title, paragraphs }
}

/// The heading spoken at the start of a chapter.
pub fn chapter_announcement(ordinal: usize, title: &str) -> String {
    let lower = title.trim().to_lowercase();
    if SELF_ANNOUNCING_TITLES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return title.trim().to_string();
    }
    format!("Chapter {ordinal}: {}", title.trim())
}

/// Regex cleanup that turns html2text output into speakable paragraphs.
pub struct TextCleaner {
    cleanup_regex: Vec<(Regex, &'static str)>,
    abbreviations: Vec<(Regex, &'static str)>,
    paragraph_break: Regex,
    hyphenation: Regex,
    heading_tag: Regex,
    title_tag: Regex,
    aggressive: bool,
}

impl TextCleaner {
    pub fn new(aggressive: bool) -> Self {
        let cleanup_patterns = vec![
            // Link reference lines html2text appends
            (Regex::new(r"(?m)^\s*\[\d+\]:.*$").unwrap(), ""),
            // Inline link references
            (Regex::new(r"\[([^\]]*)\]\[\d+\]").unwrap(), "$1"),
            // Heading markers and bullets
            (Regex::new(r"(?m)^\s*#+\s*").unwrap(), ""),
            (Regex::new(r"(?m)^\s*[-*]\s+").unwrap(), ""),
            // Emphasis
            (Regex::new(r"\*+").unwrap(), ""),
            // Leftover HTML entities
            (Regex::new(r"&[a-zA-Z0-9#]+;").unwrap(), " "),
            // URLs are not worth reading out
            (Regex::new(r"(https?://\S+|www\.\S+)").unwrap(), "URL Link"),
            // Figure and listing captions
            (Regex::new(r"(?m)^(Figure|Fig\.|Listing) \d.*$").unwrap(), "..."),
            // Remove page numbers
            (Regex::new(r"\b[Pp]age\s+\d+\b").unwrap(), ""),
            // Fix quotation marks
            (Regex::new(r"[“”]").unwrap(), "\""),
            (Regex::new(r"[‘’`]").unwrap(), "'"),
            // Normalize dashes
            (Regex::new(r"[–—]").unwrap(), " - "),
            // Collapse long runs of periods
            (Regex::new(r"\.{4,}").unwrap(), "..."),
        ];

        let abbreviations = [
            ("Mr.", "Mister"),
            ("Mrs.", "Missus"),
            ("Dr.", "Doctor"),
            ("Prof.", "Professor"),
            ("St.", "Saint"),
            ("vs.", "versus"),
            ("etc.", "etcetera"),
            ("i.e.", "that is"),
            ("e.g.", "for example"),
        ]
        .into_iter()
        .map(|(abbrev, expansion)| {
            let pattern = format!(r"\b{}", regex::escape(abbrev));
            (Regex::new(&pattern).unwrap(), expansion)
        })
        .collect();

        Self {
            cleanup_regex: cleanup_patterns,
            abbreviations,
            paragraph_break: Regex::new(r"\n\s*\n").unwrap(),
            hyphenation: Regex::new(r"(\w+)-\s*\n\s*(\w+)").unwrap(),
            heading_tag: Regex::new(r"(?is)<h[1-3][^>]*>(.*?)</h[1-3]>").unwrap(),
            title_tag: Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap(),
            aggressive,
        }
    }

    /// Splits on blank lines and cleans each paragraph; empty ones vanish.
    pub fn paragraphs(&self, text: &str) -> Vec<String> {
        let text = if self.aggressive {
            self.hyphenation.replace_all(text, "$1$2").into_owned()
        } else {
            text.to_string()
        };

        self.paragraph_break
            .split(&text)
            .map(|p| self.clean_text(p))
            .filter(|p| !p.is_empty() && p.chars().any(char::is_alphanumeric))
            .collect()
    }

    pub fn clean_text(&self, text: &str) -> String {
        let mut cleaned = text.to_string();

        for (regex, replacement) in &self.cleanup_regex {
            cleaned = regex.replace_all(&cleaned, *replacement).into_owned();
        }

        if self.aggressive {
            for (regex, expansion) in &self.abbreviations {
                cleaned = regex.replace_all(&cleaned, *expansion).into_owned();
            }
        }

        cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// First h1-h3 heading, else a `<title>` that is not a file name.
    pub fn extract_title(&self, html: &str) -> Option<String> {
        let heading = self
            .heading_tag
            .captures_iter(html)
            .map(|caps| self.inline_text(&caps[1]))
            .find(|text| !text.is_empty());
        if heading.is_some() {
            return heading;
        }

        let title = self.inline_text(&self.title_tag.captures(html)?[1]);
        let lower = title.to_lowercase();
        if title.is_empty()
            || lower.ends_with(".xhtml")
            || lower.ends_with(".html")
            || lower == "converted ebook"
        {
            return None;
        }
        Some(title)
    }

    fn inline_text(&self, fragment: &str) -> String {
        let text = from_read(fragment.as_bytes(), HTML_WIDTH);
        self.clean_text(&text)
    }
}

impl Default for TextCleaner {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAPTER_HTML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html><head><title>ch001.xhtml</title></head>
<body>
<h1>The Beginning</h1>
<p>Mr. Smith walked   into the room. He saw
the <em>letter</em> at once.</p>
<p>Visit https://example.com for more.</p>
<p>   </p>
<p>It was page 12 of a long story.</p>
</body></html>"#;

    #[test]
    fn extracts_heading_title_and_paragraphs() {
        let cleaner = TextCleaner::default();
        let chapter = chapter_from_html(CHAPTER_HTML, 0, &cleaner);

        assert_eq!(chapter.title, "The Beginning");
        assert!(chapter
            .paragraphs
            .iter()
            .any(|p| p == "Mister Smith walked into the room. He saw the letter at once."));
        assert!(chapter.paragraphs.iter().any(|p| p == "Visit URL Link for more."));
        assert!(chapter.paragraphs.iter().all(|p| !p.trim().is_empty()));
        assert!(chapter.paragraphs.iter().all(|p| !p.contains("page 12")));
    }

    #[test]
    fn file_name_titles_are_rejected() {
        let cleaner = TextCleaner::default();
        assert_eq!(cleaner.extract_title("<title>ch002.xhtml</title><p>x</p>"), None);
        assert_eq!(
            cleaner.extract_title("<title>Second Part</title>"),
            Some("Second Part".to_string())
        );
    }

    #[test]
    fn falls_back_to_first_paragraph_then_number() {
        let cleaner = TextCleaner::default();
        let chapter = chapter_from_html("<p>Opening line.</p><p>More.</p>", 4, &cleaner);
        assert_eq!(chapter.title, "Opening line.");

        let empty = chapter_from_html("<div></div>", 4, &cleaner);
        assert_eq!(empty.title, "Chapter 5");
        assert!(empty.paragraphs.is_empty());
    }

    #[test]
    fn abbreviations_only_in_aggressive_mode() {
        let gentle = TextCleaner::new(false);
        assert_eq!(gentle.clean_text("Dr. Who"), "Dr. Who");
        let aggressive = TextCleaner::new(true);
        assert_eq!(aggressive.clean_text("Dr. Who, e.g. him"), "Doctor Who, for example him");
    }

    #[test]
    fn captions_and_links_are_not_read() {
        let cleaner = TextCleaner::default();
        assert_eq!(cleaner.clean_text("Figure 3.1 The engine room"), "...");
        assert_eq!(cleaner.clean_text("See [the docs][2] first."), "See the docs first.");
        assert_eq!(cleaner.clean_text("“Quoted” — yes"), "\"Quoted\" - yes");
    }

    #[test]
    fn announcements() {
        assert_eq!(chapter_announcement(3, "The Storm"), "Chapter 3: The Storm");
        assert_eq!(chapter_announcement(1, "Prologue"), "Prologue");
        assert_eq!(chapter_announcement(2, "Chapter Two"), "Chapter Two");
    }

    #[test]
    fn assemble_filters_navigation_and_adds_introduction() {
        let metadata = BookMetadata {
            title: "Moby Dick".into(),
            author: "Herman Melville".into(),
            ..Default::default()
        };
        let raw = vec![
            SourceChapter {
                title: "Moby Dick".into(),
                paragraphs: vec!["Moby Dick".into()],
            },
            SourceChapter {
                title: "Table of Contents".into(),
                paragraphs: vec!["Loomings".into()],
            },
            SourceChapter {
                title: "Loomings".into(),
                paragraphs: vec!["Call me Ishmael.".into()],
            },
        ];

        let book = Book::assemble(metadata, raw, None);
        let titles: Vec<_> = book.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Introduction", "Loomings"]);
        assert_eq!(
            book.chapters[0].paragraphs,
            vec!["Moby Dick written by Herman Melville."]
        );
    }

    #[test]
    fn no_introduction_without_author() {
        let metadata = BookMetadata {
            title: "Anonymous".into(),
            ..Default::default()
        };
        let book = Book::assemble(metadata, Vec::new(), None);
        assert!(book.chapters.is_empty());
    }

    #[test]
    fn cover_extensions() {
        let cover = CoverImage {
            data: vec![1],
            mime: "image/png".into(),
        };
        assert_eq!(cover.extension(), "png");
    }
}
