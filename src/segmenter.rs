//! Splits chapter text into units the speech engine can take in one call.
//!
//! Paragraphs that fit the budget pass through untouched. Longer paragraphs
//! are cut at sentence ends, and sentences that are still too long are packed
//! greedily from their comma clauses (falling back to words for a clause with
//! no commas). A single token longer than the budget is emitted whole and
//! flagged rather than truncated.

use log::warn;
use regex::Regex;

use crate::model::{Unit, UnitLayout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub oversized: bool,
}

impl Segment {
    fn fitting(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            oversized: false,
        }
    }
}

pub struct Segmenter {
    max_chars: usize,
    sentence_boundary: Regex,
    whitespace: Regex,
}

impl Segmenter {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            sentence_boundary: Regex::new(r"[.!?]+(\s+)\p{Lu}").unwrap(),
            whitespace: Regex::new(r"\s+").unwrap(),
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Turns one chapter's paragraphs into ordered units with stable paths.
    pub fn units<S: AsRef<str>>(
        &self,
        chapter: usize,
        paragraphs: &[S],
        layout: &UnitLayout,
    ) -> Vec<Unit> {
        self.segment(paragraphs)
            .into_iter()
            .enumerate()
            .map(|(index, segment)| {
                if segment.oversized {
                    warn!(
                        "chapter {chapter} unit {index} is {} chars, over the {} char budget, and cannot be split",
                        char_len(&segment.text),
                        self.max_chars
                    );
                }
                Unit {
                    index,
                    output_path: layout.path_for(chapter, index, &segment.text),
                    text: segment.text,
                    oversized: segment.oversized,
                }
            })
            .collect()
    }

    pub fn segment<S: AsRef<str>>(&self, paragraphs: &[S]) -> Vec<Segment> {
        let mut out = Vec::new();

        for paragraph in paragraphs {
            let text = self.normalize(paragraph.as_ref());
            if text.is_empty() {
                continue;
            }

            if char_len(&text) <= self.max_chars {
                out.push(Segment::fitting(text));
                continue;
            }

            for sentence in self.split_sentences(&text) {
                if char_len(sentence) <= self.max_chars {
                    out.push(Segment::fitting(sentence));
                } else {
                    self.split_long(sentence, &mut out);
                }
            }
        }

        out
    }

    /// Cuts at `.`, `!` or `?` followed by whitespace and an upper-case letter.
    pub fn split_sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut sentences = Vec::new();
        let mut start = 0;

        for caps in self.sentence_boundary.captures_iter(text) {
            let gap = caps.get(1).expect("boundary always has a gap");
            let sentence = text[start..gap.start()].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = gap.end();
        }

        let rest = text[start..].trim();
        if !rest.is_empty() {
            sentences.push(rest);
        }

        sentences
    }

    fn normalize(&self, text: &str) -> String {
        self.whitespace.replace_all(text.trim(), " ").into_owned()
    }

    fn split_long(&self, sentence: &str, out: &mut Vec<Segment>) {
        let mut packer = Packer::new(self.max_chars);

        for clause in sentence.split_inclusive(',') {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }

            if char_len(clause) > self.max_chars && clause.contains(' ') {
                // word packing starts and ends on the clause boundary
                packer.flush(out);
                for word in clause.split(' ').filter(|word| !word.is_empty()) {
                    packer.push(word, out);
                }
                packer.flush(out);
            } else {
                packer.push(clause, out);
            }
        }

        packer.flush(out);
    }
}

/// Greedy accumulator: joins pieces with a space until the next one would
/// overflow the budget.
struct Packer {
    max_chars: usize,
    current: String,
    current_len: usize,
}

impl Packer {
    fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            current: String::new(),
            current_len: 0,
        }
    }

    fn push(&mut self, piece: &str, out: &mut Vec<Segment>) {
        let piece_len = char_len(piece);

        if piece_len > self.max_chars {
            self.flush(out);
            out.push(Segment {
                text: piece.to_string(),
                oversized: true,
            });
            return;
        }

        if !self.current.is_empty() && self.current_len + 1 + piece_len > self.max_chars {
            self.flush(out);
        }

        if !self.current.is_empty() {
            self.current.push(' ');
            self.current_len += 1;
        }
        self.current.push_str(piece);
        self.current_len += piece_len;
    }

    fn flush(&mut self, out: &mut Vec<Segment>) {
        if !self.current.is_empty() {
            out.push(Segment::fitting(std::mem::take(&mut self.current)));
        }
        self.current_len = 0;
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CacheKey;

    fn texts(segments: &[Segment]) -> Vec<&str> {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn short_paragraphs_pass_through() {
        let segmenter = Segmenter::new(250);
        let segments = segmenter.segment(&["First paragraph.", "Second one. Still short."]);
        assert_eq!(
            texts(&segments),
            vec!["First paragraph.", "Second one. Still short."]
        );
        assert!(segments.iter().all(|s| !s.oversized));
    }

    #[test]
    fn empty_paragraphs_are_dropped() {
        let segmenter = Segmenter::new(250);
        let segments = segmenter.segment(&["", "   ", "\n\t", "Words."]);
        assert_eq!(texts(&segments), vec!["Words."]);
        assert!(segmenter.segment::<&str>(&[]).is_empty());
    }

    #[test]
    fn whitespace_is_normalized() {
        let segmenter = Segmenter::new(250);
        let segments = segmenter.segment(&["  Many\n   spaces\there.  "]);
        assert_eq!(texts(&segments), vec!["Many spaces here."]);
    }

    #[test]
    fn long_paragraph_splits_on_sentences() {
        let sentence = "The quick brown fox jumps over the lazy dog near the riverbank today.";
        let paragraph = vec![sentence; 9].join(" ");
        assert!(paragraph.len() >= 600);

        let segmenter = Segmenter::new(250);
        let segments = segmenter.segment(&[paragraph.as_str()]);

        assert!(segments.len() >= 3);
        for segment in &segments {
            assert!(segment.text.chars().count() <= 250);
            assert_eq!(segment.text, sentence);
        }
    }

    #[test]
    fn sentence_boundary_needs_capital() {
        let segmenter = Segmenter::new(250);
        let sentences = segmenter.split_sentences("Dr. Smith went home. then he slept! Did he? Yes.");
        assert_eq!(
            sentences,
            vec!["Dr.", "Smith went home. then he slept!", "Did he?", "Yes."]
        );
    }

    #[test]
    fn ellipsis_counts_as_one_boundary() {
        let segmenter = Segmenter::new(250);
        let sentences = segmenter.split_sentences("Wait... What happened?! Nothing.");
        assert_eq!(sentences, vec!["Wait...", "What happened?!", "Nothing."]);
    }

    #[test]
    fn commas_are_packed_greedily() {
        let segmenter = Segmenter::new(30);
        let segments =
            segmenter.segment(&["alpha beta, gamma delta, epsilon zeta, eta theta, iota kappa"]);

        assert_eq!(
            texts(&segments),
            vec![
                "alpha beta, gamma delta,",
                "epsilon zeta, eta theta,",
                "iota kappa"
            ]
        );
    }

    #[test]
    fn clause_without_commas_falls_back_to_words() {
        let segmenter = Segmenter::new(20);
        let segments = segmenter.segment(&["one two three four five six seven eight nine ten"]);

        for segment in &segments {
            assert!(segment.text.chars().count() <= 20, "{segment:?}");
            assert!(!segment.oversized);
        }
        let rebuilt = texts(&segments).join(" ");
        assert_eq!(rebuilt, "one two three four five six seven eight nine ten");
    }

    #[test]
    fn unsplittable_token_passes_through_flagged() {
        let segmenter = Segmenter::new(10);
        let token = "Supercalifragilisticexpialidocious";
        let segments = segmenter.segment(&[format!("Hi, {token}, bye").as_str()]);

        assert_eq!(texts(&segments), vec!["Hi,", "Supercalifragilisticexpialidocious,", "bye"]);
        assert!(!segments[0].oversized);
        assert!(segments[1].oversized);
        assert!(!segments[2].oversized);
    }

    #[test]
    fn budget_counts_characters_not_bytes() {
        let segmenter = Segmenter::new(5);
        let segments = segmenter.segment(&["ééééé"]);
        assert_eq!(texts(&segments), vec!["ééééé"]);
        assert!(!segments[0].oversized);
    }

    #[test]
    fn unit_order_rebuilds_chapter_text() {
        let paragraphs = vec![
            "Call me Ishmael. Some years ago, never mind how long precisely, having little or no money in my purse, and nothing particular to interest me on shore, I thought I would sail about a little and see the watery part of the world.".to_string(),
            "It is a way I have of driving off the spleen and regulating the circulation.".to_string(),
        ];
        let segmenter = Segmenter::new(60);
        let segments = segmenter.segment(&paragraphs);

        assert!(segments.iter().all(|s| s.text.chars().count() <= 60));
        assert_eq!(texts(&segments).join(" "), paragraphs.join(" "));
    }

    #[test]
    fn units_are_dense_and_stable() {
        let layout = UnitLayout::new("work/units", CacheKey::Ordinal);
        let segmenter = Segmenter::new(250);
        let paragraphs = ["One.", "", "Two.", "Three."];

        let first = segmenter.units(4, &paragraphs, &layout);
        let second = segmenter.units(4, &paragraphs, &layout);

        assert_eq!(first, second);
        let indices: Vec<_> = first.iter().map(|u| u.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(first[2]
            .output_path
            .ends_with("chapter-0004-unit-00002.wav"));
    }

    #[test]
    fn zero_budget_is_raised_to_one() {
        assert_eq!(Segmenter::new(0).max_chars(), 1);
    }
}
