//! Side-channel progress reporting. Nothing here can fail a run.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The chapter has no text.
    Empty,
    /// Finish mode and no chapter audio exists yet.
    NotSynthesized,
}

pub trait ProgressSink: Send + Sync {
    fn chapter_started(&self, _ordinal: usize, _title: &str, _units: usize) {}

    /// `cached` is true when the unit's audio already existed.
    fn unit_finished(&self, _ordinal: usize, _index: usize, _cached: bool) {}

    fn chapter_cached(&self, _ordinal: usize, _title: &str) {}

    fn chapter_skipped(&self, _ordinal: usize, _title: &str, _reason: SkipReason) {}

    fn chapter_completed(&self, _ordinal: usize, _title: &str) {}

    fn chapter_failed(&self, _ordinal: usize, _title: &str) {}

    fn finalizing(&self, _step: &str) {}
}

pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Reports through the `log` facade.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn chapter_started(&self, ordinal: usize, title: &str, units: usize) {
        info!("Processing chapter {ordinal}: {title} ({units} units)");
    }

    fn chapter_cached(&self, ordinal: usize, title: &str) {
        info!("Chapter {ordinal} (cached): {title}");
    }

    fn chapter_skipped(&self, ordinal: usize, title: &str, reason: SkipReason) {
        match reason {
            SkipReason::Empty => info!("Chapter {ordinal} has no text, skipping: {title}"),
            SkipReason::NotSynthesized => {
                info!("Chapter {ordinal} not synthesized yet, leaving it out: {title}")
            }
        }
    }

    fn chapter_completed(&self, ordinal: usize, title: &str) {
        info!("Chapter {ordinal} completed: {title}");
    }

    fn finalizing(&self, step: &str) {
        info!("{step}");
    }
}

/// Terminal progress bar, one bar per chapter.
pub struct BarProgress {
    current: Mutex<Option<ProgressBar>>,
    style: ProgressStyle,
}

impl BarProgress {
    pub fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>5}/{len:5} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ");
        Self {
            current: Mutex::new(None),
            style,
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.current.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }

    fn finish_current(&self, message: String) {
        if let Ok(mut guard) = self.current.lock() {
            if let Some(bar) = guard.take() {
                bar.finish_with_message(message);
            }
        }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn chapter_started(&self, ordinal: usize, title: &str, units: usize) {
        let bar = ProgressBar::new(units as u64);
        bar.set_style(self.style.clone());
        bar.set_message(format!("Processing - Chapter {ordinal}: {title}"));
        if let Ok(mut guard) = self.current.lock() {
            if let Some(previous) = guard.replace(bar) {
                previous.abandon();
            }
        }
    }

    fn unit_finished(&self, _ordinal: usize, _index: usize, _cached: bool) {
        self.with_bar(|bar| bar.inc(1));
    }

    fn chapter_cached(&self, ordinal: usize, title: &str) {
        let bar = ProgressBar::new(1);
        bar.set_style(self.style.clone());
        bar.finish_with_message(format!("✅ Chapter {ordinal} (cached): {title}"));
    }

    fn chapter_skipped(&self, ordinal: usize, title: &str, reason: SkipReason) {
        LogProgress.chapter_skipped(ordinal, title, reason);
    }

    fn chapter_completed(&self, ordinal: usize, title: &str) {
        self.finish_current(format!("✅ Chapter {ordinal} completed: {title}"));
    }

    fn chapter_failed(&self, ordinal: usize, title: &str) {
        self.finish_current(format!("❌ Chapter {ordinal} failed: {title}"));
    }

    fn finalizing(&self, step: &str) {
        println!("📝 {step}");
    }
}
