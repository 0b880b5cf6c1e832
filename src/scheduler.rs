//! Concurrent, resumable synthesis of one chapter's units.
//!
//! Units whose audio already exists are cache hits. The rest go to a
//! dedicated rayon pool with exactly `concurrency` threads, so no more than
//! that many engine calls are ever in flight. Each unit is retried in place,
//! and a unit that runs out of attempts is reported without disturbing its
//! siblings.

use std::fs;
use std::sync::Arc;

use log::{debug, error, warn};
use rayon::prelude::*;

use crate::cancel::Cancellation;
use crate::engine::SpeechEngine;
use crate::error::{Error, Result, UnitFailure};
use crate::model::Unit;
use crate::progress::ProgressSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    concurrency: usize,
    max_retries: usize,
}

impl SchedulerConfig {
    /// A concurrency of zero is raised to one; it never means unlimited.
    pub fn new(concurrency: usize, max_retries: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            max_retries,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Total tries per unit. `max_retries` counts every try, including the
    /// first, and zero still means one.
    pub fn attempts(&self) -> usize {
        self.max_retries.max(1)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(num_cpus::get().min(4), 3)
    }
}

/// What happened to each unit of one `synthesize` call, by unit index.
#[derive(Debug, Default)]
pub struct SynthesisReport {
    pub cached: Vec<usize>,
    pub synthesized: Vec<usize>,
    pub failures: Vec<UnitFailure>,
    /// Stopped by cancellation, whether or not an attempt was made.
    pub cancelled: Vec<usize>,
    /// Cancelled units that had already failed at least once, with the
    /// attempts made and the last error.
    pub interrupted: Vec<UnitFailure>,
}

impl SynthesisReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.cached.len() + self.synthesized.len()
    }
}

enum Outcome {
    Synthesized(usize),
    Failed(UnitFailure),
    Cancelled(usize),
    Interrupted(UnitFailure),
}

pub struct Scheduler {
    config: SchedulerConfig,
    engine: Arc<dyn SpeechEngine>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, engine: Arc<dyn SpeechEngine>) -> Self {
        Self { config, engine }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Synthesizes every unit whose audio is missing. Returns once all
    /// launched work has finished; unit failures are in the report, only
    /// pool setup errors are returned as `Err`.
    pub fn synthesize(
        &self,
        units: &[Unit],
        cancel: &Cancellation,
        progress: &dyn ProgressSink,
    ) -> Result<SynthesisReport> {
        let mut report = SynthesisReport::default();
        let mut pending = Vec::new();

        for unit in units {
            if unit.output_path.exists() {
                debug!("unit {} cached at {}", unit.index, unit.output_path.display());
                report.cached.push(unit.index);
                progress.unit_finished(chapter_of(unit), unit.index, true);
            } else {
                pending.push(unit);
            }
        }

        if pending.is_empty() {
            return Ok(report);
        }

        if let Some(dir) = pending[0].output_path.parent() {
            fs::create_dir_all(dir).map_err(|source| Error::WorkDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency)
            .thread_name(|i| format!("tts-worker-{i}"))
            .build()?;

        let outcomes: Vec<Outcome> = pool.install(|| {
            pending
                .par_iter()
                .map(|unit| {
                    let outcome = self.run_unit(unit, cancel);
                    if !matches!(outcome, Outcome::Cancelled(_) | Outcome::Interrupted(_)) {
                        progress.unit_finished(chapter_of(unit), unit.index, false);
                    }
                    outcome
                })
                .collect()
        });

        for outcome in outcomes {
            match outcome {
                Outcome::Synthesized(index) => report.synthesized.push(index),
                Outcome::Failed(failure) => report.failures.push(failure),
                Outcome::Cancelled(index) => report.cancelled.push(index),
                Outcome::Interrupted(failure) => {
                    report.cancelled.push(failure.index);
                    report.interrupted.push(failure);
                }
            }
        }

        Ok(report)
    }

    fn run_unit(&self, unit: &Unit, cancel: &Cancellation) -> Outcome {
        let attempts = self.config.attempts();
        let mut last_error = None;
        let mut made = 0;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                break;
            }
            made = attempt;

            match self.attempt(unit) {
                Ok(()) => return Outcome::Synthesized(unit.index),
                Err(err) => {
                    warn!(
                        "TTS failed for unit {} (attempt {attempt}/{attempts}): {err}",
                        unit.index
                    );
                    discard_partial(unit);
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(error) if made == attempts || !cancel.is_cancelled() => {
                error!(
                    "unit {} failed after {made} attempt(s): {error}",
                    unit.index
                );
                Outcome::Failed(UnitFailure {
                    index: unit.index,
                    attempts: made,
                    error,
                })
            }
            Some(error) => {
                warn!(
                    "unit {} cancelled after {made}/{attempts} attempt(s), last error: {error}",
                    unit.index
                );
                Outcome::Interrupted(UnitFailure {
                    index: unit.index,
                    attempts: made,
                    error,
                })
            }
            None => Outcome::Cancelled(unit.index),
        }
    }

    fn attempt(&self, unit: &Unit) -> Result<()> {
        let output = self.engine.synthesize(&unit.text, &unit.output_path)?;
        if !output.is_empty() {
            debug!(
                "{} output for unit {}: {}",
                self.engine.name(),
                unit.index,
                String::from_utf8_lossy(&output).trim()
            );
        }

        match fs::metadata(&unit.output_path) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(Error::EmptyOutput(unit.output_path.clone())),
        }
    }
}

fn discard_partial(unit: &Unit) {
    if unit.output_path.exists() {
        if let Err(err) = fs::remove_file(&unit.output_path) {
            warn!(
                "could not remove partial output {}: {err}",
                unit.output_path.display()
            );
        }
    }
}

/// Chapter ordinal encoded in the unit's file name, 0 if it has none.
fn chapter_of(unit: &Unit) -> usize {
    unit.output_path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(crate::model::parse_unit_file_name)
        .map(|(chapter, _)| chapter)
        .unwrap_or(0)
}
