use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::engine::AudioEngine;
use crate::error::{Error, Result};
use crate::model::{unit_files_for_chapter, Unit};

/// Joins a chapter's unit audio, in index order, into one chapter file.
pub struct Assembler {
    audio: Arc<dyn AudioEngine>,
}

impl Assembler {
    pub fn new(audio: Arc<dyn AudioEngine>) -> Self {
        Self { audio }
    }

    /// All unit files must exist. On success they are deleted; on failure
    /// they stay so the next run can reuse them. `dest` only appears once
    /// the join is complete, so a half-written chapter is never mistaken
    /// for a cached one.
    pub fn assemble(&self, units: &[Unit], dest: &Path) -> Result<()> {
        if units.is_empty() {
            return Err(Error::NothingToAssemble(dest.to_path_buf()));
        }

        let mut ordered: Vec<&Unit> = units.iter().collect();
        ordered.sort_by_key(|unit| unit.index);

        for unit in &ordered {
            if !unit.output_path.is_file() {
                return Err(Error::MissingUnitAudio {
                    index: unit.index,
                    path: unit.output_path.clone(),
                });
            }
        }

        let paths: Vec<PathBuf> = ordered.iter().map(|u| u.output_path.clone()).collect();
        debug!("concatenating {} units into {}", paths.len(), dest.display());
        let staging = staging_path(dest);
        if let Err(err) = self.audio.concat(&paths, &staging) {
            if staging.exists() {
                remove_quietly(&staging);
            }
            return Err(err);
        }
        fs::rename(&staging, dest)?;

        for path in &paths {
            remove_quietly(path);
        }

        Ok(())
    }

    /// Removes unit files of `chapter` that earlier runs left in `dir`,
    /// such as audio for text that has since been re-segmented.
    pub fn sweep_stale(&self, dir: &Path, chapter: usize) {
        match unit_files_for_chapter(dir, chapter) {
            Ok(stale) => {
                for path in stale {
                    debug!("removing stale unit file {}", path.display());
                    remove_quietly(&path);
                }
            }
            Err(err) => warn!("could not scan {} for stale units: {err}", dir.display()),
        }
    }
}

fn staging_path(dest: &Path) -> PathBuf {
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match dest.extension() {
        Some(ext) => format!("{stem}.partial.{}", ext.to_string_lossy()),
        None => format!("{stem}.partial"),
    };
    dest.with_file_name(name)
}

fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!("could not remove {}: {err}", path.display());
    }
}
