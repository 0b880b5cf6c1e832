use std::fs;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::debug;

use super::{AudioEngine, AudioFormat, EncodeRequest};
use crate::error::{Error, Result};

/// Pure-Rust backend for PCM WAV files that share one format.
///
/// Concatenation appends samples without conversion, durations come from the
/// sample count, and only WAV output is supported (chapter metadata and cover
/// art cannot be embedded).
#[derive(Debug, Default, Clone, Copy)]
pub struct WavEngine;

impl WavEngine {
    pub fn new() -> Self {
        Self
    }
}

impl AudioEngine for WavEngine {
    fn concat(&self, ordered: &[PathBuf], dest: &Path) -> Result<()> {
        let first = ordered
            .first()
            .ok_or_else(|| Error::Concat("no input files provided".into()))?;
        let spec = WavReader::open(first)
            .map_err(|e| Error::Concat(format!("{}: {e}", first.display())))?
            .spec();

        let mut writer = WavWriter::create(dest, spec)?;
        for input in ordered {
            let reader = WavReader::open(input)
                .map_err(|e| Error::Concat(format!("{}: {e}", input.display())))?;
            if reader.spec() != spec {
                return Err(Error::Concat(format!(
                    "{} is {:?}, expected {:?}",
                    input.display(),
                    reader.spec(),
                    spec
                )));
            }
            append_samples(reader, &mut writer, spec)?;
        }
        writer.finalize()?;
        Ok(())
    }

    fn duration(&self, path: &Path) -> Result<f64> {
        let reader = WavReader::open(path).map_err(|e| Error::Duration {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return Err(Error::Duration {
                path: path.to_path_buf(),
                reason: "sample rate is zero".into(),
            });
        }
        Ok(reader.duration() as f64 / spec.sample_rate as f64)
    }

    fn encode(&self, request: &EncodeRequest) -> Result<()> {
        if request.format != AudioFormat::Wav {
            return Err(Error::Encode(format!(
                "the native backend only writes wav, not {}",
                request.format.extension()
            )));
        }
        debug!(
            "native encode copies {} without chapter metadata",
            request.raw_audio.display()
        );
        fs::copy(&request.raw_audio, &request.dest)?;
        Ok(())
    }
}

fn append_samples<R: Read, W: Write + Seek>(
    mut reader: WavReader<R>,
    writer: &mut WavWriter<W>,
    spec: WavSpec,
) -> Result<()> {
    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => {
            for sample in reader.samples::<f32>() {
                writer.write_sample(sample?)?;
            }
        }
        (SampleFormat::Int, bits) if bits <= 16 => {
            for sample in reader.samples::<i16>() {
                writer.write_sample(sample?)?;
            }
        }
        (SampleFormat::Int, _) => {
            for sample in reader.samples::<i32>() {
                writer.write_sample(sample?)?;
            }
        }
    }
    Ok(())
}
