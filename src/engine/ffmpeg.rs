use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::debug;

use super::{AudioEngine, AudioFormat, EncodeRequest};
use crate::error::{Error, Result};

/// ffmpeg and ffprobe subprocesses.
pub struct FfmpegEngine {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn run_ffmpeg(&self, args: &[String]) -> std::result::Result<(), String> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!("running {:?}", cmd);
        let output = cmd.output().map_err(|e| format!("{}: {e}", self.ffmpeg))?;
        if !output.status.success() {
            return Err(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

impl AudioEngine for FfmpegEngine {
    fn concat(&self, ordered: &[PathBuf], dest: &Path) -> Result<()> {
        if ordered.is_empty() {
            return Err(Error::Concat("no input files provided".into()));
        }
        for input in ordered {
            if !input.exists() {
                return Err(Error::Concat(format!(
                    "input file does not exist: {}",
                    input.display()
                )));
            }
        }

        let list_dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut list = tempfile::Builder::new()
            .prefix("filelist-")
            .suffix(".txt")
            .tempfile_in(list_dir)?;
        list.write_all(concat_list(ordered)?.as_bytes())?;
        list.flush()?;

        let args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list.path().to_string_lossy().into_owned(),
            "-c".to_string(),
            "copy".to_string(),
            dest.to_string_lossy().into_owned(),
        ];

        self.run_ffmpeg(&args).map_err(Error::Concat)
    }

    fn duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Duration {
                path: path.to_path_buf(),
                reason: format!("{}: {e}", self.ffprobe),
            })?;

        if !output.status.success() {
            return Err(Error::Duration {
                path: path.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| Error::Duration {
            path: path.to_path_buf(),
            reason: "ffprobe returned no duration".into(),
        })
    }

    fn encode(&self, request: &EncodeRequest) -> Result<()> {
        self.run_ffmpeg(&encode_args(request)).map_err(Error::Encode)
    }
}

/// Body of an ffmpeg concat demuxer list. Paths are absolute and quoted.
fn concat_list(files: &[PathBuf]) -> std::io::Result<String> {
    let mut body = String::new();
    for file in files {
        let absolute = std::path::absolute(file)?;
        let escaped = absolute.to_string_lossy().replace('\'', r"'\''");
        body.push_str(&format!("file '{escaped}'\n"));
    }
    Ok(body)
}

fn parse_duration(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}

fn encode_args(request: &EncodeRequest) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-i".into(), path_arg(&request.raw_audio)];
    args.extend(["-f".into(), "ffmetadata".into(), "-i".into(), path_arg(&request.metadata)]);

    let cover = match request.format {
        AudioFormat::Wav => None,
        _ => request.cover_image.as_ref(),
    };
    if let Some(cover) = cover {
        args.push("-i".into());
        args.push(path_arg(cover));
    }

    args.extend(["-map".into(), "0:a".into()]);
    if cover.is_some() {
        args.extend(["-map".into(), "2:v".into()]);
    }
    args.extend(["-map_metadata".into(), "1".into(), "-map_chapters".into(), "1".into()]);

    let codec: &[&str] = match request.format {
        AudioFormat::M4b => &["-c:a", "aac", "-b:a", "64k"],
        AudioFormat::Mp3 => &["-c:a", "libmp3lame", "-b:a", "128k", "-id3v2_version", "3", "-write_id3v1", "1"],
        AudioFormat::M4a => &["-c:a", "aac", "-b:a", "96k"],
        AudioFormat::Wav => &["-c:a", "pcm_s16le", "-ar", "44100", "-ac", "2"],
    };
    args.extend(codec.iter().map(|s| s.to_string()));

    if cover.is_some() {
        let image_codec = match request.format {
            AudioFormat::Mp3 => "mjpeg",
            _ => "png",
        };
        args.extend([
            "-c:v".into(),
            image_codec.into(),
            "-disposition:v:0".into(),
            "attached_pic".into(),
        ]);
    }

    if request.format == AudioFormat::M4b {
        args.extend(["-f".into(), "ipod".into()]);
    }

    args.push(path_arg(&request.dest));
    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
