use std::error::Error as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Arg, ArgAction, ArgMatches, Command};
use log::warn;

use narrator::engine::program_available;
use narrator::{
    detect_speech_engine, AudioBackend, AudioFormat, BarProgress, Book, Cancellation, Config,
    EngineKind, Error, LogProgress, Pipeline, ProgressSink, Result, RunOptions, SpeechEngine,
    TextCleaner,
};

/// Stands in for a speech engine when only finished chapters are used.
struct NoSpeech;

impl SpeechEngine for NoSpeech {
    fn synthesize(&self, _text: &str, _output: &Path) -> Result<Vec<u8>> {
        Err(Error::EngineNotFound("speech engine (finish mode)".into()))
    }

    fn name(&self) -> &str {
        "none"
    }
}

fn cli() -> Command {
    Command::new("EPUB Narrator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Converts EPUB files to chaptered audiobooks with an external TTS engine")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .help("Input EPUB file (overrides epub.path)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory (overrides output.dir)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file [default: config.json if present]")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .help("Output audio format")
                .value_parser(["m4b", "mp3", "m4a", "aac", "wav"]),
        )
        .arg(
            Arg::new("cover")
                .long("cover")
                .value_name("IMAGE")
                .help("Cover image to embed instead of the EPUB's own")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("NUM")
                .help("Concurrent synthesis calls")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("retries")
                .long("retries")
                .value_name("NUM")
                .help("Synthesis attempts per unit, the first one included")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("max-chars")
                .long("max-chars")
                .value_name("NUM")
                .help("Character budget per synthesis call")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("engine")
                .long("engine")
                .value_name("ENGINE")
                .help("Speech engine")
                .value_parser(["auto", "coqui", "espeak"]),
        )
        .arg(
            Arg::new("audio-backend")
                .long("audio-backend")
                .value_name("BACKEND")
                .help("Audio backend for joining and encoding")
                .value_parser(["ffmpeg", "native"]),
        )
        .arg(
            Arg::new("reset")
                .long("reset")
                .help("Discard previous progress and start over")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("finish")
                .long("finish")
                .help("Build the audiobook from chapters already synthesized")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-progress")
                .long("no-progress")
                .help("Log progress instead of drawing progress bars")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Debug logging")
                .action(ArgAction::SetTrue),
        )
}

fn apply_overrides(config: &mut Config, matches: &ArgMatches) -> Result<()> {
    if let Some(input) = matches.get_one::<PathBuf>("input") {
        config.epub.path = Some(input.clone());
    }
    if let Some(output) = matches.get_one::<PathBuf>("output") {
        config.output.dir = output.clone();
    }
    if let Some(cover) = matches.get_one::<PathBuf>("cover") {
        config.epub.cover_image = Some(cover.clone());
    }
    if let Some(format) = matches.get_one::<String>("format") {
        config.output.format = AudioFormat::parse(format)
            .ok_or_else(|| Error::Config(format!("unknown format {format}")))?;
    }
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config.tts.concurrency = *workers;
    }
    if let Some(retries) = matches.get_one::<usize>("retries") {
        config.tts.max_retries = *retries;
    }
    if let Some(max_chars) = matches.get_one::<usize>("max-chars") {
        config.tts.max_chars = *max_chars;
    }
    if let Some(engine) = matches.get_one::<String>("engine") {
        config.tts.engine = EngineKind::parse(engine)
            .ok_or_else(|| Error::Config(format!("unknown engine {engine}")))?;
    }
    if let Some(backend) = matches.get_one::<String>("audio-backend") {
        config.audio.backend = AudioBackend::parse(backend)
            .ok_or_else(|| Error::Config(format!("unknown audio backend {backend}")))?;
    }
    if matches.get_flag("verbose") {
        config.verbose_logs = true;
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

async fn run(matches: ArgMatches) -> Result<()> {
    let mut config = Config::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    apply_overrides(&mut config, &matches)?;
    init_logging(config.verbose_logs);
    config.validate()?;

    let options = RunOptions {
        reset: matches.get_flag("reset"),
        finish: matches.get_flag("finish"),
    };

    println!("🔄 Initializing EPUB Narrator...");
    let start_time = Instant::now();

    let epub_path = config
        .epub
        .path
        .clone()
        .ok_or_else(|| Error::Config("no EPUB file given".into()))?;
    println!("📖 Extracting chapters from {}...", epub_path.display());
    let book = Book::from_epub(&epub_path, &TextCleaner::new(config.preprocessing_aggressive))?;
    println!("✅ Found {} chapters", book.chapters.len());

    let speech: Arc<dyn SpeechEngine> = if options.finish {
        Arc::new(NoSpeech)
    } else {
        detect_speech_engine(
            config.tts.engine,
            config.tts.coqui.clone(),
            config.tts.voice_speed,
            config.tts.voice_pitch,
        )?
    };
    if config.audio.backend == AudioBackend::Ffmpeg {
        for program in ["ffmpeg", "ffprobe"] {
            if !program_available(program) {
                return Err(Error::EngineNotFound(program.into()));
            }
        }
    }

    let progress: Arc<dyn ProgressSink> = if matches.get_flag("no-progress") {
        Arc::new(LogProgress)
    } else {
        Arc::new(BarProgress::new())
    };
    let pipeline = Pipeline::new(
        config.pipeline_config(),
        speech,
        config.audio.backend.engine(),
        progress,
    );

    let cancel = Cancellation::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, waiting for running synthesis calls to finish");
                cancel.cancel();
            }
        })
    };

    println!("🎤 Converting chapters to audio...");
    let outcome = tokio::task::spawn_blocking(move || pipeline.run(&book, options, &cancel))
        .await
        .map_err(|e| Error::Io(e.into()))?;
    interrupt.abort();
    let summary = outcome?;

    println!("✅ Conversion completed in {:.2?}", start_time.elapsed());
    println!(
        "📊 {} chapters, {} units synthesized, {} reused",
        summary.timeline.len(),
        summary.synthesized_units,
        summary.cached_units
    );
    println!("📁 Output saved to: {}", summary.output.display());
    Ok(())
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    if let Err(err) = run(matches).await {
        eprintln!("❌ {err}");
        let mut source = err.source();
        while let Some(cause) = source {
            eprintln!("   caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}
