//! Decode an MPEG audio file to raw PCM
//!
//! Writes interleaved 16-bit little-endian samples to the output path, or to
//! stdout when no output path is given.
//!
//! Run with:
//! ```bash
//! cargo run -p core-decode --example decode_file -- input.mp3 output.pcm
//!
//! # Noise-shaped dither instead of plain truncation
//! cargo run -p core-decode --example decode_file -- input.mp3 output.pcm dither
//!
//! # JSON logs, piping PCM into a player
//! RUST_LOG=core_decode=debug cargo run -p core-decode --example decode_file -- input.mp3 | aplay -f cd
//! ```

use core_decode::{ConversionMode, DecodeSession, DecoderConfig, DriverState, FinishReason};
use core_runtime::logging::{init_logging, strip_path, LogFormat, LoggingConfig};
use core_runtime::sink::LogLevel;
use std::env;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    let Some(input) = args.get(1) else {
        eprintln!("usage: decode_file <input> [output|-] [dither]");
        return ExitCode::FAILURE;
    };
    let output = args.get(2).filter(|p| p.as_str() != "-");
    let conversion = match args.get(3).map(String::as_str) {
        Some("dither") => ConversionMode::Dither,
        _ => ConversionMode::Scale,
    };

    let format = if output.is_some() {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    };
    let config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Info);
    if let Err(e) = init_logging(config) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(input, output.map(String::as_str), conversion) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Decoding failed");
            ExitCode::FAILURE
        }
    }
}

fn run(input: &str, output: Option<&str>, conversion: ConversionMode) -> io::Result<()> {
    let source = BufReader::new(File::open(input)?);
    let config = DecoderConfig::default().with_conversion(conversion);
    let mut session = DecodeSession::mpeg(source, config)?;

    let mut sink: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };

    info!(
        input = strip_path(input),
        output = output.map(strip_path).unwrap_or("<stdout>"),
        ?conversion,
        "Decoding"
    );

    let started = Instant::now();
    let written = io::copy(&mut session, &mut sink)?;
    sink.flush()?;

    let metadata = session.metadata();
    let stats = session.stats();
    let seconds = if metadata.pcm_byte_rate() > 0 {
        written as f64 / metadata.pcm_byte_rate() as f64
    } else {
        0.0
    };

    info!(
        sample_rate = metadata.sample_rate,
        channels = metadata.channels,
        bitrate = metadata.bitrate,
        bytes_fed = stats.bytes_fed,
        frames = stats.frames_produced,
        clipped = stats.clipped_samples,
        pcm_bytes = written,
        audio_secs = format!("{:.2}", seconds),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Decoding complete"
    );

    match session.join() {
        DriverState::Finished(FinishReason::Failed(e)) => Err(e.into()),
        _ => Ok(()),
    }
}
