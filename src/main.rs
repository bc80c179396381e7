//! avsession CLI - play and record media inputs

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::TryRecvError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use avsession::config::{Args, Command, SessionConfig};
use avsession::playback::{ClockedAudioDevice, HeadlessRenderer};
use avsession::record::RecordingTarget;
use avsession::source::{open_input, FinishReason, ReaderEvent};
use avsession::{Collaborators, Session, SessionStats};

/// How long queued frames may keep playing after the input ends
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::load_default()?,
    };

    // Initialize logging
    init_logging(&args, &config)?;

    // Execute command
    match &args.command {
        Command::Play {
            input,
            record,
            seconds,
            no_video,
            no_audio,
        } => cmd_play(
            &config,
            input,
            record.as_deref(),
            *seconds,
            !*no_video,
            !*no_audio,
        ),
        Command::Probe { input } => cmd_probe(input),
        Command::Config { output } => cmd_config(output.as_ref()),
    }
}

fn init_logging(args: &Args, config: &SessionConfig) -> Result<()> {
    let level = args.log_level(&config.log_level);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let log_file = args
        .log
        .clone()
        .or_else(|| Some(config.log_file.clone()).filter(|f| !f.is_empty()));

    if let Some(log_file) = log_file {
        let file = std::fs::File::create(&log_file)
            .with_context(|| format!("Failed to create log file '{}'", log_file))?;
        subscriber.with_writer(file).with_ansi(false).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Play an input headless, optionally recording it
fn cmd_play(
    config: &SessionConfig,
    input: &str,
    record: Option<&Path>,
    seconds: Option<f64>,
    video: bool,
    audio: bool,
) -> Result<()> {
    let limit = match seconds {
        Some(s) if s.is_finite() && s > 0.0 => Some(Duration::from_secs_f64(s)),
        Some(s) => anyhow::bail!("Invalid duration: {}", s),
        None => None,
    };

    let mut collaborators = Collaborators::default();
    if audio {
        collaborators = collaborators.with_audio_device(Box::new(ClockedAudioDevice::new()));
    }
    if video {
        collaborators = collaborators.with_renderer(Box::new(HeadlessRenderer::new()));
    }

    let source = open_input(input)?;
    let session = Session::create(
        source,
        record.map(RecordingTarget::file),
        collaborators,
        config.to_session_options(),
    )?;
    let events = session.events();

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to install Ctrl+C handler: {}", e);
    }

    let render_interval = session
        .descriptors()
        .source
        .video
        .filter(|v| v.frame_rate.num > 0 && v.frame_rate.den > 0)
        .map(|v| Duration::from_secs_f64(v.frame_rate.den as f64 / v.frame_rate.num as f64))
        .unwrap_or(Duration::from_millis(10));

    session.start()?;
    println!("Playing '{}'. Press Ctrl+C to stop.\n", input);

    let started = Instant::now();
    let mut drain_deadline: Option<Instant> = None;

    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            info!("Time limit reached");
            break;
        }

        match events.try_recv() {
            Ok(ReaderEvent::Finished(FinishReason::EndOfInput)) => {
                info!("End of input, draining playback queues");
                drain_deadline = Some(Instant::now() + DRAIN_TIMEOUT);
            }
            Ok(ReaderEvent::Finished(FinishReason::ReadError(e))) => {
                error!("Input failed: {}", e);
                break;
            }
            Ok(ReaderEvent::Finished(FinishReason::Stopped)) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        session.render();

        if let Some(deadline) = drain_deadline {
            if queues_empty(&session.stats()) || Instant::now() >= deadline {
                break;
            }
        }

        std::thread::sleep(render_interval);
    }

    session.stop();
    print_stats(&session.stats());
    session.teardown();

    if let Some(path) = record {
        println!("Recording written to {}", path.display());
    }
    Ok(())
}

fn queues_empty(stats: &SessionStats) -> bool {
    stats.audio.map_or(true, |a| a.queued == 0) && stats.video.map_or(true, |v| v.queued == 0)
}

fn print_stats(stats: &SessionStats) {
    println!("\nStopped at {:.3}s", stats.clock_ms as f64 / 1000.0);
    println!(
        "  Reader:    {} units, {} frames, {} decode errors",
        stats.reader.units_read, stats.reader.frames_decoded, stats.reader.decode_errors
    );
    for sink in &stats.reader.sinks {
        println!(
            "    {:<20} {} delivered, {} dropped",
            sink.name, sink.delivered, sink.dropped
        );
    }
    if let Some(audio) = &stats.audio {
        println!(
            "  Audio:     {} frames played, {} underruns",
            audio.frames_played, audio.underruns
        );
    }
    if let Some(video) = &stats.video {
        println!(
            "  Video:     {} new, {} repeated, {} skipped, max drift {}ms",
            video.new_frames, video.repeated, video.skipped, video.sync.max_drift_ms
        );
    }
    if let Some(recorder) = &stats.recorder {
        println!(
            "  Recording: {} audio / {} video frames, {} packets, {} failures",
            recorder.audio_frames, recorder.video_frames, recorder.packets_written, recorder.failures
        );
    }
}

/// Show stream information of an input
fn cmd_probe(input: &str) -> Result<()> {
    let source = open_input(input)?;
    println!("Input: {}\n", source.locator());
    println!("{}", source.streams());
    Ok(())
}

/// Print or write the sample configuration
fn cmd_config(output: Option<&PathBuf>) -> Result<()> {
    let sample = SessionConfig::sample_config();
    match output {
        Some(path) => {
            std::fs::write(path, sample)
                .with_context(|| format!("Failed to write '{}'", path.display()))?;
            println!("Sample configuration written to {}", path.display());
        }
        None => print!("{}", sample),
    }
    Ok(())
}
