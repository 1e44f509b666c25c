//! Command-line front end for the real-time voice audio core.
//!
//! # Subcommands
//!
//! * `record`: microphone to canonical WAV.
//! * `convert`: any audio file to canonical WAV.
//! * `convert-dir`: every audio file in a folder to canonical WAVs.
//! * `play`: stream a file through the playback scheduler in transport-sized
//!   chunks, as a live reply would arrive.
//! * `echo`: one full turn.  Record, send the take over a local "transport",
//!   play it back as the reply.  Ctrl-C interrupts the reply.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use rt_voice_audio::{
    archive,
    audio::{offline, wav, CaptureEngine, CpalInput, CpalOutput, PcmBuffer},
    config::{AppConfig, AppPaths},
    pipeline::{ResponsePlayer, VoiceSession},
};

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Capture, convert and stream 24 kHz mono PCM for a voice assistant
#[derive(Parser, Debug)]
#[command(name = "rt-voice-audio")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record from the microphone until Enter (or for a fixed time)
    Record {
        /// Stop automatically after this many seconds
        #[arg(short, long)]
        seconds: Option<f32>,
        /// Output WAV path (defaults to the recordings dir)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Convert one audio file to canonical WAV
    Convert {
        input: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Convert every supported audio file in a directory
    ConvertDir {
        dir: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Stream an audio file to the speaker chunk by chunk
    Play { input: PathBuf },
    /// Record a turn and play it straight back as the reply
    Echo,
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = match &args.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let config = loaded.as_ref().cloned().unwrap_or_default();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .format_timestamp_millis()
    .init();
    if let Err(e) = &loaded {
        log::warn!("Failed to load config ({e}); using defaults");
    }

    let paths = AppPaths::new();
    match args.command {
        Command::Record { seconds, out } => record(&config, &paths, seconds, out).await,
        Command::Convert { input, out } => {
            let out = match out {
                Some(out) => out,
                None => converted_path(&config.storage.converted_dir(&paths), &input),
            };
            convert_one(&input, &out).await
        }
        Command::ConvertDir { dir, out } => {
            let out = out.unwrap_or_else(|| config.storage.converted_dir(&paths));
            convert_dir(&dir, &out).await
        }
        Command::Play { input } => play(&config, &input).await,
        Command::Echo => echo(&config, &paths).await,
    }
}

// ---------------------------------------------------------------------------
// record
// ---------------------------------------------------------------------------

async fn record(
    config: &AppConfig,
    paths: &AppPaths,
    seconds: Option<f32>,
    out: Option<PathBuf>,
) -> Result<()> {
    let input = CpalInput::new(config.capture.input_device.clone());
    let mut capture = CaptureEngine::new(Box::new(input), config.capture.max_recording_secs);
    capture.start()?;

    match seconds {
        Some(secs) if secs > 0.0 => {
            println!("Recording for {secs:.1}s…");
            tokio::time::sleep(Duration::from_secs_f32(secs)).await;
        }
        _ => {
            println!("Recording… press Enter to stop");
            wait_for_enter().await?;
        }
    }

    let pcm = capture.stop()?;
    if capture.dropped_samples() > 0 {
        println!(
            "warning: {} samples past the {:.0}s limit were dropped",
            capture.dropped_samples(),
            config.capture.max_recording_secs
        );
    }

    let path = match out {
        Some(path) => {
            write_wav(&path, &pcm)?;
            path
        }
        None => archive::save_wav(&config.storage.recordings_dir(paths), "recording", &pcm)?,
    };
    println!(
        "Saved {:.2}s to {}",
        pcm.duration().as_secs_f32(),
        path.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// convert / convert-dir
// ---------------------------------------------------------------------------

async fn convert_one(input: &Path, out: &Path) -> Result<()> {
    let pcm = convert_path(input).await?;
    write_wav(out, &pcm)?;
    println!(
        "{} → {} ({:.2}s)",
        input.display(),
        out.display(),
        pcm.duration().as_secs_f32()
    );
    Ok(())
}

async fn convert_dir(dir: &Path, out_dir: &Path) -> Result<()> {
    let mut inputs: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && offline::is_supported_file(p))
        .collect();
    inputs.sort();

    if inputs.is_empty() {
        bail!("no supported audio files in {}", dir.display());
    }

    let mut failed = 0usize;
    for input in &inputs {
        let out = converted_path(out_dir, input);
        if let Err(e) = convert_one(input, &out).await {
            log::warn!("skipping {}: {e:#}", input.display());
            failed += 1;
        }
    }

    println!(
        "Converted {} of {} files into {}",
        inputs.len() - failed,
        inputs.len(),
        out_dir.display()
    );
    Ok(())
}

async fn convert_path(input: &Path) -> Result<PcmBuffer> {
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_owned);
    let pcm = offline::convert_async(bytes, ext)
        .await
        .with_context(|| format!("converting {}", input.display()))?;
    Ok(pcm)
}

/// `<out_dir>/<input stem>.wav`
fn converted_path(out_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".into());
    out_dir.join(format!("{stem}.wav"))
}

fn write_wav(path: &Path, pcm: &PcmBuffer) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, wav::wrap_canonical(pcm))
        .with_context(|| format!("writing {}", path.display()))
}

// ---------------------------------------------------------------------------
// play / echo
// ---------------------------------------------------------------------------

async fn play(config: &AppConfig, input: &Path) -> Result<()> {
    let pcm = convert_path(input).await?;
    let output = CpalOutput::open(config.playback.output_device.clone())?;
    let player = Arc::new(ResponsePlayer::new(Box::new(output)));

    println!(
        "Playing {} ({:.2}s), Ctrl-C to stop",
        input.display(),
        pcm.duration().as_secs_f32()
    );
    player.begin_response();
    stream_reply(&player, pcm, chunk_interval(config)).await;
    report_underruns(&player);
    player.close();
    Ok(())
}

async fn echo(config: &AppConfig, paths: &AppPaths) -> Result<()> {
    let (tx, mut transport) = mpsc::unbounded_channel();
    let input = CpalInput::new(config.capture.input_device.clone());
    let output = CpalOutput::open(config.playback.output_device.clone())?;
    let mut session = VoiceSession::new(
        Box::new(input),
        Box::new(output),
        Arc::new(tx),
        config.capture.max_recording_secs,
    );

    session.start_capture()?;
    println!("Speak now… press Enter when done");
    wait_for_enter().await?;
    session.stop_capture()?;

    // The "remote service" receives the take and replies with it verbatim.
    let Some(take) = transport.recv().await else {
        bail!("transport closed before the recording arrived");
    };
    let saved = archive::save_wav(&config.storage.recordings_dir(paths), "recording", &take)?;
    println!("Sent {:.2}s ({})", take.duration().as_secs_f32(), saved.display());

    println!("Replaying, Ctrl-C to interrupt");
    session.begin_response();
    let player = session.player();
    stream_reply(&player, take, chunk_interval(config)).await;
    report_underruns(&player);

    let reply = session.take_received_audio();
    if !reply.is_empty() {
        archive::save_wav(&config.storage.responses_dir(paths), "response", &reply)?;
    }
    session.close();
    Ok(())
}

/// Feed `pcm` to `player` in transport chunks from a separate task, then
/// wait for the last chunk to finish.  Ctrl-C stops playback immediately.
async fn stream_reply(player: &Arc<ResponsePlayer>, pcm: PcmBuffer, interval: Duration) {
    let mut feeder = tokio::spawn(feed_chunks(Arc::clone(player), pcm, interval));

    tokio::select! {
        _ = async {
            let _ = (&mut feeder).await;
            while player.is_responding() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        } => log::info!("playback finished"),
        _ = tokio::signal::ctrl_c() => {
            player.request_playback_stop();
            println!("Interrupted");
        }
    }
    feeder.abort();
}

async fn feed_chunks(player: Arc<ResponsePlayer>, pcm: PcmBuffer, interval: Duration) {
    let mut ticker = (!interval.is_zero()).then(|| tokio::time::interval(interval));
    for chunk in offline::transport_chunks(&pcm) {
        if let Some(ticker) = ticker.as_mut() {
            ticker.tick().await;
        }
        if player.feed_playback(chunk).is_none() && !player.scheduler().is_playing() {
            break;
        }
    }
}

fn chunk_interval(config: &AppConfig) -> Duration {
    Duration::from_millis(config.playback.chunk_interval_ms)
}

fn report_underruns(player: &ResponsePlayer) {
    let underruns = player.scheduler().underruns();
    if underruns > 0 {
        log::info!("playback fell behind the device clock {underruns} times");
    }
}

async fn wait_for_enter() -> Result<()> {
    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        read = stdin.read_line(&mut line) => { read?; }
        signal = tokio::signal::ctrl_c() => { signal?; }
    }
    Ok(())
}
