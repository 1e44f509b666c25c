//! `cpal` output device for the playback scheduler.
//!
//! # Design
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream lives on a
//! dedicated `audio-output` thread that builds it, forwards completions until
//! shutdown and then drops it.  [`CpalOutput`] itself only holds `Send`
//! handles:
//!
//! ```text
//! PlaybackScheduler ──Command ring──▶ cpal callback (Mixer)
//!        ▲                                   │
//!        │                              Retired ring
//!        │                                   ▼
//!        └──── mpsc<ChunkId> ◀──── audio-output thread
//!
//!              AtomicU64 frames rendered = output clock
//! ```
//!
//! The callback does not allocate.  Voice storage is reserved up front, and
//! finished or cancelled sample buffers travel back through the retired ring
//! so their last `Arc` is dropped on the output thread, which also turns them
//! into completion messages.  Only a cancelled buffer that meets a full ring
//! is released in the callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::convert::resample_linear;
use super::format::{AudioFormat, CANONICAL_SAMPLE_RATE};
use super::playback::{ChunkId, OutputDevice, PlaybackError};

/// Pending commands the callback can lag behind by.
const COMMAND_CAPACITY: usize = 1_024;
/// Voices the callback can mix at once.
const VOICE_CAPACITY: usize = 256;
/// How often the output thread collects retired voices.
const FORWARD_INTERVAL: Duration = Duration::from_millis(10);

enum Command {
    Play {
        id: ChunkId,
        samples: Arc<[f32]>,
        start_frame: u64,
        /// Flush epoch at the time the chunk was scheduled.
        epoch: u64,
    },
    Cancel(ChunkId),
}

/// A voice leaving the mixer.  `completed` is false when it was cancelled or
/// flushed before its last sample.
struct Retired {
    id: ChunkId,
    #[allow(dead_code)]
    samples: Arc<[f32]>,
    completed: bool,
}

struct Voice {
    id: ChunkId,
    samples: Arc<[f32]>,
    start_frame: u64,
    pos: usize,
}

impl Voice {
    fn finished(&self) -> bool {
        self.pos >= self.samples.len()
    }
}

/// State shared between the handle and the callback.
#[derive(Default)]
struct Shared {
    frames_rendered: AtomicU64,
    /// Bumped when a cancel could not be queued.  The mixer silences every
    /// voice scheduled under an older epoch.
    flush_epoch: AtomicU64,
}

// ---------------------------------------------------------------------------
// Mixer (runs inside the callback)
// ---------------------------------------------------------------------------

/// Sums scheduled voices into device buffers, positioned on the frame clock.
struct Mixer {
    voices: Vec<Voice>,
    capacity: usize,
    /// A `Play` that arrived while every voice slot was taken.
    pending: Option<Command>,
    epoch: u64,
    retired: HeapProd<Retired>,
}

impl Mixer {
    fn new(capacity: usize, retired: HeapProd<Retired>) -> Self {
        Self {
            voices: Vec::with_capacity(capacity),
            capacity,
            pending: None,
            epoch: 0,
            retired,
        }
    }

    /// Silence everything scheduled before `epoch`.
    fn sync_epoch(&mut self, epoch: u64) {
        if epoch <= self.epoch {
            return;
        }
        self.epoch = epoch;
        while let Some(voice) = self.voices.pop() {
            self.retire(voice.id, voice.samples, false);
        }
    }

    /// Apply one command.  A `Play` that does not fit is handed back.
    fn apply(&mut self, cmd: Command) -> Option<Command> {
        match cmd {
            Command::Play {
                id,
                samples,
                start_frame,
                epoch,
            } => {
                if epoch < self.epoch {
                    self.retire(id, samples, false);
                    return None;
                }
                self.sync_epoch(epoch);
                if self.voices.len() >= self.capacity {
                    return Some(Command::Play {
                        id,
                        samples,
                        start_frame,
                        epoch,
                    });
                }
                self.voices.push(Voice {
                    id,
                    samples,
                    start_frame,
                    pos: 0,
                });
                None
            }
            Command::Cancel(id) => {
                if let Some(i) = self.voices.iter().position(|v| v.id == id) {
                    let voice = self.voices.swap_remove(i);
                    self.retire(voice.id, voice.samples, false);
                }
                None
            }
        }
    }

    /// Drain the command ring in order.  Stops early while a `Play` is held
    /// back for lack of a voice slot.
    fn take_commands(&mut self, commands: &mut HeapCons<Command>) {
        if let Some(cmd) = self.pending.take() {
            self.pending = self.apply(cmd);
        }
        while self.pending.is_none() {
            let Some(cmd) = commands.try_pop() else {
                break;
            };
            self.pending = self.apply(cmd);
        }
    }

    /// Fill `data` (interleaved, `channels` wide) whose first frame is frame
    /// `base` on the clock.
    fn render(&mut self, data: &mut [f32], base: u64, channels: usize) {
        let channels = channels.max(1);
        data.fill(0.0);

        for voice in self.voices.iter_mut() {
            let offset = voice.start_frame.saturating_sub(base) as usize;
            for frame in data.chunks_exact_mut(channels).skip(offset) {
                let Some(&s) = voice.samples.get(voice.pos) else {
                    break;
                };
                voice.pos += 1;
                for out in frame.iter_mut() {
                    *out += s;
                }
            }
        }
        for out in data.iter_mut() {
            *out = out.clamp(-1.0, 1.0);
        }

        let mut i = 0;
        while i < self.voices.len() {
            if !self.voices[i].finished() {
                i += 1;
                continue;
            }
            let voice = &self.voices[i];
            let retired = Retired {
                id: voice.id,
                samples: Arc::clone(&voice.samples),
                completed: true,
            };
            // A full ring keeps the finished voice around (silent) until the
            // next callback, so no completion is lost.
            if self.retired.try_push(retired).is_ok() {
                self.voices.swap_remove(i);
            } else {
                break;
            }
        }
    }

    fn retire(&mut self, id: ChunkId, samples: Arc<[f32]>, completed: bool) {
        let _ = self.retired.try_push(Retired {
            id,
            samples,
            completed,
        });
    }
}

/// Output-thread loop: pick up the completion sender, forward the ids of
/// voices that played to the end and release every retired buffer.  Returns
/// once `control` is disconnected.
fn forward_completions(
    control: mpsc::Receiver<mpsc::Sender<ChunkId>>,
    mut retired: HeapCons<Retired>,
) {
    let mut completions: Option<mpsc::Sender<ChunkId>> = None;
    loop {
        let message = control.recv_timeout(FORWARD_INTERVAL);
        if let Ok(tx) = &message {
            completions = Some(tx.clone());
        }

        while let Some(voice) = retired.try_pop() {
            if voice.completed {
                if let Some(tx) = &completions {
                    let _ = tx.send(voice.id);
                }
            }
        }

        if let Err(mpsc::RecvTimeoutError::Disconnected) = message {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

/// Output device backed by the default `cpal` host.
pub struct CpalOutput {
    format: AudioFormat,
    shared: Arc<Shared>,
    commands: HeapProd<Command>,
    control: Option<mpsc::Sender<mpsc::Sender<ChunkId>>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the output device called `device_name` (system default when
    /// `None`) and start its stream.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::DeviceUnavailable`] when no device matches or the
    /// platform refuses the stream.
    pub fn open(device_name: Option<String>) -> Result<Self, PlaybackError> {
        let shared = Arc::new(Shared::default());
        let (commands, consumer) = HeapRb::<Command>::new(COMMAND_CAPACITY).split();
        let (retired_tx, retired_rx) =
            HeapRb::<Retired>::new(COMMAND_CAPACITY + VOICE_CAPACITY).split();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (control_tx, control_rx) = mpsc::channel();

        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let mixer = Mixer::new(VOICE_CAPACITY, retired_tx);
                match build_stream(device_name.as_deref(), thread_shared, consumer, mixer) {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        // Runs until the handle closes.
                        forward_completions(control_rx, retired_rx);
                        drop(stream);
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;

        let format = ready_rx
            .recv()
            .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))??;
        log::info!("playback: output opened ({format})");

        Ok(Self {
            format,
            shared,
            commands,
            control: Some(control_tx),
            thread: Some(thread),
        })
    }

    /// Format the device stream is running at.
    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

impl OutputDevice for CpalOutput {
    fn attach(&mut self, completions: mpsc::Sender<ChunkId>) {
        let sent = self
            .control
            .as_ref()
            .map(|control| control.send(completions).is_ok())
            .unwrap_or(false);
        if !sent {
            log::error!("playback: output thread gone, completions not attached");
        }
    }

    fn now(&self) -> Duration {
        let frames = self.shared.frames_rendered.load(Ordering::Acquire);
        self.format.duration_of(frames as usize)
    }

    fn schedule(
        &mut self,
        id: ChunkId,
        samples: Arc<[f32]>,
        start_at: Duration,
    ) -> Result<(), PlaybackError> {
        if self.thread.is_none() {
            return Err(PlaybackError::SchedulingFailure("device closed".into()));
        }

        // Chunks are converted one at a time, so use the interpolator that
        // stays continuous across chunk boundaries.
        let samples: Arc<[f32]> = if self.format.sample_rate == CANONICAL_SAMPLE_RATE {
            samples
        } else {
            resample_linear(&samples, CANONICAL_SAMPLE_RATE, self.format.sample_rate).into()
        };
        let start_frame =
            (start_at.as_secs_f64() * f64::from(self.format.sample_rate)).round() as u64;

        self.commands
            .try_push(Command::Play {
                id,
                samples,
                start_frame,
                epoch: self.shared.flush_epoch.load(Ordering::Acquire),
            })
            .map_err(|_| PlaybackError::SchedulingFailure("command queue full".into()))
    }

    fn cancel(&mut self, id: ChunkId) {
        if self.commands.try_push(Command::Cancel(id)).is_err() {
            self.shared.flush_epoch.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn close(&mut self) {
        // Disconnecting the control channel ends the output thread, which
        // drops the stream.
        self.control.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("playback: output thread panicked");
            }
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Stream construction (runs on the output thread)
// ---------------------------------------------------------------------------

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, PlaybackError> {
    let unavailable = |e: String| PlaybackError::DeviceUnavailable(e);
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| unavailable("no default output device".into())),
        Some(name) => host
            .output_devices()
            .map_err(|e| unavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| unavailable(format!("no output device named {name:?}"))),
    }
}

fn build_stream(
    name: Option<&str>,
    shared: Arc<Shared>,
    mut commands: HeapCons<Command>,
    mut mixer: Mixer,
) -> Result<(cpal::Stream, AudioFormat), PlaybackError> {
    let unavailable = |e: &dyn std::fmt::Display| PlaybackError::DeviceUnavailable(e.to_string());

    let host = cpal::default_host();
    let device = find_device(&host, name)?;
    let wanted = cpal::SampleRate(CANONICAL_SAMPLE_RATE);

    let exact = device
        .supported_output_configs()
        .map_err(|e| unavailable(&e))?
        .find(|range| {
            range.channels() == 1
                && range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate() <= wanted
                && wanted <= range.max_sample_rate()
        });
    let config: cpal::StreamConfig = match exact {
        Some(range) => range.with_sample_rate(wanted).into(),
        None => device
            .default_output_config()
            .map_err(|e| unavailable(&e))?
            .into(),
    };

    let format = AudioFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
        bits_per_sample: 16,
    };
    let channels = usize::from(config.channels.max(1));

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mixer.sync_epoch(shared.flush_epoch.load(Ordering::Acquire));
                mixer.take_commands(&mut commands);

                let base = shared.frames_rendered.load(Ordering::Relaxed);
                mixer.render(data, base, channels);
                let frames = (data.len() / channels) as u64;
                shared
                    .frames_rendered
                    .store(base + frames, Ordering::Release);
            },
            |err: cpal::StreamError| {
                log::error!("cpal output stream error: {err}");
            },
            None,
        )
        .map_err(|e| unavailable(&e))?;

    stream.play().map_err(|e| unavailable(&e))?;
    Ok((stream, format))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
