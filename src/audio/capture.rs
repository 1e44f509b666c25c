//! Microphone capture: device seam, cpal backend and the recording engine.
//!
//! [`CaptureEngine`] runs the `Idle → Recording → Idle` state machine.  On
//! [`start`](CaptureEngine::start) it asks its [`InputDevice`] for a stream
//! and hands the device the producer half of a pre-sized
//! [frame accumulator](super::buffer); the device's real-time callback is the
//! only writer.  [`stop`](CaptureEngine::stop) freezes the accumulator,
//! releases the device, drains the frames and converts them to canonical PCM.
//!
//! [`CpalInput`] is the production device.  It asks for 24 kHz mono `f32`
//! and falls back to the device's default configuration when the hardware
//! can't do that, in which case `stop()` downmixes and resamples.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::buffer::{frame_accumulator, FrameReader, FrameWriter};
use super::convert::{float_to_int16, to_canonical};
use super::format::{AudioFormat, PcmBuffer, CANONICAL_SAMPLE_RATE};

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors surfaced by the capture engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CaptureError {
    /// No input device, no permission, or the platform refused the stream.
    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,
}

fn unavailable(err: impl std::fmt::Display) -> CaptureError {
    CaptureError::DeviceUnavailable(err.to_string())
}

// ---------------------------------------------------------------------------
// Device seam
// ---------------------------------------------------------------------------

/// A live input stream.  Dropping it (or calling [`close`](Self::close))
/// stops the callback and releases the device.
pub trait InputStream {
    fn close(self: Box<Self>) {}
}

/// Something that can deliver microphone frames.
pub trait InputDevice {
    /// Pick the format the next stream will run at, preferring `preferred`.
    fn negotiate(&mut self, preferred: AudioFormat) -> Result<AudioFormat, CaptureError>;

    /// Start delivering interleaved `f32` frames at `format` into `writer`.
    ///
    /// The writer must be driven only from the device's callback.
    fn open(
        &mut self,
        format: AudioFormat,
        writer: FrameWriter,
    ) -> Result<Box<dyn InputStream>, CaptureError>;
}

// ---------------------------------------------------------------------------
// CpalInput
// ---------------------------------------------------------------------------

/// Input device backed by the default `cpal` host.
pub struct CpalInput {
    device_name: Option<String>,
    device: Option<cpal::Device>,
    config: Option<cpal::StreamConfig>,
}

impl CpalInput {
    /// Use the input device called `device_name`, or the system default when
    /// `None`.  Nothing is opened until [`CaptureEngine::start`].
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            device: None,
            config: None,
        }
    }

    fn find_device(&self) -> Result<cpal::Device, CaptureError> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host
                .default_input_device()
                .ok_or_else(|| unavailable("no default input device")),
            Some(name) => host
                .input_devices()
                .map_err(unavailable)?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| unavailable(format!("no input device named {name:?}"))),
        }
    }
}

impl InputDevice for CpalInput {
    fn negotiate(&mut self, preferred: AudioFormat) -> Result<AudioFormat, CaptureError> {
        let device = self.find_device()?;
        let wanted = cpal::SampleRate(preferred.sample_rate);

        let exact = device
            .supported_input_configs()
            .map_err(unavailable)?
            .find(|range| {
                range.channels() == preferred.channels
                    && range.sample_format() == cpal::SampleFormat::F32
                    && range.min_sample_rate() <= wanted
                    && wanted <= range.max_sample_rate()
            });

        let config: cpal::StreamConfig = match exact {
            Some(range) => range.with_sample_rate(wanted).into(),
            None => {
                let fallback = device.default_input_config().map_err(unavailable)?;
                log::info!(
                    "capture: device cannot run at {preferred}; using {} Hz, {} ch",
                    fallback.sample_rate().0,
                    fallback.channels()
                );
                fallback.into()
            }
        };

        let format = AudioFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
            bits_per_sample: 16,
        };
        self.device = Some(device);
        self.config = Some(config);
        Ok(format)
    }

    fn open(
        &mut self,
        _format: AudioFormat,
        mut writer: FrameWriter,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        let (device, config) = match (&self.device, &self.config) {
            (Some(d), Some(c)) => (d, c),
            _ => return Err(unavailable("open called before negotiate")),
        };

        let stream = device
            .build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    writer.push_frame(data);
                },
                |err: cpal::StreamError| {
                    log::error!("cpal input stream error: {err}");
                },
                None,
            )
            .map_err(unavailable)?;

        stream.play().map_err(unavailable)?;
        Ok(Box::new(CpalInputStream { _stream: stream }))
    }
}

struct CpalInputStream {
    _stream: cpal::Stream,
}

impl InputStream for CpalInputStream {}

// ---------------------------------------------------------------------------
// CaptureEngine
// ---------------------------------------------------------------------------

/// Phase of a [`CaptureEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Recording,
}

/// Everything that only exists while recording.
struct RecordingSession {
    stream: Box<dyn InputStream>,
    reader: FrameReader,
    format: AudioFormat,
}

/// Owns one microphone session at a time.
///
/// ```rust,no_run
/// use rt_voice_audio::audio::{CaptureEngine, CpalInput};
///
/// let mut engine = CaptureEngine::new(Box::new(CpalInput::new(None)), 60.0);
/// engine.start().unwrap();
/// std::thread::sleep(std::time::Duration::from_secs(2));
/// let pcm = engine.stop().unwrap(); // 24 kHz mono i16 LE
/// println!("{} bytes", pcm.len_bytes());
/// ```
pub struct CaptureEngine {
    device: Box<dyn InputDevice>,
    max_recording_secs: f32,
    session: Option<RecordingSession>,
    last_dropped: usize,
}

/// Samples the accumulation ring needs for `secs` of `format` audio.
fn ring_capacity(secs: f32, format: AudioFormat) -> usize {
    (f64::from(secs) * f64::from(format.sample_rate) * f64::from(format.channels.max(1))) as usize
}

impl CaptureEngine {
    /// `max_recording_secs` sizes the accumulation ring; audio beyond it is
    /// dropped (and counted) instead of growing memory on the audio thread.
    ///
    /// The ring holds raw device samples and is allocated in full by
    /// [`start`](Self::start): `secs × device rate × channels × 4` bytes.
    /// A 300 s limit on a 48 kHz stereo device reserves about 115 MB.
    pub fn new(device: Box<dyn InputDevice>, max_recording_secs: f32) -> Self {
        Self {
            device,
            max_recording_secs: max_recording_secs.max(0.0),
            session: None,
            last_dropped: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        if self.session.is_some() {
            CaptureState::Recording
        } else {
            CaptureState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Format the device is actually delivering, while recording.
    pub fn device_format(&self) -> Option<AudioFormat> {
        self.session.as_ref().map(|s| s.format)
    }

    /// Samples lost to a full ring during the last completed recording.
    pub fn dropped_samples(&self) -> usize {
        self.last_dropped
    }

    /// Acquire the input device and begin accumulating frames.
    ///
    /// # Errors
    ///
    /// [`CaptureError::AlreadyRecording`] if a session is active (it keeps
    /// running), [`CaptureError::DeviceUnavailable`] if the device can't be
    /// opened.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.session.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        let format = self.device.negotiate(AudioFormat::CANONICAL)?;
        let capacity = ring_capacity(self.max_recording_secs, format);
        log::debug!(
            "capture: reserving {capacity} samples ({:.1} MB) for {:.0}s",
            (capacity * std::mem::size_of::<f32>()) as f64 / 1e6,
            self.max_recording_secs
        );
        let (writer, reader) = frame_accumulator(capacity);

        let stream = self.device.open(format, writer)?;
        log::info!("capture: recording started ({format})");

        self.session = Some(RecordingSession {
            stream,
            reader,
            format,
        });
        Ok(())
    }

    /// Stop recording and return everything captured as canonical PCM.
    ///
    /// The accumulator is frozen before the device is released, so frames
    /// the callback delivers during teardown are discarded.  The device is
    /// fully released when this returns.
    ///
    /// # Errors
    ///
    /// [`CaptureError::NotRecording`] when idle.
    pub fn stop(&mut self) -> Result<PcmBuffer, CaptureError> {
        let RecordingSession {
            stream,
            mut reader,
            format,
        } = self.session.take().ok_or(CaptureError::NotRecording)?;

        reader.freeze();
        stream.close();

        let frames = reader.drain();
        self.last_dropped = reader.dropped();
        if self.last_dropped > 0 {
            log::warn!(
                "capture: accumulation buffer full, {} samples dropped",
                self.last_dropped
            );
        }

        let samples = if format.sample_rate == CANONICAL_SAMPLE_RATE && format.channels == 1 {
            float_to_int16(&frames)
        } else {
            to_canonical(&frames, format.channels, format.sample_rate)
        };
        let pcm = PcmBuffer::from_samples(&samples);

        log::info!(
            "capture: recording stopped, {} bytes ({:.2}s)",
            pcm.len_bytes(),
            pcm.duration().as_secs_f32()
        );
        Ok(pcm)
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.reader.freeze();
            session.stream.close();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
