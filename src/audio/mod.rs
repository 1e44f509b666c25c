//! Audio core: capture → convert → PCM bytes, PCM bytes → scheduled playback.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → FrameWriter (lock-free ring)
//!           → CaptureEngine::stop → to_canonical → PcmBuffer ─┐
//!                                                              │ transport
//! PcmBuffer chunks ─▶ PlaybackScheduler::enqueue ─▶ CpalOutput ◀┘
//!
//! audio file ─▶ offline::convert ─▶ PcmBuffer ─▶ wav::wrap ─▶ disk
//! ```
//!
//! Everything that crosses the transport boundary is canonical PCM:
//! 24 kHz, mono, signed 16-bit little-endian.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rt_voice_audio::audio::{wav, CaptureEngine, CpalInput};
//!
//! let mut capture = CaptureEngine::new(Box::new(CpalInput::new(None)), 60.0);
//! capture.start().unwrap();
//! std::thread::sleep(std::time::Duration::from_secs(3));
//! let pcm = capture.stop().unwrap();
//! std::fs::write("take.wav", wav::wrap_canonical(&pcm)).unwrap();
//! ```

pub mod buffer;
pub mod capture;
pub mod convert;
pub mod format;
pub mod offline;
pub mod output;
pub mod playback;
pub mod wav;

#[cfg(test)]
pub mod testing;

pub use capture::{CaptureEngine, CaptureError, CaptureState, CpalInput, InputDevice, InputStream};
pub use convert::{
    deinterleave, downmix_to_mono, float_to_int16, int16_to_float, interleaved_to_mono, resample,
    resample_linear, to_canonical,
};
pub use format::{AudioFormat, PcmBuffer, CANONICAL_SAMPLE_RATE, TRANSPORT_CHUNK_BYTES};
pub use offline::ConvertError;
pub use output::CpalOutput;
pub use playback::{ChunkId, OutputDevice, PlaybackError, PlaybackScheduler, ScheduledChunk};
