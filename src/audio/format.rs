//! Audio format descriptor and the immutable PCM byte buffer.
//!
//! Every buffer that leaves the converters or enters the playback scheduler
//! is in the canonical pipeline format: **24 kHz, mono, signed 16-bit
//! little-endian PCM** ([`AudioFormat::CANONICAL`]).
//!
//! # Example
//!
//! ```rust
//! use rt_voice_audio::audio::{AudioFormat, PcmBuffer};
//!
//! let pcm = PcmBuffer::from_samples(&[0, 16_383, -16_384]);
//! assert_eq!(pcm.len_bytes(), 6);
//! assert_eq!(pcm.samples(), vec![0, 16_383, -16_384]);
//! assert_eq!(AudioFormat::CANONICAL.sample_rate, 24_000);
//! ```

use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Sample rate of the canonical pipeline format in Hz.
pub const CANONICAL_SAMPLE_RATE: u32 = 24_000;

/// Size in bytes of one transport chunk: 2400 samples ≈ 100 ms of canonical
/// audio.
pub const TRANSPORT_CHUNK_BYTES: usize = 4_800;

// ---------------------------------------------------------------------------
// AudioFormat
// ---------------------------------------------------------------------------

/// Sample rate / channel count / sample width of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Samples per second per channel.
    pub sample_rate: u32,
    /// Number of interleaved channels (≥ 1).
    pub channels: u16,
    /// Width of one sample in bits. The pipeline only produces 16.
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// 24 kHz, mono, 16-bit signed PCM.
    pub const CANONICAL: AudioFormat = AudioFormat {
        sample_rate: CANONICAL_SAMPLE_RATE,
        channels: 1,
        bits_per_sample: 16,
    };

    /// Bytes in one interleaved frame (one sample for every channel).
    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }

    /// Bytes per second of audio.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.block_align())
    }

    /// Play time of `frames` frames at this format's sample rate.
    ///
    /// Computed in whole nanoseconds so that summing the durations of
    /// consecutive chunks is exact.
    pub fn duration_of(&self, frames: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = frames as u128 * 1_000_000_000 / u128::from(self.sample_rate);
        Duration::from_nanos(nanos as u64)
    }

    /// `true` when this is exactly [`AudioFormat::CANONICAL`].
    pub fn is_canonical(&self) -> bool {
        *self == Self::CANONICAL
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::CANONICAL
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

// ---------------------------------------------------------------------------
// PcmBuffer
// ---------------------------------------------------------------------------

/// Immutable buffer of canonical PCM: signed 16-bit little-endian mono
/// samples.
///
/// Cloning is cheap (`Arc` clone), so the same recording can be handed to
/// the transport and to persistence without copying.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct PcmBuffer {
    bytes: Arc<[u8]>,
}

impl PcmBuffer {
    /// Encode `samples` as little-endian bytes.
    pub fn from_samples(samples: &[i16]) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self {
            bytes: bytes.into(),
        }
    }

    /// Wrap raw little-endian PCM bytes.
    ///
    /// A trailing odd byte cannot form a sample and is dropped.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let usable = bytes.len() & !1;
        if usable != bytes.len() {
            log::warn!(
                "pcm: dropping trailing odd byte from {}-byte buffer",
                bytes.len()
            );
        }
        Self {
            bytes: bytes[..usable].into(),
        }
    }

    /// Raw little-endian bytes, ready for the transport or a WAV payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode the buffer back into samples.
    pub fn samples(&self) -> Vec<i16> {
        decode_le_i16(&self.bytes)
    }

    /// Length of the buffer in bytes.
    pub fn len_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Number of 16-bit samples.
    pub fn sample_count(&self) -> usize {
        self.bytes.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Play time at the canonical sample rate.
    pub fn duration(&self) -> Duration {
        AudioFormat::CANONICAL.duration_of(self.sample_count())
    }
}

impl std::fmt::Debug for PcmBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmBuffer")
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl From<Vec<i16>> for PcmBuffer {
    fn from(samples: Vec<i16>) -> Self {
        Self::from_samples(&samples)
    }
}

/// Decode little-endian 16-bit samples; a trailing odd byte is ignored.
pub fn decode_le_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_format_constants() {
        let f = AudioFormat::CANONICAL;
        assert_eq!(f.sample_rate, 24_000);
        assert_eq!(f.channels, 1);
        assert_eq!(f.bits_per_sample, 16);
        assert_eq!(f.block_align(), 2);
        assert_eq!(f.byte_rate(), 48_000);
        assert!(f.is_canonical());
    }

    #[test]
    fn transport_chunk_is_100ms() {
        let samples = TRANSPORT_CHUNK_BYTES / 2;
        assert_eq!(
            AudioFormat::CANONICAL.duration_of(samples),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn stereo_block_align() {
        let f = AudioFormat {
            sample_rate: 44_100,
            channels: 2,
            bits_per_sample: 16,
        };
        assert_eq!(f.block_align(), 4);
        assert_eq!(f.byte_rate(), 176_400);
        assert!(!f.is_canonical());
    }

    #[test]
    fn zero_rate_duration_is_zero() {
        let f = AudioFormat {
            sample_rate: 0,
            channels: 1,
            bits_per_sample: 16,
        };
        assert_eq!(f.duration_of(1_000), Duration::ZERO);
    }

    #[test]
    fn pcm_bytes_are_little_endian() {
        let pcm = PcmBuffer::from_samples(&[0x0102, -2]);
        assert_eq!(pcm.as_bytes(), &[0x02, 0x01, 0xFE, 0xFF]);
        assert_eq!(pcm.sample_count(), 2);
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        let pcm = PcmBuffer::from_le_bytes(&[1, 0, 7]);
        assert_eq!(pcm.len_bytes(), 2);
        assert_eq!(pcm.samples(), vec![1]);
    }

    #[test]
    fn pcm_duration_uses_canonical_rate() {
        let pcm = PcmBuffer::from_samples(&vec![0; 12_000]);
        assert_eq!(pcm.duration(), Duration::from_millis(500));
    }

    #[test]
    fn empty_buffer() {
        let pcm = PcmBuffer::default();
        assert!(pcm.is_empty());
        assert_eq!(pcm.duration(), Duration::ZERO);
    }
}
