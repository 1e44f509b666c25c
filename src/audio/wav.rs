//! Canonical 44-byte PCM WAV header and container assembly.
//!
//! | Offset | Size | Field          | Value                                   |
//! |--------|------|----------------|-----------------------------------------|
//! | 0      | 4    | ChunkID        | `"RIFF"`                                |
//! | 4      | 4    | ChunkSize      | `36 + payload_len`                      |
//! | 8      | 4    | Format         | `"WAVE"`                                |
//! | 12     | 4    | Subchunk1ID    | `"fmt "`                                |
//! | 16     | 4    | Subchunk1Size  | `16`                                    |
//! | 20     | 2    | AudioFormat    | `1` (PCM)                               |
//! | 22     | 2    | NumChannels    | channels                                |
//! | 24     | 4    | SampleRate     | sample rate                             |
//! | 28     | 4    | ByteRate       | `rate × channels × bits / 8`            |
//! | 32     | 2    | BlockAlign     | `channels × bits / 8`                   |
//! | 34     | 2    | BitsPerSample  | bits                                    |
//! | 36     | 4    | Subchunk2ID    | `"data"`                                |
//! | 40     | 4    | Subchunk2Size  | `payload_len`                           |
//!
//! All numeric fields are little-endian.

use super::format::{AudioFormat, PcmBuffer};

/// Size of the canonical header in bytes.
pub const WAV_HEADER_LEN: usize = 44;

/// Build the 44-byte header for a `payload_len`-byte PCM payload.
///
/// Sizes that do not fit the 32-bit RIFF fields saturate at `u32::MAX`.
pub fn build_header(
    payload_len: usize,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
) -> [u8; WAV_HEADER_LEN] {
    let data_len = u32::try_from(payload_len).unwrap_or(u32::MAX);
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut h = [0u8; WAV_HEADER_LEN];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&data_len.saturating_add(36).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&1u16.to_le_bytes());
    h[22..24].copy_from_slice(&channels.to_le_bytes());
    h[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    h[32..34].copy_from_slice(&block_align.to_le_bytes());
    h[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_len.to_le_bytes());
    h
}

/// Header followed by the payload; `44 + payload.len_bytes()` bytes total.
pub fn wrap(payload: &PcmBuffer, format: AudioFormat) -> Vec<u8> {
    let header = build_header(
        payload.len_bytes(),
        format.sample_rate,
        format.channels,
        format.bits_per_sample,
    );
    let mut out = Vec::with_capacity(WAV_HEADER_LEN + payload.len_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(payload.as_bytes());
    out
}

/// [`wrap`] with [`AudioFormat::CANONICAL`].
pub fn wrap_canonical(payload: &PcmBuffer) -> Vec<u8> {
    wrap(payload, AudioFormat::CANONICAL)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn u32_at(buf: &[u8], off: usize) -> u32 {
        u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
    }

    fn u16_at(buf: &[u8], off: usize) -> u16 {
        u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
    }

    #[test]
    fn header_layout_canonical() {
        let h = build_header(4_800, 24_000, 1, 16);
        assert_eq!(&h[0..4], b"RIFF");
        assert_eq!(u32_at(&h, 4), 4_836);
        assert_eq!(&h[8..12], b"WAVE");
        assert_eq!(&h[12..16], b"fmt ");
        assert_eq!(u32_at(&h, 16), 16);
        assert_eq!(u16_at(&h, 20), 1);
        assert_eq!(u16_at(&h, 22), 1);
        assert_eq!(u32_at(&h, 24), 24_000);
        assert_eq!(u32_at(&h, 28), 48_000);
        assert_eq!(u16_at(&h, 32), 2);
        assert_eq!(u16_at(&h, 34), 16);
        assert_eq!(&h[36..40], b"data");
        assert_eq!(u32_at(&h, 40), 4_800);
    }

    #[test]
    fn header_layout_stereo_44k() {
        let h = build_header(0, 44_100, 2, 16);
        assert_eq!(u32_at(&h, 4), 36);
        assert_eq!(u16_at(&h, 22), 2);
        assert_eq!(u32_at(&h, 28), 176_400);
        assert_eq!(u16_at(&h, 32), 4);
        assert_eq!(u32_at(&h, 40), 0);
    }

    #[test]
    fn wrap_sizes_for_various_payloads() {
        for samples in [0usize, 1, 2_400, 12_345] {
            let pcm = PcmBuffer::from_samples(&vec![7; samples]);
            let l = pcm.len_bytes();
            let wav = wrap_canonical(&pcm);
            assert_eq!(wav.len(), 44 + l);
            assert_eq!(u32_at(&wav, 4) as usize, 36 + l);
            assert_eq!(u32_at(&wav, 40) as usize, l);
            assert_eq!(&wav[44..], pcm.as_bytes());
        }
    }

    #[test]
    fn wrapped_file_reads_back_with_hound() {
        let pcm = PcmBuffer::from_samples(&[0, 1_000, -1_000, i16::MAX, i16::MIN]);
        let wav = wrap_canonical(&pcm);

        let reader = hound::WavReader::new(Cursor::new(wav)).expect("valid wav");
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);

        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, pcm.samples());
    }
}
