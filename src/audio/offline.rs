//! One-shot conversion of an uploaded audio file to canonical PCM.
//!
//! ```text
//! file bytes ─▶ symphonia format detection + decode ─▶ interleaved f32 @ source rate
//!            ─▶ downmix_to_mono ─▶ resample(24 kHz) ─▶ float_to_int16
//! ```
//!
//! Any container/codec the `symphonia` default registry understands is
//! accepted (WAV, FLAC, OGG/Vorbis, MP3, AAC/M4A with the enabled features).
//! Cutting the result into transport-sized pieces is the caller's job;
//! [`transport_chunks`] is provided as a convenience.

use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use super::convert::{deinterleave, downmix_to_mono, float_to_int16, resample};
use super::format::{PcmBuffer, CANONICAL_SAMPLE_RATE, TRANSPORT_CHUNK_BYTES};

/// File extensions picked up by folder batch conversion.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "aac", "flac", "ogg"];

// ---------------------------------------------------------------------------
// ConvertError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConvertError {
    /// The bytes could not be parsed as a known audio container/codec.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to read audio file: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking conversion task was cancelled or panicked.
    #[error("conversion task failed: {0}")]
    Task(String),
}

fn unsupported(err: impl std::fmt::Display) -> ConvertError {
    ConvertError::UnsupportedFormat(err.to_string())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Interleaved `f32` audio as it came out of the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Decode `bytes` with symphonia.  `extension` (without the dot) helps the
/// format detection pick a demuxer for formats without a magic number.
pub fn decode(bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio, ConvertError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(unsupported)?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| unsupported("no audio track"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(unsupported)?;

    let mut samples = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(unsupported(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = Some(spec.rate);
                channels = Some(spec.channels.count());

                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                log::warn!("offline: skipping undecodable packet: {msg}");
            }
            Err(e) => return Err(unsupported(e)),
        }
    }

    let sample_rate = sample_rate
        .filter(|&r| r > 0)
        .ok_or_else(|| unsupported("unknown sample rate"))?;
    let channels = channels
        .filter(|&c| c > 0)
        .ok_or_else(|| unsupported("unknown channel count"))?;

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels: channels as u16,
    })
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Decoded audio → canonical PCM.
pub fn to_canonical_pcm(audio: &DecodedAudio) -> PcmBuffer {
    let mono = if audio.channels > 1 {
        downmix_to_mono(&deinterleave(&audio.samples, audio.channels))
    } else {
        audio.samples.clone()
    };
    let resampled = resample(&mono, audio.sample_rate, CANONICAL_SAMPLE_RATE);
    PcmBuffer::from_samples(&float_to_int16(&resampled))
}

/// Convert the bytes of an audio file of any rate / channel count into
/// canonical 24 kHz mono 16-bit PCM.
///
/// # Errors
///
/// [`ConvertError::UnsupportedFormat`] when the container can't be decoded.
pub fn convert(bytes: &[u8]) -> Result<PcmBuffer, ConvertError> {
    convert_with_hint(bytes.to_vec(), None)
}

/// [`convert`] with a file-extension hint for format detection.
pub fn convert_with_hint(
    bytes: Vec<u8>,
    extension: Option<&str>,
) -> Result<PcmBuffer, ConvertError> {
    let decoded = decode(bytes, extension)?;
    log::debug!(
        "offline: decoded {} samples @ {} Hz, {} ch",
        decoded.samples.len(),
        decoded.sample_rate,
        decoded.channels
    );
    Ok(to_canonical_pcm(&decoded))
}

/// Read and convert the file at `path`, using its extension as a hint.
pub fn convert_file(path: &Path) -> Result<PcmBuffer, ConvertError> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|e| e.to_str());
    convert_with_hint(bytes, ext)
}

/// [`convert_with_hint`] on tokio's blocking pool, so decode and resample
/// don't stall the async runtime.
pub async fn convert_async(
    bytes: Vec<u8>,
    extension: Option<String>,
) -> Result<PcmBuffer, ConvertError> {
    tokio::task::spawn_blocking(move || convert_with_hint(bytes, extension.as_deref()))
        .await
        .map_err(|e| ConvertError::Task(e.to_string()))?
}

/// `true` when `path` has one of [`SUPPORTED_EXTENSIONS`] (case-insensitive).
pub fn is_supported_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Split canonical PCM into transport chunks of
/// [`TRANSPORT_CHUNK_BYTES`]; the last chunk may be shorter.
pub fn transport_chunks(pcm: &PcmBuffer) -> std::slice::Chunks<'_, u8> {
    pcm.as_bytes().chunks(TRANSPORT_CHUNK_BYTES)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
