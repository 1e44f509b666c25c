//! Sample-format conversion, channel mixing and resampling.
//!
//! The pipeline works in **24 kHz mono 16-bit PCM**.  Devices and decoders
//! hand us interleaved `f32` at whatever rate they like, so this module
//! provides the conversion steps:
//!
//! 1. [`downmix_to_mono`] / [`interleaved_to_mono`]: average channels.
//! 2. [`resample`]: change sample rate (band-limited, via `rubato`).
//! 3. [`float_to_int16`] / [`int16_to_float`]: quantise and back.
//!
//! [`to_canonical`] chains all three.  Every function here is pure and
//! allocation-bounded by its output, so it is safe to call from any number
//! of sessions at once.

use rubato::{FftFixedIn, Resampler};

use super::format::CANONICAL_SAMPLE_RATE;

/// Scale applied to non-negative samples (`i16::MAX`).
const POS_SCALE: f32 = 0x7FFF as f32;
/// Scale applied to negative samples (`-i16::MIN`).
const NEG_SCALE: f32 = 0x8000 as f32;

/// Input frames per FFT resampler call.
const RESAMPLE_CHUNK: usize = 1_024;
const RESAMPLE_SUB_CHUNKS: usize = 2;

// ---------------------------------------------------------------------------
// float_to_int16 / int16_to_float
// ---------------------------------------------------------------------------

/// Quantise `f32` samples in `[-1.0, 1.0]` to `i16`.
///
/// Samples are clamped first, then scaled by `0x7FFF` when non-negative and
/// `0x8000` when negative, truncating toward zero.  `NaN` becomes `0`.
///
/// # Example
///
/// ```rust
/// use rt_voice_audio::audio::float_to_int16;
///
/// assert_eq!(float_to_int16(&[0.5, -1.0, 2.0]), vec![16_383, -32_768, 32_767]);
/// ```
pub fn float_to_int16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            if s.is_nan() {
                return 0;
            }
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * NEG_SCALE) as i16
            } else {
                (s * POS_SCALE) as i16
            }
        })
        .collect()
}

/// Inverse of [`float_to_int16`]: divide by `0x7FFF` for non-negative values
/// and by `0x8000` for negative ones, so both ends of the asymmetric range map
/// exactly onto `±1.0`.
pub fn int16_to_float(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&s| {
            if s < 0 {
                f32::from(s) / NEG_SCALE
            } else {
                f32::from(s) / POS_SCALE
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Channel mixing
// ---------------------------------------------------------------------------

/// Average planar channels into one.
///
/// The output has the per-channel length.  If the channels disagree on
/// length the shortest one wins; with no channels the result is empty.
///
/// # Example
///
/// ```rust
/// use rt_voice_audio::audio::downmix_to_mono;
///
/// let mono = downmix_to_mono(&[vec![1.0, 0.5], vec![0.0, 0.5]]);
/// assert_eq!(mono, vec![0.5, 0.5]);
/// ```
pub fn downmix_to_mono(channels: &[Vec<f32>]) -> Vec<f32> {
    match channels {
        [] => Vec::new(),
        [only] => only.clone(),
        _ => {
            let len = channels.iter().map(Vec::len).min().unwrap_or(0);
            let n = channels.len() as f32;
            (0..len)
                .map(|i| channels.iter().map(|ch| ch[i]).sum::<f32>() / n)
                .collect()
        }
    }
}

/// Split interleaved samples into one `Vec` per channel.
///
/// An incomplete trailing frame is discarded.
pub fn deinterleave(samples: &[f32], channels: u16) -> Vec<Vec<f32>> {
    let n = channels as usize;
    if n == 0 {
        return Vec::new();
    }
    let frames = samples.len() / n;
    let mut planes = vec![Vec::with_capacity(frames); n];
    for frame in samples.chunks_exact(n) {
        for (plane, &s) in planes.iter_mut().zip(frame) {
            plane.push(s);
        }
    }
    planes
}

/// Downmix interleaved samples straight to mono without building planes.
///
/// Mono input is returned as-is; zero channels yields an empty vector.
pub fn interleaved_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Number of samples [`resample`] produces: `round(len × rate_out / rate_in)`.
pub fn resampled_len(len: usize, rate_in: u32, rate_out: u32) -> usize {
    if rate_in == 0 {
        return 0;
    }
    let num = len as u128 * u128::from(rate_out);
    let den = u128::from(rate_in);
    ((2 * num + den) / (2 * den)) as usize
}

/// Resample mono `input` from `rate_in` Hz to `rate_out` Hz.
///
/// Rate changes go through `rubato`'s FFT resampler, whose anti-aliasing
/// filter removes content above the output Nyquist frequency before
/// decimating.  The filter delay is trimmed off the front and the tail is
/// zero-padded through the filter, so:
///
/// * Equal rates return a copy of the input.
/// * The output length is exactly [`resampled_len`], so the buffer keeps the
///   input's duration to within half an output sample.
///
/// # Example
///
/// ```rust
/// use rt_voice_audio::audio::resample;
///
/// let hi = vec![0.25_f32; 4_800]; // 100 ms @ 48 kHz
/// let lo = resample(&hi, 48_000, 24_000);
/// assert_eq!(lo.len(), 2_400);
/// ```
pub fn resample(input: &[f32], rate_in: u32, rate_out: u32) -> Vec<f32> {
    if rate_in == rate_out {
        return input.to_vec();
    }
    let out_len = resampled_len(input.len(), rate_in, rate_out);
    if input.is_empty() || out_len == 0 {
        return Vec::new();
    }

    match resample_fft(input, rate_in, rate_out, out_len) {
        Ok(out) => out,
        Err(err) => {
            log::warn!("resample: {err}; falling back to linear interpolation");
            resample_linear(input, rate_in, rate_out)
        }
    }
}

fn resample_fft(
    input: &[f32],
    rate_in: u32,
    rate_out: u32,
    out_len: usize,
) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    let mut resampler = FftFixedIn::<f32>::new(
        rate_in as usize,
        rate_out as usize,
        RESAMPLE_CHUNK,
        RESAMPLE_SUB_CHUNKS,
        1,
    )?;

    let delay = resampler.output_delay();
    let wanted = delay + out_len;
    let mut out = Vec::with_capacity(wanted + resampler.output_frames_max());
    let mut block: Vec<f32> = Vec::with_capacity(resampler.input_frames_max());
    let mut pos = 0;

    while out.len() < wanted {
        let take = resampler.input_frames_next().min(input.len() - pos);
        block.clear();
        block.extend_from_slice(&input[pos..pos + take]);
        block.resize(resampler.input_frames_next(), 0.0);
        pos += take;

        let processed = resampler.process(&[block.as_slice()], None)?;
        out.extend_from_slice(&processed[0]);
    }

    out.drain(..delay);
    out.truncate(out_len);
    Ok(out)
}

/// Linear-interpolation resampler with the same length contract as
/// [`resample`].
///
/// No anti-aliasing filter, so only suitable for upsampling.  It is
/// continuous across independently converted chunks, which the filtered
/// path is not, so the output device uses it to lift 24 kHz chunks to the
/// hardware rate.
pub fn resample_linear(input: &[f32], rate_in: u32, rate_out: u32) -> Vec<f32> {
    if rate_in == rate_out {
        return input.to_vec();
    }
    let out_len = resampled_len(input.len(), rate_in, rate_out);
    if input.is_empty() || out_len == 0 {
        return Vec::new();
    }

    let step = f64::from(rate_in) / f64::from(rate_out);
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos as usize;
            if idx >= last {
                return input[last];
            }
            let frac = (pos - idx as f64) as f32;
            input[idx] * (1.0 - frac) + input[idx + 1] * frac
        })
        .collect()
}

// ---------------------------------------------------------------------------
// to_canonical
// ---------------------------------------------------------------------------

/// Interleaved `f32` at any rate/channel count → canonical 24 kHz mono `i16`.
pub fn to_canonical(samples: &[f32], channels: u16, sample_rate: u32) -> Vec<i16> {
    let mono = interleaved_to_mono(samples, channels);
    let resampled = resample(&mono, sample_rate, CANONICAL_SAMPLE_RATE);
    float_to_int16(&resampled)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
