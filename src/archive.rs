//! Persisting PCM to disk as timestamped WAV files.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

use crate::audio::{wav, PcmBuffer};

/// Write `pcm` as a canonical WAV file named `<prefix>-<unix-millis>.wav`
/// inside `dir`, creating the directory if needed.  Returns the file path.
pub fn save_wav(dir: &Path, prefix: &str, pcm: &PcmBuffer) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating {}", dir.display()))?;

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let path = unique_path(dir, prefix, millis);

    std::fs::write(&path, wav::wrap_canonical(pcm))
        .with_context(|| format!("writing {}", path.display()))?;
    log::info!(
        "archive: saved {} ({:.2}s)",
        path.display(),
        pcm.duration().as_secs_f32()
    );
    Ok(path)
}

/// Two saves within the same millisecond get `-1`, `-2`, … suffixes.
fn unique_path(dir: &Path, prefix: &str, millis: u128) -> PathBuf {
    let mut path = dir.join(format!("{prefix}-{millis}.wav"));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{prefix}-{millis}-{n}.wav"));
        n += 1;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_readable_wav() {
        let dir = tempdir().unwrap();
        let pcm = PcmBuffer::from_samples(&[0, 100, -100, i16::MAX]);
        let path = save_wav(dir.path(), "recording", &pcm).unwrap();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("recording-"));
        assert!(name.ends_with(".wav"));

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 100, -100, i16::MAX]);
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let path = save_wav(&nested, "reply", &PcmBuffer::default()).unwrap();
        assert!(path.starts_with(&nested));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 44);
    }

    #[test]
    fn same_millisecond_does_not_overwrite() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("x-5.wav"), b"taken").unwrap();
        let path = unique_path(dir.path(), "x", 5);
        assert_eq!(path, dir.path().join("x-5-1.wav"));
    }
}
