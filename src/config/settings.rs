//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files.  Every section is
//! `#[serde(default)]`, so a hand-written `settings.toml` only needs the keys
//! it wants to change.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Microphone capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device name; `None` means the system default.
    pub input_device: Option<String>,
    /// Longest recording the accumulation buffer is sized for, in seconds.
    /// Audio past this point is dropped.
    ///
    /// The buffer is allocated when recording starts and holds raw device
    /// samples: `secs × device rate × channels × 4` bytes, about 115 MB for
    /// the default on a 48 kHz stereo microphone.  Lower it on small
    /// machines.
    pub max_recording_secs: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            max_recording_secs: 300.0,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Speaker / streaming playback settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output device name; `None` means the system default.
    pub output_device: Option<String>,
    /// Delay between transport chunks when replaying a file, in
    /// milliseconds.  `100` mimics a live stream of 4800-byte chunks; `0`
    /// pushes everything at once.
    pub chunk_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            chunk_interval_ms: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

/// Where WAV files are written.  `None` falls back to [`AppPaths`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Microphone recordings.
    pub recordings_dir: Option<PathBuf>,
    /// Audio received from the remote service.
    pub responses_dir: Option<PathBuf>,
    /// Output of file / folder conversion.
    pub converted_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn recordings_dir(&self, paths: &AppPaths) -> PathBuf {
        self.recordings_dir
            .clone()
            .unwrap_or_else(|| paths.recordings_dir.clone())
    }

    pub fn responses_dir(&self, paths: &AppPaths) -> PathBuf {
        self.responses_dir
            .clone()
            .unwrap_or_else(|| paths.responses_dir.clone())
    }

    pub fn converted_dir(&self, paths: &AppPaths) -> PathBuf {
        self.converted_dir
            .clone()
            .unwrap_or_else(|| paths.converted_dir.clone())
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use rt_voice_audio::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `env_logger` filter used when `RUST_LOG` is not set.
    pub log_level: String,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub storage: StorageConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original, loaded);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.capture.input_device.is_none());
        assert_eq!(cfg.capture.max_recording_secs, 300.0);
        assert!(cfg.playback.output_device.is_none());
        assert_eq!(cfg.playback.chunk_interval_ms, 100);
        assert!(cfg.storage.recordings_dir.is_none());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[capture]\ninput_device = \"USB Mic\"\n").unwrap();

        let cfg = AppConfig::load_from(&path).expect("load");
        assert_eq!(cfg.capture.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(cfg.capture.max_recording_secs, 300.0);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.playback, PlaybackConfig::default());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "capture = [[[").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.log_level = "debug".into();
        cfg.capture.max_recording_secs = 30.0;
        cfg.playback.output_device = Some("Headphones".into());
        cfg.playback.chunk_interval_ms = 0;
        cfg.storage.recordings_dir = Some(PathBuf::from("/tmp/recs"));

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn storage_overrides_win_over_defaults() {
        let paths = AppPaths::new();
        let mut storage = StorageConfig::default();
        assert_eq!(storage.recordings_dir(&paths), paths.recordings_dir);

        storage.recordings_dir = Some(PathBuf::from("elsewhere"));
        assert_eq!(storage.recordings_dir(&paths), PathBuf::from("elsewhere"));
        assert_eq!(storage.responses_dir(&paths), paths.responses_dir);
        assert_eq!(storage.converted_dir(&paths), paths.converted_dir);
    }
}
