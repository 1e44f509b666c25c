//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\rt-voice-audio\
//!   macOS:   ~/Library/Application Support/rt-voice-audio/
//!   Linux:   ~/.config/rt-voice-audio/
//!
//! Data dir (recordings, responses, converted files):
//!   Windows: %LOCALAPPDATA%\rt-voice-audio\
//!   macOS:   ~/Library/Application Support/rt-voice-audio/
//!   Linux:   ~/.local/share/rt-voice-audio/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Microphone recordings.
    pub recordings_dir: PathBuf,
    /// Audio received from the remote service.
    pub responses_dir: PathBuf,
    /// Canonical WAVs produced by file conversion.
    pub converted_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "rt-voice-audio";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            recordings_dir: data_dir.join("recordings"),
            responses_dir: data_dir.join("assistant_responses"),
            converted_dir: data_dir.join("converted"),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_non_empty() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
        assert!(paths.recordings_dir.ends_with("recordings"));
        assert!(paths.responses_dir.ends_with("assistant_responses"));
        assert_ne!(paths.recordings_dir, paths.converted_dir);
    }
}
