//! Client-side real-time audio for a voice assistant.
//!
//! * [`audio`]: capture, format conversion, WAV framing, gapless playback
//!   scheduling and offline file conversion.
//! * [`pipeline`]: the [`VoiceSession`](pipeline::VoiceSession) tying a
//!   microphone and a speaker to a transport.
//! * [`config`]: TOML settings and platform paths.
//! * [`archive`]: timestamped WAV files on disk.

pub mod archive;
pub mod audio;
pub mod config;
pub mod pipeline;
