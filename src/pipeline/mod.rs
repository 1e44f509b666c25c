//! Session layer: turn-taking between the user's microphone and the
//! assistant's voice.
//!
//! # Architecture
//!
//! ```text
//! VoiceSession
//!   ├─ CaptureEngine  ──stop_capture──▶ TransportSink (e.g. tokio mpsc)
//!   └─ Arc<ResponsePlayer>
//!        └─ PlaybackScheduler ◀── feed_playback(chunk) ◀── transport task
//! ```
//!
//! [`TurnState`] reports who has the floor.  Starting a capture while the
//! assistant is talking interrupts the playback.

pub mod session;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use session::{ResponsePlayer, TransportSink, VoiceSession};
pub use state::TurnState;
