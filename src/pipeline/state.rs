//! Turn-taking state of a voice session.
//!
//! [`TurnState`] is derived on demand from the capture engine and the
//! playback scheduler rather than stored, so it can never drift from what the
//! devices are actually doing.

// ---------------------------------------------------------------------------
// TurnState
// ---------------------------------------------------------------------------

/// Who currently "has the floor" in a conversation.
///
/// ```text
/// Idle ──start_capture──▶ Recording ──stop_capture──▶ Idle
/// Idle ──feed_playback──▶ Responding ──last chunk finished──▶ Idle
/// Responding ──start_capture (barge-in)──▶ Recording
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    /// Neither the microphone nor the speaker is in use.
    #[default]
    Idle,

    /// The microphone is open; the user is speaking.
    Recording,

    /// Assistant audio is scheduled or audible.
    Responding,
}

impl TurnState {
    /// `true` while a device is in use.
    ///
    /// ```
    /// use rt_voice_audio::pipeline::TurnState;
    ///
    /// assert!(!TurnState::Idle.is_busy());
    /// assert!(TurnState::Recording.is_busy());
    /// assert!(TurnState::Responding.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        !matches!(self, TurnState::Idle)
    }

    /// A short human-readable label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            TurnState::Idle => "Idle",
            TurnState::Recording => "Recording",
            TurnState::Responding => "Responding",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_is_not_busy() {
        assert!(!TurnState::Idle.is_busy());
    }

    #[test]
    fn recording_and_responding_are_busy() {
        assert!(TurnState::Recording.is_busy());
        assert!(TurnState::Responding.is_busy());
    }

    #[test]
    fn labels() {
        assert_eq!(TurnState::Idle.label(), "Idle");
        assert_eq!(TurnState::Recording.label(), "Recording");
        assert_eq!(TurnState::Responding.to_string(), "Responding");
    }

    #[test]
    fn default_is_idle() {
        assert_eq!(TurnState::default(), TurnState::Idle);
    }
}
