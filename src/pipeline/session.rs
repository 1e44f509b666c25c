//! The voice session: one microphone, one speaker, one transport.
//!
//! [`VoiceSession`] is the boundary between the audio core and whatever
//! carries PCM to and from the remote service.  Outbound audio leaves through
//! [`TransportSink::on_capture_complete`]; inbound audio arrives through
//! [`VoiceSession::feed_playback`] (or the shared [`ResponsePlayer`] handle).
//!
//! ```text
//! start_capture ──▶ stop playback (barge-in) ──▶ CaptureEngine::start
//! stop_capture  ──▶ CaptureEngine::stop ──▶ TransportSink::on_capture_complete
//!
//! transport task ──feed_playback(chunk)──▶ ResponsePlayer ──▶ PlaybackScheduler
//!                                               └──▶ received audio (for archiving)
//! ```
//!
//! Nothing here is global: every session owns its devices, and two sessions
//! never share state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::audio::{
    CaptureEngine, CaptureError, InputDevice, OutputDevice, PcmBuffer, PlaybackScheduler,
};

use super::state::TurnState;

// ---------------------------------------------------------------------------
// TransportSink
// ---------------------------------------------------------------------------

/// Receives each finished recording for delivery to the remote service.
pub trait TransportSink: Send + Sync {
    fn on_capture_complete(&self, pcm: PcmBuffer);
}

/// Forwards recordings into a tokio channel, typically drained by an async
/// uploader task.
impl TransportSink for mpsc::UnboundedSender<PcmBuffer> {
    fn on_capture_complete(&self, pcm: PcmBuffer) {
        if self.send(pcm).is_err() {
            log::warn!("session: transport receiver gone, recording discarded");
        }
    }
}

// ---------------------------------------------------------------------------
// ResponsePlayer
// ---------------------------------------------------------------------------

/// Playback half of a session.
///
/// `Send + Sync`: hand an `Arc<ResponsePlayer>` to the transport task so it
/// can feed chunks while the session owner keeps driving the microphone.
pub struct ResponsePlayer {
    scheduler: PlaybackScheduler,
    received: Mutex<Vec<u8>>,
}

impl ResponsePlayer {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        Self {
            scheduler: PlaybackScheduler::new(device),
            received: Mutex::new(Vec::new()),
        }
    }

    fn received(&self) -> MutexGuard<'_, Vec<u8>> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a fresh playback stream for a new assistant reply and forget
    /// the audio collected for the previous one.
    pub fn begin_response(&self) {
        self.received().clear();
        self.scheduler.start_stream();
    }

    /// Schedule one chunk of canonical PCM and keep a copy for archiving.
    ///
    /// A trailing odd byte is not a whole sample and is dropped from both
    /// the playback and the archived copy, so later chunks stay aligned.
    ///
    /// Returns the instant the chunk will start on the output clock, or
    /// `None` when it was not scheduled (no active stream, empty chunk, or
    /// rejected by the device).
    pub fn feed_playback(&self, chunk: &[u8]) -> Option<Duration> {
        self.received()
            .extend_from_slice(&chunk[..chunk.len() & !1]);
        self.scheduler.enqueue(chunk)
    }

    /// Silence the reply immediately.
    pub fn request_playback_stop(&self) {
        self.scheduler.stop_stream();
    }

    /// Everything fed since the last [`begin_response`](Self::begin_response)
    /// as one PCM buffer; the internal copy is cleared.
    pub fn take_received_audio(&self) -> PcmBuffer {
        let bytes = std::mem::take(&mut *self.received());
        PcmBuffer::from_le_bytes(&bytes)
    }

    /// `true` while reply audio is scheduled or audible.
    pub fn is_responding(&self) -> bool {
        self.scheduler.is_playing() && self.scheduler.in_flight_len() > 0
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn close(&self) {
        self.scheduler.close();
    }
}

// ---------------------------------------------------------------------------
// VoiceSession
// ---------------------------------------------------------------------------

/// One conversational session: capture engine, response player and the
/// transport sink recordings are handed to.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rt_voice_audio::audio::{CpalInput, CpalOutput};
/// use rt_voice_audio::pipeline::VoiceSession;
///
/// let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
/// let mut session = VoiceSession::new(
///     Box::new(CpalInput::new(None)),
///     Box::new(CpalOutput::open(None).unwrap()),
///     Arc::new(tx),
///     60.0,
/// );
/// session.start_capture().unwrap();
/// std::thread::sleep(std::time::Duration::from_secs(2));
/// let pcm = session.stop_capture().unwrap(); // also sent to the transport
/// # let _ = pcm;
/// ```
pub struct VoiceSession {
    capture: CaptureEngine,
    player: Arc<ResponsePlayer>,
    sink: Arc<dyn TransportSink>,
}

impl VoiceSession {
    pub fn new(
        input: Box<dyn InputDevice>,
        output: Box<dyn OutputDevice>,
        sink: Arc<dyn TransportSink>,
        max_recording_secs: f32,
    ) -> Self {
        Self {
            capture: CaptureEngine::new(input, max_recording_secs),
            player: Arc::new(ResponsePlayer::new(output)),
            sink,
        }
    }

    /// Start recording the user.  Any assistant audio still playing is
    /// stopped first so the two never overlap.
    ///
    /// # Errors
    ///
    /// Whatever [`CaptureEngine::start`] reports.  Playback is stopped even
    /// when the microphone then fails to open.
    pub fn start_capture(&mut self) -> Result<(), CaptureError> {
        if self.player.scheduler().is_playing() {
            log::info!("session: user started speaking, interrupting playback");
            self.player.request_playback_stop();
        }
        self.capture.start()
    }

    /// Stop recording, hand the PCM to the transport sink and return it.
    pub fn stop_capture(&mut self) -> Result<PcmBuffer, CaptureError> {
        let pcm = self.capture.stop()?;
        self.sink.on_capture_complete(pcm.clone());
        Ok(pcm)
    }

    pub fn begin_response(&self) {
        self.player.begin_response();
    }

    pub fn feed_playback(&self, chunk: &[u8]) -> Option<Duration> {
        self.player.feed_playback(chunk)
    }

    pub fn request_playback_stop(&self) {
        self.player.request_playback_stop();
    }

    pub fn take_received_audio(&self) -> PcmBuffer {
        self.player.take_received_audio()
    }

    /// Shared handle for feeding playback from another task.
    pub fn player(&self) -> Arc<ResponsePlayer> {
        Arc::clone(&self.player)
    }

    /// Samples lost to a full accumulation buffer in the last recording.
    pub fn dropped_samples(&self) -> usize {
        self.capture.dropped_samples()
    }

    pub fn state(&self) -> TurnState {
        if self.capture.is_recording() {
            TurnState::Recording
        } else if self.player.is_responding() {
            TurnState::Responding
        } else {
            TurnState::Idle
        }
    }

    /// Release both devices.  A recording in progress is discarded.
    pub fn close(&mut self) {
        if self.capture.is_recording() {
            if let Ok(pcm) = self.capture.stop() {
                log::debug!("session: discarded {} bytes on close", pcm.len_bytes());
            }
        }
        self.player.close();
        log::info!("session: closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{MockInput, MockOutput};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// `samples` canonical samples as LE bytes.
    fn chunk(samples: usize, value: i16) -> Vec<u8> {
        PcmBuffer::from_samples(&vec![value; samples])
            .as_bytes()
            .to_vec()
    }

    struct Harness {
        input: MockInput,
        output: MockOutput,
        rx: mpsc::UnboundedReceiver<PcmBuffer>,
        session: VoiceSession,
    }

    fn harness() -> Harness {
        let input = MockInput::canonical();
        let output = MockOutput::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = VoiceSession::new(
            Box::new(input.clone()),
            Box::new(output.clone()),
            Arc::new(tx),
            10.0,
        );
        Harness {
            input,
            output,
            rx,
            session,
        }
    }

    #[test]
    fn stop_capture_hands_pcm_to_transport() {
        let mut h = harness();
        h.session.start_capture().unwrap();
        assert_eq!(h.session.state(), TurnState::Recording);

        h.input.deliver(&[0.5; 128]);
        h.input.deliver(&[0.5; 128]);
        let pcm = h.session.stop_capture().unwrap();

        assert_eq!(pcm.len_bytes(), 512);
        let sent = h.rx.try_recv().expect("recording forwarded");
        assert_eq!(sent, pcm);
        assert_eq!(h.session.state(), TurnState::Idle);
    }

    #[test]
    fn stop_without_start_sends_nothing() {
        let mut h = harness();
        assert_eq!(h.session.stop_capture(), Err(CaptureError::NotRecording));
        assert!(h.rx.try_recv().is_err());
    }

    #[test]
    fn fed_chunks_play_back_to_back() {
        let h = harness();
        h.session.begin_response();
        assert_eq!(h.session.feed_playback(&chunk(2_400, 1)), Some(ms(0)));
        assert_eq!(h.session.feed_playback(&chunk(1_200, 1)), Some(ms(100)));
        assert_eq!(h.output.scheduled().len(), 2);
        assert_eq!(h.session.state(), TurnState::Responding);

        h.output.advance(ms(150));
        assert_eq!(h.session.state(), TurnState::Idle);
    }

    #[test]
    fn starting_capture_interrupts_playback() {
        let mut h = harness();
        h.session.begin_response();
        h.session.feed_playback(&chunk(2_400, 1));
        h.session.feed_playback(&chunk(2_400, 1));
        h.output.advance(ms(50));

        h.session.start_capture().unwrap();

        assert_eq!(h.output.active_count(), 0);
        assert_eq!(h.output.cancelled().len(), 2);
        assert!(!h.session.player().scheduler().is_playing());
        assert_eq!(h.session.state(), TurnState::Recording);
        // Late chunks of the interrupted reply stay silent.
        assert_eq!(h.session.feed_playback(&chunk(2_400, 1)), None);
    }

    #[test]
    fn playback_is_stopped_even_if_microphone_fails() {
        let output = MockOutput::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = VoiceSession::new(
            Box::new(MockInput::unavailable()),
            Box::new(output.clone()),
            Arc::new(tx),
            10.0,
        );
        session.begin_response();
        session.feed_playback(&chunk(2_400, 1));

        assert!(matches!(
            session.start_capture(),
            Err(CaptureError::DeviceUnavailable(_))
        ));
        assert_eq!(output.active_count(), 0);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[test]
    fn request_playback_stop_silences_reply() {
        let h = harness();
        h.session.begin_response();
        h.session.feed_playback(&chunk(4_800, 1));
        h.session.request_playback_stop();
        assert_eq!(h.output.active_count(), 0);
        assert_eq!(h.session.state(), TurnState::Idle);
    }

    #[test]
    fn received_audio_is_collected_per_response() {
        let h = harness();
        h.session.begin_response();
        h.session.feed_playback(&chunk(100, 7));
        h.session.feed_playback(&chunk(50, -7));

        let reply = h.session.take_received_audio();
        assert_eq!(reply.sample_count(), 150);
        assert_eq!(reply.samples()[0], 7);
        assert_eq!(reply.samples()[149], -7);
        assert!(h.session.take_received_audio().is_empty());

        h.session.feed_playback(&chunk(10, 1));
        h.session.begin_response();
        assert!(h.session.take_received_audio().is_empty());
    }

    #[test]
    fn odd_chunk_does_not_shift_later_samples() {
        let h = harness();
        h.session.begin_response();

        h.session.feed_playback(&[0x10, 0x00, 0x7F]);
        h.session
            .feed_playback(PcmBuffer::from_samples(&[1_000, 2_000]).as_bytes());

        let reply = h.session.take_received_audio();
        assert_eq!(reply.samples(), vec![16, 1_000, 2_000]);
    }

    #[test]
    fn player_can_be_fed_from_another_thread() {
        let h = harness();
        let player = h.session.player();
        player.begin_response();

        std::thread::spawn(move || {
            for _ in 0..5 {
                player.feed_playback(&chunk(2_400, 1));
            }
        })
        .join()
        .unwrap();

        let starts: Vec<_> = h.output.scheduled().iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![ms(0), ms(100), ms(200), ms(300), ms(400)]);
    }

    #[test]
    fn close_releases_both_devices() {
        let mut h = harness();
        h.session.start_capture().unwrap();
        h.input.deliver(&[0.1; 10]);
        h.session.close();

        assert!(!h.input.is_open());
        assert!(h.output.is_closed());
        assert!(h.rx.try_recv().is_err());
        assert_eq!(h.session.state(), TurnState::Idle);
    }

    #[test]
    fn sink_with_dropped_receiver_does_not_fail_capture() {
        let mut h = harness();
        drop(std::mem::replace(&mut h.rx, mpsc::unbounded_channel().1));
        h.session.start_capture().unwrap();
        h.input.deliver(&[0.2; 24]);
        assert_eq!(h.session.stop_capture().unwrap().sample_count(), 24);
    }

    #[test]
    fn player_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ResponsePlayer>();
    }
}
