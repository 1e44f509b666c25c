//! In-memory devices for exercising the capture engine and the playback
//! scheduler without audio hardware.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::buffer::FrameWriter;
use super::capture::{CaptureError, InputDevice, InputStream};
use super::format::AudioFormat;
use super::playback::{ChunkId, OutputDevice, PlaybackError};

// ---------------------------------------------------------------------------
// MockInput
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InputState {
    writer: Option<FrameWriter>,
    opens: usize,
    releases: usize,
}

/// Input device whose "callback" is driven by the test via [`deliver`].
///
/// [`deliver`]: MockInput::deliver
#[derive(Clone)]
pub struct MockInput {
    format: Option<AudioFormat>,
    state: Arc<Mutex<InputState>>,
}

impl MockInput {
    pub fn canonical() -> Self {
        Self::with_format(AudioFormat::CANONICAL)
    }

    pub fn with_format(format: AudioFormat) -> Self {
        Self {
            format: Some(format),
            state: Arc::default(),
        }
    }

    /// A device that fails to open, like a missing microphone.
    pub fn unavailable() -> Self {
        Self {
            format: None,
            state: Arc::default(),
        }
    }

    /// Play the part of the real-time callback.  Returns samples stored.
    pub fn deliver(&self, frame: &[f32]) -> usize {
        match self.state.lock().unwrap().writer.as_mut() {
            Some(w) => w.push_frame(frame),
            None => 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().writer.is_some()
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn releases(&self) -> usize {
        self.state.lock().unwrap().releases
    }
}

impl InputDevice for MockInput {
    fn negotiate(&mut self, _preferred: AudioFormat) -> Result<AudioFormat, CaptureError> {
        self.format
            .ok_or_else(|| CaptureError::DeviceUnavailable("no microphone".into()))
    }

    fn open(
        &mut self,
        _format: AudioFormat,
        writer: FrameWriter,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        let mut st = self.state.lock().unwrap();
        st.writer = Some(writer);
        st.opens += 1;
        Ok(Box::new(MockStream {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockStream {
    state: Arc<Mutex<InputState>>,
}

impl InputStream for MockStream {}

impl Drop for MockStream {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap();
        st.writer = None;
        st.releases += 1;
    }
}

// ---------------------------------------------------------------------------
// MockOutput
// ---------------------------------------------------------------------------

/// One chunk as the mock device received it.
#[derive(Debug, Clone)]
pub struct MockChunk {
    pub id: ChunkId,
    pub start: Duration,
    pub samples: Arc<[f32]>,
}

impl MockChunk {
    fn end(&self) -> Duration {
        self.start + AudioFormat::CANONICAL.duration_of(self.samples.len())
    }
}

#[derive(Default)]
struct OutputState {
    clock: Duration,
    completions: Option<mpsc::Sender<ChunkId>>,
    scheduled: Vec<MockChunk>,
    active: BTreeMap<ChunkId, MockChunk>,
    cancelled: Vec<ChunkId>,
    reject_next: bool,
    closed: bool,
}

/// Output device with a hand-cranked clock.
///
/// [`advance`](Self::advance) moves the clock and reports every chunk whose
/// end has been reached as finished, like a real device's completion
/// callback.
#[derive(Clone, Default)]
pub struct MockOutput {
    state: Arc<Mutex<OutputState>>,
}

impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_clock(&self, now: Duration) {
        self.state.lock().unwrap().clock = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut st = self.state.lock().unwrap();
        st.clock += by;
        let now = st.clock;
        let finished: Vec<ChunkId> = st
            .active
            .values()
            .filter(|c| c.end() <= now)
            .map(|c| c.id)
            .collect();
        for id in finished {
            st.active.remove(&id);
            if let Some(tx) = &st.completions {
                let _ = tx.send(id);
            }
        }
    }

    /// Make the next `schedule` call fail.
    pub fn reject_next(&self) {
        self.state.lock().unwrap().reject_next = true;
    }

    pub fn scheduled(&self) -> Vec<MockChunk> {
        self.state.lock().unwrap().scheduled.clone()
    }

    /// Chunks that would currently be audible or waiting to start.
    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().active.len()
    }

    pub fn cancelled(&self) -> Vec<ChunkId> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl OutputDevice for MockOutput {
    fn attach(&mut self, completions: mpsc::Sender<ChunkId>) {
        self.state.lock().unwrap().completions = Some(completions);
    }

    fn now(&self) -> Duration {
        self.state.lock().unwrap().clock
    }

    fn schedule(
        &mut self,
        id: ChunkId,
        samples: Arc<[f32]>,
        start_at: Duration,
    ) -> Result<(), PlaybackError> {
        let mut st = self.state.lock().unwrap();
        if st.closed {
            return Err(PlaybackError::SchedulingFailure("device closed".into()));
        }
        if std::mem::take(&mut st.reject_next) {
            return Err(PlaybackError::SchedulingFailure("rejected by test".into()));
        }
        let chunk = MockChunk {
            id,
            start: start_at,
            samples,
        };
        st.scheduled.push(chunk.clone());
        st.active.insert(id, chunk);
        Ok(())
    }

    fn cancel(&mut self, id: ChunkId) {
        let mut st = self.state.lock().unwrap();
        if st.active.remove(&id).is_some() {
            st.cancelled.push(id);
        }
    }

    fn close(&mut self) {
        let mut st = self.state.lock().unwrap();
        st.active.clear();
        st.closed = true;
    }
}
