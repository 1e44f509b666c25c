//! Gapless streaming playback of arriving PCM chunks.
//!
//! [`PlaybackScheduler`] keeps a single timeline pointer, `next_play_time`,
//! on the output device's clock.  Every chunk is scheduled to start exactly
//! where the previous one ends, so chunks of any size arriving at any pace
//! play back-to-back in the order they were enqueued:
//!
//! ```text
//! enqueue(c1) ─▶ start t0        next = t0 + d1
//! enqueue(c2) ─▶ start t0+d1     next = t0 + d1 + d2
//! ...stall: clock passes `next`...
//! enqueue(c3) ─▶ start now       next = now + d3        (catch-up snap)
//! ```
//!
//! The snap only moves the timeline forward; it never drops or truncates
//! queued sample data.
//!
//! All scheduler state sits behind one mutex.  The device reports finished
//! chunks over an `mpsc` channel and those reports are applied under the same
//! lock, so completions can never race [`stop_stream`](PlaybackScheduler::stop_stream).

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

use super::convert::int16_to_float;
use super::format::{decode_le_i16, AudioFormat};

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors from the output side.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlaybackError {
    /// No output device, or the platform refused to open it.
    #[error("output device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device rejected one scheduled chunk.
    #[error("output device rejected chunk: {0}")]
    SchedulingFailure(String),
}

// ---------------------------------------------------------------------------
// Device seam
// ---------------------------------------------------------------------------

/// Identifier of one scheduled chunk; unique for the lifetime of a scheduler.
pub type ChunkId = u64;

/// An output device with its own clock that can start buffers at a given
/// instant on that clock.
///
/// Implementations must be `Send` so the scheduler can be shared across
/// threads behind an `Arc`.
pub trait OutputDevice: Send {
    /// Register where finished chunk ids should be reported.  Called once by
    /// [`PlaybackScheduler::new`].
    fn attach(&mut self, completions: mpsc::Sender<ChunkId>);

    /// Current instant on the output clock.
    fn now(&self) -> Duration;

    /// Start playing canonical mono `samples` at `start_at`.
    fn schedule(
        &mut self,
        id: ChunkId,
        samples: Arc<[f32]>,
        start_at: Duration,
    ) -> Result<(), PlaybackError>;

    /// Stop `id` immediately, even mid-chunk.  Unknown ids are ignored.
    fn cancel(&mut self, id: ChunkId);

    /// Release the device.  Further calls are no-ops.
    fn close(&mut self);
}

// ---------------------------------------------------------------------------
// ScheduledChunk
// ---------------------------------------------------------------------------

/// A chunk handed to the device and not yet finished.
#[derive(Debug, Clone)]
pub struct ScheduledChunk {
    pub id: ChunkId,
    pub samples: Arc<[f32]>,
    pub start_time: Duration,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

struct SchedulerState {
    device: Box<dyn OutputDevice>,
    completions: mpsc::Receiver<ChunkId>,
    next_play_time: Duration,
    in_flight: BTreeMap<ChunkId, ScheduledChunk>,
    is_playing: bool,
    closed: bool,
    next_id: ChunkId,
    underruns: u64,
    dropped_chunks: u64,
}

impl SchedulerState {
    /// Apply every completion the device has reported so far.
    fn reap(&mut self) {
        while let Ok(id) = self.completions.try_recv() {
            if self.in_flight.remove(&id).is_some() {
                log::trace!("playback: chunk {id} finished");
            }
        }
    }

    fn cancel_all(&mut self) {
        for id in std::mem::take(&mut self.in_flight).into_keys() {
            self.device.cancel(id);
        }
        // Anything the device finished in the meantime is stale now.
        while self.completions.try_recv().is_ok() {}
    }
}

/// Schedules arriving PCM chunks for gapless, in-order playback.
///
/// Cheap to share: wrap it in an `Arc` and call [`enqueue`](Self::enqueue)
/// from the transport task while another task calls
/// [`stop_stream`](Self::stop_stream) on barge-in.
///
/// ```rust,no_run
/// use rt_voice_audio::audio::{CpalOutput, PlaybackScheduler};
///
/// let device = CpalOutput::open(None).unwrap();
/// let scheduler = PlaybackScheduler::new(Box::new(device));
/// scheduler.start_stream();
/// scheduler.enqueue(&[0u8; 4_800]); // 100 ms of silence
/// scheduler.stop_stream();
/// scheduler.close();
/// ```
pub struct PlaybackScheduler {
    state: Mutex<SchedulerState>,
}

impl PlaybackScheduler {
    pub fn new(mut device: Box<dyn OutputDevice>) -> Self {
        let (tx, rx) = mpsc::channel();
        device.attach(tx);
        Self {
            state: Mutex::new(SchedulerState {
                device,
                completions: rx,
                next_play_time: Duration::ZERO,
                in_flight: BTreeMap::new(),
                is_playing: false,
                closed: false,
                next_id: 0,
                underruns: 0,
                dropped_chunks: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a new stream: the timeline restarts at the device's "now".
    ///
    /// Ignored after [`close`](Self::close).
    pub fn start_stream(&self) {
        let mut st = self.lock();
        if st.closed {
            log::warn!("playback: start_stream after close ignored");
            return;
        }
        st.cancel_all();
        st.is_playing = true;
        st.next_play_time = st.device.now();
        log::debug!("playback: stream started at {:?}", st.next_play_time);
    }

    /// Schedule one chunk of canonical PCM bytes.
    ///
    /// Returns the chunk's start instant, or `None` if it was not scheduled:
    /// no active stream, an empty chunk, or the device rejected it.  A
    /// rejected chunk is logged and dropped; the stream carries on and the
    /// timeline is not advanced for it.
    pub fn enqueue(&self, chunk: &[u8]) -> Option<Duration> {
        let mut st = self.lock();
        if !st.is_playing {
            return None;
        }
        st.reap();

        let samples: Arc<[f32]> = int16_to_float(&decode_le_i16(chunk)).into();
        if samples.is_empty() {
            return None;
        }
        let duration = AudioFormat::CANONICAL.duration_of(samples.len());

        let now = st.device.now();
        let start_time = if st.next_play_time < now {
            st.underruns += 1;
            log::debug!(
                "playback: timeline behind by {:?}, snapping to now",
                now - st.next_play_time
            );
            now
        } else {
            st.next_play_time
        };

        let id = st.next_id;
        st.next_id += 1;

        if let Err(err) = st.device.schedule(id, Arc::clone(&samples), start_time) {
            st.dropped_chunks += 1;
            log::warn!("playback: dropping chunk {id}: {err}");
            return None;
        }

        st.in_flight.insert(
            id,
            ScheduledChunk {
                id,
                samples,
                start_time,
                duration,
            },
        );
        st.next_play_time = start_time + duration;
        Some(start_time)
    }

    /// Silence the stream now: every in-flight chunk is cancelled, even
    /// mid-play, and later [`enqueue`](Self::enqueue) calls are ignored until
    /// the next [`start_stream`](Self::start_stream).
    pub fn stop_stream(&self) {
        let mut st = self.lock();
        let cancelled = st.in_flight.len();
        st.is_playing = false;
        st.cancel_all();
        if cancelled > 0 {
            log::debug!("playback: stream stopped, {cancelled} chunks cancelled");
        }
    }

    /// Stop the stream if active and release the output device.
    pub fn close(&self) {
        let mut st = self.lock();
        if st.closed {
            return;
        }
        st.is_playing = false;
        st.cancel_all();
        st.device.close();
        st.closed = true;
        log::info!("playback: output closed");
    }

    pub fn is_playing(&self) -> bool {
        self.lock().is_playing
    }

    /// Chunks scheduled and not yet finished.
    pub fn in_flight_len(&self) -> usize {
        let mut st = self.lock();
        st.reap();
        st.in_flight.len()
    }

    /// Snapshot of the in-flight chunks in schedule order.
    pub fn in_flight(&self) -> Vec<ScheduledChunk> {
        let mut st = self.lock();
        st.reap();
        st.in_flight.values().cloned().collect()
    }

    /// Where the next chunk would start if it arrived in time.
    pub fn next_play_time(&self) -> Duration {
        self.lock().next_play_time
    }

    /// How many times the timeline fell behind the clock and was snapped
    /// forward.  Useful as an upstream backpressure signal.
    pub fn underruns(&self) -> u64 {
        self.lock().underruns
    }

    /// Chunks the device refused.
    pub fn dropped_chunks(&self) -> u64 {
        self.lock().dropped_chunks
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
