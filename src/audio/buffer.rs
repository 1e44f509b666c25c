//! Real-time-safe accumulation buffer for captured frames.
//!
//! The device callback appends every delivered frame; `stop()` drains the
//! lot.  The two sides are a single producer and a single consumer, so the
//! storage is a pre-allocated lock-free ring (`ringbuf::HeapRb`) and the
//! callback path never blocks or allocates.
//!
//! A small atomic gate lets the consumer *freeze* the buffer: once
//! [`FrameReader::freeze`] returns, any frame the callback still delivers is
//! discarded instead of appended.
//!
//! # Overflow behaviour
//!
//! Unlike a push-to-talk ring, a conversation turn needs its *head* intact,
//! so when the ring is full the newest samples are dropped and counted
//! rather than overwriting the oldest.
//!
//! # Example
//!
//! ```rust
//! use rt_voice_audio::audio::buffer::frame_accumulator;
//!
//! let (mut writer, mut reader) = frame_accumulator(8);
//! writer.push_frame(&[0.1, 0.2]);
//! writer.push_frame(&[0.3]);
//! reader.freeze();
//! writer.push_frame(&[0.9]); // discarded
//! assert_eq!(reader.drain(), vec![0.1, 0.2, 0.3]);
//! ```

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

const OPEN: u8 = 0;
const WRITING: u8 = 1;
const FROZEN: u8 = 2;

// ---------------------------------------------------------------------------
// Shared control block
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Control {
    gate: AtomicU8,
    dropped: AtomicUsize,
}

/// Create a connected writer/reader pair holding at most `capacity` samples.
///
/// A capacity of `0` is bumped to `1`.
pub fn frame_accumulator(capacity: usize) -> (FrameWriter, FrameReader) {
    let (prod, cons) = HeapRb::<f32>::new(capacity.max(1)).split();
    let control = Arc::new(Control::default());
    (
        FrameWriter {
            prod,
            control: Arc::clone(&control),
        },
        FrameReader { cons, control },
    )
}

// ---------------------------------------------------------------------------
// FrameWriter
// ---------------------------------------------------------------------------

/// Producer half, moved into the device callback.
pub struct FrameWriter {
    prod: HeapProd<f32>,
    control: Arc<Control>,
}

impl FrameWriter {
    /// Append `frame`, returning how many samples were stored.
    ///
    /// Wait-free: returns `0` immediately if the buffer is frozen, and
    /// stores only what fits when the ring is full.
    pub fn push_frame(&mut self, frame: &[f32]) -> usize {
        if self
            .control
            .gate
            .compare_exchange(OPEN, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return 0;
        }

        let stored = self.prod.push_slice(frame);
        if stored < frame.len() {
            self.control
                .dropped
                .fetch_add(frame.len() - stored, Ordering::Relaxed);
        }

        self.control.gate.store(OPEN, Ordering::Release);
        stored
    }
}

// ---------------------------------------------------------------------------
// FrameReader
// ---------------------------------------------------------------------------

/// Consumer half, kept by the capture engine.
pub struct FrameReader {
    cons: HeapCons<f32>,
    control: Arc<Control>,
}

impl FrameReader {
    /// Close the gate.  After this returns no further samples are appended.
    ///
    /// If the callback is mid-push this spins until that push finishes; the
    /// push itself never blocks, so the wait is bounded.
    pub fn freeze(&self) {
        loop {
            match self.control.gate.compare_exchange_weak(
                OPEN,
                FROZEN,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) | Err(FROZEN) => return,
                Err(_) => std::hint::spin_loop(),
            }
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.control.gate.load(Ordering::Acquire) == FROZEN
    }

    /// Take every stored sample in arrival order.
    pub fn drain(&mut self) -> Vec<f32> {
        let mut out = vec![0.0_f32; self.cons.occupied_len()];
        let n = self.cons.pop_slice(&mut out);
        out.truncate(n);
        out
    }

    /// Samples currently stored.
    pub fn len(&self) -> usize {
        self.cons.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples rejected because the ring was full.
    pub fn dropped(&self) -> usize {
        self.control.dropped.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
