//! Frames and the producer/consumer hand-off.
//!
//! - `Frame`: one decoded RGB image plus its capture sequence number.
//! - `FrameQueue`: bounded (capacity 2) single-producer/single-consumer queue
//!   with drop-on-full semantics.
//!
//! The queue is the only synchronization point between a frame source and the
//! inference worker. `push` never blocks: when the consumer lags, the incoming
//! frame is discarded so capture cadence is decoupled from inference latency.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Maximum number of frames waiting for the inference worker.
pub const FRAME_QUEUE_CAPACITY: usize = 2;

/// How long the consumer waits for a frame before re-checking its stop flag.
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_millis(200);

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A captured frame.
pub struct Frame {
    image: RgbImage,
    /// Source-side sequence number (not the analysis frame index).
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Time since capture; used to log end-to-end latency.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

// ----------------------------------------------------------------------------
// FrameQueue
// ----------------------------------------------------------------------------

/// Counters kept by the producer side of the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub accepted: u64,
    pub dropped: u64,
}

/// Bounded drop-on-full frame queue.
pub struct FrameQueue {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new() -> Self {
        let (tx, rx) = bounded(FRAME_QUEUE_CAPACITY);
        Self {
            tx,
            rx,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking. Returns `false` when the frame was dropped.
    pub fn push(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Wait up to `timeout` for the oldest queued frame.
    pub fn pop(&self, timeout: Duration) -> Option<Frame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        FRAME_QUEUE_CAPACITY
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_frame(sequence: u64) -> Frame {
        Frame::new(RgbImage::new(4, 4), sequence)
    }

    #[test]
    fn queue_drops_when_full() {
        let queue = FrameQueue::new();

        assert!(queue.push(make_test_frame(0)));
        assert!(queue.push(make_test_frame(1)));
        assert!(!queue.push(make_test_frame(2)));
        assert!(!queue.push(make_test_frame(3)));

        assert_eq!(queue.len(), FRAME_QUEUE_CAPACITY);
        assert_eq!(
            queue.stats(),
            QueueStats {
                accepted: 2,
                dropped: 2
            }
        );
    }

    #[test]
    fn queue_preserves_fifo_order_of_accepted_frames() {
        let queue = FrameQueue::new();
        queue.push(make_test_frame(10));
        queue.push(make_test_frame(11));
        queue.push(make_test_frame(12)); // dropped

        let first = queue.pop(Duration::from_millis(10)).unwrap();
        assert_eq!(first.sequence, 10);
        queue.push(make_test_frame(13));
        assert_eq!(queue.pop(Duration::from_millis(10)).unwrap().sequence, 11);
        assert_eq!(queue.pop(Duration::from_millis(10)).unwrap().sequence, 13);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_times_out_on_empty_queue() {
        let queue = FrameQueue::new();
        let started = Instant::now();
        assert!(queue.pop(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn push_never_blocks_without_consumer() {
        let queue = FrameQueue::new();
        let started = Instant::now();
        for i in 0..500 {
            queue.push(make_test_frame(i));
            assert!(queue.len() <= FRAME_QUEUE_CAPACITY);
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(queue.stats().dropped, 498);
    }
}
