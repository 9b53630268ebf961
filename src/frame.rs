//! Capture units and the latest-wins hand-off.
//!
//! - `RawFrame`: immutable multi-plane capture from the camera collaborator.
//! - `FrameQueue`: single-slot queue between the capture-delivery context and
//!   the worker thread. A push while a frame is pending replaces it, so the
//!   worker only ever sees the newest frame and queue depth never exceeds one.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Capture dimensions negotiated for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CaptureSize {
    pub width: u32,
    pub height: u32,
}

impl CaptureSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for CaptureSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Chroma layout of a 4:2:0 capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaneLayout {
    /// Three planes: Y, U, V (each chroma plane subsampled 2x2).
    #[default]
    I420,
    /// Two planes: Y, interleaved UV.
    Nv12,
    /// Two planes: Y, interleaved VU.
    Nv21,
}

impl PlaneLayout {
    pub fn plane_count(&self) -> usize {
        match self {
            PlaneLayout::I420 => 3,
            PlaneLayout::Nv12 | PlaneLayout::Nv21 => 2,
        }
    }
}

// ----------------------------------------------------------------------------
// RawFrame
// ----------------------------------------------------------------------------

/// One capture from the camera collaborator.
///
/// Deliberately not `Clone`: a frame is owned by the queue slot until the
/// worker takes it, and a superseded frame is dropped unprocessed.
pub struct RawFrame {
    planes: Vec<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub layout: PlaneLayout,
    /// Monotonic capture instant, used for latency reporting.
    pub captured_at: Instant,
    /// Sequence number assigned by the capture source.
    pub id: u64,
}

impl RawFrame {
    pub fn new(
        planes: Vec<Vec<u8>>,
        width: u32,
        height: u32,
        layout: PlaneLayout,
        captured_at: Instant,
        id: u64,
    ) -> Self {
        Self {
            planes,
            width,
            height,
            layout,
            captured_at,
            id,
        }
    }

    pub fn planes(&self) -> &[Vec<u8>] {
        &self.planes
    }

    pub fn size(&self) -> CaptureSize {
        CaptureSize::new(self.width, self.height)
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.planes.iter().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("bytes", &self.byte_len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// FrameQueue
// ----------------------------------------------------------------------------

/// Counters kept by the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    pub dropped: u64,
    pub taken: u64,
}

#[derive(Default)]
struct QueueSlot {
    pending: Option<RawFrame>,
    closed: bool,
    stats: QueueStats,
}

/// Single-producer/single-consumer latest-wins slot.
///
/// `push` never blocks the producer. The consumer either polls with
/// `pop_latest` or parks on `wait_latest` until a frame arrives or the queue
/// is closed.
#[derive(Default)]
pub struct FrameQueue {
    slot: Mutex<QueueSlot>,
    ready: Condvar,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueSlot> {
        // The slot holds plain data; a panicking holder cannot leave it torn.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a frame. Returns `true` when it replaced an unconsumed frame.
    ///
    /// Frames pushed after `close` are discarded.
    pub fn push(&self, frame: RawFrame) -> bool {
        let mut slot = self.lock();
        if slot.closed {
            return false;
        }
        slot.stats.pushed += 1;
        let replaced = slot.pending.replace(frame).is_some();
        if replaced {
            slot.stats.dropped += 1;
        }
        drop(slot);
        self.ready.notify_one();
        replaced
    }

    /// Take the pending frame without blocking.
    pub fn pop_latest(&self) -> Option<RawFrame> {
        let mut slot = self.lock();
        if slot.closed {
            return None;
        }
        let frame = slot.pending.take();
        if frame.is_some() {
            slot.stats.taken += 1;
        }
        frame
    }

    /// Block until a frame is pending or the queue is closed.
    ///
    /// Returns `None` once closed, even if a frame was pending at close time.
    pub fn wait_latest(&self) -> Option<RawFrame> {
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return None;
            }
            if let Some(frame) = slot.pending.take() {
                slot.stats.taken += 1;
                return Some(frame);
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Close the queue, discard any pending frame and wake the consumer.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        if slot.pending.take().is_some() {
            slot.stats.dropped += 1;
        }
        drop(slot);
        self.ready.notify_all();
    }

    /// Reopen a closed queue for a new capture session.
    pub fn reopen(&self) {
        let mut slot = self.lock();
        slot.closed = false;
        slot.pending = None;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of pending frames (0 or 1).
    pub fn len(&self) -> usize {
        usize::from(self.lock().pending.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn make_frame(id: u64) -> RawFrame {
        RawFrame::new(
            vec![vec![0u8; 4], vec![0u8; 1], vec![0u8; 1]],
            2,
            2,
            PlaneLayout::I420,
            Instant::now(),
            id,
        )
    }

    #[test]
    fn push_replaces_pending_frame() {
        let queue = FrameQueue::new();
        for id in 0..10 {
            queue.push(make_frame(id));
            assert!(queue.len() <= 1);
        }
        let frame = queue.pop_latest().expect("latest frame");
        assert_eq!(frame.id, 9);
        assert!(queue.pop_latest().is_none());

        let stats = queue.stats();
        assert_eq!(stats.pushed, 10);
        assert_eq!(stats.dropped, 9);
        assert_eq!(stats.taken, 1);
    }

    #[test]
    fn pop_on_empty_queue_returns_none() {
        let queue = FrameQueue::new();
        assert!(queue.pop_latest().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn close_wakes_waiting_consumer() {
        let queue = Arc::new(FrameQueue::new());
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.wait_latest().map(|f| f.id))
        };
        std::thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(consumer.join().expect("consumer thread"), None);
    }

    #[test]
    fn close_discards_pending_frame() {
        let queue = FrameQueue::new();
        queue.push(make_frame(1));
        queue.close();
        assert!(queue.wait_latest().is_none());
        assert!(!queue.push(make_frame(2)));
        assert_eq!(queue.stats().pushed, 1);

        queue.reopen();
        queue.push(make_frame(3));
        assert_eq!(queue.pop_latest().map(|f| f.id), Some(3));
    }

    #[test]
    fn waiting_consumer_receives_pushed_frame() {
        let queue = Arc::new(FrameQueue::new());
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.wait_latest().map(|f| f.id))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.push(make_frame(42));
        assert_eq!(consumer.join().expect("consumer thread"), Some(42));
    }
}
