//! # Queue Set - Double-Buffered Packet/Audio Queues
//!
//! Every queue the pipeline shares exists twice. One half is the **use**
//! slot: the demux worker fills it and a consumer drains it. The other half
//! is the **flush** slot: whatever sits there is stale and only ever
//! discarded.
//!
//! A seek swaps the two roles in one atomic step, so the demux worker can
//! start filling a clean slot immediately while consumers throw away the
//! stale one at their own pace.
//!
//! ```text
//!              epoch: N (use = N & 1)
//! ┌───────┐   ┌──────────────┐   ┌──────────────┐
//! │ Demux │──►│ slot[use]    │──►│ Video/Audio  │
//! │       │   ├──────────────┤   │   worker     │
//! └───────┘   │ slot[flush]  │──►│ (discard)    │
//!             └──────────────┘   └──────────────┘
//! ```
//!
//! Both slot indices derive from one atomic epoch counter, so
//! `use + flush == 1` holds at every instant, and a consumer can tell
//! whether an item it popped was taken before the most recent swap.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::buffer::TimestampedBuffer;
use crate::source::Packet;

// ============================================================================
// Media Queue
// ============================================================================

/// Thread-safe FIFO that consumers can wait on
pub struct MediaQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> Default for MediaQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MediaQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    /// Append an item and wake one waiter
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.ready.notify_one();
    }

    /// Non-blocking pop. `None` when empty.
    pub fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Wait until the queue is non-empty or `timeout` elapses.
    /// Returns whether data is available.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();

        while items.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.ready.wait_for(&mut items, remaining);
        }

        true
    }

    /// Drop everything queued. Returns how many items were discarded.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let n = items.len();
        items.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Wake every waiter (used on shutdown)
    pub fn notify_all(&self) {
        self.ready.notify_all();
    }
}

// ============================================================================
// Slot Index
// ============================================================================

/// Point-in-time view of which slot is live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub epoch: u64,
    pub use_index: usize,
    pub flush_index: usize,
}

/// The shared use/flush index pair.
///
/// Stored as a single swap counter: the use index is its low bit and the
/// flush index is the other one.
#[derive(Debug, Default)]
pub struct SlotIndex {
    epoch: AtomicU64,
}

impl SlotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        Self::view(self.epoch.load(Ordering::SeqCst))
    }

    pub fn use_index(&self) -> usize {
        self.snapshot().use_index
    }

    pub fn flush_index(&self) -> usize {
        self.snapshot().flush_index
    }

    /// Exchange use and flush. Returns the new view.
    pub fn swap(&self) -> SlotSnapshot {
        Self::view(self.epoch.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// True if no swap happened since `snapshot` was taken
    pub fn is_current(&self, snapshot: SlotSnapshot) -> bool {
        self.epoch.load(Ordering::SeqCst) == snapshot.epoch
    }

    fn view(epoch: u64) -> SlotSnapshot {
        let use_index = (epoch & 1) as usize;
        SlotSnapshot {
            epoch,
            use_index,
            flush_index: use_index ^ 1,
        }
    }
}

// ============================================================================
// Dual Queue / Queue Set
// ============================================================================

/// A pair of interchangeable queues addressed by slot index
pub struct DualQueue<T> {
    slots: [MediaQueue<T>; 2],
}

impl<T> Default for DualQueue<T> {
    fn default() -> Self {
        Self {
            slots: [MediaQueue::new(), MediaQueue::new()],
        }
    }
}

impl<T> DualQueue<T> {
    pub fn slot(&self, index: usize) -> &MediaQueue<T> {
        &self.slots[index & 1]
    }

    fn notify_all(&self) {
        for slot in &self.slots {
            slot.notify_all();
        }
    }

    fn clear(&self) -> usize {
        self.slots.iter().map(|s| s.clear()).sum()
    }
}

/// Everything the demux worker hands to the two consumers
#[derive(Default)]
pub struct QueueSet {
    index: SlotIndex,
    /// Compressed video packets, drained by the video worker
    pub video_packets: DualQueue<Packet>,
    /// Decoded 16-bit stereo PCM, drained by the audio worker
    pub audio_frames: DualQueue<TimestampedBuffer>,
}

impl QueueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        self.index.snapshot()
    }

    pub fn is_current(&self, snapshot: SlotSnapshot) -> bool {
        self.index.is_current(snapshot)
    }

    pub fn video_use(&self) -> &MediaQueue<Packet> {
        self.video_packets.slot(self.index.use_index())
    }

    pub fn video_flush(&self) -> &MediaQueue<Packet> {
        self.video_packets.slot(self.index.flush_index())
    }

    pub fn audio_use(&self) -> &MediaQueue<TimestampedBuffer> {
        self.audio_frames.slot(self.index.use_index())
    }

    pub fn audio_flush(&self) -> &MediaQueue<TimestampedBuffer> {
        self.audio_frames.slot(self.index.flush_index())
    }

    /// Retire the live slots.
    ///
    /// Leftovers from an earlier swap that no consumer got around to
    /// discarding are dropped first, so the slot that becomes live is empty.
    pub fn swap_use_flush(&self) -> SlotSnapshot {
        let leftover = self.video_flush().clear() + self.audio_flush().clear();
        let snapshot = self.index.swap();
        tracing::debug!(
            epoch = snapshot.epoch,
            use_index = snapshot.use_index,
            leftover,
            "queue slots swapped"
        );
        snapshot
    }

    /// Drop every queued item in both slots
    pub fn clear_all(&self) {
        let n = self.video_packets.clear() + self.audio_frames.clear();
        if n > 0 {
            tracing::debug!(dropped = n, "queue set cleared");
        }
    }

    pub fn notify_all(&self) {
        self.video_packets.notify_all();
        self.audio_frames.notify_all();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = MediaQueue::new();
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(q.len(), 5);
        for i in 0..5 {
            assert_eq!(q.pop(), Some(i));
        }
        assert!(q.is_empty());
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_wait_for_expires() {
        let q: MediaQueue<u32> = MediaQueue::new();
        let start = Instant::now();
        assert!(!q.wait_for(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_for_wakes_on_push() {
        let q = Arc::new(MediaQueue::new());
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.push(7u32);
            })
        };

        assert!(q.wait_for(Duration::from_secs(5)));
        assert_eq!(q.pop(), Some(7));
        producer.join().unwrap();
    }

    #[test]
    fn test_slot_invariant_across_swaps() {
        let index = SlotIndex::new();
        for _ in 0..7 {
            let snap = index.snapshot();
            assert_eq!(snap.use_index + snap.flush_index, 1);
            let next = index.swap();
            assert_eq!(next.use_index, snap.flush_index);
            assert_eq!(next.flush_index, snap.use_index);
            assert!(!index.is_current(snap));
            assert!(index.is_current(next));
        }
    }

    #[test]
    fn test_swap_retires_live_slot() {
        let set = QueueSet::new();
        set.audio_use().push(TimestampedBuffer::new(vec![0; 4], 0));
        set.audio_use().push(TimestampedBuffer::new(vec![0; 4], 10));

        set.swap_use_flush();
        assert!(set.audio_use().is_empty());
        assert_eq!(set.audio_flush().len(), 2);

        // Stale data still parked in the flush slot is dropped on the next swap
        set.swap_use_flush();
        assert!(set.audio_use().is_empty());
        assert!(set.audio_flush().is_empty());
    }

    #[test]
    fn test_clear_all() {
        let set = QueueSet::new();
        set.audio_use().push(TimestampedBuffer::new(vec![1], 0));
        set.swap_use_flush();
        set.audio_use().push(TimestampedBuffer::new(vec![2], 0));
        set.clear_all();
        assert!(set.audio_frames.slot(0).is_empty());
        assert!(set.audio_frames.slot(1).is_empty());
    }
}
