//! Fixed-slot frame ring buffer

use crate::media::{Frame, MediaKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Default slot count for audio stages
pub const DEFAULT_AUDIO_SLOTS: usize = 256;

/// Default slot count for video stages
pub const DEFAULT_VIDEO_SLOTS: usize = 128;

/// Single-producer single-consumer queue of pre-allocated frame slots
///
/// The producer (decode thread) copies frames into the tail slot, the
/// consumer (audio callback or render call) copies them out of the head
/// slot. Neither side ever waits: a full buffer rejects `put`, an empty or
/// refilling buffer rejects `take`.
///
/// Delivery is gated by a buffering latch. The latch is set when the buffer
/// drains to zero and released only once `threshold` frames are queued
/// again, so a consumer running slightly faster than the producer sees a
/// short gap instead of alternating hits and misses.
pub struct RingBuffer {
    slots: Box<[Mutex<Frame>]>,
    /// Tail index, owned by the producer
    producer: Mutex<usize>,
    /// Head index, owned by the consumer
    consumer: Mutex<usize>,
    count: AtomicUsize,
    buffering: AtomicBool,
    threshold: usize,
    /// Upper bound on frames dropped by a single `take_nearest`
    max_skip: Option<usize>,
    skipped: AtomicU64,
}

impl RingBuffer {
    /// Create a buffer of `capacity` slots, each reserving `slot_bytes` of payload
    pub fn new(kind: MediaKind, capacity: usize, slot_bytes: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity)
            .map(|_| Mutex::new(Frame::with_capacity(kind, slot_bytes)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            producer: Mutex::new(0),
            consumer: Mutex::new(0),
            count: AtomicUsize::new(0),
            buffering: AtomicBool::new(true),
            threshold: (capacity / 5).max(1),
            max_skip: None,
            skipped: AtomicU64::new(0),
        }
    }

    /// Limit how many stale frames one `take_nearest` call may drop
    pub fn with_max_skip(mut self, max_skip: Option<usize>) -> Self {
        self.max_skip = max_skip;
        self
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Queued frames needed to release the buffering latch
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering.load(Ordering::Acquire)
    }

    /// Total frames dropped by `take_nearest` since creation
    pub fn skipped_frames(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Copy `frame` into the tail slot (producer side)
    ///
    /// Returns false when the buffer is full; the caller decides whether to
    /// retry or drop.
    pub fn put(&self, frame: &Frame) -> bool {
        let mut tail = self.producer.lock();
        if self.count.load(Ordering::Acquire) >= self.capacity() {
            return false;
        }

        self.slots[*tail].lock().copy_from(frame);
        *tail = (*tail + 1) % self.capacity();

        // Publishes the slot write to the consumer. SeqCst pairs with the
        // latch store and count re-read in `release`.
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.threshold && self.buffering.load(Ordering::SeqCst) {
            self.buffering.store(false, Ordering::SeqCst);
        }
        true
    }

    /// Copy the head frame into `out` (consumer side)
    pub fn take(&self, out: &mut Frame) -> bool {
        if !self.ready() {
            return false;
        }
        let Some(mut head) = self.consumer.try_lock() else {
            return false;
        };
        if !self.ready() {
            return false;
        }

        let Some(slot) = self.slots[*head].try_lock() else {
            return false;
        };
        out.copy_from(&slot);
        drop(slot);

        *head = (*head + 1) % self.capacity();
        self.release(1);
        true
    }

    /// Copy the latest queued frame with `pts <= target_pts` into `out`
    ///
    /// Earlier frames are dropped without being returned. Fails without
    /// touching the buffer when the head frame is still in the future.
    pub fn take_nearest(&self, target_pts: i64, out: &mut Frame) -> bool {
        if !self.ready() {
            return false;
        }
        let Some(mut head) = self.consumer.try_lock() else {
            return false;
        };
        let available = self.count.load(Ordering::Acquire);
        if available == 0 || self.is_buffering() {
            return false;
        }

        match self.slots[*head].try_lock() {
            Some(slot) if slot.pts <= target_pts => {}
            _ => return false,
        }

        let capacity = self.capacity();
        let mut index = *head;
        let mut dropped = 0;
        while dropped + 1 < available && self.max_skip.map_or(true, |max| dropped < max) {
            let next = (index + 1) % capacity;
            match self.slots[next].try_lock() {
                Some(slot) if slot.pts <= target_pts => {}
                _ => break,
            }
            index = next;
            dropped += 1;
        }

        let Some(slot) = self.slots[index].try_lock() else {
            return false;
        };
        out.copy_from(&slot);
        drop(slot);

        *head = (index + 1) % capacity;
        self.release(dropped + 1);
        if dropped > 0 {
            self.skipped.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        true
    }

    /// Discard everything queued and re-arm the buffering latch
    ///
    /// Waits for an in-flight `put` or `take` to finish.
    pub fn reset(&self) {
        let tail = self.producer.lock();
        let mut head = self.consumer.lock();
        *head = *tail;
        self.count.store(0, Ordering::Release);
        self.buffering.store(true, Ordering::Release);
    }

    fn ready(&self) -> bool {
        !self.buffering.load(Ordering::Acquire) && self.count.load(Ordering::Acquire) > 0
    }

    fn release(&self, consumed: usize) {
        let previous = self.count.fetch_sub(consumed, Ordering::SeqCst);
        if previous == consumed {
            self.buffering.store(true, Ordering::SeqCst);
            // Puts between the decrement and the store saw the latch clear
            // and left it alone
            if self.count.load(Ordering::SeqCst) >= self.threshold {
                self.buffering.store(false, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MILLIS;

    fn frame(pts: i64) -> Frame {
        Frame::new(MediaKind::Video, pts.to_le_bytes().to_vec(), pts, MILLIS)
    }

    fn fill(buffer: &RingBuffer, pts: impl IntoIterator<Item = i64>) {
        for p in pts {
            assert!(buffer.put(&frame(p)), "put {} failed", p);
        }
    }

    #[test]
    fn test_put_take_order() {
        let buffer = RingBuffer::new(MediaKind::Video, 10, 8);
        fill(&buffer, 0..5);

        let mut out = Frame::with_capacity(MediaKind::Video, 8);
        for expected in 0..5 {
            assert!(buffer.take(&mut out));
            assert_eq!(out.pts, expected);
            assert_eq!(out.data, expected.to_le_bytes());
        }
        assert!(!buffer.take(&mut out));
        assert!(buffer.is_buffering());
    }

    #[test]
    fn test_put_rejects_when_full() {
        let buffer = RingBuffer::new(MediaKind::Audio, 4, 8);
        fill(&buffer, 0..4);

        assert!(buffer.is_full());
        assert!(!buffer.put(&frame(4)));
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_wrap_around() {
        let buffer = RingBuffer::new(MediaKind::Audio, 5, 8);
        let mut out = Frame::with_capacity(MediaKind::Audio, 8);

        let mut next_put = 0;
        let mut next_take = 0;
        for _ in 0..7 {
            while buffer.put(&frame(next_put)) {
                next_put += 1;
            }
            for _ in 0..3 {
                assert!(buffer.take(&mut out));
                assert_eq!(out.pts, next_take);
                next_take += 1;
            }
        }
        assert!(next_put > 20);
        assert_eq!(buffer.len() as i64, next_put - next_take);
    }

    #[test]
    fn test_hysteresis_threshold() {
        let buffer = RingBuffer::new(MediaKind::Audio, 20, 8);
        assert_eq!(buffer.threshold(), 4);
        let mut out = Frame::with_capacity(MediaKind::Audio, 8);

        // Drain to zero so the latch is set
        fill(&buffer, 0..4);
        for _ in 0..4 {
            assert!(buffer.take(&mut out));
        }
        assert!(buffer.is_buffering());

        // threshold - 1 frames are not enough
        fill(&buffer, 10..13);
        assert!(!buffer.take(&mut out));
        assert_eq!(buffer.len(), 3);

        // The threshold-th frame releases the latch
        fill(&buffer, 13..14);
        assert!(!buffer.is_buffering());
        assert!(buffer.take(&mut out));
        assert_eq!(out.pts, 10);
    }

    #[test]
    fn test_latch_stays_open_above_zero() {
        let buffer = RingBuffer::new(MediaKind::Audio, 20, 8);
        let mut out = Frame::with_capacity(MediaKind::Audio, 8);
        fill(&buffer, 0..4);

        // Dropping below the threshold does not re-arm the latch
        assert!(buffer.take(&mut out));
        assert!(buffer.take(&mut out));
        assert!(!buffer.is_buffering());
        assert!(buffer.take(&mut out));
        assert!(buffer.take(&mut out));
        assert!(buffer.is_buffering());
    }

    #[test]
    fn test_small_capacity_threshold() {
        let buffer = RingBuffer::new(MediaKind::Audio, 3, 8);
        assert_eq!(buffer.threshold(), 1);
        let mut out = Frame::with_capacity(MediaKind::Audio, 8);
        fill(&buffer, [7]);
        assert!(buffer.take(&mut out));
        assert_eq!(out.pts, 7);
    }

    #[test]
    fn test_take_nearest_drops_stale_frames() {
        let buffer = RingBuffer::new(MediaKind::Video, 16, 8);
        fill(&buffer, [0, 2, 4, 6, 8]);
        let mut out = Frame::with_capacity(MediaKind::Video, 8);

        assert!(buffer.take_nearest(5, &mut out));
        assert_eq!(out.pts, 4);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.skipped_frames(), 2);

        assert!(buffer.take_nearest(6, &mut out));
        assert_eq!(out.pts, 6);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_take_nearest_future_head_has_no_effect() {
        let buffer = RingBuffer::new(MediaKind::Video, 16, 8);
        fill(&buffer, [10, 12, 14, 16]);
        let mut out = frame(-1);

        assert!(!buffer.take_nearest(9, &mut out));
        assert_eq!(out.pts, -1);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.skipped_frames(), 0);

        assert!(buffer.take_nearest(10, &mut out));
        assert_eq!(out.pts, 10);
    }

    #[test]
    fn test_take_nearest_consumes_everything_past_target() {
        let buffer = RingBuffer::new(MediaKind::Video, 16, 8);
        fill(&buffer, [0, 2, 4]);
        let mut out = Frame::with_capacity(MediaKind::Video, 8);

        assert!(buffer.take_nearest(100, &mut out));
        assert_eq!(out.pts, 4);
        assert!(buffer.is_empty());
        assert!(buffer.is_buffering());
        assert!(!buffer.take_nearest(100, &mut out));
    }

    #[test]
    fn test_take_nearest_bounded_skip() {
        let buffer = RingBuffer::new(MediaKind::Video, 32, 8).with_max_skip(Some(3));
        fill(&buffer, (0..20).map(|i| i * 2));
        let mut out = Frame::with_capacity(MediaKind::Video, 8);

        // At most three frames are dropped per call
        assert!(buffer.take_nearest(30, &mut out));
        assert_eq!(out.pts, 6);
        assert!(buffer.take_nearest(30, &mut out));
        assert_eq!(out.pts, 14);
        assert!(buffer.take_nearest(30, &mut out));
        assert_eq!(out.pts, 22);
        assert!(buffer.take_nearest(30, &mut out));
        assert_eq!(out.pts, 30);
        assert_eq!(buffer.skipped_frames(), 12);
    }

    #[test]
    fn test_take_nearest_unbounded_skip() {
        let buffer = RingBuffer::new(MediaKind::Video, 32, 8).with_max_skip(None);
        fill(&buffer, (0..20).map(|i| i * 2));
        let mut out = Frame::with_capacity(MediaKind::Video, 8);

        assert!(buffer.take_nearest(30, &mut out));
        assert_eq!(out.pts, 30);
        assert_eq!(buffer.skipped_frames(), 15);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_never_returns_consumed_frame() {
        let buffer = RingBuffer::new(MediaKind::Video, 8, 8);
        fill(&buffer, 0..7);
        let mut out = Frame::with_capacity(MediaKind::Video, 8);

        let mut seen = Vec::new();
        let mut target = 0;
        while !buffer.is_empty() {
            if buffer.take_nearest(target, &mut out) {
                seen.push(out.pts);
            } else if buffer.take(&mut out) {
                seen.push(out.pts);
            }
            target += 2;
        }

        let mut sorted = seen.clone();
        sorted.dedup();
        assert_eq!(seen, sorted);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_reset_from_any_state() {
        let buffer = RingBuffer::new(MediaKind::Audio, 10, 8);
        let mut out = Frame::with_capacity(MediaKind::Audio, 8);

        buffer.reset();
        assert!(buffer.is_empty());
        assert!(buffer.is_buffering());

        fill(&buffer, 0..10);
        buffer.reset();
        buffer.reset();
        assert!(buffer.is_empty());
        assert!(buffer.is_buffering());
        assert!(!buffer.take(&mut out));

        // Usable again after reset, starting from fresh frames
        fill(&buffer, 50..52);
        assert!(buffer.take(&mut out));
        assert_eq!(out.pts, 50);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        use std::sync::Arc;
        use std::thread;

        let buffer = Arc::new(RingBuffer::new(MediaKind::Audio, 16, 8));
        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for pts in 0..2000 {
                    while !buffer.put(&frame(pts)) {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut out = Frame::with_capacity(MediaKind::Audio, 8);
        let mut expected = 0;
        while expected < 2000 {
            if buffer.take(&mut out) {
                assert_eq!(out.pts, expected);
                assert_eq!(out.data, expected.to_le_bytes());
                expected += 1;
            } else if buffer.is_buffering() && buffer.len() > 0 && producer.is_finished() {
                // Trailing frames below the threshold stay latched
                break;
            } else {
                thread::yield_now();
            }
        }

        producer.join().unwrap();
        assert_eq!(expected as usize + buffer.len(), 2000);
    }

    #[test]
    fn test_latch_never_strands_full_buffer() {
        use std::sync::Arc;
        use std::thread;
        use std::time::{Duration, Instant};

        const FRAMES: i64 = 20_000;
        let buffer = Arc::new(RingBuffer::new(MediaKind::Audio, 2, 8));
        let abort = Arc::new(AtomicBool::new(false));
        let producer = {
            let buffer = buffer.clone();
            let abort = abort.clone();
            thread::spawn(move || {
                for pts in 0..FRAMES {
                    while !buffer.put(&frame(pts)) {
                        if abort.load(Ordering::Relaxed) {
                            return;
                        }
                        thread::yield_now();
                    }
                }
            })
        };

        let deadline = Instant::now() + Duration::from_secs(20);
        let mut out = Frame::with_capacity(MediaKind::Audio, 8);
        let mut expected = 0;
        while expected < FRAMES && Instant::now() < deadline {
            if buffer.take(&mut out) {
                assert_eq!(out.pts, expected);
                expected += 1;
            } else {
                thread::yield_now();
            }
        }
        abort.store(true, Ordering::Relaxed);
        producer.join().unwrap();

        assert_eq!(expected, FRAMES, "stalled with {} queued", buffer.len());
        assert!(buffer.is_buffering());
    }
}
