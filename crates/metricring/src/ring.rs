use crate::invariants::{
    debug_assert_monotonic, debug_assert_read_not_past_write, debug_assert_span_bounded,
};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// MEMORY ORDERING PROTOCOL
// =============================================================================
//
// Single producer, single consumer. No mutex; correctness rests entirely on
// the release/acquire pair below.
//
// Writer (push):
// 1. Load `write_index` — this thread is the only writer, so Relaxed suffices.
// 2. Write the event into slot `write_index % N` (plain write; not yet visible
//    to the reader until step 3 publishes it).
// 3. Store `write_index + 1` into `write_index` with Release. This publishes
//    the slot write: any thread that later Acquire-loads this value is
//    guaranteed to see the write from step 2.
//
// Reader (drain):
// 1. Acquire-load `read_index` and `write_index`.
// 2. Read slots over `[start, write_index)` where `start` accounts for
//    possible overwrite (see below).
// 3. Release-store `write_index` into `read_index`, publishing that these
//    slots have been consumed (not meaningfully observed by anyone, but kept
//    symmetric with the writer's protocol and harmless).
//
// The writer never blocks: if the reader hasn't kept up and
// `write_index - read_index > N`, the oldest `write_index - read_index - N`
// events are simply gone. Callers who need loss-free delivery don't belong
// on this ring.
// =============================================================================

#[repr(align(128))]
struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// A fixed-capacity, single-producer/single-consumer ring of `T`.
///
/// `push` never blocks and never fails: once the ring is full, the oldest
/// unread entry is silently overwritten. `drain` visits everything the
/// writer has published since the last drain, skipping anything that was
/// overwritten in the meantime.
///
/// Capacity is rounded up to the next power of two so that slot selection
/// is a mask rather than a division.
#[repr(C)]
pub struct EventRing<T> {
    write_index: CacheAligned<AtomicU64>,
    read_index: CacheAligned<AtomicU64>,
    mask: u64,
    buffer: UnsafeCell<Box<[MaybeUninit<T>]>>,
}

unsafe impl<T: Send> Send for EventRing<T> {}
unsafe impl<T: Send> Sync for EventRing<T> {}

impl<T: Copy> EventRing<T> {
    /// Creates a ring able to hold `capacity` events. `capacity` is rounded
    /// up to the next power of two (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, MaybeUninit::uninit);
        Self {
            write_index: CacheAligned::new(AtomicU64::new(0)),
            read_index: CacheAligned::new(AtomicU64::new(0)),
            mask: (capacity - 1) as u64,
            buffer: UnsafeCell::new(buffer.into_boxed_slice()),
        }
    }

    /// Actual capacity (a power of two, possibly larger than requested).
    pub fn capacity(&self) -> usize {
        (self.mask + 1) as usize
    }

    /// Writer-only. Publishes `event` into the ring, overwriting the oldest
    /// unread entry if the ring is full.
    pub fn push(&self, event: T) {
        let write_index = self.write_index.load(Ordering::Relaxed);
        let idx = (write_index & self.mask) as usize;
        unsafe {
            let slot = (*self.buffer.get()).get_unchecked_mut(idx);
            slot.write(event);
        }
        self.write_index.store(write_index + 1, Ordering::Release);
    }

    /// Reader-only. Invokes `visit` once per event published since the last
    /// drain, oldest first, skipping any window lost to overwrite. Returns
    /// the number of events visited.
    pub fn drain(&self, mut visit: impl FnMut(T)) -> usize {
        let read_index = self.read_index.load(Ordering::Acquire);
        let write_index = self.write_index.load(Ordering::Acquire);
        debug_assert_read_not_past_write!(read_index, write_index);

        let capacity = self.capacity() as u64;
        let start = if write_index - read_index > capacity {
            write_index - capacity
        } else {
            read_index
        };
        debug_assert_span_bounded!(start, write_index, self.capacity());

        let mut visited = 0usize;
        for i in start..write_index {
            let idx = (i & self.mask) as usize;
            let event = unsafe { (*self.buffer.get()).get_unchecked(idx).assume_init() };
            visit(event);
            visited += 1;
        }

        debug_assert_monotonic!(read_index, write_index);
        self.read_index.store(write_index, Ordering::Release);
        visited
    }

    /// Number of events published but not yet drained (may overcount the
    /// truly-lost window; useful only as a rough gauge).
    pub fn pending(&self) -> u64 {
        let read_index = self.read_index.load(Ordering::Acquire);
        let write_index = self.write_index.load(Ordering::Acquire);
        write_index - read_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_order() {
        let ring = EventRing::<u64>::new(8);
        for i in 0..5u64 {
            ring.push(i);
        }
        let mut seen = Vec::new();
        let n = ring.drain(|v| seen.push(v));
        assert_eq!(n, 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn second_drain_is_empty_after_full_drain() {
        let ring = EventRing::<u64>::new(4);
        ring.push(1);
        ring.push(2);
        let mut seen = Vec::new();
        ring.drain(|v| seen.push(v));
        assert_eq!(seen, vec![1, 2]);

        let mut seen2 = Vec::new();
        let n = ring.drain(|v| seen2.push(v));
        assert_eq!(n, 0);
        assert!(seen2.is_empty());
    }

    #[test]
    fn overwrite_drops_oldest_and_drain_starts_from_window() {
        let ring = EventRing::<u64>::new(4); // capacity rounds to 4
        for i in 0..10u64 {
            ring.push(i);
        }
        let mut seen = Vec::new();
        let n = ring.drain(|v| seen.push(v));
        // Only the freshest 4 events should survive: 6,7,8,9
        assert_eq!(n, 4);
        assert_eq!(seen, vec![6, 7, 8, 9]);
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let ring = EventRing::<u64>::new(5);
        assert_eq!(ring.capacity(), 8);
    }

    #[test]
    fn interleaved_push_and_drain_preserves_order() {
        let ring = EventRing::<u64>::new(4);
        ring.push(1);
        ring.push(2);
        let mut seen = Vec::new();
        ring.drain(|v| seen.push(v));
        ring.push(3);
        ring.push(4);
        ring.drain(|v| seen.push(v));
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn pending_reflects_unread_count() {
        let ring = EventRing::<u64>::new(8);
        assert_eq!(ring.pending(), 0);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.pending(), 2);
        ring.drain(|_| {});
        assert_eq!(ring.pending(), 0);
    }
}
