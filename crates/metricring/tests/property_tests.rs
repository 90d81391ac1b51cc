//! Property-based tests for `EventRing`, covering the invariants spec.md
//! §8 states for the SPSC decision ring:
//!
//! 1. the reader never visits more than `capacity` events in one drain;
//! 2. the visited sequence is a suffix of a contiguous sub-sequence of
//!    what was pushed, in push order, never reordered.

use metricring::EventRing;
use proptest::prelude::*;

proptest! {
    /// However pushes and drains are interleaved, a drain never reports
    /// more events than the ring's capacity.
    #[test]
    fn drain_never_exceeds_capacity(
        ops in prop::collection::vec(prop::bool::ANY, 1..200),
    ) {
        let ring = EventRing::<u64>::new(16);
        let capacity = ring.capacity();
        let mut next_value = 0u64;

        for push in ops {
            if push {
                ring.push(next_value);
                next_value += 1;
            } else {
                let n = ring.drain(|_| {});
                prop_assert!(n <= capacity, "drain visited {n} > capacity {capacity}");
            }
        }
    }

    /// Whatever the reader sees on a drain is exactly the freshest prefix
    /// of pushed values it could observe: a contiguous, increasing run
    /// with no gaps and no reordering.
    #[test]
    fn drained_sequence_is_contiguous_and_ordered(
        pushes in 0usize..500,
    ) {
        let ring = EventRing::<u64>::new(8);
        for i in 0..pushes as u64 {
            ring.push(i);
        }

        let mut seen = Vec::new();
        ring.drain(|v| seen.push(v));

        for window in seen.windows(2) {
            prop_assert_eq!(window[1], window[0] + 1, "gap or reorder in {:?}", seen);
        }
        if pushes > 0 {
            prop_assert_eq!(*seen.last().unwrap(), pushes as u64 - 1);
        }
    }

    /// A drain immediately following another drain with no intervening
    /// pushes always reports zero events: nothing is visited twice.
    #[test]
    fn repeated_drain_without_push_is_empty(
        pushes in 0usize..64,
    ) {
        let ring = EventRing::<u64>::new(16);
        for i in 0..pushes as u64 {
            ring.push(i);
        }
        ring.drain(|_| {});
        let second = ring.drain(|_| {});
        prop_assert_eq!(second, 0);
    }

    /// Interleaved push/drain bursts never lose an event that fits within
    /// one capacity-sized window: every value pushed since the last drain,
    /// up to `capacity` of them, is visited in order.
    #[test]
    fn bursts_within_capacity_are_not_lost(
        burst_sizes in prop::collection::vec(1usize..8, 1..20),
    ) {
        let ring = EventRing::<u64>::new(16);
        let mut next_value = 0u64;

        for burst in burst_sizes {
            let expected_start = next_value;
            for _ in 0..burst {
                ring.push(next_value);
                next_value += 1;
            }
            let mut seen = Vec::new();
            ring.drain(|v| seen.push(v));
            prop_assert_eq!(seen.len(), burst);
            prop_assert_eq!(seen[0], expected_start);
            prop_assert_eq!(*seen.last().unwrap(), next_value - 1);
        }
    }
}
