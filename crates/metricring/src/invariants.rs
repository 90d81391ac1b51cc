//! Debug-only sanity checks for the ring and stripe pool.
//!
//! Each macro compiles to nothing in release builds. They exist to catch a
//! broken caller (e.g. two threads both draining the same ring) quickly in
//! debug/test builds rather than silently corrupting state.

/// `read_index` must never run ahead of `write_index`.
macro_rules! debug_assert_read_not_past_write {
    ($read:expr, $write:expr) => {
        #[cfg(debug_assertions)]
        {
            debug_assert!(
                $read <= $write,
                "read_index ({}) ahead of write_index ({})",
                $read,
                $write
            );
        }
    };
}

/// An index sequence must never move backward between two observations.
macro_rules! debug_assert_monotonic {
    ($prev:expr, $next:expr) => {
        #[cfg(debug_assertions)]
        {
            debug_assert!(
                $next >= $prev,
                "index went backward: {} -> {}",
                $prev,
                $next
            );
        }
    };
}

/// The span visited by a drain must never exceed the ring's capacity.
macro_rules! debug_assert_span_bounded {
    ($start:expr, $end:expr, $capacity:expr) => {
        #[cfg(debug_assertions)]
        {
            debug_assert!(
                $end - $start <= $capacity as u64,
                "drain span ({}) exceeds capacity ({})",
                $end - $start,
                $capacity
            );
        }
    };
}

pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_read_not_past_write;
pub(crate) use debug_assert_span_bounded;
