//! Debug assertion macros for queue and batch invariants.
//!
//! Only active in debug builds; they compile to nothing in release.

/// Assert that the queue never holds more than its capacity.
///
/// **Invariant**: `len <= capacity`
///
/// Used in: `BoundedQueue::push()` after admission
macro_rules! debug_assert_bounded_len {
    ($len:expr, $capacity:expr) => {
        debug_assert!(
            $len <= $capacity,
            "queue length {} exceeds capacity {}",
            $len,
            $capacity
        )
    };
}

/// Assert that a batch taken for export respects the batch size limit.
///
/// **Invariant**: `batch.len() <= max_export_batch_size`
///
/// Used in: `BoundedQueue::take_batch()`
macro_rules! debug_assert_batch_bounded {
    ($batch_len:expr, $max:expr) => {
        debug_assert!(
            $batch_len <= $max,
            "batch of {} records exceeds max_export_batch_size {}",
            $batch_len,
            $max
        )
    };
}

pub(crate) use debug_assert_batch_bounded;
pub(crate) use debug_assert_bounded_len;
