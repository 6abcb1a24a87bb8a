//! Utility macros and functions for the body crate.
//!
//! This module provides helper macros and functions that are used internally
//! by the body pipeline implementation.

use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
/// It's useful for validation checks where you want to return early with an error
/// if some condition is not satisfied.
///
/// # Arguments
///
/// * `$predicate` - A boolean expression that should evaluate to true
/// * `$error` - The error value to return if the predicate is false
///
/// # Example
///
/// ```ignore
/// ensure!(!delimiter.is_empty(), BodyError::protocol("empty delimiter"));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Total number of bytes held by a list of ranges.
#[inline]
pub fn remaining(ranges: &[Bytes]) -> usize {
    ranges.iter().map(Bytes::len).sum()
}

/// Merges a list of ranges into one contiguous range.
///
/// A single range is returned as is, without copying.
pub fn merge(mut ranges: Vec<Bytes>) -> Bytes {
    match ranges.len() {
        0 => Bytes::new(),
        1 => ranges.pop().unwrap_or_default(),
        _ => {
            let mut merged = BytesMut::with_capacity(remaining(&ranges));
            for range in &ranges {
                merged.extend_from_slice(range);
            }
            merged.freeze()
        }
    }
}

/// Locks a mutex, recovering the guard of a poisoned one.
///
/// State guarded by the body mutexes stays consistent across a panicking
/// callback because callbacks never run while a lock is held.
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Creates a process-unique id such as `source#12`, used in log records.
pub(crate) fn next_id(prefix: &str) -> String {
    format!("{}#{}", prefix, NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_order() {
        let merged = merge(vec![Bytes::from_static(b"ab"), Bytes::new(), Bytes::from_static(b"cd")]);
        assert_eq!(&merged[..], b"abcd");
        assert_eq!(remaining(&[merged]), 4);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(next_id("sink"), next_id("sink"));
    }
}
