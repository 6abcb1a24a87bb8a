use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

const WINDOW_SIZE: usize = 500;

/// Hit and miss counters of a cache handler.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    cacheable_responses: AtomicU64,
    non_cacheable_responses: AtomicU64,
    window: Mutex<VecDeque<bool>>,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.sample(true);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.sample(false);
    }

    pub fn record_cacheable_response(&self) {
        self.cacheable_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_non_cacheable_response(&self) {
        self.non_cacheable_responses.fetch_add(1, Ordering::Relaxed);
    }

    fn sample(&self, hit: bool) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if window.len() == WINDOW_SIZE {
            window.pop_front();
        }
        window.push_back(hit);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn cacheable_responses(&self) -> u64 {
        self.cacheable_responses.load(Ordering::Relaxed)
    }

    pub fn non_cacheable_responses(&self) -> u64 {
        self.non_cacheable_responses.load(Ordering::Relaxed)
    }

    /// Hits per lookup over the last 500 lookups, `0.0` before the first.
    #[allow(clippy::cast_precision_loss, reason = "the window holds at most 500 lookups")]
    pub fn hit_ratio(&self) -> f64 {
        let window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if window.is_empty() {
            return 0.0;
        }
        let hits = window.iter().filter(|hit| **hit).count();
        hits as f64 / window.len() as f64
    }
}
