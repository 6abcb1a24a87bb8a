//! The bounded store of cache entries.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::{Request, Response};
use micro_body::executor::{Scheduler, TaskHandle};
use tracing::debug;

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, CachedRequest, CachedResponse};
use crate::fingerprint::request_fingerprint;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Slot {
    seq: u64,
    entry: Arc<CacheEntry>,
}

/// Entries by fingerprint plus their insertion order, with the size counter
/// guarded by the same lock.
#[derive(Default)]
struct Store {
    entries: HashMap<String, Slot>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
    current_size: usize,
    max_size_bytes: usize,
}

impl Store {
    fn insert(&mut self, entry: Arc<CacheEntry>) {
        let fingerprint = entry.fingerprint().to_string();
        self.remove(&fingerprint);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.current_size += entry.size();
        self.order.insert(seq, fingerprint.clone());
        self.entries.insert(fingerprint, Slot { seq, entry });
    }

    fn remove(&mut self, fingerprint: &str) -> Option<Arc<CacheEntry>> {
        let slot = self.entries.remove(fingerprint)?;
        self.order.remove(&slot.seq);
        self.current_size = self.current_size.saturating_sub(slot.entry.size());
        Some(slot.entry)
    }

    /// Removes the oldest entries until the size fits the budget.
    fn evict_while_over_budget(&mut self) {
        while self.current_size > self.max_size_bytes {
            let Some((_, fingerprint)) = self.order.pop_first() else {
                break;
            };
            if let Some(slot) = self.entries.remove(&fingerprint) {
                self.current_size = self.current_size.saturating_sub(slot.entry.size());
                debug!(entry = %slot.entry, current_size = self.current_size, "evict oldest cache entry");
            }
        }
    }

    fn ordered(&self) -> Vec<Arc<CacheEntry>> {
        self.order
            .values()
            .filter_map(|fingerprint| self.entries.get(fingerprint))
            .map(|slot| Arc::clone(&slot.entry))
            .collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.current_size = 0;
    }
}

/// A size bounded HTTP response cache.
///
/// Entries are evicted oldest first, by insertion. Replacing an entry counts
/// as a new insertion. Expired entries are never served and are dropped by
/// the periodic sweep, which also recomputes the cache size.
pub struct ResponseCache {
    store: Mutex<Store>,
    divisor: usize,
    shared: AtomicBool,
    sweeper: Mutex<Option<TaskHandle>>,
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = lock(&self.store);
        f.debug_struct("ResponseCache")
            .field("entries", &store.entries.len())
            .field("current_size", &store.current_size)
            .field("max_size_bytes", &store.max_size_bytes)
            .field("shared", &self.is_shared())
            .finish()
    }
}

impl ResponseCache {
    /// A cache without the periodic sweep.
    pub fn new(config: &CacheConfig) -> Arc<Self> {
        let store = Store { max_size_bytes: config.max_size_bytes(), ..Default::default() };
        Arc::new(Self {
            store: Mutex::new(store),
            divisor: config.entry_size_threshold_divisor(),
            shared: AtomicBool::new(config.is_shared()),
            sweeper: Mutex::new(None),
        })
    }

    /// A cache swept every `config.sweep_period()` by `scheduler`.
    pub fn with_scheduler(config: &CacheConfig, scheduler: &dyn Scheduler) -> Arc<Self> {
        let cache = Self::new(config);
        let weak = Arc::downgrade(&cache);
        let sweeper = scheduler.schedule_periodic(
            config.sweep_period(),
            Box::new(move || match weak.upgrade() {
                Some(cache) => {
                    cache.sweep(SystemTime::now());
                    ControlFlow::Continue(())
                }
                None => ControlFlow::Break(()),
            }),
        );
        *lock(&cache.sweeper) = Some(sweeper);
        cache
    }

    pub fn is_shared(&self) -> bool {
        self.shared.load(Ordering::SeqCst)
    }

    /// Switches between a shared and a private cache. Clears the cache.
    pub fn set_shared(&self, shared: bool) {
        self.shared.store(shared, Ordering::SeqCst);
        self.clear();
    }

    pub fn set_max_size_kb(&self, max_size_kb: usize) {
        let mut store = lock(&self.store);
        store.max_size_bytes = max_size_kb * 1024;
        store.evict_while_over_budget();
    }

    pub fn max_size_kb(&self) -> usize {
        self.max_size_bytes() / 1024
    }

    pub fn max_size_bytes(&self) -> usize {
        lock(&self.store).max_size_bytes
    }

    /// Entries larger than this are not cached.
    pub fn max_entry_size(&self) -> usize {
        self.max_size_bytes() / self.divisor
    }

    pub fn current_size(&self) -> usize {
        lock(&self.store).current_size
    }

    pub fn len(&self) -> usize {
        lock(&self.store).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.store).entries.is_empty()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<Arc<CacheEntry>> {
        lock(&self.store).ordered()
    }

    /// The entry for `request` if it is still fresh at `min_fresh`.
    pub fn get(&self, request: &Request<Bytes>, min_fresh: SystemTime) -> Option<Arc<CacheEntry>> {
        let fingerprint = request_fingerprint(request);
        let entry = lock(&self.store).entries.get(&fingerprint).map(|slot| Arc::clone(&slot.entry))?;
        if entry.is_expired(min_fresh) {
            return None;
        }
        Some(entry)
    }

    /// Stores the response to `request` if it carries freshness information.
    pub fn register(
        &self,
        request: &Request<Bytes>,
        network_latency: Duration,
        response: &Response<Bytes>,
    ) -> Option<Arc<CacheEntry>> {
        let entry = CacheEntry::create(
            CachedRequest::from_request(request),
            CachedResponse::from_response(response),
            network_latency,
            self.is_shared(),
            SystemTime::now(),
        )?;
        self.put(entry)
    }

    /// Stores `entry`, evicting the oldest entries while over budget.
    ///
    /// Entries larger than [`ResponseCache::max_entry_size`] are rejected.
    pub fn put(&self, entry: CacheEntry) -> Option<Arc<CacheEntry>> {
        let max_entry_size = self.max_entry_size();
        if entry.size() > max_entry_size {
            debug!(entry = %entry, max_entry_size, "entry too large, not cached");
            return None;
        }

        let entry = Arc::new(entry);
        let mut store = lock(&self.store);
        store.insert(Arc::clone(&entry));
        store.evict_while_over_budget();
        debug!(entry = %entry, current_size = store.current_size, "cache entry stored");
        Some(entry)
    }

    /// Updates a stored entry without changing its eviction position.
    ///
    /// Returns `false` if no entry with the same fingerprint is stored.
    pub fn replace(&self, entry: CacheEntry) -> bool {
        let mut store = lock(&self.store);
        let store = &mut *store;
        let Some(slot) = store.entries.get_mut(entry.fingerprint()) else {
            return false;
        };

        store.current_size = store.current_size.saturating_sub(slot.entry.size()) + entry.size();
        slot.entry = Arc::new(entry);
        store.evict_while_over_budget();
        true
    }

    pub fn deregister(&self, request: &Request<Bytes>) -> Option<Arc<CacheEntry>> {
        self.remove(&request_fingerprint(request))
    }

    pub fn remove(&self, fingerprint: &str) -> Option<Arc<CacheEntry>> {
        let removed = lock(&self.store).remove(fingerprint);
        if let Some(entry) = &removed {
            debug!(entry = %entry, "cache entry removed");
        }
        removed
    }

    /// Drops the entries expired at `now` and recomputes the cache size.
    pub fn sweep(&self, now: SystemTime) {
        let mut store = lock(&self.store);
        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(fingerprint, _)| fingerprint.clone())
            .collect();
        for fingerprint in &expired {
            store.remove(fingerprint);
        }

        store.current_size = store.entries.values().map(|slot| slot.entry.size()).sum();
        debug!(removed = expired.len(), current_size = store.current_size, "cache swept");
    }

    pub fn clear(&self) {
        lock(&self.store).clear();
    }

    /// Clears the cache and stops the sweep.
    pub fn close(&self) {
        self.clear();
        if let Some(mut sweeper) = lock(&self.sweeper).take() {
            sweeper.cancel();
        }
    }
}

impl fmt::Display for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.entries() {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Freshness;
    use http::StatusCode;
    use micro_body::executor::TokioScheduler;

    fn request(path: &str) -> Request<Bytes> {
        Request::get(format!("http://example.org{path}")).body(Bytes::new()).unwrap()
    }

    fn response(cache_control: &str, body_len: usize) -> Response<Bytes> {
        Response::builder()
            .status(StatusCode::OK)
            .header("cache-control", cache_control)
            .body(Bytes::from(vec![b'x'; body_len]))
            .unwrap()
    }

    fn cache(max_size_bytes: usize) -> Arc<ResponseCache> {
        ResponseCache::new(&CacheConfig::default().with_max_size_bytes(max_size_bytes))
    }

    #[test]
    fn freshness_end_to_end() {
        let cache = cache(100 * 1024);
        let now = SystemTime::now();
        cache.register(&request("/doc"), Duration::ZERO, &response("max-age=60", 10)).unwrap();

        assert!(cache.get(&request("/doc"), now + Duration::from_secs(30)).is_some());
        assert!(cache.get(&request("/doc"), now + Duration::from_secs(90)).is_none());
        assert!(cache.get(&request("/other"), now).is_none());
    }

    #[test]
    fn evicts_oldest_while_over_budget() {
        let cache = cache(10_000);
        for i in 0..20 {
            cache.register(&request(&format!("/doc/{i}")), Duration::ZERO, &response("max-age=60", 600)).unwrap();
            assert!(cache.current_size() <= 10_000);
        }

        let now = SystemTime::now();
        assert!(cache.get(&request("/doc/0"), now).is_none());
        assert!(cache.get(&request("/doc/19"), now).is_some());

        let entries = cache.entries();
        let total: usize = entries.iter().map(|entry| entry.size()).sum();
        assert_eq!(total, cache.current_size());
        assert_eq!(entries.last().unwrap().request().uri().path(), "/doc/19");
    }

    #[test]
    fn oversized_entry_is_not_stored() {
        let cache = cache(10_000);
        assert_eq!(cache.max_entry_size(), 1_000);

        assert!(cache.register(&request("/big"), Duration::ZERO, &response("max-age=60", 2_000)).is_none());
        assert!(cache.get(&request("/big"), SystemTime::now()).is_none());
        assert_eq!(cache.current_size(), 0);
    }

    #[test]
    fn overwrite_moves_entry_to_newest() {
        let cache = cache(100 * 1024);
        cache.register(&request("/a"), Duration::ZERO, &response("max-age=60", 10)).unwrap();
        cache.register(&request("/b"), Duration::ZERO, &response("max-age=60", 10)).unwrap();
        let size = cache.current_size();
        cache.register(&request("/a"), Duration::ZERO, &response("max-age=60", 10)).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.current_size(), size);
        let paths: Vec<String> = cache.entries().iter().map(|entry| entry.request().uri().path().to_string()).collect();
        assert_eq!(paths, vec!["/b", "/a"]);
    }

    #[test]
    fn sweep_drops_expired_entries() {
        let cache = cache(100 * 1024);
        let now = SystemTime::now();
        let entry = CacheEntry::with_freshness(
            CachedRequest::from_request(&request("/short")),
            CachedResponse::from_response(&response("max-age=10", 10)),
            Freshness::Expires { expires_at: now + Duration::from_secs(10) },
            now,
        );
        cache.put(entry).unwrap();
        cache.register(&request("/long"), Duration::ZERO, &response("max-age=600", 10)).unwrap();

        cache.sweep(now + Duration::from_secs(20));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), cache.entries()[0].size());
        assert!(cache.to_string().contains("/long"));
    }

    #[test]
    fn switching_sharing_clears() {
        let cache = cache(100 * 1024);
        cache.register(&request("/doc"), Duration::ZERO, &response("max-age=60", 10)).unwrap();
        cache.set_shared(false);
        assert!(cache.is_empty());
        assert!(!cache.is_shared());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_sweep() {
        let scheduler = TokioScheduler::new(tokio::runtime::Handle::current());
        let config = CacheConfig::default().with_max_size_bytes(100 * 1024).with_sweep_period(Duration::from_secs(60));
        let cache = ResponseCache::with_scheduler(&config, &scheduler);

        let past = SystemTime::now() - Duration::from_secs(5);
        let entry = CacheEntry::with_freshness(
            CachedRequest::from_request(&request("/gone")),
            CachedResponse::from_response(&response("max-age=1", 10)),
            Freshness::Expires { expires_at: past },
            past,
        );
        cache.put(entry).unwrap();
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert!(cache.is_empty());

        cache.close();
    }
}
