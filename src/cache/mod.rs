//! Exposition cache: fingerprint -> bytes with TTL, size-bounded eviction
//! in insertion order, and single-flight coalescing of concurrent misses.
//!
//! Entries are immutable once published; they disappear by expiry, by
//! eviction, or by an explicit clear. The mutex only guards the map -
//! waiters suspend on a per-fingerprint watch channel outside of it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::watch;

#[cfg(test)]
mod tests;

/// Epoch folded into every fingerprint. Bumped on config reload and on
/// `clear prometheus` so stale entries can never match again.
static EPOCH: AtomicU64 = AtomicU64::new(0);

pub fn epoch() -> u64 {
    EPOCH.load(Ordering::Relaxed)
}

pub fn bump_epoch() {
    EPOCH.fetch_add(1, Ordering::Relaxed);
}

/// Cache of the exporter's own `/metrics` exposition.
pub static METRICS_CACHE: Lazy<MetricsCache> = Lazy::new(MetricsCache::new);

/// Caches of the bridge's merged text and JSON payloads.
pub static BRIDGE_CACHE: Lazy<MetricsCache> = Lazy::new(MetricsCache::new);
pub static BRIDGE_JSON_CACHE: Lazy<MetricsCache> = Lazy::new(MetricsCache::new);

struct Entry {
    bytes: Arc<Vec<u8>>,
    inserted_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn fresh_at(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

#[derive(Clone)]
pub enum FlightState {
    Pending,
    Done(Arc<Vec<u8>>),
    Failed(String),
}

struct CacheInner {
    entries: HashMap<String, Entry>,
    order: VecDeque<String>,
    total_bytes: u64,
    inflight: HashMap<String, watch::Receiver<FlightState>>,
}

pub struct MetricsCache {
    inner: Mutex<CacheInner>,
}

/// Outcome of a cache lookup.
pub enum Flight<'a> {
    /// Fresh entry found.
    Cached(Arc<Vec<u8>>),
    /// This caller must produce the artifact and publish or fail it.
    Leader(FlightGuard<'a>),
    /// Another caller is producing it; wait on the receiver.
    Follower(watch::Receiver<FlightState>),
}

impl Default for MetricsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCache {
    pub fn new() -> MetricsCache {
        MetricsCache {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                total_bytes: 0,
                inflight: HashMap::new(),
            }),
        }
    }

    /// Look up `fingerprint`, claiming leadership of the scrape on a miss.
    ///
    /// With the cache disabled (`max_size` or `max_age` of zero) every
    /// caller leads and nothing is stored, identical to having no cache.
    pub fn begin(&self, fingerprint: &str, max_size: u64, max_age: Duration) -> Flight<'_> {
        let enabled = max_size > 0 && !max_age.is_zero();
        if !enabled {
            return Flight::Leader(FlightGuard {
                cache: self,
                fingerprint: fingerprint.to_string(),
                tx: None,
                max_size: 0,
                max_age,
                done: false,
            });
        }

        let mut inner = self.inner.lock();
        let now = Instant::now();

        let mut expired = false;
        if let Some(entry) = inner.entries.get(fingerprint) {
            if entry.fresh_at(now) {
                return Flight::Cached(entry.bytes.clone());
            }
            expired = true;
        }
        if expired {
            // Expired entries are lazily removed on the next touch.
            remove_entry(&mut inner, fingerprint);
        }

        if let Some(rx) = inner.inflight.get(fingerprint) {
            return Flight::Follower(rx.clone());
        }

        let (tx, rx) = watch::channel(FlightState::Pending);
        inner.inflight.insert(fingerprint.to_string(), rx);

        Flight::Leader(FlightGuard {
            cache: self,
            fingerprint: fingerprint.to_string(),
            tx: Some(tx),
            max_size,
            max_age,
            done: false,
        })
    }

    /// Drop every entry. In-flight scrapes are unaffected; they publish
    /// into the cleared map.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.total_bytes = 0;
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }

    fn publish(&self, fingerprint: &str, bytes: Arc<Vec<u8>>, max_size: u64, ttl: Duration) {
        let mut inner = self.inner.lock();
        inner.inflight.remove(fingerprint);

        if max_size == 0 || ttl.is_zero() {
            return;
        }

        let len = bytes.len() as u64;
        if len > max_size {
            // The artifact alone exceeds the cache; serve it uncached.
            return;
        }

        remove_entry(&mut inner, fingerprint);

        while inner.total_bytes + len > max_size {
            match inner.order.front().cloned() {
                Some(oldest) => remove_entry(&mut inner, &oldest),
                None => break,
            }
        }

        inner.total_bytes += len;
        inner.order.push_back(fingerprint.to_string());
        inner.entries.insert(
            fingerprint.to_string(),
            Entry {
                bytes,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    fn abort(&self, fingerprint: &str) {
        let mut inner = self.inner.lock();
        inner.inflight.remove(fingerprint);
    }
}

fn remove_entry(inner: &mut CacheInner, fingerprint: &str) {
    if let Some(entry) = inner.entries.remove(fingerprint) {
        inner.total_bytes -= entry.bytes.len() as u64;
        inner.order.retain(|fp| fp != fingerprint);
    }
}

/// Leadership of one in-flight scrape. Publishing or failing releases the
/// waiters; dropping without either counts as a failure so nobody hangs.
pub struct FlightGuard<'a> {
    cache: &'a MetricsCache,
    fingerprint: String,
    tx: Option<watch::Sender<FlightState>>,
    max_size: u64,
    max_age: Duration,
    done: bool,
}

impl FlightGuard<'_> {
    /// Publish the artifact: store it (subject to the size bound) and wake
    /// every follower with the same bytes.
    pub fn publish(mut self, bytes: Vec<u8>) -> Arc<Vec<u8>> {
        let bytes = Arc::new(bytes);
        self.done = true;
        self.cache
            .publish(&self.fingerprint, bytes.clone(), self.max_size, self.max_age);
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(FlightState::Done(bytes.clone()));
        }
        bytes
    }

    /// Fail the flight: followers receive the same error, nothing is stored.
    pub fn fail(mut self, message: &str) {
        self.done = true;
        self.cache.abort(&self.fingerprint);
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(FlightState::Failed(message.to_string()));
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cache.abort(&self.fingerprint);
            if let Some(tx) = self.tx.take() {
                let _ = tx.send(FlightState::Failed("scrape aborted".to_string()));
            }
        }
    }
}

/// Wait for the leader of a flight to publish or fail.
pub async fn wait(mut rx: watch::Receiver<FlightState>) -> Result<Arc<Vec<u8>>, String> {
    loop {
        {
            let state = rx.borrow();
            match &*state {
                FlightState::Done(bytes) => return Ok(bytes.clone()),
                FlightState::Failed(message) => return Err(message.clone()),
                FlightState::Pending => (),
            }
        }
        if rx.changed().await.is_err() {
            return Err("scrape aborted".to_string());
        }
    }
}
