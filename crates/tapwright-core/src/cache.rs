//! Time-bounded memoization for expensive tool queries.
//!
//! Listing devices means shelling out to `emulator`, `adb` or `simctl`, which
//! can take seconds. [`TtlCache`] keeps the last answer per key for a fixed
//! window. Time comes from an injectable [`Clock`] so expiry can be tested
//! without sleeping.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::device::{BackendKind, DeviceInfo};

/// How long a device list stays fresh.
pub const DEVICE_LIST_TTL: Duration = Duration::from_millis(5000);

/// Source of monotonic time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Starts at the current instant.
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Moves time forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Entry<V> {
    value: Arc<V>,
    stored_at: Instant,
}

/// Key/value cache whose entries expire `ttl` after insertion.
///
/// Values are handed out as `Arc<V>` so readers never hold the lock. The lock
/// is never held across an `.await`; two concurrent misses for the same key
/// both compute, and the last insert wins.
pub struct TtlCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Creates a cache driven by the system clock.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Creates a cache driven by `clock`.
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached value if it was stored less than `ttl` ago.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let now = self.clock.now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if now.saturating_duration_since(entry.stored_at) < self.ttl => {
                Some(Arc::clone(&entry.value))
            }
            Some(_) => {
                debug!(?key, "cache entry expired");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores `value`, replacing any previous entry.
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let stored_at = self.clock.now();
        self.entries().insert(
            key,
            Entry {
                value: Arc::clone(&value),
                stored_at,
            },
        );
        value
    }

    /// Drops the entry for `key`.
    pub fn invalidate(&self, key: &K) {
        if self.entries().remove(key).is_some() {
            debug!(?key, "cache entry invalidated");
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Returns the fresh cached value or computes, stores and returns a new
    /// one. Failures are not cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, fetch: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(&key) {
            debug!(?key, "cache hit");
            return Ok(hit);
        }
        debug!(?key, "cache miss");
        let value = fetch().await?;
        Ok(self.insert(key, value))
    }
}

/// Device lists keyed by backend.
pub type DeviceListCache = TtlCache<BackendKind, Vec<DeviceInfo>>;

impl DeviceListCache {
    /// A device-list cache with [`DEVICE_LIST_TTL`].
    pub fn for_devices(clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(DEVICE_LIST_TTL, clock)
    }
}
