//! Process-local TTL cache for remote responses.
//!
//! The cache only saves round-trips; it has no authority over correctness.
//! Every miss can be re-derived from the remote API.
//!
//! Entries expire after a TTL chosen from the age of the window's end:
//! old windows rarely change, so they are kept longer.
//!
//! | Window end age | TTL |
//! |----------------|-----|
//! | more than 7 days | 24 hours |
//! | 1 to 7 days | 1 hour |
//! | less than 1 day | 5 minutes |
//!
//! Expired entries are evicted lazily on `get` and proactively by a
//! background sweeper (see [`ResponseCache::spawn_sweeper`]).

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sapwatch_types::{AggregationMode, ChannelId};

/// Default interval between proactive sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Build the cache key for one channel request.
///
/// The key is a pure function of the channel, the query parameters sorted by
/// name, and the aggregation mode, so parameter order never matters.
///
/// # Example
///
/// ```
/// use sapwatch_core::cache::cache_key;
/// use sapwatch_types::AggregationMode;
///
/// let a = cache_key(7, [("before", "2"), ("after", "1")], AggregationMode::Hourly);
/// let b = cache_key(7, [("after", "1"), ("before", "2")], AggregationMode::Hourly);
/// assert_eq!(a, b);
/// ```
pub fn cache_key<I, K, V>(channel: ChannelId, params: I, mode: AggregationMode) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: Display,
    V: Display,
{
    let sorted: BTreeMap<String, String> = params
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let query = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!("channel:{}?{}#{}", channel, query, mode.as_str())
}

/// TTL for a cached window, based on how old its end instant is.
pub fn ttl_for_window_end(window_end: OffsetDateTime, now: OffsetDateTime) -> Duration {
    let age = now - window_end;
    if age > time::Duration::days(7) {
        Duration::from_secs(24 * 60 * 60)
    } else if age >= time::Duration::days(1) {
        Duration::from_secs(60 * 60)
    } else {
        Duration::from_secs(5 * 60)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
}

/// TTL key/value cache safe for concurrent use.
pub struct ResponseCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> std::fmt::Debug for ResponseCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V> Default for ResponseCache<V>
where
    V: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync,
{
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Store a value for `ttl`, replacing any previous entry.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Look up a live value, evicting the entry if it has expired.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: re-check under the write lock, a concurrent set may have refreshed it
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            entries.remove(key);
            debug!("Evicted expired cache entry {}", key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Remove an entry. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Remove all entries.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of stored entries, expired ones included until evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Evict every expired entry. Returns how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Current hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Spawn a task that evicts expired entries every `period` until
    /// `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately and there is nothing to sweep yet
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = cache.evict_expired().await;
                        if evicted > 0 {
                            debug!("Cache sweep evicted {} expired entries", evicted);
                        }
                    }
                }
            }
        })
    }
}
