use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use foundation::{Clock, MapBounds, SystemClock};

use crate::protocol::ViewportResponse;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Exact textual key of a viewport.
///
/// No rounding: two viewports that differ by any epsilon are different keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(bounds: &MapBounds, zoom: f64) -> Self {
        Self(format!(
            "{}-{}-{}-{}-{}",
            bounds.north, bounds.south, bounds.east, bounds.west, zoom
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: ViewportResponse,
    created_at: Instant,
}

/// Time-to-live cache of viewport responses.
///
/// Entries age out lazily: a stale entry is dropped by the `get` that finds
/// it (or by [`ViewportCache::purge_expired`]). There is no size bound and no
/// LRU eviction.
#[derive(Debug)]
pub struct ViewportCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: BTreeMap<CacheKey, CacheEntry>,
}

impl ViewportCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: BTreeMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, bounds: &MapBounds, zoom: f64) -> Option<ViewportResponse> {
        let key = CacheKey::new(bounds, zoom);
        let now = self.clock.now();
        let entry = self.entries.get(&key)?;
        if now.duration_since(entry.created_at) > self.ttl {
            self.entries.remove(&key);
            return None;
        }
        Some(entry.response.clone())
    }

    pub fn set(&mut self, bounds: &MapBounds, zoom: f64, response: ViewportResponse) {
        let created_at = self.clock.now();
        self.entries.insert(
            CacheKey::new(bounds, zoom),
            CacheEntry {
                response,
                created_at,
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops every stale entry. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.duration_since(e.created_at) <= ttl);
        before - self.entries.len()
    }
}

impl Default for ViewportCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
