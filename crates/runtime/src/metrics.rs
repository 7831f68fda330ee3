use std::collections::BTreeMap;

/// Counters the viewport loader maintains.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Counter {
    FetchStarted,
    FetchSkippedInFlight,
    FetchSucceeded,
    FetchFailed,
    StaleResponseDropped,
    CacheHit,
    CacheMiss,
    RetryScheduled,
    FallbackToLocal,
    PrefetchScheduled,
    PrefetchFailed,
}

impl Counter {
    pub fn name(self) -> &'static str {
        match self {
            Counter::FetchStarted => "fetch.started",
            Counter::FetchSkippedInFlight => "fetch.skipped_in_flight",
            Counter::FetchSucceeded => "fetch.succeeded",
            Counter::FetchFailed => "fetch.failed",
            Counter::StaleResponseDropped => "fetch.stale_dropped",
            Counter::CacheHit => "cache.hit",
            Counter::CacheMiss => "cache.miss",
            Counter::RetryScheduled => "retry.scheduled",
            Counter::FallbackToLocal => "fallback.local",
            Counter::PrefetchScheduled => "prefetch.scheduled",
            Counter::PrefetchFailed => "prefetch.failed",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Histogram {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
}

impl Histogram {
    pub fn record(&mut self, value: u64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub counters: Vec<(&'static str, u64)>,
    pub fetch_latency_ms: Histogram,
}

impl MetricsSnapshot {
    pub fn counter(&self, counter: Counter) -> u64 {
        self.counters
            .iter()
            .find(|(name, _)| *name == counter.name())
            .map_or(0, |(_, v)| *v)
    }
}

/// Loader metrics with stable snapshot ordering (sorted by counter).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metrics {
    counters: BTreeMap<Counter, u64>,
    fetch_latency_ms: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters.get(&counter).copied().unwrap_or(0)
    }

    pub fn inc(&mut self, counter: Counter) {
        *self.counters.entry(counter).or_insert(0) += 1;
    }

    pub fn record_fetch_latency_ms(&mut self, ms: u64) {
        self.fetch_latency_ms.record(ms);
    }

    pub fn fetch_latency_ms(&self) -> Histogram {
        self.fetch_latency_ms
    }

    /// Cache hit ratio over all cache lookups, if any happened.
    pub fn cache_hit_ratio(&self) -> Option<f64> {
        let hits = self.get(Counter::CacheHit);
        let total = hits + self.get(Counter::CacheMiss);
        (total > 0).then(|| hits as f64 / total as f64)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.iter().map(|(k, v)| (k.name(), *v)).collect(),
            fetch_latency_ms: self.fetch_latency_ms,
        }
    }
}
