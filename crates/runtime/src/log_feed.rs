use std::collections::VecDeque;

use parking_lot::Mutex;

pub const DEFAULT_LOG_FEED_CAPACITY: usize = 200;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Monotonic per feed; gaps mean older entries were dropped.
    pub seq: u64,
    pub level: LogLevel,
    pub operation: &'static str,
    pub message: String,
}

#[derive(Debug)]
struct FeedInner {
    next_seq: u64,
    entries: VecDeque<LogEntry>,
}

/// Bounded history of loader events for debug panels.
///
/// Components that want their activity visible in a panel receive an
/// `Arc<LogFeed>` and record into it explicitly. Once `capacity` entries are
/// held, the oldest one is dropped for every new record.
#[derive(Debug)]
pub struct LogFeed {
    capacity: usize,
    inner: Mutex<FeedInner>,
}

impl LogFeed {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(FeedInner {
                next_seq: 0,
                entries: VecDeque::with_capacity(capacity),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, level: LogLevel, operation: &'static str, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push_back(LogEntry {
            seq,
            level,
            operation,
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    pub fn entries_at_least(&self, level: LogLevel) -> Vec<LogEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.level >= level)
            .cloned()
            .collect()
    }

    pub fn drain(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.drain(..).collect()
    }
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_FEED_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::{LogFeed, LogLevel};

    #[test]
    fn drops_oldest_entries_past_capacity() {
        let feed = LogFeed::new(3);
        for i in 0..5 {
            feed.record(LogLevel::Info, "fetch", format!("event {i}"));
        }
        let entries = feed.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].seq, 2);
        assert_eq!(entries[0].message, "event 2");
        assert_eq!(entries[2].message, "event 4");
    }

    #[test]
    fn filters_by_minimum_level() {
        let feed = LogFeed::default();
        feed.record(LogLevel::Debug, "cache", "hit");
        feed.record(LogLevel::Warn, "prefetch", "failed");
        feed.record(LogLevel::Error, "fetch", "boom");
        let warnings: Vec<_> = feed
            .entries_at_least(LogLevel::Warn)
            .into_iter()
            .map(|e| e.operation)
            .collect();
        assert_eq!(warnings, vec!["prefetch", "fetch"]);
    }

    #[test]
    fn drain_empties_the_feed() {
        let feed = LogFeed::new(4);
        feed.record(LogLevel::Info, "k", "m");
        assert_eq!(feed.drain().len(), 1);
        assert!(feed.is_empty());
    }
}
