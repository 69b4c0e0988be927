use chrono::{DateTime, Utc};
use gantry_core::log::{LogFilter, RequestLog};
use std::collections::VecDeque;
use std::sync::RwLock;

const DEFAULT_QUERY_LIMIT: usize = 100;
const MAX_QUERY_LIMIT: usize = 1000;

/// Bounded in-memory request-log window.
///
/// The durable log table lives in the external store; this ring is the query
/// surface the management API reads. Oldest entries are evicted at capacity.
pub struct LogStore {
    capacity: usize,
    entries: RwLock<VecDeque<RequestLog>>,
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    pub fn insert(&self, log: RequestLog) {
        let mut entries = self.entries.write().expect("log store lock poisoned");
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(log);
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("log store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Filtered query, newest first, with limit/offset paging.
    pub fn query(&self, filter: &LogFilter) -> Vec<RequestLog> {
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT).min(MAX_QUERY_LIMIT);
        let offset = filter.offset.unwrap_or(0);
        let entries = self.entries.read().expect("log store lock poisoned");
        entries
            .iter()
            .rev()
            .filter(|log| filter.matches(log))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent entries that carry an error message.
    pub fn errors(&self, limit: usize) -> Vec<RequestLog> {
        let entries = self.entries.read().expect("log store lock poisoned");
        entries
            .iter()
            .rev()
            .filter(|log| log.error_message.is_some())
            .take(limit.min(MAX_QUERY_LIMIT))
            .cloned()
            .collect()
    }

    /// All entries at or after `since`, oldest first — analytics input.
    pub fn since(&self, since: DateTime<Utc>) -> Vec<RequestLog> {
        let entries = self.entries.read().expect("log store lock poisoned");
        entries.iter().filter(|log| log.created_at >= since).cloned().collect()
    }

    /// Retention hook for the out-of-band sweeper: drop everything older
    /// than `horizon`. Returns how many records were removed.
    pub fn purge_older_than(&self, horizon: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().expect("log store lock poisoned");
        let before = entries.len();
        entries.retain(|log| log.created_at >= horizon);
        before - entries.len()
    }
}
