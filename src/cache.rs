use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use thiserror::Error;
use tracing::debug;

use crate::summary::SubmissionSummary;

/// Signals that a submission summary must be recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no cached summary for submission {0}")]
pub struct CacheMiss(pub String);

struct CacheEntry {
    inserted_at: Instant,
    summary: Arc<SubmissionSummary>,
}

/// Time-bounded LRU cache of submission summaries keyed by submission uuid.
///
/// Safe to share between threads; concurrent inserts for the same key keep the last one.
pub struct SubmissionSummaryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl SubmissionSummaryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, uuid: &str) -> Result<Arc<SubmissionSummary>, CacheMiss> {
        let mut entries = self.lock();
        let expired = match entries.get(uuid) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                debug!(uuid, "summary cache hit");
                return Ok(Arc::clone(&entry.summary));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(uuid);
            debug!(uuid, "summary cache entry expired");
        }
        Err(CacheMiss(uuid.to_string()))
    }

    pub fn insert(&self, uuid: impl Into<String>, summary: Arc<SubmissionSummary>) {
        self.lock().put(
            uuid.into(),
            CacheEntry {
                inserted_at: Instant::now(),
                summary,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_evicts_least_recent() {
        let cache = SubmissionSummaryCache::new(2, Duration::from_secs(60));
        cache.insert("a", Arc::new(SubmissionSummary::default()));
        cache.insert("b", Arc::new(SubmissionSummary::default()));
        assert!(cache.get("a").is_ok());
        cache.insert("c", Arc::new(SubmissionSummary::default()));
        assert!(cache.get("a").is_ok());
        assert_eq!(cache.get("b").unwrap_err(), CacheMiss("b".to_string()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_ttl_always_misses() {
        let cache = SubmissionSummaryCache::new(10, Duration::ZERO);
        cache.insert("a", Arc::new(SubmissionSummary::default()));
        assert!(cache.get("a").is_err());
        assert!(cache.is_empty());
    }
}
