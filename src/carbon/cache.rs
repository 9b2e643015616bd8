//! TTL cache for last-known carbon intensity per region
//!
//! Reads are concurrent; writes and counter updates are exclusive. The
//! hit/miss counters live behind their own lock so bumping them never
//! serializes readers of the data map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::carbon::types::CarbonSample;

struct CacheEntry {
    sample: CarbonSample,
    stored_at: Instant,
    hit_count: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
}

/// Region-keyed store of the most recent [`CarbonSample`] with expiry.
///
/// A fresh entry is one no older than `ttl`. Entries older than `max_age`
/// are deleted by a background sweep that runs every `ttl`.
pub struct IntensityCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    counters: Mutex<CacheCounters>,
    ttl: Duration,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl IntensityCache {
    pub fn new(ttl: Duration, max_age: Duration) -> Self {
        let entries: Arc<RwLock<HashMap<String, CacheEntry>>> = Arc::default();
        let (tx, mut rx) = watch::channel(false);

        let sweep_map = Arc::clone(&entries);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + ttl, ttl);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut map = sweep_map.write();
                        let before = map.len();
                        map.retain(|_, entry| entry.stored_at.elapsed() <= max_age);
                        let removed = before - map.len();
                        if removed > 0 {
                            debug!(removed, "Swept expired carbon cache entries");
                        }
                    }
                    _ = rx.changed() => {
                        debug!("Carbon cache sweeper stopped");
                        return;
                    }
                }
            }
        });

        Self {
            entries,
            counters: Mutex::new(CacheCounters::default()),
            ttl,
            shutdown: Mutex::new(Some(tx)),
        }
    }

    /// Return the cached sample for `region` if it is still fresh.
    ///
    /// A stale or absent entry counts as a miss and is left for the
    /// sweeper to delete.
    pub fn get(&self, region: &str) -> Option<CarbonSample> {
        let sample = {
            let entries = self.entries.read();
            entries.get(region).and_then(|entry| {
                if entry.stored_at.elapsed() <= self.ttl {
                    entry.hit_count.fetch_add(1, Ordering::Relaxed);
                    Some(entry.sample.clone())
                } else {
                    None
                }
            })
        };

        let mut counters = self.counters.lock();
        match sample {
            Some(sample) => {
                counters.hits += 1;
                Some(sample)
            }
            None => {
                counters.misses += 1;
                None
            }
        }
    }

    /// Replace the entry for the sample's region and reset its age.
    pub fn set(&self, sample: CarbonSample) {
        let mut entries = self.entries.write();
        entries.insert(
            sample.region.clone(),
            CacheEntry {
                sample,
                stored_at: Instant::now(),
                hit_count: AtomicU64::new(0),
            },
        );
    }

    /// Stop the background sweeper. Calling this more than once is a
    /// programming error; the second call logs and does nothing.
    pub fn close(&self) {
        match self.shutdown.lock().take() {
            Some(tx) => {
                let _ = tx.send(true);
            }
            None => error!("IntensityCache::close called more than once"),
        }
    }

    pub fn counters(&self) -> CacheCounters {
        *self.counters.lock()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
