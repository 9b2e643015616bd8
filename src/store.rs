//! In-memory store of deferral snapshots keyed by workload UID
//!
//! No persistence: snapshots are lost on process restart, which is
//! acceptable for advisory savings accounting. The record/remove
//! counters sit behind their own lock so they never serialize readers.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::evaluator::DeferSnapshot;

#[derive(Debug, Default, Clone, Copy)]
pub struct StoreCounters {
    pub recorded: u64,
    pub removed: u64,
}

#[derive(Default)]
pub struct EvaluationStore {
    snapshots: RwLock<HashMap<String, DeferSnapshot>>,
    counters: Mutex<StoreCounters>,
}

impl EvaluationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the snapshot for a UID. Concurrent records on
    /// the same UID are last-writer-wins.
    pub fn record(&self, snapshot: DeferSnapshot) {
        let uid = snapshot.uid.clone();
        self.snapshots.write().insert(uid.clone(), snapshot);
        self.counters.lock().recorded += 1;
        debug!(%uid, "Recorded evaluation snapshot");
    }

    pub fn get(&self, uid: &str) -> Option<DeferSnapshot> {
        self.snapshots.read().get(uid).cloned()
    }

    /// Remove and return the snapshot for a UID, if present.
    pub fn remove(&self, uid: &str) -> Option<DeferSnapshot> {
        let removed = self.snapshots.write().remove(uid);
        if removed.is_some() {
            self.counters.lock().removed += 1;
            debug!(%uid, "Removed evaluation snapshot");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counters(&self) -> StoreCounters {
        *self.counters.lock()
    }
}
