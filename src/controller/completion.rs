//! Completion tracking for evaluated workloads
//!
//! Consumes pod lifecycle events and, when a tracked workload reaches a
//! terminal state, computes the savings its deferral actually realized.
//! Per UID, at most one terminal event produces savings; afterwards the
//! snapshot is gone from the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::annotations;
use crate::evaluator::RealizedSavings;
use crate::metrics;
use crate::store::EvaluationStore;

/// Pod lifecycle event as seen by the tracker. `Deleted` carries the
/// last known state of the object (tombstones are unwrapped by the
/// watch layer before they get here).
#[derive(Debug)]
pub enum WorkloadEvent {
    Added(Box<Pod>),
    Updated { old: Box<Pod>, new: Box<Pod> },
    Deleted(Box<Pod>),
}

#[derive(Clone, Debug, Default)]
pub struct CompletionConfig {
    /// Namespaces to track; empty means all.
    pub watch_namespaces: Vec<String>,
}

pub struct CompletionTracker {
    store: Arc<EvaluationStore>,
    config: CompletionConfig,
}

impl CompletionTracker {
    pub fn new(store: Arc<EvaluationStore>, config: CompletionConfig) -> Self {
        Self { store, config }
    }

    /// Feed one lifecycle event through the state machine. Returns the
    /// realized savings when the event settled a tracked workload.
    pub fn observe(&self, event: WorkloadEvent) -> Option<RealizedSavings> {
        match event {
            WorkloadEvent::Added(pod) => {
                if !self.tracks(&pod) {
                    return None;
                }
                if let Some(start) = pod_start_time(&pod) {
                    self.mark_running(&pod, start);
                }
                if is_terminal_phase(&pod) {
                    return self.settle(&pod, Utc::now());
                }
                None
            }
            WorkloadEvent::Updated { old, new } => {
                if !self.tracks(&new) {
                    return None;
                }
                if pod_start_time(&old).is_none() {
                    if let Some(start) = pod_start_time(&new) {
                        self.mark_running(&new, start);
                    }
                }
                if is_terminal_phase(&new) {
                    return self.settle(&new, Utc::now());
                }
                None
            }
            WorkloadEvent::Deleted(pod) => {
                if !self.tracks(&pod) {
                    return None;
                }
                let has_node = pod
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.node_name.as_ref())
                    .is_some();
                if has_node || is_terminal_phase(&pod) {
                    self.settle(&pod, Utc::now())
                } else {
                    // Never ran; evict the record without savings.
                    let uid = pod.metadata.uid.as_deref().unwrap_or_default();
                    self.store.remove(uid);
                    None
                }
            }
        }
    }

    /// Whether this pod is in scope: tagged by the admission path (or
    /// already snapshotted) and inside the namespace watch-list.
    fn tracks(&self, pod: &Pod) -> bool {
        let namespace = pod.namespace().unwrap_or_else(|| "default".into());
        if !self.config.watch_namespaces.is_empty()
            && !self.config.watch_namespaces.contains(&namespace)
        {
            return false;
        }
        if annotations::is_marked_evaluated(pod) {
            return true;
        }
        pod.metadata
            .uid
            .as_deref()
            .is_some_and(|uid| self.store.get(uid).is_some())
    }

    /// Pin the snapshot's start time to the observed start instant.
    fn mark_running(&self, pod: &Pod, start: DateTime<Utc>) {
        let Some(uid) = pod.metadata.uid.as_deref() else {
            return;
        };
        if let Some(mut snapshot) = self.store.get(uid) {
            if snapshot.start_time != start {
                debug!(uid, %start, "Workload observed running");
                snapshot.start_time = start;
                self.store.record(snapshot);
            }
        }
    }

    /// Terminal handling: compute realized savings from the snapshot and
    /// the actual runtime, emit metrics, and drop the snapshot.
    pub fn settle(&self, pod: &Pod, now: DateTime<Utc>) -> Option<RealizedSavings> {
        let uid = pod.metadata.uid.as_deref()?;
        let snapshot = self.store.get(uid)?;

        if !snapshot.decision.should_defer {
            self.store.remove(uid);
            return None;
        }

        let completed_at = if is_terminal_phase(pod) {
            earliest_terminated_at(pod).unwrap_or(now)
        } else {
            now
        };

        let runtime_hours =
            (completed_at - snapshot.start_time).num_milliseconds() as f64 / 3_600_000.0;
        if runtime_hours <= 0.0 {
            warn!(
                uid,
                runtime_hours, "Non-positive runtime for completed workload; dropping"
            );
            self.store.remove(uid);
            return None;
        }

        let energy_kwh = snapshot.decision.estimated_power_w / 1000.0 * runtime_hours;

        let mut carbon_g = 0.0;
        if snapshot.decision.delay_kind.is_carbon() {
            let delta = snapshot.decision.current_carbon - snapshot.decision.carbon_threshold;
            if delta > 0.0 {
                carbon_g = delta * energy_kwh;
            }
        }

        let mut cost_usd = 0.0;
        if snapshot.decision.delay_kind.is_price() {
            let delta = snapshot.decision.current_price - snapshot.price_baseline;
            if delta > 0.0 {
                cost_usd = delta * energy_kwh;
            }
        }

        metrics::inc_completed(&snapshot.namespace);
        metrics::add_actual_savings(&snapshot.namespace, carbon_g, cost_usd);
        metrics::observe_runtime_hours(&snapshot.namespace, runtime_hours);
        metrics::observe_energy_kwh(&snapshot.namespace, energy_kwh);

        self.store.remove(uid);

        debug!(
            uid,
            runtime_hours, energy_kwh, carbon_g, cost_usd, "Settled completed workload"
        );

        Some(RealizedSavings {
            runtime_hours,
            energy_kwh,
            carbon_g,
            cost_usd,
        })
    }
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|status| status.phase.as_deref())
}

fn is_terminal_phase(pod: &Pod) -> bool {
    matches!(pod_phase(pod), Some("Succeeded") | Some("Failed"))
}

fn pod_start_time(pod: &Pod) -> Option<DateTime<Utc>> {
    pod.status
        .as_ref()
        .and_then(|status| status.start_time.as_ref())
        .map(|time| time.0)
}

/// The earliest container-terminated timestamp, when any is present.
fn earliest_terminated_at(pod: &Pod) -> Option<DateTime<Utc>> {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .filter_map(|cs| {
                    cs.state
                        .as_ref()
                        .and_then(|state| state.terminated.as_ref())
                        .and_then(|terminated| terminated.finished_at.as_ref())
                        .map(|time| time.0)
                })
                .min()
        })?
}
