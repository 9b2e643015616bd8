//! Dry-run admission controller
//!
//! Watches pod lifecycle events cluster-wide. Unseen pods are evaluated
//! and tagged; tagged pods flow through the completion tracker, which
//! realizes savings when they terminate. The verdicts are advisory: the
//! controller never blocks, evicts, or reschedules anything.

pub mod completion;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use kube_runtime::watcher::{watcher, Config as WatcherConfig, Event};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::annotations;
use crate::evaluator::Evaluator;
use crate::metrics;
use crate::store::EvaluationStore;

pub use completion::{CompletionConfig, CompletionTracker, WorkloadEvent};

/// Bound on a single admission evaluation, covering the carbon lookup
/// with all its retries.
const EVALUATION_DEADLINE: Duration = Duration::from_secs(10);

/// Shared state for the dry-run controller.
pub struct ControllerState {
    pub client: Client,
    pub evaluator: Arc<Evaluator>,
    pub store: Arc<EvaluationStore>,
    pub tracker: CompletionTracker,
    /// When set, evaluation results are written back as `dry-run-*`
    /// annotations; otherwise only the evaluated marker is stamped.
    pub annotate: bool,
    /// Namespaces to evaluate; empty means all.
    pub watch_namespaces: Vec<String>,
}

impl ControllerState {
    fn in_scope(&self, namespace: &str) -> bool {
        namespace_in_scope(namespace, &self.watch_namespaces)
    }
}

pub fn namespace_in_scope(namespace: &str, watch_list: &[String]) -> bool {
    watch_list.is_empty() || watch_list.iter().any(|ns| ns == namespace)
}

/// Run the controller until the watch stream fails terminally.
pub async fn run_controller(state: Arc<ControllerState>) -> crate::Result<()> {
    let api: Api<Pod> = Api::all(state.client.clone());
    let mut stream = watcher(api, WatcherConfig::default()).boxed();
    let mut last_seen: HashMap<String, Pod> = HashMap::new();

    info!("Watching pod lifecycle events");

    while let Some(event) = stream
        .try_next()
        .await
        .map_err(|e| crate::Error::WatchError(e.to_string()))?
    {
        match event {
            Event::Apply(pod) | Event::InitApply(pod) => {
                let Some(uid) = pod.metadata.uid.clone() else {
                    continue;
                };
                let previous = last_seen.insert(uid, pod.clone());
                handle_applied(&state, previous, pod).await;
            }
            Event::Delete(pod) => {
                if let Some(uid) = pod.metadata.uid.as_deref() {
                    last_seen.remove(uid);
                }
                state
                    .tracker
                    .observe(WorkloadEvent::Deleted(Box::new(pod)));
            }
            Event::Init | Event::InitDone => {}
        }
    }

    Ok(())
}

async fn handle_applied(state: &ControllerState, previous: Option<Pod>, pod: Pod) {
    let namespace = pod.namespace().unwrap_or_else(|| "default".into());

    // First sight of an untagged pod: run the admission evaluation.
    if previous.is_none()
        && !annotations::is_marked_evaluated(&pod)
        && state.in_scope(&namespace)
    {
        evaluate_pod(state, &pod).await;
        return;
    }

    let event = match previous {
        Some(old) => WorkloadEvent::Updated {
            old: Box::new(old),
            new: Box::new(pod),
        },
        None => WorkloadEvent::Added(Box::new(pod)),
    };
    state.tracker.observe(event);
}

/// The admission path: evaluate, update counters, record the deferral
/// snapshot, and tag the pod through the API.
pub async fn evaluate_pod(state: &ControllerState, pod: &Pod) {
    let now = Utc::now();
    let deadline = Instant::now() + EVALUATION_DEADLINE;
    let decision = state.evaluator.evaluate(pod, now, deadline).await;

    let namespace = pod.namespace().unwrap_or_else(|| "default".into());
    metrics::inc_evaluated(&namespace);
    metrics::set_observed_signals(&namespace, decision.current_carbon, decision.current_price);

    if decision.should_defer {
        info!(
            pod = %pod.name_any(),
            %namespace,
            delay_kind = %decision.delay_kind,
            reason = %decision.reason,
            "Workload would be deferred"
        );
        metrics::inc_would_delay(&namespace, decision.delay_kind);
        metrics::add_estimated_savings(
            &namespace,
            decision.est_carbon_savings_g,
            decision.est_cost_savings_usd,
        );
        state.store.record(state.evaluator.snapshot(pod, &decision, now));
    } else {
        debug!(pod = %pod.name_any(), %namespace, "Workload admitted");
    }

    let patch = if state.annotate {
        annotations::dry_run_merge_patch(&decision)
    } else {
        annotations::evaluated_marker_patch()
    };
    let api: Api<Pod> = Api::namespaced(state.client.clone(), &namespace);
    if let Err(err) = api
        .patch(
            &pod.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
    {
        // Tagging is best-effort; the snapshot keeps the pod tracked.
        warn!(pod = %pod.name_any(), error = %err, "Failed to tag evaluated pod");
    }
}
