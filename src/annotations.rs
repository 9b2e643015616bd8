//! Workload annotation vocabulary
//!
//! All keys recognized or written by the engine live under the
//! `greenlight.io/` prefix. The `dry-run-*` keys are the human-visible
//! result of an evaluation, stamped in annotate mode.

use k8s_openapi::api::core::v1::Pod;
use serde_json::{json, Value};

use crate::evaluator::decision::Decision;

/// Per-workload carbon threshold override (gCO2eq/kWh).
pub const CARBON_THRESHOLD: &str = "greenlight.io/carbon-intensity-threshold";
/// Per-workload price threshold override (USD/kWh).
pub const PRICE_THRESHOLD: &str = "greenlight.io/price-threshold";
/// Override for the runtime heuristic (positive hours).
pub const RUNTIME_HOURS: &str = "greenlight.io/estimated-runtime-hours";
/// Explicit GPU count when the resource request is absent.
pub const GPU_COUNT: &str = "greenlight.io/gpu-count";
/// Opt out of evaluation entirely when set to "true".
pub const SKIP: &str = "greenlight.io/skip";

/// Marker that the admission path observed this workload.
pub const EVALUATED_MARKER: &str = "greenlight.io/dry-run-evaluated";
pub const WOULD_DELAY: &str = "greenlight.io/dry-run-would-delay";
pub const DELAY_TYPE: &str = "greenlight.io/dry-run-delay-type";
pub const REASON: &str = "greenlight.io/dry-run-reason";
pub const CARBON_SAVINGS: &str = "greenlight.io/dry-run-carbon-savings-g";
pub const COST_SAVINGS: &str = "greenlight.io/dry-run-cost-savings-usd";

pub fn get<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}

/// The annotation value parsed as a real, when present and well-formed.
pub fn parse_f64(pod: &Pod, key: &str) -> Option<f64> {
    get(pod, key).and_then(|raw| raw.trim().parse().ok())
}

pub fn skip_requested(pod: &Pod) -> bool {
    get(pod, SKIP) == Some("true")
}

pub fn is_marked_evaluated(pod: &Pod) -> bool {
    get(pod, EVALUATED_MARKER).is_some()
}

/// The dry-run result annotations for a decision, as key/value pairs.
pub fn dry_run_annotations(decision: &Decision) -> Vec<(&'static str, String)> {
    let mut pairs = vec![
        (EVALUATED_MARKER, "true".to_string()),
        (WOULD_DELAY, decision.should_defer.to_string()),
        (DELAY_TYPE, decision.delay_kind.to_string()),
        (REASON, decision.reason.clone()),
    ];
    if decision.should_defer {
        pairs.push((CARBON_SAVINGS, format!("{:.3}", decision.est_carbon_savings_g)));
        pairs.push((COST_SAVINGS, format!("{:.4}", decision.est_cost_savings_usd)));
    }
    pairs
}

/// A JSON merge-patch document stamping only the evaluated marker.
pub fn evaluated_marker_patch() -> Value {
    json!({"metadata": {"annotations": {EVALUATED_MARKER: "true"}}})
}

/// A JSON merge-patch document stamping the dry-run annotations, for
/// callers applying results through the Kubernetes API.
pub fn dry_run_merge_patch(decision: &Decision) -> Value {
    let annotations: serde_json::Map<String, Value> = dry_run_annotations(decision)
        .into_iter()
        .map(|(key, value)| (key.to_string(), Value::String(value)))
        .collect();
    json!({"metadata": {"annotations": annotations}})
}

/// A JSON-patch operation list stamping the dry-run annotations, for
/// admission-webhook style consumers. `ensure_map` controls whether an
/// op creating `/metadata/annotations` is prepended (required when the
/// object has no annotations yet).
pub fn dry_run_json_patch(decision: &Decision, ensure_map: bool) -> Vec<Value> {
    let mut ops = Vec::new();
    if ensure_map {
        ops.push(json!({"op": "add", "path": "/metadata/annotations", "value": {}}));
    }
    for (key, value) in dry_run_annotations(decision) {
        ops.push(json!({
            "op": "add",
            "path": annotation_patch_path(key),
            "value": value,
        }));
    }
    ops
}

/// The JSON-Pointer path of an annotation key.
pub fn annotation_patch_path(key: &str) -> String {
    format!("/metadata/annotations/{}", escape_pointer_segment(key))
}

/// Escape a JSON-Pointer reference token per RFC 6901: `~` becomes `~0`
/// and `/` becomes `~1`, in that order. All other characters are legal
/// inside a token and pass through.
pub fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::decision::{Decision, DelayKind};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn pod_with_annotations(pairs: &[(&str, &str)]) -> Pod {
        let annotations: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Pod {
            metadata: ObjectMeta {
                annotations: Some(annotations),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        }
    }

    #[test]
    fn parses_threshold_overrides() {
        let pod = pod_with_annotations(&[(CARBON_THRESHOLD, "200.5")]);
        assert_eq!(parse_f64(&pod, CARBON_THRESHOLD), Some(200.5));
        assert_eq!(parse_f64(&pod, PRICE_THRESHOLD), None);

        let pod = pod_with_annotations(&[(CARBON_THRESHOLD, "not-a-number")]);
        assert_eq!(parse_f64(&pod, CARBON_THRESHOLD), None);
    }

    #[test]
    fn skip_requires_literal_true() {
        assert!(skip_requested(&pod_with_annotations(&[(SKIP, "true")])));
        assert!(!skip_requested(&pod_with_annotations(&[(SKIP, "yes")])));
        assert!(!skip_requested(&Pod::default()));
    }

    #[test]
    fn pointer_escaping_covers_both_metacharacters() {
        assert_eq!(escape_pointer_segment("greenlight.io/skip"), "greenlight.io~1skip");
        assert_eq!(escape_pointer_segment("a~b/c"), "a~0b~1c");
        assert_eq!(
            annotation_patch_path(EVALUATED_MARKER),
            "/metadata/annotations/greenlight.io~1dry-run-evaluated"
        );
    }

    #[test]
    fn escaping_order_does_not_double_escape() {
        // "~1" in the input must become "~01", not survive as "~1".
        assert_eq!(escape_pointer_segment("~1"), "~01");
    }

    #[test]
    fn json_patch_stamps_all_result_keys() {
        let decision = Decision {
            should_defer: true,
            delay_kind: DelayKind::Carbon,
            reason: "carbon".into(),
            est_carbon_savings_g: 2.15,
            ..Decision::admitted("test")
        };

        let ops = dry_run_json_patch(&decision, true);
        assert_eq!(ops[0]["path"], "/metadata/annotations");
        assert!(ops
            .iter()
            .any(|op| op["path"] == annotation_patch_path(WOULD_DELAY) && op["value"] == "true"));
        assert!(ops
            .iter()
            .any(|op| op["path"] == annotation_patch_path(CARBON_SAVINGS)
                && op["value"] == "2.150"));
    }

    #[test]
    fn merge_patch_nests_under_metadata() {
        let decision = Decision::admitted("no delay");
        let patch = dry_run_merge_patch(&decision);
        assert_eq!(
            patch["metadata"]["annotations"][EVALUATED_MARKER],
            "true"
        );
        assert_eq!(patch["metadata"]["annotations"][WOULD_DELAY], "false");
    }
}
