//! Power and runtime estimation for workloads
//!
//! Maps a pod's resource requests to a power draw in watts and an
//! expected runtime in hours. Only `requests` are consulted, never
//! `limits`; requests are summed across containers.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use crate::annotations;
use crate::error::{Error, Result};

const WATTS_PER_CPU_CORE: f64 = 10.0;
const WATTS_PER_MEMORY_GB: f64 = 0.375;
const WATTS_PER_GPU: f64 = 250.0;

const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Fallback runtime assumptions by workload kind, in hours.
const RUNTIME_JOB_HOURS: f64 = 2.0;
const RUNTIME_SERVICE_HOURS: f64 = 24.0;
const RUNTIME_STATEFUL_HOURS: f64 = 168.0;
const RUNTIME_SYSTEM_HOURS: f64 = 720.0;
const RUNTIME_DEFAULT_HOURS: f64 = 1.0;

/// Estimated resource footprint of one workload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PodEstimate {
    pub cpu_cores: f64,
    pub memory_gb: f64,
    pub gpu_count: f64,
    pub power_watts: f64,
    pub runtime_hours: f64,
}

/// Per-node idle/max power override from the environment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodePower {
    pub idle_watts: f64,
    pub max_watts: f64,
}

impl NodePower {
    /// Parse an `idle:W,max:W` override value.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut idle = None;
        let mut max = None;
        for part in raw.split(',') {
            let (key, value) = part.split_once(':').ok_or_else(|| {
                Error::ConfigError(format!("node power override '{}' is not key:value", raw))
            })?;
            let watts: f64 = value.trim().parse().map_err(|_| {
                Error::ConfigError(format!("node power value '{}' is not a number", value))
            })?;
            match key.trim() {
                "idle" => idle = Some(watts),
                "max" => max = Some(watts),
                other => {
                    return Err(Error::ConfigError(format!(
                        "unknown node power key '{}'",
                        other
                    )))
                }
            }
        }
        match (idle, max) {
            (Some(idle_watts), Some(max_watts)) if idle_watts <= max_watts => Ok(Self {
                idle_watts,
                max_watts,
            }),
            (Some(_), Some(_)) => Err(Error::ConfigError(format!(
                "node power override '{}' has idle above max",
                raw
            ))),
            _ => Err(Error::ConfigError(format!(
                "node power override '{}' must set both idle and max",
                raw
            ))),
        }
    }
}

/// Pure estimator from pod spec to [`PodEstimate`].
#[derive(Clone, Debug, Default)]
pub struct PowerEstimator {
    node_power: HashMap<String, NodePower>,
}

impl PowerEstimator {
    pub fn new(node_power: HashMap<String, NodePower>) -> Self {
        Self { node_power }
    }

    pub fn node_power(&self, node: &str) -> Option<NodePower> {
        self.node_power.get(node).copied()
    }

    pub fn estimate(&self, pod: &Pod) -> PodEstimate {
        let mut cpu_cores = 0.0;
        let mut memory_gb = 0.0;
        let mut gpu_count = 0.0;

        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default();

        for container in containers {
            let Some(requests) = container
                .resources
                .as_ref()
                .and_then(|r| r.requests.as_ref())
            else {
                continue;
            };

            if let Some(cpu) = requests.get("cpu") {
                cpu_cores += parse_cpu_quantity(&cpu.0).unwrap_or(0.0);
            }
            if let Some(memory) = requests.get("memory") {
                memory_gb += parse_memory_quantity(&memory.0).unwrap_or(0.0);
            }
            if let Some(gpu) = requests.get(GPU_RESOURCE) {
                gpu_count += gpu.0.trim().parse::<f64>().unwrap_or(0.0);
            }
        }

        if gpu_count == 0.0 {
            if let Some(annotated) = annotations::parse_f64(pod, annotations::GPU_COUNT) {
                if annotated > 0.0 {
                    gpu_count = annotated;
                }
            }
        }

        let power_watts = WATTS_PER_CPU_CORE * cpu_cores
            + WATTS_PER_MEMORY_GB * memory_gb
            + WATTS_PER_GPU * gpu_count;
        let runtime_hours = runtime_hours(pod);

        debug!(
            cpu_cores,
            memory_gb, gpu_count, power_watts, runtime_hours, "Estimated pod footprint"
        );

        PodEstimate {
            cpu_cores,
            memory_gb,
            gpu_count,
            power_watts,
            runtime_hours,
        }
    }
}

/// Expected runtime: the annotation override when it parses as a
/// positive real, otherwise a heuristic keyed on the owning controller.
fn runtime_hours(pod: &Pod) -> f64 {
    if let Some(hours) = annotations::parse_f64(pod, annotations::RUNTIME_HOURS) {
        if hours > 0.0 {
            return hours;
        }
    }

    let owner_kind = pod
        .metadata
        .owner_references
        .as_ref()
        .and_then(|owners| owners.first())
        .map(|owner| owner.kind.as_str());

    match owner_kind {
        Some("Job") | Some("CronJob") => RUNTIME_JOB_HOURS,
        Some("Deployment") | Some("ReplicaSet") => RUNTIME_SERVICE_HOURS,
        Some("StatefulSet") => RUNTIME_STATEFUL_HOURS,
        Some("DaemonSet") => RUNTIME_SYSTEM_HOURS,
        _ => RUNTIME_DEFAULT_HOURS,
    }
}

/// Parse a CPU quantity: plain cores ("2", "0.5") or millicores ("500m").
pub(crate) fn parse_cpu_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if let Some(millis) = raw.strip_suffix('m') {
        return millis.parse::<f64>().ok().map(|m| m / 1000.0);
    }
    raw.parse().ok()
}

/// Parse a memory quantity into GiB-scaled "GB" units.
pub(crate) fn parse_memory_quantity(raw: &str) -> Option<f64> {
    const GI: f64 = 1024.0 * 1024.0 * 1024.0;

    let raw = raw.trim();
    let suffixes: [(&str, f64); 8] = [
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", GI),
        ("Ti", 1024.0 * GI),
        ("K", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
    ];

    for (suffix, scale) in suffixes {
        if let Some(value) = raw.strip_suffix(suffix) {
            return value.parse::<f64>().ok().map(|v| v * scale / GI);
        }
    }
    // Plain bytes.
    raw.parse::<f64>().ok().map(|v| v / GI)
}
