//! Prometheus metrics for the admission engine
//!
//! # Exported metrics
//! The `/metrics` endpoint exports the following metrics:
//! - `greenlight_evaluated_total` (counter): evaluations labeled by namespace.
//! - `greenlight_would_delay_total` (counter): deferral verdicts labeled by namespace and delay kind.
//! - `greenlight_completed_total` (counter): completed tracked workloads labeled by namespace.
//! - `greenlight_estimated_carbon_savings_g_total` / `greenlight_estimated_cost_savings_usd_total`
//!   (counters): conservative savings estimated at admission time.
//! - `greenlight_actual_carbon_savings_g_total` / `greenlight_actual_cost_savings_usd_total`
//!   (counters): savings realized at completion time.
//! - `greenlight_current_carbon_intensity` / `greenlight_current_price` (gauges): last observed signals.
//! - `greenlight_pod_runtime_hours` / `greenlight_pod_energy_kwh` (histograms): realized runtime and energy.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::evaluator::DelayKind;

const RUNTIME_HOURS_BUCKETS: [f64; 10] = [0.1, 0.5, 1.0, 2.0, 4.0, 8.0, 12.0, 24.0, 48.0, 72.0];
const ENERGY_KWH_BUCKETS: [f64; 9] = [0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0];

/// Labels for per-namespace metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NamespaceLabels {
    pub namespace: String,
}

/// Labels for deferral metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DelayLabels {
    pub namespace: String,
    /// "carbon", "price", or "both"
    pub delay_kind: String,
}

/// Counter tracking evaluated workloads
pub static EVALUATED_TOTAL: Lazy<Family<NamespaceLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking deferral verdicts
pub static WOULD_DELAY_TOTAL: Lazy<Family<DelayLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking completed tracked workloads
pub static COMPLETED_TOTAL: Lazy<Family<NamespaceLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter accumulating estimated carbon savings in grams CO2eq
pub static ESTIMATED_CARBON_SAVINGS_G: Lazy<Family<NamespaceLabels, Counter<f64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter accumulating estimated cost savings in USD
pub static ESTIMATED_COST_SAVINGS_USD: Lazy<Family<NamespaceLabels, Counter<f64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter accumulating realized carbon savings in grams CO2eq
pub static ACTUAL_CARBON_SAVINGS_G: Lazy<Family<NamespaceLabels, Counter<f64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter accumulating realized cost savings in USD
pub static ACTUAL_COST_SAVINGS_USD: Lazy<Family<NamespaceLabels, Counter<f64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Gauge tracking the last observed carbon intensity
pub static CURRENT_CARBON_INTENSITY: Lazy<Family<NamespaceLabels, Gauge<f64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Gauge tracking the last observed electricity rate
pub static CURRENT_PRICE: Lazy<Family<NamespaceLabels, Gauge<f64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Histogram of realized pod runtimes in hours
pub static POD_RUNTIME_HOURS: Lazy<Family<NamespaceLabels, Histogram>> = Lazy::new(|| {
    fn runtime_histogram() -> Histogram {
        Histogram::new(RUNTIME_HOURS_BUCKETS.iter().copied())
    }

    Family::new_with_constructor(runtime_histogram)
});

/// Histogram of realized pod energy in kWh
pub static POD_ENERGY_KWH: Lazy<Family<NamespaceLabels, Histogram>> = Lazy::new(|| {
    fn energy_histogram() -> Histogram {
        Histogram::new(ENERGY_KWH_BUCKETS.iter().copied())
    }

    Family::new_with_constructor(energy_histogram)
});

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "greenlight_evaluated",
        "Total number of evaluated workloads",
        EVALUATED_TOTAL.clone(),
    );
    registry.register(
        "greenlight_would_delay",
        "Total number of deferral verdicts",
        WOULD_DELAY_TOTAL.clone(),
    );
    registry.register(
        "greenlight_completed",
        "Total number of completed tracked workloads",
        COMPLETED_TOTAL.clone(),
    );
    registry.register(
        "greenlight_estimated_carbon_savings_g",
        "Carbon savings estimated at admission time, grams CO2eq",
        ESTIMATED_CARBON_SAVINGS_G.clone(),
    );
    registry.register(
        "greenlight_estimated_cost_savings_usd",
        "Cost savings estimated at admission time, USD",
        ESTIMATED_COST_SAVINGS_USD.clone(),
    );
    registry.register(
        "greenlight_actual_carbon_savings_g",
        "Carbon savings realized at completion time, grams CO2eq",
        ACTUAL_CARBON_SAVINGS_G.clone(),
    );
    registry.register(
        "greenlight_actual_cost_savings_usd",
        "Cost savings realized at completion time, USD",
        ACTUAL_COST_SAVINGS_USD.clone(),
    );
    registry.register(
        "greenlight_current_carbon_intensity",
        "Last observed carbon intensity, grams CO2eq per kWh",
        CURRENT_CARBON_INTENSITY.clone(),
    );
    registry.register(
        "greenlight_current_price",
        "Last observed electricity rate, USD per kWh",
        CURRENT_PRICE.clone(),
    );
    registry.register(
        "greenlight_pod_runtime_hours",
        "Realized runtime of tracked workloads in hours",
        POD_RUNTIME_HOURS.clone(),
    );
    registry.register(
        "greenlight_pod_energy_kwh",
        "Realized energy of tracked workloads in kWh",
        POD_ENERGY_KWH.clone(),
    );

    registry
});

fn namespace_labels(namespace: &str) -> NamespaceLabels {
    NamespaceLabels {
        namespace: namespace.to_string(),
    }
}

/// Increment the evaluated counter.
pub fn inc_evaluated(namespace: &str) {
    EVALUATED_TOTAL.get_or_create(&namespace_labels(namespace)).inc();
}

/// Increment the deferral counter for a delay kind.
pub fn inc_would_delay(namespace: &str, delay_kind: DelayKind) {
    let labels = DelayLabels {
        namespace: namespace.to_string(),
        delay_kind: delay_kind.as_str().to_string(),
    };
    WOULD_DELAY_TOTAL.get_or_create(&labels).inc();
}

/// Increment the completed counter.
pub fn inc_completed(namespace: &str) {
    COMPLETED_TOTAL.get_or_create(&namespace_labels(namespace)).inc();
}

/// Accumulate estimated savings from an admission-time decision.
pub fn add_estimated_savings(namespace: &str, carbon_g: f64, cost_usd: f64) {
    let labels = namespace_labels(namespace);
    if carbon_g > 0.0 {
        ESTIMATED_CARBON_SAVINGS_G.get_or_create(&labels).inc_by(carbon_g);
    }
    if cost_usd > 0.0 {
        ESTIMATED_COST_SAVINGS_USD.get_or_create(&labels).inc_by(cost_usd);
    }
}

/// Accumulate savings realized at completion time.
pub fn add_actual_savings(namespace: &str, carbon_g: f64, cost_usd: f64) {
    let labels = namespace_labels(namespace);
    if carbon_g > 0.0 {
        ACTUAL_CARBON_SAVINGS_G.get_or_create(&labels).inc_by(carbon_g);
    }
    if cost_usd > 0.0 {
        ACTUAL_COST_SAVINGS_USD.get_or_create(&labels).inc_by(cost_usd);
    }
}

/// Record the signals observed during an evaluation.
pub fn set_observed_signals(namespace: &str, carbon_intensity: f64, price: f64) {
    let labels = namespace_labels(namespace);
    CURRENT_CARBON_INTENSITY.get_or_create(&labels).set(carbon_intensity);
    CURRENT_PRICE.get_or_create(&labels).set(price);
}

/// Observe a realized runtime in hours.
pub fn observe_runtime_hours(namespace: &str, hours: f64) {
    POD_RUNTIME_HOURS
        .get_or_create(&namespace_labels(namespace))
        .observe(hours);
}

/// Observe realized energy in kWh.
pub fn observe_energy_kwh(namespace: &str, kwh: f64) {
    POD_ENERGY_KWH
        .get_or_create(&namespace_labels(namespace))
        .observe(kwh);
}
