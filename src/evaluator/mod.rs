//! Admission evaluation
//!
//! Combines the carbon intensity signal, the time-of-use price signal,
//! and per-workload annotation overrides into a [`Decision`]. Failures
//! of the carbon source never fail an evaluation; when in doubt, admit.

pub mod decision;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::annotations;
use crate::carbon::IntensitySource;
use crate::power::PowerEstimator;
use crate::pricing::TouPricing;

pub use decision::{Decision, DeferSnapshot, DelayKind, RealizedSavings};

/// Default bound on the carbon lookup so a slow API never stalls admission.
const DEFAULT_CARBON_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct EvaluatorConfig {
    pub carbon_enabled: bool,
    pub carbon_region: String,
    pub carbon_threshold: f64,
    pub carbon_timeout: Duration,
    pub pricing_enabled: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            carbon_enabled: true,
            carbon_region: "US-CAL-CISO".into(),
            carbon_threshold: 150.0,
            carbon_timeout: DEFAULT_CARBON_TIMEOUT,
            pricing_enabled: false,
        }
    }
}

/// The decision engine. Collaborators are injected and never mutated.
pub struct Evaluator {
    config: EvaluatorConfig,
    carbon: Option<Arc<dyn IntensitySource>>,
    pricing: Option<Arc<TouPricing>>,
    power: PowerEstimator,
}

impl Evaluator {
    pub fn new(
        config: EvaluatorConfig,
        carbon: Option<Arc<dyn IntensitySource>>,
        pricing: Option<Arc<TouPricing>>,
        power: PowerEstimator,
    ) -> Self {
        Self {
            config,
            carbon,
            pricing,
            power,
        }
    }

    /// Evaluate one workload at `now`. `deadline` bounds the whole call;
    /// the carbon lookup is additionally capped by the configured carbon
    /// timeout.
    pub async fn evaluate(&self, pod: &Pod, now: DateTime<Utc>, deadline: Instant) -> Decision {
        if annotations::skip_requested(pod) {
            debug!(pod = %pod.name_any(), "Evaluation skipped by annotation");
            return Decision::admitted("evaluation skipped by annotation");
        }

        let carbon_threshold = annotations::parse_f64(pod, annotations::CARBON_THRESHOLD)
            .unwrap_or(self.config.carbon_threshold);
        let price_override = annotations::parse_f64(pod, annotations::PRICE_THRESHOLD);

        let mut current_carbon = 0.0;
        let mut carbon_delay = false;
        if self.config.carbon_enabled {
            if let Some(source) = &self.carbon {
                let carbon_deadline = deadline.min(Instant::now() + self.config.carbon_timeout);
                match source
                    .current(&self.config.carbon_region, carbon_deadline)
                    .await
                {
                    Ok(sample) => {
                        current_carbon = sample.intensity;
                        carbon_delay = current_carbon > carbon_threshold;
                    }
                    Err(err) => {
                        warn!(
                            region = %self.config.carbon_region,
                            error = %err,
                            "Carbon intensity unavailable; admitting on the carbon axis"
                        );
                    }
                }
            }
        }

        let mut current_price = 0.0;
        let mut price_threshold = 0.0;
        let mut price_delay = false;
        if self.config.pricing_enabled {
            if let Some(pricing) = &self.pricing {
                current_price = pricing.current_rate(now);
                match price_override {
                    Some(threshold) => {
                        price_delay = current_price > threshold;
                        price_threshold = threshold;
                    }
                    None => {
                        // Without an override the peak window itself is
                        // the trigger and the peak rate the effective
                        // threshold.
                        price_delay = pricing.is_peak(now);
                        price_threshold = current_price;
                    }
                }
            }
        }

        let (should_defer, delay_kind) = match (carbon_delay, price_delay) {
            (false, false) => (false, DelayKind::None),
            (true, false) => (true, DelayKind::Carbon),
            (false, true) => (true, DelayKind::Price),
            (true, true) => (true, DelayKind::Both),
        };

        let carbon_reason = format!(
            "current carbon intensity {:.1} gCO2/kWh exceeds threshold {:.1} gCO2/kWh",
            current_carbon, carbon_threshold
        );
        let price_reason = match price_override {
            Some(threshold) => format!(
                "current electricity rate {:.4} USD/kWh exceeds threshold {:.4} USD/kWh",
                current_price, threshold
            ),
            None => format!(
                "current time falls in a peak pricing period ({:.4} USD/kWh)",
                current_price
            ),
        };
        let reason = match delay_kind {
            DelayKind::None => "within configured carbon and price limits".to_string(),
            DelayKind::Carbon => carbon_reason,
            DelayKind::Price => price_reason,
            DelayKind::Both => format!("{}; {}", carbon_reason, price_reason),
        };

        let mut decision = Decision {
            should_defer,
            delay_kind,
            reason,
            current_carbon,
            carbon_threshold,
            current_price,
            price_threshold,
            estimated_power_w: 0.0,
            estimated_runtime_h: 0.0,
            est_carbon_savings_g: 0.0,
            est_cost_savings_usd: 0.0,
        };

        if should_defer {
            let estimate = self.power.estimate(pod);
            decision.estimated_power_w = estimate.power_watts;
            decision.estimated_runtime_h = estimate.runtime_hours;

            let energy_kwh = estimate.power_watts / 1000.0 * estimate.runtime_hours;
            if carbon_delay {
                decision.est_carbon_savings_g =
                    (current_carbon - carbon_threshold).max(0.0) * energy_kwh;
            }
            if price_delay {
                let baseline = self.price_baseline(pod);
                decision.est_cost_savings_usd =
                    (current_price - baseline).max(0.0) * energy_kwh;
            }
        }

        decision
    }

    /// Baseline price for savings math: the per-workload threshold when
    /// one is set, otherwise the rate the workload would pay once the
    /// peak window ends.
    pub fn price_baseline(&self, pod: &Pod) -> f64 {
        annotations::parse_f64(pod, annotations::PRICE_THRESHOLD).unwrap_or_else(|| {
            self.pricing
                .as_ref()
                .map(|pricing| pricing.off_peak_rate())
                .unwrap_or(0.0)
        })
    }

    /// Capture a deferral snapshot for completion accounting.
    pub fn snapshot(&self, pod: &Pod, decision: &Decision, admitted_at: DateTime<Utc>) -> DeferSnapshot {
        DeferSnapshot {
            uid: pod.metadata.uid.clone().unwrap_or_default(),
            name: pod.name_any(),
            namespace: pod.namespace().unwrap_or_else(|| "default".into()),
            decision: decision.clone(),
            start_time: admitted_at,
            price_baseline: self.price_baseline(pod),
        }
    }
}
