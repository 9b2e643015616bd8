//! Admission decision types

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which signal asked for the deferral.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayKind {
    None,
    Carbon,
    Price,
    Both,
}

impl DelayKind {
    pub fn is_carbon(self) -> bool {
        matches!(self, DelayKind::Carbon | DelayKind::Both)
    }

    pub fn is_price(self) -> bool {
        matches!(self, DelayKind::Price | DelayKind::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DelayKind::None => "none",
            DelayKind::Carbon => "carbon",
            DelayKind::Price => "price",
            DelayKind::Both => "both",
        }
    }
}

impl std::fmt::Display for DelayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The verdict for one workload at one instant. Advisory; enforcement is
/// the caller's business.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Decision {
    pub should_defer: bool,
    pub delay_kind: DelayKind,
    pub reason: String,
    /// Carbon intensity observed at evaluation time, gCO2eq/kWh. Zero
    /// when the carbon source was unavailable.
    pub current_carbon: f64,
    pub carbon_threshold: f64,
    /// Electricity rate at evaluation time, USD/kWh.
    pub current_price: f64,
    /// The effective price threshold: the per-workload override when
    /// set, otherwise the matched peak rate.
    pub price_threshold: f64,
    pub estimated_power_w: f64,
    pub estimated_runtime_h: f64,
    pub est_carbon_savings_g: f64,
    pub est_cost_savings_usd: f64,
}

impl Decision {
    /// An immediate-admit decision with no signals attached.
    pub fn admitted(reason: impl Into<String>) -> Self {
        Self {
            should_defer: false,
            delay_kind: DelayKind::None,
            reason: reason.into(),
            current_carbon: 0.0,
            carbon_threshold: 0.0,
            current_price: 0.0,
            price_threshold: 0.0,
            estimated_power_w: 0.0,
            estimated_runtime_h: 0.0,
            est_carbon_savings_g: 0.0,
            est_cost_savings_usd: 0.0,
        }
    }
}

/// A deferral decision captured at admission time, keyed by workload UID
/// and retrieved when the workload terminates.
#[derive(Clone, Debug)]
pub struct DeferSnapshot {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub decision: Decision,
    /// Wall clock at admission; replaced by the observed start instant
    /// once the workload is seen running.
    pub start_time: DateTime<Utc>,
    /// Baseline price for realized-savings math: the per-workload
    /// threshold when one was set, otherwise the off-peak rate the
    /// workload would pay outside the peak window.
    pub price_baseline: f64,
}

/// Savings realized by a deferred-then-completed workload. Computed at
/// completion, exported as metrics, never persisted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RealizedSavings {
    pub runtime_hours: f64,
    pub energy_kwh: f64,
    pub carbon_g: f64,
    pub cost_usd: f64,
}
