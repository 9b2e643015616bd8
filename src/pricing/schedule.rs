//! Time-of-use electricity pricing
//!
//! The configuration is an ordered list of peak windows plus one
//! canonical off-peak rate. A window matches when the weekday (Sunday =
//! 0) is in its day set and the time of day falls inside its inclusive
//! start/end bounds. Overlapping windows resolve to the first match in
//! configuration order.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::pricing::parser::{parse_days, parse_time};

/// One schedule item as written in the YAML schedule file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    pub name: String,
    pub day_of_week: String,
    pub start_time: String,
    pub end_time: String,
    pub peak_rate: f64,
    pub off_peak_rate: f64,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScheduleFile {
    schedules: Vec<ScheduleSpec>,
}

/// A validated peak window.
#[derive(Clone, Debug)]
pub struct SchedulePeriod {
    pub name: String,
    pub days: BTreeSet<u8>,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub peak_rate: f64,
}

impl SchedulePeriod {
    fn matches(&self, now: DateTime<Utc>) -> bool {
        let weekday = now.weekday().num_days_from_sunday() as u8;
        if !self.days.contains(&weekday) {
            return false;
        }
        let time = now.time().with_nanosecond(0).unwrap_or_else(|| now.time());
        self.start <= time && time <= self.end
    }
}

/// Computes the current electricity rate and peak status from a set of
/// TOU schedules. Instants are evaluated on the UTC clock the rest of
/// the engine runs on; the schedule `timezone` field is carried through
/// from the file but does not shift evaluation.
#[derive(Clone, Debug)]
pub struct TouPricing {
    periods: Vec<SchedulePeriod>,
    off_peak_rate: f64,
}

impl TouPricing {
    /// Load and validate a YAML schedule file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read schedule file {}: {}", path.display(), e))
        })?;
        let file: ScheduleFile = serde_yaml::from_str(&raw)
            .map_err(|e| Error::ConfigError(format!("invalid schedule file: {}", e)))?;
        Self::from_specs(file.schedules)
    }

    /// Validate schedule items. Rejects empty schedule lists, rates that
    /// are not `peak > off_peak > 0`, inconsistent off-peak rates across
    /// items, and malformed day/time strings.
    pub fn from_specs(specs: Vec<ScheduleSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(Error::ConfigError("no pricing schedules configured".into()));
        }

        let off_peak_rate = specs[0].off_peak_rate;
        let mut periods = Vec::with_capacity(specs.len());

        for spec in &specs {
            if spec.off_peak_rate <= 0.0 {
                return Err(Error::ConfigError(format!(
                    "schedule '{}': off-peak rate must be positive, got {}",
                    spec.name, spec.off_peak_rate
                )));
            }
            if spec.peak_rate <= spec.off_peak_rate {
                return Err(Error::ConfigError(format!(
                    "schedule '{}': peak rate {} must exceed off-peak rate {}",
                    spec.name, spec.peak_rate, spec.off_peak_rate
                )));
            }
            if spec.off_peak_rate != off_peak_rate {
                return Err(Error::ConfigError(format!(
                    "schedule '{}': off-peak rate {} disagrees with {}",
                    spec.name, spec.off_peak_rate, off_peak_rate
                )));
            }

            let days = parse_days(&spec.day_of_week)?;
            let start = parse_time(&spec.start_time)?;
            let end = parse_time(&spec.end_time)?;
            if start > end {
                return Err(Error::ConfigError(format!(
                    "schedule '{}': start {} is after end {}",
                    spec.name, spec.start_time, spec.end_time
                )));
            }

            periods.push(SchedulePeriod {
                name: spec.name.clone(),
                days,
                start,
                end,
                peak_rate: spec.peak_rate,
            });
        }

        Ok(Self {
            periods,
            off_peak_rate,
        })
    }

    /// Whether `now` falls inside any peak window.
    pub fn is_peak(&self, now: DateTime<Utc>) -> bool {
        self.periods.iter().any(|p| p.matches(now))
    }

    /// The peak rate of the first matching window, if any.
    pub fn peak_rate_at(&self, now: DateTime<Utc>) -> Option<f64> {
        self.periods.iter().find(|p| p.matches(now)).map(|p| p.peak_rate)
    }

    /// The rate in effect at `now`.
    pub fn current_rate(&self, now: DateTime<Utc>) -> f64 {
        self.peak_rate_at(now).unwrap_or(self.off_peak_rate)
    }

    pub fn off_peak_rate(&self) -> f64 {
        self.off_peak_rate
    }
}
