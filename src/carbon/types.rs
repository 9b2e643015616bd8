//! Types for carbon intensity data

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// One carbon intensity observation for a grid region
#[derive(Clone, Debug)]
pub struct CarbonSample {
    /// Grid region identifier (e.g. "US-CAL-CISO", "DE")
    pub region: String,
    /// Carbon intensity in gCO2eq/kWh, never negative
    pub intensity: f64,
    /// Wall-clock timestamp reported by the data source
    pub timestamp: DateTime<Utc>,
    /// Monotonic instant at which the sample was received
    pub observed_at: Instant,
}

impl CarbonSample {
    pub fn new(region: impl Into<String>, intensity: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            region: region.into(),
            intensity,
            timestamp,
            observed_at: Instant::now(),
        }
    }
}

/// One point of a carbon intensity forecast series
#[derive(Clone, Debug, PartialEq)]
pub struct ForecastPoint {
    pub at: DateTime<Utc>,
    pub intensity: f64,
}

/// Wire format of the "latest" endpoint
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LatestResponse {
    pub carbon_intensity: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Wire format of the "forecast" endpoint
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ForecastResponse {
    #[allow(dead_code)]
    pub zone: Option<String>,
    pub data: Vec<ForecastEntry>,
    #[allow(dead_code)]
    pub temporal_granularity: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ForecastEntry {
    pub datetime: String,
    pub carbon_intensity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_response_tolerates_missing_timestamp() {
        let parsed: LatestResponse =
            serde_json::from_str(r#"{"carbonIntensity": 212.5}"#).unwrap();
        assert_eq!(parsed.carbon_intensity, 212.5);
        assert!(parsed.timestamp.is_none());
    }

    #[test]
    fn forecast_response_parses_series() {
        let parsed: ForecastResponse = serde_json::from_str(
            r#"{
                "zone": "DE",
                "data": [
                    {"datetime": "2026-03-01T10:00:00Z", "carbonIntensity": 120.0},
                    {"datetime": "2026-03-01T11:00:00Z", "carbonIntensity": 135.0}
                ],
                "temporalGranularity": "hourly"
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[1].carbon_intensity, 135.0);
    }
}
