//! Carbon intensity API client
//!
//! Fetches current and forecast intensity with a steady-rate request gate,
//! bounded retries with jittered exponential backoff, and an optional
//! read-through cache for "latest" lookups. Forecasts are never cached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::StatusCode;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::carbon::cache::IntensityCache;
use crate::carbon::limiter::RateGate;
use crate::carbon::types::{CarbonSample, ForecastPoint, ForecastResponse, LatestResponse};
use crate::error::{Error, Result};

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const MAX_FORECAST_HORIZON_HOURS: u32 = 72;

/// Narrow cache capability consumed by the client. The cache itself has
/// no knowledge of the client.
pub trait SampleCache: Send + Sync {
    fn lookup(&self, region: &str) -> Option<CarbonSample>;
    fn store(&self, sample: CarbonSample);
}

impl SampleCache for IntensityCache {
    fn lookup(&self, region: &str) -> Option<CarbonSample> {
        self.get(region)
    }

    fn store(&self, sample: CarbonSample) {
        self.set(sample);
    }
}

/// Source of carbon intensity readings, as seen by the evaluator.
#[async_trait]
pub trait IntensitySource: Send + Sync {
    async fn current(&self, region: &str, deadline: Instant) -> Result<CarbonSample>;

    async fn forecast(
        &self,
        region: &str,
        horizon_hours: u32,
        deadline: Instant,
    ) -> Result<Vec<ForecastPoint>>;
}

/// Connection settings for the carbon intensity API.
#[derive(Clone, Debug)]
pub struct CarbonApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub rate_limit_per_sec: u32,
}

pub struct CarbonClient {
    http: reqwest::Client,
    config: CarbonApiConfig,
    gate: RateGate,
    cache: Option<Arc<dyn SampleCache>>,
}

impl CarbonClient {
    pub fn new(config: CarbonApiConfig, cache: Option<Arc<dyn SampleCache>>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(Error::HttpError)?;
        let gate = RateGate::new(config.rate_limit_per_sec);
        Ok(Self {
            http,
            config,
            gate,
            cache,
        })
    }

    /// Current carbon intensity for `region`, from cache when fresh.
    pub async fn get_current(&self, region: &str, deadline: Instant) -> Result<CarbonSample> {
        if let Some(cache) = &self.cache {
            if let Some(sample) = cache.lookup(region) {
                debug!(region, intensity = sample.intensity, "Carbon cache hit");
                return Ok(sample);
            }
        }

        let url = format!(
            "{}/latest/{}",
            self.config.base_url.trim_end_matches('/'),
            region
        );

        let mut last_err = Error::DeadlineExceeded;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                self.backoff_sleep(attempt - 1, deadline).await?;
            }
            self.gate.acquire(deadline).await?;

            match self.fetch_latest(&url, region).await {
                Ok(sample) => {
                    if let Some(cache) = &self.cache {
                        cache.store(sample.clone());
                    }
                    return Ok(sample);
                }
                Err(err) if err.is_retryable() => {
                    warn!(region, attempt, error = %err, "Carbon intensity fetch failed");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::RetriesExhausted(Box::new(last_err)))
    }

    /// Forecast series for the next `horizon_hours` (1..=72).
    pub async fn get_forecast(
        &self,
        region: &str,
        horizon_hours: u32,
        deadline: Instant,
    ) -> Result<Vec<ForecastPoint>> {
        if horizon_hours == 0 || horizon_hours > MAX_FORECAST_HORIZON_HOURS {
            return Err(Error::ConfigError(format!(
                "forecast horizon must be 1..={} hours, got {}",
                MAX_FORECAST_HORIZON_HOURS, horizon_hours
            )));
        }

        let url = format!("{}/forecast", self.config.base_url.trim_end_matches('/'));

        let mut last_err = Error::DeadlineExceeded;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                self.backoff_sleep(attempt - 1, deadline).await?;
            }
            self.gate.acquire(deadline).await?;

            match self.fetch_forecast(&url, region, horizon_hours).await {
                Ok(points) => return Ok(points),
                Err(err) if err.is_retryable() => {
                    warn!(region, attempt, error = %err, "Carbon forecast fetch failed");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::RetriesExhausted(Box::new(last_err)))
    }

    async fn fetch_latest(&self, url: &str, region: &str) -> Result<CarbonSample> {
        let response = self
            .http
            .get(url)
            .header("auth-token", &self.config.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body: LatestResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::DecodeError(e.to_string()))?;
                if body.carbon_intensity < 0.0 {
                    return Err(Error::DecodeError(format!(
                        "negative carbon intensity {}",
                        body.carbon_intensity
                    )));
                }
                let timestamp = parse_or_now(body.timestamp.as_deref());
                Ok(CarbonSample::new(region, body.carbon_intensity, timestamp))
            }
            status => Err(classify_status(status, region)),
        }
    }

    async fn fetch_forecast(
        &self,
        url: &str,
        region: &str,
        horizon_hours: u32,
    ) -> Result<Vec<ForecastPoint>> {
        let response = self
            .http
            .get(url)
            .header("auth-token", &self.config.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("zone", region.to_string()),
                ("horizonHours", horizon_hours.to_string()),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body: ForecastResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::DecodeError(e.to_string()))?;
                if body.data.is_empty() {
                    return Err(Error::DecodeError("empty forecast series".into()));
                }

                let mut points = Vec::with_capacity(body.data.len());
                for entry in body.data {
                    if entry.carbon_intensity < 0.0 {
                        return Err(Error::DecodeError(format!(
                            "negative carbon intensity {} in forecast",
                            entry.carbon_intensity
                        )));
                    }
                    let at = DateTime::parse_from_rfc3339(&entry.datetime)
                        .map_err(|e| {
                            Error::DecodeError(format!(
                                "bad forecast datetime '{}': {}",
                                entry.datetime, e
                            ))
                        })?
                        .with_timezone(&Utc);
                    points.push(ForecastPoint {
                        at,
                        intensity: entry.carbon_intensity,
                    });
                }
                Ok(points)
            }
            status => Err(classify_status(status, region)),
        }
    }

    /// Sleep for the backoff of `attempt`, failing fast if the sleep would
    /// run past `deadline`.
    async fn backoff_sleep(&self, attempt: u32, deadline: Instant) -> Result<()> {
        let delay = with_jitter(backoff_delay(self.config.retry_base_delay, attempt));
        if Instant::now() + delay > deadline {
            return Err(Error::DeadlineExceeded);
        }
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

#[async_trait]
impl IntensitySource for CarbonClient {
    async fn current(&self, region: &str, deadline: Instant) -> Result<CarbonSample> {
        self.get_current(region, deadline).await
    }

    async fn forecast(
        &self,
        region: &str,
        horizon_hours: u32,
        deadline: Instant,
    ) -> Result<Vec<ForecastPoint>> {
        self.get_forecast(region, horizon_hours, deadline).await
    }
}

fn classify_status(status: StatusCode, region: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => Error::AuthRejected,
        StatusCode::NOT_FOUND => Error::RegionNotFound(region.to_string()),
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited,
        status => Error::UpstreamStatus(status.as_u16()),
    }
}

fn parse_or_now(timestamp: Option<&str>) -> DateTime<Utc> {
    match timestamp {
        Some(ts) => match DateTime::parse_from_rfc3339(ts) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => {
                warn!("Failed to parse timestamp '{}': {}", ts, e);
                Utc::now()
            }
        },
        None => Utc::now(),
    }
}

/// Un-jittered exponential backoff: `base * 2^attempt`, capped at 60s.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
}

/// Apply +-20% multiplicative jitter.
fn with_jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<String, CarbonSample>>,
    }

    impl SampleCache for MemoryCache {
        fn lookup(&self, region: &str) -> Option<CarbonSample> {
            self.entries.lock().get(region).cloned()
        }

        fn store(&self, sample: CarbonSample) {
            self.entries.lock().insert(sample.region.clone(), sample);
        }
    }

    fn test_config(base_url: String) -> CarbonApiConfig {
        CarbonApiConfig {
            base_url,
            api_key: "test-key".into(),
            timeout: Duration::from_secs(2),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(10),
            rate_limit_per_sec: 1000,
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn fetches_and_caches_current_intensity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/DE"))
            .and(header("auth-token", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "carbonIntensity": 212.0,
                "timestamp": "2026-03-01T10:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(MemoryCache::default());
        let client = CarbonClient::new(test_config(server.uri()), Some(cache.clone())).unwrap();

        let sample = client.get_current("DE", far_deadline()).await.unwrap();
        assert_eq!(sample.intensity, 212.0);
        assert_eq!(sample.region, "DE");
        assert!(cache.lookup("DE").is_some());
    }

    #[tokio::test]
    async fn cache_hit_skips_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let cache = Arc::new(MemoryCache::default());
        cache.store(CarbonSample::new("DE", 99.0, Utc::now()));
        let client = CarbonClient::new(test_config(server.uri()), Some(cache)).unwrap();

        let sample = client.get_current("DE", far_deadline()).await.unwrap();
        assert_eq!(sample.intensity, 99.0);
    }

    #[tokio::test]
    async fn missing_timestamp_is_filled_with_now() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/DE"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"carbonIntensity": 100.0})),
            )
            .mount(&server)
            .await;

        let client = CarbonClient::new(test_config(server.uri()), None).unwrap();
        let before = Utc::now();
        let sample = client.get_current("DE", far_deadline()).await.unwrap();
        assert!(sample.timestamp >= before);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/DE"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = CarbonClient::new(test_config(server.uri()), None).unwrap();
        let err = client.get_current("DE", far_deadline()).await.unwrap_err();
        assert!(matches!(err, Error::AuthRejected));
    }

    #[tokio::test]
    async fn unknown_region_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/XX"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = CarbonClient::new(test_config(server.uri()), None).unwrap();
        let err = client.get_current("XX", far_deadline()).await.unwrap_err();
        assert!(matches!(err, Error::RegionNotFound(region) if region == "XX"));
    }

    #[tokio::test]
    async fn negative_intensity_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/DE"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"carbonIntensity": -5.0})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = CarbonClient::new(test_config(server.uri()), None).unwrap();
        let err = client.get_current("DE", far_deadline()).await.unwrap_err();
        assert!(matches!(err, Error::DecodeError(_)));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/DE"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/DE"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"carbonIntensity": 180.0})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(MemoryCache::default());
        let mut config = test_config(server.uri());
        config.retry_base_delay = Duration::from_millis(100);
        let client = CarbonClient::new(config, Some(cache.clone())).unwrap();

        let started = std::time::Instant::now();
        let sample = client.get_current("DE", far_deadline()).await.unwrap();
        assert_eq!(sample.intensity, 180.0);
        // Two backoffs of >= 0.8*100ms and >= 0.8*200ms.
        assert!(started.elapsed() >= Duration::from_millis(240));
        assert!(cache.lookup("DE").is_some());
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/DE"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4)
            .mount(&server)
            .await;

        let client = CarbonClient::new(test_config(server.uri()), None).unwrap();
        let err = client.get_current("DE", far_deadline()).await.unwrap_err();
        match err {
            Error::RetriesExhausted(inner) => {
                assert!(matches!(*inner, Error::UpstreamStatus(503)))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn deadline_cuts_the_backoff_short() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/DE"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut config = test_config(server.uri());
        config.retry_base_delay = Duration::from_secs(5);
        let client = CarbonClient::new(config, None).unwrap();

        let err = client
            .get_current("DE", Instant::now() + Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
    }

    #[tokio::test]
    async fn forecast_parses_series() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .and(query_param("zone", "DE"))
            .and(query_param("horizonHours", "24"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "zone": "DE",
                "data": [
                    {"datetime": "2026-03-01T10:00:00Z", "carbonIntensity": 120.0},
                    {"datetime": "2026-03-01T11:00:00Z", "carbonIntensity": 90.0}
                ],
                "temporalGranularity": "hourly"
            })))
            .mount(&server)
            .await;

        let client = CarbonClient::new(test_config(server.uri()), None).unwrap();
        let points = client.get_forecast("DE", 24, far_deadline()).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].intensity, 90.0);
    }

    #[tokio::test]
    async fn empty_forecast_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"zone": "DE", "data": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = CarbonClient::new(test_config(server.uri()), None).unwrap();
        let err = client.get_forecast("DE", 24, far_deadline()).await.unwrap_err();
        assert!(matches!(err, Error::DecodeError(_)));
    }

    #[tokio::test]
    async fn forecast_horizon_is_bounded() {
        let client =
            CarbonClient::new(test_config("http://localhost:1".into()), None).unwrap();
        assert!(matches!(
            client.get_forecast("DE", 0, far_deadline()).await,
            Err(Error::ConfigError(_))
        ));
        assert!(matches!(
            client.get_forecast("DE", 73, far_deadline()).await,
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn backoff_is_monotone_up_to_the_cap() {
        let base = Duration::from_millis(100);
        let mut prev = Duration::ZERO;
        for attempt in 0..12 {
            let delay = backoff_delay(base, attempt);
            assert!(delay >= prev);
            assert!(delay <= MAX_BACKOFF);
            prev = delay;
        }
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 20), MAX_BACKOFF);
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let delay = Duration::from_secs(1);
        for _ in 0..100 {
            let jittered = with_jitter(delay);
            assert!(jittered >= Duration::from_millis(800));
            assert!(jittered <= Duration::from_millis(1200));
        }
    }
}
