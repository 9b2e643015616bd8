//! Engine configuration
//!
//! Every knob is settable as a flag or environment variable. Validation
//! happens up front: the process refuses to start with non-positive
//! thresholds, mis-ordered rates, or malformed schedule files rather
//! than run with degraded semantics.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::carbon::CarbonApiConfig;
use crate::error::{Error, Result};
use crate::evaluator::EvaluatorConfig;
use crate::power::NodePower;
use crate::pricing::TouPricing;

/// Environment prefix for per-node power overrides, e.g.
/// `NODE_POWER_CONFIG_WORKER_1=idle:50,max:350` for node `worker-1`.
const NODE_POWER_ENV_PREFIX: &str = "NODE_POWER_CONFIG_";

#[derive(Parser, Clone, Debug)]
#[command(
    name = "greenlight-operator",
    version,
    about = "Carbon- and price-aware workload admission engine"
)]
pub struct Config {
    /// Base URL of the carbon intensity API
    #[arg(
        long,
        env = "CARBON_API_URL",
        default_value = "https://api.electricitymap.org/v3"
    )]
    pub carbon_api_url: String,

    /// API key sent in the auth-token header
    #[arg(long, env = "CARBON_API_KEY", default_value = "", hide_env_values = true)]
    pub carbon_api_key: String,

    /// Grid region evaluated for admissions
    #[arg(long, env = "CARBON_REGION", default_value = "US-CAL-CISO")]
    pub carbon_region: String,

    /// Enable the carbon intensity signal
    #[arg(
        long,
        env = "CARBON_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub carbon_enabled: bool,

    /// Global carbon intensity threshold in gCO2eq/kWh
    #[arg(long, env = "CARBON_INTENSITY_THRESHOLD", default_value_t = 150.0)]
    pub carbon_threshold: f64,

    /// Per-request HTTP timeout
    #[arg(long, env = "HTTP_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub http_timeout: Duration,

    /// Retries after a failed carbon API call
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Base delay of the exponential retry backoff
    #[arg(long, env = "RETRY_BASE_DELAY", default_value = "1s", value_parser = parse_duration)]
    pub retry_base_delay: Duration,

    /// Carbon API requests per second
    #[arg(long, env = "API_RATE_LIMIT", default_value_t = 10)]
    pub api_rate_limit: u32,

    /// Freshness window of cached carbon samples
    #[arg(long, env = "CACHE_TTL", default_value = "5m", value_parser = parse_duration)]
    pub cache_ttl: Duration,

    /// Age at which cached samples are swept
    #[arg(long, env = "CACHE_MAX_AGE", default_value = "1h", value_parser = parse_duration)]
    pub cache_max_age: Duration,

    /// Enable the time-of-use price signal
    #[arg(
        long,
        env = "PRICING_ENABLED",
        default_value_t = false,
        action = ArgAction::Set
    )]
    pub pricing_enabled: bool,

    /// YAML file with the TOU schedules
    #[arg(long, env = "PRICING_SCHEDULES_PATH")]
    pub pricing_schedules_path: Option<PathBuf>,

    /// Upper bound on how long a workload may be deferred
    #[arg(long, env = "MAX_SCHEDULING_DELAY", default_value = "24h", value_parser = parse_duration)]
    pub max_scheduling_delay: Duration,

    /// Comma-separated namespaces to evaluate; empty means all
    #[arg(long, env = "NAMESPACE_WATCH_LIST", default_value = "")]
    pub namespace_watch_list: String,

    /// Write evaluation results back as dry-run annotations
    #[arg(
        long,
        env = "ANNOTATE_RESULTS",
        default_value_t = false,
        action = ArgAction::Set
    )]
    pub annotate: bool,

    /// Listen address of the metrics endpoint
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9090")]
    pub metrics_addr: SocketAddr,
}

impl Config {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.carbon_threshold <= 0.0 {
            return Err(Error::ConfigError(format!(
                "carbon threshold must be positive, got {}",
                self.carbon_threshold
            )));
        }
        if self.cache_ttl.is_zero() {
            return Err(Error::ConfigError("cache TTL must be positive".into()));
        }
        if self.cache_max_age < self.cache_ttl {
            return Err(Error::ConfigError(
                "cache max age must be at least the cache TTL".into(),
            ));
        }
        if self.max_scheduling_delay.is_zero() {
            return Err(Error::ConfigError(
                "max scheduling delay must be positive".into(),
            ));
        }
        if self.pricing_enabled && self.pricing_schedules_path.is_none() {
            return Err(Error::ConfigError(
                "pricing is enabled but no schedules file is configured".into(),
            ));
        }
        Ok(())
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespace_watch_list
            .split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn carbon_api_config(&self) -> CarbonApiConfig {
        CarbonApiConfig {
            base_url: self.carbon_api_url.clone(),
            api_key: self.carbon_api_key.clone(),
            timeout: self.http_timeout,
            max_retries: self.max_retries,
            retry_base_delay: self.retry_base_delay,
            rate_limit_per_sec: self.api_rate_limit,
        }
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            carbon_enabled: self.carbon_enabled,
            carbon_region: self.carbon_region.clone(),
            carbon_threshold: self.carbon_threshold,
            pricing_enabled: self.pricing_enabled,
            ..EvaluatorConfig::default()
        }
    }

    /// Load and validate the TOU schedules when pricing is enabled.
    pub fn load_pricing(&self) -> Result<Option<TouPricing>> {
        if !self.pricing_enabled {
            return Ok(None);
        }
        let path = self.pricing_schedules_path.as_ref().ok_or_else(|| {
            Error::ConfigError("pricing is enabled but no schedules file is configured".into())
        })?;
        TouPricing::from_path(path).map(Some)
    }

    /// Collect `NODE_POWER_CONFIG_*` overrides from the environment. The
    /// suffix is the node name uppercased with `-` and `.` mapped to `_`.
    pub fn node_power_overrides() -> Result<HashMap<String, NodePower>> {
        let mut overrides = HashMap::new();
        for (key, value) in std::env::vars() {
            let Some(suffix) = key.strip_prefix(NODE_POWER_ENV_PREFIX) else {
                continue;
            };
            let node = suffix.to_lowercase().replace('_', "-");
            overrides.insert(node, NodePower::parse(&value)?);
        }
        Ok(overrides)
    }
}

/// Parse a duration like "500ms", "10s", "5m", or "24h".
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{}' is missing a unit (ms, s, m, h)", raw))?;
    let (number, unit) = raw.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration value '{}'", raw))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("unknown duration unit '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Config {
        Config::parse_from(["greenlight-operator"])
    }

    #[test]
    fn default_configuration_is_valid() {
        let config = defaults();
        assert!(config.validate().is_ok());
        assert_eq!(config.carbon_region, "US-CAL-CISO");
        assert_eq!(config.carbon_threshold, 150.0);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.cache_max_age, Duration::from_secs(3600));
        assert!(!config.pricing_enabled);
    }

    #[test]
    fn duration_grammar() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));

        assert!(parse_duration("10").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn rejects_bad_thresholds_and_windows() {
        let mut config = defaults();
        config.carbon_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = defaults();
        config.cache_max_age = Duration::from_secs(1);
        assert!(config.validate().is_err());

        let mut config = defaults();
        config.pricing_enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn namespace_list_parsing() {
        let mut config = defaults();
        assert!(config.namespaces().is_empty());

        config.namespace_watch_list = "batch, ml ,".into();
        assert_eq!(config.namespaces(), vec!["batch", "ml"]);
    }

    #[test]
    fn node_power_overrides_from_env() {
        std::env::set_var("NODE_POWER_CONFIG_TEST_NODE_7", "idle:45,max:320");
        let overrides = Config::node_power_overrides().unwrap();
        let power = overrides.get("test-node-7").expect("override should parse");
        assert_eq!(power.idle_watts, 45.0);
        assert_eq!(power.max_watts, 320.0);
        std::env::remove_var("NODE_POWER_CONFIG_TEST_NODE_7");
    }

    #[test]
    fn pricing_disabled_loads_nothing() {
        let config = defaults();
        assert!(config.load_pricing().unwrap().is_none());
    }
}
