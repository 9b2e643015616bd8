//! Carbon intensity data source: API client, rate gate, and TTL cache

pub mod cache;
pub mod client;
pub mod limiter;
pub mod types;

pub use cache::IntensityCache;
pub use client::{CarbonApiConfig, CarbonClient, IntensitySource, SampleCache};
pub use limiter::RateGate;
pub use types::{CarbonSample, ForecastPoint};
