//! Greenlight-K8s: carbon- and price-aware workload admission engine
//!
//! For each candidate pod the engine decides whether to admit it now or
//! defer it, based on grid carbon intensity, time-of-use electricity
//! pricing, and per-workload thresholds. Deferred-then-completed
//! workloads get conservative savings estimates exposed as metrics.

pub mod annotations;
pub mod carbon;
pub mod config;
pub mod controller;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod power;
pub mod pricing;
pub mod server;
pub mod store;

pub use crate::error::{Error, Result};
