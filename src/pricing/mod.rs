//! Time-of-use price engine

pub mod parser;
pub mod schedule;

pub use schedule::{SchedulePeriod, ScheduleSpec, TouPricing};
