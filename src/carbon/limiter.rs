//! Steady-rate token source for outbound API requests

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Hands out request slots at a fixed rate.
///
/// Each successful [`acquire`](RateGate::acquire) reserves the next slot
/// and sleeps until it opens, so callers collectively never exceed the
/// configured requests-per-second rate.
pub struct RateGate {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateGate {
    /// `rate_per_sec` below 1 is clamped to 1.
    pub fn new(rate_per_sec: u32) -> Self {
        let rate = rate_per_sec.max(1);
        Self {
            interval: Duration::from_secs(1) / rate,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Wait for the next request slot, or fail with
    /// [`Error::DeadlineExceeded`] if the slot would open after `deadline`.
    /// On failure no slot is consumed.
    pub async fn acquire(&self, deadline: Instant) -> Result<()> {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            if slot > deadline {
                return Err(Error::DeadlineExceeded);
            }
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
        Ok(())
    }
}
