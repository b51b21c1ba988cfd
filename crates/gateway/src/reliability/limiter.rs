use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use crate::request::Vendor;

use super::ReliabilityConfig;

const MAX_WAKE_JITTER_MS: u64 = 250;
const CHARS_PER_TOKEN: usize = 4;

/// Pre-call token estimate: a character heuristic for the input plus the
/// requested output budget, inflated for grounded calls since tool use
/// consumes extra budget.
pub fn estimate_tokens(
    input_chars: usize,
    max_output_tokens: u32,
    grounded: bool,
    grounded_multiplier: f64,
) -> u64 {
    let base = (input_chars / CHARS_PER_TOKEN) as u64 + u64::from(max_output_tokens);
    if grounded {
        (base as f64 * grounded_multiplier).ceil() as u64
    } else {
        base
    }
}

#[derive(Debug)]
struct VendorWindow {
    started_at: Instant,
    consumed: u64,
    debt: u64,
}

/// Handle for one admitted reservation; used for post-call reconciliation.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub vendor: Vendor,
    pub tokens: u64,
    window_started_at: Instant,
}

/// Sliding one-window-per-vendor token budget. Debt from underestimated
/// calls seeds the next window's starting consumption, never discarded.
pub struct RateLimiter {
    windows: Mutex<HashMap<Vendor, VendorWindow>>,
    window_length: Duration,
    config: ReliabilityConfig,
}

impl RateLimiter {
    pub fn new(config: ReliabilityConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window_length: config.rate_limit_window(),
            config,
        }
    }

    /// Blocks (async) until the estimate fits the current window. Wake times
    /// carry a small random jitter so concurrent waiters do not stampede the
    /// next window boundary together.
    pub async fn reserve(&self, vendor: Vendor, estimate: u64) -> Reservation {
        loop {
            match self.try_reserve(vendor, estimate) {
                Ok(reservation) => return reservation,
                Err(wait) => {
                    debug!(
                        vendor = vendor.as_str(),
                        wait_ms = wait.as_millis() as u64,
                        "rate limit window saturated, waiting"
                    );
                    sleep(wait).await;
                }
            }
        }
    }

    fn try_reserve(&self, vendor: Vendor, estimate: u64) -> Result<Reservation, Duration> {
        let now = Instant::now();
        let mut windows = self.lock_windows();
        let window = windows.entry(vendor).or_insert_with(|| VendorWindow {
            started_at: now,
            consumed: 0,
            debt: 0,
        });

        let elapsed = now.saturating_duration_since(window.started_at);
        if elapsed >= self.window_length {
            window.started_at = now;
            window.consumed = window.debt;
            window.debt = 0;
        }

        let budget = self.config.effective_budget_for(vendor);
        let fits = window.consumed.saturating_add(estimate) <= budget;
        // An estimate larger than the whole budget is admitted alone against
        // an empty window; it would otherwise wait forever.
        let oversized_alone = estimate > budget && window.consumed == 0;
        if fits || oversized_alone {
            window.consumed = window.consumed.saturating_add(estimate);
            return Ok(Reservation {
                vendor,
                tokens: estimate,
                window_started_at: window.started_at,
            });
        }

        let elapsed = now.saturating_duration_since(window.started_at);
        let until_boundary = self.window_length.saturating_sub(elapsed);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_WAKE_JITTER_MS));
        Err(until_boundary + jitter)
    }

    /// Post-call reconciliation. Overruns become debt carried into the next
    /// window; unused reservation is released so a failed or cheap call does
    /// not hold budget it never spent.
    pub fn reconcile(&self, reservation: &Reservation, actual_tokens: u64) {
        let mut windows = self.lock_windows();
        let Some(window) = windows.get_mut(&reservation.vendor) else {
            return;
        };

        if actual_tokens > reservation.tokens {
            window.debt = window
                .debt
                .saturating_add(actual_tokens - reservation.tokens);
        } else if window.started_at == reservation.window_started_at {
            window.consumed = window
                .consumed
                .saturating_sub(reservation.tokens - actual_tokens);
        }
    }

    fn lock_windows(&self) -> std::sync::MutexGuard<'_, HashMap<Vendor, VendorWindow>> {
        match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
