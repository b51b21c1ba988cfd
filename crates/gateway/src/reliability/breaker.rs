use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

use super::TargetKey;

/// Externally observable circuit state, recorded on telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { until: Instant },
    /// One probe is in flight; concurrent callers keep failing fast.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerEntry {
    phase: Phase,
    consecutive_failures: u32,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            phase: Phase::Closed,
            consecutive_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AdmitDecision {
    Admitted(CircuitState),
    Rejected { retry_after: Duration },
}

/// Per-(vendor, model) breaker map. Only server-class and network failures
/// count toward opening; caller input errors never reach `record_failure`.
pub struct CircuitBreaker {
    entries: Mutex<HashMap<TargetKey, BreakerEntry>>,
    failure_threshold: u32,
    hold_min: Duration,
    hold_max: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, hold_min: Duration, hold_max: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            failure_threshold,
            hold_min,
            hold_max,
        }
    }

    pub fn admit(&self, key: &TargetKey) -> AdmitDecision {
        let now = Instant::now();
        let mut entries = self.lock_entries();
        let entry = entries.entry(key.clone()).or_default();
        match entry.phase {
            Phase::Closed => AdmitDecision::Admitted(CircuitState::Closed),
            Phase::Open { until } if now >= until => {
                entry.phase = Phase::HalfOpen;
                AdmitDecision::Admitted(CircuitState::HalfOpen)
            }
            Phase::Open { until } => AdmitDecision::Rejected {
                retry_after: until.saturating_duration_since(now),
            },
            Phase::HalfOpen => AdmitDecision::Rejected {
                retry_after: Duration::ZERO,
            },
        }
    }

    pub fn record_success(&self, key: &TargetKey) {
        let mut entries = self.lock_entries();
        let entry = entries.entry(key.clone()).or_default();
        entry.phase = Phase::Closed;
        entry.consecutive_failures = 0;
    }

    pub fn record_failure(&self, key: &TargetKey) {
        let now = Instant::now();
        let hold = self.sample_hold();
        let mut entries = self.lock_entries();
        let entry = entries.entry(key.clone()).or_default();
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        match entry.phase {
            // A failed probe re-opens immediately regardless of the count.
            Phase::HalfOpen => entry.phase = Phase::Open { until: now + hold },
            _ if entry.consecutive_failures >= self.failure_threshold => {
                entry.phase = Phase::Open { until: now + hold };
            }
            _ => {}
        }
    }

    pub fn observed_state(&self, key: &TargetKey) -> CircuitState {
        let entries = self.lock_entries();
        match entries.get(key).map(|entry| entry.phase) {
            Some(Phase::Open { .. }) => CircuitState::Open,
            Some(Phase::HalfOpen) => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Hold duration is sampled per opening so concurrent callers against a
    /// failing target do not all retry at the same instant.
    fn sample_hold(&self) -> Duration {
        let min_ms = self.hold_min.as_millis() as u64;
        let max_ms = self.hold_max.as_millis() as u64;
        if max_ms <= min_ms {
            return self.hold_min;
        }
        let sampled = rand::thread_rng().gen_range(min_ms..=max_ms);
        Duration::from_millis(sampled)
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<TargetKey, BreakerEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Vendor;

    fn key() -> TargetKey {
        TargetKey::new(Vendor::OpenAi, "gpt-4o")
    }

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            threshold,
            Duration::from_millis(20),
            Duration::from_millis(30),
        )
    }

    #[test]
    fn opens_after_threshold_and_admits_single_probe() {
        let breaker = breaker(2);
        breaker.record_failure(&key());
        breaker.record_failure(&key());
        assert!(matches!(
            breaker.admit(&key()),
            AdmitDecision::Rejected { .. }
        ));

        std::thread::sleep(Duration::from_millis(40));
        assert!(matches!(
            breaker.admit(&key()),
            AdmitDecision::Admitted(CircuitState::HalfOpen)
        ));
        // Probe in flight: a second caller is still rejected.
        assert!(matches!(
            breaker.admit(&key()),
            AdmitDecision::Rejected { .. }
        ));
    }

    #[test]
    fn probe_success_closes_and_resets() {
        let breaker = breaker(1);
        breaker.record_failure(&key());
        std::thread::sleep(Duration::from_millis(40));
        assert!(matches!(
            breaker.admit(&key()),
            AdmitDecision::Admitted(CircuitState::HalfOpen)
        ));
        breaker.record_success(&key());
        assert!(matches!(
            breaker.admit(&key()),
            AdmitDecision::Admitted(CircuitState::Closed)
        ));
    }

    #[test]
    fn probe_failure_reopens() {
        let breaker = breaker(3);
        breaker.record_failure(&key());
        breaker.record_failure(&key());
        breaker.record_failure(&key());
        std::thread::sleep(Duration::from_millis(40));
        assert!(matches!(
            breaker.admit(&key()),
            AdmitDecision::Admitted(CircuitState::HalfOpen)
        ));
        breaker.record_failure(&key());
        assert!(matches!(
            breaker.admit(&key()),
            AdmitDecision::Rejected { .. }
        ));
    }
}
