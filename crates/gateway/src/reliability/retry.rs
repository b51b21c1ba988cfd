use std::time::Duration;

use rand::Rng;

use crate::adapters::AdapterError;

/// Failure classes drive both retry behavior and breaker accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 5xx-equivalent, timeout, connection reset: retried, counted by the
    /// circuit breaker.
    Transient,
    /// 429-equivalent: retried a bounded number of times, then surfaced as a
    /// distinct quota error. Not counted by the circuit breaker.
    RateLimited,
    /// Structured unsupported-tool signal, negotiated instead of retried.
    UnsupportedTool,
    /// Everything else is terminal for this attempt loop.
    Fatal,
}

pub fn classify(error: &AdapterError) -> FailureClass {
    match error {
        AdapterError::Timeout | AdapterError::Connect(_) => FailureClass::Transient,
        AdapterError::Upstream { status, .. } if *status == 429 => FailureClass::RateLimited,
        AdapterError::Upstream { status, .. } if *status >= 500 => FailureClass::Transient,
        AdapterError::UnsupportedTool { .. } => FailureClass::UnsupportedTool,
        _ => FailureClass::Fatal,
    }
}

/// Whether the failure counts toward opening the circuit. Caller input and
/// quota pressure never do.
pub fn counts_toward_breaker(class: FailureClass) -> bool {
    class == FailureClass::Transient
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_consecutive_rate_limited: u32,
}

impl RetryPolicy {
    /// Backoff doubles per attempt from the base delay with up to 50%
    /// additive jitter; an explicit retry-after hint wins outright.
    pub fn delay(&self, completed_attempts: u32, retry_after_hint: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after_hint {
            return hint;
        }
        let exponent = completed_attempts.saturating_sub(1).min(16);
        let base = self
            .base_backoff_ms
            .saturating_mul(1_u64 << exponent);
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(base.saturating_add(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_backoff_ms: 100,
            max_consecutive_rate_limited: 3,
        }
    }

    #[test]
    fn delay_doubles_with_bounded_jitter() {
        let policy = policy();
        for (attempt, base) in [(1_u32, 100_u64), (2, 200), (3, 400)] {
            let delay = policy.delay(attempt, None).as_millis() as u64;
            assert!(delay >= base, "attempt {attempt}: {delay} < {base}");
            assert!(delay <= base + base / 2, "attempt {attempt}: {delay} too large");
        }
    }

    #[test]
    fn retry_after_hint_wins() {
        let delay = policy().delay(1, Some(Duration::from_secs(7)));
        assert_eq!(delay, Duration::from_secs(7));
    }

    #[test]
    fn classification_matches_taxonomy() {
        assert_eq!(classify(&AdapterError::Timeout), FailureClass::Transient);
        assert_eq!(
            classify(&AdapterError::Upstream {
                status: 503,
                code: "overloaded".to_string(),
                retry_after_seconds: None,
            }),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&AdapterError::Upstream {
                status: 429,
                code: "rate_limited".to_string(),
                retry_after_seconds: Some(5),
            }),
            FailureClass::RateLimited
        );
        assert_eq!(
            classify(&AdapterError::Upstream {
                status: 400,
                code: "bad_request".to_string(),
                retry_after_seconds: None,
            }),
            FailureClass::Fatal
        );
        assert_eq!(
            classify(&AdapterError::UnsupportedTool {
                variant: "web_search".to_string(),
            }),
            FailureClass::UnsupportedTool
        );
    }
}
