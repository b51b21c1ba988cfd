//! Per-target runtime state machines guarding outbound calls. One
//! `ResilienceStack` instance owns all shared mutable state; it is passed
//! explicitly into the orchestrator, never reached through a global.

use std::time::Duration;

use crate::request::Vendor;

mod breaker;
mod config;
mod limiter;
mod negotiator;
mod retry;

pub use breaker::{AdmitDecision, CircuitBreaker, CircuitState};
pub use config::{ReliabilityConfig, ReliabilityConfigError};
pub use limiter::{estimate_tokens, RateLimiter, Reservation};
pub use negotiator::{tool_variants_for, ToolVariantNegotiator};
pub use retry::{classify, counts_toward_breaker, FailureClass, RetryPolicy};

/// Circuit breakers and the negotiator key on the (vendor, model) pair; the
/// rate limiter keys on the vendor alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub vendor: Vendor,
    pub model: String,
}

impl TargetKey {
    pub fn new(vendor: Vendor, model: impl Into<String>) -> Self {
        Self {
            vendor,
            model: model.into(),
        }
    }
}

pub struct ResilienceStack {
    pub breaker: CircuitBreaker,
    pub limiter: RateLimiter,
    pub retry: RetryPolicy,
    pub negotiator: ToolVariantNegotiator,
    config: ReliabilityConfig,
}

impl ResilienceStack {
    pub fn new(config: ReliabilityConfig) -> Result<Self, ReliabilityConfigError> {
        config.validate()?;
        Ok(Self {
            breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                Duration::from_secs(config.breaker_hold_min_seconds),
                Duration::from_secs(config.breaker_hold_max_seconds),
            ),
            limiter: RateLimiter::new(config.clone()),
            retry: RetryPolicy {
                max_attempts: config.retry_max_attempts,
                base_backoff_ms: config.retry_base_backoff_ms,
                max_consecutive_rate_limited: config.max_consecutive_rate_limited,
            },
            negotiator: ToolVariantNegotiator::new(config.negotiator_ttl()),
            config,
        })
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }
}
