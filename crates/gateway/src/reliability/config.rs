use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::request::Vendor;

const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;
const DEFAULT_OPENAI_TOKENS_PER_MINUTE: u64 = 90_000;
const DEFAULT_VERTEX_TOKENS_PER_MINUTE: u64 = 120_000;
const DEFAULT_HEADROOM_FRACTION: f64 = 0.15;
const DEFAULT_GROUNDED_OVERHEAD_MULTIPLIER: f64 = 1.15;
const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_BREAKER_HOLD_MIN_SECONDS: u64 = 30;
const DEFAULT_BREAKER_HOLD_MAX_SECONDS: u64 = 90;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 4;
const DEFAULT_RETRY_BASE_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_CONSECUTIVE_RATE_LIMITED: u32 = 3;
const DEFAULT_NEGOTIATOR_TTL_SECONDS: u64 = 900;

#[derive(Debug, Clone)]
pub struct ReliabilityConfig {
    pub rate_limit_window_seconds: u64,
    pub tokens_per_minute: HashMap<Vendor, u64>,
    pub headroom_fraction: f64,
    pub grounded_overhead_multiplier: f64,
    pub breaker_failure_threshold: u32,
    pub breaker_hold_min_seconds: u64,
    pub breaker_hold_max_seconds: u64,
    pub retry_max_attempts: u32,
    pub retry_base_backoff_ms: u64,
    pub max_consecutive_rate_limited: u32,
    pub negotiator_ttl_seconds: u64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            rate_limit_window_seconds: DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
            tokens_per_minute: HashMap::from([
                (Vendor::OpenAi, DEFAULT_OPENAI_TOKENS_PER_MINUTE),
                (Vendor::Vertex, DEFAULT_VERTEX_TOKENS_PER_MINUTE),
            ]),
            headroom_fraction: DEFAULT_HEADROOM_FRACTION,
            grounded_overhead_multiplier: DEFAULT_GROUNDED_OVERHEAD_MULTIPLIER,
            breaker_failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            breaker_hold_min_seconds: DEFAULT_BREAKER_HOLD_MIN_SECONDS,
            breaker_hold_max_seconds: DEFAULT_BREAKER_HOLD_MAX_SECONDS,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_base_backoff_ms: DEFAULT_RETRY_BASE_BACKOFF_MS,
            max_consecutive_rate_limited: DEFAULT_MAX_CONSECUTIVE_RATE_LIMITED,
            negotiator_ttl_seconds: DEFAULT_NEGOTIATOR_TTL_SECONDS,
        }
    }
}

impl ReliabilityConfig {
    pub fn from_env() -> Result<Self, ReliabilityConfigError> {
        let mut config = Self::default();
        config.rate_limit_window_seconds = parse_u64_env(
            "GATEWAY_RATE_LIMIT_WINDOW_SECONDS",
            config.rate_limit_window_seconds,
        )?;
        if let Some(budget) = parse_optional_u64_env("GATEWAY_TOKEN_BUDGET_OPENAI")? {
            config.tokens_per_minute.insert(Vendor::OpenAi, budget);
        }
        if let Some(budget) = parse_optional_u64_env("GATEWAY_TOKEN_BUDGET_VERTEX")? {
            config.tokens_per_minute.insert(Vendor::Vertex, budget);
        }
        config.headroom_fraction =
            parse_f64_env("GATEWAY_RATE_LIMIT_HEADROOM", config.headroom_fraction)?;
        config.grounded_overhead_multiplier = parse_f64_env(
            "GATEWAY_GROUNDED_OVERHEAD_MULTIPLIER",
            config.grounded_overhead_multiplier,
        )?;
        config.breaker_failure_threshold = parse_u32_env(
            "GATEWAY_BREAKER_FAILURE_THRESHOLD",
            config.breaker_failure_threshold,
        )?;
        config.breaker_hold_min_seconds = parse_u64_env(
            "GATEWAY_BREAKER_HOLD_MIN_SECONDS",
            config.breaker_hold_min_seconds,
        )?;
        config.breaker_hold_max_seconds = parse_u64_env(
            "GATEWAY_BREAKER_HOLD_MAX_SECONDS",
            config.breaker_hold_max_seconds,
        )?;
        config.retry_max_attempts =
            parse_u32_env("GATEWAY_RETRY_MAX_ATTEMPTS", config.retry_max_attempts)?;
        config.retry_base_backoff_ms = parse_u64_env(
            "GATEWAY_RETRY_BASE_BACKOFF_MS",
            config.retry_base_backoff_ms,
        )?;
        config.max_consecutive_rate_limited = parse_u32_env(
            "GATEWAY_MAX_CONSECUTIVE_RATE_LIMITED",
            config.max_consecutive_rate_limited,
        )?;
        config.negotiator_ttl_seconds = parse_u64_env(
            "GATEWAY_NEGOTIATOR_TTL_SECONDS",
            config.negotiator_ttl_seconds,
        )?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReliabilityConfigError> {
        if self.rate_limit_window_seconds == 0 {
            return Err(ReliabilityConfigError::InvalidConfiguration(
                "GATEWAY_RATE_LIMIT_WINDOW_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.tokens_per_minute.values().any(|&budget| budget == 0) {
            return Err(ReliabilityConfigError::InvalidConfiguration(
                "per-vendor token budgets must be greater than 0".to_string(),
            ));
        }
        if !self.headroom_fraction.is_finite()
            || self.headroom_fraction < 0.0
            || self.headroom_fraction >= 1.0
        {
            return Err(ReliabilityConfigError::InvalidConfiguration(
                "GATEWAY_RATE_LIMIT_HEADROOM must be in [0, 1)".to_string(),
            ));
        }
        if !self.grounded_overhead_multiplier.is_finite() || self.grounded_overhead_multiplier < 1.0
        {
            return Err(ReliabilityConfigError::InvalidConfiguration(
                "GATEWAY_GROUNDED_OVERHEAD_MULTIPLIER must be at least 1.0".to_string(),
            ));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(ReliabilityConfigError::InvalidConfiguration(
                "GATEWAY_BREAKER_FAILURE_THRESHOLD must be greater than 0".to_string(),
            ));
        }
        if self.breaker_hold_min_seconds == 0
            || self.breaker_hold_max_seconds < self.breaker_hold_min_seconds
        {
            return Err(ReliabilityConfigError::InvalidConfiguration(
                "breaker hold range must be non-empty and start above 0".to_string(),
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err(ReliabilityConfigError::InvalidConfiguration(
                "GATEWAY_RETRY_MAX_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if self.max_consecutive_rate_limited == 0 {
            return Err(ReliabilityConfigError::InvalidConfiguration(
                "GATEWAY_MAX_CONSECUTIVE_RATE_LIMITED must be greater than 0".to_string(),
            ));
        }
        if self.negotiator_ttl_seconds == 0 {
            return Err(ReliabilityConfigError::InvalidConfiguration(
                "GATEWAY_NEGOTIATOR_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_seconds)
    }

    pub fn negotiator_ttl(&self) -> Duration {
        Duration::from_secs(self.negotiator_ttl_seconds)
    }

    pub fn budget_for(&self, vendor: Vendor) -> u64 {
        self.tokens_per_minute
            .get(&vendor)
            .copied()
            .unwrap_or(DEFAULT_OPENAI_TOKENS_PER_MINUTE)
    }

    /// Budget after the safety headroom fraction is shaved off.
    pub fn effective_budget_for(&self, vendor: Vendor) -> u64 {
        let raw = self.budget_for(vendor) as f64;
        (raw * (1.0 - self.headroom_fraction)).floor() as u64
    }
}

#[derive(Debug, Error)]
pub enum ReliabilityConfigError {
    #[error("invalid integer in env var {key}: {value}")]
    ParseInt { key: String, value: String },
    #[error("invalid float in env var {key}: {value}")]
    ParseFloat { key: String, value: String },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

fn optional_trimmed_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_u64_env(key: &str, default: u64) -> Result<u64, ReliabilityConfigError> {
    Ok(parse_optional_u64_env(key)?.unwrap_or(default))
}

fn parse_optional_u64_env(key: &str) -> Result<Option<u64>, ReliabilityConfigError> {
    match optional_trimmed_env(key) {
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ReliabilityConfigError::ParseInt {
                key: key.to_string(),
                value,
            }),
        None => Ok(None),
    }
}

fn parse_u32_env(key: &str, default: u32) -> Result<u32, ReliabilityConfigError> {
    match optional_trimmed_env(key) {
        Some(value) => value
            .parse::<u32>()
            .map_err(|_| ReliabilityConfigError::ParseInt {
                key: key.to_string(),
                value,
            }),
        None => Ok(default),
    }
}

fn parse_f64_env(key: &str, default: f64) -> Result<f64, ReliabilityConfigError> {
    match optional_trimmed_env(key) {
        Some(value) => value
            .parse::<f64>()
            .map_err(|_| ReliabilityConfigError::ParseFloat {
                key: key.to_string(),
                value,
            }),
        None => Ok(default),
    }
}
