use std::collections::{HashMap, HashSet};
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::citations::RedirectBudget;
use crate::reliability::{ReliabilityConfig, ReliabilityConfigError};
use crate::request::Vendor;
use crate::vantage::VantageConfig;

const DEFAULT_UNGROUNDED_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_GROUNDED_TIMEOUT_MS: u64 = 120_000;

const DEFAULT_OPENAI_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "o4-mini"];
const DEFAULT_VERTEX_MODELS: &[&str] =
    &["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.0-flash"];

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub allowed_models: HashMap<Vendor, Vec<String>>,
    pub reliability: ReliabilityConfig,
    pub vantage: VantageConfig,
    /// Vendors allowed to satisfy `REQUIRED` grounding with unlinked
    /// evidence. Off by default; only meaningful for the search backend.
    pub allow_unlinked_evidence: HashSet<Vendor>,
    pub ungrounded_timeout_ms: u64,
    pub grounded_timeout_ms: u64,
    pub redirect_budget: RedirectBudget,
    pub authority_overrides: HashMap<String, u8>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            allowed_models: HashMap::from([
                (
                    Vendor::OpenAi,
                    DEFAULT_OPENAI_MODELS.iter().map(|m| m.to_string()).collect(),
                ),
                (
                    Vendor::Vertex,
                    DEFAULT_VERTEX_MODELS.iter().map(|m| m.to_string()).collect(),
                ),
            ]),
            reliability: ReliabilityConfig::default(),
            vantage: VantageConfig::default(),
            allow_unlinked_evidence: HashSet::new(),
            ungrounded_timeout_ms: DEFAULT_UNGROUNDED_TIMEOUT_MS,
            grounded_timeout_ms: DEFAULT_GROUNDED_TIMEOUT_MS,
            redirect_budget: RedirectBudget::default(),
            authority_overrides: HashMap::new(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, GatewayConfigError> {
        let mut config = Self::default();
        config.reliability = ReliabilityConfig::from_env()?;

        if let Some(models) = csv_env("GATEWAY_ALLOWED_MODELS_OPENAI") {
            config.allowed_models.insert(Vendor::OpenAi, models);
        }
        if let Some(models) = csv_env("GATEWAY_ALLOWED_MODELS_VERTEX") {
            config.allowed_models.insert(Vendor::Vertex, models);
        }
        if let Some(template) = optional_trimmed_env("GATEWAY_PROXY_URI_TEMPLATE") {
            config.vantage.proxy_uri_template = Some(template);
        }
        if bool_env("GATEWAY_ALLOW_UNLINKED_EVIDENCE_VERTEX") {
            config.allow_unlinked_evidence.insert(Vendor::Vertex);
        }
        config.ungrounded_timeout_ms = parse_u64_env(
            "GATEWAY_UNGROUNDED_TIMEOUT_MS",
            config.ungrounded_timeout_ms,
        )?;
        config.grounded_timeout_ms =
            parse_u64_env("GATEWAY_GROUNDED_TIMEOUT_MS", config.grounded_timeout_ms)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GatewayConfigError> {
        self.reliability.validate()?;
        if self.ungrounded_timeout_ms == 0 || self.grounded_timeout_ms == 0 {
            return Err(GatewayConfigError::InvalidConfiguration(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        if self.allowed_models.values().any(|models| models.is_empty()) {
            return Err(GatewayConfigError::InvalidConfiguration(
                "per-vendor allowlists must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout_for(&self, grounded: bool) -> Duration {
        if grounded {
            Duration::from_millis(self.grounded_timeout_ms)
        } else {
            Duration::from_millis(self.ungrounded_timeout_ms)
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayConfigError {
    #[error(transparent)]
    Reliability(#[from] ReliabilityConfigError),
    #[error("invalid integer in env var {key}: {value}")]
    ParseInt { key: String, value: String },
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

fn csv_env(key: &str) -> Option<Vec<String>> {
    optional_trimmed_env(key).map(|raw| {
        raw.split(',')
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect()
    })
}

fn bool_env(key: &str) -> bool {
    optional_trimmed_env(key)
        .map(|raw| matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn parse_u64_env(key: &str, default: u64) -> Result<u64, GatewayConfigError> {
    match optional_trimmed_env(key) {
        Some(value) => value
            .parse::<u64>()
            .map_err(|_| GatewayConfigError::ParseInt {
                key: key.to_string(),
                value,
            }),
        None => Ok(default),
    }
}
