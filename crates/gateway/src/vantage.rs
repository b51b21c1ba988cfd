//! Vantage policy resolution: maps the four ALS/proxy combinations onto
//! concrete egress parameters, and degrades proxy egress to ALS-only when the
//! proxy itself is failing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use crate::request::VantagePolicy;

const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("UK", "GB"),
    ("USA", "US"),
    ("UAE", "AE"),
    ("DEU", "DE"),
    ("FRA", "FR"),
    ("ITA", "IT"),
    ("CHE", "CH"),
    ("SGP", "SG"),
];

#[derive(Debug, Clone)]
pub struct VantageConfig {
    /// URI template with a `{country}` placeholder, lowercased on render.
    /// `None` disables proxy egress entirely.
    pub proxy_uri_template: Option<String>,
    pub proxy_failure_threshold: u32,
    pub proxy_failure_window_seconds: u64,
}

impl Default for VantageConfig {
    fn default() -> Self {
        Self {
            proxy_uri_template: None,
            proxy_failure_threshold: 3,
            proxy_failure_window_seconds: 60,
        }
    }
}

impl VantageConfig {
    fn failure_window(&self) -> Duration {
        Duration::from_secs(self.proxy_failure_window_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub uri: String,
    pub country: String,
}

/// Concrete egress decision for one request.
#[derive(Debug, Clone)]
pub struct Egress {
    pub proxy: Option<ProxyEndpoint>,
    pub use_als: bool,
    /// True when a proxy policy was degraded to ALS-only. Never silent: the
    /// orchestrator copies this onto telemetry.
    pub downgraded: bool,
}

#[derive(Debug, Error)]
pub enum VantageError {
    #[error("vantage policy {policy} requires a country code")]
    CountryRequired { policy: &'static str },

    #[error("country code {raw} is not a recognized two-letter code")]
    InvalidCountry { raw: String },

    #[error("proxy egress requested but no proxy endpoint is configured")]
    ProxyNotConfigured,
}

/// Canonical ISO-3166 alpha-2 form. Aliases map before validation.
pub fn canonical_country(raw: &str) -> Result<String, VantageError> {
    let upper = raw.trim().to_ascii_uppercase();
    let mapped = COUNTRY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == upper)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or(upper);

    if mapped.len() == 2 && mapped.bytes().all(|byte| byte.is_ascii_uppercase()) {
        Ok(mapped)
    } else {
        Err(VantageError::InvalidCountry {
            raw: raw.to_string(),
        })
    }
}

#[derive(Debug)]
struct FailureWindow {
    started_at: Instant,
    failures: u32,
}

pub struct VantageRouter {
    config: VantageConfig,
    failures: Mutex<HashMap<String, FailureWindow>>,
}

impl VantageRouter {
    pub fn new(config: VantageConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve_egress(
        &self,
        policy: VantagePolicy,
        country: Option<&str>,
    ) -> Result<Egress, VantageError> {
        if policy == VantagePolicy::None {
            return Ok(Egress {
                proxy: None,
                use_als: false,
                downgraded: false,
            });
        }

        let country = country.ok_or(VantageError::CountryRequired {
            policy: policy.as_str(),
        })?;
        let country = canonical_country(country)?;

        let mut use_als = policy.wants_als();
        let mut proxy = None;
        let mut downgraded = false;

        if policy.wants_proxy() {
            if self.proxy_degraded(&country) {
                warn!(country = %country, "proxy degraded, downgrading vantage to ALS-only");
                use_als = true;
                downgraded = true;
            } else {
                let template = self
                    .config
                    .proxy_uri_template
                    .as_deref()
                    .ok_or(VantageError::ProxyNotConfigured)?;
                proxy = Some(ProxyEndpoint {
                    uri: template.replace("{country}", &country.to_ascii_lowercase()),
                    country: country.clone(),
                });
            }
        }

        Ok(Egress {
            proxy,
            use_als,
            downgraded,
        })
    }

    /// Called by the orchestrator on connection-class failures observed while
    /// a proxy was in use.
    pub fn record_proxy_failure(&self, country: &str) {
        let now = Instant::now();
        let mut failures = self.lock_failures();
        let window = failures
            .entry(country.to_string())
            .or_insert_with(|| FailureWindow {
                started_at: now,
                failures: 0,
            });
        if now.saturating_duration_since(window.started_at) >= self.config.failure_window() {
            window.started_at = now;
            window.failures = 0;
        }
        window.failures = window.failures.saturating_add(1);
    }

    fn proxy_degraded(&self, country: &str) -> bool {
        let now = Instant::now();
        let mut failures = self.lock_failures();
        match failures.get_mut(country) {
            Some(window) => {
                if now.saturating_duration_since(window.started_at) >= self.config.failure_window() {
                    failures.remove(country);
                    return false;
                }
                window.failures >= self.config.proxy_failure_threshold
            }
            None => false,
        }
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, HashMap<String, FailureWindow>> {
        match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
