use thiserror::Error;

use crate::adapters::AdapterError;
use crate::als::AlsError;
use crate::resolver::ResolveError;
use crate::vantage::VantageError;

/// Terminal error surfaced to the caller. Every variant maps to a stable
/// `error_class` string on the telemetry record so downstream consumers can
/// distinguish policy rejections from upstream failures from caller mistakes.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Als(#[from] AlsError),

    #[error(transparent)]
    Vantage(#[from] VantageError),

    #[error("service unavailable upstream: circuit open for {vendor}/{model}")]
    CircuitOpen { vendor: &'static str, model: String },

    #[error("upstream retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("upstream request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("upstream quota exhausted for {vendor} after {consecutive} rate-limit responses")]
    QuotaExhausted {
        vendor: &'static str,
        consecutive: u32,
    },

    #[error("grounding is not supported for {vendor}/{model}")]
    GroundingNotSupported { vendor: &'static str, model: String },

    #[error("required grounding missing: {why}")]
    RequiredGroundingMissing { why: &'static str },

    #[error("reshape phase reported tool use")]
    Phase2ToolUse,

    #[error("reshape phase output is not valid JSON")]
    Phase2NotJson,

    #[error("upstream provider failure: {0}")]
    ProviderFailure(String),

    #[error("upstream returned an invalid payload: {0}")]
    InvalidProviderPayload(String),
}

impl GatewayError {
    /// Stable class string recorded on telemetry.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Resolve(ResolveError::ModelNotAllowed { .. }) => "model_not_allowed",
            Self::Resolve(ResolveError::UnknownVendor { .. }) => "unknown_vendor",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Als(AlsError::BlockTooLong { .. }) => "als_block_too_long",
            Self::Als(AlsError::UnsupportedCountry { .. }) => "als_unsupported_country",
            Self::Vantage(_) => "invalid_request",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Timeout { .. } => "timeout",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::GroundingNotSupported { .. } => "grounding_not_supported",
            Self::RequiredGroundingMissing { .. } => "required_grounding_missing",
            Self::Phase2ToolUse => "phase2_tool_use",
            Self::Phase2NotJson => "phase2_not_json",
            Self::ProviderFailure(_) => "provider_failure",
            Self::InvalidProviderPayload(_) => "invalid_provider_payload",
        }
    }

    /// Caller input errors never count against circuit breakers.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Resolve(_) | Self::InvalidRequest(_) | Self::Als(_) | Self::Vantage(_)
        )
    }

    pub(crate) fn from_terminal_adapter_error(error: AdapterError) -> Self {
        match error {
            AdapterError::InvalidPayload(detail) => Self::InvalidProviderPayload(detail),
            other => Self::ProviderFailure(other.to_string()),
        }
    }
}
