use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::citations::{AuthorityScore, Citation};
use crate::telemetry::RunTelemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    OpenAi,
    Vertex,
}

impl Vendor {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Vertex => "vertex",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "vertex" | "google" | "gemini" => Some(Self::Vertex),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroundingMode {
    None,
    Auto,
    Required,
}

impl GroundingMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Auto => "AUTO",
            Self::Required => "REQUIRED",
        }
    }

    pub const fn attaches_tools(self) -> bool {
        !matches!(self, Self::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VantagePolicy {
    None,
    AlsOnly,
    ProxyOnly,
    AlsPlusProxy,
}

impl VantagePolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::AlsOnly => "ALS_ONLY",
            Self::ProxyOnly => "PROXY_ONLY",
            Self::AlsPlusProxy => "ALS_PLUS_PROXY",
        }
    }

    pub const fn wants_als(self) -> bool {
        matches!(self, Self::AlsOnly | Self::AlsPlusProxy)
    }

    pub const fn wants_proxy(self) -> bool {
        matches!(self, Self::ProxyOnly | Self::AlsPlusProxy)
    }
}

/// One inbound generation request. Immutable once accepted: enrichment
/// (ALS insertion) always produces a new message list.
#[derive(Debug, Clone)]
pub struct Request {
    pub vendor: Option<Vendor>,
    pub model: String,
    pub messages: Vec<Message>,
    pub grounded: bool,
    pub grounding_mode: Option<GroundingMode>,
    pub vantage_policy: VantagePolicy,
    pub country: Option<String>,
    pub options: Map<String, Value>,
}

impl Request {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            vendor: None,
            model: model.into(),
            messages,
            grounded: false,
            grounding_mode: None,
            vantage_policy: VantagePolicy::None,
            country: None,
            options: Map::new(),
        }
    }

    pub fn with_vendor(mut self, vendor: Vendor) -> Self {
        self.vendor = Some(vendor);
        self
    }

    pub fn with_grounding(mut self, mode: GroundingMode) -> Self {
        self.grounded = mode.attaches_tools();
        self.grounding_mode = Some(mode);
        self
    }

    pub fn with_vantage(mut self, policy: VantagePolicy, country: impl Into<String>) -> Self {
        self.vantage_policy = policy;
        self.country = Some(country.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// The grounded flag alone means AUTO; an explicit mode always wins.
    pub fn effective_grounding_mode(&self) -> GroundingMode {
        match self.grounding_mode {
            Some(mode) => mode,
            None if self.grounded => GroundingMode::Auto,
            None => GroundingMode::None,
        }
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.options
            .get("max_output_tokens")
            .and_then(Value::as_u64)
            .map(|value| value.min(u64::from(u32::MAX)) as u32)
            .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS)
    }

    pub fn response_schema(&self) -> Option<&Value> {
        self.options.get("response_schema").filter(|value| value.is_object())
    }
}

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub content: String,
    pub citations: Vec<Citation>,
    pub authority: AuthorityScore,
    pub telemetry: RunTelemetry,
}
