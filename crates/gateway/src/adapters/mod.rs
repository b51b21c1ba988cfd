//! Uniform outbound contract plus the two wire translations. Adapters only
//! translate shapes: retries, budgets, and grounding gates all live above
//! them in the orchestrator.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::request::Message;
use crate::vantage::ProxyEndpoint;

mod chat;
mod search;

pub use chat::{ChatAdapter, ChatAdapterConfig, ChatAdapterConfigError};
pub use search::{SearchAdapter, SearchAdapterConfig, SearchAdapterConfigError};

pub type AdapterFuture<'a> =
    Pin<Box<dyn Future<Output = Result<AdapterResponse, AdapterError>> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct GroundingAttachment {
    pub tool_variant: &'static str,
}

#[derive(Debug, Clone)]
pub struct AdapterRequest {
    /// The resolved, pinned model id. Adapters send it verbatim and treat a
    /// served-model mismatch as a hard failure, never a substitution.
    pub model: String,
    pub messages: Vec<Message>,
    pub grounding: Option<GroundingAttachment>,
    pub response_schema: Option<Value>,
    pub max_output_tokens: u32,
    pub timeout: Duration,
    pub proxy: Option<ProxyEndpoint>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

/// Raw evidence structures, tagged by vendor shape. Normalization consumes
/// the tag rather than probing fields.
#[derive(Debug, Clone)]
pub enum VendorEvidence {
    Chat(ChatEvidence),
    SearchGrounded(SearchEvidence),
}

/// Span-anchored URL annotations straight from the chat backend.
#[derive(Debug, Clone, Default)]
pub struct ChatEvidence {
    pub annotations: Vec<ChatAnnotation>,
}

#[derive(Debug, Clone)]
pub struct ChatAnnotation {
    pub url: String,
    pub title: Option<String>,
    pub start_index: u32,
    pub end_index: u32,
}

/// Flat chunk list with an optional supports array cross-referencing text
/// spans to chunk indices. Supports absent but chunks present means every
/// extracted citation is unlinked.
#[derive(Debug, Clone, Default)]
pub struct SearchEvidence {
    pub chunks: Vec<SearchChunk>,
    pub supports: Vec<SearchSupport>,
}

#[derive(Debug, Clone)]
pub struct SearchChunk {
    pub uri: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchSupport {
    pub chunk_indices: Vec<usize>,
    pub segment_start: u32,
    pub segment_end: u32,
}

#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub content: String,
    pub evidence: Option<VendorEvidence>,
    pub usage: TokenUsage,
    pub finish_reason: String,
    pub tool_call_count: u32,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("upstream status {status} code {code}")]
    Upstream {
        status: u16,
        code: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("tool variant {variant} is not supported by this model")]
    UnsupportedTool { variant: String },

    #[error("invalid upstream payload: {0}")]
    InvalidPayload(String),
}

impl AdapterError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Upstream {
                retry_after_seconds: Some(seconds),
                ..
            } => Some(Duration::from_secs(*seconds)),
            _ => None,
        }
    }
}

pub trait VendorAdapter: Send + Sync {
    fn invoke<'a>(&'a self, request: AdapterRequest) -> AdapterFuture<'a>;
}

/// Shared client construction: per-request timeout, optional country-targeted
/// proxy egress.
pub(crate) fn build_http_client(
    timeout: Duration,
    proxy: Option<&ProxyEndpoint>,
) -> Result<reqwest::Client, AdapterError> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(endpoint) = proxy {
        let proxy = reqwest::Proxy::all(&endpoint.uri)
            .map_err(|err| AdapterError::Connect(format!("invalid proxy endpoint: {err}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|err| AdapterError::Connect(format!("http client build failed: {err}")))
}

pub(crate) fn map_transport_error(err: reqwest::Error) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout
    } else {
        AdapterError::Connect(err.to_string())
    }
}

pub(crate) fn retry_after_seconds(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}
