use std::env;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::request::{Message, Role};

use super::{
    AdapterError, AdapterFuture, AdapterRequest, AdapterResponse, SearchChunk, SearchEvidence,
    SearchSupport, TokenUsage, VendorAdapter, VendorEvidence, build_http_client,
    map_transport_error, retry_after_seconds,
};

const DEFAULT_GENERATE_URL_TEMPLATE: &str =
    "https://aiplatform.googleapis.com/v1/models/{model}:generateContent";

const UNSUPPORTED_TOOL_CODE: &str = "unsupported_tool";

#[derive(Debug, Clone)]
pub struct SearchAdapterConfig {
    /// URL template with a `{model}` placeholder.
    pub generate_url_template: String,
    pub api_key: String,
}

impl SearchAdapterConfig {
    pub fn from_env() -> Result<Self, SearchAdapterConfigError> {
        let api_key = env::var("VERTEX_API_KEY")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(SearchAdapterConfigError::MissingVar("VERTEX_API_KEY"))?;
        let generate_url_template = env::var("VERTEX_GENERATE_URL_TEMPLATE")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_GENERATE_URL_TEMPLATE.to_string());
        if !generate_url_template.contains("{model}") {
            return Err(SearchAdapterConfigError::InvalidConfiguration(
                "VERTEX_GENERATE_URL_TEMPLATE must contain a {model} placeholder",
            ));
        }
        Ok(Self {
            generate_url_template,
            api_key,
        })
    }
}

#[derive(Debug, Error)]
pub enum SearchAdapterConfigError {
    #[error("missing required env var {0}")]
    MissingVar(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Search-grounded generation backend. Grounding tools and strict structured
/// output are mutually exclusive within one call here; the orchestrator's
/// two-phase protocol works around that, so this adapter simply refuses to
/// send both at once.
#[derive(Clone)]
pub struct SearchAdapter {
    config: SearchAdapterConfig,
}

impl SearchAdapter {
    pub fn new(config: SearchAdapterConfig) -> Self {
        Self { config }
    }

    async fn send(&self, request: &AdapterRequest) -> Result<AdapterResponse, AdapterError> {
        if request.grounding.is_some() && request.response_schema.is_some() {
            return Err(AdapterError::InvalidPayload(
                "grounding tools and response schema cannot share one call".to_string(),
            ));
        }

        let client = build_http_client(request.timeout, request.proxy.as_ref())?;
        let url = self
            .config
            .generate_url_template
            .replace("{model}", &request.model);
        let body = request_body(request);

        let response = client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let retry_after = retry_after_seconds(response.headers());
        let body = response
            .text()
            .await
            .map_err(|_| AdapterError::InvalidPayload("response_body_read_failed".to_string()))?;

        if !status.is_success() {
            let code = parse_error_status(&body);
            if code == UNSUPPORTED_TOOL_CODE {
                let variant = request
                    .grounding
                    .as_ref()
                    .map(|attachment| attachment.tool_variant.to_string())
                    .unwrap_or_default();
                return Err(AdapterError::UnsupportedTool { variant });
            }
            return Err(AdapterError::Upstream {
                status: status.as_u16(),
                code,
                retry_after_seconds: retry_after,
            });
        }

        let parsed: GenerateWireResponse = serde_json::from_str(&body)
            .map_err(|_| AdapterError::InvalidPayload("response_json_parse_failed".to_string()))?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::InvalidPayload("missing_candidate".to_string()))?;

        let content = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let grounding = candidate.grounding_metadata.unwrap_or_default();
        let tool_call_count = grounding.web_search_queries.len() as u32;
        let evidence = SearchEvidence {
            chunks: grounding
                .grounding_chunks
                .into_iter()
                .filter_map(|chunk| {
                    chunk.web.map(|web| SearchChunk {
                        uri: web.uri,
                        title: web.title,
                    })
                })
                .collect(),
            supports: grounding
                .grounding_supports
                .into_iter()
                .map(|support| SearchSupport {
                    chunk_indices: support.grounding_chunk_indices,
                    segment_start: support
                        .segment
                        .as_ref()
                        .and_then(|segment| segment.start_index)
                        .unwrap_or(0),
                    segment_end: support
                        .segment
                        .as_ref()
                        .and_then(|segment| segment.end_index)
                        .unwrap_or(0),
                })
                .collect(),
        };

        Ok(AdapterResponse {
            content,
            evidence: Some(VendorEvidence::SearchGrounded(evidence)),
            usage: parsed
                .usage_metadata
                .map(|usage| TokenUsage {
                    input_tokens: usage.prompt_token_count.unwrap_or(0),
                    output_tokens: usage.candidates_token_count.unwrap_or(0),
                })
                .unwrap_or_default(),
            finish_reason: candidate.finish_reason.unwrap_or_else(|| "STOP".to_string()),
            tool_call_count,
        })
    }
}

impl VendorAdapter for SearchAdapter {
    fn invoke<'a>(&'a self, request: AdapterRequest) -> AdapterFuture<'a> {
        Box::pin(async move { self.send(&request).await })
    }
}

fn request_body(request: &AdapterRequest) -> Value {
    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();
    for message in &request.messages {
        match message.role {
            Role::System => system_parts.push(json!({ "text": message.content })),
            Role::User => contents.push(json!({
                "role": "user",
                "parts": [{ "text": message.content }],
            })),
            Role::Assistant => contents.push(json!({
                "role": "model",
                "parts": [{ "text": message.content }],
            })),
        }
    }

    let mut generation_config = json!({
        "maxOutputTokens": request.max_output_tokens,
        "temperature": 0,
    });
    if let Some(schema) = &request.response_schema {
        generation_config["responseMimeType"] = json!("application/json");
        generation_config["responseSchema"] = schema.clone();
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": generation_config,
    });
    if !system_parts.is_empty() {
        body["systemInstruction"] = json!({ "parts": system_parts });
    }
    if let Some(attachment) = &request.grounding {
        let mut tool = serde_json::Map::new();
        tool.insert(attachment.tool_variant.to_string(), json!({}));
        body["tools"] = Value::Array(vec![Value::Object(tool)]);
    }
    body
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateWireResponse {
    candidates: Vec<WireCandidate>,
    usage_metadata: Option<WireUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    content: Option<WireContent>,
    finish_reason: Option<String>,
    grounding_metadata: Option<WireGroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
struct WirePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireGroundingMetadata {
    #[serde(default)]
    web_search_queries: Vec<String>,
    #[serde(default)]
    grounding_chunks: Vec<WireGroundingChunk>,
    #[serde(default)]
    grounding_supports: Vec<WireGroundingSupport>,
}

#[derive(Debug, Deserialize)]
struct WireGroundingChunk {
    web: Option<WireWebSource>,
}

#[derive(Debug, Deserialize)]
struct WireWebSource {
    uri: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGroundingSupport {
    #[serde(default)]
    grounding_chunk_indices: Vec<usize>,
    segment: Option<WireSegment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSegment {
    start_index: Option<u32>,
    end_index: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

fn parse_error_status(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: Option<ErrorDetails>,
    }

    #[derive(Deserialize)]
    struct ErrorDetails {
        status: Option<String>,
        code: Option<Value>,
    }

    let parsed = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);
    let Some(details) = parsed else {
        return "unknown".to_string();
    };
    if let Some(status) = details.status
        && !status.is_empty()
    {
        return status;
    }
    match details.code {
        Some(Value::String(code)) => code,
        Some(Value::Number(code)) => code.to_string(),
        _ => "unknown".to_string(),
    }
}
