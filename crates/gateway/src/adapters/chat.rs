use std::env;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::request::Message;

use super::{
    AdapterError, AdapterFuture, AdapterRequest, AdapterResponse, ChatAnnotation, ChatEvidence,
    TokenUsage, VendorAdapter, VendorEvidence, build_http_client, map_transport_error,
    retry_after_seconds,
};

const DEFAULT_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Error code the backend uses for a tool identifier the model cannot carry.
const UNSUPPORTED_TOOL_CODE: &str = "unsupported_tool";

#[derive(Debug, Clone)]
pub struct ChatAdapterConfig {
    pub completions_url: String,
    pub api_key: String,
}

impl ChatAdapterConfig {
    pub fn from_env() -> Result<Self, ChatAdapterConfigError> {
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ChatAdapterConfigError::MissingVar("OPENAI_API_KEY"))?;
        let completions_url = env::var("OPENAI_CHAT_COMPLETIONS_URL")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_CHAT_COMPLETIONS_URL.to_string());
        if !completions_url.starts_with("http://") && !completions_url.starts_with("https://") {
            return Err(ChatAdapterConfigError::InvalidConfiguration(
                "OPENAI_CHAT_COMPLETIONS_URL must start with http:// or https://",
            ));
        }
        Ok(Self {
            completions_url,
            api_key,
        })
    }
}

#[derive(Debug, Error)]
pub enum ChatAdapterConfigError {
    #[error("missing required env var {0}")]
    MissingVar(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Tool-calling chat backend. Translates the uniform request into the chat
/// completions shape and lifts URL annotations into span-anchored evidence.
#[derive(Clone)]
pub struct ChatAdapter {
    config: ChatAdapterConfig,
}

impl ChatAdapter {
    pub fn new(config: ChatAdapterConfig) -> Self {
        Self { config }
    }

    async fn send(&self, request: &AdapterRequest) -> Result<AdapterResponse, AdapterError> {
        let client = build_http_client(request.timeout, request.proxy.as_ref())?;
        let body = request_body(request);

        let response = client
            .post(&self.config.completions_url)
            .bearer_auth(&self.config.api_key)
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
            let code = parse_error_code(&body);
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

        let parsed: ChatWireResponse = serde_json::from_str(&body)
            .map_err(|_| AdapterError::InvalidPayload("response_json_parse_failed".to_string()))?;

        if let Some(served_model) = parsed.model.as_deref()
            && !served_model.starts_with(&request.model)
        {
            return Err(AdapterError::InvalidPayload(format!(
                "model_substituted: requested {} served {served_model}",
                request.model
            )));
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::InvalidPayload("missing_choice".to_string()))?;

        let content = match choice.message.content {
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let annotations = choice
            .message
            .annotations
            .unwrap_or_default()
            .into_iter()
            .filter_map(wire_annotation)
            .collect::<Vec<_>>();

        let tool_call_count = choice
            .message
            .tool_calls
            .map(|calls| calls.len() as u32)
            .unwrap_or(0);

        Ok(AdapterResponse {
            content,
            evidence: Some(VendorEvidence::Chat(ChatEvidence { annotations })),
            usage: parsed
                .usage
                .map(|usage| TokenUsage {
                    input_tokens: usage.prompt_tokens.unwrap_or(0),
                    output_tokens: usage.completion_tokens.unwrap_or(0),
                })
                .unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            tool_call_count,
        })
    }
}

impl VendorAdapter for ChatAdapter {
    fn invoke<'a>(&'a self, request: AdapterRequest) -> AdapterFuture<'a> {
        Box::pin(async move { self.send(&request).await })
    }
}

fn request_body(request: &AdapterRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|message: &Message| {
            json!({
                "role": message.role.as_str(),
                "content": message.content,
            })
        })
        .collect();

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "max_tokens": request.max_output_tokens,
        "temperature": 0,
    });

    if let Some(attachment) = &request.grounding {
        body["tools"] = json!([{ "type": attachment.tool_variant }]);
    }
    if let Some(schema) = &request.response_schema {
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": { "name": "response", "schema": schema },
        });
    }
    body
}

fn wire_annotation(raw: WireAnnotation) -> Option<ChatAnnotation> {
    let citation = raw.url_citation?;
    Some(ChatAnnotation {
        url: citation.url,
        title: citation.title,
        start_index: citation.start_index.unwrap_or(0),
        end_index: citation.end_index.unwrap_or(0),
    })
}

#[derive(Debug, Deserialize)]
struct ChatWireResponse {
    model: Option<String>,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<Value>,
    annotations: Option<Vec<WireAnnotation>>,
    tool_calls: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct WireAnnotation {
    url_citation: Option<WireUrlCitation>,
}

#[derive(Debug, Deserialize)]
struct WireUrlCitation {
    url: String,
    title: Option<String>,
    start_index: Option<u32>,
    end_index: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

fn parse_error_code(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: Option<ErrorDetails>,
    }

    #[derive(Deserialize)]
    struct ErrorDetails {
        code: Option<Value>,
    }

    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    match parsed.and_then(|envelope| envelope.error).and_then(|details| details.code) {
        Some(Value::String(code)) => code,
        Some(Value::Number(code)) => code.to_string(),
        _ => "unknown".to_string(),
    }
}
