use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use gateway::adapters::{
    AdapterError, AdapterFuture, AdapterRequest, AdapterResponse, ChatAnnotation, ChatEvidence,
    TokenUsage, VendorAdapter, VendorEvidence,
};
use gateway::citations::{RedirectResolver, ResolveFuture};
use gateway::config::GatewayConfig;
use gateway::error::GatewayError;
use gateway::orchestrator::Gateway;
use gateway::reliability::{ReliabilityConfig, ResilienceStack};
use gateway::request::{GroundingMode, Message, Request, Vendor};
use gateway::telemetry::{RunTelemetry, TelemetrySink};
use tokio::sync::Mutex;

#[derive(Clone)]
struct StubAdapter {
    responses: Arc<Mutex<VecDeque<Result<AdapterResponse, AdapterError>>>>,
    seen: Arc<Mutex<Vec<AdapterRequest>>>,
}

impl StubAdapter {
    fn with_responses(responses: Vec<Result<AdapterResponse, AdapterError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn calls(&self) -> usize {
        self.seen.lock().await.len()
    }

    async fn seen_requests(&self) -> Vec<AdapterRequest> {
        self.seen.lock().await.clone()
    }
}

impl VendorAdapter for StubAdapter {
    fn invoke<'a>(&'a self, request: AdapterRequest) -> AdapterFuture<'a> {
        Box::pin(async move {
            self.seen.lock().await.push(request);
            self.responses.lock().await.pop_front().unwrap_or_else(|| {
                Err(AdapterError::Connect("missing_stub_response".to_string()))
            })
        })
    }
}

struct NullRedirects;

impl RedirectResolver for NullRedirects {
    fn resolve<'a>(&'a self, _url: &'a str) -> ResolveFuture<'a> {
        Box::pin(async move { None })
    }
}

#[derive(Default)]
struct RecordingSink {
    records: std::sync::Mutex<Vec<RunTelemetry>>,
}

impl RecordingSink {
    fn last(&self) -> RunTelemetry {
        self.records
            .lock()
            .expect("sink lock")
            .last()
            .cloned()
            .expect("at least one record")
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&self, record: &RunTelemetry) {
        self.records.lock().expect("sink lock").push(record.clone());
    }
}

#[tokio::test]
async fn breaker_fails_fast_without_contacting_the_backend() {
    let failures = (0..3)
        .map(|_| {
            Err(AdapterError::Upstream {
                status: 503,
                code: "overloaded".to_string(),
                retry_after_seconds: None,
            })
        })
        .collect();
    let adapter = StubAdapter::with_responses(failures);
    let mut config = fast_config();
    config.reliability.breaker_failure_threshold = 3;
    config.reliability.retry_max_attempts = 3;
    let (gateway, sink) = gateway_for(Vendor::OpenAi, adapter.clone(), config);

    let err = gateway
        .execute(ungrounded_request())
        .await
        .expect_err("three transient failures exhaust retries");
    assert!(matches!(err, GatewayError::RetriesExhausted { .. }));
    assert_eq!(adapter.calls().await, 3);

    // The breaker opened on the third failure: the next run is rejected
    // before any network attempt.
    let err = gateway
        .execute(ungrounded_request())
        .await
        .expect_err("circuit must be open");
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    assert_eq!(adapter.calls().await, 3, "no further backend contact");
    assert_eq!(sink.last().circuit_state, "open");
    assert_eq!(sink.last().error_class, Some("circuit_open"));
}

#[tokio::test]
async fn caller_errors_do_not_trip_the_breaker() {
    let adapter = StubAdapter::with_responses(vec![Ok(plain_response())]);
    let mut config = fast_config();
    config.reliability.breaker_failure_threshold = 1;
    let (gateway, _sink) = gateway_for(Vendor::OpenAi, adapter.clone(), config);

    for _ in 0..3 {
        let err = gateway
            .execute(Request::new("gpt-nonexistent", vec![Message::user("hi")]))
            .await
            .expect_err("model is not allowlisted");
        assert!(matches!(err, GatewayError::Resolve(_)));
    }

    // The allowlisted model still goes straight through.
    gateway
        .execute(ungrounded_request())
        .await
        .expect("breaker untouched by caller errors");
    assert_eq!(adapter.calls().await, 1);
}

#[tokio::test]
async fn retries_transient_errors_then_succeeds() {
    let adapter = StubAdapter::with_responses(vec![
        Err(AdapterError::Timeout),
        Err(AdapterError::Upstream {
            status: 502,
            code: "bad_gateway".to_string(),
            retry_after_seconds: None,
        }),
        Ok(plain_response()),
    ]);
    let (gateway, sink) = gateway_for(Vendor::OpenAi, adapter.clone(), fast_config());

    let response = gateway
        .execute(ungrounded_request())
        .await
        .expect("third attempt succeeds");
    assert_eq!(response.content, "plain answer");
    assert_eq!(adapter.calls().await, 3);
    assert_eq!(sink.last().retry_count, 2);
}

#[tokio::test]
async fn fatal_upstream_errors_are_never_retried() {
    let adapter = StubAdapter::with_responses(vec![Err(AdapterError::Upstream {
        status: 400,
        code: "invalid_request".to_string(),
        retry_after_seconds: None,
    })]);
    let (gateway, _sink) = gateway_for(Vendor::OpenAi, adapter.clone(), fast_config());

    let err = gateway
        .execute(ungrounded_request())
        .await
        .expect_err("4xx is terminal");
    assert!(matches!(err, GatewayError::ProviderFailure(_)));
    assert_eq!(adapter.calls().await, 1);
}

#[tokio::test]
async fn consecutive_rate_limits_surface_as_quota_exhausted() {
    let responses = (0..3)
        .map(|_| {
            Err(AdapterError::Upstream {
                status: 429,
                code: "rate_limited".to_string(),
                retry_after_seconds: Some(0),
            })
        })
        .collect();
    let adapter = StubAdapter::with_responses(responses);
    let mut config = fast_config();
    config.reliability.max_consecutive_rate_limited = 3;
    config.reliability.retry_max_attempts = 10;
    let (gateway, sink) = gateway_for(Vendor::OpenAi, adapter.clone(), config);

    let err = gateway
        .execute(ungrounded_request())
        .await
        .expect_err("quota pressure is terminal after the cap");
    assert!(matches!(
        err,
        GatewayError::QuotaExhausted { consecutive: 3, .. }
    ));
    assert_eq!(adapter.calls().await, 3);
    assert_eq!(sink.last().error_class, Some("quota_exhausted"));
}

#[tokio::test]
async fn unsupported_tool_negotiates_the_alternate_variant_once() {
    let adapter = StubAdapter::with_responses(vec![
        Err(AdapterError::UnsupportedTool {
            variant: "web_search".to_string(),
        }),
        Ok(grounded_response(1, 1)),
    ]);
    let (gateway, _sink) = gateway_for(Vendor::OpenAi, adapter.clone(), fast_config());

    let response = gateway
        .execute(grounded_request(GroundingMode::Required))
        .await
        .expect("alternate variant succeeds");
    assert!(response.telemetry.grounded_effective);

    let seen = adapter.seen_requests().await;
    assert_eq!(seen.len(), 2);
    assert_eq!(
        seen[0].grounding.as_ref().expect("tooled").tool_variant,
        "web_search"
    );
    assert_eq!(
        seen[1].grounding.as_ref().expect("tooled").tool_variant,
        "web_search_preview"
    );
}

#[tokio::test]
async fn both_variants_unsupported_is_a_capability_failure() {
    let adapter = StubAdapter::with_responses(vec![
        Err(AdapterError::UnsupportedTool {
            variant: "web_search".to_string(),
        }),
        Err(AdapterError::UnsupportedTool {
            variant: "web_search_preview".to_string(),
        }),
    ]);
    let (gateway, sink) = gateway_for(Vendor::OpenAi, adapter.clone(), fast_config());

    let err = gateway
        .execute(grounded_request(GroundingMode::Required))
        .await
        .expect_err("capability unavailable");
    assert!(matches!(err, GatewayError::GroundingNotSupported { .. }));
    assert_eq!(sink.last().error_class, Some("grounding_not_supported"));

    // The conclusion is cached: the next REQUIRED run fails without any
    // further backend contact.
    let calls_before = adapter.calls().await;
    let err = gateway
        .execute(grounded_request(GroundingMode::Required))
        .await
        .expect_err("cached conclusion");
    assert!(matches!(err, GatewayError::GroundingNotSupported { .. }));
    assert_eq!(adapter.calls().await, calls_before);
}

#[tokio::test]
async fn limiter_blocks_excess_calls_until_the_window_rolls() {
    let mut config = ReliabilityConfig::default();
    config.rate_limit_window_seconds = 2;
    config.headroom_fraction = 0.0;
    config.tokens_per_minute.insert(Vendor::OpenAi, 1_000);
    let stack = ResilienceStack::new(config).expect("stack builds");

    let first = stack.limiter.reserve(Vendor::OpenAi, 900).await;
    assert_eq!(first.tokens, 900);

    // Does not fit the current window: the reservation stays pending.
    let blocked = tokio::time::timeout(
        Duration::from_millis(200),
        stack.limiter.reserve(Vendor::OpenAi, 400),
    )
    .await;
    assert!(blocked.is_err(), "second call must wait for the boundary");

    // Admitted once the window rolls.
    let admitted = tokio::time::timeout(
        Duration::from_secs(4),
        stack.limiter.reserve(Vendor::OpenAi, 400),
    )
    .await;
    assert!(admitted.is_ok());
}

#[tokio::test]
async fn retry_after_hint_is_honored() {
    let adapter = StubAdapter::with_responses(vec![
        Err(AdapterError::Upstream {
            status: 429,
            code: "rate_limited".to_string(),
            retry_after_seconds: Some(1),
        }),
        Ok(plain_response()),
    ]);
    let (gateway, _sink) = gateway_for(Vendor::OpenAi, adapter.clone(), fast_config());

    let started = std::time::Instant::now();
    gateway
        .execute(ungrounded_request())
        .await
        .expect("second attempt succeeds");
    assert!(
        started.elapsed() >= Duration::from_secs(1),
        "retry should wait out the hint"
    );
    assert_eq!(adapter.calls().await, 2);
}

fn fast_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.reliability.retry_base_backoff_ms = 1;
    config.reliability.retry_max_attempts = 4;
    config.reliability.breaker_failure_threshold = 5;
    config.reliability.breaker_hold_min_seconds = 60;
    config.reliability.breaker_hold_max_seconds = 120;
    config
}

fn gateway_for(
    vendor: Vendor,
    adapter: StubAdapter,
    config: GatewayConfig,
) -> (Gateway, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let adapters: HashMap<Vendor, Arc<dyn VendorAdapter>> =
        HashMap::from([(vendor, Arc::new(adapter) as Arc<dyn VendorAdapter>)]);
    let gateway = Gateway::new(config, adapters, Arc::new(NullRedirects), sink.clone())
        .expect("gateway should build");
    (gateway, sink)
}

fn ungrounded_request() -> Request {
    Request::new(
        "gpt-4o",
        vec![Message::system("be brief"), Message::user("hello")],
    )
}

fn grounded_request(mode: GroundingMode) -> Request {
    ungrounded_request().with_grounding(mode)
}

fn plain_response() -> AdapterResponse {
    AdapterResponse {
        content: "plain answer".to_string(),
        evidence: Some(VendorEvidence::Chat(ChatEvidence::default())),
        usage: TokenUsage {
            input_tokens: 40,
            output_tokens: 20,
        },
        finish_reason: "stop".to_string(),
        tool_call_count: 0,
    }
}

fn grounded_response(tool_calls: u32, anchored: usize) -> AdapterResponse {
    let annotations = (0..anchored)
        .map(|index| ChatAnnotation {
            url: format!("https://example.org/article-{index}"),
            title: Some(format!("Article {index}")),
            start_index: 0,
            end_index: 12,
        })
        .collect();
    AdapterResponse {
        content: "grounded answer".to_string(),
        evidence: Some(VendorEvidence::Chat(ChatEvidence { annotations })),
        usage: TokenUsage {
            input_tokens: 120,
            output_tokens: 60,
        },
        finish_reason: "stop".to_string(),
        tool_call_count: tool_calls,
    }
}
