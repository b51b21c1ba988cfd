//! Top-level entry point: resolve → enrich → clear the resilience stack →
//! dispatch → normalize citations → grounding gate → telemetry. Any stage
//! failure short-circuits the rest but the telemetry record is always
//! emitted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::adapters::{
    AdapterError, AdapterRequest, AdapterResponse, ChatAdapter, ChatAdapterConfig,
    ChatAdapterConfigError, GroundingAttachment, SearchAdapter, SearchAdapterConfig,
    SearchAdapterConfigError, VendorAdapter,
};
use crate::als::build_als_block;
use crate::citations::{
    AuthorityScore, AuthorityTable, Citation, HttpRedirectResolver, RedirectResolver, SourceType,
    normalize_evidence, score_citations,
};
use crate::config::{GatewayConfig, GatewayConfigError};
use crate::error::GatewayError;
use crate::grounding::{self, AttestationError, GroundingFailure};
use crate::reliability::{
    AdmitDecision, CircuitState, FailureClass, ResilienceStack, TargetKey, classify,
    counts_toward_breaker, estimate_tokens,
};
use crate::request::{GatewayResponse, GroundingMode, Message, Request, Role, VantagePolicy, Vendor};
use crate::resolver::{self, ResolvedTarget};
use crate::telemetry::{RunTelemetry, TelemetrySink, TracingSink};
use crate::vantage::{Egress, VantageRouter, canonical_country};

const DEFAULT_SEED_KEY_ID: &str = "als-seed-v1";

/// Headroom on top of the adapter's own client timeout so the outer guard
/// only fires when the transport truly hangs.
const TIMEOUT_GRACE: Duration = Duration::from_millis(500);

const RESHAPE_SYSTEM_PROMPT: &str = "Restructure the provided material into the requested \
     output format. Use only the provided material; do not introduce new information.";

#[derive(Debug, Error)]
pub enum GatewayBuildError {
    #[error(transparent)]
    Config(#[from] GatewayConfigError),
    #[error(transparent)]
    ChatAdapter(#[from] ChatAdapterConfigError),
    #[error(transparent)]
    SearchAdapter(#[from] SearchAdapterConfigError),
}

pub struct Gateway {
    config: GatewayConfig,
    resilience: ResilienceStack,
    vantage: VantageRouter,
    adapters: HashMap<Vendor, Arc<dyn VendorAdapter>>,
    redirects: Arc<dyn RedirectResolver>,
    sink: Arc<dyn TelemetrySink>,
    authority: AuthorityTable,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        adapters: HashMap<Vendor, Arc<dyn VendorAdapter>>,
        redirects: Arc<dyn RedirectResolver>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self, GatewayConfigError> {
        config.validate()?;
        let resilience = ResilienceStack::new(config.reliability.clone())?;
        let vantage = VantageRouter::new(config.vantage.clone());
        let authority =
            AuthorityTable::default().with_overrides(config.authority_overrides.clone());
        Ok(Self {
            config,
            resilience,
            vantage,
            adapters,
            redirects,
            sink,
            authority,
        })
    }

    /// Production wiring: HTTP adapters for both vendors, HTTP redirect
    /// resolution, tracing telemetry.
    pub fn from_env() -> Result<Self, GatewayBuildError> {
        let config = GatewayConfig::from_env()?;
        let chat = ChatAdapter::new(ChatAdapterConfig::from_env()?);
        let search = SearchAdapter::new(SearchAdapterConfig::from_env()?);
        let adapters: HashMap<Vendor, Arc<dyn VendorAdapter>> = HashMap::from([
            (Vendor::OpenAi, Arc::new(chat) as Arc<dyn VendorAdapter>),
            (Vendor::Vertex, Arc::new(search) as Arc<dyn VendorAdapter>),
        ]);
        Ok(Self::new(
            config,
            adapters,
            Arc::new(HttpRedirectResolver::new()),
            Arc::new(TracingSink),
        )?)
    }

    pub async fn execute(&self, request: Request) -> Result<GatewayResponse, GatewayError> {
        let started_at = Instant::now();
        let mut telemetry = RunTelemetry::for_request(&request);

        let result = self.run(&request, &mut telemetry).await;

        telemetry.latency_ms = started_at.elapsed().as_millis().min(u64::MAX as u128) as u64;
        telemetry.completed_at = chrono::Utc::now();
        match &result {
            Ok(_) => telemetry.success = true,
            Err(error) => {
                telemetry.success = false;
                telemetry.error_class = Some(error.class());
            }
        }
        self.sink.record(&telemetry);

        result.map(|outcome| GatewayResponse {
            content: outcome.content,
            citations: outcome.citations,
            authority: outcome.authority,
            telemetry,
        })
    }

    async fn run(
        &self,
        request: &Request,
        telemetry: &mut RunTelemetry,
    ) -> Result<RunOutcome, GatewayError> {
        let target = resolver::resolve(
            &request.model,
            request.vendor,
            &self.config.allowed_models,
        )?;
        telemetry.vendor = Some(target.vendor.as_str());
        telemetry.model = target.model.clone();

        let mode = request.effective_grounding_mode();
        let attach_tools = mode.attaches_tools();

        // Country only matters once a vantage policy is in play.
        let canonical = match request.country.as_deref() {
            Some(raw) if request.vantage_policy != VantagePolicy::None => {
                Some(canonical_country(raw)?)
            }
            _ => None,
        };
        let egress = self
            .vantage
            .resolve_egress(request.vantage_policy, canonical.as_deref())?;
        telemetry.vantage_downgraded = egress.downgraded;

        let messages = if egress.use_als {
            let Some(country) = canonical.as_deref() else {
                return Err(GatewayError::InvalidRequest(
                    "ALS egress resolved without a country".to_string(),
                ));
            };
            let seed_key_id = request
                .options
                .get("seed_key_id")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_SEED_KEY_ID);
            let block = build_als_block(country, seed_key_id)?;
            telemetry.als_present = true;
            telemetry.als_block_sha256 = Some(block.provenance.sha256.clone());
            telemetry.als_variant_id = Some(block.provenance.variant_id);
            telemetry.seed_key_id = Some(block.provenance.seed_key_id.clone());
            telemetry.als_country = Some(block.provenance.country.clone());
            insert_als_message(&request.messages, &block.text)
        } else {
            request.messages.clone()
        };

        let max_output_tokens = request.max_output_tokens();
        let multiplier = self.config.reliability.grounded_overhead_multiplier;
        let estimate = estimate_tokens(
            message_chars(&messages),
            max_output_tokens,
            attach_tools,
            multiplier,
        );

        let two_phase =
            target.vendor == Vendor::Vertex && attach_tools && request.response_schema().is_some();

        let primary = self
            .dispatch(
                &target,
                &messages,
                mode,
                if two_phase {
                    None
                } else {
                    request.response_schema().cloned()
                },
                &egress,
                max_output_tokens,
                estimate,
                telemetry,
            )
            .await?;

        let mut citations = match &primary.evidence {
            Some(evidence) => {
                normalize_evidence(
                    evidence,
                    self.redirects.as_ref(),
                    &self.config.redirect_budget,
                )
                .await
            }
            None => Vec::new(),
        };
        let authority = score_citations(&mut citations, &self.authority);

        telemetry.tool_call_count = primary.tool_call_count;
        telemetry.anchored_citations_count =
            count_by_type(&citations, SourceType::Anchored);
        telemetry.unlinked_sources_count = count_by_type(&citations, SourceType::Unlinked);
        telemetry.authority_score = Some(authority.score);

        let allow_unlinked = self.config.allow_unlinked_evidence.contains(&target.vendor);
        let verdict = grounding::evaluate(
            mode,
            target.vendor,
            primary.tool_call_count,
            &citations,
            allow_unlinked,
        );
        telemetry.grounded_effective = verdict.grounded_effective;
        telemetry.why_not_grounded = verdict.why_not_grounded;
        if let Some(GroundingFailure::RequiredGroundingMissing { why }) = verdict.failure {
            return Err(GatewayError::RequiredGroundingMissing { why });
        }

        let content = if two_phase {
            self.reshape_phase(&target, &primary, request, &egress, telemetry)
                .await?
        } else {
            primary.content
        };

        Ok(RunOutcome {
            content,
            citations,
            authority,
        })
    }

    /// Phase 2 of the ground-then-reshape protocol: tools explicitly off,
    /// schema enforced, attestation recorded.
    async fn reshape_phase(
        &self,
        target: &ResolvedTarget,
        phase1: &AdapterResponse,
        request: &Request,
        egress: &Egress,
        telemetry: &mut RunTelemetry,
    ) -> Result<String, GatewayError> {
        let schema = request
            .response_schema()
            .cloned()
            .ok_or_else(|| GatewayError::InvalidRequest("reshape without a schema".to_string()))?;
        let reshape_messages = vec![
            Message::system(RESHAPE_SYSTEM_PROMPT),
            Message::user(phase1.content.clone()),
        ];
        let max_output_tokens = request.max_output_tokens();
        let estimate = estimate_tokens(
            message_chars(&reshape_messages),
            max_output_tokens,
            false,
            self.config.reliability.grounded_overhead_multiplier,
        );

        let phase2 = self
            .dispatch(
                target,
                &reshape_messages,
                GroundingMode::None,
                Some(schema),
                egress,
                max_output_tokens,
                estimate,
                telemetry,
            )
            .await?;

        let attestation = grounding::attest_reshape(&phase1.content, &phase2).map_err(
            |error| match error {
                AttestationError::ToolsInvoked => GatewayError::Phase2ToolUse,
                AttestationError::OutputNotJson => GatewayError::Phase2NotJson,
            },
        )?;
        telemetry.phase2_tools_invoked = Some(attestation.phase2_tools_invoked);
        telemetry.phase1_sha256 = Some(attestation.phase1_sha256);

        Ok(phase2.content)
    }

    /// One resilience-wrapped dispatch: breaker admit, token reservation,
    /// bounded retries with jittered backoff, tool-variant negotiation, and
    /// reconciliation on every exit path.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        target: &ResolvedTarget,
        messages: &[Message],
        mode: GroundingMode,
        response_schema: Option<Value>,
        egress: &Egress,
        max_output_tokens: u32,
        estimate: u64,
        telemetry: &mut RunTelemetry,
    ) -> Result<AdapterResponse, GatewayError> {
        let adapter = self.adapters.get(&target.vendor).ok_or_else(|| {
            GatewayError::InvalidRequest(format!(
                "no adapter registered for {}",
                target.vendor.as_str()
            ))
        })?;
        let key = TargetKey::new(target.vendor, target.model.clone());
        let timeout = self.config.timeout_for(mode.attaches_tools());
        let retry = &self.resilience.retry;

        let mut tool_variant: Option<&'static str> = if mode.attaches_tools() {
            match self.resilience.negotiator.select(&key) {
                Some(variant) => Some(variant),
                None if mode == GroundingMode::Required => {
                    return Err(GatewayError::GroundingNotSupported {
                        vendor: target.vendor.as_str(),
                        model: target.model.clone(),
                    });
                }
                // AUTO proceeds untooled and lands on tool_not_invoked.
                None => None,
            }
        } else {
            None
        };

        let mut failed_attempts = 0_u32;
        let mut consecutive_rate_limited = 0_u32;

        loop {
            let observed = match self.resilience.breaker.admit(&key) {
                AdmitDecision::Admitted(state) => state,
                AdmitDecision::Rejected { .. } => {
                    telemetry.circuit_state = CircuitState::Open.as_str();
                    return Err(GatewayError::CircuitOpen {
                        vendor: target.vendor.as_str(),
                        model: target.model.clone(),
                    });
                }
            };
            telemetry.circuit_state = observed.as_str();

            let reservation = self.resilience.limiter.reserve(target.vendor, estimate).await;

            let adapter_request = AdapterRequest {
                model: target.model.clone(),
                messages: messages.to_vec(),
                grounding: tool_variant.map(|tool_variant| GroundingAttachment { tool_variant }),
                response_schema: response_schema.clone(),
                max_output_tokens,
                timeout,
                proxy: egress.proxy.clone(),
            };

            let outcome =
                match tokio::time::timeout(timeout + TIMEOUT_GRACE, adapter.invoke(adapter_request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AdapterError::Timeout),
                };

            let error = match outcome {
                Ok(response) => {
                    self.resilience.breaker.record_success(&key);
                    self.resilience
                        .limiter
                        .reconcile(&reservation, response.usage.total());
                    telemetry.input_tokens = Some(
                        telemetry.input_tokens.unwrap_or(0) + response.usage.input_tokens,
                    );
                    telemetry.output_tokens = Some(
                        telemetry.output_tokens.unwrap_or(0) + response.usage.output_tokens,
                    );
                    return Ok(response);
                }
                Err(error) => error,
            };

            // No usage data on a failed attempt: release the reservation.
            self.resilience.limiter.reconcile(&reservation, 0);

            let class = classify(&error);
            if counts_toward_breaker(class) {
                self.resilience.breaker.record_failure(&key);
            }
            if let (AdapterError::Connect(_), Some(endpoint)) = (&error, &egress.proxy) {
                self.vantage.record_proxy_failure(&endpoint.country);
            }

            match class {
                FailureClass::UnsupportedTool => {
                    if let AdapterError::UnsupportedTool { variant } = &error {
                        self.resilience.negotiator.mark_unsupported(&key, variant);
                    }
                    match self.resilience.negotiator.select(&key) {
                        Some(alternate) => {
                            debug!(
                                vendor = target.vendor.as_str(),
                                model = %target.model,
                                alternate,
                                "tool variant unsupported, renegotiating"
                            );
                            tool_variant = Some(alternate);
                            continue;
                        }
                        None => {
                            return Err(GatewayError::GroundingNotSupported {
                                vendor: target.vendor.as_str(),
                                model: target.model.clone(),
                            });
                        }
                    }
                }
                FailureClass::RateLimited => {
                    consecutive_rate_limited += 1;
                    if consecutive_rate_limited >= retry.max_consecutive_rate_limited {
                        return Err(GatewayError::QuotaExhausted {
                            vendor: target.vendor.as_str(),
                            consecutive: consecutive_rate_limited,
                        });
                    }
                }
                FailureClass::Transient => {
                    consecutive_rate_limited = 0;
                }
                FailureClass::Fatal => {
                    return Err(GatewayError::from_terminal_adapter_error(error));
                }
            }

            failed_attempts += 1;
            telemetry.retry_count = failed_attempts;
            if failed_attempts >= retry.max_attempts {
                return Err(match error {
                    AdapterError::Timeout => GatewayError::Timeout {
                        attempts: failed_attempts,
                    },
                    other => GatewayError::RetriesExhausted {
                        attempts: failed_attempts,
                        last_error: other.to_string(),
                    },
                });
            }

            let hint = error.retry_after();
            tokio::time::sleep(retry.delay(failed_attempts, hint)).await;
        }
    }
}

struct RunOutcome {
    content: String,
    citations: Vec<Citation>,
    authority: AuthorityScore,
}

/// New message list with the ALS block as its own message strictly between
/// the leading system message(s) and the first user message.
fn insert_als_message(messages: &[Message], als_text: &str) -> Vec<Message> {
    let insert_at = messages
        .iter()
        .position(|message| message.role != Role::System)
        .unwrap_or(messages.len());
    let mut enriched = Vec::with_capacity(messages.len() + 1);
    enriched.extend_from_slice(&messages[..insert_at]);
    enriched.push(Message::user(als_text));
    enriched.extend_from_slice(&messages[insert_at..]);
    enriched
}

fn message_chars(messages: &[Message]) -> usize {
    messages.iter().map(|message| message.content.len()).sum()
}

fn count_by_type(citations: &[Citation], source_type: SourceType) -> u32 {
    citations
        .iter()
        .filter(|citation| citation.source_type == source_type)
        .count() as u32
}
