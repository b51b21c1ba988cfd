//! Resilient gateway over heterogeneous text-generation backends: one
//! uniform request contract, deterministic locale-context injection,
//! fail-closed grounding enforcement, normalized citation accounting, and an
//! explicit per-target resilience stack.

pub mod adapters;
pub mod als;
pub mod citations;
pub mod config;
mod digest;
pub mod error;
pub mod grounding;
pub mod orchestrator;
pub mod reliability;
pub mod request;
pub mod resolver;
pub mod telemetry;
pub mod vantage;

pub use adapters::{
    AdapterError, AdapterRequest, AdapterResponse, TokenUsage, VendorAdapter, VendorEvidence,
};
pub use als::{AlsBlock, AlsError, AlsProvenance, build_als_block, ALS_MAX_CHARS};
pub use citations::{AuthorityScore, AuthorityTable, Citation, SourceType};
pub use config::{GatewayConfig, GatewayConfigError};
pub use error::GatewayError;
pub use grounding::GroundingVerdict;
pub use orchestrator::{Gateway, GatewayBuildError};
pub use reliability::{ReliabilityConfig, ResilienceStack};
pub use request::{
    GatewayResponse, GroundingMode, Message, Request, Role, VantagePolicy, Vendor,
};
pub use telemetry::{RunTelemetry, TelemetrySink, TracingSink};
