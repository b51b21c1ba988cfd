//! Grounding policy gate. Decides, per mode, whether a completed call
//! satisfies the caller's grounding contract; `REQUIRED` fails closed and is
//! never relaxed to `AUTO` behavior.

use crate::adapters::AdapterResponse;
use crate::citations::{Citation, SourceType};
use crate::digest::sha256_hex;
use crate::request::{GroundingMode, Vendor};

pub const WHY_TOOL_NOT_INVOKED: &str = "tool_not_invoked";
pub const WHY_NO_QUALIFYING_CITATIONS: &str = "no_qualifying_citations";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundingFailure {
    RequiredGroundingMissing { why: &'static str },
}

#[derive(Debug, Clone, Copy)]
pub struct GroundingVerdict {
    pub grounded_effective: bool,
    pub why_not_grounded: Option<&'static str>,
    pub failure: Option<GroundingFailure>,
}

impl GroundingVerdict {
    fn ungrounded(why: Option<&'static str>) -> Self {
        Self {
            grounded_effective: false,
            why_not_grounded: why,
            failure: None,
        }
    }

    fn grounded() -> Self {
        Self {
            grounded_effective: true,
            why_not_grounded: None,
            failure: None,
        }
    }

    fn failed(why: &'static str) -> Self {
        Self {
            grounded_effective: false,
            why_not_grounded: Some(why),
            failure: Some(GroundingFailure::RequiredGroundingMissing { why }),
        }
    }
}

/// A qualifying citation is anchored for the chat backend; the search
/// backend accepts unlinked evidence only when the per-vendor relaxation is
/// configured.
pub fn qualifying_citation_count(
    vendor: Vendor,
    citations: &[Citation],
    allow_unlinked: bool,
) -> usize {
    citations
        .iter()
        .filter(|citation| match citation.source_type {
            SourceType::Anchored => true,
            SourceType::Unlinked => vendor == Vendor::Vertex && allow_unlinked,
            SourceType::RedirectOnly => false,
        })
        .count()
}

pub fn evaluate(
    mode: GroundingMode,
    vendor: Vendor,
    tool_call_count: u32,
    citations: &[Citation],
    allow_unlinked: bool,
) -> GroundingVerdict {
    match mode {
        GroundingMode::None => GroundingVerdict::ungrounded(None),
        GroundingMode::Auto => {
            if tool_call_count == 0 {
                // Zero invocations is a valid terminal outcome for AUTO.
                GroundingVerdict::ungrounded(Some(WHY_TOOL_NOT_INVOKED))
            } else {
                GroundingVerdict::grounded()
            }
        }
        GroundingMode::Required => {
            if tool_call_count == 0 {
                return GroundingVerdict::failed(WHY_TOOL_NOT_INVOKED);
            }
            if qualifying_citation_count(vendor, citations, allow_unlinked) == 0 {
                return GroundingVerdict::failed(WHY_NO_QUALIFYING_CITATIONS);
            }
            GroundingVerdict::grounded()
        }
    }
}

/// Proof that the reshape phase stayed tool-free, plus the content-hash
/// reference back to the grounded phase.
#[derive(Debug, Clone)]
pub struct PhaseAttestation {
    pub phase2_tools_invoked: bool,
    pub phase1_sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationError {
    ToolsInvoked,
    OutputNotJson,
}

/// Validates the reshape phase of the two-phase protocol: no tool use, and
/// output that parses as JSON (the schema was the whole point of phase 2).
pub fn attest_reshape(
    phase1_content: &str,
    phase2: &AdapterResponse,
) -> Result<PhaseAttestation, AttestationError> {
    if phase2.tool_call_count > 0 {
        return Err(AttestationError::ToolsInvoked);
    }
    if serde_json::from_str::<serde_json::Value>(&phase2.content).is_err() {
        return Err(AttestationError::OutputNotJson);
    }
    Ok(PhaseAttestation {
        phase2_tools_invoked: false,
        phase1_sha256: sha256_hex(phase1_content.as_bytes()),
    })
}
