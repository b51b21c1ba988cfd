use std::collections::HashMap;

use thiserror::Error;

use crate::request::Vendor;

/// Alias table applied after prefix stripping and lowercasing. Normalization
/// runs before vendor inference so aliased ids still resolve.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("gpt4o", "gpt-4o"),
    ("gpt-4o-latest", "gpt-4o"),
    ("chatgpt-4o-latest", "gpt-4o"),
    ("gpt4o-mini", "gpt-4o-mini"),
    ("gemini-pro", "gemini-2.5-pro"),
    ("gemini-flash", "gemini-2.5-flash"),
];

const VENDOR_RESOURCE_PREFIXES: &[&str] = &["publishers/google/models/", "models/"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub vendor: Vendor,
    pub model: String,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("model {model} is not allowed for {vendor}; allowed: {allowed:?}")]
    ModelNotAllowed {
        vendor: &'static str,
        model: String,
        allowed: Vec<String>,
    },

    #[error("could not infer a vendor for model {model}")]
    UnknownVendor { model: String },
}

pub fn normalize_model(raw: &str) -> String {
    let mut id = raw.trim();
    for prefix in VENDOR_RESOURCE_PREFIXES {
        if let Some(stripped) = id.strip_prefix(prefix) {
            id = stripped;
            break;
        }
    }
    let lowered = id.to_ascii_lowercase();
    for (alias, canonical) in MODEL_ALIASES {
        if lowered == *alias {
            return (*canonical).to_string();
        }
    }
    lowered
}

pub fn infer_vendor(normalized_model: &str) -> Option<Vendor> {
    if normalized_model.starts_with("gpt-")
        || normalized_model.starts_with("o3")
        || normalized_model.starts_with("o4")
    {
        return Some(Vendor::OpenAi);
    }
    if normalized_model.starts_with("gemini-") {
        return Some(Vendor::Vertex);
    }
    None
}

/// Hard gate: an id missing from the vendor allowlist is a typed failure
/// carrying the allowed set, never a substitution.
pub fn resolve(
    raw_model: &str,
    explicit_vendor: Option<Vendor>,
    allowed_models: &HashMap<Vendor, Vec<String>>,
) -> Result<ResolvedTarget, ResolveError> {
    let model = normalize_model(raw_model);
    let vendor = match explicit_vendor {
        Some(vendor) => vendor,
        None => infer_vendor(&model).ok_or_else(|| ResolveError::UnknownVendor {
            model: model.clone(),
        })?,
    };

    let allowed = allowed_models.get(&vendor).cloned().unwrap_or_default();
    if !allowed.iter().any(|candidate| candidate == &model) {
        return Err(ResolveError::ModelNotAllowed {
            vendor: vendor.as_str(),
            model,
            allowed,
        });
    }

    Ok(ResolvedTarget { vendor, model })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlists() -> HashMap<Vendor, Vec<String>> {
        HashMap::from([
            (
                Vendor::OpenAi,
                vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()],
            ),
            (Vendor::Vertex, vec!["gemini-2.5-pro".to_string()]),
        ])
    }

    #[test]
    fn normalizes_before_inferring_vendor() {
        let resolved = resolve("models/gemini-pro", None, &allowlists()).expect("should resolve");
        assert_eq!(resolved.vendor, Vendor::Vertex);
        assert_eq!(resolved.model, "gemini-2.5-pro");
    }

    #[test]
    fn alias_maps_to_canonical_id() {
        assert_eq!(normalize_model("GPT4O"), "gpt-4o");
        assert_eq!(normalize_model("publishers/google/models/gemini-flash"), "gemini-2.5-flash");
    }

    #[test]
    fn disallowed_model_carries_allowed_set() {
        let err = resolve("gpt-3.5-turbo", None, &allowlists()).expect_err("should be rejected");
        match err {
            ResolveError::ModelNotAllowed { vendor, allowed, .. } => {
                assert_eq!(vendor, "openai");
                assert_eq!(allowed.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_pattern_without_explicit_vendor_fails() {
        let err = resolve("mistral-large", None, &allowlists()).expect_err("should fail");
        assert!(matches!(err, ResolveError::UnknownVendor { .. }));
    }
}
