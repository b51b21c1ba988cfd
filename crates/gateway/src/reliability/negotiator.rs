use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::request::Vendor;

use super::TargetKey;

/// Near-equivalent tool identifiers per vendor, in preference order.
pub const OPENAI_TOOL_VARIANTS: [&str; 2] = ["web_search", "web_search_preview"];
pub const VERTEX_TOOL_VARIANTS: [&str; 2] = ["google_search", "google_search_retrieval"];

pub fn tool_variants_for(vendor: Vendor) -> [&'static str; 2] {
    match vendor {
        Vendor::OpenAi => OPENAI_TOOL_VARIANTS,
        Vendor::Vertex => VERTEX_TOOL_VARIANTS,
    }
}

#[derive(Debug, Default)]
struct VariantEntry {
    unsupported: Vec<(String, Instant)>,
}

impl VariantEntry {
    fn is_unsupported(&self, variant: &str, now: Instant) -> bool {
        self.unsupported
            .iter()
            .any(|(cached, expires_at)| cached == variant && now < *expires_at)
    }

    fn prune(&mut self, now: Instant) {
        self.unsupported.retain(|(_, expires_at)| now < *expires_at);
    }
}

/// Caches "this tool variant is unsupported for this model" conclusions with
/// a TTL so entitlement changes are eventually re-checked.
pub struct ToolVariantNegotiator {
    cache: Mutex<HashMap<TargetKey, VariantEntry>>,
    ttl: Duration,
}

impl ToolVariantNegotiator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// First variant not currently cached as unsupported, or `None` when the
    /// capability is unavailable for this target.
    pub fn select(&self, key: &TargetKey) -> Option<&'static str> {
        let now = Instant::now();
        let mut cache = self.lock_cache();
        let entry = cache.entry(key.clone()).or_default();
        entry.prune(now);
        tool_variants_for(key.vendor)
            .into_iter()
            .find(|variant| !entry.is_unsupported(variant, now))
    }

    pub fn mark_unsupported(&self, key: &TargetKey, variant: &str) {
        let expires_at = Instant::now() + self.ttl;
        let mut cache = self.lock_cache();
        let entry = cache.entry(key.clone()).or_default();
        if !entry
            .unsupported
            .iter()
            .any(|(cached, _)| cached == variant)
        {
            entry.unsupported.push((variant.to_string(), expires_at));
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<TargetKey, VariantEntry>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TargetKey {
        TargetKey::new(Vendor::OpenAi, "gpt-4o")
    }

    #[test]
    fn falls_back_to_alternate_variant() {
        let negotiator = ToolVariantNegotiator::new(Duration::from_secs(60));
        assert_eq!(negotiator.select(&key()), Some("web_search"));
        negotiator.mark_unsupported(&key(), "web_search");
        assert_eq!(negotiator.select(&key()), Some("web_search_preview"));
        negotiator.mark_unsupported(&key(), "web_search_preview");
        assert_eq!(negotiator.select(&key()), None);
    }

    #[test]
    fn unsupported_conclusion_expires_after_ttl() {
        let negotiator = ToolVariantNegotiator::new(Duration::from_millis(20));
        negotiator.mark_unsupported(&key(), "web_search");
        assert_eq!(negotiator.select(&key()), Some("web_search_preview"));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(negotiator.select(&key()), Some("web_search"));
    }
}
