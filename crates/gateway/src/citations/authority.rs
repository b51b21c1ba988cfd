use std::collections::HashMap;

use serde::Serialize;

use super::Citation;

const DEFAULT_TIER: u8 = 3;
const PENALTY_TIER: u8 = 4;

/// Domain → tier table. Tier 1 is highest authority (wire services,
/// government, primary science), tier 4 is a penalty tier for UGC and
/// aggregator domains. Everything unlisted lands on tier 3.
#[derive(Debug, Clone)]
pub struct AuthorityTable {
    tiers: HashMap<String, u8>,
}

impl Default for AuthorityTable {
    fn default() -> Self {
        let mut tiers = HashMap::new();
        for domain in [
            "reuters.com",
            "apnews.com",
            "nature.com",
            "science.org",
            "who.int",
            "europa.eu",
            "imf.org",
            "worldbank.org",
        ] {
            tiers.insert(domain.to_string(), 1);
        }
        for domain in [
            "bbc.co.uk",
            "bbc.com",
            "nytimes.com",
            "wsj.com",
            "ft.com",
            "economist.com",
            "bloomberg.com",
            "theguardian.com",
            "washingtonpost.com",
            "wikipedia.org",
        ] {
            tiers.insert(domain.to_string(), 2);
        }
        for domain in [
            "reddit.com",
            "quora.com",
            "pinterest.com",
            "medium.com",
            "blogspot.com",
            "fandom.com",
            "answers.com",
        ] {
            tiers.insert(domain.to_string(), PENALTY_TIER);
        }
        Self { tiers }
    }
}

impl AuthorityTable {
    pub fn with_overrides(mut self, overrides: HashMap<String, u8>) -> Self {
        for (domain, tier) in overrides {
            self.tiers.insert(domain, tier.clamp(1, PENALTY_TIER));
        }
        self
    }

    /// Exact match first, then parent-domain suffixes, then the gov/edu
    /// fallback, then the default tier.
    pub fn tier_for(&self, domain: &str) -> u8 {
        if domain.is_empty() {
            return DEFAULT_TIER;
        }
        if let Some(&tier) = self.tiers.get(domain) {
            return tier;
        }
        let mut rest = domain;
        while let Some((_, parent)) = rest.split_once('.') {
            if let Some(&tier) = self.tiers.get(parent) {
                return tier;
            }
            rest = parent;
        }
        if domain.ends_with(".gov")
            || domain.ends_with(".edu")
            || domain.ends_with(".gov.uk")
            || domain.ends_with(".admin.ch")
        {
            return 1;
        }
        DEFAULT_TIER
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AuthorityScore {
    /// 0–100, count-weighted average tier mapped linearly (tier 1 → 100,
    /// tier 4 → 0).
    pub score: f64,
    pub tier1_share_pct: f64,
    /// Tiers 1 and 2 combined.
    pub premium_share_pct: f64,
    pub penalty_share_pct: f64,
}

/// Assigns each citation its tier, then aggregates. An empty list scores
/// zero across the board.
pub fn score_citations(citations: &mut [Citation], table: &AuthorityTable) -> AuthorityScore {
    let mut total: u64 = 0;
    let mut weighted_tier_sum: u64 = 0;
    let mut tier1: u64 = 0;
    let mut premium: u64 = 0;
    let mut penalty: u64 = 0;

    for citation in citations.iter_mut() {
        let tier = table.tier_for(&citation.domain);
        citation.authority_tier = tier;
        let count = u64::from(citation.count);
        total += count;
        weighted_tier_sum += u64::from(tier) * count;
        match tier {
            1 => {
                tier1 += count;
                premium += count;
            }
            2 => premium += count,
            PENALTY_TIER => penalty += count,
            _ => {}
        }
    }

    if total == 0 {
        return AuthorityScore::default();
    }

    let average_tier = weighted_tier_sum as f64 / total as f64;
    let score = ((4.0 - average_tier) / 3.0 * 100.0).clamp(0.0, 100.0);
    let share = |part: u64| part as f64 / total as f64 * 100.0;

    AuthorityScore {
        score,
        tier1_share_pct: share(tier1),
        premium_share_pct: share(premium),
        penalty_share_pct: share(penalty),
    }
}
