//! Post-processing of raw vendor evidence into a uniform citation model:
//! redirect resolution under a bounded budget, dedup by resolved URL, and
//! source-authority scoring.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::timeout;
use url::Url;

use crate::adapters::VendorEvidence;

mod authority;
mod redirect;

pub use authority::{AuthorityScore, AuthorityTable, score_citations};
pub use redirect::{HttpRedirectResolver, RedirectResolver, ResolveFuture};

/// Hosts/paths that wrap the true destination behind an opaque redirect.
const REDIRECT_MARKERS: &[&str] = &["vertexaisearch.cloud.google.com", "/grounding-api-redirect/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Backed by an explicit text-span reference in the response.
    Anchored,
    /// Returned by the backend without a span anchor.
    Unlinked,
    /// True destination could not be resolved within budget.
    RedirectOnly,
}

impl SourceType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anchored => "anchored",
            Self::Unlinked => "unlinked",
            Self::RedirectOnly => "redirect_only",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub resolved_url: String,
    pub raw_url: String,
    pub title: Option<String>,
    pub domain: String,
    pub source_type: SourceType,
    /// 1 is highest authority, 4 is a penalty tier.
    pub authority_tier: u8,
    /// Dedup occurrences sharing the same resolved URL.
    pub count: u32,
}

/// Caps on redirect chasing per response; entries beyond the budget are kept
/// as `RedirectOnly` instead of blocking the run.
#[derive(Debug, Clone, Copy)]
pub struct RedirectBudget {
    pub max_urls: usize,
    pub max_elapsed: Duration,
}

impl Default for RedirectBudget {
    fn default() -> Self {
        Self {
            max_urls: 8,
            max_elapsed: Duration::from_secs(2),
        }
    }
}

struct RawEntry {
    url: String,
    title: Option<String>,
    anchored: bool,
}

pub async fn normalize_evidence(
    evidence: &VendorEvidence,
    resolver: &dyn RedirectResolver,
    budget: &RedirectBudget,
) -> Vec<Citation> {
    let entries = raw_entries(evidence);

    let started_at = Instant::now();
    let mut resolved_urls = 0_usize;
    let mut ordered: Vec<Citation> = Vec::new();
    let mut index_by_url: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        let mut source_type = if entry.anchored {
            SourceType::Anchored
        } else {
            SourceType::Unlinked
        };
        let mut resolved_url = entry.url.clone();

        if is_redirect_url(&entry.url) {
            let remaining = budget
                .max_elapsed
                .saturating_sub(started_at.elapsed());
            let within_budget = resolved_urls < budget.max_urls && !remaining.is_zero();
            let destination = if within_budget {
                resolved_urls += 1;
                timeout(remaining, resolver.resolve(&entry.url))
                    .await
                    .ok()
                    .flatten()
            } else {
                None
            };
            match destination {
                Some(final_url) => resolved_url = final_url,
                None => source_type = SourceType::RedirectOnly,
            }
        }

        match index_by_url.get(&resolved_url) {
            Some(&index) => {
                let existing = &mut ordered[index];
                existing.count = existing.count.saturating_add(1);
                if rank(source_type) > rank(existing.source_type) {
                    existing.source_type = source_type;
                }
                if existing.title.is_none() {
                    existing.title = entry.title.clone();
                }
            }
            None => {
                index_by_url.insert(resolved_url.clone(), ordered.len());
                ordered.push(Citation {
                    domain: domain_of(&resolved_url),
                    resolved_url,
                    raw_url: entry.url,
                    title: entry.title,
                    source_type,
                    authority_tier: 0,
                    count: 1,
                });
            }
        }
    }

    ordered
}

fn raw_entries(evidence: &VendorEvidence) -> Vec<RawEntry> {
    match evidence {
        VendorEvidence::Chat(chat) => chat
            .annotations
            .iter()
            .map(|annotation| RawEntry {
                url: annotation.url.clone(),
                title: annotation.title.clone(),
                anchored: true,
            })
            .collect(),
        VendorEvidence::SearchGrounded(search) => {
            let mut anchored_indices = vec![false; search.chunks.len()];
            for support in &search.supports {
                for &index in &support.chunk_indices {
                    if let Some(flag) = anchored_indices.get_mut(index) {
                        *flag = true;
                    }
                }
            }
            search
                .chunks
                .iter()
                .enumerate()
                .map(|(index, chunk)| RawEntry {
                    url: chunk.uri.clone(),
                    title: chunk.title.clone(),
                    anchored: anchored_indices[index],
                })
                .collect()
        }
    }
}

fn rank(source_type: SourceType) -> u8 {
    match source_type {
        SourceType::Anchored => 2,
        SourceType::Unlinked => 1,
        SourceType::RedirectOnly => 0,
    }
}

pub(crate) fn is_redirect_url(url: &str) -> bool {
    REDIRECT_MARKERS.iter().any(|marker| url.contains(marker))
}

pub(crate) fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .map(|host| {
            host.strip_prefix("www.")
                .map(str::to_string)
                .unwrap_or(host)
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_marker_detection() {
        assert!(is_redirect_url(
            "https://vertexaisearch.cloud.google.com/grounding-api-redirect/abc"
        ));
        assert!(!is_redirect_url("https://example.org/article"));
    }

    #[test]
    fn domain_strips_www() {
        assert_eq!(domain_of("https://www.reuters.com/a/b"), "reuters.com");
        assert_eq!(domain_of("not a url"), "");
    }
}
