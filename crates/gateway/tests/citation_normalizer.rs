use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use gateway::adapters::{
    ChatAnnotation, ChatEvidence, SearchChunk, SearchEvidence, SearchSupport, VendorEvidence,
};
use gateway::citations::{
    AuthorityTable, RedirectBudget, RedirectResolver, ResolveFuture, SourceType,
    normalize_evidence, score_citations,
};

/// Maps redirect-wrapper URLs to destinations; records how many lookups ran.
struct TableRedirects {
    destinations: HashMap<String, String>,
    lookups: AtomicUsize,
}

impl TableRedirects {
    fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            destinations: entries
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            lookups: AtomicUsize::new(0),
        }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl RedirectResolver for TableRedirects {
    fn resolve<'a>(&'a self, url: &'a str) -> ResolveFuture<'a> {
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.destinations.get(url).cloned()
        })
    }
}

/// Never answers within any deadline.
struct StalledRedirects;

impl RedirectResolver for StalledRedirects {
    fn resolve<'a>(&'a self, _url: &'a str) -> ResolveFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            None
        })
    }
}

#[tokio::test]
async fn duplicate_resolved_urls_collapse_with_count() {
    let evidence = VendorEvidence::Chat(ChatEvidence {
        annotations: vec![
            annotation("https://example.org/report"),
            annotation("https://example.org/report"),
            annotation("https://other.example.org/page"),
        ],
    });
    let resolver = TableRedirects::new(&[]);
    let citations =
        normalize_evidence(&evidence, &resolver, &RedirectBudget::default()).await;

    assert_eq!(citations.len(), 2);
    assert_eq!(citations[0].resolved_url, "https://example.org/report");
    assert_eq!(citations[0].count, 2);
    assert_eq!(citations[1].count, 1);
}

#[tokio::test]
async fn chat_annotations_are_anchored() {
    let evidence = VendorEvidence::Chat(ChatEvidence {
        annotations: vec![annotation("https://www.reuters.com/markets/rates")],
    });
    let resolver = TableRedirects::new(&[]);
    let citations =
        normalize_evidence(&evidence, &resolver, &RedirectBudget::default()).await;

    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].source_type, SourceType::Anchored);
    assert_eq!(citations[0].domain, "reuters.com");
}

#[tokio::test]
async fn chunks_without_supports_are_unlinked() {
    let evidence = VendorEvidence::SearchGrounded(SearchEvidence {
        chunks: vec![chunk("https://a.example.org/x"), chunk("https://b.example.org/y")],
        supports: Vec::new(),
    });
    let resolver = TableRedirects::new(&[]);
    let citations =
        normalize_evidence(&evidence, &resolver, &RedirectBudget::default()).await;

    assert_eq!(citations.len(), 2);
    assert!(citations
        .iter()
        .all(|citation| citation.source_type == SourceType::Unlinked));
}

#[tokio::test]
async fn supports_anchor_only_the_referenced_chunks() {
    let evidence = VendorEvidence::SearchGrounded(SearchEvidence {
        chunks: vec![chunk("https://a.example.org/x"), chunk("https://b.example.org/y")],
        supports: vec![SearchSupport {
            chunk_indices: vec![1],
            segment_start: 0,
            segment_end: 40,
        }],
    });
    let resolver = TableRedirects::new(&[]);
    let citations =
        normalize_evidence(&evidence, &resolver, &RedirectBudget::default()).await;

    assert_eq!(citations[0].source_type, SourceType::Unlinked);
    assert_eq!(citations[1].source_type, SourceType::Anchored);
}

#[tokio::test]
async fn redirect_wrappers_resolve_to_their_destination() {
    let wrapper = "https://vertexaisearch.cloud.google.com/grounding-api-redirect/abc123";
    let evidence = VendorEvidence::SearchGrounded(SearchEvidence {
        chunks: vec![chunk(wrapper)],
        supports: vec![SearchSupport {
            chunk_indices: vec![0],
            segment_start: 0,
            segment_end: 10,
        }],
    });
    let resolver = TableRedirects::new(&[(wrapper, "https://www.ecb.europa.eu/press/rates")]);
    let citations =
        normalize_evidence(&evidence, &resolver, &RedirectBudget::default()).await;

    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].resolved_url, "https://www.ecb.europa.eu/press/rates");
    assert_eq!(citations[0].raw_url, wrapper);
    assert_eq!(citations[0].source_type, SourceType::Anchored);
    assert_eq!(citations[0].domain, "ecb.europa.eu");
    assert_eq!(resolver.lookups(), 1);
}

#[tokio::test]
async fn url_budget_marks_the_overflow_redirect_only() {
    let wrappers: Vec<String> = (0..4)
        .map(|index| {
            format!("https://vertexaisearch.cloud.google.com/grounding-api-redirect/{index}")
        })
        .collect();
    let destinations: Vec<(String, String)> = wrappers
        .iter()
        .enumerate()
        .map(|(index, wrapper)| (wrapper.clone(), format!("https://site-{index}.example.org/")))
        .collect();
    let entries: Vec<(&str, &str)> = destinations
        .iter()
        .map(|(from, to)| (from.as_str(), to.as_str()))
        .collect();
    let resolver = TableRedirects::new(&entries);

    let evidence = VendorEvidence::SearchGrounded(SearchEvidence {
        chunks: wrappers.iter().map(|wrapper| chunk(wrapper)).collect(),
        supports: Vec::new(),
    });
    let budget = RedirectBudget {
        max_urls: 2,
        max_elapsed: Duration::from_secs(2),
    };
    let citations = normalize_evidence(&evidence, &resolver, &budget).await;

    let resolved = citations
        .iter()
        .filter(|citation| citation.source_type == SourceType::Unlinked)
        .count();
    let redirect_only = citations
        .iter()
        .filter(|citation| citation.source_type == SourceType::RedirectOnly)
        .count();
    assert_eq!(resolved, 2, "only the budgeted URLs resolve");
    assert_eq!(redirect_only, 2, "overflow stays redirect-only");
    assert_eq!(resolver.lookups(), 2);
}

#[tokio::test]
async fn stalled_resolution_is_cut_off_by_the_time_budget() {
    let wrapper = "https://vertexaisearch.cloud.google.com/grounding-api-redirect/slow";
    let evidence = VendorEvidence::SearchGrounded(SearchEvidence {
        chunks: vec![chunk(wrapper)],
        supports: Vec::new(),
    });
    let budget = RedirectBudget {
        max_urls: 8,
        max_elapsed: Duration::from_millis(50),
    };

    let started = std::time::Instant::now();
    let citations = normalize_evidence(&evidence, &StalledRedirects, &budget).await;
    assert!(started.elapsed() < Duration::from_secs(2), "must not block");
    assert_eq!(citations[0].source_type, SourceType::RedirectOnly);
    assert_eq!(citations[0].resolved_url, wrapper);
}

#[tokio::test]
async fn authority_scoring_weights_by_count() {
    let evidence = VendorEvidence::Chat(ChatEvidence {
        annotations: vec![
            annotation("https://www.reuters.com/a"),
            annotation("https://www.reuters.com/a"),
            annotation("https://blog.unknown-site.net/post"),
            annotation("https://reddit.com/r/thread"),
        ],
    });
    let resolver = TableRedirects::new(&[]);
    let mut citations =
        normalize_evidence(&evidence, &resolver, &RedirectBudget::default()).await;
    let score = score_citations(&mut citations, &AuthorityTable::default());

    // Tiers: reuters ×2 → 1, unknown → 3, reddit → 4. Average 2.25 → 58.33.
    assert!((score.score - 58.333).abs() < 0.01);
    assert!((score.tier1_share_pct - 50.0).abs() < f64::EPSILON);
    assert!((score.premium_share_pct - 50.0).abs() < f64::EPSILON);
    assert!((score.penalty_share_pct - 25.0).abs() < f64::EPSILON);
}

fn annotation(url: &str) -> ChatAnnotation {
    ChatAnnotation {
        url: url.to_string(),
        title: None,
        start_index: 0,
        end_index: 16,
    }
}

fn chunk(uri: &str) -> SearchChunk {
    SearchChunk {
        uri: uri.to_string(),
        title: None,
    }
}
