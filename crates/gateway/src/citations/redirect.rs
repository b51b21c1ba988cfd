use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;
use url::Url;

const MAX_HOPS: usize = 5;
const PER_URL_TIMEOUT: Duration = Duration::from_millis(800);

pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

/// Seam for turning an opaque redirect wrapper into its true destination.
/// The normalizer enforces the overall budget; implementations only need to
/// chase one URL.
pub trait RedirectResolver: Send + Sync {
    fn resolve<'a>(&'a self, url: &'a str) -> ResolveFuture<'a>;
}

/// Follows `Location` headers manually (auto-redirect disabled) so every hop
/// stays visible and bounded.
pub struct HttpRedirectResolver {
    client: reqwest::Client,
}

impl HttpRedirectResolver {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(PER_URL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpRedirectResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RedirectResolver for HttpRedirectResolver {
    fn resolve<'a>(&'a self, url: &'a str) -> ResolveFuture<'a> {
        Box::pin(async move {
            let mut current = url.to_string();
            for _ in 0..MAX_HOPS {
                let response = match self.client.head(&current).send().await {
                    Ok(response) => response,
                    Err(err) => {
                        debug!(url = %current, error = %err, "redirect hop failed");
                        return None;
                    }
                };
                if !response.status().is_redirection() {
                    return Some(current);
                }
                let Some(location) = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                else {
                    return None;
                };
                current = match Url::parse(&current).ok().and_then(|base| base.join(location).ok())
                {
                    Some(joined) => joined.to_string(),
                    None => return None,
                };
            }
            None
        })
    }
}
