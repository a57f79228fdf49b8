//! Document loader: URL policy, fetching, and normalization.
//!
//! A web origin goes through three steps:
//!
//! 1. **Policy**: [`check_url`] rejects malformed URLs, non-HTTP schemes
//!    and blocklisted domains. A rejection is a [`LoadOutcome::Blocked`]
//!    value, and no request is made.
//! 2. **Fetch**: a [`Fetch`] implementation retrieves the body. Network
//!    and HTTP failures become [`RagError::Fetch`].
//! 3. **Extract**: JSON bodies go through [`extract_json`], everything
//!    else through [`extract_html`]. Extraction never fails the load.
//!
//! PDF uploads skip the first two steps; see [`load_pdf`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LoaderConfig;
use crate::error::{RagError, RagResult};
use crate::extract::{extract_html, extract_json, extract_pdf};
use crate::models::{SourceDocument, SourceKind};

/// Shown to the user when a URL is rejected by policy.
pub const BLOCKED_MESSAGE: &str =
    "このURLは読み込めません。お手数をおかけしますが別のURLをお試し下さい。";

/// Result of loading a web origin.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(SourceDocument),
    /// Rejected by policy. Carries the reason for logs.
    Blocked(String),
}

/// Raw response body as returned by a [`Fetch`] implementation.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub content_type: Option<String>,
    pub body: String,
}

/// Retrieves the body behind a URL.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage>;
}

/// [`Fetch`] over `reqwest`, bounded by a timeout and a body size cap.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &LoaderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        let mut resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("HTTP {}", status);
        }
        if let Some(len) = resp.content_length() {
            if len as usize > self.max_bytes {
                bail!("response of {} bytes exceeds limit of {}", len, self.max_bytes);
            }
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        // Chunked responses carry no length; stop reading at the cap.
        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            if body.len() + chunk.len() > self.max_bytes {
                bail!("response exceeds limit of {} bytes", self.max_bytes);
            }
            body.extend_from_slice(&chunk);
        }
        Ok(FetchedPage {
            content_type,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Apply the URL policy. Returns the parsed URL or the rejection reason.
///
/// A domain is blocked when the host equals a blocklist entry or is a
/// subdomain of one (`www.instagram.com` matches `instagram.com`).
pub fn check_url(origin: &str, blocked_domains: &[String]) -> std::result::Result<Url, String> {
    let origin = origin.trim();
    if origin.is_empty() {
        return Err("empty URL".to_string());
    }
    let url = Url::parse(origin).map_err(|e| format!("malformed URL: {}", e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme: {}", url.scheme()));
    }
    let host = url
        .host_str()
        .ok_or_else(|| "URL has no host".to_string())?
        .trim_end_matches('.')
        .to_lowercase();
    for domain in blocked_domains {
        let domain = domain.trim().trim_start_matches('.').to_lowercase();
        if domain.is_empty() {
            continue;
        }
        if host == domain || host.ends_with(&format!(".{}", domain)) {
            return Err(format!("domain {} is blocked", domain));
        }
    }
    Ok(url)
}

/// Fetches web origins under the configured policy.
pub struct Loader {
    fetcher: Arc<dyn Fetch>,
    blocked_domains: Vec<String>,
}

impl Loader {
    pub fn new(config: &LoaderConfig, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            fetcher,
            blocked_domains: config.blocked_domains.clone(),
        }
    }

    /// Loader backed by [`HttpFetcher`].
    pub fn from_config(config: &LoaderConfig) -> Result<Self> {
        Ok(Self::new(config, Arc::new(HttpFetcher::new(config)?)))
    }

    /// `true` when `origin` would be rejected without a fetch.
    pub fn is_blocked(&self, origin: &str) -> bool {
        check_url(origin, &self.blocked_domains).is_err()
    }

    pub async fn load_url(&self, origin: &str) -> RagResult<LoadOutcome> {
        let url = match check_url(origin, &self.blocked_domains) {
            Ok(url) => url,
            Err(reason) => {
                debug!(origin, %reason, "url blocked");
                return Ok(LoadOutcome::Blocked(reason));
            }
        };

        let page = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|e| RagError::Fetch {
                origin: origin.to_string(),
                reason: format!("{:#}", e),
            })?;

        let extracted = if is_json(&page) {
            match serde_json::from_str::<serde_json::Value>(&page.body) {
                Ok(value) => extract_json(&value),
                Err(e) => {
                    warn!(origin, error = %e, "invalid JSON body, reading as HTML");
                    extract_html(&page.body)
                }
            }
        } else {
            extract_html(&page.body)
        };

        debug!(
            origin,
            fields = extracted.fields.len(),
            chars = extracted.text.chars().count(),
            "page loaded"
        );
        Ok(LoadOutcome::Loaded(SourceDocument {
            origin: origin.trim().to_string(),
            kind: SourceKind::Web,
            raw_text: extracted.text,
            extracted_fields: extracted.fields,
        }))
    }
}

fn is_json(page: &FetchedPage) -> bool {
    match &page.content_type {
        Some(ct) => ct.contains("json"),
        None => {
            let head = page.body.trim_start();
            head.starts_with('{') || head.starts_with('[')
        }
    }
}

/// Normalize an uploaded PDF into a [`SourceDocument`].
///
/// Unreadable pages contribute empty text. A file that cannot be opened
/// at all yields a document with empty text, which ingests as zero chunks.
pub fn load_pdf(bytes: &[u8], filename: &str) -> SourceDocument {
    let raw_text = match extract_pdf(bytes) {
        Ok(pdf) => {
            for issue in &pdf.issues {
                warn!(filename, %issue, "page skipped");
            }
            pdf.joined()
        }
        Err(e) => {
            warn!(filename, error = %e, "PDF unreadable");
            String::new()
        }
    };
    SourceDocument {
        origin: filename.to_string(),
        kind: SourceKind::Pdf,
        raw_text,
        extracted_fields: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn blocklist() -> Vec<String> {
        LoaderConfig::default().blocked_domains
    }

    struct CountingFetcher {
        calls: AtomicUsize,
        page: FetchedPage,
    }

    #[async_trait]
    impl Fetch for CountingFetcher {
        async fn fetch(&self, _url: &Url) -> Result<FetchedPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.page.clone())
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl Fetch for FailingFetcher {
        async fn fetch(&self, _url: &Url) -> Result<FetchedPage> {
            bail!("connection refused")
        }
    }

    #[test]
    fn test_policy() {
        let list = blocklist();
        assert!(check_url("https://example.com/post", &list).is_ok());
        assert!(check_url("https://www.instagram.com/p/abc", &list).is_err());
        assert!(check_url("https://instagram.com", &list).is_err());
        assert!(check_url("https://notinstagram.com", &list).is_ok());
        assert!(check_url("not a url", &list).is_err());
        assert!(check_url("ftp://example.com/file", &list).is_err());
        assert!(check_url("   ", &list).is_err());
    }

    #[tokio::test]
    async fn test_blocked_url_is_never_fetched() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            page: FetchedPage {
                content_type: None,
                body: String::new(),
            },
        });
        let loader = Loader::new(&LoaderConfig::default(), fetcher.clone());
        let outcome = loader.load_url("https://x.com/someone").await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Blocked(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_json_body_uses_key_extraction() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            page: FetchedPage {
                content_type: Some("application/json; charset=utf-8".into()),
                body: r#"{"title": "夏", "body": "海へ行こう"}"#.into(),
            },
        });
        let loader = Loader::new(&LoaderConfig::default(), fetcher);
        match loader.load_url("https://example.com/api").await.unwrap() {
            LoadOutcome::Loaded(doc) => {
                assert_eq!(doc.kind, SourceKind::Web);
                assert_eq!(doc.extracted_fields["title"], "夏");
                assert_eq!(doc.raw_text, "夏\n海へ行こう");
            }
            LoadOutcome::Blocked(r) => panic!("unexpected block: {}", r),
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_is_fetch_error() {
        let loader = Loader::new(&LoaderConfig::default(), Arc::new(FailingFetcher));
        let err = loader.load_url("https://example.com").await.unwrap_err();
        assert!(matches!(err, RagError::Fetch { .. }));
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_corrupt_pdf_degrades_to_empty_text() {
        let doc = load_pdf(b"not a pdf", "plots.pdf");
        assert_eq!(doc.origin, "plots.pdf");
        assert_eq!(doc.kind, SourceKind::Pdf);
        assert!(doc.raw_text.is_empty());
    }
}
