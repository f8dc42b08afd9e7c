pub mod extractor;


use anyhow::{Context, Result, anyhow};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use ureq::Agent;
use url::Url;

use self::extractor::extract_page;
use crate::content::{ContentMetadata, ContentType, ContentUnit};

/// File extensions that never point at an HTML page
const DENIED_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "gif", "svg", "webp", "ico", "css", "js", "zip", "tar", "gz",
    "rar", "mp4", "mp3", "avi", "mov", "woff", "woff2",
];

/// Path fragments of known non-content areas
const DENIED_PATH_SUBSTRINGS: &[&str] = &[
    "/wp-content/uploads/",
    "/wp-includes/",
    "mailto:",
    "tel:",
    "javascript:",
];

/// Configuration for the website crawler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Where the crawl starts; also defines the host that is in scope
    pub base_url: String,
    /// Page budget: the crawl never visits more pages than this
    pub max_pages: usize,
    /// Number of pages fetched concurrently per batch
    pub batch_size: usize,
    /// Pause between batches in milliseconds
    pub delay_ms: u64,
    /// Timeout for each HTTP request in seconds
    pub timeout_seconds: u64,
    /// Pages whose extracted text is not longer than this are not kept
    pub min_content_length: usize,
    /// Stop the crawl after this many fetch failures in a row
    pub max_consecutive_failures: usize,
    /// User agent string to use for requests
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            base_url: "https://emvidros.com.br".to_string(),
            max_pages: 100,
            batch_size: 5,
            delay_ms: 1000,
            timeout_seconds: 30,
            min_content_length: 100,
            max_consecutive_failures: 50,
            user_agent: "shop-rag/0.1.0 (Website Indexer)".to_string(),
        }
    }
}

/// Validate and normalize a URL
#[inline]
pub fn validate_url(url_str: &str) -> Result<Url> {
    let url = Url::parse(url_str).with_context(|| format!("Invalid URL format: {}", url_str))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(anyhow!("URL must use HTTP or HTTPS scheme: {}", url_str));
    }

    if url.host_str().is_none() {
        return Err(anyhow!("URL must have a valid host: {}", url_str));
    }

    Ok(url)
}

/// Decides which URLs belong to a crawl: same host as the base URL, http(s)
/// scheme, and no denylisted extension or path fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlScope {
    host: Option<String>,
    port: Option<u16>,
}

impl UrlScope {
    #[inline]
    pub fn new(base_url: &Url) -> Self {
        Self {
            host: base_url.host_str().map(str::to_lowercase),
            port: base_url.port_or_known_default(),
        }
    }

    /// Check whether a URL is inside the crawl scope
    #[inline]
    pub fn is_valid(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }

        let host = url.host_str().map(str::to_lowercase);
        if host.is_none() || host != self.host || url.port_or_known_default() != self.port {
            return false;
        }

        let path = url.path().to_lowercase();
        if DENIED_PATH_SUBSTRINGS
            .iter()
            .any(|fragment| path.contains(fragment))
        {
            return false;
        }

        !has_denied_extension(&path)
    }

    /// String variant of [`UrlScope::is_valid`]; unparseable URLs are out of scope
    #[inline]
    pub fn is_valid_str(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|url| self.is_valid(&url))
    }
}

fn has_denied_extension(path: &str) -> bool {
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    last_segment
        .rsplit_once('.')
        .is_some_and(|(_, extension)| DENIED_EXTENSIONS.contains(&extension))
}

/// Breadth-first crawl state: pending URLs plus everything already visited.
///
/// A URL is visited at most once and is never queued while it is pending,
/// being fetched, visited, or has already failed.
#[derive(Debug, Default)]
pub struct Frontier {
    pending: VecDeque<Url>,
    queued: HashSet<String>,
    in_flight: HashSet<String>,
    visited: HashSet<String>,
    visited_order: Vec<Url>,
    failed: HashSet<String>,
}

impl Frontier {
    #[inline]
    pub fn new(seed: Url) -> Self {
        let mut frontier = Self::default();
        frontier.push(seed);
        frontier
    }

    /// Queue a URL; returns false if it was already known
    #[inline]
    pub fn push(&mut self, url: Url) -> bool {
        let key = url.as_str();
        if self.visited.contains(key)
            || self.queued.contains(key)
            || self.in_flight.contains(key)
            || self.failed.contains(key)
        {
            return false;
        }

        self.queued.insert(key.to_string());
        self.pending.push_back(url);
        true
    }

    /// Dequeue up to `size` URLs in FIFO order. They stay in flight until
    /// marked visited or failed.
    #[inline]
    pub fn next_batch(&mut self, size: usize) -> Vec<Url> {
        let mut batch = Vec::with_capacity(size.min(self.pending.len()));
        while batch.len() < size {
            let Some(url) = self.pending.pop_front() else {
                break;
            };
            if let Some(key) = self.queued.take(url.as_str()) {
                self.in_flight.insert(key);
            }
            batch.push(url);
        }
        batch
    }

    /// Record a successfully fetched URL; returns false if it was already visited
    #[inline]
    pub fn mark_visited(&mut self, url: &Url) -> bool {
        self.in_flight.remove(url.as_str());
        if !self.visited.insert(url.as_str().to_string()) {
            return false;
        }
        self.visited_order.push(url.clone());
        true
    }

    #[inline]
    pub fn mark_failed(&mut self, url: &Url) {
        self.in_flight.remove(url.as_str());
        self.failed.insert(url.as_str().to_string());
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn visited_count(&self) -> usize {
        self.visited_order.len()
    }

    /// Visited URLs in the order they were fetched
    #[inline]
    pub fn visited(&self) -> &[Url] {
        &self.visited_order
    }

    /// URLs still waiting to be fetched
    #[inline]
    pub fn pending(&self) -> impl Iterator<Item = &Url> {
        self.pending.iter()
    }
}

/// One page kept by a crawl
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    pub title: String,
    pub description: String,
    pub content: String,
    /// Length of `content` in characters
    pub content_length: usize,
}

impl ScrapedPage {
    /// Convert into an indexable unit, or `None` when the content is too short
    #[inline]
    pub fn to_unit(&self, min_length: usize) -> Option<ContentUnit> {
        let metadata = ContentMetadata::new("website", ContentType::Website)
            .with_url(self.url.as_str())
            .with_title(self.title.as_str())
            .with_description(self.description.as_str());
        ContentUnit::new(&self.content, metadata, min_length)
    }
}

/// Outcome of a crawl run
#[derive(Debug, Clone)]
pub struct CrawlReport {
    /// Pages with enough content to keep, in visit order
    pub pages: Vec<ScrapedPage>,
    /// Every URL fetched successfully, in visit order
    pub visited: Vec<Url>,
    /// URLs discovered but never fetched
    pub pending: Vec<Url>,
    /// URLs whose fetch failed
    pub failed_fetches: usize,
    /// Pages fetched but whose markup could not be processed
    pub failed_extractions: usize,
    pub duration: Duration,
}

/// Blocking HTTP client used by the crawler; fetches run on the blocking pool
#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: Agent,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration
    #[inline]
    pub fn new(config: &CrawlerConfig) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .user_agent(&config.user_agent)
            .build()
            .into();

        Self { agent }
    }

    /// Fetch a page body; anything other than HTTP 200 is an error
    #[inline]
    pub fn fetch(&self, url: &str) -> Result<String> {
        debug!("Making HTTP GET request to: {}", url);

        match self.agent.get(url).call() {
            Ok(mut response) => {
                let status = response.status().as_u16();
                if status != 200 {
                    return Err(anyhow!("HTTP error {}", status));
                }
                let text = response
                    .body_mut()
                    .read_to_string()
                    .with_context(|| format!("Failed to read response body from {}", url))?;
                debug!("Successfully read {} bytes from {}", text.len(), url);
                Ok(text)
            }
            Err(ureq::Error::StatusCode(code)) => Err(anyhow!("HTTP error {}", code)),
            Err(e) => Err(anyhow::Error::from(e))
                .with_context(|| format!("Failed to make HTTP request to {}", url)),
        }
    }

    /// Fetch every URL of a batch concurrently, one blocking task per URL
    #[inline]
    pub async fn fetch_batch(&self, urls: Vec<Url>) -> Vec<(Url, Result<String>)> {
        let tasks = urls.into_iter().map(|url| {
            let client = self.clone();
            async move {
                let target = url.to_string();
                let result = tokio::task::spawn_blocking(move || client.fetch(&target))
                    .await
                    .unwrap_or_else(|e| Err(anyhow!("Fetch task failed: {}", e)));
                (url, result)
            }
        });

        join_all(tasks).await
    }
}

/// Breadth-first website crawler bounded by a page budget
#[derive(Debug)]
pub struct WebsiteCrawler {
    client: HttpClient,
    config: CrawlerConfig,
    base_url: Url,
    scope: UrlScope,
}

impl WebsiteCrawler {
    #[inline]
    pub fn new(config: CrawlerConfig) -> Result<Self> {
        let base_url = validate_url(&config.base_url)?;
        let scope = UrlScope::new(&base_url);
        let client = HttpClient::new(&config);

        Ok(Self {
            client,
            config,
            base_url,
            scope,
        })
    }

    #[inline]
    pub fn scope(&self) -> &UrlScope {
        &self.scope
    }

    /// Crawl from the base URL until the frontier is empty, the page budget is
    /// spent, or too many fetches fail in a row. Whatever was gathered so far
    /// is always returned.
    #[inline]
    pub async fn crawl(&self) -> CrawlReport {
        let start_time = Instant::now();
        info!(
            "Starting crawl of {} (max {} pages)",
            self.base_url, self.config.max_pages
        );

        let mut frontier = Frontier::new(self.base_url.clone());
        let mut pages = Vec::new();
        let mut failed_fetches = 0;
        let mut failed_extractions = 0;
        let mut consecutive_failures = 0;
        let batch_size = self.config.batch_size.max(1);

        let bar = if console::user_attended_stderr() {
            ProgressBar::new(self.config.max_pages as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Crawling {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            )
        } else {
            ProgressBar::hidden()
        };

        while !frontier.is_empty() && frontier.visited_count() < self.config.max_pages {
            let room = self.config.max_pages - frontier.visited_count();
            let batch = frontier.next_batch(batch_size.min(room));
            if batch.is_empty() {
                break;
            }

            debug!("Fetching batch of {} URLs", batch.len());
            for (url, result) in self.client.fetch_batch(batch).await {
                let html = match result {
                    Ok(html) => html,
                    Err(e) => {
                        warn!("Failed to fetch {}: {:#}", url, e);
                        frontier.mark_failed(&url);
                        failed_fetches += 1;
                        consecutive_failures += 1;
                        continue;
                    }
                };
                consecutive_failures = 0;

                if !frontier.mark_visited(&url) {
                    continue;
                }
                bar.set_message(url.to_string());
                bar.set_position(frontier.visited_count() as u64);

                let page = match extract_page(&html, &url, &self.scope) {
                    Ok(page) => page,
                    Err(e) => {
                        error!("Content extraction failed for {}: {:#}", url, e);
                        failed_extractions += 1;
                        continue;
                    }
                };

                let content_length = page.text.chars().count();
                if content_length > self.config.min_content_length {
                    info!("Scraped: {} ({} chars)", url, content_length);
                    pages.push(ScrapedPage {
                        url: url.to_string(),
                        title: page.title,
                        description: page.description,
                        content: page.text,
                        content_length,
                    });
                } else {
                    debug!("Skipping {}: only {} chars of text", url, content_length);
                }

                for link in page.links {
                    frontier.push(link);
                }
            }

            if consecutive_failures >= self.config.max_consecutive_failures {
                warn!(
                    "Stopping crawl after {} consecutive fetch failures",
                    consecutive_failures
                );
                break;
            }

            if !frontier.is_empty() && frontier.visited_count() < self.config.max_pages {
                sleep(Duration::from_millis(self.config.delay_ms)).await;
            }
        }

        bar.finish_and_clear();

        let report = CrawlReport {
            pages,
            visited: frontier.visited().to_vec(),
            pending: frontier.pending().cloned().collect(),
            failed_fetches,
            failed_extractions,
            duration: start_time.elapsed(),
        };

        info!(
            "Crawl completed for {}: {} visited, {} kept, {} failed, {} still pending, took {:?}",
            self.base_url,
            report.visited.len(),
            report.pages.len(),
            report.failed_fetches,
            report.pending.len(),
            report.duration
        );

        report
    }
}
