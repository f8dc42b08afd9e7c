// Ingestion path
// Crawled pages and loaded documents become content units in the index store


use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::content::{ContentUnit, DEFAULT_MIN_CONTENT_LENGTH};
use crate::crawler::{ScrapedPage, WebsiteCrawler};
use crate::index::IndexStore;
use crate::loader::DocumentLoader;
use crate::{RagError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebsiteIngestReport {
    pub pages_visited: usize,
    pub pages_scraped: usize,
    pub pages_pending: usize,
    pub failed_fetches: usize,
    pub units_indexed: usize,
    pub skipped_short: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentIngestReport {
    pub files_found: usize,
    pub units_indexed: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct Indexer {
    index: Arc<IndexStore>,
    min_content_length: usize,
}

impl Indexer {
    #[inline]
    pub fn new(index: Arc<IndexStore>) -> Self {
        Self {
            index,
            min_content_length: DEFAULT_MIN_CONTENT_LENGTH,
        }
    }

    #[inline]
    pub fn with_min_content_length(mut self, min_content_length: usize) -> Self {
        self.min_content_length = min_content_length;
        self
    }

    /// Crawl the website and index every page with enough content.
    /// `clear` wipes the collection before anything is inserted.
    #[inline]
    pub async fn ingest_website(
        &self,
        crawler: &WebsiteCrawler,
        clear: bool,
    ) -> Result<WebsiteIngestReport> {
        let start_time = Instant::now();
        self.prepare(clear).await?;

        let report = crawler.crawl().await;
        let (units_indexed, skipped_short) = self.ingest_pages(&report.pages).await?;

        let summary = WebsiteIngestReport {
            pages_visited: report.visited.len(),
            pages_scraped: report.pages.len(),
            pages_pending: report.pending.len(),
            failed_fetches: report.failed_fetches,
            units_indexed,
            skipped_short,
            duration: start_time.elapsed(),
        };
        info!(
            "Website ingest finished: {} pages visited, {} units indexed in {:.2}s",
            summary.pages_visited,
            summary.units_indexed,
            summary.duration.as_secs_f64()
        );
        Ok(summary)
    }

    /// Index scraped pages; returns (indexed, skipped as too short)
    #[inline]
    pub async fn ingest_pages(&self, pages: &[ScrapedPage]) -> Result<(usize, usize)> {
        let units: Vec<ContentUnit> = pages
            .iter()
            .filter_map(|page| {
                let unit = page.to_unit(self.min_content_length);
                if unit.is_none() {
                    debug!("Skipping short page {}", page.url);
                }
                unit
            })
            .collect();
        let skipped = pages.len() - units.len();

        if units.is_empty() {
            warn!("No scraped pages had enough content to index");
            return Ok((0, skipped));
        }

        let indexed = self.index.add_units(&units).await?;
        Ok((indexed, skipped))
    }

    /// Load the document folder and index every readable file.
    /// `clear` wipes the collection before anything is inserted.
    #[inline]
    pub async fn ingest_documents(
        &self,
        loader: &DocumentLoader,
        clear: bool,
    ) -> Result<DocumentIngestReport> {
        let start_time = Instant::now();
        self.prepare(clear).await?;

        let task_loader = loader.clone();
        let (files_found, units) = tokio::task::spawn_blocking(move || {
            let stats = task_loader.stats();
            (stats.total_files, task_loader.load_all())
        })
        .await
        .map_err(|e| RagError::Other(anyhow::anyhow!("Document loading task failed: {}", e)))?;

        let units_indexed = if units.is_empty() {
            warn!("No documents found in {}", loader.context_dir().display());
            0
        } else {
            self.index.add_units(&units).await?
        };

        let summary = DocumentIngestReport {
            files_found,
            units_indexed,
            duration: start_time.elapsed(),
        };
        info!(
            "Document ingest finished: {} files, {} units indexed",
            summary.files_found, summary.units_indexed
        );
        Ok(summary)
    }

    async fn prepare(&self, clear: bool) -> Result<()> {
        if clear {
            info!("Clearing collection {} before ingest", self.index.collection());
            self.index.clear().await
        } else {
            self.index.ensure_collection().await
        }
    }
}
