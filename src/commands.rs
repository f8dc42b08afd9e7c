use anyhow::{Context, Result};
use console::style;
use dialoguer::Confirm;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::completion::OpenAiClient;
use crate::config::Config;
use crate::crawler::WebsiteCrawler;
use crate::database::Database;
use crate::database::lancedb::LanceVectorStore;
use crate::embeddings::OllamaClient;
use crate::index::{IndexStore, RetrievedSource};
use crate::indexer::Indexer;
use crate::loader::DocumentLoader;
use crate::memory::SessionStore;
use crate::rag::{RagOrchestrator, RagSettings};
use crate::router::RegexIntentRouter;

/// Every long-lived service, built once per process and passed by reference
#[derive(Debug)]
pub struct Services {
    pub config: Config,
    pub index: Arc<IndexStore>,
    pub orchestrator: RagOrchestrator,
}

impl Services {
    #[inline]
    pub async fn initialize(config: Config) -> Result<Self> {
        let index = open_index(&config).await?;
        let sessions = open_sessions(&config).await?;

        let completion = OpenAiClient::new(&config.completion, config.api_key())
            .context("Failed to initialize completion client")?;
        let router = RegexIntentRouter::new(config.support.email.as_str());

        let orchestrator = RagOrchestrator::new(
            sessions,
            Arc::clone(&index),
            Box::new(router),
            Arc::new(completion),
            RagSettings::from_config(&config),
        );

        Ok(Self {
            config,
            index,
            orchestrator,
        })
    }
}

#[inline]
pub async fn open_index(config: &Config) -> Result<Arc<IndexStore>> {
    let backend = LanceVectorStore::connect(&config.vector_database_path())
        .await
        .context("Failed to initialize LanceDB vector store")?;
    let embedder = OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?;

    Ok(Arc::new(IndexStore::new(
        Arc::new(backend),
        Arc::new(embedder),
        config.index.collection.as_str(),
    )))
}

#[inline]
pub async fn open_sessions(config: &Config) -> Result<SessionStore> {
    let database = Database::new(config.database_path())
        .await
        .context("Failed to initialize session database")?;
    Ok(SessionStore::new(database).with_max_history(config.memory.max_history))
}

/// Crawl the website and index what was found
#[inline]
pub async fn scrape(
    config: &Config,
    url: Option<String>,
    max_pages: Option<usize>,
    clear: bool,
) -> Result<()> {
    let mut crawler_config = config.crawler.clone();
    if let Some(url) = url {
        crawler_config.base_url = url;
    }
    if let Some(max_pages) = max_pages {
        crawler_config.max_pages = max_pages;
    }

    println!(
        "{} {}",
        style("Scraping").bold().cyan(),
        crawler_config.base_url
    );

    let crawler = WebsiteCrawler::new(crawler_config)?;
    let indexer = Indexer::new(open_index(config).await?)
        .with_min_content_length(config.documents.min_content_length);
    let report = indexer.ingest_website(&crawler, clear).await?;

    println!("{}", style("✓ Scrape completed").green());
    println!("  Pages visited: {}", report.pages_visited);
    println!("  Pages with content: {}", report.pages_scraped);
    println!("  Failed fetches: {}", report.failed_fetches);
    println!("  Units indexed: {}", report.units_indexed);
    if report.skipped_short > 0 {
        println!("  Skipped (too short): {}", report.skipped_short);
    }
    if report.pages_pending > 0 {
        println!("  Discovered but not visited: {}", report.pages_pending);
    }
    println!("  Duration: {:.2}s", report.duration.as_secs_f64());

    Ok(())
}

/// Load the document folder and index it
#[inline]
pub async fn load_documents(config: &Config, dir: Option<PathBuf>, clear: bool) -> Result<()> {
    let context_dir = dir.unwrap_or_else(|| config.context_dir());
    let loader = DocumentLoader::new(context_dir.as_path())
        .with_min_content_length(config.documents.min_content_length);
    let indexer = Indexer::new(open_index(config).await?);

    let report = indexer.ingest_documents(&loader, clear).await?;

    println!("{}", style("✓ Documents loaded").green());
    println!("  Folder: {}", context_dir.display());
    println!("  Supported files: {}", report.files_found);
    println!("  Units indexed: {}", report.units_indexed);

    Ok(())
}

/// Run one chat turn and print the answer
#[inline]
pub async fn chat(
    services: &Services,
    session: Option<String>,
    message: &str,
    stream: bool,
) -> Result<()> {
    let session_id = session.unwrap_or_else(|| {
        let id = Uuid::new_v4().to_string();
        println!("{} {}", style("Session:").dim(), id);
        id
    });

    let reply = if stream {
        let reply = services
            .orchestrator
            .chat_stream(message, &session_id, |chunk| {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            })
            .await;
        println!();
        reply
    } else {
        let reply = services.orchestrator.chat(message, &session_id).await;
        println!("{}", reply.response);
        reply
    };

    if !reply.success && stream {
        println!("{}", reply.response);
    }
    if let Some(route) = reply.routed_to {
        println!("{} {}", style("Routed to:").dim(), route);
    }
    print_sources(&reply.sources);

    Ok(())
}

/// Answer a single question without session memory
#[inline]
pub async fn ask(services: &Services, question: &str, top_k: Option<usize>) -> Result<()> {
    let reply = services.orchestrator.query(question, top_k).await;
    println!("{}", reply.response);
    print_sources(&reply.sources);
    Ok(())
}

fn print_sources(sources: &[RetrievedSource]) {
    if sources.is_empty() {
        return;
    }

    println!();
    println!("{}", style("Fontes:").bold().yellow());
    for (position, source) in sources.iter().enumerate() {
        let location = source
            .metadata
            .url
            .as_deref()
            .or(source.metadata.filename.as_deref())
            .unwrap_or(source.metadata.source.as_str());
        println!(
            "  {}. {} ({}) [{:.3}]",
            position + 1,
            source.metadata.title,
            location,
            source.score
        );
    }
}

#[inline]
pub async fn list_sessions(config: &Config, limit: Option<u32>) -> Result<()> {
    let sessions = open_sessions(config).await?;
    let list = sessions.list_sessions(limit).await;

    if list.is_empty() {
        println!("No chat sessions stored.");
        return Ok(());
    }

    println!(
        "Chat Sessions ({} shown of {}):",
        list.len(),
        sessions.session_count().await
    );
    println!();
    for session in &list {
        println!("💬 {}", session.session_id);
        println!("   Messages: {}", sessions.message_count(&session.session_id).await);
        println!(
            "   Created: {}",
            session.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!(
            "   Updated: {}",
            session.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

#[inline]
pub async fn show_session(config: &Config, session_id: &str, limit: Option<u32>) -> Result<()> {
    let sessions = open_sessions(config).await?;
    let session = sessions
        .get_session(session_id)
        .await
        .ok_or_else(|| anyhow::anyhow!("Session not found: {}", session_id))?;

    println!(
        "{} {} (updated {})",
        style("Session").bold().cyan(),
        session.session_id,
        session.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    for (key, value) in session.metadata_map() {
        println!("  {}: {}", key, value);
    }
    println!();

    for message in sessions.get_history(session_id, limit).await {
        println!(
            "[{}] {}:",
            message.timestamp.format("%H:%M:%S"),
            style(message.role).bold()
        );
        println!("{}", message.content);
        if let Some(metadata) = message
            .parsed_metadata()
            .filter(|metadata| !metadata.sources.is_empty())
        {
            println!(
                "{}",
                style(format!("  ({} sources)", metadata.sources.len())).dim()
            );
        }
        println!();
    }

    Ok(())
}

#[inline]
pub async fn delete_session(config: &Config, session_id: &str) -> Result<()> {
    let sessions = open_sessions(config).await?;
    if sessions.delete_session(session_id).await {
        println!("{} {}", style("✓ Deleted session").green(), session_id);
    } else {
        println!("Session not found: {}", session_id);
    }
    Ok(())
}

#[inline]
pub async fn prune_sessions(config: &Config, days: Option<u32>) -> Result<()> {
    let days = days.unwrap_or(config.memory.retention_days);
    let sessions = open_sessions(config).await?;
    let removed = sessions.prune(days).await;
    info!("Pruned {} sessions older than {} days", removed, days);
    println!(
        "{} {} sessions not updated in the last {} days",
        style("✓ Removed").green(),
        removed,
        days
    );
    Ok(())
}

#[inline]
pub async fn show_stats(services: &Services) -> Result<()> {
    let stats = services.orchestrator.stats().await;
    let loader = DocumentLoader::new(services.config.context_dir());
    let documents = tokio::task::spawn_blocking(move || loader.stats())
        .await
        .context("Document stats task failed")?;

    println!("{}", style("📊 Shop RAG Status").bold().cyan());
    println!();
    println!("{}", style("Vector Store:").bold().yellow());
    match stats.index {
        Some(index) => {
            println!("  Collection: {}", index.collection);
            println!("  Indexed units: {}", index.points_count);
            println!("  Dimension: {}", index.dimension);
        }
        None => println!("  {}", style("unavailable").red()),
    }

    println!();
    println!("{}", style("Documents:").bold().yellow());
    println!("  Folder: {}", services.config.context_dir().display());
    println!("  Supported files: {}", documents.total_files);
    for (extension, count) in &documents.by_extension {
        println!("    {}: {}", extension, count);
    }

    println!();
    println!("{}", style("Model:").bold().yellow());
    println!("  {}", stats.model);

    Ok(())
}

/// Drop and recreate the collection
#[inline]
pub async fn clear_index(config: &Config, yes: bool) -> Result<()> {
    let index = open_index(config).await?;

    if !yes
        && !Confirm::new()
            .with_prompt(format!(
                "Delete every indexed unit in {}? This cannot be undone",
                index.collection()
            ))
            .default(false)
            .interact()?
    {
        println!("Nothing deleted.");
        return Ok(());
    }

    index.clear().await?;
    println!(
        "{} {}",
        style("✓ Cleared collection").green(),
        index.collection()
    );
    Ok(())
}
