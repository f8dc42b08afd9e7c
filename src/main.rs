use clap::{Parser, Subcommand};
use shop_rag::commands::{
    Services, ask, chat, clear_index, delete_session, list_sessions, load_documents,
    prune_sessions, scrape, show_session, show_stats,
};
use shop_rag::config::{Config, get_config_dir, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shop-rag")]
#[command(about = "Answers customer questions from a shop's website and documents")]
#[command(version)]
struct Cli {
    /// Configuration directory (defaults to ~/.shop-rag)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding and completion services
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Crawl the website and index its pages
    Scrape {
        /// Start URL; overrides the configured website
        #[arg(long)]
        url: Option<String>,
        /// Maximum number of pages to visit
        #[arg(long)]
        max_pages: Option<usize>,
        /// Empty the collection before indexing
        #[arg(long)]
        clear: bool,
    },
    /// Index the documents of the context folder
    Load {
        /// Folder to load instead of the configured one
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Empty the collection before indexing
        #[arg(long)]
        clear: bool,
    },
    /// Send one message in a chat session
    Chat {
        /// Session id; a new one is generated when omitted
        #[arg(long)]
        session: Option<String>,
        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,
        message: String,
    },
    /// Ask a single question without session memory
    Ask {
        /// Number of sources to retrieve
        #[arg(long)]
        top_k: Option<usize>,
        question: String,
    },
    /// Inspect and manage stored chat sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Show index, document and model information
    Stats,
    /// Delete everything in the vector collection
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List sessions, most recently updated first
    List {
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Print the messages of a session
    Show {
        id: String,
        /// Maximum number of messages to print
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Delete a session and its messages
    Delete { id: String },
    /// Delete sessions not updated within the retention period
    Prune {
        /// Age in days; defaults to the configured retention
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_dir = get_config_dir(cli.config_dir)?;

    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&config_dir)?;
        } else {
            run_interactive_config(&config_dir)?;
        }
        return Ok(());
    }

    let config = Config::load(&config_dir)?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Scrape {
            url,
            max_pages,
            clear,
        } => {
            scrape(&config, url, max_pages, clear).await?;
        }
        Commands::Load { dir, clear } => {
            load_documents(&config, dir, clear).await?;
        }
        Commands::Chat {
            session,
            stream,
            message,
        } => {
            let services = Services::initialize(config).await?;
            chat(&services, session, &message, stream).await?;
        }
        Commands::Ask { top_k, question } => {
            let services = Services::initialize(config).await?;
            ask(&services, &question, top_k).await?;
        }
        Commands::Sessions { command } => match command {
            SessionCommands::List { limit } => list_sessions(&config, limit).await?,
            SessionCommands::Show { id, limit } => show_session(&config, &id, limit).await?,
            SessionCommands::Delete { id } => delete_session(&config, &id).await?,
            SessionCommands::Prune { days } => prune_sessions(&config, days).await?,
        },
        Commands::Stats => {
            let services = Services::initialize(config).await?;
            show_stats(&services).await?;
        }
        Commands::Clear { yes } => {
            clear_index(&config, yes).await?;
        }
    }

    Ok(())
}
