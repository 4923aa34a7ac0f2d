//! Triage - command line front end for the mail triage engine
//!
//! Syncs a Gmail mailbox into the local cache and answers queries from it.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use triage::{
    EngineConfig, GmailAuth, GmailClient, GmailCredentials, LexicalIndex, MailService,
    MessageSummary, OllamaClient, OllamaEmbedder, OllamaGenerator, SqliteMailStore,
};

const DATABASE_FILE: &str = "mail.db";
const SEARCH_INDEX_DIR: &str = "search-index";

#[derive(Parser)]
#[command(name = "triage")]
#[command(about = "Sync, sort and search a Gmail inbox from a local cache.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch changes since the last sync
    Sync,

    /// Sync one page of older mail
    History {
        /// Page token from a previous call. If omitted, walks all pages.
        #[arg(value_name = "TOKEN")]
        token: Option<String>,
    },

    /// List channels with message counts
    Channels,

    /// List messages, newest first
    List {
        /// Only messages in this channel
        #[arg(value_name = "CHANNEL")]
        channel: Option<String>,
    },

    /// Print a message body
    Body {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Search messages by keywords and meaning
    Search {
        #[arg(value_name = "QUERY", required = true)]
        query: Vec<String>,
    },

    /// Messages similar to a given one
    Related {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Summarize a message
    Summarize {
        #[arg(value_name = "ID")]
        id: String,

        /// Regenerate even if a summary is cached
        #[arg(long)]
        force: bool,
    },

    /// Move a message to the trash
    Trash {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Sync on a schedule until interrupted
    Watch,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    if let Err(e) = run(cli.command) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    let service = build_service()?;

    match command {
        Command::Sync => {
            let report = service.sync_messages_blocking()?;
            println!("{}", report);
        }
        Command::History { token } => match token {
            Some(token) => println!("{}", service.sync_historical_messages(&token)?),
            None => {
                let cancel = AtomicBool::new(false);
                println!("{}", service.sync_history(&cancel, None)?);
            }
        },
        Command::Channels => {
            for channel in service.get_channels()? {
                println!("{:>6}  {}", channel.message_count, channel.name);
            }
        }
        Command::List { channel } => print_messages(&service.get_messages(channel.as_deref())?),
        Command::Body { id } => {
            let body = service.get_message_body(&id)?;
            println!("{}", body.plain_text());
        }
        Command::Search { query } => {
            let query = query.join(" ");
            if query.trim().is_empty() {
                bail!("search needs a query");
            }
            let outcome = service.search(&query)?;
            if outcome.degraded {
                warn!("Embedding service unavailable; results ranked by keywords only");
            }
            print_messages(&outcome.messages);
        }
        Command::Related { id } => print_messages(&service.related_messages(&id)?),
        Command::Summarize { id, force } => {
            let summary = service.summarize_email(&id, force)?;
            println!("{}", summary.text);
        }
        Command::Trash { id } => {
            let outcome = service.trash_message(&id)?;
            println!("{:?}", outcome);
        }
        Command::Watch => {
            let _scheduler = service.start_scheduler()?;
            info!(
                "Syncing every {}s; press Ctrl-C to stop",
                service.config().sync_interval_secs
            );
            loop {
                std::thread::sleep(Duration::from_secs(3600));
            }
        }
    }

    service.wait_for_indexing(Duration::from_secs(30));
    Ok(())
}

fn print_messages(messages: &[MessageSummary]) {
    for message in messages {
        match serde_json::to_string(message) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to format message {}: {}", message.id, e),
        }
    }
}

fn data_dir() -> Result<PathBuf> {
    let dir = config::data_dir().context("Could not determine data directory")?;
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}

fn build_service() -> Result<MailService> {
    let engine = EngineConfig::load()?;
    let data_dir = data_dir()?;

    let store = Arc::new(SqliteMailStore::open(data_dir.join(DATABASE_FILE))?);
    let lexical = LexicalIndex::open(data_dir.join(SEARCH_INDEX_DIR))?;

    let creds = match GmailCredentials::load() {
        Ok(creds) => creds,
        Err(e) => {
            if let Some(path) = GmailCredentials::default_credentials_path() {
                warn!(
                    "To configure Gmail access, either:\n\
                     1. Place your Google OAuth credentials at: {}\n\
                     2. Or set environment variables: TRIAGE_GMAIL_CLIENT_ID and \
                     TRIAGE_GMAIL_CLIENT_SECRET",
                    path.display()
                );
            }
            return Err(e.context("Gmail credentials not found"));
        }
    };
    let auth = GmailAuth::new(creds.client_id, creds.client_secret)?;
    let provider = Arc::new(GmailClient::new(auth, engine.retry));

    let ollama = OllamaClient::from_config(&engine.ollama);
    let embedder = Arc::new(OllamaEmbedder::new(
        ollama.clone(),
        engine.ollama.embed_model.clone(),
    ));
    let generator = Arc::new(OllamaGenerator::new(ollama, engine.ollama.summary_model.clone()));

    let service = MailService::builder(store, provider, generator)
        .embedder(embedder)
        .lexical_index(lexical)
        .config(engine)
        .build()?;
    info!("Mail service ready");
    Ok(service)
}
