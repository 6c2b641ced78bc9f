use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use tgchat::config;
use tgchat::services::{seed_on_first_run, seed_store, MockChatSource, SettingsService};
use tgchat::{Conversation, ConversationStore, Message, Role};

#[derive(Parser)]
#[command(name = "tgchat")]
#[command(version, about = "Local chat store with pinned conversations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file (defaults to $TGCHAT_DB or the XDG data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List conversations, pinned first
    List,

    /// Find conversations by name
    Search { query: String },

    /// Start a new conversation
    New {
        name: String,
        #[arg(short, long)]
        avatar: Option<String>,
    },

    /// Send a message into a conversation
    Send {
        conversation_id: String,
        text: String,
        /// Record the message as coming from the peer
        #[arg(long)]
        friend: bool,
    },

    /// Show the messages of a conversation
    Messages { conversation_id: String },

    /// Pin or unpin a conversation
    Pin { conversation_id: String },

    /// Delete a conversation and all of its messages
    Delete { conversation_id: String },

    /// Delete a single message
    DeleteMessage { message_id: String },

    /// Import the built-in sample chats
    Seed,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let path = match cli.db {
        Some(path) => path,
        None => config::db_path()?,
    };
    let store = ConversationStore::open(&path)
        .await
        .with_context(|| format!("Failed to open chat store at {}", path.display()))?;

    let settings = SettingsService::load(store.database()).await;
    let store = store.with_preview_length(settings.preview_length);

    let source = MockChatSource::default();
    if !matches!(cli.command, Commands::Seed) {
        seed_on_first_run(&source, &store)
            .await
            .context("Failed to seed sample chats")?;
    }

    let result = execute(&store, &source, cli.command, cli.json).await;
    store.close().await.context("Failed to flush chat store")?;
    result
}

async fn execute(
    store: &ConversationStore,
    source: &MockChatSource,
    command: Commands,
    json: bool,
) -> Result<()> {
    match command {
        Commands::List => {
            let conversations = store.list_conversations().await?;
            print_conversations(&conversations, json)
        }
        Commands::Search { query } => {
            let conversations = store.search_conversations(&query).await?;
            print_conversations(&conversations, json)
        }
        Commands::New { name, avatar } => {
            let conversation = store.create_conversation(&name, avatar.as_deref()).await?;
            print_item(&conversation, json, |c| format!("{}  {}", c.id, c.name))
        }
        Commands::Send {
            conversation_id,
            text,
            friend,
        } => {
            let role = if friend { Role::Friend } else { Role::User };
            let message = store.send_message(&conversation_id, &text, role).await?;
            print_item(&message, json, |m| m.id.clone())
        }
        Commands::Messages { conversation_id } => {
            let messages = store.list_messages(&conversation_id).await?;
            print_messages(&messages, json)
        }
        Commands::Pin { conversation_id } => {
            let conversation = store.toggle_pin(&conversation_id).await?;
            print_item(&conversation, json, |c| {
                let state = if c.is_pinned { "pinned" } else { "unpinned" };
                format!("{} {}", c.name, state)
            })
        }
        Commands::Delete { conversation_id } => {
            store.delete_conversation(&conversation_id).await?;
            Ok(())
        }
        Commands::DeleteMessage { message_id } => {
            store.delete_message(&message_id).await?;
            Ok(())
        }
        Commands::Seed => {
            let summary = seed_store(source, store).await?;
            println!(
                "Imported {} conversations, {} messages",
                summary.conversations, summary.messages
            );
            Ok(())
        }
    }
}

fn print_item<T: Serialize>(item: &T, json: bool, text: impl Fn(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(item)?);
    } else {
        println!("{}", text(item));
    }
    Ok(())
}

fn print_conversations(conversations: &[Conversation], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(conversations)?);
        return Ok(());
    }
    for c in conversations {
        let pin = if c.is_pinned { "*" } else { " " };
        println!(
            "{} {}  {:<20} {}  {}",
            pin,
            c.id,
            c.name,
            c.last_message_at.format("%Y-%m-%d %H:%M"),
            c.last_message_preview.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn print_messages(messages: &[Message], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(messages)?);
        return Ok(());
    }
    for m in messages {
        let who = match m.role {
            Role::User => "you",
            Role::Friend => "them",
        };
        println!("[{}] {:>4}: {}", m.created_at.format("%H:%M"), who, m.text);
    }
    Ok(())
}
