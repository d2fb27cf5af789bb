use anyhow::Result;
use clap::{Parser, Subcommand};
use haven_chat::Role;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

/// Haven - tenant/manager chat over a local SQLite store
#[derive(Parser, Debug)]
#[command(name = "haven", author, version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "HAVEN_DB", default_value = "haven.db", global = true)]
    db: PathBuf,

    /// Directory attachments are stored under
    #[arg(long, env = "HAVEN_FILES", default_value = "haven-files", global = true)]
    files: PathBuf,

    /// Profile id to act as
    #[arg(short, long, env = "HAVEN_ACTOR", global = true)]
    actor: Option<String>,

    /// Messages fetched per history page
    #[arg(long, env = "HAVEN_PAGE_SIZE", default_value_t = 50, global = true)]
    page_size: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage user profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// List the actor's conversations with unread counts
    Conversations,
    /// Open (or create) the conversation with another user
    Start {
        /// Profile id of the other participant
        other: String,
    },
    /// Send a message
    Send {
        conversation: String,
        /// Message text
        #[arg(default_value = "")]
        text: String,
        /// File to attach (repeatable)
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
    /// Print the message history of a conversation
    History {
        conversation: String,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Mark every loaded message from the other participant as read
    Read { conversation: String },
    /// Follow a conversation and send lines typed on stdin
    Watch {
        conversation: String,
        /// Seconds between refreshes from the database
        #[arg(long, default_value_t = 2)]
        poll: u64,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    /// Create or replace a profile
    Add {
        id: String,
        name: String,
        /// admin, manager or tenant
        #[arg(long)]
        role: Role,
        #[arg(long)]
        avatar_url: Option<String>,
    },
    /// List all profiles
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init();

    let cli = Cli::parse();
    let ctx = commands::Context::open(&cli.db, &cli.files, cli.actor.clone(), cli.page_size).await?;

    match cli.command {
        Commands::Profile { action } => match action {
            ProfileAction::Add {
                id,
                name,
                role,
                avatar_url,
            } => commands::profile_add(&ctx, id, name, role, avatar_url).await?,
            ProfileAction::List => commands::profile_list(&ctx).await?,
        },
        Commands::Conversations => commands::conversations(&ctx).await?,
        Commands::Start { other } => commands::start(&ctx, other).await?,
        Commands::Send {
            conversation,
            text,
            attachments,
        } => commands::send(&ctx, conversation, text, attachments).await?,
        Commands::History {
            conversation,
            pages,
        } => commands::history(&ctx, conversation, pages).await?,
        Commands::Read { conversation } => commands::read(&ctx, conversation).await?,
        Commands::Watch { conversation, poll } => {
            commands::watch(&ctx, conversation, poll).await?
        }
    }

    Ok(())
}
