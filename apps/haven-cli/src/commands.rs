//! Command handlers

use anyhow::{bail, Context as _, Result};
use haven_chat::{
    col, from_row, Actor, ChatConfig, ChatSession, ConversationId, DataStore, FeedEvent, Message,
    OrderBy, OutgoingAttachment, ProfileRow, Query, Role, Table,
};
use haven_store::{LocalFileStorage, SqliteDataStore, StoreConfig};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Shared handles for one CLI invocation
pub struct Context {
    store: Arc<SqliteDataStore>,
    files: Arc<LocalFileStorage>,
    actor: Option<String>,
    config: ChatConfig,
}

impl Context {
    pub async fn open(
        db: &Path,
        files: &Path,
        actor: Option<String>,
        page_size: usize,
    ) -> Result<Self> {
        let store_config = StoreConfig {
            db_path: db.to_path_buf(),
            files_dir: files.to_path_buf(),
            ..Default::default()
        };
        let store = SqliteDataStore::new(&store_config)
            .await
            .with_context(|| format!("Failed to open {}", db.display()))?;

        Ok(Self {
            store: Arc::new(store),
            files: Arc::new(LocalFileStorage::new(&store_config.files_dir)),
            actor,
            config: ChatConfig {
                page_size: page_size.max(1),
                ..Default::default()
            },
        })
    }

    async fn profiles(&self) -> Result<Vec<ProfileRow>> {
        let rows = self
            .store
            .query(Query::new(Table::Profiles).order_by(OrderBy::asc(col::NAME)))
            .await?;
        Ok(rows
            .into_iter()
            .map(from_row::<ProfileRow>)
            .collect::<Result<_, _>>()?)
    }

    /// Build a session for `--actor` and load its conversation list
    async fn session(&self) -> Result<ChatSession> {
        let id = self
            .actor
            .as_deref()
            .context("No actor given; pass --actor or set HAVEN_ACTOR")?;
        let profile = self
            .profiles()
            .await?
            .into_iter()
            .find(|p| p.id.as_str() == id)
            .with_context(|| format!("No profile '{}'; create it with `haven profile add`", id))?;

        let session = ChatSession::new(
            Actor::new(profile.id, profile.role),
            self.store.clone(),
            self.files.clone(),
            &self.config,
        );
        session
            .load()
            .await
            .context("Failed to load conversations")?;
        Ok(session)
    }
}

fn known_conversation(session: &ChatSession, id: String) -> Result<ConversationId> {
    let id = ConversationId::new(id);
    if session.conversations().get(&id).is_none() {
        bail!("Unknown conversation '{}'", id);
    }
    Ok(id)
}

fn print_message(session: &ChatSession, message: &Message) {
    let me = &session.actor().id;
    let sender = if &message.sender_id == me {
        "me".to_string()
    } else {
        session
            .conversations()
            .get(&message.conversation_id)
            .map(|c| c.participant.name)
            .unwrap_or_else(|| message.sender_id.to_string())
    };
    let receipt = if &message.sender_id == me && message.read_status {
        " ✓"
    } else {
        ""
    };

    println!(
        "[{}] {}: {}{}",
        message.created_at.format("%Y-%m-%d %H:%M:%S"),
        sender,
        message.content,
        receipt
    );
    for attachment in &message.attachments {
        println!(
            "    📎 {} ({:?}) {}",
            attachment.display_name, attachment.kind, attachment.locator
        );
    }
}

pub async fn profile_add(
    ctx: &Context,
    id: String,
    name: String,
    role: Role,
    avatar_url: Option<String>,
) -> Result<()> {
    ctx.store
        .upsert_profile(ProfileRow {
            id: id.clone().into(),
            name,
            role,
            avatar_url,
            online: false,
        })
        .await?;
    println!("Saved profile {} ({})", id, role);
    Ok(())
}

pub async fn profile_list(ctx: &Context) -> Result<()> {
    let profiles = ctx.profiles().await?;
    if profiles.is_empty() {
        println!("No profiles yet");
    }
    for profile in profiles {
        println!("{:<24} {:<20} {}", profile.id, profile.name, profile.role);
    }
    Ok(())
}

pub async fn conversations(ctx: &Context) -> Result<()> {
    let session = ctx.session().await?;
    let conversations = session.conversations().conversations();
    if conversations.is_empty() {
        println!("No conversations yet");
        return Ok(());
    }

    for c in conversations {
        let last = c
            .last_message_time
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<20} {:>3} unread  {}",
            c.id, c.participant.name, c.unread_count, last
        );
    }
    println!("Total unread: {}", session.conversations().total_unread());
    Ok(())
}

pub async fn start(ctx: &Context, other: String) -> Result<()> {
    let session = ctx.session().await?;
    let id = session
        .conversations()
        .start_conversation(&other.as_str().into())
        .await?;
    println!("{}", id);
    Ok(())
}

pub async fn send(
    ctx: &Context,
    conversation: String,
    text: String,
    attachments: Vec<PathBuf>,
) -> Result<()> {
    let session = ctx.session().await?;
    let conversation = known_conversation(&session, conversation)?;

    let mut outgoing = Vec::with_capacity(attachments.len());
    for path in attachments {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        let mime_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string();
        outgoing.push(OutgoingAttachment::new(name, mime_type, bytes));
    }

    let sent = session.send(&conversation, &text, outgoing).await?;
    info!("Sent message {} to {}", sent.id, conversation);
    println!("{}", sent.id);
    Ok(())
}

pub async fn history(ctx: &Context, conversation: String, pages: usize) -> Result<()> {
    let session = ctx.session().await?;
    let conversation = known_conversation(&session, conversation)?;
    session.open(Some(conversation)).await?;

    for _ in 1..pages {
        if !session.messages().has_more() {
            break;
        }
        session.messages().load_more().await?;
    }

    let messages = session.messages().messages();
    if session.messages().has_more() {
        println!("... older messages available (use --pages)");
    }
    for message in messages.iter().rev() {
        print_message(&session, message);
    }
    Ok(())
}

pub async fn read(ctx: &Context, conversation: String) -> Result<()> {
    let session = ctx.session().await?;
    let conversation = known_conversation(&session, conversation)?;
    session.open(Some(conversation)).await?;

    let marked = session.mark_active_read().await?;
    println!("Marked {} messages as read", marked);
    Ok(())
}

/// Print window messages not shown yet, oldest first
fn print_new(session: &ChatSession, printed: &mut HashSet<String>) {
    for message in session.messages().messages().iter().rev() {
        if message.id.is_provisional() || printed.contains(message.id.as_str()) {
            continue;
        }
        print_message(session, message);
        printed.insert(message.id.to_string());
    }
}

pub async fn watch(ctx: &Context, conversation: String, poll: u64) -> Result<()> {
    let session = ctx.session().await?;
    let conversation = known_conversation(&session, conversation)?;
    session.open(Some(conversation.clone())).await?;
    let sync = session.start_sync().await?;

    let mut printed = HashSet::new();
    print_new(&session, &mut printed);
    println!("💬 Type a message and press Enter; Ctrl+C to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_secs(poll.max(1)));

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if let Err(e) = session.send(&conversation, text, Vec::new()).await {
                        eprintln!("❌ {}", e);
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                // Other processes write to the database without reaching this feed
                if let Err(e) = session.sync_engine().handle(FeedEvent::Reconnected).await {
                    warn!("Refresh failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }

        print_new(&session, &mut printed);
        if let Err(e) = session.mark_active_read().await {
            warn!("Failed to mark messages read: {}", e);
        }
    }

    sync.abort();
    Ok(())
}
