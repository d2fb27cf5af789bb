//! Haven Chat - conversation and message synchronization core
//!
//! This crate keeps a client's view of its conversations and of the active
//! conversation's message history consistent with a hosted data store that
//! delivers changes over an at-least-once, unordered feed.
//!
//! # Architecture
//!
//! - **ConversationStore**: The actor's conversation list, enriched with the other
//!   participant's profile and ordered by last activity
//! - **MessageStore**: Paged, newest-first message window for the active conversation
//! - **SyncEngine**: Routes feed events into the two stores idempotently and reloads
//!   after a reconnect
//! - **ComposeController**: Optimistic sends with attachment upload and rollback
//! - **ChatSession**: Bundles the above for one actor
//!
//! The data store, file storage and notification delivery are collaborators behind
//! the [`DataStore`], [`FileStorage`] and [`MessageObserver`] traits. The `memory`
//! module ships in-process implementations; `haven-store` provides SQLite.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use haven_chat::{Actor, ChatConfig, ChatSession, MemoryDataStore, MemoryFileStorage, Role};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = ChatSession::new(
//!     Actor::new("tenant-1", Role::Tenant),
//!     Arc::new(MemoryDataStore::default()),
//!     Arc::new(MemoryFileStorage::new()),
//!     &ChatConfig::default(),
//! );
//! session.load().await?;
//! let _sync = session.start_sync().await?;
//!
//! let conversation = session.conversations().start_conversation(&"manager-1".into()).await?;
//! session.open(Some(conversation.clone())).await?;
//! session.send(&conversation, "Is the boiler fixed?", Vec::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod compose;
pub mod config;
pub mod conversation_store;
pub mod data_store;
pub mod error;
pub mod memory;
pub mod message_store;
pub mod models;
pub mod rows;
pub mod session;
pub mod sync_engine;

pub use compose::ComposeController;
pub use config::ChatConfig;
pub use conversation_store::ConversationStore;
pub use data_store::{
    ChangeEvent, ChangeKind, ChangeStream, DataStore, FeedEvent, FileStorage, Filter,
    MessageObserver, OrderBy, Query, Range, Table,
};
pub use error::{ChatError, DataStoreError, Result};
pub use memory::{MemoryDataStore, MemoryFileStorage};
pub use message_store::{ListStatus, LoadState, MessageStore, WindowSnapshot};
pub use models::{
    Actor, ActorId, Attachment, AttachmentKind, Conversation, ConversationId, Message, MessageId,
    OutgoingAttachment, Participant, Role,
};
pub use rows::{
    col, from_row, to_row, ConversationRow, MessageRow, NewConversationRow, NewMessageRow,
    ProfileRow, Row,
};
pub use session::ChatSession;
pub use sync_engine::SyncEngine;
