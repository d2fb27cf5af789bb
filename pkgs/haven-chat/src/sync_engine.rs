//! Sync engine - routes change-feed events into the conversation and message stores
//!
//! The feed is at-least-once and unordered, so every route below is
//! idempotent: inserts are deduplicated by id, read receipts only ever set
//! `read_status`, and conversation rows are applied only when they carry a
//! newer `last_message_time`. After a dropped subscription the engine does no
//! gap-filling; it reloads the conversation list and the active window.

use crate::conversation_store::ConversationStore;
use crate::data_store::{ChangeEvent, ChangeKind, ChangeStream, FeedEvent, MessageObserver, Table};
use crate::error::Result;
use crate::message_store::MessageStore;
use crate::models::{ConversationId, Message, MessageId};
use crate::rows::{from_row, ConversationRow};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Key columns of a deleted message row
///
/// Delete events may carry only the primary key of the old row.
#[derive(Debug, Deserialize)]
struct MessageKey {
    id: MessageId,
    #[serde(default)]
    conversation_id: Option<ConversationId>,
}

/// Sync engine
pub struct SyncEngine {
    conversations: Arc<ConversationStore>,
    messages: Arc<MessageStore>,
    observer: Option<Arc<dyn MessageObserver>>,
}

impl SyncEngine {
    pub fn new(conversations: Arc<ConversationStore>, messages: Arc<MessageStore>) -> Self {
        Self {
            conversations,
            messages,
            observer: None,
        }
    }

    /// Notify `observer` of every newly seen message from another participant
    pub fn with_observer(mut self, observer: Arc<dyn MessageObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Consume a feed until it ends
    ///
    /// Failures while handling one event are logged and do not stop the loop.
    pub async fn run(&self, mut feed: ChangeStream) {
        info!("Sync engine started");
        while let Some(event) = feed.next().await {
            if let Err(e) = self.handle(event).await {
                warn!("Failed to reconcile after feed event: {}", e);
            }
        }
        info!("Change feed closed, sync engine stopped");
    }

    /// Handle one feed event
    pub async fn handle(&self, event: FeedEvent) -> Result<()> {
        match event {
            FeedEvent::Change(change) => {
                self.handle_change(change).await;
                Ok(())
            }
            FeedEvent::Disconnected => {
                warn!("Change feed disconnected");
                Ok(())
            }
            FeedEvent::Reconnected => self.resync().await,
        }
    }

    async fn handle_change(&self, change: ChangeEvent) {
        match change.table {
            Table::Messages if change.kind == ChangeKind::Delete => {
                match from_row::<MessageKey>(change.row) {
                    Ok(key) => self.on_message_delete(key),
                    Err(e) => warn!("Dropping malformed message delete: {}", e),
                }
            }
            Table::Messages => {
                let message: Message = match from_row(change.row) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Dropping malformed message row: {}", e);
                        return;
                    }
                };
                if change.kind == ChangeKind::Insert {
                    self.on_message_insert(message).await;
                } else {
                    self.on_message_update(message);
                }
            }
            Table::Conversations => match from_row::<ConversationRow>(change.row) {
                Ok(row) => {
                    let id = row.id.clone();
                    if self.conversations.apply_change(change.kind, row).await {
                        debug!("Conversation {} updated from feed", id);
                    }
                }
                Err(e) => warn!("Dropping malformed conversation row: {}", e),
            },
            Table::Profiles => {
                debug!("Ignoring profile change");
            }
        }
    }

    async fn on_message_insert(&self, message: Message) {
        // The open window takes the message even if the list lookup fails
        let listed = self
            .conversations
            .ensure_listed(&message.conversation_id)
            .await;
        let active = self.messages.is_active(&message.conversation_id);
        if !listed && !active {
            debug!(
                "Ignoring message {} outside the actor's conversations",
                message.id
            );
            return;
        }
        let recorded = listed && self.conversations.record_message(&message);

        let fresh = if active {
            self.messages.apply_inbound(message.clone())
        } else {
            debug!(
                "Message {} for background conversation {}",
                message.id, message.conversation_id
            );
            recorded
        };

        if !fresh {
            return;
        }
        if let Some(observer) = &self.observer {
            if message.sender_id != self.conversations.actor().id {
                observer.on_message_inserted(&message);
            }
        }
    }

    fn on_message_update(&self, message: Message) {
        if !message.read_status {
            // Only read status is mutable
            debug!("Ignoring non-read update of message {}", message.id);
            return;
        }
        self.conversations
            .record_read(&message.conversation_id, &message.id);
        if self.messages.is_active(&message.conversation_id) {
            self.messages.apply_read(&message.id);
        }
    }

    fn on_message_delete(&self, key: MessageKey) {
        let in_window = match &key.conversation_id {
            Some(conversation_id) => {
                self.conversations.record_read(conversation_id, &key.id);
                self.messages.is_active(conversation_id)
            }
            None => {
                self.conversations.forget_message(&key.id);
                true
            }
        };
        if in_window && self.messages.apply_removed(&key.id) {
            debug!("Removed deleted message {}", key.id);
        }
    }

    /// Re-fetch after a reconnect instead of replaying the gap
    async fn resync(&self) -> Result<()> {
        info!("Change feed reconnected, reloading state");
        let conversations = self.conversations.load().await;

        let window = match self.messages.active_conversation() {
            Some(_) => self.messages.load_initial().await,
            None => Ok(()),
        };

        if let Err(e) = &window {
            error!("Failed to reload active conversation after reconnect: {}", e);
        }
        conversations.and(window)
    }
}
