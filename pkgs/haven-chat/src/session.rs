//! Chat session - the per-actor bundle of stores and controllers

use crate::compose::ComposeController;
use crate::config::ChatConfig;
use crate::conversation_store::ConversationStore;
use crate::data_store::{ChangeStream, DataStore, FileStorage, Filter, MessageObserver, Table};
use crate::error::{ChatError, Result};
use crate::message_store::MessageStore;
use crate::models::{Actor, ConversationId, Message, MessageId, OutgoingAttachment};
use crate::rows::col;
use crate::sync_engine::SyncEngine;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Everything one signed-in actor needs to chat
///
/// Built once at session start and shared by reference; dropping it ends the
/// session.
pub struct ChatSession {
    actor: Actor,
    data_store: Arc<dyn DataStore>,
    conversations: Arc<ConversationStore>,
    messages: Arc<MessageStore>,
    compose: ComposeController,
    sync: Arc<SyncEngine>,
}

impl ChatSession {
    pub fn new(
        actor: Actor,
        data_store: Arc<dyn DataStore>,
        file_storage: Arc<dyn FileStorage>,
        config: &ChatConfig,
    ) -> Self {
        let conversations = Arc::new(ConversationStore::new(
            data_store.clone(),
            actor.clone(),
            config,
        ));
        let messages = Arc::new(MessageStore::new(data_store.clone(), config));
        let compose = ComposeController::new(
            data_store.clone(),
            file_storage,
            messages.clone(),
            conversations.clone(),
            config,
        );
        let sync = Arc::new(SyncEngine::new(conversations.clone(), messages.clone()));

        info!("Chat session created for {} ({:?})", actor.id, actor.role);
        Self {
            actor,
            data_store,
            conversations,
            messages,
            compose,
            sync,
        }
    }

    /// Route inserted messages from other participants to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn MessageObserver>) -> Self {
        self.sync = Arc::new(
            SyncEngine::new(self.conversations.clone(), self.messages.clone())
                .with_observer(observer),
        );
        self
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn messages(&self) -> &Arc<MessageStore> {
        &self.messages
    }

    pub fn compose(&self) -> &ComposeController {
        &self.compose
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    /// Combined feed of message and conversation changes
    pub async fn subscribe(&self) -> Result<ChangeStream> {
        let me = self.actor.id.as_str();
        // Unfiltered so conversations created later are covered; foreign ids
        // are remembered in a bounded cache by the conversation store
        let messages = self
            .data_store
            .subscribe(Table::Messages, Filter::All)
            .await
            .map_err(ChatError::Fetch)?;
        let conversations = self
            .data_store
            .subscribe(
                Table::Conversations,
                Filter::Or(vec![
                    Filter::eq(col::TENANT_ID, me),
                    Filter::eq(col::MANAGER_ID, me),
                ]),
            )
            .await
            .map_err(ChatError::Fetch)?;

        Ok(futures::stream::select(messages, conversations).boxed())
    }

    /// Subscribe and run the sync engine on a background task
    pub async fn start_sync(&self) -> Result<JoinHandle<()>> {
        let feed = self.subscribe().await?;
        let sync = self.sync.clone();
        Ok(tokio::spawn(async move { sync.run(feed).await }))
    }

    /// Load the conversation list
    pub async fn load(&self) -> Result<()> {
        self.conversations.load().await
    }

    /// Focus a conversation (or none)
    pub async fn open(&self, conversation_id: Option<ConversationId>) -> Result<()> {
        self.messages.set_active_conversation(conversation_id).await
    }

    pub async fn send(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        attachments: Vec<OutgoingAttachment>,
    ) -> Result<Message> {
        self.compose.send(conversation_id, content, attachments).await
    }

    /// Mark every loaded message from the other participant as read
    pub async fn mark_active_read(&self) -> Result<usize> {
        let Some(conversation_id) = self.messages.active_conversation() else {
            return Ok(0);
        };
        let unread: Vec<MessageId> = self
            .messages
            .messages()
            .into_iter()
            .filter(|m| m.is_unread_for(&self.actor.id) && !m.id.is_provisional())
            .map(|m| m.id)
            .collect();
        if unread.is_empty() {
            return Ok(0);
        }

        self.messages.mark_read(&unread).await?;
        for id in &unread {
            self.conversations.record_read(&conversation_id, id);
        }
        Ok(unread.len())
    }
}
