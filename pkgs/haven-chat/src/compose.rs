//! Compose controller - optimistic message sending

use crate::config::ChatConfig;
use crate::conversation_store::ConversationStore;
use crate::data_store::{DataStore, FileStorage, Table};
use crate::error::{ChatError, DataStoreError, Result};
use crate::message_store::MessageStore;
use crate::models::{
    ActorId, Attachment, AttachmentKind, ConversationId, Message, MessageId, OutgoingAttachment,
};
use crate::rows::{from_row, to_row, NewMessageRow};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Sends messages on behalf of the session actor
///
/// A send is a two-phase commit against the message store: the provisional
/// message is shown right away, then either swapped for the stored copy or
/// removed again if any upload or the insert fails.
pub struct ComposeController {
    data_store: Arc<dyn DataStore>,
    file_storage: Arc<dyn FileStorage>,
    messages: Arc<MessageStore>,
    conversations: Arc<ConversationStore>,
    sender_id: ActorId,
    bucket: String,
    in_flight: AtomicUsize,
}

impl ComposeController {
    pub fn new(
        data_store: Arc<dyn DataStore>,
        file_storage: Arc<dyn FileStorage>,
        messages: Arc<MessageStore>,
        conversations: Arc<ConversationStore>,
        config: &ChatConfig,
    ) -> Self {
        let sender_id = conversations.actor().id.clone();
        Self {
            data_store,
            file_storage,
            messages,
            conversations,
            sender_id,
            bucket: config.attachment_bucket.trim_end_matches('/').to_string(),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Number of sends that have not completed yet
    pub fn pending(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Send a message and return the stored copy
    pub async fn send(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        attachments: Vec<OutgoingAttachment>,
    ) -> Result<Message> {
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(ChatError::validation(
                "a message needs text or at least one attachment",
            ));
        }
        if let Some(unnamed) = attachments.iter().find(|a| a.display_name.trim().is_empty()) {
            return Err(ChatError::validation(format!(
                "attachment of type '{}' has no name",
                unnamed.mime_type
            )));
        }

        let provisional = Message {
            id: MessageId::provisional(),
            conversation_id: conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            content: content.to_string(),
            attachments: attachments
                .iter()
                .map(|a| Attachment {
                    kind: AttachmentKind::from_mime(&a.mime_type),
                    locator: String::new(),
                    display_name: a.display_name.clone(),
                })
                .collect(),
            read_status: false,
            created_at: Utc::now(),
        };
        let temp_id = provisional.id.clone();
        if !self.messages.insert_provisional(provisional) {
            debug!(
                "Conversation {} is not active, sending {} without a preview",
                conversation_id, temp_id
            );
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.commit(conversation_id, content, attachments).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(message) => {
                info!(
                    "Sent message {} to conversation {}",
                    message.id, conversation_id
                );
                self.messages.confirm_provisional(&temp_id, message.clone());
                self.conversations.record_message(&message);
                Ok(message)
            }
            Err(e) => {
                error!(
                    "Failed to send message to conversation {}: {}",
                    conversation_id, e
                );
                self.messages.rollback_provisional(&temp_id);
                Err(ChatError::Send(e))
            }
        }
    }

    /// Upload attachments, then insert the message row
    async fn commit(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        attachments: Vec<OutgoingAttachment>,
    ) -> Result<Message, DataStoreError> {
        let mut uploaded = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let path = format!(
                "{}/{}/{}-{}",
                self.bucket,
                conversation_id,
                Uuid::new_v4(),
                attachment.display_name.replace('/', "_")
            );
            let size = attachment.bytes.len();
            let locator = self.file_storage.upload(&path, attachment.bytes).await?;
            debug!("Uploaded {} ({} bytes) to {}", attachment.display_name, size, locator);
            uploaded.push(Attachment {
                kind: AttachmentKind::from_mime(&attachment.mime_type),
                locator,
                display_name: attachment.display_name,
            });
        }

        let row = to_row(&NewMessageRow {
            conversation_id: conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            content: content.to_string(),
            attachments: uploaded,
        })?;
        let stored = self.data_store.insert(Table::Messages, row).await?;
        from_row(stored)
    }
}
