//! Message store - the paged message window of the active conversation
//!
//! The window is a cache of the data store: newest-first, sorted by
//! `(created_at, id)` descending, deduplicated by id. It is filled by
//! `load_initial`/`load_more`, by the sync engine for live inserts, and by
//! the compose controller for optimistic sends.
//!
//! Every fetch captures the window epoch before suspending. Switching the
//! conversation or restarting the initial load bumps the epoch, and a fetch
//! that completes under an older epoch is dropped instead of applied.

use crate::config::ChatConfig;
use crate::data_store::{DataStore, Filter, OrderBy, Query, Range, Table};
use crate::error::{ChatError, DataStoreError, Result};
use crate::models::{ConversationId, Message, MessageId};
use crate::rows::{col, from_row, Row};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Load state of the message window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    LoadingMore,
}

/// What a list view should render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListStatus {
    /// Nothing requested yet
    NotLoaded,
    Loading,
    /// The last load failed
    Failed(String),
    /// Loaded, and there is nothing to show
    Empty,
    Ready,
}

/// Point-in-time copy of the message window
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    pub conversation_id: Option<ConversationId>,
    pub state: LoadState,
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub error: Option<String>,
}

impl WindowSnapshot {
    pub fn status(&self) -> ListStatus {
        match (self.state, &self.error) {
            (LoadState::Loading, _) => ListStatus::Loading,
            (LoadState::Idle, Some(err)) => ListStatus::Failed(err.clone()),
            (LoadState::Idle, None) => ListStatus::NotLoaded,
            _ if self.messages.is_empty() => ListStatus::Empty,
            _ => ListStatus::Ready,
        }
    }
}

#[derive(Debug)]
struct Window {
    conversation_id: Option<ConversationId>,
    epoch: u64,
    state: LoadState,
    messages: Vec<Message>,
    pages: usize,
    has_more: bool,
    more_in_flight: bool,
    /// Ids applied from the feed or confirmed sends since the last initial load started
    live: HashSet<MessageId>,
    provisional: HashSet<MessageId>,
    /// Temporary id -> confirmed id, kept until the next initial load completes
    confirmed: HashMap<MessageId, MessageId>,
    /// Read receipts that arrived before their message
    early_reads: HashSet<MessageId>,
    last_error: Option<String>,
}

impl Window {
    fn new() -> Self {
        Self {
            conversation_id: None,
            epoch: 0,
            state: LoadState::Idle,
            messages: Vec::new(),
            pages: 0,
            has_more: false,
            more_in_flight: false,
            live: HashSet::new(),
            provisional: HashSet::new(),
            confirmed: HashMap::new(),
            early_reads: HashSet::new(),
            last_error: None,
        }
    }

    /// Discard everything and point the window at `conversation_id`
    fn reset(&mut self, conversation_id: Option<ConversationId>) {
        let epoch = self.epoch + 1;
        *self = Self::new();
        self.epoch = epoch;
        self.conversation_id = conversation_id;
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    /// Insert keeping newest-first order; returns false if the id was already present
    fn merge(&mut self, mut incoming: Message) -> bool {
        if let Some(idx) = self.position(&incoming.id) {
            // Only read status may change, and only towards true
            if incoming.read_status {
                self.messages[idx].read_status = true;
            }
            return false;
        }

        if self.early_reads.remove(&incoming.id) {
            incoming.read_status = true;
        }
        let idx = self
            .messages
            .partition_point(|m| m.sort_key() > incoming.sort_key());
        self.messages.insert(idx, incoming);
        true
    }

    fn remove(&mut self, id: &MessageId) -> Option<Message> {
        self.position(id).map(|idx| self.messages.remove(idx))
    }

    fn resolve(&self, id: &MessageId) -> MessageId {
        self.confirmed.get(id).cloned().unwrap_or_else(|| id.clone())
    }

    fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            conversation_id: self.conversation_id.clone(),
            state: self.state,
            messages: self.messages.clone(),
            has_more: self.has_more,
            error: self.last_error.clone(),
        }
    }
}

/// Message store
pub struct MessageStore {
    data_store: Arc<dyn DataStore>,
    page_size: usize,
    window: Mutex<Window>,
}

impl MessageStore {
    /// Create a message store with no active conversation
    pub fn new(data_store: Arc<dyn DataStore>, config: &ChatConfig) -> Self {
        Self {
            data_store,
            page_size: config.page_size.max(1),
            window: Mutex::new(Window::new()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.window.lock().conversation_id.clone()
    }

    pub fn is_active(&self, conversation_id: &ConversationId) -> bool {
        self.window.lock().conversation_id.as_ref() == Some(conversation_id)
    }

    pub fn state(&self) -> LoadState {
        self.window.lock().state
    }

    pub fn has_more(&self) -> bool {
        self.window.lock().has_more
    }

    /// Visible messages, newest first
    pub fn messages(&self) -> Vec<Message> {
        self.window.lock().messages.clone()
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        self.window.lock().snapshot()
    }

    /// Focus a conversation (or none), discarding the current window
    ///
    /// Selecting the conversation that is already active does nothing.
    pub async fn set_active_conversation(&self, id: Option<ConversationId>) -> Result<()> {
        {
            let mut window = self.window.lock();
            if window.conversation_id == id {
                return Ok(());
            }
            info!(
                "Switching active conversation: {:?} -> {:?}",
                window.conversation_id, id
            );
            window.reset(id.clone());
        }

        match id {
            Some(_) => self.load_initial().await,
            None => Ok(()),
        }
    }

    /// Fetch the newest page of the active conversation
    pub async fn load_initial(&self) -> Result<()> {
        let (conversation_id, epoch) = {
            let mut window = self.window.lock();
            let conversation_id = window
                .conversation_id
                .clone()
                .ok_or_else(|| ChatError::validation("no active conversation"))?;
            window.epoch += 1;
            window.state = LoadState::Loading;
            window.more_in_flight = false;
            window.live.clear();
            window.last_error = None;
            (conversation_id, window.epoch)
        };

        let result = self.fetch_page(&conversation_id, 0).await;

        let mut window = self.window.lock();
        if window.epoch != epoch {
            debug!(
                "Discarding stale initial page for conversation {}",
                conversation_id
            );
            return Ok(());
        }

        match result {
            Ok(page) => {
                let full = page.len() == self.page_size;
                let oldest = page.last().map(|m| (m.created_at, m.id.clone()));

                // Keep optimistic messages and live arrivals that are newer than the page tail
                let retained: Vec<Message> = window
                    .messages
                    .iter()
                    .filter(|m| window.provisional.contains(&m.id) || window.live.contains(&m.id))
                    .filter(|m| match (&oldest, full) {
                        (Some((at, id)), true) => m.sort_key() > (*at, id),
                        _ => true,
                    })
                    .cloned()
                    .collect();

                window.messages.clear();
                let count = page.len();
                for message in page.into_iter().chain(retained) {
                    window.merge(message);
                }
                window.pages = 1;
                window.has_more = full;
                window.state = LoadState::Loaded;
                window.confirmed.clear();
                window.live.clear();

                info!(
                    "Loaded {} messages for conversation {} (has_more: {})",
                    count, conversation_id, window.has_more
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to load messages for conversation {}: {}",
                    conversation_id, e
                );
                window.state = LoadState::Idle;
                window.last_error = Some(e.to_string());
                Err(ChatError::Fetch(e))
            }
        }
    }

    /// Fetch the next older page
    ///
    /// Does nothing when there is no more history or a page fetch is already
    /// outstanding. A failure leaves the window `Loaded` with `has_more`
    /// untouched so the call can be retried.
    pub async fn load_more(&self) -> Result<()> {
        let (conversation_id, epoch, offset) = {
            let mut window = self.window.lock();
            if window.more_in_flight || !window.has_more || window.state != LoadState::Loaded {
                debug!(
                    "load_more skipped (in flight: {}, has_more: {}, state: {:?})",
                    window.more_in_flight, window.has_more, window.state
                );
                return Ok(());
            }
            let Some(conversation_id) = window.conversation_id.clone() else {
                return Ok(());
            };
            window.more_in_flight = true;
            window.state = LoadState::LoadingMore;
            (conversation_id, window.epoch, window.pages * self.page_size)
        };

        let result = self.fetch_page(&conversation_id, offset).await;

        let mut window = self.window.lock();
        if window.epoch != epoch {
            debug!(
                "Discarding stale page at offset {} for conversation {}",
                offset, conversation_id
            );
            return Ok(());
        }
        window.more_in_flight = false;
        window.state = LoadState::Loaded;

        match result {
            Ok(page) => {
                let count = page.len();
                window.has_more = count == self.page_size;
                window.pages += 1;
                window.last_error = None;
                for message in page {
                    window.merge(message);
                }
                debug!(
                    "Loaded {} older messages for conversation {} (has_more: {})",
                    count, conversation_id, window.has_more
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Failed to load more messages for conversation {}: {}",
                    conversation_id, e
                );
                window.last_error = Some(e.to_string());
                Err(ChatError::Fetch(e))
            }
        }
    }

    /// Apply a live insert for the active conversation
    ///
    /// Returns false when the message belongs elsewhere or is already present.
    pub fn apply_inbound(&self, message: Message) -> bool {
        let mut window = self.window.lock();
        if window.conversation_id.as_ref() != Some(&message.conversation_id) {
            debug!(
                "Ignoring message {} for inactive conversation {}",
                message.id, message.conversation_id
            );
            return false;
        }

        let id = message.id.clone();
        let applied = window.merge(message);
        window.live.insert(id.clone());
        if applied {
            debug!("Applied inbound message {}", id);
        } else {
            debug!("Duplicate inbound message {} ignored", id);
        }
        applied
    }

    /// Record a read receipt for a message of the active conversation
    pub fn apply_read(&self, id: &MessageId) {
        let mut window = self.window.lock();
        match window.position(id) {
            Some(idx) => window.messages[idx].read_status = true,
            None => {
                window.early_reads.insert(id.clone());
            }
        }
    }

    /// Drop a message the data store deleted
    pub fn apply_removed(&self, id: &MessageId) -> bool {
        let mut window = self.window.lock();
        window.live.remove(id);
        window.remove(id).is_some()
    }

    /// Mark messages as read in the data store, then locally
    ///
    /// Ids that are already read, unknown, or still provisional are accepted
    /// without error.
    pub async fn mark_read(&self, ids: &[MessageId]) -> Result<()> {
        let ids: Vec<MessageId> = {
            let window = self.window.lock();
            ids.iter()
                .map(|id| window.resolve(id))
                .filter(|id| !id.is_provisional())
                .collect()
        };
        if ids.is_empty() {
            return Ok(());
        }

        let mut patch = Row::new();
        patch.insert(col::READ_STATUS.to_string(), Value::Bool(true));
        self.data_store
            .update(
                Table::Messages,
                Filter::is_in(col::ID, ids.iter().map(|id| id.as_str())),
                patch,
            )
            .await
            .map_err(|e| {
                error!("Failed to mark {} messages as read: {}", ids.len(), e);
                ChatError::Send(e)
            })?;

        let mut window = self.window.lock();
        for id in &ids {
            if let Some(idx) = window.position(id) {
                window.messages[idx].read_status = true;
            }
        }
        debug!("Marked {} messages as read", ids.len());
        Ok(())
    }

    /// Map a provisional id to its confirmed id, if the send has completed
    pub fn resolve_id(&self, id: &MessageId) -> MessageId {
        self.window.lock().resolve(id)
    }

    /// Show an optimistic message; returns false if its conversation is not active
    pub fn insert_provisional(&self, message: Message) -> bool {
        let mut window = self.window.lock();
        if window.conversation_id.as_ref() != Some(&message.conversation_id) {
            return false;
        }
        window.provisional.insert(message.id.clone());
        window.merge(message);
        true
    }

    /// Swap a provisional message for the data store's confirmed copy
    pub fn confirm_provisional(&self, temp_id: &MessageId, confirmed: Message) {
        let mut window = self.window.lock();
        if window.provisional.remove(temp_id) {
            window.remove(temp_id);
        }
        if window.conversation_id.as_ref() != Some(&confirmed.conversation_id) {
            return;
        }
        window
            .confirmed
            .insert(temp_id.clone(), confirmed.id.clone());
        window.live.insert(confirmed.id.clone());
        let real_id = confirmed.id.clone();
        if !window.merge(confirmed) {
            debug!("Confirmed message {} was already delivered by the feed", real_id);
        }
    }

    /// Remove a provisional message after a failed send
    pub fn rollback_provisional(&self, temp_id: &MessageId) {
        let mut window = self.window.lock();
        window.provisional.remove(temp_id);
        if window.remove(temp_id).is_some() {
            debug!("Rolled back provisional message {}", temp_id);
        }
    }

    async fn fetch_page(
        &self,
        conversation_id: &ConversationId,
        offset: usize,
    ) -> Result<Vec<Message>, DataStoreError> {
        let rows = self
            .data_store
            .query(
                Query::new(Table::Messages)
                    .filter(Filter::eq(col::CONVERSATION_ID, conversation_id.as_str()))
                    .order_by(OrderBy::desc(col::CREATED_AT))
                    .order_by(OrderBy::desc(col::ID))
                    .range(Range::new(offset, self.page_size)),
            )
            .await?;

        rows.into_iter().map(from_row::<Message>).collect()
    }
}
