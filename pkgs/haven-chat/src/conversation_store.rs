//! Conversation store - the current actor's conversation list

use crate::config::ChatConfig;
use crate::data_store::{ChangeKind, DataStore, Filter, OrderBy, Query, Table};
use crate::error::{ChatError, DataStoreError, Result};
use crate::message_store::ListStatus;
use crate::models::{
    Actor, ActorId, Conversation, ConversationId, Message, MessageId, Participant, Role,
};
use crate::rows::{col, from_row, to_row, ConversationRow, NewConversationRow, ProfileRow};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Feed change recorded while a load is in flight
#[derive(Debug)]
enum Pending {
    Listed(ConversationId),
    Unread(ConversationId, MessageId),
    Read(ConversationId, MessageId),
}

#[derive(Debug, Default)]
struct ConversationList {
    conversations: Vec<Conversation>,
    /// Unread message ids per conversation, as seen by the current actor
    unread: HashMap<ConversationId, HashSet<MessageId>>,
    profiles: HashMap<ActorId, Participant>,
    /// Conversations seen on the feed that do not involve the actor, oldest first
    foreign: HashSet<ConversationId>,
    foreign_order: VecDeque<ConversationId>,
    loaded: bool,
    loading: bool,
    last_error: Option<String>,
    /// Bumped by every load; only the latest one installs its snapshot
    epoch: u64,
    journal: Option<Vec<Pending>>,
}

impl ConversationList {
    fn position(&self, id: &ConversationId) -> Option<usize> {
        self.conversations.iter().position(|c| &c.id == id)
    }

    fn unread_count(&self, id: &ConversationId) -> usize {
        self.unread.get(id).map(HashSet::len).unwrap_or(0)
    }

    fn refresh_unread(&mut self, id: &ConversationId) {
        let count = self.unread_count(id);
        if let Some(idx) = self.position(id) {
            self.conversations[idx].unread_count = count;
        }
    }

    fn note(&mut self, change: Pending) {
        if let Some(journal) = &mut self.journal {
            journal.push(change);
        }
    }

    fn remember_foreign(&mut self, id: ConversationId, limit: usize) {
        if limit == 0 || !self.foreign.insert(id.clone()) {
            return;
        }
        self.foreign_order.push_back(id);
        while self.foreign_order.len() > limit {
            if let Some(evicted) = self.foreign_order.pop_front() {
                self.foreign.remove(&evicted);
            }
        }
    }

    /// Replace the list with a fetched snapshot
    ///
    /// Feed changes applied while the fetch was in flight win over the
    /// snapshot: a held `last_message_time` is kept when newer, and journaled
    /// conversations and unread changes are replayed in arrival order.
    fn install(
        &mut self,
        mut snapshot: Vec<Conversation>,
        mut unread: HashMap<ConversationId, HashSet<MessageId>>,
    ) {
        for conv in &mut snapshot {
            if let Some(idx) = self.position(&conv.id) {
                let held = self.conversations[idx].last_message_time;
                if held > conv.last_message_time {
                    conv.last_message_time = held;
                }
            }
        }

        for change in self.journal.take().unwrap_or_default() {
            match change {
                Pending::Listed(id) => {
                    if snapshot.iter().all(|c| c.id != id) {
                        if let Some(idx) = self.position(&id) {
                            snapshot.push(self.conversations[idx].clone());
                        }
                    }
                }
                Pending::Unread(conversation_id, message_id) => {
                    unread.entry(conversation_id).or_default().insert(message_id);
                }
                Pending::Read(conversation_id, message_id) => {
                    if let Some(ids) = unread.get_mut(&conversation_id) {
                        ids.remove(&message_id);
                    }
                }
            }
        }
        unread.retain(|id, ids| !ids.is_empty() && snapshot.iter().any(|c| &c.id == id));

        self.conversations = snapshot;
        self.unread = unread;
        let ids: Vec<ConversationId> = self.conversations.iter().map(|c| c.id.clone()).collect();
        for id in &ids {
            self.refresh_unread(id);
        }
        self.sort();
    }

    /// Most recent activity first; conversations without messages last
    fn sort(&mut self) {
        self.conversations.sort_by(|a, b| {
            match (&a.last_message_time, &b.last_message_time) {
                (Some(x), Some(y)) => y.cmp(x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| b.id.cmp(&a.id))
        });
    }
}

/// Conversation store
pub struct ConversationStore {
    data_store: Arc<dyn DataStore>,
    actor: Actor,
    conflict_retries: u32,
    foreign_cache_size: usize,
    list: Mutex<ConversationList>,
}

impl ConversationStore {
    pub fn new(data_store: Arc<dyn DataStore>, actor: Actor, config: &ChatConfig) -> Self {
        Self {
            data_store,
            actor,
            conflict_retries: config.conflict_retries,
            foreign_cache_size: config.foreign_cache_size,
            list: Mutex::new(ConversationList::default()),
        }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Conversations ordered by last message time, newest first
    pub fn conversations(&self) -> Vec<Conversation> {
        self.list.lock().conversations.clone()
    }

    pub fn get(&self, id: &ConversationId) -> Option<Conversation> {
        let list = self.list.lock();
        list.position(id).map(|idx| list.conversations[idx].clone())
    }

    /// Sum of unread counts, for a badge
    pub fn total_unread(&self) -> usize {
        self.list.lock().unread.values().map(HashSet::len).sum()
    }

    /// Number of foreign conversation ids currently remembered
    pub fn foreign_cached(&self) -> usize {
        self.list.lock().foreign.len()
    }

    pub fn status(&self) -> ListStatus {
        let list = self.list.lock();
        if list.loading {
            ListStatus::Loading
        } else if let Some(err) = &list.last_error {
            ListStatus::Failed(err.clone())
        } else if !list.loaded {
            ListStatus::NotLoaded
        } else if list.conversations.is_empty() {
            ListStatus::Empty
        } else {
            ListStatus::Ready
        }
    }

    /// Fetch every conversation the actor takes part in
    ///
    /// Feed changes applied while the fetch is in flight are merged into the
    /// result. A load overtaken by a newer one leaves the list alone.
    pub async fn load(&self) -> Result<()> {
        let epoch = {
            let mut list = self.list.lock();
            list.loading = true;
            list.epoch += 1;
            list.journal = Some(Vec::new());
            list.epoch
        };

        let fetched = self.fetch_all().await;
        let mut list = self.list.lock();
        if list.epoch != epoch {
            debug!("Conversation load {} superseded by {}", epoch, list.epoch);
            return fetched.map(|_| ()).map_err(ChatError::Fetch);
        }
        list.loading = false;

        match fetched {
            Ok((conversations, unread, profiles)) => {
                list.profiles.extend(profiles);
                list.install(conversations, unread);
                list.loaded = true;
                list.last_error = None;
                info!(
                    "Loaded {} conversations for {}",
                    list.conversations.len(),
                    self.actor.id
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to load conversations for {}: {}", self.actor.id, e);
                list.journal = None;
                list.last_error = Some(e.to_string());
                Err(ChatError::Fetch(e))
            }
        }
    }

    #[allow(clippy::type_complexity)]
    async fn fetch_all(
        &self,
    ) -> Result<
        (
            Vec<Conversation>,
            HashMap<ConversationId, HashSet<MessageId>>,
            HashMap<ActorId, Participant>,
        ),
        DataStoreError,
    > {
        let me = self.actor.id.as_str();
        let rows = self
            .data_store
            .query(
                Query::new(Table::Conversations)
                    .filter(Filter::Or(vec![
                        Filter::eq(col::TENANT_ID, me),
                        Filter::eq(col::MANAGER_ID, me),
                    ]))
                    .order_by(OrderBy::desc(col::LAST_MESSAGE_TIME)),
            )
            .await?;
        let rows: Vec<ConversationRow> = rows
            .into_iter()
            .map(from_row::<ConversationRow>)
            .collect::<Result<_, _>>()?;

        let others: Vec<&ActorId> = rows.iter().map(|r| r.other_party(&self.actor.id)).collect();
        let profiles = self.fetch_profiles(&others).await?;

        let mut unread: HashMap<ConversationId, HashSet<MessageId>> = HashMap::new();
        if !rows.is_empty() {
            let unread_rows = self
                .data_store
                .query(Query::new(Table::Messages).filter(Filter::And(vec![
                    Filter::is_in(col::CONVERSATION_ID, rows.iter().map(|r| r.id.as_str())),
                    Filter::eq(col::READ_STATUS, false),
                    Filter::ne(col::SENDER_ID, me),
                ])))
                .await?;
            for row in unread_rows {
                let message: Message = from_row(row)?;
                unread
                    .entry(message.conversation_id)
                    .or_default()
                    .insert(message.id);
            }
        }

        let conversations = rows
            .into_iter()
            .map(|row| {
                let other = row.other_party(&self.actor.id).clone();
                let participant = profiles
                    .get(&other)
                    .cloned()
                    .unwrap_or_else(|| Participant::unknown(other));
                to_conversation(row, participant)
            })
            .collect();

        Ok((conversations, unread, profiles))
    }

    async fn fetch_profiles(
        &self,
        ids: &[&ActorId],
    ) -> Result<HashMap<ActorId, Participant>, DataStoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = self
            .data_store
            .query(
                Query::new(Table::Profiles)
                    .filter(Filter::is_in(col::ID, ids.iter().map(|id| id.as_str()))),
            )
            .await?;

        rows.into_iter()
            .map(|row| {
                let profile: ProfileRow = from_row(row)?;
                Ok((
                    profile.id.clone(),
                    Participant {
                        id: profile.id,
                        name: profile.name,
                        avatar_url: profile.avatar_url,
                        online: profile.online,
                    },
                ))
            })
            .collect()
    }

    async fn participant_for(&self, id: &ActorId) -> Participant {
        if let Some(known) = self.list.lock().profiles.get(id).cloned() {
            return known;
        }
        match self.fetch_profiles(&[id]).await {
            Ok(mut found) => match found.remove(id) {
                Some(participant) => {
                    self.list
                        .lock()
                        .profiles
                        .insert(id.clone(), participant.clone());
                    participant
                }
                None => {
                    warn!("No profile row for {}", id);
                    Participant::unknown(id.clone())
                }
            },
            Err(e) => {
                warn!("Failed to load profile {}: {}", id, e);
                Participant::unknown(id.clone())
            }
        }
    }

    /// Apply an insert/update of a conversation row
    ///
    /// Returns false when the change was discarded: not ours, a delete, or
    /// not newer than what is already held.
    pub async fn apply_change(&self, kind: ChangeKind, row: ConversationRow) -> bool {
        if kind == ChangeKind::Delete {
            warn!("Ignoring delete of conversation {}", row.id);
            return false;
        }
        if !row.involves(&self.actor.id) {
            debug!("Ignoring conversation {} without {}", row.id, self.actor.id);
            return false;
        }

        {
            let mut list = self.list.lock();
            if let Some(idx) = list.position(&row.id) {
                if row.last_message_time <= list.conversations[idx].last_message_time {
                    debug!("Stale change for conversation {} discarded", row.id);
                    return false;
                }
                list.conversations[idx].last_message_time = row.last_message_time;
                list.sort();
                return true;
            }
        }

        let other = row.other_party(&self.actor.id).clone();
        let participant = self.participant_for(&other).await;

        let mut list = self.list.lock();
        // Another change may have added it while the profile was loading
        if let Some(idx) = list.position(&row.id) {
            if row.last_message_time <= list.conversations[idx].last_message_time {
                return false;
            }
            list.conversations[idx].last_message_time = row.last_message_time;
        } else {
            info!("New conversation {} with {}", row.id, other);
            let id = row.id.clone();
            list.conversations.push(to_conversation(row, participant));
            list.refresh_unread(&id);
            list.note(Pending::Listed(id));
        }
        list.sort();
        true
    }

    /// Make sure a conversation referenced by a feed event is listed
    ///
    /// Message events can overtake the insert of their conversation, so an
    /// unknown id is looked up once. Returns false if it is not the actor's.
    pub async fn ensure_listed(&self, id: &ConversationId) -> bool {
        {
            let list = self.list.lock();
            if list.position(id).is_some() {
                return true;
            }
            if list.foreign.contains(id) {
                return false;
            }
        }

        let rows = self
            .data_store
            .query(Query::new(Table::Conversations).filter(Filter::eq(col::ID, id.as_str())))
            .await;
        let row = match rows.map(|rows| rows.into_iter().next().map(from_row::<ConversationRow>)) {
            Ok(Some(Ok(row))) => row,
            Ok(Some(Err(e))) => {
                warn!("Malformed conversation row {}: {}", id, e);
                return false;
            }
            Ok(None) => {
                debug!("Conversation {} not found", id);
                return false;
            }
            Err(e) => {
                warn!("Failed to look up conversation {}: {}", id, e);
                return false;
            }
        };

        if !row.involves(&self.actor.id) {
            self.list
                .lock()
                .remember_foreign(id.clone(), self.foreign_cache_size);
            return false;
        }
        self.apply_change(ChangeKind::Insert, row).await;
        true
    }

    /// Account for a message insert; returns false if it was already counted
    pub fn record_message(&self, message: &Message) -> bool {
        let mut list = self.list.lock();
        let Some(idx) = list.position(&message.conversation_id) else {
            debug!(
                "Message {} belongs to unknown conversation {}",
                message.id, message.conversation_id
            );
            return false;
        };

        let mut changed = false;
        let conv = &mut list.conversations[idx];
        if conv.last_message_time < Some(message.created_at) {
            conv.last_message_time = Some(message.created_at);
            changed = true;
        }

        if message.is_unread_for(&self.actor.id) {
            list.note(Pending::Unread(
                message.conversation_id.clone(),
                message.id.clone(),
            ));
            changed |= list
                .unread
                .entry(message.conversation_id.clone())
                .or_default()
                .insert(message.id.clone());
        }

        if changed {
            list.refresh_unread(&message.conversation_id);
            list.sort();
        }
        changed
    }

    /// Forget an unread message once it is read or deleted
    pub fn record_read(&self, conversation_id: &ConversationId, message_id: &MessageId) -> bool {
        let mut list = self.list.lock();
        list.note(Pending::Read(conversation_id.clone(), message_id.clone()));
        let removed = list
            .unread
            .get_mut(conversation_id)
            .map(|ids| ids.remove(message_id))
            .unwrap_or(false);
        if removed {
            list.refresh_unread(conversation_id);
        }
        removed
    }

    /// Forget an unread message whose conversation is not known
    pub fn forget_message(&self, message_id: &MessageId) -> bool {
        let owner = self
            .list
            .lock()
            .unread
            .iter()
            .find(|(_, ids)| ids.contains(message_id))
            .map(|(id, _)| id.clone());
        match owner {
            Some(conversation_id) => self.record_read(&conversation_id, message_id),
            None => false,
        }
    }

    /// Return the conversation with `other`, creating it if needed
    ///
    /// A uniqueness conflict means another caller created the pair first; the
    /// lookup is retried instead of reporting an error.
    pub async fn start_conversation(&self, other: &ActorId) -> Result<ConversationId> {
        if other == &self.actor.id {
            return Err(ChatError::validation(
                "cannot start a conversation with yourself",
            ));
        }
        let (tenant_id, manager_id) = match self.actor.role {
            Role::Tenant => (self.actor.id.clone(), other.clone()),
            Role::Manager | Role::Admin => (other.clone(), self.actor.id.clone()),
        };

        for attempt in 0..=self.conflict_retries {
            if let Some(row) = self.find_pair(other).await.map_err(ChatError::Fetch)? {
                let id = row.id.clone();
                self.apply_change(ChangeKind::Insert, row).await;
                return Ok(id);
            }

            let new_row = to_row(&NewConversationRow {
                tenant_id: tenant_id.clone(),
                manager_id: manager_id.clone(),
            })
            .map_err(ChatError::Send)?;

            match self.data_store.insert(Table::Conversations, new_row).await {
                Ok(row) => {
                    let row: ConversationRow = from_row(row).map_err(ChatError::Send)?;
                    let id = row.id.clone();
                    info!("Started conversation {} with {}", id, other);
                    self.apply_change(ChangeKind::Insert, row).await;
                    return Ok(id);
                }
                Err(DataStoreError::Conflict(reason)) => {
                    let conflict = ChatError::Conflict(reason);
                    debug!("{}; retrying lookup (attempt {})", conflict, attempt + 1);
                }
                Err(e) => {
                    error!("Failed to create conversation with {}: {}", other, e);
                    return Err(ChatError::Send(e));
                }
            }
        }

        error!(
            "Conversation with {} still unresolved after {} retries",
            other, self.conflict_retries
        );
        Err(ChatError::Fetch(DataStoreError::Conflict(format!(
            "conversation with '{}' could not be resolved",
            other
        ))))
    }

    /// Find the conversation between the actor and `other` in either role orientation
    async fn find_pair(&self, other: &ActorId) -> Result<Option<ConversationRow>, DataStoreError> {
        let me = self.actor.id.as_str();
        let rows = self
            .data_store
            .query(Query::new(Table::Conversations).filter(Filter::Or(vec![
                Filter::And(vec![
                    Filter::eq(col::TENANT_ID, me),
                    Filter::eq(col::MANAGER_ID, other.as_str()),
                ]),
                Filter::And(vec![
                    Filter::eq(col::TENANT_ID, other.as_str()),
                    Filter::eq(col::MANAGER_ID, me),
                ]),
            ])))
            .await?;

        rows.into_iter().next().map(from_row).transpose()
    }
}

fn to_conversation(row: ConversationRow, participant: Participant) -> Conversation {
    Conversation {
        id: row.id,
        tenant_id: row.tenant_id,
        manager_id: row.manager_id,
        last_message_time: row.last_message_time,
        participant,
        unread_count: 0,
    }
}
