//! Shared fixtures for the haven-chat integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use haven_chat::{
    to_row, ChangeEvent, ChangeKind, ChangeStream, DataStore, DataStoreError, FeedEvent, Filter,
    MemoryDataStore, Message, MessageId, MessageObserver, ConversationId, Query, Row, Table,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(row) => row,
        other => panic!("not an object: {}", other),
    }
}

/// Fixed base time so message order is deterministic
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 20, 10, 0, 0).unwrap()
}

pub async fn seed_profile(store: &MemoryDataStore, id: &str, name: &str, role: &str) {
    store
        .insert(
            Table::Profiles,
            row(json!({
                "id": id,
                "name": name,
                "role": role,
                "avatar_url": format!("https://cdn.example.com/{}.png", id),
                "online": true,
            })),
        )
        .await
        .expect("Failed to seed profile");
}

pub async fn seed_conversation(
    store: &MemoryDataStore,
    tenant: &str,
    manager: &str,
) -> ConversationId {
    let conv = store
        .insert(
            Table::Conversations,
            row(json!({"tenant_id": tenant, "manager_id": manager})),
        )
        .await
        .expect("Failed to seed conversation");
    ConversationId::new(conv["id"].as_str().unwrap())
}

/// Insert `count` messages one second apart, ids `{prefix}-000`, `{prefix}-001`, ...
pub async fn seed_messages(
    store: &MemoryDataStore,
    conversation: &ConversationId,
    sender: &str,
    prefix: &str,
    count: usize,
) -> Vec<Message> {
    let mut seeded = Vec::with_capacity(count);
    for i in 0..count {
        let created_at = base_time() + Duration::seconds(i as i64);
        let stored = store
            .insert(
                Table::Messages,
                row(json!({
                    "id": format!("{}-{:03}", prefix, i),
                    "conversation_id": conversation.as_str(),
                    "sender_id": sender,
                    "content": format!("message {}", i),
                    "created_at": created_at.to_rfc3339(),
                })),
            )
            .await
            .expect("Failed to seed message");
        seeded.push(serde_json::from_value(Value::Object(stored)).unwrap());
    }
    seeded
}

/// A message that is not (yet) in any store
pub fn message(id: &str, conversation: &ConversationId, sender: &str, secs: i64) -> Message {
    Message {
        id: MessageId::new(id),
        conversation_id: conversation.clone(),
        sender_id: sender.into(),
        content: format!("message {}", id),
        attachments: Vec::new(),
        read_status: false,
        created_at: base_time() + Duration::seconds(secs),
    }
}

pub fn message_event(kind: ChangeKind, message: &Message) -> FeedEvent {
    FeedEvent::Change(ChangeEvent {
        table: Table::Messages,
        kind,
        row: to_row(message).unwrap(),
    })
}

pub fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.id.to_string()).collect()
}

/// Expected visible order: `(created_at, id)` descending
pub fn newest_first(mut messages: Vec<Message>) -> Vec<String> {
    messages.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    ids(&messages)
}

/// Data store wrapper that counts calls and injects delays and failures
pub struct GatedStore {
    pub inner: Arc<MemoryDataStore>,
    queries: AtomicUsize,
    inserts: AtomicUsize,
    fail_inserts: AtomicBool,
    fail_updates: AtomicBool,
    yield_after_query: AtomicBool,
    hold_next: AtomicUsize,
    waiting: AtomicUsize,
    gate: Semaphore,
}

impl GatedStore {
    pub fn new(inner: Arc<MemoryDataStore>) -> Self {
        Self {
            inner,
            queries: AtomicUsize::new(0),
            inserts: AtomicUsize::new(0),
            fail_inserts: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            yield_after_query: AtomicBool::new(false),
            hold_next: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Yield to the scheduler between evaluating a query and returning it
    pub fn set_yield_after_query(&self, enabled: bool) {
        self.yield_after_query.store(enabled, Ordering::SeqCst);
    }

    /// Park the next `n` query/insert calls until `release` is called
    pub fn hold_next(&self, n: usize) {
        self.hold_next.store(n, Ordering::SeqCst);
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Yield until `n` calls are parked
    pub async fn until_waiting(&self, n: usize) {
        while self.waiting() < n {
            tokio::task::yield_now().await;
        }
    }

    async fn maybe_hold(&self) {
        let held = self
            .hold_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if held {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl DataStore for GatedStore {
    async fn query(&self, query: Query) -> Result<Vec<Row>, DataStoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let rows = self.inner.query(query).await;
        self.maybe_hold().await;
        if self.yield_after_query.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        rows
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, DataStoreError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.maybe_hold().await;
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(DataStoreError::Unreachable("insert rejected".to_string()));
        }
        self.inner.insert(table, row).await
    }

    async fn update(&self, table: Table, filter: Filter, patch: Row) -> Result<(), DataStoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(DataStoreError::Unreachable("update rejected".to_string()));
        }
        self.inner.update(table, filter, patch).await
    }

    async fn subscribe(&self, table: Table, filter: Filter) -> Result<ChangeStream, DataStoreError> {
        self.inner.subscribe(table, filter).await
    }
}

/// Observer that records every notified message id
#[derive(Default)]
pub struct RecordingObserver {
    pub seen: Mutex<Vec<MessageId>>,
}

impl RecordingObserver {
    pub fn seen(&self) -> Vec<MessageId> {
        self.seen.lock().clone()
    }
}

impl MessageObserver for RecordingObserver {
    fn on_message_inserted(&self, message: &Message) {
        self.seen.lock().push(message.id.clone());
    }
}
