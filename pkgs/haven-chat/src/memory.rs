//! In-process collaborators
//!
//! `MemoryDataStore` behaves like the hosted backend: it assigns ids and
//! server timestamps, enforces one conversation per tenant/manager pair,
//! bumps `last_message_time` on every message insert, and publishes every
//! change on a broadcast feed. The feed can be dropped and restored to
//! exercise reconnect handling.

use crate::data_store::{
    compare_values, ChangeEvent, ChangeKind, ChangeStream, DataStore, FeedEvent, FileStorage,
    Filter, Query, Table, NULL,
};
use crate::error::DataStoreError;
use crate::rows::{col, Row};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Current server time in the wire format
fn server_now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn required_str<'a>(row: &'a Row, column: &str) -> Result<&'a str, DataStoreError> {
    row.get(column)
        .and_then(Value::as_str)
        .ok_or_else(|| DataStoreError::InvalidRow(format!("missing column '{}'", column)))
}

/// Turn a broadcast receiver into a filtered change stream
pub fn feed_stream(
    receiver: broadcast::Receiver<FeedEvent>,
    table: Table,
    filter: Filter,
) -> ChangeStream {
    Box::pin(futures::stream::unfold(
        (receiver, table, filter),
        |(mut receiver, table, filter)| async move {
            loop {
                match receiver.recv().await {
                    Ok(FeedEvent::Change(event))
                        if event.table != table || !filter.matches(&event.row) =>
                    {
                        continue;
                    }
                    Ok(event) => return Some((event, (receiver, table, filter))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed events are recovered the same way as a dropped connection
                        warn!("{} feed lagged by {} events", table, skipped);
                        return Some((FeedEvent::Reconnected, (receiver, table, filter)));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        },
    ))
}

/// In-memory data store
pub struct MemoryDataStore {
    tables: Mutex<HashMap<Table, Vec<Row>>>,
    feed: broadcast::Sender<FeedEvent>,
    feed_connected: AtomicBool,
    reachable: AtomicBool,
}

impl MemoryDataStore {
    pub fn new(feed_buffer: usize) -> Self {
        let (feed, _) = broadcast::channel(feed_buffer.max(1));
        info!("Memory data store initialized");
        Self {
            tables: Mutex::new(HashMap::new()),
            feed,
            feed_connected: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
        }
    }

    /// Make every subsequent call fail with `Unreachable` (or succeed again)
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Drop the live feed; changes made while disconnected are never delivered
    pub fn disconnect_feed(&self) {
        self.feed_connected.store(false, Ordering::SeqCst);
        let _ = self.feed.send(FeedEvent::Disconnected);
        info!("Memory feed disconnected");
    }

    /// Restore the live feed
    pub fn reconnect_feed(&self) {
        self.feed_connected.store(true, Ordering::SeqCst);
        let _ = self.feed.send(FeedEvent::Reconnected);
        info!("Memory feed reconnected");
    }

    /// Deliver an arbitrary event to subscribers (duplicates, replays, reordering)
    pub fn publish(&self, event: FeedEvent) {
        let _ = self.feed.send(event);
    }

    /// Snapshot of a table's rows
    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.tables.lock().get(&table).cloned().unwrap_or_default()
    }

    fn check_reachable(&self) -> Result<(), DataStoreError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DataStoreError::Unreachable(
                "memory data store is offline".to_string(),
            ))
        }
    }

    fn emit(&self, events: Vec<ChangeEvent>) {
        if !self.feed_connected.load(Ordering::SeqCst) {
            debug!("Feed disconnected, dropping {} changes", events.len());
            return;
        }
        for event in events {
            // No receivers is not an error
            let _ = self.feed.send(FeedEvent::Change(event));
        }
    }

    fn insert_locked(
        tables: &mut HashMap<Table, Vec<Row>>,
        table: Table,
        mut row: Row,
    ) -> Result<Vec<ChangeEvent>, DataStoreError> {
        let mut events = Vec::new();

        if !row.contains_key(col::ID) {
            row.insert(
                col::ID.to_string(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }
        let id = required_str(&row, col::ID)?.to_string();

        let existing = tables.entry(table).or_default();
        if existing
            .iter()
            .any(|r| r.get(col::ID).and_then(Value::as_str) == Some(id.as_str()))
        {
            return Err(DataStoreError::Conflict(format!(
                "{} row '{}' already exists",
                table, id
            )));
        }

        match table {
            Table::Profiles => {
                required_str(&row, col::NAME)?;
                required_str(&row, col::ROLE)?;
            }
            Table::Conversations => {
                let tenant = required_str(&row, col::TENANT_ID)?;
                let manager = required_str(&row, col::MANAGER_ID)?;
                let duplicate = existing.iter().any(|r| {
                    r.get(col::TENANT_ID).and_then(Value::as_str) == Some(tenant)
                        && r.get(col::MANAGER_ID).and_then(Value::as_str) == Some(manager)
                });
                if duplicate {
                    return Err(DataStoreError::Conflict(format!(
                        "conversation between '{}' and '{}' already exists",
                        tenant, manager
                    )));
                }
                row.entry(col::LAST_MESSAGE_TIME).or_insert(Value::Null);
                row.entry(col::CREATED_AT).or_insert_with(server_now);
            }
            Table::Messages => {
                let conversation_id = required_str(&row, col::CONVERSATION_ID)?.to_string();
                required_str(&row, col::SENDER_ID)?;
                row.entry(col::CONTENT)
                    .or_insert_with(|| Value::String(String::new()));
                row.entry(col::ATTACHMENTS)
                    .or_insert_with(|| Value::Array(Vec::new()));
                row.entry(col::READ_STATUS).or_insert(Value::Bool(false));
                row.entry(col::CREATED_AT).or_insert_with(server_now);
                let created_at = row[col::CREATED_AT].clone();

                let conversation = tables
                    .entry(Table::Conversations)
                    .or_default()
                    .iter_mut()
                    .find(|r| {
                        r.get(col::ID).and_then(Value::as_str) == Some(conversation_id.as_str())
                    })
                    .ok_or_else(|| {
                        DataStoreError::NotFound(format!("conversation '{}'", conversation_id))
                    })?;

                let current = conversation.get(col::LAST_MESSAGE_TIME).unwrap_or(&NULL);
                if compare_values(current, &created_at).is_lt() {
                    conversation.insert(col::LAST_MESSAGE_TIME.to_string(), created_at);
                    events.push(ChangeEvent {
                        table: Table::Conversations,
                        kind: ChangeKind::Update,
                        row: conversation.clone(),
                    });
                }
            }
        }

        tables.entry(table).or_default().push(row.clone());
        // The message insert is published before the conversation bump it caused
        events.insert(
            0,
            ChangeEvent {
                table,
                kind: ChangeKind::Insert,
                row,
            },
        );
        Ok(events)
    }
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn query(&self, query: Query) -> Result<Vec<Row>, DataStoreError> {
        self.check_reachable()?;
        let rows: Vec<Row> = self
            .tables
            .lock()
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| query.filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(query.sort_and_slice(rows))
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, DataStoreError> {
        self.check_reachable()?;
        let events = {
            let mut tables = self.tables.lock();
            Self::insert_locked(&mut tables, table, row)?
        };
        let inserted = events[0].row.clone();
        debug!(
            "Inserted {} row {}",
            table,
            inserted.get(col::ID).unwrap_or(&NULL)
        );
        self.emit(events);
        Ok(inserted)
    }

    async fn update(&self, table: Table, filter: Filter, patch: Row) -> Result<(), DataStoreError> {
        self.check_reachable()?;
        let events: Vec<ChangeEvent> = {
            let mut tables = self.tables.lock();
            tables
                .entry(table)
                .or_default()
                .iter_mut()
                .filter(|r| filter.matches(r))
                .filter_map(|r| {
                    let changed = patch.iter().any(|(k, v)| r.get(k) != Some(v));
                    if !changed {
                        return None;
                    }
                    for (k, v) in &patch {
                        r.insert(k.clone(), v.clone());
                    }
                    Some(ChangeEvent {
                        table,
                        kind: ChangeKind::Update,
                        row: r.clone(),
                    })
                })
                .collect()
        };
        debug!("Updated {} {} rows", events.len(), table);
        self.emit(events);
        Ok(())
    }

    async fn subscribe(&self, table: Table, filter: Filter) -> Result<ChangeStream, DataStoreError> {
        self.check_reachable()?;
        debug!("New subscription on {}", table);
        Ok(feed_stream(self.feed.subscribe(), table, filter))
    }
}

/// In-memory file storage
#[derive(Default)]
pub struct MemoryFileStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl MemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make uploads fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, locator: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(locator).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn upload(&self, bucket_path: &str, bytes: Vec<u8>) -> Result<String, DataStoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DataStoreError::Unreachable(format!(
                "upload of '{}' rejected",
                bucket_path
            )));
        }
        debug!("Stored {} bytes at {}", bytes.len(), bucket_path);
        self.blobs.lock().insert(bucket_path.to_string(), bytes);
        Ok(bucket_path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_store::OrderBy;
    use futures::StreamExt;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(row) => row,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_conversation_pair_is_unique() {
        let store = MemoryDataStore::default();
        let pair = row(json!({"tenant_id": "t1", "manager_id": "m1"}));

        let first = store.insert(Table::Conversations, pair.clone()).await.unwrap();
        assert!(first.contains_key("id"));
        assert!(first.contains_key("created_at"));

        let second = store.insert(Table::Conversations, pair).await;
        assert!(matches!(second, Err(DataStoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_message_insert_bumps_conversation() {
        let store = MemoryDataStore::default();
        let conv = store
            .insert(
                Table::Conversations,
                row(json!({"tenant_id": "t1", "manager_id": "m1"})),
            )
            .await
            .unwrap();
        let mut feed = store.subscribe(Table::Conversations, Filter::All).await.unwrap();

        let msg = store
            .insert(
                Table::Messages,
                row(json!({"conversation_id": conv["id"], "sender_id": "t1", "content": "hi"})),
            )
            .await
            .unwrap();
        assert_eq!(msg["read_status"], false);

        let conversations = store
            .query(Query::new(Table::Conversations).order_by(OrderBy::desc("last_message_time")))
            .await
            .unwrap();
        assert_eq!(conversations[0]["last_message_time"], msg["created_at"]);

        match feed.next().await {
            Some(FeedEvent::Change(event)) => {
                assert_eq!(event.kind, ChangeKind::Update);
                assert_eq!(event.row["id"], conv["id"]);
            }
            other => panic!("unexpected feed item: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_message_requires_conversation() {
        let store = MemoryDataStore::default();
        let result = store
            .insert(
                Table::Messages,
                row(json!({"conversation_id": "nope", "sender_id": "t1"})),
            )
            .await;
        assert!(matches!(result, Err(DataStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        let store = MemoryDataStore::default();
        store.set_reachable(false);
        let result = store.query(Query::new(Table::Profiles)).await;
        assert!(matches!(result, Err(DataStoreError::Unreachable(_))));
    }
}
