//! SQLite data store - `DataStore` over Sea-ORM

use crate::entities::{conversations, messages, profiles, RowModel};
use crate::filter::{column, condition};
use crate::StoreConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use haven_chat::memory::feed_stream;
use haven_chat::{
    ActorId, Attachment, ChangeEvent, ChangeKind, ChangeStream, ConversationId, DataStore,
    DataStoreError, FeedEvent, Filter, MessageId, ProfileRow, Query, Row, Table,
};
use sea_orm::*;
use sea_orm_migration::MigratorTrait;
use serde::Deserialize;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Map a Sea-ORM error onto the collaborator taxonomy
fn db_error(e: DbErr) -> DataStoreError {
    if let Some(SqlErr::UniqueConstraintViolation(msg)) = e.sql_err() {
        return DataStoreError::Conflict(msg);
    }
    match e {
        err @ (DbErr::Conn(_) | DbErr::ConnectionAcquire(_)) => {
            DataStoreError::Unreachable(err.to_string())
        }
        DbErr::RecordNotFound(msg) => DataStoreError::NotFound(msg),
        other => {
            let msg = other.to_string();
            if msg.contains("UNIQUE constraint failed") {
                DataStoreError::Conflict(msg)
            } else {
                DataStoreError::Backend(msg)
            }
        }
    }
}

/// Insert payload for `conversations`, with optional caller-supplied fields
#[derive(Debug, Deserialize)]
struct IncomingConversation {
    #[serde(default)]
    id: Option<ConversationId>,
    tenant_id: ActorId,
    manager_id: ActorId,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

/// Insert payload for `messages`, with optional caller-supplied fields
#[derive(Debug, Deserialize)]
struct IncomingMessage {
    #[serde(default)]
    id: Option<MessageId>,
    conversation_id: ConversationId,
    sender_id: ActorId,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    read_status: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// SQLite data store
pub struct SqliteDataStore {
    db: DatabaseConnection,
    feed: broadcast::Sender<FeedEvent>,
}

impl SqliteDataStore {
    /// Open (or create) the database at `config.db_path` and run migrations
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        let db_path_str = config
            .db_path
            .to_str()
            .context("Invalid database path")?
            .replace("\\", "/");

        let db_url = format!("sqlite:{}?mode=rwc", db_path_str);

        let db: DatabaseConnection = Database::connect(db_url.as_str())
            .await
            .context("Failed to connect to database")?;

        let store = Self::with_connection(db, config.feed_buffer).await?;
        info!("SQLite data store initialized at {}", config.db_path.display());
        Ok(store)
    }

    /// Create a data store over an existing database connection
    pub async fn with_connection(db: DatabaseConnection, feed_buffer: usize) -> Result<Self> {
        crate::migration::Migrator::up(&db, None)
            .await
            .context("Failed to run migrations")?;

        let (feed, _) = broadcast::channel(feed_buffer.max(1));
        debug!("SQLite data store ready");
        Ok(Self { db, feed })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Create or replace a profile row
    pub async fn upsert_profile(&self, profile: ProfileRow) -> Result<(), DataStoreError> {
        let id = profile.id.clone();
        let model = profiles::Model::from(profile);
        let existing = profiles::Entity::find_by_id(id.as_str())
            .one(&self.db)
            .await
            .map_err(db_error)?;

        let (kind, saved) = match existing {
            Some(current) if current == model => {
                debug!("Profile {} unchanged", id);
                return Ok(());
            }
            Some(_) => (
                ChangeKind::Update,
                model.into_active_model().reset_all().update(&self.db).await,
            ),
            None => (
                ChangeKind::Insert,
                model.into_active_model().reset_all().insert(&self.db).await,
            ),
        };
        let saved = saved.map_err(db_error)?;

        info!("Saved profile {} ({})", id, saved.role);
        self.publish(vec![ChangeEvent {
            table: Table::Profiles,
            kind,
            row: saved.into_row()?,
        }]);
        Ok(())
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            // No subscribers is not an error
            let _ = self.feed.send(FeedEvent::Change(event));
        }
    }

    async fn select<E>(&self, query: &Query) -> Result<Vec<E::Model>, DataStoreError>
    where
        E: EntityTrait,
        E::Column: FromStr,
    {
        let mut select = E::find().filter(condition::<E>(&query.filter)?);
        for order in &query.order {
            let direction = if order.descending {
                Order::Desc
            } else {
                Order::Asc
            };
            select = select.order_by(column::<E>(&order.column)?, direction);
        }
        if let Some(range) = query.range {
            select = select.offset(range.offset as u64).limit(range.limit as u64);
        }
        select.all(&self.db).await.map_err(db_error)
    }

    async fn insert_conversation(&self, row: Row) -> Result<Vec<ChangeEvent>, DataStoreError> {
        let incoming: IncomingConversation = haven_chat::from_row(row)?;
        let model = conversations::Model {
            id: incoming.id.map(|id| id.0).unwrap_or_else(new_id),
            tenant_id: incoming.tenant_id.0,
            manager_id: incoming.manager_id.0,
            last_message_time: None,
            created_at: incoming
                .created_at
                .unwrap_or_else(Utc::now)
                .timestamp_millis(),
        };

        let saved = model
            .into_active_model()
            .reset_all()
            .insert(&self.db)
            .await
            .map_err(db_error)?;

        Ok(vec![ChangeEvent {
            table: Table::Conversations,
            kind: ChangeKind::Insert,
            row: saved.into_row()?,
        }])
    }

    /// Insert a message and bump its conversation in one transaction
    async fn insert_message(&self, row: Row) -> Result<Vec<ChangeEvent>, DataStoreError> {
        let incoming: IncomingMessage = haven_chat::from_row(row)?;
        let model = messages::Model {
            id: incoming.id.map(|id| id.0).unwrap_or_else(new_id),
            conversation_id: incoming.conversation_id.0,
            sender_id: incoming.sender_id.0,
            content: incoming.content,
            attachments: serde_json::to_string(&incoming.attachments)?,
            read_status: incoming.read_status,
            created_at: incoming
                .created_at
                .unwrap_or_else(Utc::now)
                .timestamp_millis(),
        };

        let txn = self.db.begin().await.map_err(db_error)?;

        let conversation = conversations::Entity::find_by_id(model.conversation_id.as_str())
            .one(&txn)
            .await
            .map_err(db_error)?
            .ok_or_else(|| {
                DataStoreError::NotFound(format!("conversation '{}'", model.conversation_id))
            })?;

        let saved = model
            .into_active_model()
            .reset_all()
            .insert(&txn)
            .await
            .map_err(db_error)?;

        let mut events = vec![ChangeEvent {
            table: Table::Messages,
            kind: ChangeKind::Insert,
            row: saved.clone().into_row()?,
        }];

        if conversation.last_message_time < Some(saved.created_at) {
            let mut active: conversations::ActiveModel = conversation.into();
            active.last_message_time = Set(Some(saved.created_at));
            let bumped = active.update(&txn).await.map_err(db_error)?;
            events.push(ChangeEvent {
                table: Table::Conversations,
                kind: ChangeKind::Update,
                row: bumped.into_row()?,
            });
        }

        txn.commit().await.map_err(db_error)?;
        Ok(events)
    }

    /// Patch every row of `E` matching `filter`; unchanged rows produce no event
    async fn update_rows<E>(
        &self,
        table: Table,
        filter: &Filter,
        patch: &Row,
    ) -> Result<Vec<ChangeEvent>, DataStoreError>
    where
        E: EntityTrait,
        E::Column: FromStr,
        E::Model: RowModel + IntoActiveModel<E::ActiveModel> + Send + Sync,
        E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
    {
        let models = E::find()
            .filter(condition::<E>(filter)?)
            .all(&self.db)
            .await
            .map_err(db_error)?;

        let mut events = Vec::new();
        for model in models {
            let current = model.into_row()?;
            let mut next = current.clone();
            for (key, value) in patch {
                next.insert(key.clone(), value.clone());
            }
            if next == current {
                continue;
            }

            let saved = E::Model::from_row(next)?
                .into_active_model()
                .reset_all()
                .update(&self.db)
                .await
                .map_err(db_error)?;
            events.push(ChangeEvent {
                table,
                kind: ChangeKind::Update,
                row: saved.into_row()?,
            });
        }
        Ok(events)
    }
}

#[async_trait]
impl DataStore for SqliteDataStore {
    async fn query(&self, query: Query) -> Result<Vec<Row>, DataStoreError> {
        match query.table {
            Table::Profiles => self
                .select::<profiles::Entity>(&query)
                .await?
                .into_iter()
                .map(RowModel::into_row)
                .collect(),
            Table::Conversations => self
                .select::<conversations::Entity>(&query)
                .await?
                .into_iter()
                .map(RowModel::into_row)
                .collect(),
            Table::Messages => self
                .select::<messages::Entity>(&query)
                .await?
                .into_iter()
                .map(RowModel::into_row)
                .collect(),
        }
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, DataStoreError> {
        let events = match table {
            Table::Profiles => {
                let saved = profiles::Model::from_row(row)?
                    .into_active_model()
                    .reset_all()
                    .insert(&self.db)
                    .await
                    .map_err(db_error)?;
                vec![ChangeEvent {
                    table,
                    kind: ChangeKind::Insert,
                    row: saved.into_row()?,
                }]
            }
            Table::Conversations => self.insert_conversation(row).await?,
            Table::Messages => self.insert_message(row).await?,
        };

        let inserted = events[0].row.clone();
        debug!("Inserted {} row {:?}", table, inserted.get(haven_chat::col::ID));
        self.publish(events);
        Ok(inserted)
    }

    async fn update(&self, table: Table, filter: Filter, patch: Row) -> Result<(), DataStoreError> {
        let events = match table {
            Table::Profiles => {
                self.update_rows::<profiles::Entity>(table, &filter, &patch)
                    .await?
            }
            Table::Conversations => {
                self.update_rows::<conversations::Entity>(table, &filter, &patch)
                    .await?
            }
            Table::Messages => {
                self.update_rows::<messages::Entity>(table, &filter, &patch)
                    .await?
            }
        };

        debug!("Updated {} {} rows", events.len(), table);
        self.publish(events);
        Ok(())
    }

    async fn subscribe(&self, table: Table, filter: Filter) -> Result<ChangeStream, DataStoreError> {
        if self.feed.receiver_count() > 64 {
            warn!("{} live subscriptions on the SQLite feed", self.feed.receiver_count());
        }
        debug!("New subscription on {}", table);
        Ok(feed_stream(self.feed.subscribe(), table, filter))
    }
}
