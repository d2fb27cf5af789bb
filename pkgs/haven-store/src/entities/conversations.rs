//! Conversation entity

use super::{from_millis, RowModel};
use haven_chat::{from_row, to_row, ConversationRow, DataStoreError, Row};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub tenant_id: String,
    pub manager_id: String,
    pub last_message_time: Option<i64>, // Unix millis of the newest message
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<ConversationRow> for Model {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id.0,
            tenant_id: row.tenant_id.0,
            manager_id: row.manager_id.0,
            last_message_time: row.last_message_time.map(|t| t.timestamp_millis()),
            created_at: row.created_at.timestamp_millis(),
        }
    }
}

impl RowModel for Model {
    fn into_row(self) -> Result<Row, DataStoreError> {
        to_row(&ConversationRow {
            id: self.id.into(),
            tenant_id: self.tenant_id.into(),
            manager_id: self.manager_id.into(),
            last_message_time: self.last_message_time.map(from_millis).transpose()?,
            created_at: from_millis(self.created_at)?,
        })
    }

    fn from_row(row: Row) -> Result<Self, DataStoreError> {
        from_row::<ConversationRow>(row).map(Self::from)
    }
}
