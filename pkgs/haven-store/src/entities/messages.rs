//! Message entity

use super::{from_millis, RowModel};
use haven_chat::{from_row, to_row, DataStoreError, MessageRow, Row};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub attachments: String, // JSON array of attachments
    pub read_status: bool,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<MessageRow> for Model {
    type Error = DataStoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.0,
            conversation_id: row.conversation_id.0,
            sender_id: row.sender_id.0,
            content: row.content,
            attachments: serde_json::to_string(&row.attachments)?,
            read_status: row.read_status,
            created_at: row.created_at.timestamp_millis(),
        })
    }
}

impl RowModel for Model {
    fn into_row(self) -> Result<Row, DataStoreError> {
        to_row(&MessageRow {
            id: self.id.into(),
            conversation_id: self.conversation_id.into(),
            sender_id: self.sender_id.into(),
            content: self.content,
            attachments: serde_json::from_str(&self.attachments)?,
            read_status: self.read_status,
            created_at: from_millis(self.created_at)?,
        })
    }

    fn from_row(row: Row) -> Result<Self, DataStoreError> {
        Self::try_from(from_row::<MessageRow>(row)?)
    }
}
