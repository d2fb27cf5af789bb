//! Wire rows exchanged with the data store
//!
//! Rows are JSON objects with snake_case keys. The typed structs here are the
//! shapes the chat core reads and writes; `Message` doubles as the message row.

use crate::error::DataStoreError;
use crate::models::{ActorId, Attachment, ConversationId, Role};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Untyped row as delivered by the data store
pub type Row = serde_json::Map<String, Value>;

/// Column names used by the chat core
pub mod col {
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const ROLE: &str = "role";
    pub const AVATAR_URL: &str = "avatar_url";
    pub const ONLINE: &str = "online";
    pub const TENANT_ID: &str = "tenant_id";
    pub const MANAGER_ID: &str = "manager_id";
    pub const LAST_MESSAGE_TIME: &str = "last_message_time";
    pub const CONVERSATION_ID: &str = "conversation_id";
    pub const SENDER_ID: &str = "sender_id";
    pub const CONTENT: &str = "content";
    pub const ATTACHMENTS: &str = "attachments";
    pub const READ_STATUS: &str = "read_status";
    pub const CREATED_AT: &str = "created_at";
}

/// Serialize a typed value into a row
pub fn to_row<T: Serialize>(value: &T) -> Result<Row, DataStoreError> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(DataStoreError::InvalidRow(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// Deserialize a row into a typed value
pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, DataStoreError> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// `profiles` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: ActorId,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub online: bool,
}

/// `messages` row; the wire shape is the model itself
pub type MessageRow = crate::models::Message;

/// `conversations` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: ConversationId,
    pub tenant_id: ActorId,
    pub manager_id: ActorId,
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ConversationRow {
    pub fn involves(&self, actor: &ActorId) -> bool {
        &self.tenant_id == actor || &self.manager_id == actor
    }

    pub fn other_party(&self, viewer: &ActorId) -> &ActorId {
        if &self.tenant_id == viewer {
            &self.manager_id
        } else {
            &self.tenant_id
        }
    }
}

/// Insert payload for `conversations`; id and timestamps are assigned by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversationRow {
    pub tenant_id: ActorId,
    pub manager_id: ActorId,
}

/// Insert payload for `messages`; id, `created_at` and `read_status` are assigned by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessageRow {
    pub conversation_id: ConversationId,
    pub sender_id: ActorId,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttachmentKind, Message};

    #[test]
    fn test_message_row_uses_snake_case_keys() {
        let msg = Message {
            id: "m1".into(),
            conversation_id: "c1".into(),
            sender_id: "a1".into(),
            content: "hi".to_string(),
            attachments: vec![Attachment {
                kind: AttachmentKind::Image,
                locator: "chat-attachments/c1/photo.png".to_string(),
                display_name: "photo.png".to_string(),
            }],
            read_status: false,
            created_at: Utc::now(),
        };

        let row = to_row(&msg).unwrap();
        assert_eq!(row[col::CONVERSATION_ID], "c1");
        assert_eq!(row[col::READ_STATUS], false);
        assert_eq!(row[col::ATTACHMENTS][0]["kind"], "image");
        assert_eq!(row[col::ATTACHMENTS][0]["display_name"], "photo.png");
    }

    #[test]
    fn test_message_row_defaults() {
        let row = serde_json::json!({
            "id": "m1",
            "conversation_id": "c1",
            "sender_id": "a1",
            "content": "hi",
            "created_at": "2025-01-20T10:00:00Z"
        });
        let Value::Object(row) = row else {
            panic!("not an object")
        };

        let msg: Message = from_row(row).unwrap();
        assert!(msg.attachments.is_empty());
        assert!(!msg.read_status);
    }

    #[test]
    fn test_to_row_rejects_non_objects() {
        assert!(matches!(
            to_row(&"plain"),
            Err(DataStoreError::InvalidRow(_))
        ));
    }
}
