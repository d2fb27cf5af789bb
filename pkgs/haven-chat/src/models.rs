//! Domain types held by the conversation and message stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identity of a user (tenant, manager or admin)
    ActorId
);
string_id!(
    /// Identity of a conversation row
    ConversationId
);
string_id!(
    /// Identity of a message row, or a provisional `local-` id before confirmation
    MessageId
);

/// Prefix used for ids generated locally before the data store assigns one
pub const PROVISIONAL_ID_PREFIX: &str = "local-";

impl MessageId {
    /// Generate a temporary id for an optimistic message
    pub fn provisional() -> Self {
        Self(format!("{}{}", PROVISIONAL_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_ID_PREFIX)
    }
}

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Tenant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Tenant => "tenant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "tenant" => Ok(Role::Tenant),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// The user a session acts on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<ActorId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// Profile of the other participant of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ActorId,
    pub name: String,
    pub avatar_url: Option<String>,
    pub online: bool,
}

impl Participant {
    /// Placeholder used when the profile row could not be loaded
    pub fn unknown(id: ActorId) -> Self {
        Self {
            name: id.to_string(),
            id,
            avatar_url: None,
            online: false,
        }
    }
}

/// Conversation between one tenant and one manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub tenant_id: ActorId,
    pub manager_id: ActorId,
    pub last_message_time: Option<DateTime<Utc>>,
    pub participant: Participant,
    pub unread_count: usize,
}

impl Conversation {
    pub fn involves(&self, actor: &ActorId) -> bool {
        &self.tenant_id == actor || &self.manager_id == actor
    }

    /// The participant that is not `viewer`
    pub fn other_party(&self, viewer: &ActorId) -> &ActorId {
        if &self.tenant_id == viewer {
            &self.manager_id
        } else {
            &self.tenant_id
        }
    }
}

/// Attachment kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Document,
}

impl AttachmentKind {
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            AttachmentKind::Image
        } else {
            AttachmentKind::Document
        }
    }
}

/// Uploaded attachment referenced by a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub locator: String,
    pub display_name: String,
}

/// Blob the caller wants to attach to an outgoing message
#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub display_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl OutgoingAttachment {
    pub fn new(
        display_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// Chat message
///
/// Everything except `read_status` is write-once. `read_status` only moves
/// from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: ActorId,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub read_status: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Ordering key; the visible list is sorted by this key descending
    pub fn sort_key(&self) -> (DateTime<Utc>, &MessageId) {
        (self.created_at, &self.id)
    }

    pub fn is_unread_for(&self, viewer: &ActorId) -> bool {
        !self.read_status && &self.sender_id != viewer
    }
}
