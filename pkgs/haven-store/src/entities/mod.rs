//! Sea-ORM entities for haven-store
//!
//! Timestamps are stored as Unix milliseconds and converted to RFC 3339 on
//! the wire; message attachments are stored as a JSON array.

pub mod conversations;
pub mod messages;
pub mod profiles;

pub use conversations::Entity as Conversations;
pub use messages::Entity as Messages;
pub use profiles::Entity as Profiles;

use chrono::{DateTime, TimeZone, Utc};
use haven_chat::{DataStoreError, Row};

/// Conversion between a stored model and a wire row
pub trait RowModel: Sized {
    fn into_row(self) -> Result<Row, DataStoreError>;
    fn from_row(row: Row) -> Result<Self, DataStoreError>;
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>, DataStoreError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| DataStoreError::InvalidRow(format!("timestamp {} out of range", millis)))
}
