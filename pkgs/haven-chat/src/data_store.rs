//! External collaborator interfaces
//!
//! The chat core never owns data; it talks to three collaborators:
//!
//! - **DataStore**: query/insert/update/subscribe over named tables
//! - **FileStorage**: blob uploads for attachments
//! - **MessageObserver**: hook invoked for each newly seen inbound message
//!
//! Implementations live outside this module: `memory` ships in-process
//! versions, and the `haven-store` crate provides a SQLite backend.

use crate::error::DataStoreError;
use crate::models::Message;
use crate::rows::Row;
use async_trait::async_trait;
use chrono::DateTime;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Value of a missing column
pub(crate) static NULL: Value = Value::Null;

/// Tables the chat core reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    Conversations,
    Messages,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Conversations => "conversations",
            Table::Messages => "messages",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Row filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn ne(column: &str, value: impl Into<Value>) -> Self {
        Filter::Ne(column.to_string(), value.into())
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        )
    }

    /// Evaluate the filter against a row; missing columns compare as `null`
    pub fn matches(&self, row: &Row) -> bool {
        let field = |column: &str| row.get(column).unwrap_or(&NULL);
        match self {
            Filter::All => true,
            Filter::Eq(column, value) => field(column) == value,
            Filter::Ne(column, value) => field(column) != value,
            Filter::In(column, values) => values.contains(field(column)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
        }
    }
}

/// Sort column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: false,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: true,
        }
    }

    /// Compare two rows on this column
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ord = compare_values(
            a.get(&self.column).unwrap_or(&NULL),
            b.get(&self.column).unwrap_or(&NULL),
        );
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }
}

/// Offset/limit window over a query result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub offset: usize,
    pub limit: usize,
}

impl Range {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

/// A read against one table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub filter: Filter,
    pub order: Vec<OrderBy>,
    pub range: Option<Range>,
}

impl Query {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            filter: Filter::All,
            order: Vec::new(),
            range: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    /// Apply ordering and range to rows that already passed the filter
    pub fn sort_and_slice(&self, mut rows: Vec<Row>) -> Vec<Row> {
        rows.sort_by(|a, b| {
            self.order
                .iter()
                .map(|o| o.compare(a, b))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        match self.range {
            Some(range) => rows
                .into_iter()
                .skip(range.offset)
                .take(range.limit)
                .collect(),
            None => rows,
        }
    }
}

/// Order JSON values the way a relational store would order the columns
///
/// `null` sorts first. Strings that parse as RFC 3339 timestamps on both sides
/// compare chronologically, since serialized fractional seconds vary in width.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row change published by the data store
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub row: Row,
}

/// Item of a subscription feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Change(ChangeEvent),
    /// The subscription dropped; events may have been missed
    Disconnected,
    /// The subscription is live again after a drop
    Reconnected,
}

/// Subscription feed; delivery is at-least-once and unordered
pub type ChangeStream = BoxStream<'static, FeedEvent>;

/// Data-store collaborator
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Fetch rows matching the query
    async fn query(&self, query: Query) -> Result<Vec<Row>, DataStoreError>;

    /// Insert a row and return it as stored (with server-assigned fields)
    async fn insert(&self, table: Table, row: Row) -> Result<Row, DataStoreError>;

    /// Apply `patch` to every row matching `filter`
    async fn update(&self, table: Table, filter: Filter, patch: Row)
        -> Result<(), DataStoreError>;

    /// Subscribe to changes of rows matching `filter`
    async fn subscribe(&self, table: Table, filter: Filter)
        -> Result<ChangeStream, DataStoreError>;
}

/// File-storage collaborator
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store a blob at `bucket_path` and return its locator
    async fn upload(&self, bucket_path: &str, bytes: Vec<u8>) -> Result<String, DataStoreError>;
}

/// Extension point for notification delivery
pub trait MessageObserver: Send + Sync {
    fn on_message_inserted(&self, message: &Message);
}
