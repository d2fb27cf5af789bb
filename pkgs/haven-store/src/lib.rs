//! Haven Store - SQLite persistence for Haven chat
//!
//! This crate provides the data-store and file-storage collaborators that
//! `haven-chat` sessions run against, using Sea-ORM over SQLite.
//!
//! # Database Schema
//!
//! - `profiles`: Display name, role, avatar and presence per user
//! - `conversations`: One row per tenant/manager pair, unique on the pair
//! - `messages`: Message content, attachments (JSON) and read status
//!
//! Inserts and updates are published on an in-process change feed, so every
//! session sharing a [`SqliteDataStore`] sees the writes of the others.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use haven_chat::{Actor, ChatConfig, ChatSession, Role};
//! use haven_store::{LocalFileStorage, SqliteDataStore, StoreConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = StoreConfig {
//!     db_path: "haven.db".into(),
//!     ..Default::default()
//! };
//!
//! let store = Arc::new(SqliteDataStore::new(&config).await?);
//! let files = Arc::new(LocalFileStorage::new(&config.files_dir));
//!
//! let session = ChatSession::new(
//!     Actor::new("tenant-1", Role::Tenant),
//!     store,
//!     files,
//!     &ChatConfig::default(),
//! );
//! session.load().await?;
//! # Ok(())
//! # }
//! ```

pub mod entities;
pub mod file_storage;
mod filter;
pub mod migration;
pub mod sqlite_store;

pub use entities::RowModel;
pub use file_storage::LocalFileStorage;
pub use sqlite_store::SqliteDataStore;

/// Configuration for the persistence layer
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub db_path: std::path::PathBuf,

    /// Directory attachments are written under
    pub files_dir: std::path::PathBuf,

    /// Capacity of the change feed; slower subscribers see a reconnect
    pub feed_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: std::path::PathBuf::from("haven.db"),
            files_dir: std::path::PathBuf::from("haven-files"),
            feed_buffer: 256,
        }
    }
}
