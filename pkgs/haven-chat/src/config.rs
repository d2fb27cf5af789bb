//! Chat session configuration

use serde::{Deserialize, Serialize};

/// Configuration for a chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Number of messages fetched per history page (default: 50)
    pub page_size: usize,

    /// Lookups attempted after a duplicate-conversation conflict (default: 3)
    pub conflict_retries: u32,

    /// Storage bucket that attachment uploads go to
    pub attachment_bucket: String,

    /// Capacity of in-process change feeds (default: 256)
    pub feed_buffer: usize,

    /// Foreign conversation ids remembered to skip repeat lookups (default: 256)
    pub foreign_cache_size: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            conflict_retries: 3,
            attachment_bucket: "chat-attachments".to_string(),
            feed_buffer: 256,
            foreign_cache_size: 256,
        }
    }
}
