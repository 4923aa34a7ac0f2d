//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{
    Channel, CursorAdvance, IndexEntry, Message, MessageBody, MessageId, Summary, SyncState,
};

/// Everything a sync pass or mutation commits at once
///
/// Implementations apply a batch atomically: either every record write and
/// the cursor advance land, or none do.
#[derive(Debug, Clone)]
pub struct StoreBatch {
    /// Mailbox scope whose cursors move
    pub scope: String,
    /// Messages to insert or replace
    pub upserts: Vec<Message>,
    /// Messages the remote confirmed as permanently deleted
    pub deletions: Vec<MessageId>,
    /// Channel taxonomy snapshot to publish (replaces the previous one)
    pub channels: Option<Vec<Channel>>,
    pub cursor: CursorAdvance,
    /// Set when this batch completes an incremental sync
    pub synced_at: Option<DateTime<Utc>>,
}

impl StoreBatch {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            upserts: Vec::new(),
            deletions: Vec::new(),
            channels: None,
            cursor: CursorAdvance::None,
            synced_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty()
            && self.deletions.is_empty()
            && self.channels.is_none()
            && self.cursor == CursorAdvance::None
            && self.synced_at.is_none()
    }
}

/// Durable local cache of messages, bodies, cursors, summaries and search entries
///
/// Implementations must allow any number of concurrent readers. Writers are
/// serialized by the caller (see `service::MailService`), so implementations
/// only need to keep each call internally consistent.
pub trait MailStore: Send + Sync {
    /// Get a message by ID, trashed or not
    fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Get several messages; missing IDs are skipped, order is unspecified
    fn get_messages(&self, ids: &[MessageId]) -> Result<Vec<Message>>;

    /// Check if a message exists
    fn has_message(&self, id: &MessageId) -> Result<bool>;

    /// List non-trashed messages, optionally restricted to a channel,
    /// ordered by received_at descending (ties by ID)
    fn list_messages(
        &self,
        channel: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>>;

    /// Every stored message, including trashed ones
    fn list_all_messages(&self) -> Result<Vec<Message>>;

    /// Messages carrying an unconfirmed local mutation
    fn list_pending(&self) -> Result<Vec<Message>>;

    /// Count stored messages, including trashed ones
    fn count_messages(&self) -> Result<usize>;

    /// Insert or replace a single message
    fn upsert_message(&self, message: Message) -> Result<()>;

    /// Apply a batch atomically
    fn commit_batch(&self, batch: StoreBatch) -> Result<()>;

    /// Published channel taxonomy with non-trashed counts, ordered for display
    ///
    /// Empty until a sync has published a taxonomy.
    fn list_channels(&self) -> Result<Vec<Channel>>;

    /// Get sync state for a scope
    fn get_sync_state(&self, scope: &str) -> Result<Option<SyncState>>;

    /// Get a cached body
    fn get_body(&self, id: &MessageId) -> Result<Option<MessageBody>>;

    /// Cache a body unless one already exists; returns whether it was written
    fn save_body(&self, id: &MessageId, body: &MessageBody) -> Result<bool>;

    /// Get the cached summary for a message
    fn get_summary(&self, id: &MessageId) -> Result<Option<Summary>>;

    /// Store a summary, replacing any previous one for the same message
    fn save_summary(&self, summary: &Summary) -> Result<()>;

    /// Store a search entry, replacing any previous one for the same message
    fn save_index_entry(&self, entry: &IndexEntry) -> Result<()>;

    /// Load every search entry
    fn load_index_entries(&self) -> Result<Vec<IndexEntry>>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}
