//! Remote mailbox provider boundary
//!
//! The engine only talks to the remote through [`MailProvider`]. A Gmail
//! implementation lives in [`gmail`]; [`InMemoryProvider`] is a scriptable
//! fake for tests and demos.

mod error;
pub mod gmail;
mod memory;
mod retry;

pub use error::RemoteError;
pub use memory::InMemoryProvider;
pub use retry::{RetryPolicy, with_retry};

use chrono::{DateTime, Utc};

use crate::models::{EmailAddress, MessageBody, MessageId};

/// Provider label marking a message as trashed
pub const LABEL_TRASH: &str = "TRASH";
/// Provider label marking a message as unread
pub const LABEL_UNREAD: &str = "UNREAD";
/// Provider label for messages the provider considers important
pub const LABEL_IMPORTANT: &str = "IMPORTANT";

/// Message metadata as observed on the remote, before classification
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMessage {
    pub id: MessageId,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub subject: String,
    pub snippet: String,
    pub received_at: DateTime<Utc>,
    pub labels: Vec<String>,
    /// Per-message revision (Gmail historyId), monotonically increasing
    pub revision: Option<u64>,
    /// `List-Unsubscribe` header, present on most bulk mail
    pub list_unsubscribe: Option<String>,
    /// `Precedence` header ("bulk", "list", ...)
    pub precedence: Option<String>,
    /// `Expires` or `Expiry-Date` header
    pub expires: Option<String>,
}

impl RemoteMessage {
    pub fn new(id: impl Into<MessageId>, from: EmailAddress, received_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            from,
            to: Vec::new(),
            cc: Vec::new(),
            subject: String::new(),
            snippet: String::new(),
            received_at,
            labels: Vec::new(),
            revision: None,
            list_unsubscribe: None,
            precedence: None,
            expires: None,
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn is_trashed(&self) -> bool {
        self.has_label(LABEL_TRASH)
    }

    pub fn is_read(&self) -> bool {
        !self.has_label(LABEL_UNREAD)
    }
}

/// Changes reported since an incremental cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Messages added or modified (labels, read state, trash)
    pub changed: Vec<MessageId>,
    /// Messages permanently deleted on the remote
    pub deleted: Vec<MessageId>,
    /// Cursor to resume from next time
    pub cursor: String,
}

/// One page of the newest-first message listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub ids: Vec<MessageId>,
    /// Continuation token for the next older page; `None` at the end
    pub next_token: Option<String>,
}

/// Remote mailbox operations used by the engine
///
/// Every call may block on the network. Callers must not hold the store
/// writer lock while calling into a provider.
pub trait MailProvider: Send + Sync {
    /// Cursor representing "now", used to bootstrap incremental sync
    fn current_cursor(&self) -> Result<String, RemoteError>;

    /// Every change since `cursor`, following provider pagination
    ///
    /// Returns [`RemoteError::CursorExpired`] when the provider can no longer
    /// replay from `cursor`.
    fn list_changes(&self, cursor: &str) -> Result<ChangeSet, RemoteError>;

    /// One page of message IDs, newest first; `None` token starts at the top
    fn list_page(&self, token: Option<&str>, page_size: usize) -> Result<Page, RemoteError>;

    /// Metadata and snippet for one message
    fn fetch_metadata(&self, id: &MessageId) -> Result<RemoteMessage, RemoteError>;

    /// Full body for one message
    fn fetch_body(&self, id: &MessageId) -> Result<MessageBody, RemoteError>;

    /// Move a message to the trash
    fn trash(&self, id: &MessageId) -> Result<(), RemoteError>;

    /// Remove the unread flag
    fn mark_read(&self, id: &MessageId) -> Result<(), RemoteError>;
}
