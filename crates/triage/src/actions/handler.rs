//! Action handler for email operations
//!
//! Each action is applied in two steps:
//! 1. Update local storage and flag the message `sync_pending`
//! 2. Call the remote, then clear the flag on success
//!
//! A failed remote call leaves the flag set. The next sync reconciles the
//! message against the remote, which is authoritative.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use log::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::models::{Message, MessageId};
use crate::remote::{LABEL_TRASH, LABEL_UNREAD, MailProvider, RemoteError};
use crate::search::{IndexJob, Indexer};
use crate::storage::{MailStore, StoreBatch};

const LABEL_INBOX: &str = "INBOX";

/// Result of [`ActionHandler::trash_message`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrashOutcome {
    /// Trashed locally and on the remote
    Confirmed,
    /// Trashed locally; the remote call failed and the next sync reconciles
    Deferred { reason: String },
    AlreadyTrashed,
    /// Unknown locally, or already deleted on the remote
    AlreadyGone,
}

/// Result of [`ActionHandler::mark_read`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Confirmed,
    Deferred { reason: String },
    AlreadyRead,
    AlreadyGone,
}

/// What the remote said about a mutation
enum Remote {
    Confirmed,
    Gone,
    Failed(String),
}

/// Handler for mutations on single messages
pub struct ActionHandler {
    store: Arc<dyn MailStore>,
    provider: Arc<dyn MailProvider>,
    /// Engine-wide writer lock, shared with sync commits
    writer: Arc<Mutex<()>>,
    indexer: Option<Arc<Indexer>>,
    scope: String,
}

impl ActionHandler {
    pub fn new(
        store: Arc<dyn MailStore>,
        provider: Arc<dyn MailProvider>,
        writer: Arc<Mutex<()>>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            writer,
            indexer: None,
            scope: scope.into(),
        }
    }

    /// Drop remotely deleted messages from the search index
    pub fn with_indexer(mut self, indexer: Arc<Indexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, ()>> {
        self.writer.lock().map_err(|e| EngineError::Storage {
            message: format!("Writer lock poisoned: {}", e),
        })
    }

    /// Move a message to the trash
    ///
    /// The message leaves listings immediately. Trashing an already trashed
    /// or unknown message is a successful no-op.
    pub fn trash_message(&self, id: &MessageId) -> EngineResult<TrashOutcome> {
        {
            let _writer = self.lock()?;
            let Some(mut message) = self.store.get_message(id)? else {
                return Ok(TrashOutcome::AlreadyGone);
            };
            if message.is_trashed {
                return Ok(TrashOutcome::AlreadyTrashed);
            }

            message.is_trashed = true;
            message.labels.retain(|l| l != LABEL_INBOX);
            if !message.labels.iter().any(|l| l == LABEL_TRASH) {
                message.labels.push(LABEL_TRASH.to_string());
            }
            self.write_pending(message)?;
        }

        info!("Trashing message {}", id);
        match self.confirm(id, self.provider.trash(id), |m| m.is_trashed)? {
            Remote::Confirmed => Ok(TrashOutcome::Confirmed),
            Remote::Gone => Ok(TrashOutcome::AlreadyGone),
            Remote::Failed(reason) => Ok(TrashOutcome::Deferred { reason }),
        }
    }

    /// Clear the unread flag
    pub fn mark_read(&self, id: &MessageId) -> EngineResult<ReadOutcome> {
        {
            let _writer = self.lock()?;
            let Some(mut message) = self.store.get_message(id)? else {
                return Ok(ReadOutcome::AlreadyGone);
            };
            if message.is_read {
                return Ok(ReadOutcome::AlreadyRead);
            }

            message.is_read = true;
            message.labels.retain(|l| l != LABEL_UNREAD);
            self.write_pending(message)?;
        }

        match self.confirm(id, self.provider.mark_read(id), |m| m.is_read)? {
            Remote::Confirmed => Ok(ReadOutcome::Confirmed),
            Remote::Gone => Ok(ReadOutcome::AlreadyGone),
            Remote::Failed(reason) => Ok(ReadOutcome::Deferred { reason }),
        }
    }

    fn write_pending(&self, mut message: Message) -> EngineResult<()> {
        message.sync_pending = true;
        message.updated_at = Utc::now();
        self.store.upsert_message(message)?;
        Ok(())
    }

    /// Settle the local record after the remote call
    ///
    /// `applied` tells whether the local record still carries the mutation.
    fn confirm(
        &self,
        id: &MessageId,
        result: Result<(), RemoteError>,
        applied: impl Fn(&Message) -> bool,
    ) -> EngineResult<Remote> {
        match result {
            Ok(()) => {
                let _writer = self.lock()?;
                if let Some(mut message) = self.store.get_message(id)?
                    && message.sync_pending
                    && applied(&message)
                {
                    message.sync_pending = false;
                    message.updated_at = Utc::now();
                    self.store.upsert_message(message)?;
                }
                Ok(Remote::Confirmed)
            }
            Err(RemoteError::NotFound { .. }) => {
                info!("Message {} no longer exists remotely, removing", id);
                {
                    let _writer = self.lock()?;
                    let mut batch = StoreBatch::new(self.scope.clone());
                    batch.deletions.push(id.clone());
                    self.store.commit_batch(batch)?;
                }
                if let Some(indexer) = &self.indexer
                    && let Err(e) = indexer.enqueue([IndexJob::Remove(id.clone())])
                {
                    warn!("Failed to queue index removal for {}: {:#}", id, e);
                }
                Ok(Remote::Gone)
            }
            Err(e) => {
                warn!("Remote mutation of {} failed, left pending: {}", id, e);
                Ok(Remote::Failed(e.to_string()))
            }
        }
    }
}
