//! Scriptable in-memory mailbox
//!
//! Behaves like a small Gmail: every mutation bumps a global history counter,
//! incremental cursors are history counters, and pages are newest first.
//! Tests drive outages and failures through the setter methods.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ChangeSet, LABEL_TRASH, LABEL_UNREAD, MailProvider, Page, RemoteError, RemoteMessage};
use crate::models::{MessageBody, MessageId};

#[derive(Debug, Clone, PartialEq)]
enum Change {
    Changed(MessageId),
    Deleted(MessageId),
}

#[derive(Default)]
struct Mailbox {
    messages: BTreeMap<MessageId, RemoteMessage>,
    bodies: HashMap<MessageId, MessageBody>,
    history: Vec<(u64, Change)>,
    history_id: u64,
    /// Cursors older than this report `CursorExpired`
    oldest_replayable: u64,
    outage: bool,
    failing_metadata: HashSet<MessageId>,
    trash_failing: bool,
}

impl Mailbox {
    fn record(&mut self, change: Change) -> u64 {
        self.history_id += 1;
        self.history.push((self.history_id, change));
        self.history_id
    }

    fn check_outage(&self) -> Result<(), RemoteError> {
        if self.outage {
            return Err(RemoteError::unavailable("simulated outage"));
        }
        Ok(())
    }
}

/// In-memory [`MailProvider`] with call counters
#[derive(Default)]
pub struct InMemoryProvider {
    mailbox: Mutex<Mailbox>,
    metadata_fetches: AtomicUsize,
    body_fetches: AtomicUsize,
    trash_calls: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn mailbox(&self) -> std::sync::MutexGuard<'_, Mailbox> {
        // A poisoned fake only happens after a test already panicked
        self.mailbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a message (or replace one with the same ID)
    pub fn add_message(&self, mut message: RemoteMessage) {
        let mut mailbox = self.mailbox();
        let revision = mailbox.record(Change::Changed(message.id.clone()));
        message.revision = Some(revision);
        mailbox.messages.insert(message.id.clone(), message);
    }

    /// Add a message together with its body
    pub fn add_message_with_body(&self, message: RemoteMessage, body: MessageBody) {
        let id = message.id.clone();
        self.add_message(message);
        self.mailbox().bodies.insert(id, body);
    }

    /// Change a message remotely; returns false if it does not exist
    pub fn update_message(&self, id: &MessageId, f: impl FnOnce(&mut RemoteMessage)) -> bool {
        let mut mailbox = self.mailbox();
        if !mailbox.messages.contains_key(id) {
            return false;
        }
        let revision = mailbox.record(Change::Changed(id.clone()));
        if let Some(message) = mailbox.messages.get_mut(id) {
            f(message);
            message.revision = Some(revision);
        }
        true
    }

    /// Permanently delete a message remotely
    pub fn delete_message(&self, id: &MessageId) {
        let mut mailbox = self.mailbox();
        if mailbox.messages.remove(id).is_some() {
            mailbox.bodies.remove(id);
            mailbox.record(Change::Deleted(id.clone()));
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<RemoteMessage> {
        self.mailbox().messages.get(id).cloned()
    }

    /// Fail every call with [`RemoteError::Unavailable`] while set
    pub fn set_outage(&self, outage: bool) {
        self.mailbox().outage = outage;
    }

    /// Fail metadata fetches for one message
    pub fn fail_metadata_for(&self, id: &MessageId, failing: bool) {
        let mut mailbox = self.mailbox();
        if failing {
            mailbox.failing_metadata.insert(id.clone());
        } else {
            mailbox.failing_metadata.remove(id);
        }
    }

    /// Fail trash calls while set
    pub fn set_trash_failing(&self, failing: bool) {
        self.mailbox().trash_failing = failing;
    }

    /// Forget history so existing cursors expire
    pub fn expire_history(&self) {
        let mut mailbox = self.mailbox();
        mailbox.oldest_replayable = mailbox.history_id;
        mailbox.history.clear();
    }

    pub fn metadata_fetch_count(&self) -> usize {
        self.metadata_fetches.load(Ordering::SeqCst)
    }

    pub fn body_fetch_count(&self) -> usize {
        self.body_fetches.load(Ordering::SeqCst)
    }

    pub fn trash_call_count(&self) -> usize {
        self.trash_calls.load(Ordering::SeqCst)
    }
}

impl MailProvider for InMemoryProvider {
    fn current_cursor(&self) -> Result<String, RemoteError> {
        let mailbox = self.mailbox();
        mailbox.check_outage()?;
        Ok(mailbox.history_id.to_string())
    }

    fn list_changes(&self, cursor: &str) -> Result<ChangeSet, RemoteError> {
        let mailbox = self.mailbox();
        mailbox.check_outage()?;

        let since: u64 = cursor.parse().map_err(|_| RemoteError::CursorExpired)?;
        if since < mailbox.oldest_replayable {
            return Err(RemoteError::CursorExpired);
        }

        let mut changed = Vec::new();
        let mut deleted = Vec::new();
        for (_, change) in mailbox.history.iter().filter(|(rev, _)| *rev > since) {
            match change {
                Change::Changed(id) => {
                    if !changed.contains(id) {
                        changed.push(id.clone());
                    }
                }
                Change::Deleted(id) => {
                    changed.retain(|c| c != id);
                    if !deleted.contains(id) {
                        deleted.push(id.clone());
                    }
                }
            }
        }
        // Re-added after deletion
        deleted.retain(|id| !mailbox.messages.contains_key(id));

        Ok(ChangeSet {
            changed,
            deleted,
            cursor: mailbox.history_id.to_string(),
        })
    }

    fn list_page(&self, token: Option<&str>, page_size: usize) -> Result<Page, RemoteError> {
        let mailbox = self.mailbox();
        mailbox.check_outage()?;

        let offset: usize = match token {
            Some(token) => token.parse().map_err(|_| RemoteError::Rejected {
                status: 400,
                message: format!("invalid page token {:?}", token),
            })?,
            None => 0,
        };

        let mut listed: Vec<&RemoteMessage> =
            mailbox.messages.values().filter(|m| !m.is_trashed()).collect();
        listed.sort_by(|a, b| b.received_at.cmp(&a.received_at).then_with(|| a.id.cmp(&b.id)));

        let ids: Vec<MessageId> = listed
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|m| m.id.clone())
            .collect();
        let end = offset + ids.len();
        let next_token = (end < listed.len()).then(|| end.to_string());

        Ok(Page { ids, next_token })
    }

    fn fetch_metadata(&self, id: &MessageId) -> Result<RemoteMessage, RemoteError> {
        self.metadata_fetches.fetch_add(1, Ordering::SeqCst);
        let mailbox = self.mailbox();
        mailbox.check_outage()?;
        if mailbox.failing_metadata.contains(id) {
            return Err(RemoteError::unavailable(format!("metadata fetch failed for {}", id)));
        }
        mailbox
            .messages
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound { id: id.to_string() })
    }

    fn fetch_body(&self, id: &MessageId) -> Result<MessageBody, RemoteError> {
        self.body_fetches.fetch_add(1, Ordering::SeqCst);
        let mailbox = self.mailbox();
        mailbox.check_outage()?;
        if !mailbox.messages.contains_key(id) {
            return Err(RemoteError::NotFound { id: id.to_string() });
        }
        Ok(mailbox
            .bodies
            .get(id)
            .cloned()
            .unwrap_or_else(|| MessageBody::plain("")))
    }

    fn trash(&self, id: &MessageId) -> Result<(), RemoteError> {
        self.trash_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mailbox = self.mailbox();
            mailbox.check_outage()?;
            if mailbox.trash_failing {
                return Err(RemoteError::unavailable("trash failed"));
            }
        }
        let trashed = self.update_message(id, |m| {
            if !m.is_trashed() {
                m.labels.retain(|l| l != "INBOX");
                m.labels.push(LABEL_TRASH.to_string());
            }
        });
        if trashed {
            Ok(())
        } else {
            Err(RemoteError::NotFound { id: id.to_string() })
        }
    }

    fn mark_read(&self, id: &MessageId) -> Result<(), RemoteError> {
        self.mailbox().check_outage()?;
        if self.update_message(id, |m| m.labels.retain(|l| l != LABEL_UNREAD)) {
            Ok(())
        } else {
            Err(RemoteError::NotFound { id: id.to_string() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailAddress;
    use chrono::{Duration, Utc};

    fn remote(id: &str, age_hours: i64) -> RemoteMessage {
        let mut message = RemoteMessage::new(
            id,
            EmailAddress::new("a@example.com"),
            Utc::now() - Duration::hours(age_hours),
        );
        message.labels = vec!["INBOX".to_string(), LABEL_UNREAD.to_string()];
        message
    }

    #[test]
    fn test_pages_newest_first() {
        let provider = InMemoryProvider::new();
        for (id, age) in [("a", 3), ("b", 2), ("c", 1)] {
            provider.add_message(remote(id, age));
        }

        let first = provider.list_page(None, 2).unwrap();
        assert_eq!(first.ids, vec![MessageId::new("c"), MessageId::new("b")]);
        let second = provider.list_page(first.next_token.as_deref(), 2).unwrap();
        assert_eq!(second.ids, vec![MessageId::new("a")]);
        assert!(second.next_token.is_none());
    }

    #[test]
    fn test_changes_since_cursor() {
        let provider = InMemoryProvider::new();
        provider.add_message(remote("a", 1));
        let cursor = provider.current_cursor().unwrap();
        provider.add_message(remote("b", 0));
        provider.delete_message(&MessageId::new("a"));

        let changes = provider.list_changes(&cursor).unwrap();
        assert_eq!(changes.changed, vec![MessageId::new("b")]);
        assert_eq!(changes.deleted, vec![MessageId::new("a")]);
        assert_ne!(changes.cursor, cursor);
    }

    #[test]
    fn test_expired_cursor() {
        let provider = InMemoryProvider::new();
        provider.add_message(remote("a", 1));
        let cursor = provider.current_cursor().unwrap();
        provider.add_message(remote("b", 0));
        provider.expire_history();
        assert_eq!(provider.list_changes(&cursor), Err(RemoteError::CursorExpired));
    }

    #[test]
    fn test_trash_sets_label() {
        let provider = InMemoryProvider::new();
        provider.add_message(remote("a", 1));
        provider.trash(&MessageId::new("a")).unwrap();
        assert!(provider.get(&MessageId::new("a")).unwrap().is_trashed());
        assert!(matches!(
            provider.trash(&MessageId::new("missing")),
            Err(RemoteError::NotFound { .. })
        ));
    }
}
