//! In-memory storage implementation
//!
//! Used by tests and by hosts that do not need persistence. All tables sit
//! behind one `RwLock` so a batch becomes visible to readers atomically.

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::traits::{MailStore, StoreBatch};
use crate::models::{
    Channel, CursorAdvance, IndexEntry, Message, MessageBody, MessageId, Summary, SyncState,
    UNLISTED_CHANNEL_ORDER, advance_cursor, advance_history, sort_channels,
};

#[derive(Default)]
struct Tables {
    messages: HashMap<MessageId, Message>,
    bodies: HashMap<MessageId, MessageBody>,
    summaries: HashMap<MessageId, Summary>,
    index_entries: HashMap<MessageId, IndexEntry>,
    /// Published taxonomy: name -> display order
    channels: Vec<Channel>,
    sync_states: HashMap<String, SyncState>,
}

/// In-memory implementation of [`MailStore`]
#[derive(Default)]
pub struct InMemoryMailStore {
    tables: RwLock<Tables>,
}

impl InMemoryMailStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|e| anyhow!("Lock poisoned: {}", e))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|e| anyhow!("Lock poisoned: {}", e))
    }
}

fn newest_first(a: &Message, b: &Message) -> std::cmp::Ordering {
    b.received_at
        .cmp(&a.received_at)
        .then_with(|| a.id.cmp(&b.id))
}

impl MailStore for InMemoryMailStore {
    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.read()?.messages.get(id).cloned())
    }

    fn get_messages(&self, ids: &[MessageId]) -> Result<Vec<Message>> {
        let tables = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.messages.get(id).cloned())
            .collect())
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        Ok(self.read()?.messages.contains_key(id))
    }

    fn list_messages(
        &self,
        channel: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        let tables = self.read()?;
        let mut listed: Vec<&Message> = tables
            .messages
            .values()
            .filter(|m| m.is_listed())
            .filter(|m| channel.is_none_or(|c| m.channel == c))
            .collect();
        listed.sort_by(|a, b| newest_first(a, b));

        Ok(listed
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn list_all_messages(&self) -> Result<Vec<Message>> {
        let tables = self.read()?;
        let mut all: Vec<Message> = tables.messages.values().cloned().collect();
        all.sort_by(newest_first);
        Ok(all)
    }

    fn list_pending(&self) -> Result<Vec<Message>> {
        let tables = self.read()?;
        Ok(tables
            .messages
            .values()
            .filter(|m| m.sync_pending)
            .cloned()
            .collect())
    }

    fn count_messages(&self) -> Result<usize> {
        Ok(self.read()?.messages.len())
    }

    fn upsert_message(&self, message: Message) -> Result<()> {
        self.write()?.messages.insert(message.id.clone(), message);
        Ok(())
    }

    fn commit_batch(&self, batch: StoreBatch) -> Result<()> {
        let mut tables = self.write()?;

        for message in batch.upserts {
            tables.messages.insert(message.id.clone(), message);
        }

        for id in &batch.deletions {
            tables.messages.remove(id);
            tables.bodies.remove(id);
            tables.summaries.remove(id);
            tables.index_entries.remove(id);
        }

        if let Some(channels) = batch.channels {
            tables.channels = channels;
        }

        let state = tables
            .sync_states
            .entry(batch.scope.clone())
            .or_insert_with(|| SyncState::new(batch.scope.clone()));

        match batch.cursor {
            CursorAdvance::Incremental { cursor, failed_ids } => {
                state.incremental_cursor =
                    Some(advance_cursor(state.incremental_cursor.as_deref(), &cursor));
                state.failed_ids = failed_ids;
            }
            CursorAdvance::Historical { from, next } => {
                state.historical = Some(advance_history(state.historical.as_ref(), &from, next));
            }
            CursorAdvance::None => {}
        }

        if let Some(synced_at) = batch.synced_at {
            state.last_sync_at = Some(synced_at);
        }

        Ok(())
    }

    fn list_channels(&self) -> Result<Vec<Channel>> {
        let tables = self.read()?;
        if tables.channels.is_empty() {
            return Ok(Vec::new());
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for message in tables.messages.values().filter(|m| m.is_listed()) {
            *counts.entry(message.channel.as_str()).or_default() += 1;
        }

        let mut channels: Vec<Channel> = tables
            .channels
            .iter()
            .map(|c| {
                Channel::new(c.name.clone(), c.display_order)
                    .with_message_count(counts.remove(c.name.as_str()).unwrap_or(0))
            })
            .collect();

        // Channels still holding messages after the taxonomy changed
        for (name, count) in counts {
            channels.push(Channel::new(name, UNLISTED_CHANNEL_ORDER).with_message_count(count));
        }

        sort_channels(&mut channels);
        Ok(channels)
    }

    fn get_sync_state(&self, scope: &str) -> Result<Option<SyncState>> {
        Ok(self.read()?.sync_states.get(scope).cloned())
    }

    fn get_body(&self, id: &MessageId) -> Result<Option<MessageBody>> {
        Ok(self.read()?.bodies.get(id).cloned())
    }

    fn save_body(&self, id: &MessageId, body: &MessageBody) -> Result<bool> {
        let mut tables = self.write()?;
        if tables.bodies.contains_key(id) {
            return Ok(false);
        }
        tables.bodies.insert(id.clone(), body.clone());
        Ok(true)
    }

    fn get_summary(&self, id: &MessageId) -> Result<Option<Summary>> {
        Ok(self.read()?.summaries.get(id).cloned())
    }

    fn save_summary(&self, summary: &Summary) -> Result<()> {
        self.write()?
            .summaries
            .insert(summary.message_id.clone(), summary.clone());
        Ok(())
    }

    fn save_index_entry(&self, entry: &IndexEntry) -> Result<()> {
        self.write()?
            .index_entries
            .insert(entry.message_id.clone(), entry.clone());
        Ok(())
    }

    fn load_index_entries(&self) -> Result<Vec<IndexEntry>> {
        Ok(self.read()?.index_entries.values().cloned().collect())
    }

    fn clear(&self) -> Result<()> {
        *self.write()? = Tables::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn make_message(id: &str, channel: &str, age_hours: i64) -> Message {
        Message::builder(MessageId::new(id))
            .subject(format!("Subject {}", id))
            .channel(channel)
            .received_at(Utc::now() - Duration::hours(age_hours))
            .build()
    }

    #[test]
    fn test_list_messages_newest_first_excluding_trashed() {
        let store = InMemoryMailStore::new();
        store.upsert_message(make_message("old", "People", 5)).unwrap();
        store.upsert_message(make_message("new", "People", 1)).unwrap();
        let mut trashed = make_message("gone", "People", 0);
        trashed.is_trashed = true;
        store.upsert_message(trashed).unwrap();
        store.upsert_message(make_message("other", "Receipts", 2)).unwrap();

        let listed = store.list_messages(Some("People"), 10, 0).unwrap();
        let ids: Vec<_> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let all = store.list_messages(None, 10, 0).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_channels_empty_until_published() {
        let store = InMemoryMailStore::new();
        store.upsert_message(make_message("m1", "People", 1)).unwrap();
        assert!(store.list_channels().unwrap().is_empty());

        let mut batch = StoreBatch::new("me");
        batch.channels = Some(vec![Channel::new("Urgent", 0), Channel::new("People", 1)]);
        store.commit_batch(batch).unwrap();

        let channels = store.list_channels().unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[1].name, "People");
        assert_eq!(channels[1].message_count, 1);
        assert_eq!(channels[0].message_count, 0);
    }

    #[test]
    fn test_commit_batch_deletes_dependents() {
        let store = InMemoryMailStore::new();
        let id = MessageId::new("m1");
        store.upsert_message(make_message("m1", "People", 1)).unwrap();
        store.save_body(&id, &MessageBody::plain("hello")).unwrap();
        store.save_summary(&Summary::new(id.clone(), "hi", "model")).unwrap();

        let mut batch = StoreBatch::new("me");
        batch.deletions.push(id.clone());
        store.commit_batch(batch).unwrap();

        assert!(!store.has_message(&id).unwrap());
        assert!(store.get_body(&id).unwrap().is_none());
        assert!(store.get_summary(&id).unwrap().is_none());
    }

    #[test]
    fn test_save_body_is_write_once() {
        let store = InMemoryMailStore::new();
        let id = MessageId::new("m1");
        assert!(store.save_body(&id, &MessageBody::plain("first")).unwrap());
        assert!(!store.save_body(&id, &MessageBody::plain("second")).unwrap());
        assert_eq!(store.get_body(&id).unwrap().unwrap().content, "first");
    }

    #[test]
    fn test_incremental_cursor_never_moves_back() {
        let store = InMemoryMailStore::new();
        for cursor in ["100", "90"] {
            let mut batch = StoreBatch::new("me");
            batch.cursor = CursorAdvance::Incremental {
                cursor: cursor.to_string(),
                failed_ids: Vec::new(),
            };
            store.commit_batch(batch).unwrap();
        }
        let state = store.get_sync_state("me").unwrap().unwrap();
        assert_eq!(state.incremental_cursor.as_deref(), Some("100"));
    }
}
