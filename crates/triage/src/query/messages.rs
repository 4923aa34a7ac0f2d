//! Message and channel listings

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Channel, Message, MessageId};
use crate::storage::MailStore;

/// Summary information for displaying a message in a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: MessageId,
    /// Display name of the sender, when known
    pub sender_name: Option<String>,
    pub sender_email: String,
    pub subject: String,
    pub snippet: String,
    pub received_at: DateTime<Utc>,
    pub channel: String,
    /// 1 (low) to 5 (urgent)
    pub importance: u8,
    pub deadline: Option<NaiveDate>,
    pub is_unread: bool,
}

impl From<Message> for MessageSummary {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            sender_name: message.from.name,
            sender_email: message.from.email,
            subject: message.subject,
            snippet: message.snippet,
            received_at: message.received_at,
            channel: message.channel,
            importance: message.importance.value(),
            deadline: message.deadline,
            is_unread: !message.is_read,
        }
    }
}

/// Convert messages to summaries, keeping their order
pub fn summaries(messages: Vec<Message>) -> Vec<MessageSummary> {
    messages.into_iter().map(MessageSummary::from).collect()
}

/// List non-trashed messages, newest first
///
/// # Arguments
/// * `store` - The storage backend
/// * `channel` - Restrict to one channel, or `None` for all
/// * `limit` - Maximum number of messages to return
/// * `offset` - Number of messages to skip
pub fn list_messages(
    store: &dyn MailStore,
    channel: Option<&str>,
    limit: usize,
    offset: usize,
) -> Result<Vec<MessageSummary>> {
    Ok(summaries(store.list_messages(channel, limit, offset)?))
}

/// Channels in display order with their non-trashed counts
pub fn list_channels(store: &dyn MailStore) -> Result<Vec<Channel>> {
    store.list_channels()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::EmailAddress;
    use crate::storage::InMemoryMailStore;

    fn setup_test_store() -> InMemoryMailStore {
        let store = InMemoryMailStore::new();
        for i in 0..5 {
            let message = Message::builder(MessageId::new(format!("m{}", i)))
                .from(EmailAddress::with_name(
                    format!("User {}", i),
                    format!("user{}@example.com", i),
                ))
                .subject(format!("Subject {}", i))
                .received_at(Utc.timestamp_opt(1_700_000_000 + i * 60, 0).unwrap())
                .channel(if i % 2 == 0 { "People" } else { "Receipts" })
                .read(i % 2 == 0)
                .trashed(i == 4)
                .build();
            store.upsert_message(message).unwrap();
        }
        store
    }

    #[test]
    fn test_list_messages_newest_first_without_trash() {
        let store = setup_test_store();
        let listed = list_messages(&store, None, 10, 0).unwrap();
        let ids: Vec<_> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2", "m1", "m0"]);
    }

    #[test]
    fn test_list_messages_by_channel_with_paging() {
        let store = setup_test_store();
        let people = list_messages(&store, Some("People"), 10, 0).unwrap();
        assert_eq!(people.len(), 2);
        assert!(people.iter().all(|m| m.channel == "People"));

        let page = list_messages(&store, None, 2, 1).unwrap();
        let ids: Vec<_> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);
    }

    #[test]
    fn test_summary_fields() {
        let store = setup_test_store();
        let summary = list_messages(&store, Some("Receipts"), 1, 0).unwrap().remove(0);
        assert_eq!(summary.id.as_str(), "m3");
        assert_eq!(summary.sender_name.as_deref(), Some("User 3"));
        assert_eq!(summary.sender_email, "user3@example.com");
        assert!(summary.is_unread);
        assert_eq!(summary.importance, 3);
    }
}
