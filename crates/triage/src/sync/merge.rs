//! Merging remote observations into cached messages
//!
//! Last-writer-wins by remote revision. A message carrying an unconfirmed
//! local mutation keeps its local state during regular syncs; reconciliation
//! makes the remote authoritative again.

use chrono::{DateTime, Utc};

use crate::classify::Classification;
use crate::models::Message;
use crate::remote::RemoteMessage;

/// Result of merging one observation
#[derive(Debug, Clone, PartialEq)]
pub enum Merge {
    Insert(Message),
    Update(Message),
    Unchanged,
}

/// How the merge treats a pending local mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Regular sync: a pending local write is kept
    Sync,
    /// Reconciliation: the remote state replaces the local one
    Reconcile,
}

/// Build the cached form of a remote message
pub fn to_message(
    remote: &RemoteMessage,
    classification: &Classification,
    now: DateTime<Utc>,
) -> Message {
    let mut message = Message::builder(remote.id.clone())
        .from(remote.from.clone())
        .to(remote.to.clone())
        .cc(remote.cc.clone())
        .subject(remote.subject.clone())
        .snippet(remote.snippet.clone())
        .received_at(remote.received_at)
        .labels(remote.labels.clone())
        .channel(classification.channel.clone())
        .importance(classification.importance)
        .deadline(classification.deadline)
        .read(remote.is_read())
        .trashed(remote.is_trashed())
        .revision(remote.revision)
        .build();
    message.updated_at = now;
    message
}

/// Merge `remote` into the cached `existing` message
pub fn merge(
    existing: Option<&Message>,
    remote: &RemoteMessage,
    classification: &Classification,
    mode: MergeMode,
    now: DateTime<Utc>,
) -> Merge {
    let incoming = to_message(remote, classification, now);
    let Some(existing) = existing else {
        return Merge::Insert(incoming);
    };

    if mode == MergeMode::Sync {
        if existing.sync_pending {
            return Merge::Unchanged;
        }
        if let (Some(current), Some(observed)) = (existing.revision, incoming.revision)
            && observed < current
        {
            return Merge::Unchanged;
        }
    }

    let same_classification = existing.channel == incoming.channel
        && existing.importance == incoming.importance
        && existing.deadline == incoming.deadline;
    if existing.same_remote_state(&incoming) && same_classification && !existing.sync_pending {
        return Merge::Unchanged;
    }

    Merge::Update(incoming)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::{EmailAddress, Importance};
    use crate::remote::{LABEL_TRASH, LABEL_UNREAD};

    fn remote(revision: u64, labels: &[&str]) -> RemoteMessage {
        let mut m = RemoteMessage::new(
            "m1",
            EmailAddress::new("a@example.com"),
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        );
        m.subject = "Hello".to_string();
        m.labels = labels.iter().map(|l| l.to_string()).collect();
        m.revision = Some(revision);
        m
    }

    fn people() -> Classification {
        Classification {
            channel: "People".to_string(),
            importance: Importance::default(),
            deadline: None,
        }
    }

    #[test]
    fn test_insert_new() {
        let observed = remote(1, &["INBOX", LABEL_UNREAD]);
        let merged = merge(None, &observed, &people(), MergeMode::Sync, Utc::now());
        let Merge::Insert(message) = merged else {
            panic!("expected insert");
        };
        assert!(!message.is_read);
        assert!(!message.is_trashed);
        assert_eq!(message.channel, "People");
    }

    #[test]
    fn test_replay_is_unchanged() {
        let now = Utc::now();
        let observed = remote(5, &["INBOX"]);
        let existing = to_message(&observed, &people(), now);
        assert_eq!(
            merge(Some(&existing), &observed, &people(), MergeMode::Sync, now),
            Merge::Unchanged
        );
    }

    #[test]
    fn test_stale_revision_loses() {
        let now = Utc::now();
        let existing = to_message(&remote(9, &[LABEL_TRASH]), &people(), now);
        let observed = remote(4, &["INBOX"]);
        let merged = merge(Some(&existing), &observed, &people(), MergeMode::Sync, now);
        assert_eq!(merged, Merge::Unchanged);
    }

    #[test]
    fn test_newer_revision_wins() {
        let now = Utc::now();
        let existing = to_message(&remote(4, &["INBOX", LABEL_UNREAD]), &people(), now);
        let Merge::Update(updated) =
            merge(Some(&existing), &remote(6, &["INBOX"]), &people(), MergeMode::Sync, now)
        else {
            panic!("expected update");
        };
        assert!(updated.is_read);
    }

    #[test]
    fn test_reclassification_is_an_update() {
        let now = Utc::now();
        let observed = remote(5, &["INBOX"]);
        let existing = to_message(&observed, &people(), now);
        let receipts = Classification {
            channel: "Receipts".to_string(),
            importance: Importance::clamped(2),
            deadline: None,
        };
        let merged = merge(Some(&existing), &observed, &receipts, MergeMode::Sync, now);
        let Merge::Update(updated) = merged else {
            panic!("expected update");
        };
        assert_eq!(updated.channel, "Receipts");
    }

    #[test]
    fn test_pending_local_write_kept_until_reconcile() {
        let now = Utc::now();
        let mut existing = to_message(&remote(5, &["INBOX"]), &people(), now);
        existing.is_trashed = true;
        existing.sync_pending = true;

        let observed = remote(7, &["INBOX"]);
        assert_eq!(
            merge(Some(&existing), &observed, &people(), MergeMode::Sync, now),
            Merge::Unchanged
        );

        let merged = merge(Some(&existing), &observed, &people(), MergeMode::Reconcile, now);
        let Merge::Update(reconciled) = merged else {
            panic!("expected update");
        };
        assert!(!reconciled.is_trashed);
        assert!(!reconciled.sync_pending);
    }
}
