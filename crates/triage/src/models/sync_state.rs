//! Sync cursors for a mailbox scope
//!
//! Two cursors are tracked independently: the incremental cursor advances
//! toward "now" and the historical token recedes into the past.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// Position of the historical walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryToken {
    /// Resume from the persisted boundary, or from the newest page if none
    Start,
    /// Provider continuation token for the next older page
    Page(String),
    /// Nothing older remains
    Exhausted,
}

impl HistoryToken {
    /// Wire form of [`HistoryToken::Exhausted`]
    pub const EXHAUSTED: &'static str = "$end";

    /// Decode the string form used at the service boundary
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "" => Self::Start,
            Self::EXHAUSTED => Self::Exhausted,
            other => Self::Page(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> String {
        match self {
            Self::Start => String::new(),
            Self::Page(token) => token.clone(),
            Self::Exhausted => Self::EXHAUSTED.to_string(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

/// Persisted sync progress for one mailbox scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Mailbox scope (account address, or "me")
    pub scope: String,
    /// Provider cursor for incremental sync; `None` until the first sync commits
    pub incremental_cursor: Option<String>,
    /// Historical walk position; `None` until the first page commits
    pub historical: Option<HistoryToken>,
    /// When the last incremental sync committed
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Messages whose fetch failed and are retried on the next pass
    #[serde(default)]
    pub failed_ids: Vec<MessageId>,
}

impl SyncState {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            incremental_cursor: None,
            historical: None,
            last_sync_at: None,
            failed_ids: Vec::new(),
        }
    }

    /// An incremental sync has committed at least once
    pub fn has_synced(&self) -> bool {
        self.last_sync_at.is_some()
    }
}

/// Cursor movement committed together with a batch
#[derive(Debug, Clone, PartialEq)]
pub enum CursorAdvance {
    Incremental {
        cursor: String,
        failed_ids: Vec<MessageId>,
    },
    /// One history page merged; `from` is the page the walk started at
    Historical { from: HistoryToken, next: HistoryToken },
    /// Merge only, cursors untouched
    None,
}

/// Pick the cursor to persist so it never moves backward
///
/// Cursors are opaque, but providers that use numeric cursors (Gmail history
/// ids) can be compared; non-numeric cursors always take the newer value.
pub fn advance_cursor(current: Option<&str>, proposed: &str) -> String {
    match (current.and_then(|c| c.parse::<u64>().ok()), proposed.parse::<u64>().ok()) {
        (Some(old), Some(new)) if new < old => old.to_string(),
        _ => proposed.to_string(),
    }
}

/// Pick the historical token to persist so the walk never moves forward
///
/// An exhausted walk stays exhausted. Otherwise `next` is kept only when the
/// page started at the persisted boundary; a replay of an older token merges
/// its messages without moving the boundary.
pub fn advance_history(
    current: Option<&HistoryToken>,
    from: &HistoryToken,
    next: HistoryToken,
) -> HistoryToken {
    match current {
        Some(HistoryToken::Exhausted) => HistoryToken::Exhausted,
        None | Some(HistoryToken::Start) => next,
        Some(boundary) if boundary == from => next,
        Some(boundary) => boundary.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_token_wire_form() {
        assert_eq!(HistoryToken::parse(""), HistoryToken::Start);
        assert_eq!(HistoryToken::parse("$end"), HistoryToken::Exhausted);
        assert_eq!(HistoryToken::parse("abc"), HistoryToken::Page("abc".to_string()));
        assert_eq!(HistoryToken::Exhausted.as_wire(), "$end");
        assert_eq!(HistoryToken::Start.as_wire(), "");
    }

    #[test]
    fn test_advance_cursor_never_moves_back() {
        assert_eq!(advance_cursor(Some("200"), "150"), "200");
        assert_eq!(advance_cursor(Some("200"), "250"), "250");
        assert_eq!(advance_cursor(None, "10"), "10");
        assert_eq!(advance_cursor(Some("opaque-a"), "opaque-b"), "opaque-b");
    }

    #[test]
    fn test_advance_history_recedes_only() {
        let page = |t: &str| HistoryToken::Page(t.to_string());

        assert_eq!(advance_history(None, &HistoryToken::Start, page("1")), page("1"));
        assert_eq!(advance_history(Some(&page("1")), &page("1"), page("2")), page("2"));
        // Replay of an older page leaves the boundary alone
        assert_eq!(advance_history(Some(&page("2")), &page("1"), page("2")), page("2"));
        assert_eq!(
            advance_history(Some(&HistoryToken::Exhausted), &page("1"), page("2")),
            HistoryToken::Exhausted
        );
        assert_eq!(
            advance_history(Some(&page("2")), &page("2"), HistoryToken::Exhausted),
            HistoryToken::Exhausted
        );
    }

    #[test]
    fn test_new_state_not_synced() {
        let state = SyncState::new("me");
        assert!(!state.has_synced());
        assert!(state.historical.is_none());
    }

    #[test]
    fn test_serialization() {
        let mut state = SyncState::new("me");
        state.historical = Some(HistoryToken::Page("p2".to_string()));
        let json = serde_json::to_string(&state).unwrap();
        let back: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
