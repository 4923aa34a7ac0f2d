//! Per-item sync outcomes

use crate::models::MessageId;

/// What a sync pass did with one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Inserted,
    Updated,
    /// Already up to date, or a pending local write was kept
    Unchanged,
    /// Stored with the fallback classification
    Defaulted { reason: String },
    /// Metadata fetch failed; retried on a later pass
    Failed { reason: String },
    /// Permanently deleted on the remote and removed locally
    Deleted,
}

/// Statistics and per-item outcomes from a sync operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub items: Vec<(MessageId, ItemOutcome)>,
    /// Another incremental sync was already running; nothing was done
    pub skipped: bool,
    /// The incremental cursor was missing or expired and was re-established
    pub bootstrapped: bool,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn record(&mut self, id: MessageId, outcome: ItemOutcome) {
        self.items.push((id, outcome));
    }

    /// Latest outcome recorded for `id`
    pub fn outcome_of(&self, id: &MessageId) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .rev()
            .find(|(item, _)| item == id)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, f: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|(_, outcome)| f(outcome)).count()
    }

    pub fn inserted(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Inserted))
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Updated))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Unchanged))
    }

    pub fn defaulted(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Defaulted { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    pub fn deleted(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Deleted))
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.skipped {
            return write!(f, "skipped (sync already running)");
        }
        write!(
            f,
            "{} inserted, {} updated, {} unchanged, {} defaulted, {} failed, {} deleted in {}ms",
            self.inserted(),
            self.updated(),
            self.unchanged(),
            self.defaulted(),
            self.failed(),
            self.deleted(),
            self.duration_ms
        )
    }
}
