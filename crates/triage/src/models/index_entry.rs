//! Persisted search feature for one message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// Embedding of a message's index text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub message_id: MessageId,
    /// L2-normalized embedding
    pub vector: Vec<f32>,
    /// Whether the vector was computed from the full body rather than the snippet
    pub from_body: bool,
    pub indexed_at: DateTime<Utc>,
}
