//! Cached AI summary of a message body

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// One cached summary; at most one exists per message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub message_id: MessageId,
    pub text: String,
    /// Model that produced the text
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

impl Summary {
    pub fn new(message_id: MessageId, text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message_id,
            text: text.into(),
            model: model.into(),
            generated_at: Utc::now(),
        }
    }
}
