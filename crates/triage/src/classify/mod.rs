//! Message classification
//!
//! Assigns each message a channel, an importance and an optional deadline
//! from its metadata and snippet alone. Bodies are never needed, so
//! classification stays cheap enough to run on every synced message.

mod deadline;
mod model;
mod rules;

pub use deadline::extract_deadline;
pub use model::{ModelClassifier, ModelVerdict, parse_verdict};
pub use rules::{ChannelRule, ChannelRules, MatchText, is_bulk};

use chrono::{Duration, NaiveDate};
use thiserror::Error;

use crate::models::{Channel, Importance};
use crate::remote::{LABEL_IMPORTANT, RemoteMessage};

/// Classifier output for one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub channel: String,
    pub importance: Importance,
    pub deadline: Option<NaiveDate>,
}

/// A classifier could not place a message
#[derive(Debug, Clone, Error)]
#[error("Failed to classify message {id}: {reason}")]
pub struct ClassificationError {
    pub id: String,
    pub reason: String,
}

/// Places messages into channels
///
/// Implementations must be deterministic: identical input yields identical
/// output.
pub trait Classifier: Send + Sync {
    fn classify(&self, message: &RemoteMessage) -> Result<Classification, ClassificationError>;

    /// Channels this classifier can produce, in display order
    fn taxonomy(&self) -> Vec<Channel>;

    /// Classification given to a message whose classification failed
    fn fallback(&self) -> Classification;
}

/// Deadlines this close to the message date raise importance
const NEAR_DEADLINE_DAYS: i64 = 3;

const URGENCY_KEYWORDS: &[&str] = &["urgent", "asap", "immediately", "action required", "reminder"];

/// First-match rule classifier over [`ChannelRules`]
pub struct RuleClassifier {
    rules: ChannelRules,
}

impl RuleClassifier {
    pub fn new(rules: ChannelRules) -> Self {
        Self { rules }
    }

    fn importance(
        &self,
        base: Importance,
        message: &RemoteMessage,
        text: &MatchText,
        deadline: Option<NaiveDate>,
    ) -> Importance {
        let mut score = base.value() as i32;

        if URGENCY_KEYWORDS
            .iter()
            .any(|k| text.subject.contains(k) || text.snippet.contains(k))
        {
            score += 1;
        }
        if message.has_label(LABEL_IMPORTANT) {
            score += 1;
        }
        if let Some(deadline) = deadline
            && deadline - message.received_at.date_naive() <= Duration::days(NEAR_DEADLINE_DAYS)
        {
            score += 1;
        }
        if is_bulk(message) {
            score -= 1;
        }

        Importance::clamped(score)
    }
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new(ChannelRules::default())
    }
}

impl Classifier for RuleClassifier {
    fn classify(&self, message: &RemoteMessage) -> Result<Classification, ClassificationError> {
        let text = MatchText::new(message);
        let deadline = extract_deadline(
            &message.subject,
            &message.snippet,
            message.expires.as_deref(),
            message.received_at,
        );

        let (channel, base) = match self.rules.rules.iter().find(|r| r.matches(message, &text)) {
            Some(rule) => (rule.name.clone(), rule.base_importance()),
            None => (self.rules.fallback.clone(), Importance::default()),
        };

        Ok(Classification {
            channel,
            importance: self.importance(base, message, &text, deadline),
            deadline,
        })
    }

    fn taxonomy(&self) -> Vec<Channel> {
        self.rules.taxonomy()
    }

    fn fallback(&self) -> Classification {
        Classification {
            channel: self.rules.fallback.clone(),
            importance: Importance::default(),
            deadline: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailAddress;
    use chrono::{TimeZone, Utc};

    fn message(from: &str, subject: &str, snippet: &str) -> RemoteMessage {
        let mut m = RemoteMessage::new(
            "m1",
            EmailAddress::parse(from),
            Utc.with_ymd_and_hms(2024, 3, 6, 9, 0, 0).unwrap(),
        );
        m.subject = subject.to_string();
        m.snippet = snippet.to_string();
        m.labels = vec!["INBOX".to_string()];
        m
    }

    #[test]
    fn test_personal_mail_falls_back_to_people() {
        let classifier = RuleClassifier::default();
        let result = classifier
            .classify(&message("Jane <jane@example.com>", "Lunch", "Are you free at noon?"))
            .unwrap();
        assert_eq!(result.channel, "People");
        assert_eq!(result.importance, Importance::default());
        assert_eq!(result.deadline, None);
    }

    #[test]
    fn test_urgent_with_near_deadline() {
        let classifier = RuleClassifier::default();
        let result = classifier
            .classify(&message("boss@example.com", "URGENT: contract", "Sign by tomorrow"))
            .unwrap();
        assert_eq!(result.channel, "Urgent");
        assert_eq!(result.importance.value(), 5);
        assert_eq!(result.deadline, NaiveDate::from_ymd_opt(2024, 3, 7));
    }

    #[test]
    fn test_receipts_before_notifications() {
        let classifier = RuleClassifier::default();
        let result = classifier
            .classify(&message("no-reply@shop.example", "Your order #123 receipt", ""))
            .unwrap();
        assert_eq!(result.channel, "Receipts");
    }

    #[test]
    fn test_bulk_mail_is_newsletter_with_low_importance() {
        let classifier = RuleClassifier::default();
        let mut m = message("news@letters.example", "Spring edition", "Read more");
        m.list_unsubscribe = Some("<mailto:leave@letters.example>".to_string());
        let result = classifier.classify(&m).unwrap();
        assert_eq!(result.channel, "Newsletters");
        assert_eq!(result.importance.value(), 1);
    }

    #[test]
    fn test_important_label_raises_importance() {
        let classifier = RuleClassifier::default();
        let mut m = message("jane@example.com", "Quarterly plan", "");
        m.labels.push(LABEL_IMPORTANT.to_string());
        assert_eq!(classifier.classify(&m).unwrap().importance.value(), 4);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = RuleClassifier::default();
        let m = message("alerts@sentry.io", "New issue", "due Friday");
        assert_eq!(classifier.classify(&m).unwrap(), classifier.classify(&m).unwrap());
    }
}
