//! Channel rules: the configurable taxonomy behind [`RuleClassifier`]
//!
//! Rules are evaluated in order and the first match wins. Display order is
//! separate from evaluation order so that, for example, "Receipts" can be
//! checked before "Notifications" but listed after it.
//!
//! [`RuleClassifier`]: super::RuleClassifier

use serde::{Deserialize, Serialize};

use crate::models::{Channel, Importance};
use crate::remote::RemoteMessage;

/// One channel and the signals that route a message into it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRule {
    pub name: String,
    pub display_order: u32,
    /// Importance before adjustments (1-5)
    #[serde(default = "default_rule_importance")]
    pub importance: u8,
    /// Substrings of the sender address
    #[serde(default)]
    pub senders: Vec<String>,
    /// Sender domains; subdomains match too
    #[serde(default)]
    pub domains: Vec<String>,
    /// Phrases looked for in the subject
    #[serde(default)]
    pub subject_keywords: Vec<String>,
    /// Phrases looked for in the snippet
    #[serde(default)]
    pub snippet_keywords: Vec<String>,
    /// Provider labels
    #[serde(default)]
    pub labels: Vec<String>,
    /// Match bulk mail (List-Unsubscribe or `Precedence: bulk/list`)
    #[serde(default)]
    pub bulk: bool,
}

fn default_rule_importance() -> u8 {
    3
}

impl ChannelRule {
    pub fn new(name: impl Into<String>, display_order: u32, importance: u8) -> Self {
        Self {
            name: name.into(),
            display_order,
            importance,
            senders: Vec::new(),
            domains: Vec::new(),
            subject_keywords: Vec::new(),
            snippet_keywords: Vec::new(),
            labels: Vec::new(),
            bulk: false,
        }
    }

    pub fn base_importance(&self) -> Importance {
        Importance::clamped(self.importance as i32)
    }

    /// Whether any of this rule's signals is present
    pub fn matches(&self, message: &RemoteMessage, text: &MatchText) -> bool {
        let sender_match = self
            .senders
            .iter()
            .any(|s| text.from.contains(&s.to_lowercase()));

        let domain_match = text.domain.as_deref().is_some_and(|domain| {
            self.domains.iter().any(|d| {
                let d = d.to_lowercase();
                domain == d || domain.ends_with(&format!(".{}", d))
            })
        });

        let subject_match = contains_any(&text.subject, &self.subject_keywords);
        let snippet_match = contains_any(&text.snippet, &self.snippet_keywords);
        let label_match = self.labels.iter().any(|l| message.has_label(l));
        let bulk_match = self.bulk && is_bulk(message);

        sender_match || domain_match || subject_match || snippet_match || label_match || bulk_match
    }
}

/// Lowercased fields shared by every rule check
pub struct MatchText {
    pub from: String,
    pub domain: Option<String>,
    pub subject: String,
    pub snippet: String,
}

impl MatchText {
    pub fn new(message: &RemoteMessage) -> Self {
        Self {
            from: message.from.email.to_lowercase(),
            domain: message.from.domain(),
            subject: message.subject.to_lowercase(),
            snippet: message.snippet.to_lowercase(),
        }
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|n| !n.is_empty() && haystack.contains(&n.to_lowercase()))
}

/// Mailing-list or marketing mail
pub fn is_bulk(message: &RemoteMessage) -> bool {
    message.list_unsubscribe.is_some()
        || message
            .precedence
            .as_deref()
            .is_some_and(|p| matches!(p.trim().to_lowercase().as_str(), "bulk" | "list" | "junk"))
}

/// Ordered rules plus the channel for messages no rule claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRules {
    pub rules: Vec<ChannelRule>,
    pub fallback: String,
    #[serde(default = "default_fallback_order")]
    pub fallback_order: u32,
}

fn default_fallback_order() -> u32 {
    1
}

impl ChannelRules {
    /// The published taxonomy, in display order, without counts
    pub fn taxonomy(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .rules
            .iter()
            .map(|r| Channel::new(r.name.clone(), r.display_order))
            .collect();
        if !channels.iter().any(|c| c.name == self.fallback) {
            channels.push(Channel::new(self.fallback.clone(), self.fallback_order));
        }
        crate::models::sort_channels(&mut channels);
        channels
    }
}

impl Default for ChannelRules {
    fn default() -> Self {
        let mut urgent = ChannelRule::new("Urgent", 0, 5);
        urgent.subject_keywords = strings(&[
            "urgent",
            "asap",
            "action required",
            "immediate action",
            "time sensitive",
            "final notice",
            "past due",
            "overdue",
        ]);
        urgent.snippet_keywords = strings(&["urgent", "as soon as possible", "immediately"]);

        let mut receipts = ChannelRule::new("Receipts", 3, 2);
        receipts.subject_keywords = strings(&[
            "receipt",
            "invoice",
            "order confirmation",
            "your order",
            "order #",
            "shipping confirmation",
            "has shipped",
            "delivery notification",
            "payment received",
            "payment confirmation",
            "subscription renewal",
        ]);

        let mut notifications = ChannelRule::new("Notifications", 2, 2);
        notifications.senders = strings(&[
            "noreply",
            "no-reply",
            "donotreply",
            "do-not-reply",
            "notifications@",
            "notification@",
            "alerts@",
            "builds@",
        ]);
        notifications.domains = strings(&[
            "github.com",
            "gitlab.com",
            "circleci.com",
            "sentry.io",
            "pagerduty.com",
            "slack.com",
            "linear.app",
            "atlassian.net",
        ]);
        notifications.subject_keywords = strings(&[
            "password reset",
            "verify your email",
            "confirm your email",
            "security alert",
            "sign-in attempt",
            "new sign-in",
            "verification code",
        ]);

        let mut newsletters = ChannelRule::new("Newsletters", 4, 1);
        newsletters.bulk = true;
        newsletters.domains = strings(&[
            "mailchimp.com",
            "sendgrid.net",
            "constantcontact.com",
            "campaign-archive.com",
            "substack.com",
            "beehiiv.com",
            "buttondown.email",
            "convertkit.com",
            "mailerlite.com",
            "medium.com",
        ]);
        newsletters.subject_keywords = strings(&["newsletter", "weekly digest", "this week in"]);

        Self {
            // Evaluation order; display order lives on each rule
            rules: vec![urgent, receipts, notifications, newsletters],
            fallback: "People".to_string(),
            fallback_order: 1,
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailAddress;
    use chrono::Utc;

    fn message(from: &str, subject: &str) -> RemoteMessage {
        let mut m = RemoteMessage::new("m1", EmailAddress::new(from), Utc::now());
        m.subject = subject.to_string();
        m
    }

    #[test]
    fn test_domain_matches_subdomains() {
        let mut rule = ChannelRule::new("Dev", 0, 3);
        rule.domains = vec!["github.com".to_string()];
        let m = message("noreply@mail.github.com", "");
        assert!(rule.matches(&m, &MatchText::new(&m)));
        let m = message("a@notgithub.com", "");
        assert!(!rule.matches(&m, &MatchText::new(&m)));
    }

    #[test]
    fn test_empty_rule_never_matches() {
        let rule = ChannelRule::new("Empty", 0, 3);
        let m = message("a@example.com", "anything");
        assert!(!rule.matches(&m, &MatchText::new(&m)));
    }

    #[test]
    fn test_default_taxonomy_display_order() {
        let names: Vec<String> = ChannelRules::default()
            .taxonomy()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(
            names,
            vec!["Urgent", "People", "Notifications", "Receipts", "Newsletters"]
        );
    }

    #[test]
    fn test_rules_deserialize_with_defaults() {
        let json = r#"{
            "rules": [{"name": "Family", "display_order": 0, "domains": ["family.example"]}],
            "fallback": "Everything"
        }"#;
        let rules: ChannelRules = serde_json::from_str(json).unwrap();
        assert_eq!(rules.rules[0].importance, 3);
        assert_eq!(rules.fallback_order, 1);
        assert_eq!(rules.taxonomy().len(), 2);
    }
}
