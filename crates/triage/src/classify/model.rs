//! Model-backed importance and deadline scoring
//!
//! The channel still comes from the rules; a local model is asked for an
//! importance and a deadline from the sender, subject and snippet. Any
//! generator or parse failure falls back to the rule result for that
//! message.

use std::sync::Arc;

use chrono::NaiveDate;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Classification, ClassificationError, Classifier, RuleClassifier};
use crate::ai::TextGenerator;
use crate::models::{Channel, Importance};
use crate::remote::RemoteMessage;

const PROMPT_TEMPLATE: &str = r#"You are the assistant of a very busy executive.
Rate this email strictly.

1. Importance: a number from 1 (ignore) to 5 (reply now)
   - 5: nothing else matters until this is answered
   - 3: a normal work message that needs the reader
   - 1: ads, newsletters, automated notices, greetings
   When unsure, answer 1.
2. Deadline: the most important future date as YYYY-MM-DD, or "none"

The email was received on {date}.
Answer only in the form "importance: N, deadline: DATE". No explanation.

From: {from}
Subject: {subject}
Preview: {snippet}"#;

/// Preview characters handed to the model
const SNIPPET_CHARS: usize = 500;

static IMPORTANCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)importance\W*(\d)").expect("valid importance regex")
});

static FIRST_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").expect("valid digit regex"));

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("valid date regex"));

/// Importance and deadline read from a model reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelVerdict {
    pub importance: Importance,
    pub deadline: Option<NaiveDate>,
}

/// Parse a reply like `importance: 4, deadline: 2024-03-08`
///
/// The importance must be a single digit in 1..=5. A missing or invalid
/// date means no deadline.
pub fn parse_verdict(reply: &str) -> Option<ModelVerdict> {
    let digit = match IMPORTANCE.captures(reply) {
        Some(caps) => caps.get(1)?.as_str().to_string(),
        None => FIRST_DIGIT.find(reply)?.as_str().to_string(),
    };
    let value: u8 = digit.parse().ok()?;
    if !(Importance::MIN..=Importance::MAX).contains(&value) {
        return None;
    }

    let deadline = ISO_DATE
        .find_iter(reply)
        .find_map(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok());

    Some(ModelVerdict {
        importance: Importance::clamped(value as i32),
        deadline,
    })
}

/// Rules for the channel, a [`TextGenerator`] for importance and deadline
pub struct ModelClassifier {
    generator: Arc<dyn TextGenerator>,
    rules: RuleClassifier,
}

impl ModelClassifier {
    pub fn new(generator: Arc<dyn TextGenerator>, rules: RuleClassifier) -> Self {
        Self { generator, rules }
    }

    fn build_prompt(message: &RemoteMessage) -> String {
        let snippet: String = message.snippet.chars().take(SNIPPET_CHARS).collect();
        let subject = if message.subject.is_empty() {
            "(no subject)"
        } else {
            message.subject.as_str()
        };

        PROMPT_TEMPLATE
            .replace("{date}", &message.received_at.format("%Y-%m-%d").to_string())
            .replace("{from}", &message.from.display())
            .replace("{subject}", subject)
            .replace("{snippet}", &snippet)
    }

    fn ask(&self, message: &RemoteMessage) -> Result<ModelVerdict, String> {
        let reply = self
            .generator
            .generate(&Self::build_prompt(message))
            .map_err(|e| e.to_string())?;
        debug!("Model verdict for {}: {}", message.id, reply.trim());
        parse_verdict(&reply).ok_or_else(|| format!("unreadable reply {:?}", reply.trim()))
    }
}

impl Classifier for ModelClassifier {
    fn classify(&self, message: &RemoteMessage) -> Result<Classification, ClassificationError> {
        let ruled = self.rules.classify(message)?;

        match self.ask(message) {
            Ok(verdict) => Ok(Classification {
                channel: ruled.channel,
                importance: verdict.importance,
                // Only dates on or after the message count as deadlines
                deadline: verdict
                    .deadline
                    .filter(|d| *d >= message.received_at.date_naive())
                    .or(ruled.deadline),
            }),
            Err(reason) => {
                warn!(
                    "Model scoring failed for {} with {}, using rules: {}",
                    message.id,
                    self.generator.model(),
                    reason
                );
                Ok(ruled)
            }
        }
    }

    fn taxonomy(&self) -> Vec<Channel> {
        self.rules.taxonomy()
    }

    fn fallback(&self) -> Classification {
        self.rules.fallback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiError;
    use crate::models::EmailAddress;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    /// Generator that replays a fixed reply and records prompts
    struct Scripted {
        reply: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: Result<&str, ()>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    impl TextGenerator for Scripted {
        fn generate(&self, prompt: &str) -> Result<String, AiError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(|_| AiError::Unavailable {
                message: "connection refused".to_string(),
            })
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn message() -> RemoteMessage {
        let mut m = RemoteMessage::new(
            "m1",
            EmailAddress::parse("Jane <jane@example.com>"),
            Utc.with_ymd_and_hms(2024, 3, 6, 9, 0, 0).unwrap(),
        );
        m.subject = "Contract".to_string();
        m.snippet = "Please sign the contract".to_string();
        m.labels = vec!["INBOX".to_string()];
        m
    }

    #[test]
    fn test_parse_verdict() {
        let verdict = parse_verdict("importance: 4, deadline: 2024-03-08").unwrap();
        assert_eq!(verdict.importance.value(), 4);
        assert_eq!(verdict.deadline, NaiveDate::from_ymd_opt(2024, 3, 8));

        let verdict = parse_verdict("Importance:2, Deadline: none").unwrap();
        assert_eq!(verdict.importance.value(), 2);
        assert_eq!(verdict.deadline, None);

        // Bare digit replies are accepted
        assert_eq!(parse_verdict("5").unwrap().importance.value(), 5);
    }

    #[test]
    fn test_parse_verdict_rejects_garbage() {
        assert_eq!(parse_verdict("I cannot help with that"), None);
        assert_eq!(parse_verdict("importance: 9"), None);
        assert_eq!(parse_verdict("importance: 0, deadline: none"), None);
        assert_eq!(
            parse_verdict("importance: 3, deadline: 2024-02-30").unwrap().deadline,
            None
        );
    }

    #[test]
    fn test_model_sets_importance_and_deadline() {
        let generator = Scripted::new(Ok("importance: 5, deadline: 2024-03-08"));
        let classifier = ModelClassifier::new(generator.clone(), RuleClassifier::default());

        let result = classifier.classify(&message()).unwrap();
        assert_eq!(result.channel, "People");
        assert_eq!(result.importance.value(), 5);
        assert_eq!(result.deadline, NaiveDate::from_ymd_opt(2024, 3, 8));

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("Subject: Contract"));
        assert!(prompts[0].contains("received on 2024-03-06"));
    }

    #[test]
    fn test_past_model_deadline_is_dropped() {
        let generator = Scripted::new(Ok("importance: 3, deadline: 2023-12-01"));
        let classifier = ModelClassifier::new(generator, RuleClassifier::default());
        assert_eq!(classifier.classify(&message()).unwrap().deadline, None);
    }

    #[test]
    fn test_falls_back_to_rules() {
        let rules = RuleClassifier::default();
        let expected = rules.classify(&message()).unwrap();

        let down = ModelClassifier::new(Scripted::new(Err(())), RuleClassifier::default());
        assert_eq!(down.classify(&message()).unwrap(), expected);

        let rambling = ModelClassifier::new(
            Scripted::new(Ok("Sure! Here is my analysis.")),
            RuleClassifier::default(),
        );
        assert_eq!(rambling.classify(&message()).unwrap(), expected);
    }

    #[test]
    fn test_prompt_never_includes_body_fields() {
        let generator = Scripted::new(Ok("importance: 1, deadline: none"));
        let classifier = ModelClassifier::new(generator.clone(), RuleClassifier::default());
        let mut m = message();
        m.snippet = "x".repeat(SNIPPET_CHARS + 50);
        classifier.classify(&m).unwrap();

        let prompts = generator.prompts.lock().unwrap();
        let preview = prompts[0].rsplit("Preview: ").next().unwrap();
        assert_eq!(preview.len(), SNIPPET_CHARS);
    }
}
