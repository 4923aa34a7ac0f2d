//! Cached message summaries from a text generator
//!
//! A summary is generated once per message and reused until a caller forces
//! regeneration. Generation failures are returned to the caller, never
//! retried here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::ai::TextGenerator;
use crate::error::{EngineError, EngineResult};
use crate::models::{Message, MessageBody, MessageId, Summary};
use crate::query::BodyCache;
use crate::storage::MailStore;

/// Body text beyond this many characters is not sent to the model
const MAX_PROMPT_BODY_CHARS: usize = 8000;

/// Chat-template markers some models leak into their output
const TEMPLATE_MARKERS: &[&str] = &[
    "<start_of_turn>",
    "</start_of_turn>",
    "<end_of_turn>",
    "</end_of_turn>",
    "<|eot_id|>",
    "<|end|>",
    "<|im_end|>",
];

/// Produces and caches summaries
pub struct Summarizer {
    store: Arc<dyn MailStore>,
    bodies: Arc<BodyCache>,
    generator: Arc<dyn TextGenerator>,
    /// One lock per message being summarized
    in_flight: Mutex<HashMap<MessageId, Arc<Mutex<()>>>>,
}

impl Summarizer {
    pub fn new(
        store: Arc<dyn MailStore>,
        bodies: Arc<BodyCache>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            store,
            bodies,
            generator,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The stored summary, if one was ever generated
    pub fn cached(&self, id: &MessageId) -> EngineResult<Option<Summary>> {
        Ok(self.store.get_summary(id)?)
    }

    /// Return the cached summary, or generate one
    ///
    /// With `force`, a new summary replaces the cached one. Concurrent calls
    /// for the same message run the generator once.
    pub fn summarize(&self, id: &MessageId, force: bool) -> EngineResult<Summary> {
        if !force && let Some(summary) = self.store.get_summary(id)? {
            return Ok(summary);
        }

        let lock = self.lock_for(id)?;
        let result = {
            let _guard = lock.lock().map_err(|e| EngineError::Storage {
                message: format!("Lock poisoned: {}", e),
            })?;
            self.summarize_locked(id, force)
        };
        self.release(id, &lock);
        result
    }

    fn summarize_locked(&self, id: &MessageId, force: bool) -> EngineResult<Summary> {
        // Another caller may have finished while we waited
        if !force && let Some(summary) = self.store.get_summary(id)? {
            return Ok(summary);
        }

        let message = self
            .store
            .get_message(id)?
            .ok_or_else(|| EngineError::NotFound { id: id.to_string() })?;
        let body = self.bodies.get(id)?;

        debug!("Summarizing {} with {}", id, self.generator.model());
        let raw = self
            .generator
            .generate(&build_prompt(&message, &body))
            .map_err(|e| {
                warn!("Summarization failed for {}: {}", id, e);
                EngineError::SummarizationFailure { message: e.to_string() }
            })?;

        let text = clean_response(&raw);
        if text.is_empty() {
            return Err(EngineError::SummarizationFailure {
                message: format!("empty summary for {}", id),
            });
        }

        let summary = Summary::new(id.clone(), text, self.generator.model());
        self.store.save_summary(&summary)?;
        info!("Stored summary for {}", id);
        Ok(summary)
    }

    fn lock_for(&self, id: &MessageId) -> EngineResult<Arc<Mutex<()>>> {
        let mut in_flight = self.in_flight.lock().map_err(|e| EngineError::Storage {
            message: format!("Lock poisoned: {}", e),
        })?;
        Ok(in_flight.entry(id.clone()).or_default().clone())
    }

    fn release(&self, id: &MessageId, lock: &Arc<Mutex<()>>) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            // Map entry plus ours: nobody else is waiting
            if Arc::strong_count(lock) <= 2 {
                in_flight.remove(id);
            }
        }
    }
}

/// Prompt asking for at most three bullet lines
pub fn build_prompt(message: &Message, body: &MessageBody) -> String {
    let text: String = body.plain_text().chars().take(MAX_PROMPT_BODY_CHARS).collect();
    format!(
        "You summarize email for a busy reader. Follow these rules strictly:\n\
         - Summarize in at most 3 bullet lines.\n\
         - No greeting and no preamble such as \"Here is the summary\".\n\
         - Do not copy the text; restate only the key points.\n\n\
         From: {}\nSubject: {}\n\nEmail:\n{}",
        message.from.display(),
        message.subject,
        text
    )
}

/// Strip template markers and surrounding whitespace from model output
pub fn clean_response(raw: &str) -> String {
    let mut text = raw.to_string();
    for marker in TEMPLATE_MARKERS {
        text = text.replace(marker, "");
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::ai::AiError;
    use crate::models::EmailAddress;
    use crate::remote::{InMemoryProvider, RemoteMessage};
    use crate::storage::InMemoryMailStore;

    struct CountingGenerator {
        calls: AtomicUsize,
        fail: bool,
    }

    impl TextGenerator for CountingGenerator {
        fn generate(&self, prompt: &str) -> Result<String, AiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(AiError::Unavailable {
                    message: "model offline".to_string(),
                });
            }
            assert!(prompt.contains("3 bullet lines"));
            Ok(format!("<start_of_turn>- point {}\n</end_of_turn>\n", n))
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    fn setup(fail: bool) -> (Arc<InMemoryProvider>, Arc<CountingGenerator>, Summarizer) {
        let store: Arc<dyn MailStore> = Arc::new(InMemoryMailStore::new());
        let provider = Arc::new(InMemoryProvider::new());
        let remote = RemoteMessage::new("m1", EmailAddress::new("a@example.com"), Utc::now());
        provider.add_message_with_body(
            remote,
            MessageBody::html("<p>Quarterly numbers attached</p>"),
        );
        store
            .upsert_message(Message::builder(MessageId::new("m1")).subject("Numbers").build())
            .unwrap();

        let bodies = Arc::new(BodyCache::new(store.clone(), provider.clone()));
        let generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
            fail,
        });
        let summarizer = Summarizer::new(store, bodies, generator.clone());
        (provider, generator, summarizer)
    }

    #[test]
    fn test_summary_cached_until_forced() {
        let (provider, generator, summarizer) = setup(false);
        let id = MessageId::new("m1");

        assert!(summarizer.cached(&id).unwrap().is_none());
        let first = summarizer.summarize(&id, false).unwrap();
        assert_eq!(first.text, "- point 1");
        assert_eq!(first.model, "test-model");

        let second = summarizer.summarize(&id, false).unwrap();
        assert_eq!(second.text, first.text);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.body_fetch_count(), 1);

        let forced = summarizer.summarize(&id, true).unwrap();
        assert_eq!(forced.text, "- point 2");
        assert_eq!(summarizer.cached(&id).unwrap().unwrap().text, "- point 2");
    }

    #[test]
    fn test_failure_is_explicit_and_not_cached() {
        let (_provider, generator, summarizer) = setup(true);
        let id = MessageId::new("m1");

        let err = summarizer.summarize(&id, false).unwrap_err();
        assert!(matches!(err, EngineError::SummarizationFailure { .. }));
        assert!(summarizer.cached(&id).unwrap().is_none());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_calls_generate_once() {
        let (_provider, generator, summarizer) = setup(false);
        let summarizer = Arc::new(summarizer);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = summarizer.clone();
                std::thread::spawn(move || s.summarize(&MessageId::new("m1"), false).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().text, "- point 1");
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clean_response_strips_markers() {
        assert_eq!(clean_response("  <|eot_id|>- a\n- b<end_of_turn>\n"), "- a\n- b");
    }

    #[test]
    fn test_prompt_strips_html() {
        let message = Message::builder(MessageId::new("m")).subject("Hi").build();
        let prompt = build_prompt(&message, &MessageBody::html("<b>Bold</b> text"));
        assert!(prompt.contains("Bold text"));
        assert!(!prompt.contains("<b>"));
    }
}
