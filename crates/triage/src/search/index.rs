//! Hybrid semantic + lexical search over stored messages
//!
//! Each message gets an embedding (persisted in the store as an
//! [`IndexEntry`]) and a Tantivy document. Queries combine cosine similarity
//! with the max-normalized lexical score. When the embedding service is
//! unreachable, ranking falls back to the lexical score alone.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use log::{debug, info, warn};

use super::lexical::{LexicalDoc, LexicalIndex};
use crate::ai::{EmbeddingProvider, cosine};
use crate::models::{IndexEntry, Message, MessageBody, MessageId};
use crate::storage::MailStore;

/// Candidates considered per requested result
const CANDIDATE_FACTOR: usize = 5;

/// Ranking knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSettings {
    pub top_k: usize,
    /// Weight of the normalized lexical score added to cosine similarity
    pub lexical_weight: f32,
    /// Index text is truncated to this many characters
    pub text_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            top_k: 10,
            lexical_weight: 0.5,
            text_limit: 4000,
        }
    }
}

/// What indexing did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Lexical document written; `semantic` tells whether a vector was too
    Indexed { semantic: bool },
    /// Vector already current, lexical document refreshed
    Unchanged,
    /// Message no longer stored; removed from the index
    Removed,
}

/// Ranked search output
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub messages: Vec<Message>,
    /// Ranking used the lexical score only
    pub degraded: bool,
}

/// Thread-safe hybrid index
pub struct SearchIndex {
    store: Arc<dyn MailStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    lexical: LexicalIndex,
    entries: RwLock<HashMap<MessageId, IndexEntry>>,
    settings: SearchSettings,
}

impl SearchIndex {
    /// Create the index, loading persisted vectors from the store
    pub fn new(
        store: Arc<dyn MailStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        lexical: LexicalIndex,
        settings: SearchSettings,
    ) -> Result<Self> {
        let entries: HashMap<MessageId, IndexEntry> = store
            .load_index_entries()
            .context("Failed to load search entries")?
            .into_iter()
            .map(|e| (e.message_id.clone(), e))
            .collect();
        debug!("Loaded {} search vectors", entries.len());

        Ok(Self {
            store,
            embedder,
            lexical,
            entries: RwLock::new(entries),
            settings,
        })
    }

    pub fn settings(&self) -> SearchSettings {
        self.settings
    }

    /// Refill an empty lexical index from the store
    ///
    /// Returns the number of documents written.
    pub fn rebuild_lexical_if_empty(&self) -> Result<usize> {
        if self.lexical.num_docs() > 0 {
            return Ok(0);
        }

        let messages = self.store.list_all_messages()?;
        for message in &messages {
            let body = self.store.get_body(&message.id)?;
            self.lexical.upsert(&message.id, &lexical_doc(message, body.as_ref()))?;
        }
        self.lexical.commit()?;

        if !messages.is_empty() {
            info!("Rebuilt lexical index with {} messages", messages.len());
        }
        Ok(messages.len())
    }

    /// Listed messages that have no vector yet
    pub fn missing_vectors(&self) -> Result<Vec<MessageId>> {
        let entries = self.entries.read().map_err(|e| anyhow!("Lock poisoned: {}", e))?;
        Ok(self
            .store
            .list_all_messages()?
            .into_iter()
            .filter(|m| m.is_listed() && !entries.contains_key(&m.id))
            .map(|m| m.id)
            .collect())
    }

    /// Project the stored state of `id` into the index
    ///
    /// Uses the cached body when present, the snippet otherwise. Embedding
    /// failures are logged and leave the previous vector in place.
    pub fn index_message(&self, id: &MessageId) -> Result<IndexOutcome> {
        let Some(message) = self.store.get_message(id)? else {
            self.remove(id)?;
            return Ok(IndexOutcome::Removed);
        };
        let body = self.store.get_body(id)?;

        self.lexical.upsert(id, &lexical_doc(&message, body.as_ref()))?;

        if self.vector_is_current(&message, body.is_some())? {
            return Ok(IndexOutcome::Unchanged);
        }

        let text = index_text(&message, body.as_ref(), self.settings.text_limit);
        match self.embedder.embed(&text) {
            Ok(vector) => {
                let entry = IndexEntry {
                    message_id: id.clone(),
                    vector,
                    from_body: body.is_some(),
                    indexed_at: Utc::now(),
                };
                self.store.save_index_entry(&entry)?;
                self.entries
                    .write()
                    .map_err(|e| anyhow!("Lock poisoned: {}", e))?
                    .insert(id.clone(), entry);
                Ok(IndexOutcome::Indexed { semantic: true })
            }
            Err(e) => {
                warn!("Embedding failed for {}: {}", id, e);
                Ok(IndexOutcome::Indexed { semantic: false })
            }
        }
    }

    fn vector_is_current(&self, message: &Message, has_body: bool) -> Result<bool> {
        let entries = self.entries.read().map_err(|e| anyhow!("Lock poisoned: {}", e))?;
        Ok(entries.get(&message.id).is_some_and(|entry| {
            entry.from_body == has_body && entry.indexed_at >= message.updated_at
        }))
    }

    /// Drop a message from the index
    pub fn remove(&self, id: &MessageId) -> Result<()> {
        self.lexical.remove(id)?;
        self.entries
            .write()
            .map_err(|e| anyhow!("Lock poisoned: {}", e))?
            .remove(id);
        Ok(())
    }

    /// Make pending lexical changes searchable
    pub fn commit(&self) -> Result<()> {
        self.lexical.commit()
    }

    /// Top-K listed messages for free text, best first
    ///
    /// Ties are broken by recency, newest first. `exclude` is dropped from
    /// the results.
    pub fn query(&self, text: &str, exclude: Option<&MessageId>) -> Result<SearchResults> {
        let text = text.trim();
        let top_k = self.settings.top_k;
        if text.is_empty() || top_k == 0 {
            return Ok(SearchResults::default());
        }
        let candidates = top_k * CANDIDATE_FACTOR;

        let lexical_hits = match self.lexical.search(text, candidates) {
            Ok(hits) => Some(hits),
            Err(e) => {
                warn!("Lexical search failed: {:#}", e);
                None
            }
        };

        let mut scores: HashMap<MessageId, f32> = HashMap::new();
        let max_lexical = lexical_hits
            .iter()
            .flatten()
            .map(|h| h.score)
            .fold(0.0f32, f32::max);

        let degraded = match self.embedder.embed(text) {
            Ok(query_vector) => {
                let entries = self.entries.read().map_err(|e| anyhow!("Lock poisoned: {}", e))?;
                let similarities: HashMap<&MessageId, f32> = entries
                    .iter()
                    .map(|(id, entry)| (id, cosine(&query_vector, &entry.vector)))
                    .collect();

                let mut nearest: Vec<(&MessageId, f32)> =
                    similarities.iter().map(|(id, s)| (*id, *s)).collect();
                nearest.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
                nearest.truncate(candidates);
                for (id, _) in nearest {
                    scores.entry(id.clone()).or_default();
                }

                let lexical_weight = self.settings.lexical_weight;
                for hit in lexical_hits.iter().flatten() {
                    *scores.entry(hit.id.clone()).or_default() +=
                        lexical_weight * normalized(hit.score, max_lexical);
                }

                // Candidates from either side get both shares
                for (id, score) in scores.iter_mut() {
                    *score += similarities.get(id).copied().unwrap_or(0.0);
                }
                false
            }
            Err(e) => {
                let Some(hits) = lexical_hits.as_ref() else {
                    bail!("Embedding and lexical search both unavailable: {}", e);
                };
                warn!("Embedding unavailable, using lexical ranking: {}", e);
                for hit in hits {
                    scores.insert(hit.id.clone(), normalized(hit.score, max_lexical));
                }
                true
            }
        };

        if let Some(exclude) = exclude {
            scores.remove(exclude);
        }
        scores.retain(|_, score| *score > 0.0);

        let ids: Vec<MessageId> = scores.keys().cloned().collect();
        let mut ranked: Vec<(f32, Message)> = self
            .store
            .get_messages(&ids)?
            .into_iter()
            .filter(Message::is_listed)
            .filter_map(|m| scores.get(&m.id).map(|score| (*score, m)))
            .collect();

        ranked.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.received_at.cmp(&a.received_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        ranked.truncate(top_k);

        Ok(SearchResults {
            messages: ranked.into_iter().map(|(_, m)| m).collect(),
            degraded,
        })
    }

    /// Messages similar to `id`, by its snippet (subject when empty)
    pub fn related(&self, id: &MessageId) -> Result<Option<SearchResults>> {
        let Some(message) = self.store.get_message(id)? else {
            return Ok(None);
        };
        let text = if message.snippet.trim().is_empty() {
            &message.subject
        } else {
            &message.snippet
        };
        self.query(text, Some(id)).map(Some)
    }
}

fn normalized(score: f32, max: f32) -> f32 {
    if max > 0.0 { score / max } else { 0.0 }
}

/// Text embedded for a message
///
/// "From/To/Subject/Snippet" before the body is known, "From/Subject/Body"
/// after, truncated to `limit` characters.
pub fn index_text(message: &Message, body: Option<&MessageBody>, limit: usize) -> String {
    let text = match body {
        Some(body) => format!(
            "From: {}\nSubject: {}\nBody: {}",
            message.from.display(),
            message.subject,
            body.plain_text()
        ),
        None => format!(
            "From: {}\nTo: {}\nSubject: {}\nSnippet: {}",
            message.from.display(),
            message
                .to
                .iter()
                .map(|a| a.display())
                .collect::<Vec<_>>()
                .join(", "),
            message.subject,
            message.snippet
        ),
    };
    text.chars().take(limit).collect()
}

fn lexical_doc(message: &Message, body: Option<&MessageBody>) -> LexicalDoc {
    LexicalDoc {
        subject: message.subject.clone(),
        snippet: message.snippet.clone(),
        from: message.from.display(),
        to: message
            .to
            .iter()
            .chain(&message.cc)
            .map(|a| a.display())
            .collect::<Vec<_>>()
            .join(" "),
        body: body.map(MessageBody::plain_text),
        received_at_ms: message.received_at.timestamp_millis(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::ai::{AiError, HashingEmbedder};
    use crate::models::EmailAddress;
    use crate::storage::InMemoryMailStore;

    struct DownEmbedder;

    impl EmbeddingProvider for DownEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, AiError> {
            Err(AiError::Unavailable {
                message: "connection refused".to_string(),
            })
        }

        fn model(&self) -> &str {
            "down"
        }
    }

    fn message(id: &str, subject: &str, snippet: &str, ts: i64) -> Message {
        Message::builder(MessageId::new(id))
            .from(EmailAddress::with_name("Alice", "alice@example.com"))
            .to(vec![EmailAddress::new("me@example.com")])
            .subject(subject)
            .snippet(snippet)
            .received_at(Utc.timestamp_opt(ts, 0).unwrap())
            .channel("People")
            .build()
    }

    fn index_with(embedder: Arc<dyn EmbeddingProvider>, messages: Vec<Message>) -> SearchIndex {
        let store: Arc<dyn MailStore> = Arc::new(InMemoryMailStore::new());
        for m in messages {
            store.upsert_message(m).unwrap();
        }
        let index = SearchIndex::new(
            store.clone(),
            embedder,
            LexicalIndex::in_memory().unwrap(),
            SearchSettings::default(),
        )
        .unwrap();
        for m in store.list_all_messages().unwrap() {
            index.index_message(&m.id).unwrap();
        }
        index.commit().unwrap();
        index
    }

    fn ids(results: &SearchResults) -> Vec<&str> {
        results.messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_exact_subject_ranks_first() {
        let index = index_with(
            Arc::new(HashingEmbedder::default()),
            vec![
                message("a", "Budget 2024", "numbers for next year", 10),
                message("b", "Lunch", "noon at the usual place?", 20),
            ],
        );

        let results = index.query("Budget 2024", None).unwrap();
        assert!(!results.degraded);
        assert_eq!(ids(&results)[0], "a");
    }

    #[test]
    fn test_lexical_fallback_when_embedder_down() {
        let index = index_with(
            Arc::new(DownEmbedder),
            vec![
                message("a", "Budget 2024", "numbers", 10),
                message("b", "Lunch", "noon?", 20),
            ],
        );

        let results = index.query("budget", None).unwrap();
        assert!(results.degraded);
        assert_eq!(ids(&results), vec!["a"]);
    }

    #[test]
    fn test_ties_break_by_recency() {
        let index = index_with(
            Arc::new(HashingEmbedder::default()),
            vec![
                message("old", "Quarterly report", "see attached", 5),
                message("new", "Quarterly report", "see attached", 50),
            ],
        );

        let results = index.query("quarterly report", None).unwrap();
        assert_eq!(ids(&results), vec!["new", "old"]);
    }

    #[test]
    fn test_trashed_and_excluded_are_dropped() {
        let mut trashed = message("t", "Budget draft", "numbers", 30);
        trashed.is_trashed = true;
        let index = index_with(
            Arc::new(HashingEmbedder::default()),
            vec![
                message("a", "Budget 2024", "numbers", 10),
                message("c", "Budget review", "numbers", 20),
                trashed,
            ],
        );

        let results = index.query("budget numbers", Some(&MessageId::new("c"))).unwrap();
        let found = ids(&results);
        assert!(found.contains(&"a"));
        assert!(!found.contains(&"t"));
        assert!(!found.contains(&"c"));
    }

    #[test]
    fn test_related_excludes_source() {
        let index = index_with(
            Arc::new(HashingEmbedder::default()),
            vec![
                message("a", "Flight", "your flight to Lisbon is confirmed", 10),
                message("b", "Hotel", "your hotel in Lisbon is confirmed", 20),
            ],
        );

        let results = index.related(&MessageId::new("a")).unwrap().unwrap();
        assert_eq!(ids(&results), vec!["b"]);
        assert!(index.related(&MessageId::new("missing")).unwrap().is_none());
    }

    #[test]
    fn test_vectors_persist_and_skip_reembedding() {
        let store: Arc<dyn MailStore> = Arc::new(InMemoryMailStore::new());
        store.upsert_message(message("a", "Budget", "numbers", 10)).unwrap();
        let index = SearchIndex::new(
            store.clone(),
            Arc::new(HashingEmbedder::default()),
            LexicalIndex::in_memory().unwrap(),
            SearchSettings::default(),
        )
        .unwrap();

        let id = MessageId::new("a");
        assert_eq!(index.index_message(&id).unwrap(), IndexOutcome::Indexed { semantic: true });
        assert_eq!(index.index_message(&id).unwrap(), IndexOutcome::Unchanged);
        assert_eq!(store.load_index_entries().unwrap().len(), 1);
        assert!(index.missing_vectors().unwrap().is_empty());

        // Body arrival re-embeds from the body
        store.save_body(&id, &MessageBody::plain("Full budget text")).unwrap();
        assert_eq!(index.index_message(&id).unwrap(), IndexOutcome::Indexed { semantic: true });
        assert!(store.load_index_entries().unwrap()[0].from_body);
    }

    #[test]
    fn test_index_text_truncates() {
        let m = message("a", "Subject", &"x".repeat(100), 1);
        assert_eq!(index_text(&m, None, 20).chars().count(), 20);
        let with_body = index_text(&m, Some(&MessageBody::html("<p>Hi</p>")), 4000);
        assert!(with_body.contains("Body: Hi"));
        assert!(!with_body.contains("Snippet"));
    }
}
