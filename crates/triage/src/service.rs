//! MailService facade
//!
//! The single entry point hosts use. It wires the store, remote provider,
//! classifier, search index and summarizer together, and exposes the
//! engine's operations with [`EngineError`] results.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::actions::{ActionHandler, ReadOutcome, TrashOutcome};
use crate::ai::{EmbeddingProvider, HashingEmbedder, TextGenerator};
use crate::classify::{Classifier, ModelClassifier, RuleClassifier};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{Channel, HistoryToken, MessageBody, MessageId, Summary};
use crate::query::{self, BodyCache, BodySource, MessageSummary};
use crate::remote::MailProvider;
use crate::search::{IndexJob, Indexer, LexicalIndex, SearchIndex, SearchSettings};
use crate::storage::MailStore;
use crate::summarize::Summarizer;
use crate::sync::{ScheduleSettings, SyncCoordinator, SyncReport, SyncScheduler, SyncSettings};

/// Listing limit used when the caller does not page
const UNBOUNDED: usize = i64::MAX as usize;

/// Whether the engine has data to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// No incremental sync has committed yet; listings are empty
    NotSynced,
    Ready { last_sync_at: DateTime<Utc> },
}

/// Search output for display
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub messages: Vec<MessageSummary>,
    /// Ranked by keywords only because the embedding service was unavailable
    pub degraded: bool,
}

/// Builder for [`MailService`]
pub struct MailServiceBuilder {
    store: Arc<dyn MailStore>,
    provider: Arc<dyn MailProvider>,
    generator: Arc<dyn TextGenerator>,
    classifier: Option<Arc<dyn Classifier>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    lexical: Option<LexicalIndex>,
    config: EngineConfig,
}

impl MailServiceBuilder {
    /// Classifier to use instead of the one the config selects
    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Embedding backend; defaults to the offline [`HashingEmbedder`]
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Lexical index; defaults to an in-memory one
    pub fn lexical_index(mut self, lexical: LexicalIndex) -> Self {
        self.lexical = Some(lexical);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the service and start the indexer
    ///
    /// An empty lexical index is rebuilt from the store, and messages that
    /// never got a vector are queued for embedding.
    pub fn build(self) -> EngineResult<MailService> {
        let config = self.config;
        let store = self.store;
        let provider = self.provider;

        let rules = RuleClassifier::new(config.channels.clone());
        let classifier: Arc<dyn Classifier> = match self.classifier {
            Some(classifier) => classifier,
            None if config.model_classification => {
                info!("Scoring importance with {}", self.generator.model());
                Arc::new(ModelClassifier::new(self.generator.clone(), rules))
            }
            None => Arc::new(rules),
        };
        let embedder: Arc<dyn EmbeddingProvider> = match self.embedder {
            Some(embedder) => embedder,
            None => Arc::new(HashingEmbedder::default()),
        };
        let lexical = match self.lexical {
            Some(lexical) => lexical,
            None => LexicalIndex::in_memory().map_err(search_unavailable)?,
        };

        let search = Arc::new(
            SearchIndex::new(
                store.clone(),
                embedder,
                lexical,
                SearchSettings {
                    top_k: config.search_top_k,
                    lexical_weight: config.lexical_weight,
                    text_limit: config.index_text_limit,
                },
            )
            .map_err(search_unavailable)?,
        );
        search.rebuild_lexical_if_empty().map_err(search_unavailable)?;

        let indexer = Arc::new(Indexer::start(search.clone())?);
        let missing = search.missing_vectors()?;
        if !missing.is_empty() {
            info!("Queueing {} messages without search vectors", missing.len());
            indexer.enqueue(missing.into_iter().map(IndexJob::Upsert))?;
        }

        let writer = Arc::new(Mutex::new(()));
        let coordinator = Arc::new(
            SyncCoordinator::new(
                store.clone(),
                provider.clone(),
                classifier,
                writer.clone(),
                SyncSettings::from(&config),
            )
            .with_indexer(indexer.clone()),
        );
        let bodies =
            Arc::new(BodyCache::new(store.clone(), provider.clone()).with_indexer(indexer.clone()));
        let summarizer = Summarizer::new(store.clone(), bodies.clone(), self.generator);
        let actions = ActionHandler::new(store.clone(), provider, writer, config.scope.clone())
            .with_indexer(indexer.clone());

        Ok(MailService {
            inner: Arc::new(Inner {
                store,
                coordinator,
                search,
                indexer,
                bodies,
                summarizer,
                actions,
                config,
            }),
        })
    }
}

struct Inner {
    store: Arc<dyn MailStore>,
    coordinator: Arc<SyncCoordinator>,
    search: Arc<SearchIndex>,
    indexer: Arc<Indexer>,
    bodies: Arc<BodyCache>,
    summarizer: Summarizer,
    actions: ActionHandler,
    config: EngineConfig,
}

/// Mail triage engine
///
/// Cheap to clone; clones share all state. Every method may be called from
/// any thread while syncs run in the background.
#[derive(Clone)]
pub struct MailService {
    inner: Arc<Inner>,
}

impl MailService {
    pub fn builder(
        store: Arc<dyn MailStore>,
        provider: Arc<dyn MailProvider>,
        generator: Arc<dyn TextGenerator>,
    ) -> MailServiceBuilder {
        MailServiceBuilder {
            store,
            provider,
            generator,
            classifier: None,
            embedder: None,
            lexical: None,
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Channels in display order with non-trashed counts; empty before the
    /// first sync
    pub fn get_channels(&self) -> EngineResult<Vec<Channel>> {
        Ok(query::list_channels(self.inner.store.as_ref())?)
    }

    pub fn readiness(&self) -> EngineResult<Readiness> {
        let last_sync_at = self
            .inner
            .store
            .get_sync_state(&self.inner.config.scope)?
            .and_then(|s| s.last_sync_at);
        Ok(match last_sync_at {
            Some(last_sync_at) => Readiness::Ready { last_sync_at },
            None => Readiness::NotSynced,
        })
    }

    /// Non-trashed messages, newest first, optionally in one channel
    pub fn get_messages(&self, channel: Option<&str>) -> EngineResult<Vec<MessageSummary>> {
        self.get_messages_page(channel, UNBOUNDED, 0)
    }

    pub fn get_messages_by_channel(&self, channel: &str) -> EngineResult<Vec<MessageSummary>> {
        self.get_messages(Some(channel))
    }

    pub fn get_messages_page(
        &self,
        channel: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> EngineResult<Vec<MessageSummary>> {
        Ok(query::list_messages(self.inner.store.as_ref(), channel, limit, offset)?)
    }

    /// Full body, fetched from the remote once and cached for good
    ///
    /// With `mark_read_on_open`, an unread message is also marked read; a
    /// failure there is logged and does not fail the call.
    pub fn get_message_body(&self, id: &str) -> EngineResult<MessageBody> {
        let id = MessageId::new(id);
        let (body, source) = self.inner.bodies.get_with_source(&id)?;
        if source == BodySource::Remote {
            info!("Fetched body for {}", id);
        }

        if self.inner.config.mark_read_on_open {
            match self.inner.actions.mark_read(&id) {
                Ok(ReadOutcome::Deferred { reason }) => {
                    warn!("Mark read of {} deferred: {}", id, reason)
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to mark {} read: {}", id, e),
            }
        }
        Ok(body)
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Start an incremental sync in the background and return at once
    ///
    /// Overlapping calls coalesce into the running sync.
    pub fn sync_messages(&self) {
        let coordinator = self.inner.coordinator.clone();
        let spawned = std::thread::Builder::new()
            .name("triage-sync-once".to_string())
            .spawn(move || {
                if let Err(e) = coordinator.sync_incremental() {
                    warn!("Background sync failed: {}", e);
                }
            });
        if let Err(e) = spawned {
            warn!("Failed to spawn sync thread: {}", e);
        }
    }

    /// Run an incremental sync on the calling thread
    pub fn sync_messages_blocking(&self) -> EngineResult<SyncReport> {
        self.inner.coordinator.sync_incremental()
    }

    /// Merge one page older than `token` and return the next token
    ///
    /// `""` starts (or resumes) the walk; `"$end"` means history is
    /// exhausted and is returned unchanged without any remote call.
    pub fn sync_historical_messages(&self, token: &str) -> EngineResult<String> {
        let (next, _) = self.inner.coordinator.sync_historical(&HistoryToken::parse(token))?;
        Ok(next.as_wire())
    }

    /// Walk history until exhausted, `max_pages`, or `cancel`
    pub fn sync_history(
        &self,
        cancel: &AtomicBool,
        max_pages: Option<usize>,
    ) -> EngineResult<String> {
        Ok(self.inner.coordinator.sync_history(cancel, max_pages)?.as_wire())
    }

    /// Run incremental syncs on a background schedule
    pub fn start_scheduler(&self) -> EngineResult<SyncScheduler> {
        let config = &self.inner.config;
        Ok(SyncScheduler::start(
            self.inner.coordinator.clone(),
            self.inner.store.clone(),
            config.scope.clone(),
            ScheduleSettings {
                interval: Duration::from_secs(config.sync_interval_secs),
                cooldown_secs: config.sync_cooldown_secs,
            },
        )?)
    }

    // ========================================================================
    // Search and summaries
    // ========================================================================

    /// Messages best matching free text, best first
    pub fn get_ai_search_results(&self, query: &str) -> EngineResult<Vec<MessageSummary>> {
        Ok(self.search(query)?.messages)
    }

    /// Like [`get_ai_search_results`](Self::get_ai_search_results), reporting
    /// whether ranking fell back to keywords
    pub fn search(&self, query: &str) -> EngineResult<SearchOutcome> {
        let results = self.inner.search.query(query, None).map_err(search_unavailable)?;
        Ok(SearchOutcome {
            messages: query::summaries(results.messages),
            degraded: results.degraded,
        })
    }

    /// Messages similar to `id`, excluding it
    pub fn related_messages(&self, id: &str) -> EngineResult<Vec<MessageSummary>> {
        let id = MessageId::new(id);
        match self.inner.search.related(&id).map_err(search_unavailable)? {
            Some(results) => Ok(query::summaries(results.messages)),
            None => Err(EngineError::NotFound { id: id.to_string() }),
        }
    }

    /// Cached summary, or a new one when none exists or `force` is set
    pub fn summarize_email(&self, id: &str, force: bool) -> EngineResult<Summary> {
        self.inner.summarizer.summarize(&MessageId::new(id), force)
    }

    /// Summary generated earlier, without generating one
    pub fn cached_summary(&self, id: &str) -> EngineResult<Option<Summary>> {
        self.inner.summarizer.cached(&MessageId::new(id))
    }

    /// Block until queued index work is searchable; false on timeout
    pub fn wait_for_indexing(&self, timeout: Duration) -> bool {
        self.inner.indexer.wait_idle(timeout)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn trash_message(&self, id: &str) -> EngineResult<TrashOutcome> {
        self.inner.actions.trash_message(&MessageId::new(id))
    }

    pub fn mark_read(&self, id: &str) -> EngineResult<ReadOutcome> {
        self.inner.actions.mark_read(&MessageId::new(id))
    }
}

fn search_unavailable(err: anyhow::Error) -> EngineError {
    EngineError::SearchIndexUnavailable {
        message: format!("{:#}", err),
    }
}
