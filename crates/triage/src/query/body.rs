//! Lazy body fetch with a permanent local cache

use std::sync::Arc;

use log::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::models::{MessageBody, MessageId};
use crate::remote::MailProvider;
use crate::search::{IndexJob, Indexer};
use crate::storage::MailStore;

/// Where a body came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySource {
    Cache,
    Remote,
}

/// Fetches each body from the remote at most once
///
/// Bodies are immutable, so the first stored copy wins and every later call
/// is answered from the store, even while the remote is unreachable.
pub struct BodyCache {
    store: Arc<dyn MailStore>,
    provider: Arc<dyn MailProvider>,
    indexer: Option<Arc<Indexer>>,
}

impl BodyCache {
    pub fn new(store: Arc<dyn MailStore>, provider: Arc<dyn MailProvider>) -> Self {
        Self {
            store,
            provider,
            indexer: None,
        }
    }

    /// Re-index messages from their body once it arrives
    pub fn with_indexer(mut self, indexer: Arc<Indexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn get(&self, id: &MessageId) -> EngineResult<MessageBody> {
        self.get_with_source(id).map(|(body, _)| body)
    }

    /// Cached body, or fetch, store and return it
    pub fn get_with_source(&self, id: &MessageId) -> EngineResult<(MessageBody, BodySource)> {
        if let Some(body) = self.store.get_body(id)? {
            return Ok((body, BodySource::Cache));
        }
        if !self.store.has_message(id)? {
            return Err(EngineError::NotFound { id: id.to_string() });
        }

        debug!("Fetching body for {}", id);
        let fetched = self.provider.fetch_body(id)?;

        if !self.store.save_body(id, &fetched)? {
            // A concurrent fetch stored first; its copy is canonical
            if let Some(existing) = self.store.get_body(id)? {
                return Ok((existing, BodySource::Cache));
            }
        }

        if let Some(indexer) = &self.indexer
            && let Err(e) = indexer.enqueue([IndexJob::Upsert(id.clone())])
        {
            warn!("Failed to queue body re-index for {}: {:#}", id, e);
        }

        Ok((fetched, BodySource::Remote))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{EmailAddress, Message};
    use crate::remote::{InMemoryProvider, RemoteMessage};
    use crate::storage::InMemoryMailStore;

    fn setup() -> (Arc<InMemoryMailStore>, Arc<InMemoryProvider>, BodyCache) {
        let store = Arc::new(InMemoryMailStore::new());
        let provider = Arc::new(InMemoryProvider::new());

        let remote = RemoteMessage::new("m1", EmailAddress::new("a@example.com"), Utc::now());
        provider.add_message_with_body(remote, MessageBody::plain("Hello there"));
        store
            .upsert_message(Message::builder(MessageId::new("m1")).build())
            .unwrap();

        let cache = BodyCache::new(store.clone(), provider.clone());
        (store, provider, cache)
    }

    #[test]
    fn test_fetches_once() {
        let (_store, provider, cache) = setup();
        let id = MessageId::new("m1");

        let (body, source) = cache.get_with_source(&id).unwrap();
        assert_eq!(body.content, "Hello there");
        assert_eq!(source, BodySource::Remote);

        let (again, source) = cache.get_with_source(&id).unwrap();
        assert_eq!(again, body);
        assert_eq!(source, BodySource::Cache);
        assert_eq!(provider.body_fetch_count(), 1);
    }

    #[test]
    fn test_cached_body_survives_outage() {
        let (_store, provider, cache) = setup();
        let id = MessageId::new("m1");
        cache.get(&id).unwrap();

        provider.set_outage(true);
        assert_eq!(cache.get(&id).unwrap().content, "Hello there");
    }

    #[test]
    fn test_uncached_body_during_outage_is_remote_unavailable() {
        let (_store, provider, cache) = setup();
        provider.set_outage(true);
        let err = cache.get(&MessageId::new("m1")).unwrap_err();
        assert!(matches!(err, EngineError::RemoteUnavailable { .. }));
    }

    #[test]
    fn test_unknown_message_is_not_found() {
        let (_store, provider, cache) = setup();
        let err = cache.get(&MessageId::new("nope")).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
        assert_eq!(provider.body_fetch_count(), 0);
    }
}
