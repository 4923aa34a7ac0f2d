//! Background indexing worker
//!
//! Sync commits enqueue jobs here and return immediately. The worker drains
//! whatever is queued, applies it, and commits the lexical index once per
//! batch.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};

use super::SearchIndex;
use crate::models::MessageId;

/// Upper bound on jobs applied before a commit
const MAX_BATCH: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexJob {
    Upsert(MessageId),
    Remove(MessageId),
}

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self, n: usize) {
        if let Ok(mut count) = self.count.lock() {
            *count += n;
        }
    }

    fn finish(&self, n: usize) {
        if let Ok(mut count) = self.count.lock() {
            *count = count.saturating_sub(n);
            if *count == 0 {
                self.idle.notify_all();
            }
        }
    }
}

/// Handle to the indexing thread
pub struct Indexer {
    sender: Mutex<Option<Sender<IndexJob>>>,
    pending: Arc<Pending>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Indexer {
    /// Spawn the worker for `index`
    pub fn start(index: Arc<SearchIndex>) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let pending = Arc::new(Pending::default());

        let worker_pending = pending.clone();
        let handle = std::thread::Builder::new()
            .name("triage-indexer".to_string())
            .spawn(move || run(index, receiver, worker_pending))
            .context("Failed to spawn indexer thread")?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            pending,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue jobs; they become searchable after the worker's next commit
    pub fn enqueue(&self, jobs: impl IntoIterator<Item = IndexJob>) -> Result<()> {
        let guard = self.sender.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;
        let sender = guard.as_ref().context("Indexer stopped")?;
        for job in jobs {
            self.pending.add(1);
            if sender.send(job).is_err() {
                self.pending.finish(1);
                return Err(anyhow!("Indexer thread exited"));
            }
        }
        Ok(())
    }

    /// Block until every queued job is committed; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut count) = self.pending.count.lock() else {
            return false;
        };
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.pending.idle.wait_timeout(count, deadline - now) {
                Ok((guard, _)) => count = guard,
                Err(_) => return false,
            }
        }
        true
    }

    /// Stop accepting jobs and wait for the worker to drain
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Some(handle) = self.handle.lock().ok().and_then(|mut h| h.take()) {
            if handle.join().is_err() {
                warn!("Indexer thread panicked");
            }
        }
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(index: Arc<SearchIndex>, receiver: Receiver<IndexJob>, pending: Arc<Pending>) {
    while let Ok(first) = receiver.recv() {
        let mut batch = vec![first];
        while batch.len() < MAX_BATCH {
            match receiver.try_recv() {
                Ok(job) => batch.push(job),
                Err(_) => break,
            }
        }

        let count = batch.len();
        for job in batch {
            let result = match &job {
                IndexJob::Upsert(id) => index.index_message(id).map(|_| ()),
                IndexJob::Remove(id) => index.remove(id),
            };
            if let Err(e) = result {
                warn!("Index job {:?} failed: {:#}", job, e);
            }
        }
        if let Err(e) = index.commit() {
            warn!("Index commit failed: {:#}", e);
        }
        debug!("Indexed {} jobs", count);
        pending.finish(count);
    }
    debug!("Indexer stopped");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::ai::HashingEmbedder;
    use crate::models::{EmailAddress, Message};
    use crate::search::{LexicalIndex, SearchSettings};
    use crate::storage::{InMemoryMailStore, MailStore};

    #[test]
    fn test_jobs_become_searchable() {
        let store: Arc<dyn MailStore> = Arc::new(InMemoryMailStore::new());
        store
            .upsert_message(
                Message::builder(MessageId::new("a"))
                    .from(EmailAddress::new("bob@example.com"))
                    .subject("Invoice 42")
                    .received_at(Utc::now())
                    .build(),
            )
            .unwrap();
        let index = Arc::new(
            SearchIndex::new(
                store,
                Arc::new(HashingEmbedder::default()),
                LexicalIndex::in_memory().unwrap(),
                SearchSettings::default(),
            )
            .unwrap(),
        );
        let indexer = Indexer::start(index.clone()).unwrap();

        indexer.enqueue([IndexJob::Upsert(MessageId::new("a"))]).unwrap();
        assert!(indexer.wait_idle(Duration::from_secs(10)));
        assert_eq!(index.query("invoice", None).unwrap().messages.len(), 1);

        indexer.enqueue([IndexJob::Remove(MessageId::new("a"))]).unwrap();
        assert!(indexer.wait_idle(Duration::from_secs(10)));
        assert!(index.query("invoice", None).unwrap().messages.is_empty());
    }

    #[test]
    fn test_enqueue_after_shutdown_fails() {
        let index = Arc::new(
            SearchIndex::new(
                Arc::new(InMemoryMailStore::new()),
                Arc::new(HashingEmbedder::default()),
                LexicalIndex::in_memory().unwrap(),
                SearchSettings::default(),
            )
            .unwrap(),
        );
        let indexer = Indexer::start(index).unwrap();
        indexer.shutdown();
        assert!(indexer.enqueue([IndexJob::Remove(MessageId::new("x"))]).is_err());
        assert!(indexer.wait_idle(Duration::from_millis(10)));
    }
}
