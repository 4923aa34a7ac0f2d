//! Incremental and historical sync
//!
//! Every pass follows the same shape: talk to the remote and classify with
//! no lock held, then take the engine writer lock for the read-merge-write
//! of one batch, committed together with its cursor movement. Index jobs
//! are queued after the commit.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rayon::prelude::*;

use super::merge::{Merge, MergeMode, merge};
use super::report::{ItemOutcome, SyncReport};
use crate::classify::{Classification, Classifier};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{CursorAdvance, HistoryToken, Message, MessageId};
use crate::remote::{ChangeSet, MailProvider, RemoteError, RemoteMessage};
use crate::search::{IndexJob, Indexer};
use crate::storage::{MailStore, StoreBatch};

/// Sync tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub scope: String,
    pub initial_sync_limit: usize,
    pub history_page_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for SyncSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            scope: config.scope.clone(),
            initial_sync_limit: config.initial_sync_limit,
            history_page_size: config.history_page_size,
        }
    }
}

/// A remote message ready to merge
struct Observed {
    remote: RemoteMessage,
    classification: Classification,
    /// Set when the classifier failed and the fallback was used
    defaulted: Option<String>,
}

/// Metadata fetch results for a set of IDs
#[derive(Default)]
struct Fetched {
    observed: Vec<Observed>,
    /// The remote reported these as gone
    gone: Vec<MessageId>,
    failed: Vec<(MessageId, String)>,
}

/// Clears the running flag when a sync pass ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Reconciles the remote mailbox into the local store
pub struct SyncCoordinator {
    store: Arc<dyn MailStore>,
    provider: Arc<dyn MailProvider>,
    classifier: Arc<dyn Classifier>,
    /// Engine-wide writer lock, shared with local mutations
    writer: Arc<Mutex<()>>,
    indexer: Option<Arc<Indexer>>,
    settings: SyncSettings,
    running: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn MailStore>,
        provider: Arc<dyn MailProvider>,
        classifier: Arc<dyn Classifier>,
        writer: Arc<Mutex<()>>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            provider,
            classifier,
            writer,
            indexer: None,
            settings,
            running: AtomicBool::new(false),
        }
    }

    /// Queue index jobs for every committed change
    pub fn with_indexer(mut self, indexer: Arc<Indexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// An incremental pass is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Fetch and merge everything that changed since the incremental cursor
    ///
    /// Pending local mutations are reconciled first. Without a usable cursor
    /// the newest `initial_sync_limit` messages are listed instead. A call
    /// made while another pass runs returns a skipped report at once.
    pub fn sync_incremental(&self) -> EngineResult<SyncReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Incremental sync already running, skipping");
            return Ok(SyncReport::skipped());
        }
        let _running = RunningGuard(&self.running);

        let start = Instant::now();
        let mut report = SyncReport::default();

        self.reconcile_pending(&mut report)?;

        let observed_at = Utc::now();
        let state = self.store.get_sync_state(&self.settings.scope)?;
        let cursor = state.as_ref().and_then(|s| s.incremental_cursor.clone());
        let retry_ids = state.map(|s| s.failed_ids).unwrap_or_default();

        let changes = match cursor {
            Some(cursor) => match self.provider.list_changes(&cursor) {
                Ok(changes) => changes,
                Err(RemoteError::CursorExpired) => {
                    warn!("Sync cursor {} expired, re-bootstrapping", cursor);
                    report.bootstrapped = true;
                    self.bootstrap()?
                }
                Err(e) => return Err(e.into()),
            },
            None => {
                report.bootstrapped = true;
                self.bootstrap()?
            }
        };

        let deleted: HashSet<&MessageId> = changes.deleted.iter().collect();
        let mut ids = changes.changed.clone();
        let mut seen: HashSet<MessageId> = ids.iter().cloned().collect();
        for id in retry_ids {
            if !deleted.contains(&id) && seen.insert(id.clone()) {
                ids.push(id);
            }
        }

        let fetched = self.fetch(&ids)?;
        let failed_ids = fetched.failed.iter().map(|(id, _)| id.clone()).collect();
        self.commit(
            fetched,
            changes.deleted.clone(),
            MergeMode::Sync,
            CursorAdvance::Incremental {
                cursor: changes.cursor.clone(),
                failed_ids,
            },
            Some(Utc::now()),
            observed_at,
            &mut report,
        )?;

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!("Incremental sync: {}", report);
        Ok(report)
    }

    /// Capture "now" first, then list the newest messages
    fn bootstrap(&self) -> EngineResult<ChangeSet> {
        let cursor = self.provider.current_cursor()?;
        let page = self.provider.list_page(None, self.settings.initial_sync_limit)?;
        info!("Bootstrapping sync at cursor {} with {} messages", cursor, page.ids.len());
        Ok(ChangeSet {
            changed: page.ids,
            deleted: Vec::new(),
            cursor,
        })
    }

    /// Make the remote authoritative for messages with pending local writes
    fn reconcile_pending(&self, report: &mut SyncReport) -> EngineResult<()> {
        let pending: Vec<MessageId> =
            self.store.list_pending()?.into_iter().map(|m| m.id).collect();
        if pending.is_empty() {
            return Ok(());
        }

        debug!("Reconciling {} pending messages", pending.len());
        let observed_at = Utc::now();
        let fetched = self.fetch(&pending)?;
        self.commit(
            fetched,
            Vec::new(),
            MergeMode::Reconcile,
            CursorAdvance::None,
            None,
            observed_at,
            report,
        )
    }

    /// Merge one page older than `token`; returns the next token
    ///
    /// [`HistoryToken::Start`] resumes from the persisted boundary, or from
    /// the newest page when nothing is persisted. An exhausted token is a
    /// no-op. If some messages on the page could not be fetched, the token
    /// is not advanced so the page is retried.
    pub fn sync_historical(
        &self,
        token: &HistoryToken,
    ) -> EngineResult<(HistoryToken, SyncReport)> {
        let start = Instant::now();
        let page_token = match token {
            HistoryToken::Exhausted => return Ok((HistoryToken::Exhausted, SyncReport::default())),
            HistoryToken::Page(t) => Some(t.clone()),
            HistoryToken::Start => {
                let persisted = self
                    .store
                    .get_sync_state(&self.settings.scope)?
                    .and_then(|s| s.historical);
                match persisted {
                    Some(HistoryToken::Exhausted) => {
                        return Ok((HistoryToken::Exhausted, SyncReport::default()));
                    }
                    Some(HistoryToken::Page(t)) => Some(t),
                    Some(HistoryToken::Start) | None => None,
                }
            }
        };

        let from = page_token.clone().map(HistoryToken::Page).unwrap_or(HistoryToken::Start);
        let observed_at = Utc::now();
        let page = self
            .provider
            .list_page(page_token.as_deref(), self.settings.history_page_size)?;
        let fetched = self.fetch(&page.ids)?;

        let next = if fetched.failed.is_empty() {
            match page.next_token {
                Some(t) => HistoryToken::Page(t),
                None => HistoryToken::Exhausted,
            }
        } else {
            warn!("{} messages failed on history page, holding token", fetched.failed.len());
            from.clone()
        };

        let mut report = SyncReport::default();
        self.commit(
            fetched,
            Vec::new(),
            MergeMode::Sync,
            CursorAdvance::Historical {
                from,
                next: next.clone(),
            },
            None,
            observed_at,
            &mut report,
        )?;

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!("History page: {} (next: {:?})", report, next);
        Ok((next, report))
    }

    /// Walk history pages until exhausted, `max_pages` is reached, or
    /// `cancel` is set
    ///
    /// Cancellation is checked between pages only.
    pub fn sync_history(
        &self,
        cancel: &AtomicBool,
        max_pages: Option<usize>,
    ) -> EngineResult<HistoryToken> {
        let mut token = HistoryToken::Start;
        let mut pages = 0;

        loop {
            if cancel.load(Ordering::SeqCst) {
                info!("History sync cancelled after {} pages", pages);
                break;
            }
            if max_pages.is_some_and(|max| pages >= max) {
                break;
            }

            let (next, _) = self.sync_historical(&token)?;
            pages += 1;
            if next.is_exhausted() {
                info!("History exhausted after {} pages", pages);
                return Ok(next);
            }
            if next == token {
                // Held on failures; retry on a later call
                break;
            }
            token = next;
        }
        Ok(token)
    }

    /// Fetch metadata in parallel and classify; no locks held
    fn fetch(&self, ids: &[MessageId]) -> EngineResult<Fetched> {
        let provider = &self.provider;
        let results: Vec<(MessageId, Result<RemoteMessage, RemoteError>)> = ids
            .par_iter()
            .map(|id| (id.clone(), provider.fetch_metadata(id)))
            .collect();

        let mut fetched = Fetched::default();
        for (id, result) in results {
            match result {
                Ok(remote) => fetched.observed.push(self.classify(remote)),
                Err(RemoteError::NotFound { .. }) => fetched.gone.push(id),
                Err(e @ RemoteError::Unauthorized { .. }) => return Err(e.into()),
                Err(e) => {
                    warn!("Failed to fetch message {}: {}", id, e);
                    fetched.failed.push((id, e.to_string()));
                }
            }
        }
        Ok(fetched)
    }

    fn classify(&self, remote: RemoteMessage) -> Observed {
        match self.classifier.classify(&remote) {
            Ok(classification) => Observed {
                remote,
                classification,
                defaulted: None,
            },
            Err(e) => {
                warn!("{}; using fallback channel", e);
                Observed {
                    remote,
                    classification: self.classifier.fallback(),
                    defaulted: Some(e.reason),
                }
            }
        }
    }

    /// Merge and commit one batch under the writer lock, then queue indexing
    #[allow(clippy::too_many_arguments)]
    fn commit(
        &self,
        fetched: Fetched,
        deleted: Vec<MessageId>,
        mode: MergeMode,
        cursor: CursorAdvance,
        synced_at: Option<DateTime<Utc>>,
        observed_at: DateTime<Utc>,
        report: &mut SyncReport,
    ) -> EngineResult<()> {
        let mut jobs = Vec::new();
        {
            let _writer = self.writer.lock().map_err(|e| EngineError::Storage {
                message: format!("Writer lock poisoned: {}", e),
            })?;

            let ids: Vec<MessageId> = fetched
                .observed
                .iter()
                .map(|o| o.remote.id.clone())
                .chain(fetched.gone.iter().cloned())
                .chain(deleted.iter().cloned())
                .collect();
            let existing: HashMap<MessageId, Message> = self
                .store
                .get_messages(&ids)?
                .into_iter()
                .map(|m| (m.id.clone(), m))
                .collect();

            let mut batch = StoreBatch::new(self.settings.scope.clone());
            let now = Utc::now();

            for observed in fetched.observed {
                let id = observed.remote.id.clone();
                let current = existing.get(&id);

                // A local write landed after the remote state was read
                if current.is_some_and(|m| m.updated_at > observed_at) {
                    report.record(id, ItemOutcome::Unchanged);
                    continue;
                }

                let classification = match (&observed.defaulted, current) {
                    (Some(_), Some(message)) => Classification {
                        channel: message.channel.clone(),
                        importance: message.importance,
                        deadline: message.deadline,
                    },
                    _ => observed.classification,
                };

                let outcome = match merge(current, &observed.remote, &classification, mode, now) {
                    Merge::Insert(message) => {
                        batch.upserts.push(message);
                        jobs.push(IndexJob::Upsert(id.clone()));
                        ItemOutcome::Inserted
                    }
                    Merge::Update(message) => {
                        batch.upserts.push(message);
                        jobs.push(IndexJob::Upsert(id.clone()));
                        ItemOutcome::Updated
                    }
                    Merge::Unchanged => ItemOutcome::Unchanged,
                };
                let outcome = match observed.defaulted {
                    Some(reason) => ItemOutcome::Defaulted { reason },
                    None => outcome,
                };
                report.record(id, outcome);
            }

            for id in fetched.gone.into_iter().chain(deleted) {
                if existing.contains_key(&id) && !batch.deletions.contains(&id) {
                    report.record(id.clone(), ItemOutcome::Deleted);
                    jobs.push(IndexJob::Remove(id.clone()));
                    batch.deletions.push(id);
                }
            }

            for (id, reason) in fetched.failed {
                report.record(id, ItemOutcome::Failed { reason });
            }

            batch.channels = Some(self.classifier.taxonomy());
            batch.cursor = cursor;
            batch.synced_at = synced_at;
            self.store.commit_batch(batch)?;
        }

        if let Some(indexer) = &self.indexer
            && !jobs.is_empty()
            && let Err(e) = indexer.enqueue(jobs)
        {
            warn!("Failed to queue index jobs: {:#}", e);
        }
        Ok(())
    }
}
