//! Periodic incremental sync on a background thread

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use super::SyncCoordinator;
use super::timing::{cooldown_elapsed, next_sync_delay};
use crate::storage::MailStore;

/// Scheduler cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub interval: Duration,
    /// Minimum seconds between syncs, measured from the last committed sync
    pub cooldown_secs: u64,
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    /// Sleep up to `timeout`; true when stop was requested
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut stopped) = self.stopped.lock() else {
            return true;
        };
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.wake.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => stopped = guard,
                Err(_) => return true,
            }
        }
        true
    }

    fn stop(&self) {
        if let Ok(mut stopped) = self.stopped.lock() {
            *stopped = true;
            self.wake.notify_all();
        }
    }
}

/// Handle to the scheduler thread; dropping it stops the thread
pub struct SyncScheduler {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    /// Start syncing `scope` every `settings.interval`
    ///
    /// The first sync runs as soon as the interval since the last committed
    /// sync has passed (immediately when never synced).
    pub fn start(
        coordinator: Arc<SyncCoordinator>,
        store: Arc<dyn MailStore>,
        scope: String,
        settings: ScheduleSettings,
    ) -> Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = signal.clone();

        let handle = std::thread::Builder::new()
            .name("triage-sync".to_string())
            .spawn(move || {
                let last_sync = |store: &dyn MailStore| {
                    store
                        .get_sync_state(&scope)
                        .ok()
                        .flatten()
                        .and_then(|s| s.last_sync_at)
                };

                let mut delay =
                    next_sync_delay(last_sync(store.as_ref()), settings.interval.as_secs());
                info!("Sync scheduler started, first sync in {:?}", delay);

                while !thread_signal.wait(delay) {
                    if cooldown_elapsed(last_sync(store.as_ref()), settings.cooldown_secs) {
                        match coordinator.sync_incremental() {
                            Ok(report) => debug!("Scheduled sync: {}", report),
                            Err(e) => warn!("Scheduled sync failed: {}", e),
                        }
                    } else {
                        debug!("Scheduled sync skipped, cooldown active");
                    }
                    delay = settings.interval;
                }
                info!("Sync scheduler stopped");
            })
            .context("Failed to spawn sync scheduler thread")?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Stop the thread, waiting for an in-progress sync to finish
    pub fn stop(&mut self) {
        self.signal.stop();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Sync scheduler thread panicked");
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::classify::RuleClassifier;
    use crate::models::EmailAddress;
    use crate::remote::{InMemoryProvider, RemoteMessage};
    use crate::storage::InMemoryMailStore;
    use crate::sync::SyncSettings;

    #[test]
    fn test_first_sync_runs_immediately_and_stops() {
        let store: Arc<dyn MailStore> = Arc::new(InMemoryMailStore::new());
        let provider = Arc::new(InMemoryProvider::new());
        provider.add_message(RemoteMessage::new(
            "m1",
            EmailAddress::new("a@example.com"),
            Utc::now(),
        ));

        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            provider,
            Arc::new(RuleClassifier::default()),
            Arc::new(Mutex::new(())),
            SyncSettings::default(),
        ));
        let mut scheduler = SyncScheduler::start(
            coordinator,
            store.clone(),
            "me".to_string(),
            ScheduleSettings {
                interval: Duration::from_secs(3600),
                cooldown_secs: 0,
            },
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while store.count_messages().unwrap() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        scheduler.stop();

        assert_eq!(store.count_messages().unwrap(), 1);
        assert!(store.get_sync_state("me").unwrap().unwrap().has_synced());
    }

    #[test]
    fn test_stop_signal_wakes_sleeper() {
        let signal = Arc::new(StopSignal::default());
        let waiter = {
            let signal = signal.clone();
            std::thread::spawn(move || signal.wait(Duration::from_secs(60)))
        };
        signal.stop();
        assert!(waiter.join().unwrap());
        assert!(!StopSignal::default().wait(Duration::from_millis(1)));
    }
}
