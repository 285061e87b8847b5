use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::PrepError;
use crate::fetcher::MetadataSource;
use crate::snapshot::SnapshotStore;

pub struct RefreshScheduler {
    sponsors: Vec<String>,
    store: Arc<SnapshotStore>,
    last_error: Arc<RwLock<Option<PrepError>>>,
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn start<S: MetadataSource + 'static>(
        source: Arc<S>,
        store: Arc<SnapshotStore>,
        sponsors: Vec<String>,
        interval: Duration,
    ) -> Result<Self, PrepError> {
        if interval.is_zero() {
            return Err(PrepError::Scheduler(
                "refresh interval must be positive".to_string(),
            ));
        }

        let last_error = Arc::new(RwLock::new(None));
        let refresher = Refresher {
            source,
            store: Arc::clone(&store),
            sponsors: sponsors.clone(),
            last_error: Arc::clone(&last_error),
        };
        refresher.refresh_all();

        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("dimsum-prep-refresh".to_string())
            .spawn(move || refresher.run(interval, &stop_rx))
            .map_err(|err| PrepError::Scheduler(format!("failed to spawn refresh thread: {err}")))?;

        info!(?sponsors, ?interval, "started metadata prefetch");

        Ok(Self {
            sponsors,
            store,
            last_error,
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn covers(&self, sponsor: &str) -> bool {
        self.sponsors.iter().any(|s| s == sponsor)
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.lock().is_some()
    }

    pub fn last_error(&self) -> Option<PrepError> {
        self.last_error.read().clone()
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.store.last_success()
    }

    /// Signals the loop and waits for it to exit. A fetch already in flight
    /// runs to completion first. Safe to call more than once.
    pub fn stop(&self) {
        let Some(stop_tx) = self.stop_tx.lock().take() else {
            return;
        };
        let _ = stop_tx.send(());
        drop(stop_tx);

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("metadata prefetch thread panicked");
            }
        }
        info!("stopped metadata prefetch");
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Refresher<S> {
    source: Arc<S>,
    store: Arc<SnapshotStore>,
    sponsors: Vec<String>,
    last_error: Arc<RwLock<Option<PrepError>>>,
}

impl<S: MetadataSource> Refresher<S> {
    fn run(self, interval: Duration, stop_rx: &Receiver<()>) {
        let mut next_tick = Instant::now() + interval;
        loop {
            let wait = next_tick.saturating_duration_since(Instant::now());
            match stop_rx.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {
                    self.refresh_all();
                    next_tick += interval;
                    let now = Instant::now();
                    while next_tick <= now {
                        next_tick += interval;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn refresh_all(&self) -> bool {
        for sponsor in &self.sponsors {
            match self.source.fetch(sponsor) {
                Ok(libraries) => {
                    *self.last_error.write() = None;
                    let stored = self.store.set(sponsor, libraries);
                    debug!(
                        sponsor = sponsor.as_str(),
                        libraries = stored.len(),
                        "prefetched metadata"
                    );
                }
                Err(err) => {
                    warn!(sponsor = sponsor.as_str(), error = %err, "metadata prefetch failed");
                    *self.last_error.write() = Some(err);
                    return false;
                }
            }
        }
        true
    }
}
