use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::Libraries;
use crate::error::PrepError;
use crate::fetcher::{MetadataFetcher, MetadataSource};
use crate::refresh::RefreshScheduler;
use crate::registry::SampleRegistry;
use crate::sheets::MetadataService;
use crate::snapshot::SnapshotStore;

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub sheet_id: String,
    pub cache_lifetime: Duration,
    pub prefetch: Vec<String>,
}

pub struct SampleClient<R, M>
where
    R: SampleRegistry + 'static,
    M: MetadataService + 'static,
{
    fetcher: Arc<MetadataFetcher<R, M>>,
    store: Arc<SnapshotStore>,
    scheduler: Option<RefreshScheduler>,
}

impl<R, M> SampleClient<R, M>
where
    R: SampleRegistry + 'static,
    M: MetadataService + 'static,
{
    pub fn new(registry: R, metadata: M, options: ClientOptions) -> Result<Self, PrepError> {
        let fetcher = Arc::new(MetadataFetcher::new(registry, metadata, options.sheet_id));
        let store = Arc::new(SnapshotStore::new(options.cache_lifetime));

        let scheduler = if !options.prefetch.is_empty() && !options.cache_lifetime.is_zero() {
            Some(RefreshScheduler::start(
                Arc::clone(&fetcher),
                Arc::clone(&store),
                options.prefetch,
                options.cache_lifetime,
            )?)
        } else {
            None
        };

        Ok(Self {
            fetcher,
            store,
            scheduler,
        })
    }

    /// The consolidated tree for a sponsor.
    ///
    /// Prefetched sponsors always get the last stored tree immediately, even
    /// if it has gone stale because background refreshes are failing. Other
    /// sponsors are served from cache while fresh and fetched otherwise.
    pub fn for_sponsor(&self, sponsor: &str) -> Result<Arc<Libraries>, PrepError> {
        let snapshot = self.store.get(sponsor);
        if snapshot.fresh || self.is_prefetched(sponsor) {
            return Ok(snapshot.libraries);
        }

        debug!(sponsor, "cache miss, fetching metadata");
        let libraries = self.fetcher.fetch(sponsor)?;
        Ok(self.store.set(sponsor, libraries))
    }

    pub fn is_prefetched(&self, sponsor: &str) -> bool {
        self.scheduler
            .as_ref()
            .is_some_and(|scheduler| scheduler.is_running() && scheduler.covers(sponsor))
    }

    pub fn last_error(&self) -> Option<PrepError> {
        self.scheduler
            .as_ref()
            .and_then(RefreshScheduler::last_error)
    }

    pub fn last_prefetch_success(&self) -> Option<DateTime<Utc>> {
        self.store.last_success()
    }

    pub fn cache_lifetime(&self) -> Duration {
        self.store.lifetime()
    }

    pub fn close(&self) -> Result<(), PrepError> {
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop();
        }
        self.fetcher.registry().close()
    }
}
