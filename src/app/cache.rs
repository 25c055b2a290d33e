//! Time-bounded caches for installations and their repositories.
//!
//! Each level is a list that is only ever replaced wholesale. Readers load an
//! immutable snapshot; refreshes are serialized by an async mutex and the new
//! list and its timestamp are published together in a single swap.

use arc_swap::ArcSwap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Immutable contents of one cache level.
#[derive(Debug)]
pub(crate) struct Snapshot<T> {
    pub(crate) items: Vec<T>,
    refreshed_at: Option<Instant>,
}

impl<T> Snapshot<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            refreshed_at: None,
        }
    }

    /// Fresh while `refreshed_at + interval` is still in the future.
    pub(crate) fn is_fresh(&self, interval: Duration, now: Instant) -> bool {
        self.refreshed_at.is_some_and(|at| at + interval > now)
    }

    #[cfg(test)]
    pub(crate) fn refreshed_at(&self) -> Option<Instant> {
        self.refreshed_at
    }
}

/// A list that goes stale after an interval and is re-fetched in full.
pub(crate) struct TimedList<T> {
    level: &'static str,
    current: ArcSwap<Snapshot<T>>,
    refresh: Mutex<()>,
}

impl<T> TimedList<T> {
    pub(crate) fn new(level: &'static str) -> Self {
        Self {
            level,
            current: ArcSwap::from_pointee(Snapshot::empty()),
            refresh: Mutex::new(()),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<Snapshot<T>> {
        self.current.load_full()
    }

    /// Return a snapshot that is fresh for `interval`, calling `fetch` first if
    /// the current one is stale.
    ///
    /// Only one refresh per level runs at a time. On error nothing is stored,
    /// so the level stays stale and the next caller tries again.
    pub(crate) async fn fresh<F, Fut, E>(
        &self,
        interval: Duration,
        fetch: F,
    ) -> Result<Arc<Snapshot<T>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
        E: std::fmt::Display,
    {
        let snapshot = self.current.load_full();
        if snapshot.is_fresh(interval, Instant::now()) {
            return Ok(snapshot);
        }

        let _guard = self.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        let snapshot = self.current.load_full();
        if snapshot.is_fresh(interval, Instant::now()) {
            debug!(level = self.level, "Cache refreshed by concurrent caller");
            return Ok(snapshot);
        }

        debug!(level = self.level, "Cache stale, refreshing");
        match fetch().await {
            Ok(items) => {
                let fresh = Arc::new(Snapshot {
                    items,
                    refreshed_at: Some(Instant::now()),
                });
                self.current.store(fresh.clone());
                metrics::counter!(
                    "githubapp_cache_refreshes_total",
                    "level" => self.level,
                    "outcome" => "success"
                )
                .increment(1);
                info!(level = self.level, count = fresh.items.len(), "Cache refreshed");
                Ok(fresh)
            }
            Err(e) => {
                metrics::counter!(
                    "githubapp_cache_refreshes_total",
                    "level" => self.level,
                    "outcome" => "failure"
                )
                .increment(1);
                warn!(level = self.level, error = %e, "Cache refresh failed, keeping previous contents");
                Err(e)
            }
        }
    }
}

/// Repository visible to an installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedRepository {
    pub id: u64,
    pub name: String,
}

/// Repositories of a single installation.
pub(crate) struct RepositoryCache {
    list: TimedList<CachedRepository>,
}

impl RepositoryCache {
    pub(crate) fn new() -> Self {
        Self {
            list: TimedList::new("repositories"),
        }
    }

    /// Look `name` up, refreshing through `fetch` first when stale.
    /// `Ok(None)` means the (fresh) list has no such repository.
    pub(crate) async fn find<F, Fut, E>(
        &self,
        name: &str,
        interval: Duration,
        fetch: F,
    ) -> Result<Option<u64>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<CachedRepository>, E>>,
        E: std::fmt::Display,
    {
        let snapshot = self.list.fresh(interval, fetch).await?;
        Ok(snapshot.items.iter().find(|r| r.name == name).map(|r| r.id))
    }

    pub(crate) fn snapshot(&self) -> Arc<Snapshot<CachedRepository>> {
        self.list.snapshot()
    }
}

/// An installation bound to one owner, together with its repository cache.
pub(crate) struct CachedInstallation {
    pub id: u64,
    /// Lower-cased account login.
    pub owner: String,
    pub(crate) repositories: RepositoryCache,
}

impl CachedInstallation {
    pub(crate) fn new(id: u64, owner: &str) -> Self {
        Self {
            id,
            owner: normalize_owner(owner),
            repositories: RepositoryCache::new(),
        }
    }
}

impl std::fmt::Debug for CachedInstallation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedInstallation")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("repositories", &self.repositories.snapshot().items.len())
            .finish()
    }
}

/// All installations of the app, keyed by normalized owner.
pub(crate) struct InstallationCache {
    list: TimedList<Arc<CachedInstallation>>,
}

impl InstallationCache {
    pub(crate) fn new() -> Self {
        Self {
            list: TimedList::new("installations"),
        }
    }

    /// Look `owner` up, refreshing through `fetch` first when stale.
    pub(crate) async fn find<F, Fut, E>(
        &self,
        owner: &str,
        interval: Duration,
        fetch: F,
    ) -> Result<Option<Arc<CachedInstallation>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Arc<CachedInstallation>>, E>>,
        E: std::fmt::Display,
    {
        let owner = normalize_owner(owner);
        let snapshot = self.list.fresh(interval, fetch).await?;
        Ok(snapshot.items.iter().find(|i| i.owner == owner).cloned())
    }

    /// Fresh view of every installation.
    pub(crate) async fn all<F, Fut, E>(
        &self,
        interval: Duration,
        fetch: F,
    ) -> Result<Arc<Snapshot<Arc<CachedInstallation>>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Arc<CachedInstallation>>, E>>,
        E: std::fmt::Display,
    {
        self.list.fresh(interval, fetch).await
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Arc<Snapshot<Arc<CachedInstallation>>> {
        self.list.snapshot()
    }
}

pub(crate) fn normalize_owner(owner: &str) -> String {
    owner.to_lowercase()
}
