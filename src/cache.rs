//! Derived per-version data that is expensive to recompute: parsed schema
//! catalogs and the conflicted-path sets reported by the change-management
//! backend. Entries expire after a fixed window and can be dropped explicitly.
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use moka::notification::RemovalCause;
use object_store::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::{self, ChangeManagementBackend};
use crate::catalog::Catalog;
use crate::data_types::VersionId;

pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_CONFLICTS_TTL: Duration = Duration::from_secs(10 * 60);

pub type ConflictedPaths = BTreeSet<String>;

#[derive(Clone, Debug)]
pub struct CacheStore {
    catalogs: Cache<VersionId, Arc<Catalog>>,
    conflicts: Cache<VersionId, Arc<ConflictedPaths>>,
    // Bumped on every catalog invalidation; a refresh that started before
    // the bump must not write its snapshot back
    catalog_generations: Arc<DashMap<VersionId, Arc<Mutex<u64>>>>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CATALOG_TTL, DEFAULT_CONFLICTS_TTL)
    }
}

/// Bring reported paths into the form file listings use (no leading or
/// trailing `/`), dropping the ones that aren't valid paths
fn normalize_paths(paths: impl IntoIterator<Item = String>) -> ConflictedPaths {
    paths
        .into_iter()
        .filter_map(|path| match Path::parse(&path) {
            Ok(location) => Some(location.to_string()),
            Err(e) => {
                warn!("Ignoring invalid conflicted path {path:?}: {e}");
                None
            }
        })
        .collect()
}

fn on_evict<V>(name: &'static str, key: Arc<VersionId>, _value: V, cause: RemovalCause) {
    debug!("{name} cache entry for version {key} removed, cause: {cause:?}");
}

impl CacheStore {
    pub fn new(catalog_ttl: Duration, conflicts_ttl: Duration) -> Self {
        let catalogs = Cache::builder()
            .time_to_live(catalog_ttl)
            .eviction_listener(|k, v, cause| on_evict("Catalog", k, v, cause))
            .build();

        let conflicts = Cache::builder()
            .time_to_live(conflicts_ttl)
            .eviction_listener(|k, v, cause| on_evict("Conflicts", k, v, cause))
            .build();

        Self {
            catalogs,
            conflicts,
            catalog_generations: Arc::new(DashMap::new()),
        }
    }

    fn catalog_generation_lock(&self, version_id: &VersionId) -> Arc<Mutex<u64>> {
        self.catalog_generations
            .entry(version_id.clone())
            .or_default()
            .clone()
    }

    /// Take this before loading a catalog and hand it to
    /// [`CacheStore::update_catalog_cache_if_unchanged`] afterwards
    pub async fn catalog_generation(&self, version_id: &VersionId) -> u64 {
        *self.catalog_generation_lock(version_id).lock().await
    }

    pub async fn get_catalog_cache(&self, version_id: &VersionId) -> Option<Arc<Catalog>> {
        self.catalogs.get(version_id).await
    }

    /// Replace the cached catalog wholesale; readers holding the previous
    /// `Arc` keep seeing the old snapshot.
    pub async fn update_catalog_cache(&self, version_id: VersionId, catalog: Arc<Catalog>) {
        debug!(
            "Caching catalog with {} tables for version {version_id}",
            catalog.tables.len()
        );
        self.catalogs.insert(version_id, catalog).await
    }

    /// Cache a freshly loaded catalog unless the version's catalog was
    /// invalidated since `generation` was taken. Returns whether it was cached.
    pub async fn update_catalog_cache_if_unchanged(
        &self,
        version_id: VersionId,
        generation: u64,
        catalog: Arc<Catalog>,
    ) -> bool {
        let lock = self.catalog_generation_lock(&version_id);
        let current = lock.lock().await;
        if *current != generation {
            debug!("Catalog of version {version_id} was invalidated while loading, not caching it");
            return false;
        }

        self.update_catalog_cache(version_id, catalog).await;
        true
    }

    pub async fn clear_catalog_cache(&self, version_id: &VersionId) {
        let lock = self.catalog_generation_lock(version_id);
        let mut generation = lock.lock().await;
        *generation += 1;
        self.catalogs.invalidate(version_id).await
    }

    pub async fn get_conflicts_cache(
        &self,
        version_id: &VersionId,
    ) -> Option<Arc<ConflictedPaths>> {
        self.conflicts.get(version_id).await
    }

    pub async fn update_conflicts_cache(
        &self,
        version_id: VersionId,
        paths: impl IntoIterator<Item = String>,
    ) {
        let paths = normalize_paths(paths);
        debug!(
            "Caching {} conflicted paths for version {version_id}",
            paths.len()
        );
        self.conflicts.insert(version_id, Arc::new(paths)).await
    }

    pub async fn clear_conflicts_cache(&self, version_id: &VersionId) {
        self.conflicts.invalidate(version_id).await
    }

    /// Reload the conflicted-path set from the change-management backend's
    /// diff report
    pub async fn refresh_conflicts_cache(
        &self,
        backend: &dyn ChangeManagementBackend,
        version_id: &VersionId,
    ) -> Result<Arc<ConflictedPaths>, backend::Error> {
        let paths = Arc::new(normalize_paths(
            backend.get_conflicted_paths(version_id).await?,
        ));

        self.conflicts.insert(version_id.clone(), paths.clone()).await;
        Ok(paths)
    }

    /// Drop everything derived for a version, e.g. once it's been submitted or declined
    pub async fn invalidate_version(&self, version_id: &VersionId) {
        self.clear_catalog_cache(version_id).await;
        self.clear_conflicts_cache(version_id).await;
    }
}
