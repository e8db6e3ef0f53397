use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{stream, StreamExt, TryStreamExt};
use object_store::{path::Path, ObjectMeta, ObjectStore};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

use crate::cache::CacheStore;
use crate::data_types::VersionId;

use super::etag::{precondition_holds, ETag};
use super::interface::{
    Error, FileEntry, FileStatus, Result, VersionedFileRepository,
};

pub const DEFAULT_TABLE_DEFINITION_PATH: &str = "data-model/";

/// Same-size files compared by content at once while listing a folder
const MAX_CONCURRENT_COMPARISONS: usize = 10;

/// Serializes mutations of one path. The map entry goes away with the last holder.
struct PathLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    path: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.path, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// File repository of one version, laid over two working copies: the
/// version's own and master's. For master itself both are the same store.
#[derive(Debug)]
pub struct ObjectStoreFileRepository {
    version_id: VersionId,
    candidate: Arc<dyn ObjectStore>,
    master: Arc<dyn ObjectStore>,
    cache: Arc<CacheStore>,
    table_definition_paths: Vec<String>,
    operation_timeout: Option<Duration>,
    path_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ObjectStoreFileRepository {
    pub fn new(
        version_id: VersionId,
        candidate: Arc<dyn ObjectStore>,
        master: Arc<dyn ObjectStore>,
        cache: Arc<CacheStore>,
    ) -> Self {
        Self {
            version_id,
            candidate,
            master,
            cache,
            table_definition_paths: vec![DEFAULT_TABLE_DEFINITION_PATH.to_string()],
            operation_timeout: None,
            path_locks: DashMap::new(),
        }
    }

    /// Path prefixes whose files define the version's tables. Changing one
    /// of them drops the version's cached catalog.
    pub fn with_table_definition_paths(mut self, paths: Vec<String>) -> Self {
        self.table_definition_paths = paths;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    fn parse_path(path: &str) -> Result<Path> {
        Path::parse(path).map_err(|source| Error::InvalidPath {
            path: path.to_string(),
            source,
        })
    }

    fn file_not_found(&self, location: &Path) -> Error {
        Error::FileNotFound {
            version: self.version_id.clone(),
            path: location.to_string(),
        }
    }

    fn conflict(&self, location: &Path) -> Error {
        warn!(
            "Rejecting change of {location} in version {}: stale ETag",
            self.version_id
        );
        Error::Conflict {
            version: self.version_id.clone(),
            path: location.to_string(),
        }
    }

    async fn lock_path(&self, location: &Path) -> PathLock<'_> {
        let path = location.to_string();
        let lock = self.path_locks.entry(path.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        PathLock {
            locks: &self.path_locks,
            path,
            guard: Some(guard),
        }
    }

    async fn bounded<T: Send>(
        &self,
        operation: &'static str,
        location: &Path,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                warn!(
                    "{operation} of {location} in version {} timed out after {limit:?}",
                    self.version_id
                );
                Error::Timeout {
                    operation,
                    path: location.to_string(),
                }
            })?,
            None => fut.await,
        }
    }

    async fn fetch(store: &dyn ObjectStore, location: &Path) -> Result<Option<Bytes>> {
        match store.get(location).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(store: &dyn ObjectStore, folder: Option<&Path>) -> Result<Vec<ObjectMeta>> {
        match store.list_with_delimiter(folder).await {
            Ok(listing) => Ok(listing.objects),
            Err(object_store::Error::NotFound { .. }) => Ok(vec![]),
            Err(e) => Err(e.into()),
        }
    }

    fn decode(&self, location: &Path, bytes: Bytes) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            error!(
                "File {location} in version {} is not valid UTF-8: {e}",
                self.version_id
            );
            Error::InvariantViolation {
                reason: format!("content of {location} is not valid UTF-8"),
            }
        })
    }

    async fn after_change(&self, location: &Path) {
        let path = location.as_ref();
        if self
            .table_definition_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.trim_start_matches('/')))
        {
            debug!(
                "{path} defines tables, dropping the catalog of version {}",
                self.version_id
            );
            self.cache.clear_catalog_cache(&self.version_id).await;
        }
    }

    async fn classify(
        &self,
        location: Path,
        in_master: Option<usize>,
        in_candidate: Option<usize>,
    ) -> Result<(Path, FileStatus)> {
        let identical = match (in_master, in_candidate) {
            (Some(master_size), Some(candidate_size)) if master_size == candidate_size => {
                let (master, candidate) = futures::try_join!(
                    Self::fetch(self.master.as_ref(), &location),
                    Self::fetch(self.candidate.as_ref(), &location),
                )?;
                master.map(|b| ETag::from_content(&b)) == candidate.map(|b| ETag::from_content(&b))
            }
            _ => false,
        };

        let status = FileStatus::classify(in_master.is_some(), in_candidate.is_some(), identical)
            .ok_or_else(|| Error::InvariantViolation {
                reason: format!("{location} listed but present in neither working copy"),
            })?;
        Ok((location, status))
    }
}

fn logical_name(location: &Path) -> String {
    let filename = location.filename().unwrap_or_default();
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => filename.to_string(),
    }
}

#[async_trait]
impl VersionedFileRepository for ObjectStoreFileRepository {
    fn version_id(&self) -> &VersionId {
        &self.version_id
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let (content, _) = self.read_file_with_etag(path).await?;
        Ok(content)
    }

    async fn read_file_with_etag(&self, path: &str) -> Result<(String, ETag)> {
        let location = Self::parse_path(path)?;

        let bytes = self
            .bounded("read", &location, Self::fetch(self.candidate.as_ref(), &location))
            .await?
            .ok_or_else(|| self.file_not_found(&location))?;

        let etag = ETag::from_content(&bytes);
        Ok((self.decode(&location, bytes)?, etag))
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        if_match: Option<&str>,
    ) -> Result<ETag> {
        let location = Self::parse_path(path)?;
        let _lock = self.lock_path(&location).await;

        let etag = self
            .bounded("write", &location, async {
                let current = Self::fetch(self.candidate.as_ref(), &location)
                    .await?
                    .map(|bytes| ETag::from_content(&bytes));
                if !precondition_holds(current.as_ref(), if_match) {
                    return Err(self.conflict(&location));
                }

                self.candidate
                    .put(&location, Bytes::from(content.to_string()))
                    .await?;
                Ok(ETag::from_content(content.as_bytes()))
            })
            .await?;

        debug!("Wrote {location} in version {} ({etag})", self.version_id);
        self.after_change(&location).await;
        Ok(etag)
    }

    async fn delete_file(&self, path: &str, if_match: Option<&str>) -> Result<()> {
        let location = Self::parse_path(path)?;
        let _lock = self.lock_path(&location).await;

        let deleted = self
            .bounded("delete", &location, async {
                let current = Self::fetch(self.candidate.as_ref(), &location)
                    .await?
                    .map(|bytes| ETag::from_content(&bytes));
                if !precondition_holds(current.as_ref(), if_match) {
                    return Err(self.conflict(&location));
                }
                if current.is_none() {
                    return Ok(false);
                }

                match self.candidate.delete(&location).await {
                    Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(true),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        if deleted {
            debug!("Deleted {location} in version {}", self.version_id);
            self.after_change(&location).await;
        }
        Ok(())
    }

    async fn rollback_file(&self, path: &str) -> Result<()> {
        let location = Self::parse_path(path)?;
        let _lock = self.lock_path(&location).await;

        self.bounded("rollback", &location, async {
            let original = Self::fetch(self.master.as_ref(), &location)
                .await?
                .ok_or_else(|| self.file_not_found(&location))?;
            self.candidate.put(&location, original).await?;
            Ok(())
        })
        .await?;

        debug!(
            "Rolled back {location} in version {} to master",
            self.version_id
        );
        self.after_change(&location).await;
        Ok(())
    }

    async fn is_file_exists(&self, path: &str) -> Result<bool> {
        let location = Self::parse_path(path)?;

        self.bounded("head", &location, async {
            match self.candidate.head(&location).await {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_file_list(&self, folder: &str) -> Result<Vec<FileEntry>> {
        let trimmed = folder.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            None
        } else {
            Some(Self::parse_path(trimmed)?)
        };
        let display = prefix.clone().unwrap_or_default();

        let (master_objects, candidate_objects) = self
            .bounded("list", &display, async {
                futures::try_join!(
                    Self::list(self.master.as_ref(), prefix.as_ref()),
                    Self::list(self.candidate.as_ref(), prefix.as_ref()),
                )
            })
            .await?;

        // path -> (size in master, size in candidate)
        let mut sizes: BTreeMap<Path, (Option<usize>, Option<usize>)> = BTreeMap::new();
        for meta in master_objects {
            sizes.entry(meta.location).or_default().0 = Some(meta.size);
        }
        for meta in candidate_objects {
            sizes.entry(meta.location).or_default().1 = Some(meta.size);
        }

        let statuses = self
            .bounded(
                "list",
                &display,
                stream::iter(sizes)
                    .map(|(location, (master, candidate))| {
                        self.classify(location, master, candidate)
                    })
                    .buffered(MAX_CONCURRENT_COMPARISONS)
                    .try_collect::<Vec<_>>(),
            )
            .await?;

        let conflicts = self.cache.get_conflicts_cache(&self.version_id).await;

        Ok(statuses
            .into_iter()
            .map(|(location, status)| {
                let path = location.to_string();
                FileEntry {
                    name: logical_name(&location),
                    conflicted: conflicts
                        .as_ref()
                        .map_or(false, |paths| paths.contains(&path)),
                    path,
                    status,
                }
            })
            .collect())
    }
}
