use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use object_store::ObjectStore;
use tracing::debug;
use working_copy_factory::{
    build_in_memory_working_copy, validate_version_segment, WorkingCopyConfig,
};

use crate::data_types::VersionId;

use super::{Error, Result};

/// Supplies the checked-out repository content of a version as an object store.
///
/// The VCS backend clones/pulls the branch; a provider only opens what's there.
#[async_trait]
pub trait WorkingCopyProvider: Send + Sync + Debug {
    async fn checkout(&self, version_id: &VersionId) -> Result<Arc<dyn ObjectStore>>;
}

fn unavailable(version_id: &VersionId, source: object_store::Error) -> Error {
    Error::WorkingCopyUnavailable {
        version: version_id.clone(),
        source,
    }
}

/// Working copies laid out by the configured `working_copy_factory` backend
#[derive(Debug)]
pub struct ConfiguredWorkingCopies {
    config: WorkingCopyConfig,
}

impl ConfiguredWorkingCopies {
    pub fn new(config: WorkingCopyConfig) -> Self {
        Self { config }
    }

    pub fn build_provider(config: &WorkingCopyConfig) -> Result<Arc<dyn WorkingCopyProvider>> {
        match config {
            WorkingCopyConfig::Local(_) => Ok(Arc::new(Self::new(config.clone()))),
            // A fresh in-memory store per checkout would lose every write, so keep them around
            WorkingCopyConfig::Memory => {
                let copies = InMemoryWorkingCopies::default();
                copies
                    .add_version(VersionId::master())
                    .map_err(|e| unavailable(&VersionId::master(), e))?;
                Ok(Arc::new(copies))
            }
        }
    }
}

#[async_trait]
impl WorkingCopyProvider for ConfiguredWorkingCopies {
    async fn checkout(&self, version_id: &VersionId) -> Result<Arc<dyn ObjectStore>> {
        debug!("Checking out working copy of version {version_id}");
        self.config
            .build_working_copy(version_id.as_str())
            .map_err(|e| unavailable(version_id, e))
    }
}

/// In-process working copies; versions exist only once added
#[derive(Debug, Default)]
pub struct InMemoryWorkingCopies {
    stores: DashMap<VersionId, Arc<dyn ObjectStore>>,
}

impl InMemoryWorkingCopies {
    pub fn add_version(
        &self,
        version_id: VersionId,
    ) -> Result<Arc<dyn ObjectStore>, object_store::Error> {
        validate_version_segment(version_id.as_str())?;

        let store = self
            .stores
            .entry(version_id)
            .or_try_insert_with(build_in_memory_working_copy)?;
        Ok(store.value().clone())
    }

    pub fn remove_version(&self, version_id: &VersionId) {
        self.stores.remove(version_id);
    }
}

#[async_trait]
impl WorkingCopyProvider for InMemoryWorkingCopies {
    async fn checkout(&self, version_id: &VersionId) -> Result<Arc<dyn ObjectStore>> {
        self.stores
            .get(version_id)
            .map(|store| store.value().clone())
            .ok_or_else(|| {
                unavailable(
                    version_id,
                    object_store::Error::NotFound {
                        path: version_id.to_string(),
                        source: "Version has no in-memory working copy".into(),
                    },
                )
            })
    }
}
