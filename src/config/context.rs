use std::sync::Arc;

use tracing::info;

use crate::backend::{self, ChangeManagementBackend, ConfiguredWorkingCopies};
use crate::cache::CacheStore;
use crate::catalog::mapper::CatalogMapper;
use crate::catalog::provider::SchemaCatalogProvider;
use crate::data_types::{ComponentKind, VersionId};
use crate::registry::{
    ComponentLease, DefaultComponentFactory, RegistryError, VersionWorkspaceRegistry,
};
use crate::repository::VersionedFileRepository;

use super::schema;

/// Everything the callers of this crate (e.g. a REST layer) need, wired
/// together from one configuration.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub config: schema::WorkspaceConfig,
    pub registry: Arc<VersionWorkspaceRegistry>,
    pub catalogs: SchemaCatalogProvider,
    pub cache: Arc<CacheStore>,
    pub change_management: Arc<dyn ChangeManagementBackend>,
}

impl Workspace {
    pub async fn files(
        &self,
        version_id: &VersionId,
    ) -> Result<ComponentLease<Arc<dyn VersionedFileRepository>>, RegistryError> {
        self.registry.get(version_id).await
    }

    /// Pull the change-management backend's latest conflict report into the cache
    pub async fn refresh_conflicts(&self, version_id: &VersionId) -> backend::Result<usize> {
        let paths = self
            .cache
            .refresh_conflicts_cache(self.change_management.as_ref(), version_id)
            .await?;
        Ok(paths.len())
    }

    /// The version was declined or submitted: release all of its resources
    pub async fn release_version(&self, version_id: &VersionId) -> Vec<ComponentKind> {
        self.registry.evict_version(version_id).await
    }
}

pub fn build_workspace(
    cfg: schema::WorkspaceConfig,
    change_management: Arc<dyn ChangeManagementBackend>,
) -> backend::Result<Workspace> {
    let cache = Arc::new(CacheStore::new(
        cfg.cache.catalog_ttl(),
        cfg.cache.conflicts_ttl(),
    ));

    let working_copies = ConfiguredWorkingCopies::build_provider(&cfg.working_copy)?;
    let mapper = CatalogMapper::new(&cfg.catalog.subject_table, &cfg.catalog.view_suffix);

    let factory = DefaultComponentFactory::new(
        working_copies,
        cfg.database.clone(),
        cache.clone(),
        mapper,
    )
    .with_table_definition_paths(cfg.catalog.table_definition_paths.clone())
    .with_operation_timeout(cfg.misc.operation_timeout());

    let registry = Arc::new(
        VersionWorkspaceRegistry::new(Arc::new(factory), cache.clone())
            .with_creation_timeout(cfg.misc.component_creation_timeout()),
    );

    let catalogs =
        SchemaCatalogProvider::new(registry.clone(), cache.clone(), change_management.clone());

    info!(
        "Workspace ready: working copies {:?}, subject table {:?}",
        cfg.working_copy, cfg.catalog.subject_table
    );

    Ok(Workspace {
        config: cfg,
        registry,
        catalogs,
        cache,
        change_management,
    })
}
