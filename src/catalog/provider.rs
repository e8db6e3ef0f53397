use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::backend::ChangeManagementBackend;
use crate::cache::CacheStore;
use crate::data_types::VersionId;
use crate::database::DatabaseConnection;
use crate::registry::{RegistryError, SchemaCatalog, VersionWorkspaceRegistry};

use super::{Catalog, CatalogError, CatalogResult, TableInfo};

/// Cache-or-fetch access to the table catalogs of versions.
///
/// A candidate whose database hasn't been built yet behaves as if it had no
/// tables, as long as the master database is reachable.
#[derive(Debug, Clone)]
pub struct SchemaCatalogProvider {
    registry: Arc<VersionWorkspaceRegistry>,
    cache: Arc<CacheStore>,
    change_management: Arc<dyn ChangeManagementBackend>,
}

impl SchemaCatalogProvider {
    pub fn new(
        registry: Arc<VersionWorkspaceRegistry>,
        cache: Arc<CacheStore>,
        change_management: Arc<dyn ChangeManagementBackend>,
    ) -> Self {
        Self {
            registry,
            cache,
            change_management,
        }
    }

    /// Only a `refresh_cache` fetch is trusted to be written to the cache;
    /// without it a cached catalog is returned as is.
    pub async fn get_catalog(
        &self,
        version_id: &VersionId,
        refresh_cache: bool,
    ) -> CatalogResult<Arc<Catalog>> {
        Ok(self
            .load(version_id, refresh_cache)
            .await?
            .unwrap_or_else(|| Arc::new(Catalog::empty())))
    }

    /// The table with this exact name. Empty if the version has no database yet.
    pub async fn get_table(
        &self,
        version_id: &VersionId,
        name: &str,
        refresh_cache: bool,
    ) -> CatalogResult<Vec<TableInfo>> {
        let Some(catalog) = self.load(version_id, refresh_cache).await? else {
            return Ok(vec![]);
        };

        let tables: Vec<TableInfo> = catalog.tables_named(name).cloned().collect();
        match tables.len() {
            0 => Err(CatalogError::TableNotFound {
                version: version_id.clone(),
                name: name.to_string(),
            }),
            1 => Ok(tables),
            n => {
                error!("Catalog of version {version_id} has {n} tables named {name:?}");
                Err(CatalogError::InvariantViolation {
                    reason: format!("{n} tables named {name:?} in version {version_id}"),
                })
            }
        }
    }

    pub async fn get_table_names(
        &self,
        version_id: &VersionId,
        refresh_cache: bool,
    ) -> CatalogResult<Vec<String>> {
        let catalog = self.get_catalog(version_id, refresh_cache).await?;
        Ok(catalog
            .table_names()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// `None` means the version's database doesn't exist yet
    async fn load(
        &self,
        version_id: &VersionId,
        refresh_cache: bool,
    ) -> CatalogResult<Option<Arc<Catalog>>> {
        if !refresh_cache {
            if let Some(catalog) = self.cache.get_catalog_cache(version_id).await {
                debug!("Catalog cache hit for version {version_id}");
                return Ok(Some(catalog));
            }
        }

        let generation = self.cache.catalog_generation(version_id).await;
        let schema_catalog = match self.registry.get::<Arc<SchemaCatalog>>(version_id).await {
            Ok(lease) => lease,
            Err(e) => return self.fall_back_to_master(version_id, e).await.map(|_| None),
        };

        let catalog = Arc::new(schema_catalog.load().await?);
        if refresh_cache {
            self.cache
                .update_catalog_cache_if_unchanged(version_id.clone(), generation, catalog.clone())
                .await;
        }

        Ok(Some(catalog))
    }

    async fn fall_back_to_master(
        &self,
        version_id: &VersionId,
        cause: RegistryError,
    ) -> CatalogResult<()> {
        let unreachable = |reason: String| CatalogError::DatabaseConnection {
            version: version_id.clone(),
            reason,
        };

        if version_id.is_master() {
            return Err(unreachable(cause.to_string()));
        }

        match self.change_management.get_candidate(version_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(CatalogError::VersionNotFound {
                    version: version_id.clone(),
                })
            }
            Err(e) => warn!("Couldn't look up candidate {version_id}, assuming it exists: {e}"),
        }

        info!("Version {version_id} has no database yet ({cause}), checking the master database");

        let master = self
            .registry
            .get::<Arc<dyn DatabaseConnection>>(&VersionId::master())
            .await
            .map_err(|e| unreachable(format!("{cause}; {e}")))?;
        master
            .ping()
            .await
            .map_err(|e| unreachable(format!("{cause}; {e}")))?;

        Ok(())
    }
}
