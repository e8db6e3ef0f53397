use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{self, WorkingCopyProvider};
use crate::cache::CacheStore;
use crate::catalog::mapper::CatalogMapper;
use crate::config::schema;
use crate::data_types::VersionId;
use crate::database::{self, DatabaseConnection};
use crate::repository::{ObjectStoreFileRepository, VersionedFileRepository};

/// Materializes the resources behind workspace components. Called by the
/// registry at most once per (version, kind) until that version is evicted.
#[async_trait]
pub trait ComponentFactory: Send + Sync + Debug {
    async fn create_file_repository(
        &self,
        version_id: &VersionId,
    ) -> backend::Result<Arc<dyn VersionedFileRepository>>;

    async fn create_database(
        &self,
        version_id: &VersionId,
    ) -> database::Result<Arc<dyn DatabaseConnection>>;

    fn catalog_mapper(&self) -> &CatalogMapper;
}

#[derive(Debug)]
pub struct DefaultComponentFactory {
    working_copies: Arc<dyn WorkingCopyProvider>,
    database: schema::Database,
    cache: Arc<CacheStore>,
    mapper: CatalogMapper,
    table_definition_paths: Vec<String>,
    operation_timeout: Option<Duration>,
}

impl DefaultComponentFactory {
    pub fn new(
        working_copies: Arc<dyn WorkingCopyProvider>,
        database: schema::Database,
        cache: Arc<CacheStore>,
        mapper: CatalogMapper,
    ) -> Self {
        Self {
            working_copies,
            database,
            cache,
            mapper,
            table_definition_paths: vec![],
            operation_timeout: None,
        }
    }

    pub fn with_table_definition_paths(mut self, paths: Vec<String>) -> Self {
        self.table_definition_paths = paths;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

#[async_trait]
impl ComponentFactory for DefaultComponentFactory {
    async fn create_file_repository(
        &self,
        version_id: &VersionId,
    ) -> backend::Result<Arc<dyn VersionedFileRepository>> {
        let candidate = self.working_copies.checkout(version_id).await?;
        let master = if version_id.is_master() {
            candidate.clone()
        } else {
            self.working_copies.checkout(&VersionId::master()).await?
        };

        let mut repository = ObjectStoreFileRepository::new(
            version_id.clone(),
            candidate,
            master,
            self.cache.clone(),
        )
        .with_operation_timeout(self.operation_timeout);
        if !self.table_definition_paths.is_empty() {
            repository =
                repository.with_table_definition_paths(self.table_definition_paths.clone());
        }

        Ok(Arc::new(repository))
    }

    async fn create_database(
        &self,
        version_id: &VersionId,
    ) -> database::Result<Arc<dyn DatabaseConnection>> {
        database::connect(&self.database, version_id).await
    }

    fn catalog_mapper(&self) -> &CatalogMapper {
        &self.mapper
    }
}
