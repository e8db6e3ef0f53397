use std::sync::Arc;

use crate::catalog::mapper::CatalogMapper;
use crate::catalog::Catalog;
use crate::data_types::{ComponentKind, VersionId};
use crate::database::{self, DatabaseConnection};
use crate::repository::VersionedFileRepository;

/// A version's database seen through the catalog mapper
#[derive(Debug)]
pub struct SchemaCatalog {
    database: Arc<dyn DatabaseConnection>,
    mapper: CatalogMapper,
}

impl SchemaCatalog {
    pub fn new(database: Arc<dyn DatabaseConnection>, mapper: CatalogMapper) -> Self {
        Self { database, mapper }
    }

    pub fn version_id(&self) -> &VersionId {
        self.database.version_id()
    }

    /// Introspect the database and map it. Always a fresh snapshot.
    pub async fn load(&self) -> database::Result<Catalog> {
        let raw = self.database.introspect().await?;
        Ok(self.mapper.map(raw))
    }
}

#[derive(Clone, Debug)]
pub enum WorkspaceComponent {
    FileRepository(Arc<dyn VersionedFileRepository>),
    Database(Arc<dyn DatabaseConnection>),
    SchemaCatalog(Arc<SchemaCatalog>),
}

impl WorkspaceComponent {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::FileRepository(_) => ComponentKind::FileRepository,
            Self::Database(_) => ComponentKind::Database,
            Self::SchemaCatalog(_) => ComponentKind::SchemaCatalog,
        }
    }

    /// Release whatever OS-level resources the component owns
    pub(super) async fn close(&self) {
        match self {
            Self::Database(database) => database.close().await,
            // Shares the connection of the version's Database component
            Self::SchemaCatalog(_) => {}
            Self::FileRepository(_) => {}
        }
    }
}

/// Typed view of one [`WorkspaceComponent`] variant, for
/// [`super::VersionWorkspaceRegistry::get`].
pub trait Component: Clone + Send + Sync + Sized + 'static {
    const KIND: ComponentKind;

    fn from_component(component: WorkspaceComponent) -> Option<Self>;
}

impl Component for Arc<dyn VersionedFileRepository> {
    const KIND: ComponentKind = ComponentKind::FileRepository;

    fn from_component(component: WorkspaceComponent) -> Option<Self> {
        match component {
            WorkspaceComponent::FileRepository(repository) => Some(repository),
            _ => None,
        }
    }
}

impl Component for Arc<dyn DatabaseConnection> {
    const KIND: ComponentKind = ComponentKind::Database;

    fn from_component(component: WorkspaceComponent) -> Option<Self> {
        match component {
            WorkspaceComponent::Database(database) => Some(database),
            _ => None,
        }
    }
}

impl Component for Arc<SchemaCatalog> {
    const KIND: ComponentKind = ComponentKind::SchemaCatalog;

    fn from_component(component: WorkspaceComponent) -> Option<Self> {
        match component {
            WorkspaceComponent::SchemaCatalog(catalog) => Some(catalog),
            _ => None,
        }
    }
}
