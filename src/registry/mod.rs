//! Per-version workspace components, created lazily on first access and
//! torn down together when the version is declined or submitted.
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use moka::future::Cache;
use strum::IntoEnumIterator;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::data_types::{ComponentKind, VersionId};

mod component;
mod factory;

pub use component::{Component, SchemaCatalog, WorkspaceComponent};
pub use factory::{ComponentFactory, DefaultComponentFactory};

#[cfg(test)]
pub(crate) use factory::tests as factory_tests;

pub const DEFAULT_CREATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Couldn't create the {kind} component of version {version}: {reason}")]
    ComponentCreation {
        version: VersionId,
        kind: ComponentKind,
        reason: String,
    },

    #[error("Creating the {kind} component of version {version} timed out")]
    CreationTimeout {
        version: VersionId,
        kind: ComponentKind,
    },
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

/// Borrowed access to a component for the duration of one operation.
///
/// Eviction of the version waits until every outstanding lease is dropped,
/// and new leases of the version queue behind a pending eviction. While
/// holding a lease, get further components of the same version with
/// [`VersionWorkspaceRegistry::get_alongside`], not [`VersionWorkspaceRegistry::get`]:
/// the latter would wait for an eviction that waits for this lease.
#[derive(Debug)]
pub struct ComponentLease<C> {
    component: C,
    version_id: VersionId,
    gate: Arc<OwnedRwLockReadGuard<()>>,
}

impl<C> ComponentLease<C> {
    pub fn component(&self) -> &C {
        &self.component
    }

    pub fn version_id(&self) -> &VersionId {
        &self.version_id
    }
}

impl<C> Deref for ComponentLease<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.component
    }
}

#[derive(Debug)]
pub struct VersionWorkspaceRegistry {
    factory: Arc<dyn ComponentFactory>,
    components: Cache<(VersionId, ComponentKind), WorkspaceComponent>,
    // Read-held by leases, write-held by eviction
    gates: DashMap<VersionId, Arc<RwLock<()>>>,
    cache: Arc<CacheStore>,
    creation_timeout: Duration,
}

impl VersionWorkspaceRegistry {
    pub fn new(factory: Arc<dyn ComponentFactory>, cache: Arc<CacheStore>) -> Self {
        Self {
            factory,
            components: Cache::builder().build(),
            gates: DashMap::new(),
            cache,
            creation_timeout: DEFAULT_CREATION_TIMEOUT,
        }
    }

    pub fn with_creation_timeout(mut self, timeout: Duration) -> Self {
        self.creation_timeout = timeout;
        self
    }

    fn gate(&self, version_id: &VersionId) -> Arc<RwLock<()>> {
        self.gates.entry(version_id.clone()).or_default().clone()
    }

    /// Get the component of this kind for the version, creating it if it's
    /// the first request. Concurrent first requests share a single creation;
    /// a failed or timed out creation leaves nothing behind.
    pub async fn get_component(
        &self,
        version_id: &VersionId,
        kind: ComponentKind,
    ) -> Result<ComponentLease<WorkspaceComponent>> {
        let gate = Arc::new(self.gate(version_id).read_owned().await);
        let component = self.get_or_create(version_id, kind).await?;
        Ok(ComponentLease {
            component,
            version_id: version_id.clone(),
            gate,
        })
    }

    /// Typed version of [`Self::get_component`]:
    /// `registry.get::<Arc<dyn DatabaseConnection>>(&version)`
    pub async fn get<C: Component>(&self, version_id: &VersionId) -> Result<ComponentLease<C>> {
        let lease = self.get_component(version_id, C::KIND).await?;
        Self::downcast(lease)
    }

    /// Another component of the version `held` is for, sharing its place
    /// ahead of any eviction queued since
    pub async fn get_alongside<C: Component, D>(
        &self,
        held: &ComponentLease<D>,
    ) -> Result<ComponentLease<C>> {
        let component = self.get_or_create(&held.version_id, C::KIND).await?;
        Self::downcast(ComponentLease {
            component,
            version_id: held.version_id.clone(),
            gate: held.gate.clone(),
        })
    }

    fn downcast<C: Component>(
        lease: ComponentLease<WorkspaceComponent>,
    ) -> Result<ComponentLease<C>> {
        let ComponentLease {
            component,
            version_id,
            gate,
        } = lease;
        let kind = component.kind();
        let component = C::from_component(component).ok_or_else(|| {
            RegistryError::ComponentCreation {
                version: version_id.clone(),
                kind: C::KIND,
                reason: format!("registry holds a {kind} component under this key"),
            }
        })?;
        Ok(ComponentLease {
            component,
            version_id,
            gate,
        })
    }

    pub fn contains(&self, version_id: &VersionId, kind: ComponentKind) -> bool {
        self.components.contains_key(&(version_id.clone(), kind))
    }

    // Doesn't touch the gate: the caller already holds it
    fn get_or_create<'a>(
        &'a self,
        version_id: &'a VersionId,
        kind: ComponentKind,
    ) -> BoxFuture<'a, Result<WorkspaceComponent>> {
        async move {
            let init = async {
                match tokio::time::timeout(self.creation_timeout, self.create(version_id, kind))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            "Creating the {kind} component of version {version_id} timed out after {:?}",
                            self.creation_timeout
                        );
                        Err(RegistryError::CreationTimeout {
                            version: version_id.clone(),
                            kind,
                        })
                    }
                }
            };

            self.components
                .try_get_with((version_id.clone(), kind), init)
                .await
                .map_err(|e| (*e).clone())
        }
        .boxed()
    }

    async fn create(
        &self,
        version_id: &VersionId,
        kind: ComponentKind,
    ) -> Result<WorkspaceComponent> {
        info!("Creating the {kind} component of version {version_id}");

        let creation_error = |reason: String| {
            warn!("Couldn't create the {kind} component of version {version_id}: {reason}");
            RegistryError::ComponentCreation {
                version: version_id.clone(),
                kind,
                reason,
            }
        };

        let component = match kind {
            ComponentKind::FileRepository => WorkspaceComponent::FileRepository(
                self.factory
                    .create_file_repository(version_id)
                    .await
                    .map_err(|e| creation_error(e.to_string()))?,
            ),
            ComponentKind::Database => WorkspaceComponent::Database(
                self.factory
                    .create_database(version_id)
                    .await
                    .map_err(|e| creation_error(e.to_string()))?,
            ),
            ComponentKind::SchemaCatalog => {
                let database = match self.get_or_create(version_id, ComponentKind::Database).await? {
                    WorkspaceComponent::Database(database) => database,
                    other => {
                        return Err(creation_error(format!(
                            "expected a database component, found {}",
                            other.kind()
                        )))
                    }
                };
                WorkspaceComponent::SchemaCatalog(Arc::new(SchemaCatalog::new(
                    database,
                    self.factory.catalog_mapper().clone(),
                )))
            }
        };

        Ok(component)
    }

    /// Tear down everything the version owns once the in-flight operations
    /// against it finish. Returns the kinds that were alive.
    pub async fn evict_version(&self, version_id: &VersionId) -> Vec<ComponentKind> {
        let gate = self.gate(version_id);
        let drained = gate.clone().write_owned().await;
        drop(gate);

        let mut evicted = vec![];
        for kind in ComponentKind::iter() {
            if let Some(component) = self.components.remove(&(version_id.clone(), kind)).await {
                debug!("Closing the {kind} component of version {version_id}");
                component.close().await;
                evicted.push(kind);
            }
        }
        self.cache.invalidate_version(version_id).await;

        drop(drained);
        self.gates
            .remove_if(version_id, |_, gate| Arc::strong_count(gate) == 1);

        info!("Evicted version {version_id}: {evicted:?}");
        evicted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use futures::future::join_all;

    use super::factory::tests::StubFactory;
    use super::*;
    use crate::catalog::mapper::tests::{column, table};
    use crate::catalog::mapper::RawSchema;
    use crate::catalog::Catalog;
    use crate::database::DatabaseConnection;
    use crate::repository::VersionedFileRepository;

    fn schema() -> RawSchema {
        RawSchema {
            tables: vec![table("orders", vec![column("id", "integer")])],
        }
    }

    fn registry(factory: StubFactory) -> (Arc<VersionWorkspaceRegistry>, Arc<StubFactory>) {
        let factory = Arc::new(factory);
        let registry =
            VersionWorkspaceRegistry::new(factory.clone(), Arc::new(CacheStore::default()));
        (Arc::new(registry), factory)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_creates_once() {
        let (registry, factory) = registry(
            StubFactory::new(Arc::new(CacheStore::default()))
                .with_database("17", schema())
                .with_creation_delay(Duration::from_millis(50)),
        );
        let version = VersionId::from("17");

        let leases = join_all((0..16).map(|_| {
            let registry = registry.clone();
            let version = version.clone();
            tokio::spawn(async move {
                registry
                    .get::<Arc<dyn DatabaseConnection>>(&version)
                    .await
                    .map(|lease| lease.component().clone())
            })
        }))
        .await;

        let databases: Vec<_> = leases.into_iter().map(|r| r.unwrap().unwrap()).collect();
        assert_eq!(factory.databases_created.load(Ordering::SeqCst), 1);
        assert!(databases.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_failed_creation_is_retried() {
        let (registry, factory) = registry(StubFactory::new(Arc::new(CacheStore::default())));
        let version = VersionId::from("17");

        let error = registry
            .get_component(&version, ComponentKind::Database)
            .await
            .unwrap_err();
        assert!(matches!(error, RegistryError::ComponentCreation { .. }));
        assert!(!registry.contains(&version, ComponentKind::Database));

        // The candidate's build finished in the meantime
        factory.schemas.insert(version.clone(), schema());
        registry
            .get_component(&version, ComponentKind::Database)
            .await
            .unwrap();
        assert!(registry.contains(&version, ComponentKind::Database));
    }

    #[tokio::test]
    async fn test_timed_out_creation_leaves_no_entry() {
        let factory = Arc::new(
            StubFactory::new(Arc::new(CacheStore::default()))
                .with_database("17", schema())
                .with_creation_delay(Duration::from_millis(200)),
        );
        let registry = VersionWorkspaceRegistry::new(factory, Arc::new(CacheStore::default()))
            .with_creation_timeout(Duration::from_millis(20));
        let version = VersionId::from("17");

        assert!(matches!(
            registry
                .get_component(&version, ComponentKind::Database)
                .await
                .unwrap_err(),
            RegistryError::CreationTimeout { .. }
        ));
        assert!(!registry.contains(&version, ComponentKind::Database));
    }

    #[tokio::test]
    async fn test_schema_catalog_reuses_database() {
        let (registry, factory) = registry(
            StubFactory::new(Arc::new(CacheStore::default())).with_database("17", schema()),
        );
        let version = VersionId::from("17");

        let catalog = registry.get::<Arc<SchemaCatalog>>(&version).await.unwrap();
        assert_eq!(catalog.load().await.unwrap().table_names(), vec!["orders"]);
        assert!(registry.contains(&version, ComponentKind::Database));

        registry
            .get::<Arc<dyn DatabaseConnection>>(&version)
            .await
            .unwrap();
        assert_eq!(factory.databases_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_component_while_eviction_is_queued() {
        let (registry, _) = registry(
            StubFactory::new(Arc::new(CacheStore::default()))
                .with_database("17", schema())
                .with_working_copy("17"),
        );
        let version = VersionId::from("17");

        let files = registry
            .get::<Arc<dyn VersionedFileRepository>>(&version)
            .await
            .unwrap();

        let eviction = tokio::spawn({
            let registry = registry.clone();
            let version = version.clone();
            async move { registry.evict_version(&version).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!eviction.is_finished());

        let database = tokio::time::timeout(
            Duration::from_secs(1),
            registry.get_alongside::<Arc<dyn DatabaseConnection>, _>(&files),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(database.version_id(), &version);
        database.ping().await.unwrap();

        drop(files);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!eviction.is_finished());

        drop(database);
        assert_eq!(
            eviction.await.unwrap(),
            vec![ComponentKind::FileRepository, ComponentKind::Database]
        );
    }

    #[tokio::test]
    async fn test_file_repository_failure_propagates() {
        let (registry, _) = registry(StubFactory::new(Arc::new(CacheStore::default())));

        assert!(matches!(
            registry
                .get::<Arc<dyn VersionedFileRepository>>(&VersionId::from("17"))
                .await
                .unwrap_err(),
            RegistryError::ComponentCreation {
                kind: ComponentKind::FileRepository,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_eviction_waits_for_leases_and_closes() {
        let cache = Arc::new(CacheStore::default());
        let factory = Arc::new(
            StubFactory::new(cache.clone())
                .with_database("17", schema())
                .with_working_copy("17"),
        );
        let registry = Arc::new(VersionWorkspaceRegistry::new(factory.clone(), cache.clone()));
        let version = VersionId::from("17");

        cache
            .update_catalog_cache(version.clone(), Arc::new(Catalog::empty()))
            .await;
        registry
            .get::<Arc<dyn VersionedFileRepository>>(&version)
            .await
            .unwrap();
        let lease = registry.get::<Arc<SchemaCatalog>>(&version).await.unwrap();

        let eviction = tokio::spawn({
            let registry = registry.clone();
            let version = version.clone();
            async move { registry.evict_version(&version).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!eviction.is_finished());
        let database = factory.opened.get(&version).unwrap().clone();
        assert!(!database.closed.load(Ordering::SeqCst));

        // Still usable while leased
        lease.load().await.unwrap();
        drop(lease);

        let evicted = eviction.await.unwrap();
        assert_eq!(
            evicted,
            vec![
                ComponentKind::FileRepository,
                ComponentKind::Database,
                ComponentKind::SchemaCatalog
            ]
        );
        assert!(database.closed.load(Ordering::SeqCst));
        assert!(!registry.contains(&version, ComponentKind::Database));
        assert!(cache.get_catalog_cache(&version).await.is_none());
        assert!(registry.gates.is_empty());

        // A later request starts a fresh lifecycle
        registry
            .get_component(&version, ComponentKind::Database)
            .await
            .unwrap();
        assert_eq!(factory.databases_created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_versions_are_independent() {
        let (registry, _) = registry(
            StubFactory::new(Arc::new(CacheStore::default()))
                .with_database("17", schema())
                .with_database("18", schema()),
        );

        let _lease = registry
            .get_component(&VersionId::from("17"), ComponentKind::Database)
            .await
            .unwrap();
        registry
            .get_component(&VersionId::from("18"), ComponentKind::Database)
            .await
            .unwrap();

        // Evicting 18 doesn't wait for 17's lease
        let evicted = tokio::time::timeout(
            Duration::from_secs(1),
            registry.evict_version(&VersionId::from("18")),
        )
        .await
        .unwrap();
        assert_eq!(evicted, vec![ComponentKind::Database]);
        assert!(registry.contains(&VersionId::from("17"), ComponentKind::Database));
    }
}
