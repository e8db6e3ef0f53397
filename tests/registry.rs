use std::sync::Arc;

use futures::future::join_all;

use regulation_workspace::data_types::{ComponentKind, VersionId};
use regulation_workspace::database::DatabaseConnection;

use crate::fixtures::{test_workspace, CANDIDATE};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access_shares_one_instance() {
    let test = test_workspace(&["master", CANDIDATE]).await;
    let registry = test.workspace.registry.clone();

    let results = join_all((0..16).map(|_| {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry
                .get::<Arc<dyn DatabaseConnection>>(&VersionId::from(CANDIDATE))
                .await
                .map(|lease| lease.component().clone())
        })
    }))
    .await;

    let databases: Vec<_> = results.into_iter().map(|r| r.unwrap().unwrap()).collect();
    assert!(databases.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn test_release_version() {
    let test = test_workspace(&["master", CANDIDATE]).await;
    let candidate = test.candidate();

    test.workspace
        .catalogs
        .get_catalog(&candidate, true)
        .await
        .unwrap();
    let files = test.workspace.files(&candidate).await.unwrap();
    files.read_file("forms/order.json").await.unwrap();
    drop(files);

    let released = test.workspace.release_version(&candidate).await;
    assert_eq!(
        released,
        vec![
            ComponentKind::FileRepository,
            ComponentKind::Database,
            ComponentKind::SchemaCatalog
        ]
    );
    assert!(test
        .workspace
        .cache
        .get_catalog_cache(&candidate)
        .await
        .is_none());
    assert!(!test
        .workspace
        .registry
        .contains(&candidate, ComponentKind::Database));

    // Master is untouched
    assert!(test.workspace.release_version(&VersionId::master()).await.is_empty());
}
