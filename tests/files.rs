use rstest::rstest;

use regulation_workspace::data_types::{ComponentKind, VersionId};
use regulation_workspace::registry::RegistryError;
use regulation_workspace::repository::{ETag, Error, FileStatus};

use crate::fixtures::{test_workspace, CANDIDATE, TABLES_XML};

#[tokio::test]
async fn test_rollback_restores_master_bytes() {
    let test = test_workspace(&[]).await;
    let files = test.workspace.files(&test.candidate()).await.unwrap();

    let (_, etag) = files
        .read_file_with_etag("data-model/tables.xml")
        .await
        .unwrap();
    assert_eq!(etag, ETag::from_content(TABLES_XML.as_bytes()));

    files
        .write_file("data-model/tables.xml", "<tables/>", Some(etag.as_str()))
        .await
        .unwrap();
    let statuses = files.get_file_list("data-model").await.unwrap();
    assert_eq!(statuses[0].status, FileStatus::Changed);

    files.rollback_file("data-model/tables.xml").await.unwrap();

    let on_disk = std::fs::read(test.working_copy_path(CANDIDATE).join("data-model/tables.xml"))
        .unwrap();
    assert_eq!(on_disk, TABLES_XML.as_bytes());
    let statuses = files.get_file_list("data-model").await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, FileStatus::Unchanged);
}

#[tokio::test]
async fn test_file_list_against_master() {
    let test = test_workspace(&[]).await;
    let files = test.workspace.files(&test.candidate()).await.unwrap();

    files
        .write_file("forms/order.json", r#"{"title":"Purchase order"}"#, None)
        .await
        .unwrap();
    files.delete_file("forms/person.json", None).await.unwrap();
    files
        .write_file("forms/invoice.json", r#"{"title":"Invoice"}"#, None)
        .await
        .unwrap();

    test.change_management.set_conflicted_paths(
        &test.candidate(),
        vec!["forms/order.json".to_string()],
    );
    assert_eq!(
        test.workspace
            .refresh_conflicts(&test.candidate())
            .await
            .unwrap(),
        1
    );

    let entries = files.get_file_list("forms/").await.unwrap();
    let summary: Vec<_> = entries
        .iter()
        .map(|e| (e.name.as_str(), e.status, e.conflicted))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("invoice", FileStatus::New, false),
            ("order", FileStatus::Changed, true),
            ("person", FileStatus::Deleted, false),
        ]
    );

    // Master compares against itself
    let master = test.workspace.files(&VersionId::master()).await.unwrap();
    assert!(master
        .get_file_list("forms")
        .await
        .unwrap()
        .iter()
        .all(|e| e.status == FileStatus::Unchanged && !e.conflicted));
}

#[rstest]
#[case::no_tag(None, true)]
#[case::wildcard(Some("*"), true)]
#[case::current_tag(Some("current"), true)]
#[case::quoted_current_tag(Some("\"current\""), true)]
#[case::stale_tag(Some("0123abcd"), false)]
#[tokio::test]
async fn test_write_preconditions(#[case] if_match: Option<&str>, #[case] succeeds: bool) {
    let test = test_workspace(&[]).await;
    let files = test.workspace.files(&test.candidate()).await.unwrap();

    let (_, current) = files.read_file_with_etag("forms/person.json").await.unwrap();
    let if_match = if_match.map(|tag| tag.replace("current", current.as_str()));

    let result = files
        .write_file("forms/person.json", r#"{"title":"Human"}"#, if_match.as_deref())
        .await;

    if succeeds {
        assert_eq!(
            result.unwrap(),
            ETag::from_content(br#"{"title":"Human"}"#)
        );
    } else {
        assert!(matches!(result.unwrap_err(), Error::Conflict { .. }));
        assert_eq!(
            files.read_file("forms/person.json").await.unwrap(),
            r#"{"title":"Person"}"#
        );
    }
}

#[tokio::test]
async fn test_missing_files() {
    let test = test_workspace(&[]).await;
    let files = test.workspace.files(&test.candidate()).await.unwrap();

    assert!(matches!(
        files.read_file("forms/missing.json").await.unwrap_err(),
        Error::FileNotFound { .. }
    ));
    assert!(!files.is_file_exists("forms/missing.json").await.unwrap());
    files.delete_file("forms/missing.json", None).await.unwrap();

    files
        .write_file("forms/draft.json", "{}", None)
        .await
        .unwrap();
    assert!(matches!(
        files.rollback_file("forms/draft.json").await.unwrap_err(),
        Error::FileNotFound { .. }
    ));
}

#[tokio::test]
async fn test_missing_working_copy_is_an_error() {
    let test = test_workspace(&[]).await;

    assert!(matches!(
        test.workspace
            .files(&VersionId::from("18"))
            .await
            .unwrap_err(),
        RegistryError::ComponentCreation {
            kind: ComponentKind::FileRepository,
            ..
        }
    ));
}
