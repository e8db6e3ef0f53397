use std::fmt::Debug;

use async_trait::async_trait;
use serde::Serialize;

use crate::data_types::VersionId;

use super::etag::ETag;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, strum_macros::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum FileStatus {
    New,
    Changed,
    Deleted,
    Unchanged,
}

impl FileStatus {
    /// Three-way classification of one path: (in master, in candidate, same bytes)
    pub fn classify(in_master: bool, in_candidate: bool, identical: bool) -> Option<Self> {
        match (in_master, in_candidate) {
            (false, false) => None,
            (false, true) => Some(FileStatus::New),
            (true, false) => Some(FileStatus::Deleted),
            (true, true) if identical => Some(FileStatus::Unchanged),
            (true, true) => Some(FileStatus::Changed),
        }
    }
}

/// One file of a version as seen against master. Computed on every listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub path: String,
    /// File name without its extension
    pub name: String,
    pub status: FileStatus,
    pub conflicted: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("File {path:?} doesn't exist in version {version}")]
    FileNotFound { version: VersionId, path: String },

    // Always reported as a conflict, never as a failed precondition
    #[error("File {path:?} in version {version} was changed concurrently")]
    Conflict { version: VersionId, path: String },

    #[error("Invalid file path {path:?}: {source}")]
    InvalidPath {
        path: String,
        source: object_store::path::Error,
    },

    #[error("File repository invariant violated: {reason}")]
    InvariantViolation { reason: String },

    #[error("Timed out during {operation} of {path:?}")]
    Timeout {
        operation: &'static str,
        path: String,
    },

    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// File access scoped to one version's working copy, with master as the
/// reference line for rollbacks and status.
#[async_trait]
pub trait VersionedFileRepository: Send + Sync + Debug {
    fn version_id(&self) -> &VersionId;

    async fn read_file(&self, path: &str) -> Result<String>;

    async fn read_file_with_etag(&self, path: &str) -> Result<(String, ETag)>;

    /// Create or overwrite a file. A concrete `if_match` that isn't the
    /// file's current ETag fails with [`Error::Conflict`].
    async fn write_file(&self, path: &str, content: &str, if_match: Option<&str>)
        -> Result<ETag>;

    /// Deleting a file that's already gone is a no-op when no ETag is given
    async fn delete_file(&self, path: &str, if_match: Option<&str>) -> Result<()>;

    /// Replace the version's copy with master's bytes
    async fn rollback_file(&self, path: &str) -> Result<()>;

    async fn is_file_exists(&self, path: &str) -> Result<bool>;

    /// Direct children of `folder` present in this version and/or master
    async fn get_file_list(&self, folder: &str) -> Result<Vec<FileEntry>>;
}

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use object_store::{path::Path, ObjectStore};

    use super::*;

    pub const TABLES_PATH: &str = "data-model/tables.xml";

    #[test]
    fn test_classify() {
        assert_eq!(FileStatus::classify(false, false, false), None);
        assert_eq!(FileStatus::classify(false, true, false), Some(FileStatus::New));
        assert_eq!(
            FileStatus::classify(true, false, false),
            Some(FileStatus::Deleted)
        );
        assert_eq!(
            FileStatus::classify(true, true, true),
            Some(FileStatus::Unchanged)
        );
        assert_eq!(
            FileStatus::classify(true, true, false),
            Some(FileStatus::Changed)
        );
    }

    async fn put(store: &Arc<dyn ObjectStore>, path: &str, content: &str) {
        store
            .put(&Path::from(path), Bytes::from(content.to_string()))
            .await
            .unwrap();
    }

    /// Exercise any candidate repository whose master line is `master`.
    /// The candidate's working copy is expected to start out empty.
    pub async fn run_generic_repository_tests(
        repository: Arc<dyn VersionedFileRepository>,
        master: Arc<dyn ObjectStore>,
    ) {
        put(&master, "forms/a.json", r#"{"name":"a"}"#).await;
        put(&master, TABLES_PATH, "<tables/>").await;

        test_read_missing(repository.clone()).await;
        test_write_read_with_etag(repository.clone()).await;
        test_stale_etag_conflicts(repository.clone()).await;
        test_delete(repository.clone()).await;
        test_rollback(repository.clone()).await;
        test_invalid_path(repository).await;
    }

    async fn test_read_missing(repository: Arc<dyn VersionedFileRepository>) {
        assert!(matches!(
            repository.read_file("forms/missing.json").await.unwrap_err(),
            Error::FileNotFound { .. }
        ));
        assert!(!repository.is_file_exists("forms/missing.json").await.unwrap());
    }

    async fn test_write_read_with_etag(repository: Arc<dyn VersionedFileRepository>) {
        let etag = repository
            .write_file("forms/b.json", r#"{"name":"b"}"#, None)
            .await
            .unwrap();
        assert_eq!(etag, ETag::from_content(br#"{"name":"b"}"#));

        let (content, read_etag) = repository.read_file_with_etag("forms/b.json").await.unwrap();
        assert_eq!(content, r#"{"name":"b"}"#);
        assert_eq!(read_etag, etag);
        assert!(repository.is_file_exists("forms/b.json").await.unwrap());

        // Writing with the current tag succeeds and yields the new content's tag
        let new_etag = repository
            .write_file("forms/b.json", r#"{"name":"b2"}"#, Some(etag.as_str()))
            .await
            .unwrap();
        assert_eq!(new_etag, ETag::from_content(br#"{"name":"b2"}"#));

        // Wildcard overwrites unconditionally
        repository
            .write_file("forms/b.json", r#"{"name":"b3"}"#, Some("*"))
            .await
            .unwrap();
        assert_eq!(
            repository.read_file("forms/b.json").await.unwrap(),
            r#"{"name":"b3"}"#
        );
    }

    async fn test_stale_etag_conflicts(repository: Arc<dyn VersionedFileRepository>) {
        let stale = repository
            .write_file("forms/c.json", "v1", None)
            .await
            .unwrap();
        repository
            .write_file("forms/c.json", "v2", None)
            .await
            .unwrap();

        assert!(matches!(
            repository
                .write_file("forms/c.json", "v3", Some(stale.as_str()))
                .await
                .unwrap_err(),
            Error::Conflict { .. }
        ));
        assert!(matches!(
            repository
                .delete_file("forms/c.json", Some(stale.as_str()))
                .await
                .unwrap_err(),
            Error::Conflict { .. }
        ));
        // A concrete tag for a file that doesn't exist is stale too
        assert!(matches!(
            repository
                .write_file("forms/never.json", "v1", Some(stale.as_str()))
                .await
                .unwrap_err(),
            Error::Conflict { .. }
        ));

        assert_eq!(repository.read_file("forms/c.json").await.unwrap(), "v2");
    }

    async fn test_delete(repository: Arc<dyn VersionedFileRepository>) {
        let etag = repository
            .write_file("forms/d.json", "{}", None)
            .await
            .unwrap();
        repository
            .delete_file("forms/d.json", Some(etag.as_str()))
            .await
            .unwrap();
        assert!(!repository.is_file_exists("forms/d.json").await.unwrap());

        // Already gone
        repository.delete_file("forms/d.json", None).await.unwrap();
    }

    async fn test_rollback(repository: Arc<dyn VersionedFileRepository>) {
        repository
            .write_file(TABLES_PATH, "<tables><table name=\"x\"/></tables>", None)
            .await
            .unwrap();
        repository.rollback_file(TABLES_PATH).await.unwrap();
        assert_eq!(
            repository.read_file(TABLES_PATH).await.unwrap(),
            "<tables/>"
        );

        assert!(matches!(
            repository
                .rollback_file("forms/only-in-candidate.json")
                .await
                .unwrap_err(),
            Error::FileNotFound { .. }
        ));
    }

    async fn test_invalid_path(repository: Arc<dyn VersionedFileRepository>) {
        assert!(matches!(
            repository.read_file("forms/../secrets").await.unwrap_err(),
            Error::InvalidPath { .. }
        ));
    }
}
