use std::fmt::Debug;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::data_types::VersionId;

use super::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateInfo {
    pub version_id: VersionId,
    pub name: String,
}

/// The service tracking version-candidates (author, mergeability, review).
///
/// We only ask it whether a candidate exists and which of its files
/// conflict with the master line.
#[async_trait]
pub trait ChangeManagementBackend: Send + Sync + Debug {
    async fn get_candidate(&self, version_id: &VersionId) -> Result<Option<CandidateInfo>>;

    /// Paths changed both in the candidate and, independently, on master
    async fn get_conflicted_paths(&self, version_id: &VersionId) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct InMemoryChangeManagement {
    candidates: DashMap<VersionId, CandidateInfo>,
    conflicts: DashMap<VersionId, Vec<String>>,
}

impl InMemoryChangeManagement {
    pub fn add_candidate(&self, version_id: VersionId, name: &str) {
        self.candidates.insert(
            version_id.clone(),
            CandidateInfo {
                version_id,
                name: name.to_string(),
            },
        );
    }

    pub fn remove_candidate(&self, version_id: &VersionId) {
        self.candidates.remove(version_id);
        self.conflicts.remove(version_id);
    }

    pub fn set_conflicted_paths(&self, version_id: &VersionId, paths: Vec<String>) {
        self.conflicts.insert(version_id.clone(), paths);
    }
}

#[async_trait]
impl ChangeManagementBackend for InMemoryChangeManagement {
    async fn get_candidate(&self, version_id: &VersionId) -> Result<Option<CandidateInfo>> {
        Ok(self.candidates.get(version_id).map(|c| c.value().clone()))
    }

    async fn get_conflicted_paths(&self, version_id: &VersionId) -> Result<Vec<String>> {
        if version_id.is_master() {
            return Ok(vec![]);
        }
        if !self.candidates.contains_key(version_id) {
            return Err(Error::UnknownVersion {
                version: version_id.clone(),
            });
        }

        Ok(self
            .conflicts
            .get(version_id)
            .map(|paths| paths.value().clone())
            .unwrap_or_default())
    }
}
