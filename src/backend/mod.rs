//! Interfaces of the systems this crate depends on but doesn't own: the
//! change-management backend that tracks version-candidates and the VCS
//! backend that materializes their working copies.
mod change_management;
mod working_copy;

pub use change_management::{CandidateInfo, ChangeManagementBackend, InMemoryChangeManagement};
pub use working_copy::{ConfiguredWorkingCopies, InMemoryWorkingCopies, WorkingCopyProvider};

use crate::data_types::VersionId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Version {version} is unknown to the change-management backend")]
    UnknownVersion { version: VersionId },

    #[error("No working copy for version {version}: {source}")]
    WorkingCopyUnavailable {
        version: VersionId,
        source: object_store::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
