//! Builds the object stores that back per-version working copies of the
//! regulation repository. Each version (master or a candidate) is a separate
//! directory tree; the VCS backend is responsible for cloning/pulling it,
//! this crate only opens an existing checkout.
pub mod local;
mod memory;

use local::LocalConfig;

use object_store::ObjectStore;
use std::sync::Arc;

use serde::Deserialize;

pub use memory::build_in_memory_working_copy;

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkingCopyConfig {
    Local(LocalConfig),
    Memory,
}

impl WorkingCopyConfig {
    /// Open the working copy for a single version. For in-memory configs this
    /// always produces a fresh, empty store: callers that need the contents to
    /// outlive a single checkout must hold on to the store themselves.
    pub fn build_working_copy(
        &self,
        version: &str,
    ) -> Result<Arc<dyn ObjectStore>, object_store::Error> {
        validate_version_segment(version)?;

        match self {
            WorkingCopyConfig::Memory => build_in_memory_working_copy(),
            WorkingCopyConfig::Local(local_config) => {
                local_config.build_local_working_copy(version)
            }
        }
    }
}

/// Version ids end up as a directory name, so they must be a single, plain path segment.
pub fn validate_version_segment(version: &str) -> Result<(), object_store::Error> {
    let invalid = version.is_empty()
        || version == "."
        || version == ".."
        || version.contains(&['/', '\\'][..]);

    if invalid {
        return Err(object_store::Error::Generic {
            store: "working_copy_factory",
            source: format!("Invalid version identifier: {version:?}").into(),
        });
    }

    Ok(())
}
