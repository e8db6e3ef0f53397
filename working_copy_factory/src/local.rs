use object_store::{local::LocalFileSystem, ObjectStore};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct LocalConfig {
    /// Directory holding one checkout per version, e.g. `<data_dir>/master`, `<data_dir>/17`
    pub data_dir: String,
}

impl LocalConfig {
    pub fn version_dir(&self, version: &str) -> PathBuf {
        PathBuf::from(&self.data_dir).join(version)
    }

    pub fn build_local_working_copy(
        &self,
        version: &str,
    ) -> Result<Arc<dyn ObjectStore>, object_store::Error> {
        let dir = self.version_dir(version);

        // The checkout is produced by the VCS backend; never create it here
        if !dir.is_dir() {
            return Err(object_store::Error::NotFound {
                path: dir.display().to_string(),
                source: "Working copy directory does not exist".into(),
            });
        }

        debug!("Opening working copy for version {version} at {}", dir.display());
        let store = LocalFileSystem::new_with_prefix(dir)?;
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_build_local_working_copy_existing_version() {
        let temp_dir = tempdir().expect("Failed to create temporary directory");
        std::fs::create_dir(temp_dir.path().join("master")).unwrap();

        let config = LocalConfig {
            data_dir: temp_dir.path().to_string_lossy().to_string(),
        };

        let result = config.build_local_working_copy("master");
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[test]
    fn test_build_local_working_copy_missing_version() {
        let temp_dir = tempdir().expect("Failed to create temporary directory");

        let config = LocalConfig {
            data_dir: temp_dir.path().to_string_lossy().to_string(),
        };

        let result = config.build_local_working_copy("17");
        assert!(
            matches!(result, Err(object_store::Error::NotFound { .. })),
            "Expected NotFound for a missing checkout"
        );
    }
}
