use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use working_copy_factory::WorkingCopyConfig;

use crate::catalog::{DEFAULT_SUBJECT_TABLE, DEFAULT_VIEW_SUFFIX};
use crate::database::VERSION_PLACEHOLDER;
use crate::repository::default::DEFAULT_TABLE_DEFINITION_PATH;

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct WorkspaceConfig {
    pub working_copy: WorkingCopyConfig,
    pub database: Database,
    #[serde(default)]
    pub catalog: Catalog,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub misc: Misc,
}

/// Where the per-version databases live; `{version}` in the DSN template is
/// replaced with the version id
#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Database {
    Postgres(Postgres),
    Sqlite(Sqlite),
}

impl Database {
    pub fn dsn_template(&self) -> &str {
        match self {
            Database::Postgres(Postgres { dsn_template, .. })
            | Database::Sqlite(Sqlite { dsn_template, .. }) => dsn_template,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Postgres {
    pub dsn_template: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Sqlite {
    pub dsn_template: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    4
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Catalog {
    pub subject_table: String,
    pub view_suffix: String,
    /// Path prefixes of the files that define a version's tables
    pub table_definition_paths: Vec<String>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            subject_table: DEFAULT_SUBJECT_TABLE.to_string(),
            view_suffix: DEFAULT_VIEW_SUFFIX.to_string(),
            table_definition_paths: vec![DEFAULT_TABLE_DEFINITION_PATH.to_string()],
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Cache {
    pub catalog_ttl_secs: u64,
    pub conflicts_ttl_secs: u64,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            catalog_ttl_secs: 60 * 60,
            conflicts_ttl_secs: 10 * 60,
        }
    }
}

impl Cache {
    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_secs)
    }

    pub fn conflicts_ttl(&self) -> Duration {
        Duration::from_secs(self.conflicts_ttl_secs)
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Misc {
    pub component_creation_timeout_secs: u64,
    /// File operations are unbounded when unset
    pub operation_timeout_secs: Option<u64>,
}

impl Default for Misc {
    fn default() -> Self {
        Self {
            component_creation_timeout_secs: 30,
            operation_timeout_secs: None,
        }
    }
}

impl Misc {
    pub fn component_creation_timeout(&self) -> Duration {
        Duration::from_secs(self.component_creation_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

pub fn validate_config(config: WorkspaceConfig) -> Result<WorkspaceConfig, ConfigError> {
    if !config.database.dsn_template().contains(VERSION_PLACEHOLDER) {
        return Err(ConfigError::Message(format!(
            "The database DSN template must contain {VERSION_PLACEHOLDER}, \
            otherwise all versions would share one database"
        )));
    }

    if config.catalog.view_suffix.is_empty() {
        return Err(ConfigError::Message(
            "catalog.view_suffix can't be empty".to_string(),
        ));
    }

    if config.misc.component_creation_timeout_secs == 0 {
        return Err(ConfigError::Message(
            "misc.component_creation_timeout_secs must be positive".to_string(),
        ));
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let path = path
        .to_str()
        .ok_or_else(|| ConfigError::Message(format!("Invalid config path {path:?}")))?;
    let config = Config::builder().add_source(File::with_name(path));

    config.build()?.try_deserialize().and_then(validate_config)
}

// Load a config from a string (to test our structs are defined correctly)
pub fn load_config_from_string(
    config_str: &str,
    skip_validation: bool,
) -> Result<WorkspaceConfig, ConfigError> {
    let config = Config::builder().add_source(File::from_str(config_str, FileFormat::Toml));

    if skip_validation {
        config.build()?.try_deserialize()
    } else {
        config.build()?.try_deserialize().and_then(validate_config)
    }
}
