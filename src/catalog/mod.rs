use std::collections::BTreeMap;

use serde::Serialize;

use crate::data_types::VersionId;
use crate::database;
use crate::registry::RegistryError;

pub mod mapper;
pub mod provider;

pub const DEFAULT_SUBJECT_TABLE: &str = "subject";
pub const DEFAULT_VIEW_SUFFIX: &str = "_v";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    // Neither the candidate nor the master database could be reached
    #[error("No database reachable for version {version}: {reason}")]
    DatabaseConnection { version: VersionId, reason: String },

    #[error("Version {version} doesn't exist")]
    VersionNotFound { version: VersionId },

    #[error("Table {name:?} doesn't exist in version {version}")]
    TableNotFound { version: VersionId, name: String },

    #[error("Catalog invariant violated: {reason}")]
    InvariantViolation { reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Database(#[from] database::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Sorting {
    Asc,
    Desc,
    // No defined order; not the same as ascending
    None,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub description: Option<String>,
    pub data_type: String,
    pub default_value: Option<String>,
    pub not_null: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexColumn {
    pub name: String,
    pub sorting: Sorting,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<IndexColumn>,
}

/// Same shape as an index: a named, ordered list of columns
pub type UniqueConstraintInfo = IndexInfo;
pub type PrimaryKeyInfo = IndexInfo;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnPair {
    pub source_column: String,
    pub target_column: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ForeignKeyInfo {
    pub name: String,
    pub source_table: String,
    pub target_table: String,
    pub column_pairs: Vec<ColumnPair>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub description: Option<String>,
    /// The table has a foreign key to the configured subject table
    pub object_reference: bool,
    pub columns: BTreeMap<String, ColumnInfo>,
    pub primary_key: Option<PrimaryKeyInfo>,
    pub unique_constraints: BTreeMap<String, UniqueConstraintInfo>,
    pub indices: BTreeMap<String, IndexInfo>,
    pub foreign_keys: BTreeMap<String, ForeignKeyInfo>,
}

/// All tables of a single version's database, as one snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Catalog {
    pub tables: Vec<TableInfo>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// All tables with exactly this name (normally zero or one)
    pub fn tables_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a TableInfo> {
        self.tables.iter().filter(move |t| t.name == name)
    }
}
