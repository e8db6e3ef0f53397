//! Pure transformation of a raw database introspection result into the
//! structured [`Catalog`] model.
//!
//! The raw model mirrors what a metadata crawler reports: remarks and default
//! values come with an explicit "is present" flag, sort sequences are a
//! three-valued enumeration, and foreign keys are a list of column
//! references. Database-specific introspectors (see [`crate::database`])
//! produce [`RawSchema`]; nothing here performs I/O.
use std::collections::BTreeMap;

use itertools::Itertools;
use tracing::debug;

use super::{
    Catalog, ColumnInfo, ColumnPair, ForeignKeyInfo, IndexColumn, IndexInfo, Sorting,
    TableInfo, DEFAULT_SUBJECT_TABLE, DEFAULT_VIEW_SUFFIX,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawSortSequence {
    Ascending,
    Descending,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    pub data_type: String,
    pub remarks: String,
    pub has_remarks: bool,
    pub default_value: String,
    pub has_default_value: bool,
    pub nullable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawIndexColumn {
    pub name: String,
    pub sort_sequence: RawSortSequence,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawIndex {
    pub name: String,
    pub columns: Vec<RawIndexColumn>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawColumnReference {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawForeignKey {
    pub name: String,
    pub column_references: Vec<RawColumnReference>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawTable {
    pub name: String,
    pub remarks: String,
    pub has_remarks: bool,
    pub columns: Vec<RawColumn>,
    pub primary_key: Option<RawIndex>,
    /// Named UNIQUE constraints (as opposed to unique indexes)
    pub unique_constraints: Vec<RawIndex>,
    pub indexes: Vec<RawIndex>,
    /// Foreign keys this table declares (outbound only)
    pub foreign_keys: Vec<RawForeignKey>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawSchema {
    pub tables: Vec<RawTable>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogMapper {
    subject_table: String,
    view_suffix: String,
}

impl Default for CatalogMapper {
    fn default() -> Self {
        Self::new(DEFAULT_SUBJECT_TABLE, DEFAULT_VIEW_SUFFIX)
    }
}

impl CatalogMapper {
    pub fn new(subject_table: impl Into<String>, view_suffix: impl Into<String>) -> Self {
        Self {
            subject_table: subject_table.into(),
            view_suffix: view_suffix.into(),
        }
    }

    pub fn subject_table(&self) -> &str {
        &self.subject_table
    }

    pub fn is_view(&self, table_name: &str) -> bool {
        !self.view_suffix.is_empty() && table_name.ends_with(&self.view_suffix)
    }

    pub fn map(&self, raw: RawSchema) -> Catalog {
        let tables = raw
            .tables
            .into_iter()
            .filter(|t| !self.is_view(&t.name))
            .map(|t| self.map_table(t))
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect_vec();

        debug!("Mapped {} tables into the catalog", tables.len());
        Catalog { tables }
    }

    fn map_table(&self, table: RawTable) -> TableInfo {
        let object_reference = table.foreign_keys.iter().any(|fk| {
            fk.column_references
                .iter()
                .any(|r| r.target_table == self.subject_table)
        });

        let columns = table
            .columns
            .into_iter()
            .map(|c| (c.name.clone(), map_column(c)))
            .collect::<BTreeMap<_, _>>();

        TableInfo {
            description: table.has_remarks.then_some(table.remarks),
            object_reference,
            columns,
            primary_key: table.primary_key.map(map_index),
            unique_constraints: by_name(table.unique_constraints.into_iter().map(map_index)),
            indices: by_name(table.indexes.into_iter().map(map_index)),
            foreign_keys: table
                .foreign_keys
                .into_iter()
                .map(|fk| map_foreign_key(&table.name, fk))
                .map(|fk| (fk.name.clone(), fk))
                .collect(),
            name: table.name,
        }
    }
}

fn by_name(indexes: impl Iterator<Item = IndexInfo>) -> BTreeMap<String, IndexInfo> {
    indexes.map(|i| (i.name.clone(), i)).collect()
}

fn map_column(column: RawColumn) -> ColumnInfo {
    ColumnInfo {
        name: column.name,
        description: column.has_remarks.then_some(column.remarks),
        data_type: column.data_type,
        default_value: column.has_default_value.then_some(column.default_value),
        not_null: !column.nullable,
    }
}

fn map_sorting(sort_sequence: RawSortSequence) -> Sorting {
    match sort_sequence {
        RawSortSequence::Ascending => Sorting::Asc,
        RawSortSequence::Descending => Sorting::Desc,
        RawSortSequence::Unknown => Sorting::None,
    }
}

fn map_index(index: RawIndex) -> IndexInfo {
    IndexInfo {
        name: index.name,
        columns: index
            .columns
            .into_iter()
            .map(|c| IndexColumn {
                name: c.name,
                sorting: map_sorting(c.sort_sequence),
            })
            .collect(),
    }
}

fn map_foreign_key(table_name: &str, fk: RawForeignKey) -> ForeignKeyInfo {
    let target_table = fk
        .column_references
        .first()
        .map(|r| r.target_table.clone())
        .unwrap_or_default();

    ForeignKeyInfo {
        name: fk.name,
        source_table: table_name.to_string(),
        target_table,
        column_pairs: fk
            .column_references
            .into_iter()
            .map(|r| ColumnPair {
                source_column: r.source_column,
                target_column: r.target_column,
            })
            .collect(),
    }
}
