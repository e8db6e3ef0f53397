use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;

use crate::catalog::mapper::{
    RawColumn, RawColumnReference, RawForeignKey, RawIndex, RawIndexColumn, RawSchema,
    RawSortSequence, RawTable,
};
use crate::data_types::VersionId;

use super::{DatabaseConnection, Error, Result};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

// All queries are scoped to the connection's current schema and only read the catalogs

const TABLES_QUERY: &str = r#"
SELECT c.relname::text AS name, obj_description(c.oid, 'pg_class') AS remarks
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = current_schema() AND c.relkind IN ('r', 'p')
ORDER BY c.relname
"#;

const COLUMNS_QUERY: &str = r#"
SELECT
    c.relname::text AS table_name,
    a.attname::text AS name,
    format_type(a.atttypid, a.atttypmod) AS data_type,
    a.attnotnull AS not_null,
    pg_get_expr(d.adbin, d.adrelid) AS default_value,
    col_description(c.oid, a.attnum) AS remarks
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE n.nspname = current_schema()
  AND c.relkind IN ('r', 'p')
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY c.relname, a.attnum
"#;

const CONSTRAINTS_QUERY: &str = r#"
SELECT
    con.conname::text AS name,
    con.contype::text AS kind,
    src.relname::text AS source_table,
    sa.attname::text AS source_column,
    tgt.relname::text AS target_table,
    ta.attname::text AS target_column
FROM pg_constraint con
JOIN pg_class src ON src.oid = con.conrelid
JOIN pg_namespace n ON n.oid = src.relnamespace
CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_attribute sa ON sa.attrelid = con.conrelid AND sa.attnum = k.attnum
LEFT JOIN pg_class tgt ON tgt.oid = con.confrelid
LEFT JOIN pg_attribute ta ON ta.attrelid = con.confrelid AND ta.attnum = con.confkey[k.ord]
WHERE n.nspname = current_schema() AND con.contype IN ('p', 'u', 'f')
ORDER BY src.relname, con.conname, k.ord
"#;

// Indexes backing a constraint are reported through CONSTRAINTS_QUERY instead
const INDEXES_QUERY: &str = r#"
SELECT
    t.relname::text AS table_name,
    i.relname::text AS name,
    a.attname::text AS column_name,
    (ix.indoption[(k.ord - 1)::int] & 1) = 1 AS descending
FROM pg_index ix
JOIN pg_class t ON t.oid = ix.indrelid
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
WHERE n.nspname = current_schema()
  AND NOT EXISTS (SELECT 1 FROM pg_constraint con WHERE con.conindid = ix.indexrelid)
ORDER BY t.relname, i.relname, k.ord
"#;

#[derive(sqlx::FromRow)]
struct TableRow {
    name: String,
    remarks: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ColumnRow {
    table_name: String,
    name: String,
    data_type: String,
    not_null: bool,
    default_value: Option<String>,
    remarks: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ConstraintRow {
    name: String,
    kind: String,
    source_table: String,
    source_column: String,
    target_table: Option<String>,
    target_column: Option<String>,
}

#[derive(sqlx::FromRow)]
struct IndexRow {
    table_name: String,
    name: String,
    column_name: String,
    descending: bool,
}

#[derive(Debug)]
pub struct PostgresDatabase {
    pub version_id: VersionId,
    pub executor: PgPool,
}

impl PostgresDatabase {
    pub async fn connect(
        version_id: VersionId,
        dsn: &str,
        max_connections: u32,
    ) -> Result<Self> {
        let executor = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .idle_timeout(Duration::from_millis(30000))
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .map_err(|source| Error::Connection {
                version: version_id.clone(),
                source,
            })?;

        Ok(Self {
            version_id,
            executor,
        })
    }

    async fn fetch<T>(&self, query: &'static str) -> Result<Vec<T>>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
    {
        sqlx::query_as(query)
            .fetch_all(&self.executor)
            .await
            .map_err(Error::Introspection)
    }
}

fn index_entry<'a>(
    indexes: &'a mut Vec<RawIndex>,
    name: &str,
) -> &'a mut RawIndex {
    match indexes.iter().position(|i| i.name == name) {
        Some(position) => &mut indexes[position],
        None => {
            indexes.push(RawIndex {
                name: name.to_string(),
                columns: vec![],
            });
            let last = indexes.len() - 1;
            &mut indexes[last]
        }
    }
}

#[async_trait]
impl DatabaseConnection for PostgresDatabase {
    fn version_id(&self) -> &VersionId {
        &self.version_id
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.executor)
            .await
            .map_err(|source| Error::Connection {
                version: self.version_id.clone(),
                source,
            })?;
        Ok(())
    }

    async fn introspect(&self) -> Result<RawSchema> {
        let table_rows: Vec<TableRow> = self.fetch(TABLES_QUERY).await?;
        let column_rows: Vec<ColumnRow> = self.fetch(COLUMNS_QUERY).await?;
        let constraint_rows: Vec<ConstraintRow> = self.fetch(CONSTRAINTS_QUERY).await?;
        let index_rows: Vec<IndexRow> = self.fetch(INDEXES_QUERY).await?;

        let mut tables: BTreeMap<String, RawTable> = table_rows
            .into_iter()
            .map(|row| {
                let table = RawTable {
                    name: row.name.clone(),
                    has_remarks: row.remarks.is_some(),
                    remarks: row.remarks.unwrap_or_default(),
                    columns: vec![],
                    primary_key: None,
                    unique_constraints: vec![],
                    indexes: vec![],
                    foreign_keys: vec![],
                };
                (row.name, table)
            })
            .collect();

        for row in column_rows {
            if let Some(table) = tables.get_mut(&row.table_name) {
                table.columns.push(RawColumn {
                    name: row.name,
                    data_type: row.data_type,
                    has_remarks: row.remarks.is_some(),
                    remarks: row.remarks.unwrap_or_default(),
                    has_default_value: row.default_value.is_some(),
                    default_value: row.default_value.unwrap_or_default(),
                    nullable: !row.not_null,
                });
            }
        }

        for row in constraint_rows {
            let Some(table) = tables.get_mut(&row.source_table) else {
                continue;
            };
            let column = RawIndexColumn {
                name: row.source_column.clone(),
                sort_sequence: RawSortSequence::Unknown,
            };

            match row.kind.as_str() {
                "p" => table
                    .primary_key
                    .get_or_insert_with(|| RawIndex {
                        name: row.name.clone(),
                        columns: vec![],
                    })
                    .columns
                    .push(column),
                "u" => index_entry(&mut table.unique_constraints, &row.name)
                    .columns
                    .push(column),
                "f" => {
                    let reference = RawColumnReference {
                        source_table: row.source_table.clone(),
                        source_column: row.source_column,
                        target_table: row.target_table.unwrap_or_default(),
                        target_column: row.target_column.unwrap_or_default(),
                    };
                    match table.foreign_keys.iter_mut().find(|fk| fk.name == row.name) {
                        Some(fk) => fk.column_references.push(reference),
                        None => table.foreign_keys.push(RawForeignKey {
                            name: row.name,
                            column_references: vec![reference],
                        }),
                    }
                }
                _ => {}
            }
        }

        for row in index_rows {
            if let Some(table) = tables.get_mut(&row.table_name) {
                index_entry(&mut table.indexes, &row.name)
                    .columns
                    .push(RawIndexColumn {
                        name: row.column_name,
                        sort_sequence: if row.descending {
                            RawSortSequence::Descending
                        } else {
                            RawSortSequence::Ascending
                        },
                    });
            }
        }

        debug!(
            "Introspected {} tables for version {}",
            tables.len(),
            self.version_id
        );
        Ok(RawSchema {
            tables: tables.into_values().collect(),
        })
    }

    async fn close(&self) {
        self.executor.close().await
    }
}
