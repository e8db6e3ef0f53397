use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::debug;

use crate::catalog::mapper::{
    RawColumn, RawColumnReference, RawForeignKey, RawIndex, RawIndexColumn, RawSchema,
    RawSortSequence, RawTable,
};
use crate::data_types::VersionId;

use super::{DatabaseConnection, Error, Result};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(sqlx::FromRow)]
struct TableRow {
    name: String,
}

#[derive(sqlx::FromRow)]
struct ColumnRow {
    name: String,
    r#type: String,
    notnull: i64,
    dflt_value: Option<String>,
    pk: i64,
}

#[derive(sqlx::FromRow)]
struct ForeignKeyRow {
    id: i64,
    target_table: String,
    source_column: String,
    // NULL when the key implicitly references the target's primary key
    target_column: Option<String>,
}

#[derive(sqlx::FromRow)]
struct IndexRow {
    name: String,
    origin: String,
}

#[derive(sqlx::FromRow)]
struct IndexColumnRow {
    // NULL for expression columns
    name: Option<String>,
    desc: i64,
}

#[derive(Debug)]
pub struct SqliteDatabase {
    pub version_id: VersionId,
    pub executor: Pool<Sqlite>,
}

impl SqliteDatabase {
    /// Open an existing SQLite database. A missing file is a connection error:
    /// the database of a version is created by its build, never by us.
    pub async fn connect(
        version_id: VersionId,
        dsn: &str,
        max_connections: u32,
    ) -> Result<Self> {
        let connection_error = |source| Error::Connection {
            version: version_id.clone(),
            source,
        };

        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(connection_error)?
            .create_if_missing(false);

        let executor = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(connection_error)?;

        Ok(Self {
            version_id,
            executor,
        })
    }

    async fn load_table(&self, name: String) -> Result<RawTable> {
        let columns: Vec<ColumnRow> = sqlx::query_as(
            r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info($1) ORDER BY cid"#,
        )
        .bind(&name)
        .fetch_all(&self.executor)
        .await
        .map_err(Error::Introspection)?;

        let mut pk_columns: Vec<(i64, String)> = columns
            .iter()
            .filter(|c| c.pk > 0)
            .map(|c| (c.pk, c.name.clone()))
            .collect();
        pk_columns.sort();

        let primary_key = (!pk_columns.is_empty()).then(|| RawIndex {
            name: format!("{name}_pkey"),
            columns: pk_columns
                .into_iter()
                .map(|(_, column)| RawIndexColumn {
                    name: column,
                    sort_sequence: RawSortSequence::Unknown,
                })
                .collect(),
        });

        let (unique_constraints, indexes) = self.load_indexes(&name).await?;
        let foreign_keys = self.load_foreign_keys(&name).await?;

        Ok(RawTable {
            remarks: String::new(),
            // SQLite has no table or column comments
            has_remarks: false,
            columns: columns
                .into_iter()
                .map(|c| RawColumn {
                    name: c.name,
                    data_type: c.r#type,
                    remarks: String::new(),
                    has_remarks: false,
                    has_default_value: c.dflt_value.is_some(),
                    default_value: c.dflt_value.unwrap_or_default(),
                    nullable: c.notnull == 0,
                })
                .collect(),
            primary_key,
            unique_constraints,
            indexes,
            foreign_keys,
            name,
        })
    }

    async fn load_indexes(&self, table: &str) -> Result<(Vec<RawIndex>, Vec<RawIndex>)> {
        let index_rows: Vec<IndexRow> = sqlx::query_as(
            r#"SELECT name, origin FROM pragma_index_list($1) ORDER BY name"#,
        )
        .bind(table)
        .fetch_all(&self.executor)
        .await
        .map_err(Error::Introspection)?;

        let mut unique_constraints = vec![];
        let mut indexes = vec![];

        for row in index_rows {
            // origin: "pk" = primary key, "u" = UNIQUE constraint, "c" = CREATE INDEX
            if row.origin == "pk" {
                continue;
            }
            let is_constraint = row.origin == "u";

            let columns: Vec<IndexColumnRow> = sqlx::query_as(
                r#"SELECT name, "desc" FROM pragma_index_xinfo($1) WHERE key = 1 ORDER BY seqno"#,
            )
            .bind(&row.name)
            .fetch_all(&self.executor)
            .await
            .map_err(Error::Introspection)?;

            let index = RawIndex {
                name: row.name,
                columns: columns
                    .into_iter()
                    .filter_map(|c| {
                        let sort_sequence = match (is_constraint, c.desc) {
                            (true, _) => RawSortSequence::Unknown,
                            (false, 0) => RawSortSequence::Ascending,
                            (false, _) => RawSortSequence::Descending,
                        };
                        c.name.map(|name| RawIndexColumn {
                            name,
                            sort_sequence,
                        })
                    })
                    .collect(),
            };

            if is_constraint {
                unique_constraints.push(index);
            } else {
                indexes.push(index);
            }
        }

        Ok((unique_constraints, indexes))
    }

    async fn load_foreign_keys(&self, table: &str) -> Result<Vec<RawForeignKey>> {
        let rows: Vec<ForeignKeyRow> = sqlx::query_as(
            r#"
            SELECT id, "table" AS target_table, "from" AS source_column, "to" AS target_column
            FROM pragma_foreign_key_list($1)
            ORDER BY id, seq
            "#,
        )
        .bind(table)
        .fetch_all(&self.executor)
        .await
        .map_err(Error::Introspection)?;

        let mut keys: BTreeMap<i64, Vec<RawColumnReference>> = BTreeMap::new();
        let mut target_pks: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for row in rows {
            let position = keys.get(&row.id).map(Vec::len).unwrap_or(0);

            let target_column = match row.target_column {
                Some(column) => column,
                None => {
                    if !target_pks.contains_key(&row.target_table) {
                        let pk = self.primary_key_columns(&row.target_table).await?;
                        target_pks.insert(row.target_table.clone(), pk);
                    }
                    target_pks
                        .get(&row.target_table)
                        .and_then(|pk| pk.get(position))
                        .cloned()
                        .unwrap_or_default()
                }
            };

            keys.entry(row.id).or_default().push(RawColumnReference {
                source_table: table.to_string(),
                source_column: row.source_column,
                target_table: row.target_table,
                target_column,
            });
        }

        Ok(keys
            .into_iter()
            .map(|(id, column_references)| RawForeignKey {
                // SQLite doesn't keep constraint names around
                name: format!("fk_{table}_{id}"),
                column_references,
            })
            .collect())
    }

    async fn primary_key_columns(&self, table: &str) -> Result<Vec<String>> {
        let columns: Vec<ColumnRow> = sqlx::query_as(
            r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info($1) WHERE pk > 0 ORDER BY pk"#,
        )
        .bind(table)
        .fetch_all(&self.executor)
        .await
        .map_err(Error::Introspection)?;

        Ok(columns.into_iter().map(|c| c.name).collect())
    }
}

#[async_trait]
impl DatabaseConnection for SqliteDatabase {
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
        let table_rows: Vec<TableRow> = sqlx::query_as(
            r#"SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"#,
        )
        .fetch_all(&self.executor)
        .await
        .map_err(Error::Introspection)?;

        let mut tables = Vec::with_capacity(table_rows.len());
        for row in table_rows {
            tables.push(self.load_table(row.name).await?);
        }

        debug!(
            "Introspected {} tables for version {}",
            tables.len(),
            self.version_id
        );
        Ok(RawSchema { tables })
    }

    async fn close(&self) {
        self.executor.close().await
    }
}
