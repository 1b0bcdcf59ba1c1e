//! The relational (table) substrate: schema-derived `CREATE TABLE`, typed
//! row writes inside per-table transactions, and ad hoc `SELECT` execution
//! for the table agent.

use crate::config::RelationalSettings;
use crate::error::{RelationalError, Result};
use crate::table::{CellValue, SemanticType, TableSchema};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::{debug, info};

/// A single row of a query result, rendered as strings for display purposes.
#[derive(Debug, Clone)]
pub struct QueryRow {
    pub values: Vec<Option<String>>,
}

/// The shape of a `SELECT` result: column names plus rows.
#[derive(Debug, Clone)]
pub struct QueryResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<QueryRow>,
}

/// Connection-pooled relational substrate.
pub struct RelationalStore {
    pool: SqlitePool,
}

impl RelationalStore {
    pub async fn connect(config: &RelationalSettings) -> Result<Self> {
        info!("Initializing relational store at: {}", config.database_url);

        let db_path = config
            .database_url
            .strip_prefix("sqlite:")
            .unwrap_or(&config.database_url);
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        if db_path != ":memory:" {
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| RelationalError::WriteFailed(format!("invalid database url: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create a physical table named exactly `schema.table_name`, quoting
    /// every identifier. Columns are typed loosely (`TEXT`/`INTEGER`/`REAL`)
    /// since semantic coercion already happened upstream.
    pub async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let column_defs: Vec<String> = schema
            .columns
            .iter()
            .map(|(name, semantic_type)| {
                format!("\"{}\" {}", name, sql_type_for(*semantic_type))
            })
            .collect();

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            schema.table_name,
            column_defs.join(", ")
        );

        sqlx::query(&ddl).execute(&self.pool).await?;
        debug!(table = %schema.table_name, "created table");
        Ok(())
    }

    /// Insert all rows for one table inside a single transaction: either
    /// the whole table is persisted, or none of it is.
    pub async fn insert_rows(
        &self,
        schema: &TableSchema,
        rows: &[Vec<CellValue>],
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let columns = schema.column_names();
        let quoted_columns: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
        let placeholders: Vec<String> = (0..columns.len()).map(|_| "?".to_string()).collect();
        let insert_sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            schema.table_name,
            quoted_columns.join(", "),
            placeholders.join(", ")
        );

        let mut tx = self.pool.begin().await?;

        for row in rows {
            let mut query = sqlx::query(&insert_sql);
            for cell in row {
                query = bind_cell(query, cell);
            }
            query.execute(&mut *tx).await.map_err(|e| {
                RelationalError::WriteFailed(format!("insert into {}: {e}", schema.table_name))
            })?;
        }

        tx.commit().await?;
        debug!(table = %schema.table_name, rows = rows.len(), "inserted rows");
        Ok(())
    }

    /// Drop a table, used when cascading document deletion.
    pub async fn drop_table(&self, table_name: &str) -> Result<()> {
        let ddl = format!("DROP TABLE IF EXISTS \"{table_name}\"");
        sqlx::query(&ddl).execute(&self.pool).await?;
        debug!(table = table_name, "dropped table");
        Ok(())
    }

    /// Execute an ad hoc query. Only `SELECT` statements are permitted —
    /// the table agent must never be able to mutate state.
    pub async fn execute_select(&self, sql: &str) -> Result<QueryResultSet> {
        let normalized = sql.trim().trim_end_matches(';').trim();
        if !normalized.to_uppercase().starts_with("SELECT") {
            return Err(RelationalError::NonSelectRejected(sql.to_string()).into());
        }

        let rows = sqlx::query(normalized)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RelationalError::QueryFailed(e.to_string()))?;

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let result_rows = rows
            .iter()
            .map(|row| QueryRow {
                values: (0..row.columns().len())
                    .map(|i| render_column_value(row, i))
                    .collect(),
            })
            .collect();

        Ok(QueryResultSet {
            columns,
            rows: result_rows,
        })
    }
}

fn sql_type_for(semantic_type: SemanticType) -> &'static str {
    match semantic_type {
        SemanticType::Integer => "INTEGER",
        SemanticType::Float | SemanticType::Currency | SemanticType::Percentage => "REAL",
        SemanticType::String | SemanticType::Date => "TEXT",
    }
}

fn bind_cell<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    cell: &'q CellValue,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match cell {
        CellValue::Null => query.bind(None::<String>),
        CellValue::String(s) => query.bind(s),
        CellValue::Integer(i) => query.bind(i),
        CellValue::Float(f) => query.bind(f),
        CellValue::Date(d) => query.bind(d),
    }
}

fn render_column_value(row: &sqlx::sqlite::SqliteRow, index: usize) -> Option<String> {
    let raw = row.try_get_raw(index).ok()?;
    if raw.is_null() {
        return None;
    }

    match raw.type_info().name() {
        "INTEGER" => row.try_get::<i64, _>(index).ok().map(|v| v.to_string()),
        "REAL" => row.try_get::<f64, _>(index).ok().map(|v| v.to_string()),
        _ => row.try_get::<String, _>(index).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_schema() -> TableSchema {
        TableSchema {
            table_name: "doc_abc_results".to_string(),
            doc_id: "abc".to_string(),
            description: "test table".to_string(),
            columns: vec![
                ("team".to_string(), SemanticType::String),
                ("wins".to_string(), SemanticType::Integer),
            ],
            created_at: Utc::now(),
        }
    }

    async fn test_store() -> RelationalStore {
        let config = RelationalSettings {
            database_url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        RelationalStore::connect(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_insert_and_select() {
        let store = test_store().await;
        let schema = test_schema();
        store.create_table(&schema).await.unwrap();

        store
            .insert_rows(
                &schema,
                &[vec![CellValue::String("Brazil".to_string()), CellValue::Integer(5)]],
            )
            .await
            .unwrap();

        let result = store
            .execute_select("SELECT * FROM \"doc_abc_results\"")
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.columns.len(), 2);
    }

    #[tokio::test]
    async fn test_non_select_statements_rejected() {
        let store = test_store().await;
        let schema = test_schema();
        store.create_table(&schema).await.unwrap();

        let result = store
            .execute_select("DELETE FROM \"doc_abc_results\"")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_drop_table_removes_it() {
        let store = test_store().await;
        let schema = test_schema();
        store.create_table(&schema).await.unwrap();
        store.drop_table(&schema.table_name).await.unwrap();

        let result = store
            .execute_select(&format!("SELECT * FROM \"{}\"", schema.table_name))
            .await;
        assert!(result.is_err());
    }
}
