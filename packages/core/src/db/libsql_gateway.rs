//! libsql Storage Gateway
//!
//! Embedded [`StorageGateway`] over a single libsql connection. One
//! connection is held for the gateway's lifetime so that `BEGIN`, every batch,
//! and `COMMIT`/`ROLLBACK` of a flush run on the same SQLite session.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS tree_nodes (
//!     id          INTEGER PRIMARY KEY AUTOINCREMENT,
//!     unique_id   TEXT NOT NULL UNIQUE,
//!     parent_id   TEXT REFERENCES tree_nodes(unique_id),
//!     "left"      INTEGER,
//!     "right"     INTEGER,
//!     depth       INTEGER,
//!     tree_type   TEXT NOT NULL,
//!     root_number TEXT,
//!     properties  TEXT NOT NULL DEFAULT '{}'
//! );
//! ```
//!
//! Domain attributes are stored as JSON in `properties`. The
//! `(tree_type, left, right)` index serves ordered loads.

use crate::config::{is_valid_identifier, TreeIndexConfig};
use crate::db::{Batch, DeleteBatch, InsertBatch, StorageError, StorageGateway, UpdateBatch};
use crate::models::{NodeRecord, TRACKED_COLUMNS};
use async_trait::async_trait;
use libsql::params::Params;
use libsql::{Builder, Connection, Database};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

/// Upper bound on placeholders used by a storage-id lookup
const LOOKUP_CHUNK: usize = 500;

pub struct LibsqlGateway {
    conn: Connection,
    /// Dropped after the connection
    _db: Database,
    table: String,
    db_path: Option<PathBuf>,
}

impl std::fmt::Debug for LibsqlGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibsqlGateway")
            .field("table", &self.table)
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl LibsqlGateway {
    /// Open (or create) a file-backed database and ensure the schema exists
    pub async fn new(db_path: PathBuf, table: impl Into<String>) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| StorageError::connection_failed(db_path.clone(), e))?;

        Self::open(db, table.into(), Some(db_path)).await
    }

    /// Open a private in-memory database (lost when the gateway is dropped)
    pub async fn new_in_memory(table: impl Into<String>) -> Result<Self, StorageError> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StorageError::connection_failed(PathBuf::from(":memory:"), e))?;

        Self::open(db, table.into(), None).await
    }

    /// Open the database described by a config (`None` path means in-memory)
    pub async fn from_config(config: &TreeIndexConfig) -> Result<Self, StorageError> {
        match &config.database_path {
            Some(path) => Self::new(path.clone(), config.table_name.clone()).await,
            None => Self::new_in_memory(config.table_name.clone()).await,
        }
    }

    async fn open(
        db: Database,
        table: String,
        db_path: Option<PathBuf>,
    ) -> Result<Self, StorageError> {
        if !is_valid_identifier(&table) {
            return Err(StorageError::sql_execution(format!(
                "Invalid table name '{}'",
                table
            )));
        }

        let conn = db.connect()?;
        let gateway = Self {
            conn,
            _db: db,
            table,
            db_path,
        };
        gateway.ensure_schema().await?;
        Ok(gateway)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Create the table and its ordering index (idempotent)
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.execute_pragma("PRAGMA foreign_keys = ON").await?;

        let table = &self.table;
        self.conn
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        unique_id TEXT NOT NULL UNIQUE,
                        parent_id TEXT REFERENCES {table}(unique_id),
                        \"left\" INTEGER,
                        \"right\" INTEGER,
                        depth INTEGER,
                        tree_type TEXT NOT NULL,
                        root_number TEXT,
                        properties TEXT NOT NULL DEFAULT '{{}}'
                    )"
                ),
                (),
            )
            .await
            .map_err(|e| {
                StorageError::sql_execution(format!("Failed to create table {}: {}", table, e))
            })?;

        self.conn
            .execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_tree ON {table}(tree_type, \"left\", \"right\")"
                ),
                (),
            )
            .await
            .map_err(|e| {
                StorageError::sql_execution(format!("Failed to create tree index: {}", e))
            })?;

        Ok(())
    }

    /// PRAGMA statements return rows, so they go through query() instead of execute()
    async fn execute_pragma(&self, pragma: &str) -> Result<(), StorageError> {
        let mut stmt = self.conn.prepare(pragma).await.map_err(|e| {
            StorageError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            StorageError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    async fn delete(&self, batch: &DeleteBatch) -> Result<u64, StorageError> {
        let sql = format!(
            "DELETE FROM {} WHERE id IN ({})",
            self.table,
            placeholders(batch.storage_ids.len())
        );
        let params: Vec<libsql::Value> = batch
            .storage_ids
            .iter()
            .map(|id| libsql::Value::Integer(*id))
            .collect();

        self.conn
            .execute(&sql, Params::Positional(params))
            .await
            .map_err(|e| StorageError::sql_execution(format!("Failed to delete rows: {}", e)))
    }

    async fn update(&self, batch: &UpdateBatch) -> Result<u64, StorageError> {
        if !TRACKED_COLUMNS.contains(&batch.column) {
            return Err(StorageError::sql_execution(format!(
                "Refusing to update untracked column '{}'",
                batch.column
            )));
        }

        let cases = "WHEN ? THEN ? ".repeat(batch.assignments.len());
        let sql = format!(
            "UPDATE {table} SET \"{column}\" = CASE id {cases}END WHERE id IN ({ids})",
            table = self.table,
            column = batch.column,
            cases = cases,
            ids = placeholders(batch.assignments.len()),
        );

        let mut params: Vec<libsql::Value> = Vec::with_capacity(batch.assignments.len() * 3);
        for (storage_id, value) in &batch.assignments {
            params.push(libsql::Value::Integer(*storage_id));
            params.push(json_to_sql(value));
        }
        params.extend(
            batch
                .assignments
                .iter()
                .map(|(storage_id, _)| libsql::Value::Integer(*storage_id)),
        );

        self.conn
            .execute(&sql, Params::Positional(params))
            .await
            .map_err(|e| {
                StorageError::sql_execution(format!(
                    "Failed to update column '{}': {}",
                    batch.column, e
                ))
            })
    }

    async fn insert(&self, batch: &InsertBatch) -> Result<u64, StorageError> {
        let sql = format!(
            "INSERT INTO {} (unique_id, parent_id, \"left\", \"right\", depth, tree_type, root_number, properties) VALUES {}",
            self.table,
            vec!["(?, ?, ?, ?, ?, ?, ?, ?)"; batch.records.len()].join(", ")
        );

        let mut params: Vec<libsql::Value> = Vec::with_capacity(batch.records.len() * 8);
        for record in &batch.records {
            let unique_id = record.unique_id.clone().ok_or_else(|| {
                StorageError::sql_execution("Cannot insert a record without unique_id")
            })?;
            let properties = serde_json::to_string(&record.attributes).map_err(|e| {
                StorageError::sql_execution(format!("Failed to encode properties: {}", e))
            })?;

            params.push(libsql::Value::Text(unique_id));
            params.push(optional_text(&record.parent_id));
            params.push(optional_integer(record.left));
            params.push(optional_integer(record.right));
            params.push(optional_integer(record.depth));
            params.push(libsql::Value::Text(record.tree_type.clone()));
            params.push(optional_text(&record.root_group));
            params.push(libsql::Value::Text(properties));
        }

        self.conn
            .execute(&sql, Params::Positional(params))
            .await
            .map_err(|e| StorageError::sql_execution(format!("Failed to insert rows: {}", e)))
    }

    fn row_to_record(row: &libsql::Row) -> Result<NodeRecord, StorageError> {
        let decode = |column: &str, e: libsql::Error| {
            StorageError::decode(format!("column '{}': {}", column, e))
        };

        let id: i64 = row.get(0).map_err(|e| decode("id", e))?;
        let unique_id: String = row.get(1).map_err(|e| decode("unique_id", e))?;
        let parent_id: Option<String> = row.get(2).map_err(|e| decode("parent_id", e))?;
        let left: Option<i64> = row.get(3).map_err(|e| decode("left", e))?;
        let right: Option<i64> = row.get(4).map_err(|e| decode("right", e))?;
        let depth: Option<i64> = row.get(5).map_err(|e| decode("depth", e))?;
        let tree_type: String = row.get(6).map_err(|e| decode("tree_type", e))?;
        let root_group: Option<String> = row.get(7).map_err(|e| decode("root_number", e))?;
        let properties: String = row.get(8).map_err(|e| decode("properties", e))?;

        let attributes: Map<String, Value> = serde_json::from_str(&properties).map_err(|e| {
            StorageError::decode(format!("properties of '{}': {}", unique_id, e))
        })?;

        Ok(NodeRecord {
            id: Some(id),
            unique_id: Some(unique_id),
            parent_id: parent_id.filter(|p| !p.is_empty()),
            left,
            right,
            depth,
            tree_type,
            root_group,
            attributes,
        })
    }
}

#[async_trait]
impl StorageGateway for LibsqlGateway {
    async fn execute(&self, batch: &Batch) -> Result<u64, StorageError> {
        if batch.is_empty() {
            return Ok(0);
        }
        match batch {
            Batch::Delete(batch) => self.delete(batch).await,
            Batch::Update(batch) => self.update(batch).await,
            Batch::Insert(batch) => self.insert(batch).await,
        }
    }

    async fn begin_transaction(&self) -> Result<(), StorageError> {
        self.conn
            .execute("BEGIN TRANSACTION", ())
            .await
            .map_err(|e| StorageError::transaction(format!("BEGIN failed: {}", e)))?;
        Ok(())
    }

    async fn commit(&self) -> Result<(), StorageError> {
        self.conn
            .execute("COMMIT", ())
            .await
            .map_err(|e| StorageError::transaction(format!("COMMIT failed: {}", e)))?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StorageError> {
        self.conn
            .execute("ROLLBACK", ())
            .await
            .map_err(|e| StorageError::transaction(format!("ROLLBACK failed: {}", e)))?;
        Ok(())
    }

    async fn toggle_integrity_checks(&self, enabled: bool) -> Result<(), StorageError> {
        let pragma = if enabled {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        };
        self.execute_pragma(pragma).await
    }

    async fn load_ordered(&self, tree_type: Option<&str>) -> Result<Vec<NodeRecord>, StorageError> {
        let columns =
            "id, unique_id, parent_id, \"left\", \"right\", depth, tree_type, root_number, properties";
        let order = "ORDER BY tree_type, \"left\", \"right\"";

        let mut rows = match tree_type {
            Some(tree_type) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {} FROM {} WHERE tree_type = ? {}",
                            columns, self.table, order
                        ),
                        libsql::params![tree_type],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        &format!("SELECT {} FROM {} {}", columns, self.table, order),
                        (),
                    )
                    .await
            }
        }
        .map_err(|e| StorageError::sql_execution(format!("Failed to load records: {}", e)))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StorageError::sql_execution(e.to_string()))?
        {
            records.push(Self::row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn lookup_storage_ids(
        &self,
        unique_ids: &[String],
    ) -> Result<HashMap<String, i64>, StorageError> {
        let mut found = HashMap::with_capacity(unique_ids.len());

        for chunk in unique_ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT unique_id, id FROM {} WHERE unique_id IN ({})",
                self.table,
                placeholders(chunk.len())
            );
            let params: Vec<libsql::Value> = chunk
                .iter()
                .map(|id| libsql::Value::Text(id.clone()))
                .collect();

            let mut rows = self
                .conn
                .query(&sql, Params::Positional(params))
                .await
                .map_err(|e| {
                    StorageError::sql_execution(format!("Failed to look up storage ids: {}", e))
                })?;

            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| StorageError::sql_execution(e.to_string()))?
            {
                let unique_id: String = row
                    .get(0)
                    .map_err(|e| StorageError::decode(format!("column 'unique_id': {}", e)))?;
                let id: i64 = row
                    .get(1)
                    .map_err(|e| StorageError::decode(format!("column 'id': {}", e)))?;
                found.insert(unique_id, id);
            }
        }

        Ok(found)
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn optional_text(value: &Option<String>) -> libsql::Value {
    match value {
        Some(text) => libsql::Value::Text(text.clone()),
        None => libsql::Value::Null,
    }
}

fn optional_integer(value: Option<i64>) -> libsql::Value {
    match value {
        Some(number) => libsql::Value::Integer(number),
        None => libsql::Value::Null,
    }
}

/// Map a JSON column value onto a SQLite value
fn json_to_sql(value: &Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Bool(flag) => libsql::Value::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => libsql::Value::Integer(integer),
            None => libsql::Value::Real(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => libsql::Value::Text(text.clone()),
        other => libsql::Value::Text(other.to_string()),
    }
}
