//! SQLite database backend implementation
//!
//! rusqlite is synchronous, so every call runs on the blocking thread pool
//! under the operation timeout.

use crate::core::{
    database::Database, database_types::DatabaseType, error::DatabaseError, error::Result,
    value::DatabaseResult, value::DatabaseRow, value::DatabaseValue,
};
use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite database implementation
pub struct SqliteDatabase {
    connection: Arc<Mutex<Option<Connection>>>,
    connected: Arc<AtomicBool>,
    in_transaction: Arc<AtomicBool>,
}

impl SqliteDatabase {
    /// Create a new, unconnected SQLite driver
    pub fn new() -> Self {
        Self {
            connection: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            in_transaction: Arc::new(AtomicBool::new(false)),
        }
    }

    fn row_to_database_row(row: &Row) -> rusqlite::Result<DatabaseRow> {
        let mut db_row = DatabaseRow::new();
        let column_count = row.as_ref().column_count();

        for i in 0..column_count {
            let column_name = row.as_ref().column_name(i)?.to_string();
            let value = match row.get_ref(i)? {
                ValueRef::Null => DatabaseValue::Null,
                ValueRef::Integer(v) => DatabaseValue::Long(v),
                ValueRef::Real(v) => DatabaseValue::Double(v),
                ValueRef::Text(v) => DatabaseValue::String(String::from_utf8_lossy(v).to_string()),
                ValueRef::Blob(v) => DatabaseValue::Bytes(v.to_vec()),
            };
            db_row.insert(column_name, value);
        }

        Ok(db_row)
    }

    fn to_sql_value(value: &DatabaseValue) -> Value {
        match value {
            DatabaseValue::Null => Value::Null,
            DatabaseValue::Bool(v) => Value::Integer(i64::from(*v)),
            DatabaseValue::Int(v) => Value::Integer(i64::from(*v)),
            DatabaseValue::Long(v) => Value::Integer(*v),
            DatabaseValue::Float(v) => Value::Real(f64::from(*v)),
            DatabaseValue::Double(v) => Value::Real(*v),
            DatabaseValue::String(v) => Value::Text(v.clone()),
            DatabaseValue::Bytes(v) => Value::Blob(v.clone()),
        }
    }

    /// Run `op` against the open connection on the blocking pool
    async fn with_connection<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let connection_arc = Arc::clone(&self.connection);

        let mut task = tokio::task::spawn_blocking(move || -> Result<T> {
            let connection = connection_arc.blocking_lock();
            let conn = connection
                .as_ref()
                .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
            op(conn)
        });

        // Use select! to abort task on timeout, preventing resource leaks
        tokio::select! {
            result = &mut task => {
                result.map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))?
            }
            _ = tokio::time::sleep(DEFAULT_OPERATION_TIMEOUT) => {
                task.abort();
                Err(DatabaseError::query_timeout(DEFAULT_OPERATION_TIMEOUT.as_millis() as u64))
            }
        }
    }

    fn collect_rows(conn: &Connection, query: &str, params: Vec<Value>) -> Result<DatabaseResult> {
        let mut stmt = conn.prepare(query)?;
        let rows = stmt.query_map(params_from_iter(params), Self::row_to_database_row)?;

        let mut results = Vec::new();
        for row_result in rows {
            results.push(row_result?);
        }
        Ok(results)
    }

    /// Run a statement for its effect. Rows it yields are read and discarded.
    fn run_statement(conn: &Connection, query: &str, params: Vec<Value>) -> Result<u64> {
        let mut stmt = conn.prepare(query)?;
        if stmt.column_count() == 0 {
            return Ok(stmt.execute(params_from_iter(params))? as u64);
        }

        let readonly = stmt.readonly();
        let mut rows = stmt.query(params_from_iter(params))?;
        while rows.next()?.is_some() {}
        Ok(if readonly { 0 } else { conn.changes() })
    }
}

impl Default for SqliteDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        self.disconnect().await?;

        let path = connection_string.to_string();
        let connection_arc = Arc::clone(&self.connection);

        let mut task = tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Connection::open(&path)?;
            conn.execute("PRAGMA foreign_keys = ON", [])?;
            *connection_arc.blocking_lock() = Some(conn);
            Ok(())
        });

        tokio::select! {
            result = &mut task => {
                result.map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))??
            }
            _ = tokio::time::sleep(DEFAULT_OPERATION_TIMEOUT) => {
                task.abort();
                return Err(DatabaseError::connection_timeout(DEFAULT_OPERATION_TIMEOUT.as_millis() as u64));
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.in_transaction.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        *self.connection.lock().await = None;
        Ok(())
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        let query = query.to_string();
        self.with_connection(move |conn| Self::run_statement(conn, &query, Vec::new()))
            .await
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        let query = query.to_string();
        self.with_connection(move |conn| Self::collect_rows(conn, &query, Vec::new()))
            .await
    }

    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let query = query.to_string();
        let params: Vec<Value> = params.iter().map(Self::to_sql_value).collect();
        self.with_connection(move |conn| Self::collect_rows(conn, &query, params))
            .await
    }

    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        let query = query.to_string();
        let params: Vec<Value> = params.iter().map(Self::to_sql_value).collect();
        self.with_connection(move |conn| Self::run_statement(conn, &query, params))
            .await
    }

    async fn begin_transaction(&self) -> Result<()> {
        if self.in_transaction.load(Ordering::SeqCst) {
            return Err(DatabaseError::transaction("Already in a transaction"));
        }
        self.with_connection(|conn| {
            conn.execute_batch("BEGIN TRANSACTION")?;
            Ok(())
        })
        .await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        if !self.in_transaction.load(Ordering::SeqCst) {
            return Err(DatabaseError::transaction("Not in a transaction"));
        }
        self.with_connection(|conn| {
            conn.execute_batch("COMMIT")?;
            Ok(())
        })
        .await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if !self.in_transaction.load(Ordering::SeqCst) {
            return Err(DatabaseError::transaction("Not in a transaction"));
        }
        self.with_connection(|conn| {
            conn.execute_batch("ROLLBACK")?;
            Ok(())
        })
        .await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    async fn last_insert_id(&self, _sequence: Option<&str>) -> Result<Option<String>> {
        let rowid = self.with_connection(|conn| Ok(conn.last_insert_rowid())).await?;
        Ok((rowid != 0).then(|| rowid.to_string()))
    }
}

impl Drop for SqliteDatabase {
    fn drop(&mut self) {
        // Best-effort rollback; Drop cannot be async
        if self.in_transaction.load(Ordering::SeqCst) {
            if let Ok(connection) = self.connection.try_lock() {
                if let Some(conn) = connection.as_ref() {
                    let _ = conn.execute_batch("ROLLBACK");
                }
            }
        }
    }
}
