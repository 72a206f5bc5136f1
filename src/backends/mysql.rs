//! MySQL / MariaDB database backend implementation
//!
//! One `mysql_async::Conn` per driver. Parameterized statements go through
//! the binary protocol; plain statements through the text protocol.

use crate::core::{
    database::Database, database_types::DatabaseType, error::DatabaseError, error::Result,
    value::DatabaseResult, value::DatabaseRow, value::DatabaseValue,
};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Params, Row, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// MySQL database implementation
pub struct MysqlDatabase {
    conn: Mutex<Option<Conn>>,
    connected: AtomicBool,
    in_transaction: AtomicBool,
}

fn map_error(e: mysql_async::Error) -> DatabaseError {
    match e {
        mysql_async::Error::Io(io) => DatabaseError::connection_lost(io.to_string()),
        mysql_async::Error::Driver(mysql_async::DriverError::ConnectionClosed) => {
            DatabaseError::connection_lost("connection closed")
        }
        other => DatabaseError::MysqlError(other.to_string()),
    }
}

async fn timed<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, mysql_async::Error>>,
{
    tokio::time::timeout(DEFAULT_OPERATION_TIMEOUT, fut)
        .await
        .map_err(|_| DatabaseError::query_timeout(DEFAULT_OPERATION_TIMEOUT.as_millis() as u64))?
        .map_err(map_error)
}

fn to_mysql_value(value: &DatabaseValue) -> Value {
    match value {
        DatabaseValue::Null => Value::NULL,
        DatabaseValue::Bool(v) => Value::Int(i64::from(*v)),
        DatabaseValue::Int(v) => Value::Int(i64::from(*v)),
        DatabaseValue::Long(v) => Value::Int(*v),
        DatabaseValue::Float(v) => Value::Float(*v),
        DatabaseValue::Double(v) => Value::Double(*v),
        DatabaseValue::String(v) => Value::Bytes(v.clone().into_bytes()),
        DatabaseValue::Bytes(v) => Value::Bytes(v.clone()),
    }
}

fn from_mysql_value(value: &Value) -> DatabaseValue {
    match value {
        Value::NULL => DatabaseValue::Null,
        Value::Int(v) => DatabaseValue::Long(*v),
        Value::UInt(v) => match i64::try_from(*v) {
            Ok(v) => DatabaseValue::Long(v),
            Err(_) => DatabaseValue::String(v.to_string()),
        },
        Value::Float(v) => DatabaseValue::Float(*v),
        Value::Double(v) => DatabaseValue::Double(*v),
        Value::Bytes(b) => match std::str::from_utf8(b) {
            Ok(s) => DatabaseValue::String(s.to_string()),
            Err(_) => DatabaseValue::Bytes(b.clone()),
        },
        Value::Date(y, mo, d, h, mi, s, us) => DatabaseValue::String(if *us > 0 {
            format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}", y, mo, d, h, mi, s, us)
        } else {
            format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, mo, d, h, mi, s)
        }),
        Value::Time(neg, days, h, mi, s, _) => {
            let hours = u32::from(*h) + days * 24;
            DatabaseValue::String(format!(
                "{}{:02}:{:02}:{:02}",
                if *neg { "-" } else { "" },
                hours,
                mi,
                s
            ))
        }
    }
}

fn row_to_database_row(row: &Row) -> DatabaseRow {
    row.columns_ref()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = row
                .as_ref(idx)
                .map(from_mysql_value)
                .unwrap_or(DatabaseValue::Null);
            (column.name_str().into_owned(), value)
        })
        .collect()
}

impl MysqlDatabase {
    /// Create a new, unconnected MySQL driver
    pub fn new() -> Self {
        Self {
            conn: Mutex::new(None),
            connected: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
        }
    }

    async fn run_control(&self, sql: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        timed(conn.query_drop(sql)).await.map_err(|e| match e {
            DatabaseError::MysqlError(msg) => DatabaseError::transaction(msg),
            other => other,
        })
    }
}

impl Default for MysqlDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for MysqlDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        self.disconnect().await?;

        let conn = tokio::time::timeout(DEFAULT_OPERATION_TIMEOUT, Conn::from_url(connection_string))
            .await
            .map_err(|_| {
                DatabaseError::connection_timeout(DEFAULT_OPERATION_TIMEOUT.as_millis() as u64)
            })?
            .map_err(|e| DatabaseError::connection(e.to_string()))?;

        *self.conn.lock().await = Some(conn);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.in_transaction.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            // The server may already be gone; dropping the handle is enough then
            if let Err(e) = conn.disconnect().await {
                tracing::debug!(target: "dbapi", error = %e, "MySQL disconnect failed");
            }
        }
        Ok(())
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        timed(conn.query_drop(query)).await?;
        Ok(conn.affected_rows())
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        let rows: Vec<Row> = timed(conn.query(query)).await?;
        Ok(rows.iter().map(row_to_database_row).collect())
    }

    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        let params = Params::Positional(params.iter().map(to_mysql_value).collect());
        let rows: Vec<Row> = timed(conn.exec(query, params)).await?;
        Ok(rows.iter().map(row_to_database_row).collect())
    }

    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        let params = Params::Positional(params.iter().map(to_mysql_value).collect());
        timed(conn.exec_drop(query, params)).await?;
        Ok(conn.affected_rows())
    }

    async fn begin_transaction(&self) -> Result<()> {
        if self.in_transaction.load(Ordering::SeqCst) {
            return Err(DatabaseError::transaction("Already in a transaction"));
        }
        self.run_control("START TRANSACTION").await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        if !self.in_transaction.load(Ordering::SeqCst) {
            return Err(DatabaseError::transaction("Not in a transaction"));
        }
        self.run_control("COMMIT").await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if !self.in_transaction.load(Ordering::SeqCst) {
            return Err(DatabaseError::transaction("Not in a transaction"));
        }
        self.run_control("ROLLBACK").await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    async fn last_insert_id(&self, _sequence: Option<&str>) -> Result<Option<String>> {
        let guard = self.conn.lock().await;
        Ok(guard
            .as_ref()
            .and_then(Conn::last_insert_id)
            .filter(|id| *id != 0)
            .map(|id| id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_mapping() {
        assert_eq!(to_mysql_value(&true.into()), Value::Int(1));
        assert_eq!(
            to_mysql_value(&"abc".into()),
            Value::Bytes(b"abc".to_vec())
        );
        assert_eq!(
            from_mysql_value(&Value::Bytes(b"abc".to_vec())),
            DatabaseValue::String("abc".into())
        );
        assert_eq!(
            from_mysql_value(&Value::Bytes(vec![0xff, 0xfe])),
            DatabaseValue::Bytes(vec![0xff, 0xfe])
        );
        assert_eq!(
            from_mysql_value(&Value::Date(2024, 1, 2, 3, 4, 5, 0)),
            DatabaseValue::String("2024-01-02 03:04:05".into())
        );
        assert_eq!(from_mysql_value(&Value::NULL), DatabaseValue::Null);
    }

    fn get_mysql_url() -> Option<String> {
        std::env::var("MYSQL_URL").ok()
    }

    #[tokio::test]
    #[ignore] // Run with: cargo test --features mysql -- --ignored
    async fn test_mysql_roundtrip() -> Result<()> {
        let url = match get_mysql_url() {
            Some(url) => url,
            None => {
                eprintln!("Skipping test: MYSQL_URL not set");
                return Ok(());
            }
        };

        let db = MysqlDatabase::new();
        db.connect(&url).await?;
        assert!(db.is_connected());

        let _ = db.execute("DROP TABLE IF EXISTS dbapi_my_params").await;
        db.execute(
            "CREATE TABLE dbapi_my_params (id INT AUTO_INCREMENT PRIMARY KEY, name TEXT)",
        )
        .await?;

        let affected = db
            .execute_with_params("INSERT INTO dbapi_my_params (name) VALUES (?)", &["Alice".into()])
            .await?;
        assert_eq!(affected, 1);
        assert_eq!(db.last_insert_id(None).await?, Some("1".to_string()));

        db.begin_transaction().await?;
        db.execute("INSERT INTO dbapi_my_params (name) VALUES ('Bob')").await?;
        db.rollback().await?;

        let rows = db
            .query_with_params("SELECT name FROM dbapi_my_params WHERE id = ?", &["1".into()])
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&DatabaseValue::String("Alice".into())));

        db.execute("DROP TABLE dbapi_my_params").await?;
        db.disconnect().await?;
        assert!(!db.is_connected());
        Ok(())
    }
}
