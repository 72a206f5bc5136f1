//! SQL Server database backend implementation
//!
//! One tiberius client over a tokio TCP stream. Parameterized statements run
//! through `sp_executesql` with `@P1..@Pn` placeholders; transaction control
//! goes out as plain batches so it outlives the statement scope.

use crate::core::{
    database::Database, database_types::DatabaseType, error::DatabaseError, error::Result,
    value::DatabaseResult, value::DatabaseRow, value::DatabaseValue,
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tiberius::{Client, ColumnData, Config, FromSql, Query, Row};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

type TdsClient = Client<Compat<TcpStream>>;

/// SQL Server database implementation
pub struct MssqlDatabase {
    client: Mutex<Option<TdsClient>>,
    connected: AtomicBool,
    in_transaction: AtomicBool,
}

fn map_error(e: tiberius::error::Error) -> DatabaseError {
    match e {
        tiberius::error::Error::Io { message, .. } => DatabaseError::connection_lost(message),
        other => DatabaseError::MssqlError(other),
    }
}

async fn timed<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = tiberius::Result<T>>,
{
    tokio::time::timeout(DEFAULT_OPERATION_TIMEOUT, fut)
        .await
        .map_err(|_| DatabaseError::query_timeout(DEFAULT_OPERATION_TIMEOUT.as_millis() as u64))?
        .map_err(map_error)
}

fn bind_value<'a>(query: &mut Query<'a>, value: &DatabaseValue) {
    match value {
        DatabaseValue::Null => query.bind(None::<String>),
        DatabaseValue::Bool(v) => query.bind(*v),
        DatabaseValue::Int(v) => query.bind(*v),
        DatabaseValue::Long(v) => query.bind(*v),
        DatabaseValue::Float(v) => query.bind(*v),
        DatabaseValue::Double(v) => query.bind(*v),
        // NVARCHAR; the server converts it to the column type
        DatabaseValue::String(v) => query.bind(v.clone()),
        DatabaseValue::Bytes(v) => query.bind(v.clone()),
    }
}

fn build_query<'a>(sql: &str, params: &[DatabaseValue]) -> Query<'a> {
    let mut query = Query::new(sql.to_string());
    for value in params {
        bind_value(&mut query, value);
    }
    query
}

/// Render a date or time column the way the server prints it
fn temporal_text(data: &ColumnData<'static>) -> Option<String> {
    match data {
        ColumnData::Date(_) => NaiveDate::from_sql(data)
            .ok()
            .flatten()
            .map(|d| d.format("%Y-%m-%d").to_string()),
        ColumnData::Time(_) => NaiveTime::from_sql(data)
            .ok()
            .flatten()
            .map(|t| t.format("%H:%M:%S%.f").to_string()),
        ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(data)
            .ok()
            .flatten()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.f %:z").to_string()),
        _ => NaiveDateTime::from_sql(data)
            .ok()
            .flatten()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
    }
}

fn from_column_data(data: ColumnData<'static>) -> DatabaseValue {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| DatabaseValue::Int(i32::from(v))),
        ColumnData::I16(v) => v.map(|v| DatabaseValue::Int(i32::from(v))),
        ColumnData::I32(v) => v.map(DatabaseValue::Int),
        ColumnData::I64(v) => v.map(DatabaseValue::Long),
        ColumnData::F32(v) => v.map(DatabaseValue::Float),
        ColumnData::F64(v) => v.map(DatabaseValue::Double),
        ColumnData::Bit(v) => v.map(DatabaseValue::Bool),
        ColumnData::String(v) => v.map(|s| DatabaseValue::String(s.into_owned())),
        ColumnData::Guid(v) => v.map(|g| DatabaseValue::String(g.to_string())),
        ColumnData::Binary(v) => v.map(|b| DatabaseValue::Bytes(b.into_owned())),
        ColumnData::Numeric(v) => v.map(|n| DatabaseValue::String(n.to_string())),
        ColumnData::Xml(v) => v.map(|x| DatabaseValue::String(x.into_owned().into_string())),
        other => temporal_text(&other).map(DatabaseValue::String),
    };
    value.unwrap_or(DatabaseValue::Null)
}

fn row_to_database_row(row: Row) -> DatabaseRow {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    names
        .into_iter()
        .zip(row.into_iter().map(from_column_data))
        .collect()
}

impl MssqlDatabase {
    /// Create a new, unconnected SQL Server driver
    pub fn new() -> Self {
        Self {
            client: Mutex::new(None),
            connected: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
        }
    }

    async fn run_control(&self, sql: &str) -> Result<()> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        timed(async { client.simple_query(sql).await?.into_results().await })
            .await
            .map(|_| ())
            .map_err(|e| match e {
                DatabaseError::MssqlError(err) => DatabaseError::transaction(err.to_string()),
                other => other,
            })
    }

    async fn fetch(&self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        let query = build_query(sql, params);
        let rows = timed(async { query.query(client).await?.into_first_result().await }).await?;
        Ok(rows.into_iter().map(row_to_database_row).collect())
    }

    async fn run(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        let query = build_query(sql, params);
        let result = timed(query.execute(client)).await?;
        Ok(result.total())
    }
}

impl Default for MssqlDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for MssqlDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        self.disconnect().await?;

        let connect_future = async {
            let config = Config::from_ado_string(connection_string)
                .map_err(|e| DatabaseError::config(e.to_string()))?;
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| DatabaseError::connection(e.to_string()))?;
            tcp.set_nodelay(true)?;
            let client = Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| DatabaseError::connection(e.to_string()))?;
            *self.client.lock().await = Some(client);
            Ok::<(), DatabaseError>(())
        };

        tokio::time::timeout(DEFAULT_OPERATION_TIMEOUT, connect_future)
            .await
            .map_err(|_| {
                DatabaseError::connection_timeout(DEFAULT_OPERATION_TIMEOUT.as_millis() as u64)
            })??;

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.in_transaction.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        let client = self.client.lock().await.take();
        if let Some(client) = client {
            if let Err(e) = client.close().await {
                tracing::debug!(target: "dbapi", error = %e, "SQL Server disconnect failed");
            }
        }
        Ok(())
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        self.run(query, &[]).await
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        self.fetch(query, &[]).await
    }

    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        self.fetch(query, params).await
    }

    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        self.run(query, params).await
    }

    async fn begin_transaction(&self) -> Result<()> {
        if self.in_transaction.load(Ordering::SeqCst) {
            return Err(DatabaseError::transaction("Already in a transaction"));
        }
        self.run_control("BEGIN TRANSACTION").await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        if !self.in_transaction.load(Ordering::SeqCst) {
            return Err(DatabaseError::transaction("Not in a transaction"));
        }
        self.run_control("COMMIT TRANSACTION").await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if !self.in_transaction.load(Ordering::SeqCst) {
            return Err(DatabaseError::transaction("Not in a transaction"));
        }
        self.run_control("ROLLBACK TRANSACTION").await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    async fn last_insert_id(&self, sequence: Option<&str>) -> Result<Option<String>> {
        // @@IDENTITY is session-wide, so it survives the sp_executesql scope
        let rows = match sequence {
            Some(seq) => {
                self.fetch(
                    "SELECT CAST(current_value AS NVARCHAR(40)) AS id FROM sys.sequences \
                     WHERE name = @P1",
                    &[DatabaseValue::String(seq.to_string())],
                )
                .await?
            }
            None => {
                self.fetch("SELECT CAST(@@IDENTITY AS NVARCHAR(40)) AS id", &[])
                    .await?
            }
        };

        Ok(rows.first().and_then(|row| match row.get("id") {
            Some(DatabaseValue::String(id)) => Some(id.clone()),
            _ => None,
        }))
    }
}
