//! PostgreSQL database backend implementation
//!
//! Bound values arrive mostly as text. Each statement is prepared first and
//! every value is converted to the parameter type the server inferred for
//! its placeholder, so `"5"` binds as `int4` where the column is an integer.
//! Types without a native Rust mapping (timestamps, numerics, uuids, json)
//! are sent in the text format and parsed by the server.

use crate::core::{
    database::Database, database_types::DatabaseType, error::DatabaseError, error::Result,
    value::DatabaseResult, value::DatabaseRow, value::DatabaseValue,
};
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::error::Error;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{Format, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row, Statement};
use uuid::Uuid;

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL database implementation
pub struct PostgresDatabase {
    client: Arc<Mutex<Option<Client>>>,
    connected: AtomicBool,
    in_transaction: AtomicBool,
}

/// A parameter sent in the text format, whatever type the server expects
#[derive(Debug)]
struct TextParam(Option<String>);

impl ToSql for TextParam {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn Error + Sync + Send>> {
        match &self.0 {
            Some(text) => {
                out.extend_from_slice(text.as_bytes());
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    tokio_postgres::types::to_sql_checked!();
}

/// The undecoded wire bytes of a column of any type
#[derive(Debug)]
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(RawValue(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

impl From<RawValue> for DatabaseValue {
    fn from(raw: RawValue) -> Self {
        match String::from_utf8(raw.0) {
            Ok(text) => DatabaseValue::String(text),
            Err(e) => DatabaseValue::Bytes(e.into_bytes()),
        }
    }
}

fn map_error(e: tokio_postgres::Error) -> DatabaseError {
    if e.is_closed() {
        DatabaseError::connection_lost(e.to_string())
    } else {
        DatabaseError::PostgresError(e)
    }
}

async fn timed<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, tokio_postgres::Error>>,
{
    tokio::time::timeout(DEFAULT_OPERATION_TIMEOUT, fut)
        .await
        .map_err(|_| DatabaseError::query_timeout(DEFAULT_OPERATION_TIMEOUT.as_millis() as u64))?
        .map_err(map_error)
}

fn typed_null(ty: &Type) -> BoxedParam {
    if *ty == Type::BOOL {
        Box::new(None::<bool>)
    } else if *ty == Type::INT2 {
        Box::new(None::<i16>)
    } else if *ty == Type::INT4 {
        Box::new(None::<i32>)
    } else if *ty == Type::INT8 {
        Box::new(None::<i64>)
    } else if *ty == Type::FLOAT4 {
        Box::new(None::<f32>)
    } else if *ty == Type::FLOAT8 {
        Box::new(None::<f64>)
    } else if *ty == Type::BYTEA {
        Box::new(None::<Vec<u8>>)
    } else {
        Box::new(TextParam(None))
    }
}

/// Convert `value` into the Rust type matching the server parameter type `ty`
fn to_param(value: &DatabaseValue, ty: &Type) -> Result<BoxedParam> {
    if value.is_null() {
        return Ok(typed_null(ty));
    }

    let mismatch = || DatabaseError::type_mismatch(ty.name(), value.type_name());
    let integer = || value.as_long().ok_or_else(mismatch);

    let param: BoxedParam = if *ty == Type::BOOL {
        Box::new(value.as_bool().ok_or_else(mismatch)?)
    } else if *ty == Type::INT2 {
        Box::new(i16::try_from(integer()?).map_err(|_| mismatch())?)
    } else if *ty == Type::INT4 {
        Box::new(i32::try_from(integer()?).map_err(|_| mismatch())?)
    } else if *ty == Type::INT8 {
        Box::new(integer()?)
    } else if *ty == Type::FLOAT4 {
        Box::new(value.as_double().ok_or_else(mismatch)? as f32)
    } else if *ty == Type::FLOAT8 {
        Box::new(value.as_double().ok_or_else(mismatch)?)
    } else if *ty == Type::BYTEA {
        Box::new(value.as_bytes().ok_or_else(mismatch)?.to_vec())
    } else {
        let text = match value {
            DatabaseValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            other => other.as_string(),
        };
        Box::new(TextParam(Some(text)))
    };
    Ok(param)
}

fn column_value(row: &Row, idx: usize, ty: &Type) -> DatabaseValue {
    /// Decode as `T`, falling back to the raw column bytes when `T` does not fit
    fn get<'a, T>(row: &'a Row, idx: usize, wrap: fn(T) -> DatabaseValue) -> DatabaseValue
    where
        T: FromSql<'a>,
    {
        match row.try_get::<_, Option<T>>(idx) {
            Ok(Some(value)) => wrap(value),
            Ok(None) => DatabaseValue::Null,
            Err(_) => row
                .try_get::<_, Option<RawValue>>(idx)
                .ok()
                .flatten()
                .map(DatabaseValue::from)
                .unwrap_or(DatabaseValue::Null),
        }
    }

    if *ty == Type::BOOL {
        get(row, idx, DatabaseValue::Bool)
    } else if *ty == Type::INT2 {
        get::<i16>(row, idx, |v| DatabaseValue::Int(i32::from(v)))
    } else if *ty == Type::INT4 {
        get(row, idx, DatabaseValue::Int)
    } else if *ty == Type::INT8 {
        get(row, idx, DatabaseValue::Long)
    } else if *ty == Type::OID {
        get::<u32>(row, idx, |v| DatabaseValue::Long(i64::from(v)))
    } else if *ty == Type::FLOAT4 {
        get(row, idx, DatabaseValue::Float)
    } else if *ty == Type::FLOAT8 {
        get(row, idx, DatabaseValue::Double)
    } else if *ty == Type::BYTEA {
        get(row, idx, DatabaseValue::Bytes)
    } else if *ty == Type::TIMESTAMP {
        get::<NaiveDateTime>(row, idx, |v| {
            DatabaseValue::String(v.format(TIMESTAMP_FORMAT).to_string())
        })
    } else if *ty == Type::TIMESTAMPTZ {
        get::<DateTime<Utc>>(row, idx, |v| {
            DatabaseValue::String(v.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string())
        })
    } else if *ty == Type::DATE {
        get::<NaiveDate>(row, idx, |v| DatabaseValue::String(v.format("%Y-%m-%d").to_string()))
    } else if *ty == Type::TIME {
        get::<NaiveTime>(row, idx, |v| DatabaseValue::String(v.format("%H:%M:%S%.f").to_string()))
    } else if *ty == Type::NUMERIC {
        get::<Decimal>(row, idx, |v| DatabaseValue::String(v.to_string()))
    } else if *ty == Type::UUID {
        get::<Uuid>(row, idx, |v| DatabaseValue::String(v.to_string()))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        get::<serde_json::Value>(row, idx, |v| DatabaseValue::String(v.to_string()))
    } else {
        get(row, idx, DatabaseValue::String)
    }
}

impl PostgresDatabase {
    /// Create a new, unconnected PostgreSQL driver
    pub fn new() -> Self {
        Self {
            client: Arc::new(Mutex::new(None)),
            connected: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
        }
    }

    fn row_to_database_row(row: &Row) -> DatabaseRow {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, column)| (column.name().to_string(), column_value(row, idx, column.type_())))
            .collect()
    }

    async fn prepare(
        client: &Client,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<(Statement, Vec<BoxedParam>)> {
        let stmt = timed(client.prepare(query)).await?;
        if stmt.params().len() != params.len() {
            return Err(DatabaseError::invalid_params(format!(
                "statement expects {} parameters, got {}",
                stmt.params().len(),
                params.len()
            )));
        }

        let converted = stmt
            .params()
            .iter()
            .zip(params)
            .map(|(ty, value)| to_param(value, ty))
            .collect::<Result<Vec<_>>>()?;
        Ok((stmt, converted))
    }

    async fn run_control(&self, sql: &str) -> Result<()> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        timed(client.batch_execute(sql))
            .await
            .map_err(|e| match e {
                DatabaseError::PostgresError(pg) => DatabaseError::transaction(pg.to_string()),
                other => other,
            })
    }
}

impl Default for PostgresDatabase {
    fn default() -> Self {
        Self::new()
    }
}

fn as_refs(params: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait]
impl Database for PostgresDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        self.disconnect().await?;

        let connect_future = async {
            let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
                .await
                .map_err(|e| DatabaseError::connection(e.to_string()))?;

            // The connection object drives the socket; it finishes when the client is dropped
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(target: "dbapi", error = %e, "PostgreSQL connection error");
                }
            });

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
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        // A busy client is in use and therefore still open
        self.client
            .try_lock()
            .map(|client| client.as_ref().map_or(false, |c| !c.is_closed()))
            .unwrap_or(true)
    }

    async fn disconnect(&self) -> Result<()> {
        self.in_transaction.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        *self.client.lock().await = None;
        Ok(())
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        timed(client.execute(query, &[])).await
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        let rows = timed(client.query(query, &[])).await?;
        Ok(rows.iter().map(Self::row_to_database_row).collect())
    }

    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        let (stmt, converted) = Self::prepare(client, query, params).await?;
        let rows = timed(client.query(&stmt, &as_refs(&converted))).await?;
        Ok(rows.iter().map(Self::row_to_database_row).collect())
    }

    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        let (stmt, converted) = Self::prepare(client, query, params).await?;
        timed(client.execute(&stmt, &as_refs(&converted))).await
    }

    async fn begin_transaction(&self) -> Result<()> {
        if self.in_transaction.load(Ordering::SeqCst) {
            return Err(DatabaseError::transaction("Already in a transaction"));
        }
        self.run_control("BEGIN").await?;
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

    async fn last_insert_id(&self, sequence: Option<&str>) -> Result<Option<String>> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        let result = match sequence {
            Some(seq) => {
                timed(client.query_one(
                    "SELECT currval(CAST($1 AS text)::regclass)::text",
                    &[&seq],
                ))
                .await
            }
            None => timed(client.query_one("SELECT lastval()::text", &[])).await,
        };

        match result {
            Ok(row) => Ok(row.try_get::<_, Option<String>>(0).ok().flatten()),
            // No sequence has been used in this session yet
            Err(DatabaseError::PostgresError(e))
                if e.code() == Some(&SqlState::OBJECT_NOT_IN_PREREQUISITE_STATE) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_param_accepts_text_for_integers() {
        assert!(to_param(&"42".into(), &Type::INT4).is_ok());
        assert!(to_param(&"42".into(), &Type::INT8).is_ok());
        assert!(to_param(&"1".into(), &Type::BOOL).is_ok());
        assert!(to_param(&DatabaseValue::Null, &Type::INT4).is_ok());
    }

    #[test]
    fn test_to_param_rejects_garbage() {
        assert!(matches!(
            to_param(&"abc".into(), &Type::INT4),
            Err(DatabaseError::TypeMismatch { .. })
        ));
        assert!(matches!(
            to_param(&"70000".into(), &Type::INT2),
            Err(DatabaseError::TypeMismatch { .. })
        ));
        assert!(to_param(&"maybe".into(), &Type::BOOL).is_err());
    }

    #[test]
    fn test_to_param_sends_text_for_types_without_native_mapping() {
        for ty in [Type::TIMESTAMP, Type::DATE, Type::NUMERIC, Type::UUID, Type::JSONB] {
            let param = to_param(&"2024-01-01".into(), &ty).unwrap();
            assert!(matches!(param.encode_format(&ty), Format::Text));

            let mut buf = BytesMut::new();
            let is_null = param.to_sql_checked(&ty, &mut buf).unwrap();
            assert!(matches!(is_null, IsNull::No));
            assert_eq!(&buf[..], b"2024-01-01");
        }
    }

    #[test]
    fn test_typed_null_for_text_format_types() {
        let param = to_param(&DatabaseValue::Null, &Type::TIMESTAMPTZ).unwrap();
        let mut buf = BytesMut::new();
        let is_null = param.to_sql_checked(&Type::TIMESTAMPTZ, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_raw_value_fallback() {
        assert!(<RawValue as FromSql>::accepts(&Type::INTERVAL));

        let raw = RawValue::from_sql(&Type::TEXT, b"happy").unwrap();
        assert_eq!(DatabaseValue::from(raw), DatabaseValue::String("happy".into()));

        let raw = RawValue::from_sql(&Type::INTERVAL, &[0xff, 0x00, 0x10]).unwrap();
        assert_eq!(DatabaseValue::from(raw), DatabaseValue::Bytes(vec![0xff, 0x00, 0x10]));
    }

    fn get_postgres_url() -> Option<String> {
        std::env::var("POSTGRES_URL").ok()
    }

    #[tokio::test]
    #[ignore] // Run with: cargo test --features postgres -- --ignored
    async fn test_postgres_connect() {
        let url = match get_postgres_url() {
            Some(url) => url,
            None => {
                eprintln!("Skipping test: POSTGRES_URL not set");
                return;
            }
        };

        let db = PostgresDatabase::new();
        assert!(db.connect(&url).await.is_ok());
        assert!(db.is_connected());
        assert!(db.disconnect().await.is_ok());
        assert!(!db.is_connected());
    }

    #[tokio::test]
    #[ignore] // Run with: cargo test --features postgres -- --ignored
    async fn test_postgres_text_params_and_last_insert_id() -> Result<()> {
        let url = match get_postgres_url() {
            Some(url) => url,
            None => {
                eprintln!("Skipping test: POSTGRES_URL not set");
                return Ok(());
            }
        };

        let db = PostgresDatabase::new();
        db.connect(&url).await?;

        let _ = db.execute("DROP TABLE IF EXISTS dbapi_pg_params").await;
        db.execute("CREATE TABLE dbapi_pg_params (id SERIAL PRIMARY KEY, name TEXT, active BOOLEAN)")
            .await?;

        let affected = db
            .execute_with_params(
                "INSERT INTO dbapi_pg_params (name, active) VALUES ($1, $2)",
                &["Alice".into(), "1".into()],
            )
            .await?;
        assert_eq!(affected, 1);
        assert_eq!(db.last_insert_id(None).await?, Some("1".to_string()));
        assert_eq!(
            db.last_insert_id(Some("dbapi_pg_params_id_seq")).await?,
            Some("1".to_string())
        );

        let rows = db
            .query_with_params("SELECT name FROM dbapi_pg_params WHERE id = $1", &["1".into()])
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&DatabaseValue::String("Alice".into())));

        db.execute("DROP TABLE dbapi_pg_params").await?;
        Ok(())
    }

    #[tokio::test]
    #[ignore] // Run with: cargo test --features postgres -- --ignored
    async fn test_postgres_transaction() -> Result<()> {
        let url = match get_postgres_url() {
            Some(url) => url,
            None => {
                eprintln!("Skipping test: POSTGRES_URL not set");
                return Ok(());
            }
        };

        let db = PostgresDatabase::new();
        db.connect(&url).await?;

        let _ = db.execute("DROP TABLE IF EXISTS dbapi_pg_tx").await;
        db.execute("CREATE TABLE dbapi_pg_tx (id SERIAL PRIMARY KEY, name TEXT)")
            .await?;

        db.begin_transaction().await?;
        assert!(db.in_transaction());
        db.execute("INSERT INTO dbapi_pg_tx (name) VALUES ('Alice')").await?;
        db.commit().await?;
        assert!(!db.in_transaction());

        db.begin_transaction().await?;
        db.execute("INSERT INTO dbapi_pg_tx (name) VALUES ('Bob')").await?;
        db.rollback().await?;

        let results = db.query("SELECT * FROM dbapi_pg_tx").await?;
        assert_eq!(results.len(), 1);

        db.execute("DROP TABLE dbapi_pg_tx").await?;
        Ok(())
    }

    #[tokio::test]
    #[ignore] // Run with: cargo test --features postgres -- --ignored
    async fn test_postgres_temporal_numeric_uuid_json_round_trip() -> Result<()> {
        let url = match get_postgres_url() {
            Some(url) => url,
            None => {
                eprintln!("Skipping test: POSTGRES_URL not set");
                return Ok(());
            }
        };

        let db = PostgresDatabase::new();
        db.connect(&url).await?;

        let _ = db.execute("DROP TABLE IF EXISTS dbapi_pg_types").await;
        db.execute(
            "CREATE TABLE dbapi_pg_types (id SERIAL PRIMARY KEY, created_at TIMESTAMP, \
             day DATE, amount NUMERIC(10, 2), ref UUID, doc JSONB, missing TIMESTAMP)",
        )
        .await?;

        db.execute_with_params(
            "INSERT INTO dbapi_pg_types (created_at, day, amount, ref, doc, missing) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                "2024-01-01 12:30:00".into(),
                "2024-02-29".into(),
                "12.50".into(),
                "67e55044-10b1-426f-9247-bb680e5fe0c8".into(),
                r#"{"a": 1}"#.into(),
                DatabaseValue::Null,
            ],
        )
        .await?;

        let rows = db
            .query_with_params(
                "SELECT created_at, day, amount, ref, doc, missing FROM dbapi_pg_types \
                 WHERE created_at = $1",
                &["2024-01-01 12:30:00".into()],
            )
            .await?;
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("created_at"), Some(&DatabaseValue::String("2024-01-01 12:30:00".into())));
        assert_eq!(row.get("day"), Some(&DatabaseValue::String("2024-02-29".into())));
        assert_eq!(row.get("amount"), Some(&DatabaseValue::String("12.50".into())));
        assert_eq!(
            row.get("ref"),
            Some(&DatabaseValue::String("67e55044-10b1-426f-9247-bb680e5fe0c8".into()))
        );
        assert_eq!(row.get("doc"), Some(&DatabaseValue::String(r#"{"a":1}"#.into())));
        assert_eq!(row.get("missing"), Some(&DatabaseValue::Null));

        db.execute("DROP TABLE dbapi_pg_types").await?;
        Ok(())
    }
}
