//! `DbApi`: structured database access over one driver connection
//!
//! A [`DbApi`] owns a driver and the descriptor it connects with. It builds
//! statements, binds their parameters for the active dialect, connects
//! lazily, and reconnects when a statement fails because the connection went
//! away.

use super::binding::{bind, BoundStatement};
use super::config::{DatabaseConfig, RetryPolicy};
use super::database::{ConnectionDescriptor, Database};
use super::dialect::Dialect;
use super::error::{DatabaseError, Result};
use super::query_builder::{
    CountBuilder, DeleteBuilder, InsertBuilder, InsertMultiBuilder, SelectBuilder, Statement,
    UpdateBuilder, Values, Where, COUNT_COLUMN,
};
use super::value::{DatabaseResult, DatabaseValue, Params};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Connection state of a [`DbApi`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No physical connection; the next operation connects
    Disconnected,
    /// Connected and usable
    Connected,
    /// The last operation used up its reconnect budget
    Exhausted,
}

/// How the result of a statement is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Returns rows (`SELECT`, `SHOW`, `CALL`, `DESCRIBE`, `DESC`, `EXPLAIN`, `PRAGMA`)
    Read,
    /// Returns an affected-row count (`INSERT`, `UPDATE`, `DELETE`, `REPLACE`)
    Write,
    /// Anything else; reports success only
    Other,
}

impl StatementKind {
    /// Classify `sql` by its leading keyword, case-insensitively.
    ///
    /// Leading `--` and `/* */` comments are skipped.
    pub fn classify(sql: &str) -> Self {
        let keyword: String = skip_leading_comments(sql)
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();

        match keyword.as_str() {
            "select" | "show" | "call" | "describe" | "desc" | "explain" | "pragma" => {
                StatementKind::Read
            }
            "insert" | "update" | "delete" | "replace" => StatementKind::Write,
            _ => StatementKind::Other,
        }
    }
}

fn skip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.find('\n').map_or("", |p| &after[p + 1..]).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |p| &after[p + 2..]).trim_start();
        } else {
            return rest;
        }
    }
}

/// Result of [`DbApi::query`]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// All rows of a read-like statement
    Rows(DatabaseResult),
    /// Affected rows of a write-like statement
    Affected(u64),
    /// Success flag of any other statement
    Executed(bool),
}

impl QueryOutput {
    /// Rows, if the statement returned any
    pub fn rows(&self) -> Option<&DatabaseResult> {
        match self {
            QueryOutput::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Consume into rows; non-read results yield no rows
    pub fn into_rows(self) -> DatabaseResult {
        match self {
            QueryOutput::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    /// Affected-row count, if the statement was write-like
    pub fn affected(&self) -> Option<u64> {
        match self {
            QueryOutput::Affected(n) => Some(*n),
            _ => None,
        }
    }
}

/// Structured access to one database connection
///
/// # Example
///
/// ```rust,no_run
/// use dbapi::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let config = DatabaseConfig::load("database.toml")?;
///     let db = DbApi::from_config(&config, "DEFAULT")?;
///
///     let users = db
///         .select("Users", &["Id", "Name"], &Where::new().eq("Active", 1))
///         .await?;
///     println!("{} active users", users.len());
///     Ok(())
/// }
/// ```
pub struct DbApi {
    descriptor: ConnectionDescriptor,
    driver: Box<dyn Database>,
    dialect: &'static dyn Dialect,
    policy: RetryPolicy,
    state: Mutex<ConnectionState>,
    query_count: AtomicU64,
    reconnect_count: AtomicU64,
}

impl DbApi {
    /// Wrap `driver`, which will connect with `descriptor`, using the default retry policy
    pub fn new(descriptor: ConnectionDescriptor, driver: Box<dyn Database>) -> Self {
        Self::with_policy(descriptor, driver, RetryPolicy::default())
    }

    /// Wrap `driver` with an explicit retry policy
    pub fn with_policy(
        descriptor: ConnectionDescriptor,
        driver: Box<dyn Database>,
        policy: RetryPolicy,
    ) -> Self {
        let dialect = descriptor.database_type().dialect();
        Self {
            descriptor,
            driver,
            dialect,
            policy,
            state: Mutex::new(ConnectionState::Disconnected),
            query_count: AtomicU64::new(0),
            reconnect_count: AtomicU64::new(0),
        }
    }

    /// Resolve connection `key` from `config` and open the matching driver
    pub fn from_config(config: &DatabaseConfig, key: &str) -> Result<Self> {
        let descriptor = config.descriptor(key)?;
        let driver = crate::backends::open_driver(descriptor.database_type())?;
        Ok(Self::with_policy(descriptor, driver, config.retry.clone()))
    }

    /// Use `dialect` instead of the one implied by the descriptor
    #[must_use]
    pub fn with_dialect(mut self, dialect: &'static dyn Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Descriptor this handle connects with
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Active dialect
    pub fn dialect(&self) -> &'static dyn Dialect {
        self.dialect
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Statements sent to the driver so far, retries included
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }

    /// Reconnects performed over the lifetime of this handle
    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.state() == ConnectionState::Connected && self.driver.is_connected() {
            return Ok(());
        }

        if self.driver.is_connected() {
            if let Err(e) = self.driver.disconnect().await {
                tracing::debug!(target: "dbapi", error = %e, "stale connection did not close cleanly");
            }
        }

        match self.driver.connect(&self.descriptor.connection_string()).await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                tracing::info!(
                    target: "dbapi",
                    db_type = %self.descriptor.database_type(),
                    database = %self.descriptor.database_name(),
                    "connected"
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                tracing::error!(
                    target: "dbapi",
                    db_type = %self.descriptor.database_type(),
                    database = %self.descriptor.database_name(),
                    error = %e,
                    "connection failed"
                );
                Err(e)
            }
        }
    }

    fn can_retry(&self, err: &DatabaseError) -> bool {
        self.policy.auto_reconnect
            && !self.driver.in_transaction()
            && err.is_transient(&self.policy.transient_signatures)
    }

    async fn dispatch(&self, kind: StatementKind, bound: &BoundStatement) -> Result<QueryOutput> {
        let sql = bound.sql.as_str();
        let values: &[DatabaseValue] = &bound.values;

        match kind {
            StatementKind::Read if values.is_empty() => {
                self.driver.query(sql).await.map(QueryOutput::Rows)
            }
            StatementKind::Read => self
                .driver
                .query_with_params(sql, values)
                .await
                .map(QueryOutput::Rows),
            StatementKind::Write | StatementKind::Other => {
                let affected = if values.is_empty() {
                    self.driver.execute(sql).await?
                } else {
                    self.driver.execute_with_params(sql, values).await?
                };
                Ok(if kind == StatementKind::Write {
                    QueryOutput::Affected(affected)
                } else {
                    QueryOutput::Executed(true)
                })
            }
        }
    }

    /// Run a bound statement, reconnecting on transient failures.
    ///
    /// The attempt counter starts at zero for every call.
    async fn run(&self, kind: StatementKind, bound: &BoundStatement) -> Result<QueryOutput> {
        let mut attempt = 0u32;

        loop {
            self.ensure_connected().await?;
            self.query_count.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                target: "dbapi",
                sql = %bound.sql,
                params = bound.values.len(),
                kind = ?kind,
                "executing statement"
            );

            let err = match self.dispatch(kind, bound).await {
                Ok(output) => return Ok(output),
                Err(e) => e,
            };

            tracing::error!(target: "dbapi", sql = %bound.sql, error = %err, "statement failed");

            if !self.can_retry(&err) {
                return Err(err);
            }
            if attempt >= self.policy.max_retries {
                self.set_state(ConnectionState::Exhausted);
                tracing::error!(
                    target: "dbapi",
                    max_retries = self.policy.max_retries,
                    "reconnect budget exhausted"
                );
                return Err(err);
            }

            attempt += 1;
            self.reconnect_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target: "dbapi",
                attempt,
                max_retries = self.policy.max_retries,
                "connection lost, reconnecting"
            );

            if let Err(e) = self.driver.disconnect().await {
                tracing::debug!(target: "dbapi", error = %e, "disconnect before retry failed");
            }
            self.set_state(ConnectionState::Disconnected);
        }
    }

    async fn run_statement(&self, kind: StatementKind, stmt: &Statement) -> Result<QueryOutput> {
        let bound = bind(&stmt.sql, &stmt.params, self.dialect)?;
        self.run(kind, &bound).await
    }

    /// Run raw SQL with parameters.
    ///
    /// Read-like statements return their rows, write-like statements their
    /// affected-row count, anything else `Executed(true)`. Parameters are
    /// either all positional (`?`) or all named (`:name`).
    pub async fn query(&self, sql: &str, params: Params) -> Result<QueryOutput> {
        let bound = bind(sql, &params, self.dialect)?;
        self.run(StatementKind::classify(sql), &bound).await
    }

    /// Run a prepared SELECT builder and return its rows
    pub async fn select_with(&self, builder: &SelectBuilder) -> Result<DatabaseResult> {
        let stmt = builder.build(self.dialect)?;
        Ok(self.run_statement(StatementKind::Read, &stmt).await?.into_rows())
    }

    /// Select `columns` (all when empty) of the rows of `table` matching `filter`
    pub async fn select(
        &self,
        table: &str,
        columns: &[&str],
        filter: &Where,
    ) -> Result<DatabaseResult> {
        let builder = SelectBuilder::new(table)
            .columns(columns)
            .filter(filter.clone());
        self.select_with(&builder).await
    }

    /// Number of rows of `table` matching `filter`
    pub async fn count(&self, table: &str, filter: &Where) -> Result<i64> {
        let stmt = CountBuilder::new(table)
            .filter(filter.clone())
            .build(self.dialect)?;
        let rows = self.run_statement(StatementKind::Read, &stmt).await?.into_rows();

        rows.first()
            .and_then(|row| row.get(COUNT_COLUMN))
            .and_then(DatabaseValue::as_long)
            .ok_or_else(|| DatabaseError::query(format!("COUNT on `{}` returned no value", table)))
    }

    /// Insert one row; returns the affected-row count
    pub async fn insert(&self, table: &str, values: &Values) -> Result<u64> {
        let stmt = InsertBuilder::new(table)
            .values(values.clone())
            .build(self.dialect)?;
        Ok(self
            .run_statement(StatementKind::Write, &stmt)
            .await?
            .affected()
            .unwrap_or(0))
    }

    /// Insert several rows with one statement.
    ///
    /// Returns `false` without touching the database when `rows` is empty.
    pub async fn insert_multi(&self, table: &str, rows: &[Values]) -> Result<bool> {
        if rows.is_empty() {
            return Ok(false);
        }

        let stmt = InsertMultiBuilder::new(table)
            .rows(rows.iter().cloned())
            .build(self.dialect)?;
        let affected = self
            .run_statement(StatementKind::Write, &stmt)
            .await?
            .affected()
            .unwrap_or(0);
        Ok(affected > 0)
    }

    /// Update the rows of `table` matching `filter`; an empty `filter` matches all rows.
    ///
    /// Returns 0 without touching the database when `values` is empty.
    pub async fn update(&self, table: &str, values: &Values, filter: &Where) -> Result<u64> {
        if values.is_empty() {
            return Ok(0);
        }

        let stmt = UpdateBuilder::new(table)
            .values(values.clone())
            .filter(filter.clone())
            .build(self.dialect)?;
        Ok(self
            .run_statement(StatementKind::Write, &stmt)
            .await?
            .affected()
            .unwrap_or(0))
    }

    /// Delete the rows of `table` matching `filter`.
    ///
    /// An empty `filter` deletes nothing and returns 0.
    pub async fn delete(&self, table: &str, filter: &Where) -> Result<u64> {
        if filter.is_empty() {
            tracing::info!(target: "dbapi", table, "refusing DELETE without conditions");
            return Ok(0);
        }

        let stmt = DeleteBuilder::new(table)
            .filter(filter.clone())
            .build(self.dialect)?;
        Ok(self
            .run_statement(StatementKind::Write, &stmt)
            .await?
            .affected()
            .unwrap_or(0))
    }

    /// Identifier generated by the last insert, if the driver reports one
    pub async fn last_insert_id(&self, sequence: Option<&str>) -> Result<Option<String>> {
        if !self.driver.is_connected() {
            return Ok(None);
        }
        self.driver.last_insert_id(sequence).await
    }

    /// Open a transaction; `false` if one is already open
    pub async fn begin_transaction(&self) -> Result<bool> {
        self.ensure_connected().await?;
        if self.driver.in_transaction() {
            return Ok(false);
        }
        self.driver.begin_transaction().await?;
        Ok(true)
    }

    /// Commit the open transaction; `false` if none is open
    pub async fn commit(&self) -> Result<bool> {
        if !self.driver.in_transaction() {
            return Ok(false);
        }
        self.driver.commit().await?;
        Ok(true)
    }

    /// Roll back the open transaction; `false` if none is open
    pub async fn rollback(&self) -> Result<bool> {
        if !self.driver.in_transaction() {
            return Ok(false);
        }
        self.driver.rollback().await?;
        Ok(true)
    }

    /// Whether a transaction is open
    pub fn in_transaction(&self) -> bool {
        self.driver.in_transaction()
    }

    /// Drop the physical connection; the next operation reconnects
    pub async fn close(&self) -> Result<()> {
        if self.driver.is_connected() {
            self.driver.disconnect().await?;
            tracing::info!(target: "dbapi", database = %self.descriptor.database_name(), "closed");
        }
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }
}

impl std::fmt::Debug for DbApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbApi")
            .field("descriptor", &self.descriptor)
            .field("dialect", &self.dialect.name())
            .field("state", &self.state())
            .field("query_count", &self.query_count())
            .finish()
    }
}
