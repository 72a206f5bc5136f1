//! Database trait and connection descriptors
//!
//! This module defines the driver trait that all database backends must
//! implement, and the descriptor naming the connection a driver opens.

use super::database_types::DatabaseType;
use super::error::Result;
use super::value::{DatabaseResult, DatabaseValue};
use async_trait::async_trait;

/// Core database trait that all database backends must implement
///
/// The trait is object-safe so that [`DbApi`](crate::DbApi) can hold any
/// backend as `Box<dyn Database>`. Statements reaching a driver are already
/// bound: placeholders are in the dialect's positional form and `params`
/// lists one value per placeholder, in order.
#[async_trait]
pub trait Database: Send + Sync {
    /// Get the database type
    fn database_type(&self) -> DatabaseType;

    /// Connect to the database with the given connection string
    ///
    /// # Thread Safety
    /// This method uses interior mutability so it's safe to call from
    /// multiple tasks, though only one connection operation proceeds at a
    /// time.
    async fn connect(&self, connection_string: &str) -> Result<()>;

    /// Check if connected to the database
    fn is_connected(&self) -> bool;

    /// Disconnect from the database
    async fn disconnect(&self) -> Result<()>;

    /// Execute a statement without parameters and return the affected rows
    ///
    /// # Security Warning
    ///
    /// **SQL Injection Risk**: the text is executed as-is. Use
    /// `execute_with_params()` for anything containing user input.
    async fn execute(&self, query: &str) -> Result<u64>;

    /// Execute a statement without parameters and return all rows
    async fn query(&self, query: &str) -> Result<DatabaseResult>;

    /// Execute a prepared statement and return all rows
    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult>;

    /// Execute a prepared statement and return the affected rows
    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64>;

    /// Begin a transaction
    ///
    /// # Thread Safety
    /// Only one transaction can be active at a time per connection.
    async fn begin_transaction(&self) -> Result<()>;

    /// Commit the current transaction
    async fn commit(&self) -> Result<()>;

    /// Rollback the current transaction
    async fn rollback(&self) -> Result<()>;

    /// Check if currently in a transaction
    fn in_transaction(&self) -> bool;

    /// Identifier generated by the most recent insert on this connection.
    ///
    /// `sequence` names the sequence to read on backends that use them;
    /// other backends ignore it. `None` means the backend has nothing to
    /// report.
    async fn last_insert_id(&self, sequence: Option<&str>) -> Result<Option<String>>;
}

#[async_trait]
impl<D: Database + ?Sized> Database for Box<D> {
    fn database_type(&self) -> DatabaseType {
        (**self).database_type()
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        (**self).connect(connection_string).await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn disconnect(&self) -> Result<()> {
        (**self).disconnect().await
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        (**self).execute(query).await
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        (**self).query(query).await
    }

    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        (**self).query_with_params(query, params).await
    }

    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        (**self).execute_with_params(query, params).await
    }

    async fn begin_transaction(&self) -> Result<()> {
        (**self).begin_transaction().await
    }

    async fn commit(&self) -> Result<()> {
        (**self).commit().await
    }

    async fn rollback(&self) -> Result<()> {
        (**self).rollback().await
    }

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }

    async fn last_insert_id(&self, sequence: Option<&str>) -> Result<Option<String>> {
        (**self).last_insert_id(sequence).await
    }
}

/// Identity of one logical database connection
///
/// Built once and never mutated afterwards. The password is kept out of
/// `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    db_type: DatabaseType,
    host: Option<String>,
    port: Option<u16>,
    database: String,
    username: Option<String>,
    password: Option<String>,
}

impl ConnectionDescriptor {
    /// Create a descriptor for `database` on a backend of type `db_type`.
    ///
    /// For SQLite `database` is a file path or `:memory:`.
    pub fn new(db_type: DatabaseType, database: impl Into<String>) -> Self {
        Self {
            db_type,
            host: None,
            port: None,
            database: database.into(),
            username: None,
            password: None,
        }
    }

    /// In-memory SQLite database
    pub fn sqlite_memory() -> Self {
        Self::new(DatabaseType::Sqlite, ":memory:")
    }

    /// Set the database host
    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the database port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the username
    #[must_use]
    pub fn username<S: Into<String>>(mut self, username: S) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password
    #[must_use]
    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Backend type
    pub fn database_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Host name, if any
    pub fn host_name(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Port, falling back to the backend default
    pub fn port_number(&self) -> u16 {
        self.port.unwrap_or_else(|| self.db_type.default_port())
    }

    /// Database name (or SQLite path)
    pub fn database_name(&self) -> &str {
        &self.database
    }

    /// Username, if any
    pub fn user(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Build the connection string understood by the backend driver
    pub fn connection_string(&self) -> String {
        match self.db_type {
            DatabaseType::Sqlite => {
                if self.database.is_empty() {
                    ":memory:".to_string()
                } else {
                    self.database.clone()
                }
            }
            DatabaseType::Postgres => {
                let mut parts = Vec::new();
                if let Some(host) = &self.host {
                    parts.push(format!("host={}", pg_quote(host)));
                }
                parts.push(format!("port={}", self.port_number()));
                parts.push(format!("dbname={}", pg_quote(&self.database)));
                if let Some(username) = &self.username {
                    parts.push(format!("user={}", pg_quote(username)));
                }
                if let Some(password) = &self.password {
                    parts.push(format!("password={}", pg_quote(password)));
                }
                parts.join(" ")
            }
            DatabaseType::Mysql => {
                let host = self.host.as_deref().unwrap_or("localhost");
                let username = self.username.as_deref().unwrap_or("root");
                let credentials = match self.password.as_deref() {
                    Some(password) if !password.is_empty() => {
                        format!("{}:{}", url_escape(username), url_escape(password))
                    }
                    _ => url_escape(username),
                };
                format!(
                    "mysql://{}@{}:{}/{}",
                    credentials,
                    host,
                    self.port_number(),
                    url_escape(&self.database)
                )
            }
            DatabaseType::Mssql => {
                let host = self.host.as_deref().unwrap_or("localhost");
                let mut parts = vec![
                    format!("server=tcp:{},{}", ado_quote(host), self.port_number()),
                    format!("database={}", ado_quote(&self.database)),
                ];
                if let Some(username) = &self.username {
                    parts.push(format!("user={}", ado_quote(username)));
                }
                if let Some(password) = &self.password {
                    parts.push(format!("password={}", ado_quote(password)));
                }
                parts.push("encrypt=true".to_string());
                parts.push("TrustServerCertificate=true".to_string());
                parts.join(";")
            }
        }
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("db_type", &self.db_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Quote a libpq keyword value when it contains spaces or quotes
fn pg_quote(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Quote an ADO.NET connection string value when it contains separators or quotes
fn ado_quote(value: &str) -> String {
    if !value.contains([';', '\'', '"', '=']) && value.trim() == value {
        return value.to_string();
    }
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Percent-encode characters that would break the URL structure
fn url_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
