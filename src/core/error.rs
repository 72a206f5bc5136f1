//! Error types for the database access layer
//!
//! This module defines all error types that can occur while building,
//! binding, or executing statements.

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Error types for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Connection error (generic)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The server dropped an established connection
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// Query execution error
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Query timeout
    #[error("Query timeout after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// Type conversion error
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Parameters do not line up with the placeholders of a statement
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// `IN` / `NOT IN` condition with no operands
    #[error("Empty IN list for column `{0}`")]
    EmptyInList(String),

    /// Operator text that is not part of the supported set
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    /// Column not found in a result row
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unsupported operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// PostgreSQL error
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    PostgresError(#[from] tokio_postgres::Error),

    /// MySQL error
    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    MysqlError(String),

    /// SQL Server error
    #[cfg(feature = "mssql")]
    #[error("SQL Server error: {0}")]
    MssqlError(#[from] tiberius::error::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create a new connection error (generic)
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::ConnectionError(msg.into())
    }

    /// Create a connection lost error
    pub fn connection_lost<S: Into<String>>(msg: S) -> Self {
        DatabaseError::ConnectionLost(msg.into())
    }

    /// Create a connection timeout error
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        DatabaseError::ConnectionTimeout { timeout_ms }
    }

    /// Create a new query error
    pub fn query<S: Into<String>>(msg: S) -> Self {
        DatabaseError::QueryError(msg.into())
    }

    /// Create a query timeout error
    pub fn query_timeout(timeout_ms: u64) -> Self {
        DatabaseError::QueryTimeout { timeout_ms }
    }

    /// Create a new type mismatch error
    pub fn type_mismatch(expected: &str, actual: &str) -> Self {
        DatabaseError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create an invalid parameters error
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        DatabaseError::InvalidParameters(msg.into())
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionError(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Config(msg.into())
    }

    /// Create a new unsupported operation error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        DatabaseError::UnsupportedOperation(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// Whether this error means the connection went away and a reconnect may
    /// recover it.
    ///
    /// `ConnectionLost` always qualifies. Any other error qualifies when its
    /// rendered message contains one of `signatures` (case-insensitive).
    pub fn is_transient(&self, signatures: &[String]) -> bool {
        if matches!(self, DatabaseError::ConnectionLost(_)) {
            return true;
        }

        let message = self.to_string().to_lowercase();
        signatures
            .iter()
            .any(|sig| !sig.is_empty() && message.contains(&sig.to_lowercase()))
    }
}
