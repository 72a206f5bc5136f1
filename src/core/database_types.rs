//! Database type definitions
//!
//! This module defines the SQL dialects supported by the access layer.

use super::dialect::{BacktickDialect, BracketDialect, Dialect, DoubleQuoteDialect, MysqlDialect};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum DatabaseType {
    /// MySQL/MariaDB database
    #[default]
    Mysql,
    /// PostgreSQL database
    Postgres,
    /// SQLite database
    Sqlite,
    /// Microsoft SQL Server
    Mssql,
}

static BACKTICK: BacktickDialect = BacktickDialect;
static MYSQL: MysqlDialect = MysqlDialect;
static DOUBLE_QUOTE: DoubleQuoteDialect = DoubleQuoteDialect;
static BRACKET: BracketDialect = BracketDialect;

impl DatabaseType {
    /// Convert database type to string representation
    pub fn to_str(&self) -> &'static str {
        match self {
            DatabaseType::Mysql => "mysql",
            DatabaseType::Postgres => "pgsql",
            DatabaseType::Sqlite => "sqlite",
            DatabaseType::Mssql => "sqlsrv",
        }
    }

    /// The quoting and placeholder strategy of this database type
    pub fn dialect(&self) -> &'static dyn Dialect {
        match self {
            DatabaseType::Mysql => &MYSQL,
            DatabaseType::Sqlite => &BACKTICK,
            DatabaseType::Postgres => &DOUBLE_QUOTE,
            DatabaseType::Mssql => &BRACKET,
        }
    }

    /// Port used when a descriptor does not name one
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Mysql => 3306,
            DatabaseType::Postgres => 5432,
            DatabaseType::Sqlite => 0,
            DatabaseType::Mssql => 1433,
        }
    }

    /// Whether connections of this type are addressed by host and port
    pub fn is_networked(&self) -> bool {
        !matches!(self, DatabaseType::Sqlite)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DatabaseType::Mysql),
            "pgsql" | "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            "sqlite" | "sqlite3" => Ok(DatabaseType::Sqlite),
            "sqlsrv" | "mssql" | "sqlserver" => Ok(DatabaseType::Mssql),
            _ => Err(format!("Invalid database type: '{}'", s)),
        }
    }
}

impl TryFrom<String> for DatabaseType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DatabaseType> for String {
    fn from(value: DatabaseType) -> Self {
        value.to_str().to_string()
    }
}
