//! Database backend implementations
//!
//! Concrete implementations of the [`Database`] trait, each behind its
//! cargo feature, and a factory selecting one by [`DatabaseType`].

use crate::core::{Database, DatabaseError, DatabaseType, Result};

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "mssql")]
pub mod mssql;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

#[cfg(feature = "postgres")]
pub use postgres::PostgresDatabase;

#[cfg(feature = "mysql")]
pub use mysql::MysqlDatabase;

#[cfg(feature = "mssql")]
pub use mssql::MssqlDatabase;

/// Create an unconnected driver for `db_type`.
///
/// Fails with [`DatabaseError::UnsupportedOperation`] when the backend was
/// not compiled in.
pub fn open_driver(db_type: DatabaseType) -> Result<Box<dyn Database>> {
    match db_type {
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => Ok(Box::new(SqliteDatabase::new())),
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => Ok(Box::new(PostgresDatabase::new())),
        #[cfg(feature = "mysql")]
        DatabaseType::Mysql => Ok(Box::new(MysqlDatabase::new())),
        #[cfg(feature = "mssql")]
        DatabaseType::Mssql => Ok(Box::new(MssqlDatabase::new())),
        #[allow(unreachable_patterns)]
        other => Err(DatabaseError::unsupported(format!(
            "{} support is not enabled; build with the `{}` feature",
            other,
            feature_name(other)
        ))),
    }
}

fn feature_name(db_type: DatabaseType) -> &'static str {
    match db_type {
        DatabaseType::Sqlite => "sqlite",
        DatabaseType::Postgres => "postgres",
        DatabaseType::Mysql => "mysql",
        DatabaseType::Mssql => "mssql",
    }
}
