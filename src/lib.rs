//! # dbapi
//!
//! A structured database access layer. It turns descriptions of `SELECT`,
//! `COUNT`, `INSERT`, `UPDATE` and `DELETE` operations into parameterized
//! SQL, quotes identifiers for the target dialect, and runs the result on a
//! prepared-statement driver with bounded reconnect-on-failure.
//!
//! ## Features
//!
//! - **Structured builders**: WHERE descriptions with `=`, comparison, `LIKE`,
//!   `BETWEEN`, `IN` and their negations; every operand is a bound parameter
//! - **Dialects**: backtick quoting for MySQL and SQLite, double quotes and
//!   `$n` placeholders for PostgreSQL, brackets and `@Pn` for SQL Server
//! - **Raw queries**: positional (`?`) or named (`:name`) parameters with type
//!   hints and list expansion
//! - **Automatic reconnect**: transient connection failures are retried outside
//!   transactions, up to a configured budget
//! - **Configuration**: named connections in a TOML file with `${VAR}` expansion
//!
//! ## Supported Databases
//!
//! | Database | Feature | Driver |
//! |----------|---------|--------|
//! | SQLite | `sqlite` (default) | rusqlite, bundled |
//! | PostgreSQL | `postgres` | tokio-postgres |
//! | MySQL / MariaDB | `mysql` | mysql_async |
//! | SQL Server | `mssql` | tiberius |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dbapi::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let db = DbApi::new(
//!         ConnectionDescriptor::sqlite_memory(),
//!         Box::new(SqliteDatabase::new()),
//!     );
//!
//!     db.query(
//!         "CREATE TABLE Users (Id INTEGER PRIMARY KEY, Name TEXT, Active INTEGER)",
//!         Params::new(),
//!     )
//!     .await?;
//!
//!     db.insert("Users", &Values::new().set("Name", "Alice").set("Active", 1))
//!         .await?;
//!
//!     let rows = db
//!         .select("Users", &["Id", "Name"], &Where::new().eq("Active", 1))
//!         .await?;
//!     for row in rows {
//!         if let Some(name) = row.get("Name") {
//!             println!("User: {}", name.as_string());
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Raw queries
//!
//! ```rust,no_run
//! use dbapi::prelude::*;
//!
//! # async fn run(db: &DbApi) -> Result<()> {
//! let rows = db
//!     .query(
//!         "SELECT * FROM Users WHERE Id IN :ids AND Name <> :name",
//!         Params::new()
//!             .bind("ids", Param::list_typed([1, 2, 3], ParamType::Int))
//!             .bind("name", "root"),
//!     )
//!     .await?
//!     .into_rows();
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```
//!
//! ### Transactions
//!
//! ```rust,no_run
//! use dbapi::prelude::*;
//!
//! # async fn run(db: &DbApi) -> Result<()> {
//! db.begin_transaction().await?;
//! match db.insert("Accounts", &Values::new().set("Balance", 100)).await {
//!     Ok(_) => {
//!         db.commit().await?;
//!     }
//!     Err(e) => {
//!         db.rollback().await?;
//!         return Err(e);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! `OR` composition inside a WHERE description is not supported; use
//! [`DbApi::query`] for such statements.
//!
//! The crate logs through `tracing` under the `dbapi` target and installs no
//! subscriber.

/// Core types and traits
pub mod core;

/// Database backend implementations
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use dbapi::prelude::*;
///
/// let filter = Where::new().eq("Active", 1).is_in("Role", ["admin", "staff"]);
/// assert_eq!(filter.len(), 2);
/// ```
pub mod prelude {
    pub use crate::core::{
        ConnectionDescriptor, ConnectionState, Database, DatabaseConfig, DatabaseError,
        DatabaseResult, DatabaseRow, DatabaseType, DatabaseValue, DbApi, Operator, Param,
        ParamType, Params, QueryOutput, Result, RetryPolicy, Values, Where,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::backends::SqliteDatabase;
}

// Re-export at root level for convenience
pub use core::{
    ConnectionDescriptor, ConnectionState, Database, DatabaseConfig, DatabaseError,
    DatabaseResult, DatabaseRow, DatabaseType, DatabaseValue, DbApi, Operator, Param, ParamType,
    Params, QueryOutput, Result, RetryPolicy, Values, Where,
};

pub use backends::open_driver;

#[cfg(feature = "sqlite")]
pub use backends::SqliteDatabase;
