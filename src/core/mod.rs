//! Core types and traits
//!
//! Value and error types, the driver trait, SQL dialects, statement builders,
//! parameter binding, configuration, and the [`DbApi`] executor.

pub mod binding;
pub mod config;
pub mod database;
pub mod database_types;
pub mod dbapi;
pub mod dialect;
pub mod error;
pub mod query_builder;
pub mod value;

// Re-export commonly used types
pub use config::{ConnectionConfig, DatabaseConfig, RetryPolicy, DEFAULT_CONNECTION};
pub use database::{ConnectionDescriptor, Database};
pub use database_types::DatabaseType;
pub use dbapi::{ConnectionState, DbApi, QueryOutput, StatementKind};
pub use dialect::{BacktickDialect, BracketDialect, Dialect, DoubleQuoteDialect, MysqlDialect};
pub use error::{DatabaseError, Result};
pub use query_builder::{
    Condition, CountBuilder, DeleteBuilder, InsertBuilder, InsertMultiBuilder, Operator,
    SelectBuilder, UpdateBuilder, Values, Where,
};
pub use value::{
    DatabaseResult, DatabaseRow, DatabaseValue, Param, ParamKey, ParamType, Params,
};
