//! Configuration file example
//!
//! Loads named connections from a TOML document, opens the driver for one
//! of them and logs what the library does through `tracing`.
//!
//! Run with: cargo run --example config_file [path/to/database.toml] [KEY]
//!
//! Without arguments an inline document with an in-memory SQLite
//! connection is used.

use dbapi::prelude::*;
use dbapi::core::DEFAULT_CONNECTION;

const INLINE_CONFIG: &str = r#"
[connections.DEFAULT]
type = "sqlite"
database = ":memory:"

[connections.REPORTING]
type = "pgsql"
host = "${DBAPI_REPORTING_HOST}"
port = "5432"
database = "reports"
username = "reader"

[retry]
auto_reconnect = true
max_retries = 2
"#;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(true)
        .init();

    println!("=== dbapi - Configuration Example ===\n");

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => DatabaseConfig::load(&path)?,
        None => {
            // The inline document references this variable
            if std::env::var("DBAPI_REPORTING_HOST").is_err() {
                std::env::set_var("DBAPI_REPORTING_HOST", "reports.internal");
            }
            DatabaseConfig::from_toml_str(INLINE_CONFIG)?
        }
    };
    let key = args.next().unwrap_or_else(|| DEFAULT_CONNECTION.to_string());

    println!("Configured connections:");
    for (name, conn) in &config.connections {
        println!("   - {} ({})", name, conn.db_type);
    }
    println!(
        "Retry policy: auto_reconnect={}, max_retries={}\n",
        config.retry.auto_reconnect, config.retry.max_retries
    );

    let db = DbApi::from_config(&config, &key)?;
    println!("Using {:?}\n", db.descriptor());

    db.query(
        "CREATE TABLE IF NOT EXISTS Notes (Id INTEGER PRIMARY KEY, Body TEXT)",
        Params::new(),
    )
    .await?;
    db.insert("Notes", &Values::new().set("Body", "configured via TOML"))
        .await?;

    let notes = db.select("Notes", &["Id", "Body"], &Where::new()).await?;
    println!("Notes table holds {} row(s)", notes.len());

    db.close().await?;
    Ok(())
}
