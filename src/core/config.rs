//! TOML configuration
//!
//! Named connection descriptors and the reconnect policy, loaded from a TOML
//! document. String fields may reference environment variables as `${VAR}`.

use super::database::ConnectionDescriptor;
use super::database_types::DatabaseType;
use super::error::{DatabaseError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Key used when no connection is named explicitly
pub const DEFAULT_CONNECTION: &str = "DEFAULT";

/// Error-text fragments that mark a dropped connection
pub const DEFAULT_TRANSIENT_SIGNATURES: &[&str] = &[
    "server has gone away",
    "lost connection",
    "connection reset",
    "broken pipe",
    "connection closed",
];

/// Reconnect-on-failure policy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Whether transient failures trigger a reconnect at all
    pub auto_reconnect: bool,
    /// Reconnect attempts allowed per operation
    pub max_retries: u32,
    /// Case-insensitive fragments of error text treated as transient
    pub transient_signatures: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_retries: 3,
            transient_signatures: DEFAULT_TRANSIENT_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never reconnects
    pub fn disabled() -> Self {
        Self {
            auto_reconnect: false,
            ..Self::default()
        }
    }

    /// Same policy with a different attempt budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(i64),
    Text(String),
}

/// One `[connections.KEY]` table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionConfig {
    #[serde(rename = "type")]
    pub db_type: DatabaseType,
    pub host: Option<String>,
    port: Option<PortValue>,
    #[serde(default)]
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectionConfig {
    /// Port as configured, if any
    pub fn port(&self) -> Result<Option<u16>> {
        let parsed = match &self.port {
            None => return Ok(None),
            Some(PortValue::Number(n)) => u16::try_from(*n).ok(),
            Some(PortValue::Text(s)) if s.trim().is_empty() => return Ok(None),
            Some(PortValue::Text(s)) => s.trim().parse::<u16>().ok(),
        };
        parsed.map(Some).ok_or_else(|| {
            DatabaseError::config(format!("invalid port {:?}", self.port))
        })
    }

    fn expand_env(&mut self) -> Result<()> {
        for field in [&mut self.host, &mut self.username, &mut self.password]
            .into_iter()
            .flatten()
        {
            *field = expand_env_vars(field)?;
        }
        self.database = expand_env_vars(&self.database)?;
        if let Some(PortValue::Text(s)) = &mut self.port {
            *s = expand_env_vars(s)?;
        }
        Ok(())
    }

    fn validate(&self, key: &str) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(DatabaseError::config(format!(
                "connections.{}.database must not be empty",
                key
            )));
        }
        if self.db_type.is_networked()
            && self.host.as_deref().map_or(true, |h| h.trim().is_empty())
        {
            return Err(DatabaseError::config(format!(
                "connections.{}.host is required for {}",
                key, self.db_type
            )));
        }
        self.port().map_err(|e| {
            DatabaseError::config(format!("connections.{}: {}", key, e))
        })?;
        Ok(())
    }

    /// Build the descriptor this table describes
    pub fn descriptor(&self) -> Result<ConnectionDescriptor> {
        let mut desc = ConnectionDescriptor::new(self.db_type, self.database.clone());
        if let Some(host) = &self.host {
            desc = desc.host(host.clone());
        }
        if let Some(port) = self.port()? {
            desc = desc.port(port);
        }
        if let Some(username) = &self.username {
            desc = desc.username(username.clone());
        }
        if let Some(password) = &self.password {
            desc = desc.password(password.clone());
        }
        Ok(desc)
    }
}

/// Parsed configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl DatabaseConfig {
    /// Read, expand and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DatabaseError::config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse, expand and validate a configuration document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: DatabaseConfig = toml::from_str(raw)
            .map_err(|e| DatabaseError::config(format!("failed to parse config: {}", e)))?;
        config.expand_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Descriptor of the connection named `key`
    pub fn descriptor(&self, key: &str) -> Result<ConnectionDescriptor> {
        self.connections
            .get(key)
            .ok_or_else(|| DatabaseError::config(format!("unknown connection key: {}", key)))?
            .descriptor()
    }

    fn expand_env(&mut self) -> Result<()> {
        for conn in self.connections.values_mut() {
            conn.expand_env()?;
        }
        for sig in &mut self.retry.transient_signatures {
            *sig = expand_env_vars(sig)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (key, conn) in &self.connections {
            conn.validate(key)?;
        }
        Ok(())
    }
}

fn expand_env_vars(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();

            let mut key = String::new();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                key.push(ch);
            }

            if !closed {
                return Err(DatabaseError::config(format!(
                    "unterminated env var reference: ${{{}",
                    key
                )));
            }
            if key.is_empty() {
                return Err(DatabaseError::config("invalid env var reference: ${}"));
            }

            let value = std::env::var(&key).map_err(|_| {
                DatabaseError::config(format!("missing env var for config expansion: {}", key))
            })?;
            out.push_str(&value);
            continue;
        }

        out.push(c);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[connections.DEFAULT]
type = "mysql"
host = "127.0.0.1"
port = "3306"
database = "default_db"
username = "root"
password = "secret"

[connections.ANALYTICS]
type = "pgsql"
host = "analytics.local"
port = 6543
database = "events"

[connections.LOCAL]
type = "sqlite"
database = ":memory:"

[retry]
max_retries = 5
"#;

    #[test]
    fn test_parse_connections() {
        let config = DatabaseConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.connections.len(), 3);

        let desc = config.descriptor(DEFAULT_CONNECTION).unwrap();
        assert_eq!(desc.database_type(), DatabaseType::Mysql);
        assert_eq!(desc.port_number(), 3306);
        assert_eq!(desc.host_name(), Some("127.0.0.1"));

        let desc = config.descriptor("ANALYTICS").unwrap();
        assert_eq!(desc.database_type(), DatabaseType::Postgres);
        assert_eq!(desc.port_number(), 6543);

        let desc = config.descriptor("LOCAL").unwrap();
        assert_eq!(desc.connection_string(), ":memory:");
    }

    #[test]
    fn test_retry_defaults_are_merged() {
        let config = DatabaseConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.retry.auto_reconnect);
        assert_eq!(config.retry.max_retries, 5);
        assert!(config
            .retry
            .transient_signatures
            .iter()
            .any(|s| s == "server has gone away"));

        let config = DatabaseConfig::from_toml_str("").unwrap();
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_sqlsrv_connection() {
        let doc = r#"
[connections.MSSQL]
type = "sqlsrv"
host = "10.99.251.2"
port = 1433
database = "master"
username = "SA"
password = "pw"
"#;
        let config = DatabaseConfig::from_toml_str(doc).unwrap();
        let desc = config.descriptor("MSSQL").unwrap();
        assert_eq!(desc.database_type(), DatabaseType::Mssql);
        assert_eq!(desc.port_number(), 1433);
        assert!(desc
            .connection_string()
            .starts_with("server=tcp:10.99.251.2,1433;database=master;"));
    }

    #[test]
    fn test_unknown_key() {
        let config = DatabaseConfig::from_toml_str(SAMPLE).unwrap();
        assert!(matches!(
            config.descriptor("MISSING"),
            Err(DatabaseError::Config(_))
        ));
    }

    #[test]
    fn test_validation() {
        let missing_host = r#"
[connections.DEFAULT]
type = "pgsql"
database = "x"
"#;
        assert!(DatabaseConfig::from_toml_str(missing_host).is_err());

        let bad_port = r#"
[connections.DEFAULT]
type = "mysql"
host = "h"
port = "70000"
database = "x"
"#;
        assert!(DatabaseConfig::from_toml_str(bad_port).is_err());

        let bad_type = r#"
[connections.DEFAULT]
type = "oracle"
database = "x"
"#;
        assert!(DatabaseConfig::from_toml_str(bad_type).is_err());

        let missing_db = r#"
[connections.DEFAULT]
type = "sqlite"
"#;
        assert!(DatabaseConfig::from_toml_str(missing_db).is_err());
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("DBAPI_CONFIG_TEST_PASSWORD", "from-env");
        let raw = r#"
[connections.DEFAULT]
type = "mysql"
host = "h"
database = "x"
password = "${DBAPI_CONFIG_TEST_PASSWORD}"
"#;
        let config = DatabaseConfig::from_toml_str(raw).unwrap();
        assert_eq!(
            config.connections["DEFAULT"].password.as_deref(),
            Some("from-env")
        );

        assert_eq!(expand_env_vars("plain $text").unwrap(), "plain $text");
        assert!(expand_env_vars("${DBAPI_CONFIG_TEST_UNSET_VARIABLE}").is_err());
        assert!(expand_env_vars("${unterminated").is_err());
        assert!(expand_env_vars("${}").is_err());
    }
}
