//! Sink configuration
//!
//! ```yaml
//! host: db.internal
//! port: 5432
//! database: logs
//! username: writer
//! password: secret
//! table: events
//! columns: "a, b"
//! key_names: a,b
//! format: raw
//! force_encoding: UTF-8
//! ```

use pglog_rdbc::connection::ConnectionConfig;
use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::error::{Error, Result};

/// Database password.
///
/// Redacted in `Debug`/`Display` and serialized as `***REDACTED***`, so a
/// dumped configuration never carries it.
#[derive(Clone)]
pub struct Password(SecretString);

impl Password {
    /// The clear-text value, for the connection layer only
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether no password is set
    pub fn is_empty(&self) -> bool {
        self.expose_secret().is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Default for Password {
    fn default() -> Self {
        Self::from(String::new())
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self(SecretString::new(value.into_boxed_str()))
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl Serialize for Password {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for Password {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// Payload shape produced by the formatter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Positional values picked by `key_names`
    #[default]
    Raw,
    /// The whole record as one JSON object
    Json,
}

/// PostgreSQL log sink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct PgLogConfig {
    /// Database host
    #[validate(length(min = 1))]
    pub host: String,

    /// Database port (server default 5432 when absent)
    #[serde(default)]
    #[validate(range(min = 1))]
    pub port: Option<u16>,

    /// Database name
    #[validate(length(min = 1))]
    pub database: String,

    /// Login role
    #[validate(length(min = 1))]
    pub username: String,

    /// Login password
    #[serde(default)]
    #[schemars(with = "String")]
    pub password: Password,

    /// Comma-separated record fields feeding the positional arguments (raw format)
    #[serde(default)]
    pub key_names: Option<String>,

    /// Explicit insert statement with `$n` placeholders
    #[serde(default)]
    pub sql: Option<String>,

    /// Target table, used with `columns`
    #[serde(default)]
    pub table: Option<String>,

    /// Comma-separated target columns, used with `table`
    #[serde(default)]
    pub columns: Option<String>,

    /// Payload format
    #[serde(default)]
    pub format: PayloadFormat,

    /// Text encoding string values are coerced to
    #[serde(default)]
    pub force_encoding: Option<String>,

    /// Add the entry time to the record under `time_key`
    #[serde(default)]
    pub include_time_key: bool,

    /// Field name for the injected time
    #[serde(default = "default_time_key")]
    #[validate(length(min = 1))]
    pub time_key: String,

    /// strftime pattern for the injected time (RFC 3339 when absent)
    #[serde(default)]
    pub time_format: Option<String>,

    /// Render the injected time in the local timezone instead of UTC
    #[serde(default)]
    pub localtime: bool,

    /// Add the tag to the record under `tag_key`
    #[serde(default)]
    pub include_tag_key: bool,

    /// Field name for the injected tag
    #[serde(default = "default_tag_key")]
    #[validate(length(min = 1))]
    pub tag_key: String,

    /// Wrap each flush in one transaction, rolled back on the first failure
    #[serde(default)]
    pub transactional: bool,

    /// Connection timeout in milliseconds (default: 10000, 0 disables)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// `application_name` reported to the server
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_time_key() -> String {
    "time".to_string()
}

fn default_tag_key() -> String {
    "tag".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_application_name() -> String {
    "pglog".to_string()
}

impl Default for PgLogConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            database: String::new(),
            username: String::new(),
            password: Password::default(),
            key_names: None,
            sql: None,
            table: None,
            columns: None,
            format: PayloadFormat::Raw,
            force_encoding: None,
            include_time_key: false,
            time_key: default_time_key(),
            time_format: None,
            localtime: false,
            include_tag_key: false,
            tag_key: default_tag_key(),
            transactional: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            application_name: default_application_name(),
        }
    }
}

impl PgLogConfig {
    /// Parse configuration from YAML
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::config(format!("invalid YAML: {}", e)))
    }

    /// Cross-field requirements the derive rules cannot express
    pub fn validate_mode(&self) -> std::result::Result<(), String> {
        let sql = self.sql.as_deref().filter(|s| !s.trim().is_empty());
        let columns = self.columns.as_deref().filter(|s| !s.trim().is_empty());

        if sql.is_none() {
            if columns.is_none() {
                return Err("columns or sql MUST be specified, but missing".to_string());
            }
            if self.table.as_deref().map_or(true, |t| t.trim().is_empty()) {
                return Err("'table' required when 'columns' is used".to_string());
            }
        }

        if self.format == PayloadFormat::Raw
            && self.key_names.as_deref().map_or(true, str::is_empty)
        {
            return Err("'key_names' required for raw format".to_string());
        }

        Ok(())
    }

    /// Run derive validation and the cross-field checks
    pub fn validate_all(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("Validation failed: {}", e)))?;
        self.validate_mode().map_err(Error::Configuration)
    }

    /// Connection parameters for the connection layer
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(&self.host, &self.database)
            .with_credentials(&self.username, self.password.expose_secret())
            .with_connect_timeout_ms(self.connect_timeout_ms)
            .with_application_name(&self.application_name);
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        config
    }
}
