//! Session, statement and transaction traits
//!
//! A flush needs exactly three things from a database session: prepare one
//! statement, optionally open a transaction, and close. The traits stop
//! there so that test doubles stay small.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use crate::error::Result;
use crate::types::Value;

/// An exclusive database session.
///
/// [`Connection::close`] consumes the session. Dropping it without closing
/// still terminates the session, only without waiting for the server.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Prepare `sql` on this session.
    ///
    /// `name` labels the statement in logs and test doubles. A backend may
    /// register the statement under a name of its own choosing; the
    /// PostgreSQL backend lets the driver assign one.
    async fn prepare(&self, name: &str, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Open a transaction on this session
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Terminate the session and wait for the server to acknowledge it
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A statement prepared on one session
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    /// Run once with positional arguments, returning the affected row count
    async fn execute(&self, params: &[Value]) -> Result<u64>;

    /// Registered name
    fn name(&self) -> &str;

    /// Statement text
    fn sql(&self) -> &str;

    /// Placeholders the server found in the statement
    fn param_count(&self) -> usize;
}

/// An open transaction. Statements run on the owning session belong to it
/// until it is committed or rolled back.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// COMMIT
    async fn commit(self: Box<Self>) -> Result<()>;

    /// ROLLBACK
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Opens sessions
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new session nobody else holds
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Short backend name for log fields
    fn backend(&self) -> &'static str;
}

/// Where and as whom to connect
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or address
    pub host: String,
    /// Server port, the backend default when `None`
    pub port: Option<u16>,
    /// Database name
    pub database: String,
    /// Login role
    pub user: String,
    /// Login password, empty for trust/peer authentication
    pub password: SecretString,
    /// Give up connecting after this long; `None` waits forever
    pub connect_timeout: Option<Duration>,
    /// Reported to the server as `application_name`
    pub application_name: Option<String>,
}

impl ConnectionConfig {
    /// Connect to `database` on `host` with no credentials
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            database: database.into(),
            user: String::new(),
            password: SecretString::new("".into()),
            connect_timeout: Some(Duration::from_secs(10)),
            application_name: None,
        }
    }

    /// Set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set role and password
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = SecretString::new(password.into().into_boxed_str());
        self
    }

    /// Set the connect timeout in milliseconds, 0 disables it
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        self
    }

    /// Set `application_name`
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Whether a password was given
    pub fn has_password(&self) -> bool {
        !self.password.expose_secret().is_empty()
    }

    /// `host:port/database`, or `host/database` without a port
    pub fn endpoint(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}/{}", self.host, port, self.database),
            None => format!("{}/{}", self.host, self.database),
        }
    }
}
