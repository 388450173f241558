//! Connection-layer errors
//!
//! Every error carries an [`ErrorCategory`]. Callers use it to decide whether
//! re-running the same work later can succeed: a dropped socket or a deadlock
//! can, a unique violation cannot.

use std::fmt;
use thiserror::Error;

/// Result type for pglog-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Socket refused, reset or closed (SQLSTATE class 08)
    Connection,
    /// Credentials rejected (class 28)
    Authentication,
    /// Connect or statement timeout (57014)
    Timeout,
    /// Any other server-side rejection: syntax, unknown relation, arity
    Query,
    /// Integrity violation (class 23)
    Constraint,
    /// Value not representable in the target type (class 22)
    TypeConversion,
    /// BEGIN / COMMIT / ROLLBACK failed
    Transaction,
    /// Deadlock detected (40P01)
    Deadlock,
    /// Invalid settings, reported before any I/O
    Configuration,
    /// Everything else
    Other,
}

impl ErrorCategory {
    /// Stable snake_case name, used as a log field value
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Authentication => "authentication",
            Self::Timeout => "timeout",
            Self::Query => "query",
            Self::Constraint => "constraint",
            Self::TypeConversion => "type_conversion",
            Self::Transaction => "transaction",
            Self::Deadlock => "deadlock",
            Self::Configuration => "configuration",
            Self::Other => "other",
        }
    }

    /// Transient failures: connection loss, timeouts and deadlocks
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout | Self::Deadlock)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection-layer error
#[derive(Error, Debug)]
pub enum Error {
    /// Could not reach the server, or the session died
    #[error("connection error: {message}")]
    Connection {
        /// What happened
        message: String,
        /// Driver error
        #[source]
        source: Option<BoxError>,
    },

    /// The server rejected the credentials
    #[error("authentication failed: {message}")]
    Authentication {
        /// Server message
        message: String,
    },

    /// Gave up waiting
    #[error("timeout: {message}")]
    Timeout {
        /// What timed out
        message: String,
    },

    /// The server rejected a statement
    #[error("query error: {message}")]
    Query {
        /// Server message
        message: String,
        /// Statement text, when known
        sql: Option<String>,
        /// Five-character SQLSTATE, when the server sent one
        sqlstate: Option<String>,
        /// Driver error
        #[source]
        source: Option<BoxError>,
    },

    /// An integrity constraint rejected the row
    #[error("constraint violation: {constraint_name} - {message}")]
    Constraint {
        /// Violated constraint, or the SQLSTATE when the server named none
        constraint_name: String,
        /// Server message
        message: String,
    },

    /// A parameter could not be converted to the column type
    #[error("type conversion error: {message}")]
    TypeConversion {
        /// What could not be converted
        message: String,
    },

    /// Transaction control failed
    #[error("transaction error: {message}")]
    Transaction {
        /// What happened
        message: String,
        /// Driver error
        #[source]
        source: Option<BoxError>,
    },

    /// The server broke a deadlock by aborting this session's statement
    #[error("deadlock detected")]
    Deadlock,
}

impl Error {
    /// Classification of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Constraint { .. } => ErrorCategory::Constraint,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Deadlock => ErrorCategory::Deadlock,
        }
    }

    /// Shorthand for `self.category().is_retriable()`
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Connection error without a driver cause
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Connection error wrapping the driver cause
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Rejected credentials
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Timeout
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Rejected statement
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            sqlstate: None,
            source: None,
        }
    }

    /// Rejected statement, with its text
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            sqlstate: None,
            source: None,
        }
    }

    /// Constraint violation
    pub fn constraint(constraint_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Constraint {
            constraint_name: constraint_name.into(),
            message: message.into(),
        }
    }

    /// Unconvertible value
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Transaction control failure
    pub fn transaction(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transaction {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Statement text attached to a query error
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// SQLSTATE attached to a query error
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Query { sqlstate, .. } => sqlstate.as_deref(),
            _ => None,
        }
    }
}
