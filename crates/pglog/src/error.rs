//! Error types for pglog
//!
//! Every failure the sink surfaces to its scheduler is one of:
//! - `Configuration`: raised while building the sink, before any record
//! - `Connectivity`: the flush could not open its connection
//! - `Statement`: the insert statement could not be prepared
//! - `Database`: a row failed while executing the chunk
//! - `Encoding`: a string value is malformed for the configured encoding
//! - `Decode`: the chunk bytes are not a valid entry sequence
//!
//! The sink never retries on its own; `is_retriable` is a hint for the caller.

use pglog_rdbc::error::ErrorCategory;
use thiserror::Error;

/// Result type alias for pglog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the sink
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is missing or invalid
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Opening the connection failed
    #[error("connectivity error ({endpoint}): {source}")]
    Connectivity {
        /// `host:port/database` the flush tried to reach
        endpoint: String,
        /// Backend error
        #[source]
        source: pglog_rdbc::Error,
    },

    /// Preparing the insert statement failed
    #[error("statement error: {source}")]
    Statement {
        /// SQL text that failed to prepare
        sql: String,
        /// Backend error
        #[source]
        source: pglog_rdbc::Error,
    },

    /// Executing an entry of the chunk failed
    #[error("database error at entry {index} ({applied} applied): {source}")]
    Database {
        /// Position of the failing entry within the chunk
        index: usize,
        /// Entries applied before the failure and not rolled back
        applied: usize,
        /// Backend error
        #[source]
        source: pglog_rdbc::Error,
    },

    /// A string value does not fit the configured encoding
    #[error("encoding error in field '{field}': {message}")]
    Encoding {
        /// Record field (or payload position) holding the value
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// Chunk bytes could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an encoding error
    pub fn encoding(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encoding {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Category of the underlying failure
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Connectivity { source, .. } => match source.category() {
                ErrorCategory::Authentication => ErrorCategory::Authentication,
                ErrorCategory::Timeout => ErrorCategory::Timeout,
                _ => ErrorCategory::Connection,
            },
            Self::Statement { source, .. } | Self::Database { source, .. } => source.category(),
            Self::Encoding { .. } => ErrorCategory::TypeConversion,
            Self::Decode(_) => ErrorCategory::Other,
        }
    }

    /// Whether a later attempt with the same chunk could succeed
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Entries of the chunk left applied by a failed flush
    pub fn applied_entries(&self) -> usize {
        match self {
            Self::Database { applied, .. } => *applied,
            _ => 0,
        }
    }
}

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
