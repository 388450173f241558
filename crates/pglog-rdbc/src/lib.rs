//! # pglog-rdbc
//!
//! Relational database connectivity for the pglog log sink.
//!
//! This crate provides the small database surface the flush pipeline needs:
//! one exclusive connection per flush, a server-side prepared statement
//! executed once per row, and optional transaction scoping.
//!
//! ## Features
//!
//! - **Connection factory**: Opens a fresh session from host/port/credentials
//! - **Prepared statements**: Parsed once per session, executed per row
//! - **Error classification**: SQLSTATE-aware categories with retry hints
//! - **Parameter coercion**: Record values adapt to the column types the
//!   server inferred for each placeholder
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pglog_rdbc::prelude::*;
//! use pglog_rdbc::postgres::PgConnectionFactory;
//!
//! let config = ConnectionConfig::new("localhost", "logs")
//!     .with_credentials("writer", "secret");
//! let conn = PgConnectionFactory.connect(&config).await?;
//!
//! let stmt = conn.prepare("write", "INSERT INTO events (a,b) VALUES ($1,$2)").await?;
//! stmt.execute(&[Value::Int64(1), Value::from("x")]).await?;
//!
//! drop(stmt);
//! conn.close().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL support via tokio-postgres (default)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, PreparedStatement, Transaction,
    };
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::types::Value;
}

pub use error::{Error, Result};
pub use types::Value;
