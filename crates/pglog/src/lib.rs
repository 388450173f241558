//! # pglog
//!
//! A log-record sink that writes chunks of formatted records to PostgreSQL
//! through a server-side prepared insert.
//!
//! An external scheduler owns batching, retry and durability. It calls
//! [`PgLogSink::format`] once per record and [`PgLogSink::write`] once per
//! chunk. Each `write` opens its own connection, prepares the insert, runs
//! one execution per entry in chunk order, and closes the connection
//! whatever the outcome.
//!
//! ## Features
//!
//! - **Raw and JSON payloads**: positional values picked by `key_names`, or
//!   the whole record as one JSON object whose keys drive the arguments
//! - **Derived or explicit SQL**: `table` + `columns`, or a verbatim `sql`
//! - **Encoding normalization**: `force_encoding` applied at format time and
//!   again at flush time
//! - **Optional transactions**: `transactional: true` rolls a failed chunk back
//! - **Typed failures**: configuration, connectivity, statement, database,
//!   encoding and decode errors with retry hints
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pglog::prelude::*;
//!
//! let sink = PgLogSink::new(PgLogConfig {
//!     host: "localhost".into(),
//!     database: "logs".into(),
//!     username: "writer".into(),
//!     table: Some("events".into()),
//!     columns: Some("a,b".into()),
//!     key_names: Some("a,b".into()),
//!     ..Default::default()
//! })?;
//!
//! let mut chunk = Vec::new();
//! chunk.extend(sink.format("app", 1_700_000_000, &Record::new().with("a", 1_i64).with("b", "x"))?);
//! let report = sink.write(&chunk).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - `PgLogSink::new` over tokio-postgres (default)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod check;
pub mod chunk;
pub mod config;
pub mod encoding;
pub mod error;
pub mod format;
pub mod record;
pub mod sink;
pub mod statement;
pub mod stats;
pub mod testing;
pub mod writer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::check::{CheckReport, CheckStep, StepOutcome};
    pub use crate::chunk::{decode_chunk, ChunkBuilder, ChunkEntry, Payload};
    pub use crate::config::{Password, PayloadFormat, PgLogConfig};
    pub use crate::encoding::TextEncoding;
    pub use crate::error::{Error, Result};
    pub use crate::format::{FormatMode, RecordFormatter};
    pub use crate::record::Record;
    pub use crate::sink::PgLogSink;
    pub use crate::statement::{PreparedInsert, StatementBuilder, STATEMENT_NAME};
    pub use crate::stats::{FlushReport, FlushStats};
    pub use crate::writer::{ChunkWriter, FlushState};
    pub use pglog_rdbc::Value;
}

pub use error::{Error, Result};
pub use record::Record;
pub use sink::PgLogSink;
