//! Chunk flush
//!
//! One call to [`ChunkWriter::write`] moves through
//! `Acquiring -> Preparing -> Executing -> Committed | Failed -> Closed`:
//!
//! - **Acquiring**: open a fresh connection. Failure is a connectivity error;
//!   nothing was prepared and nothing needs closing.
//! - **Preparing**: prepare the insert, labelled [`STATEMENT_NAME`]. Every flush
//!   prepares again on its own connection.
//! - **Executing**: decode the chunk, build the positional arguments of every
//!   entry, then execute them one by one in chunk order. The first failing
//!   execution aborts the chunk; later entries are never attempted.
//! - **Closed**: the connection is closed after success and after failure.
//!   A close failure is logged and never replaces the flush outcome.
//!
//! Without `transactional`, each execution autocommits, so a failed flush can
//! leave earlier entries applied; [`Error::applied_entries`] says how many.
//! With `transactional`, the chunk runs inside one transaction that is rolled
//! back on the first failure.

use pglog_rdbc::connection::{Connection, ConnectionConfig, ConnectionFactory, PreparedStatement};
use pglog_rdbc::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::chunk::decode_chunk;
use crate::error::{Error, Result};
use crate::format::RecordFormatter;
use crate::statement::{PreparedInsert, STATEMENT_NAME};
use crate::stats::FlushReport;

/// Flush states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Opening the connection
    Acquiring,
    /// Preparing the insert
    Preparing,
    /// Running the chunk's entries
    Executing,
    /// Every entry applied
    Committed,
    /// The flush raised an error
    Failed,
    /// Connection released
    Closed,
}

impl fmt::Display for FlushState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Acquiring => "acquiring",
            Self::Preparing => "preparing",
            Self::Executing => "executing",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Applies chunks through a prepared insert
pub struct ChunkWriter {
    factory: Arc<dyn ConnectionFactory>,
    connection: ConnectionConfig,
    insert: Arc<PreparedInsert>,
    formatter: Arc<RecordFormatter>,
    transactional: bool,
}

impl ChunkWriter {
    /// Create a writer
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        connection: ConnectionConfig,
        insert: Arc<PreparedInsert>,
        formatter: Arc<RecordFormatter>,
    ) -> Self {
        Self {
            factory,
            connection,
            insert,
            formatter,
            transactional: false,
        }
    }

    /// Run each chunk inside one transaction
    pub fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    /// Insert the writer prepares
    pub fn insert(&self) -> &PreparedInsert {
        &self.insert
    }

    /// Whether chunks run inside a transaction
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Flush one chunk
    pub async fn write(&self, chunk: &[u8]) -> Result<FlushReport> {
        let started = Instant::now();
        let endpoint = self.connection.endpoint();

        trace!(state = %FlushState::Acquiring, endpoint = %endpoint, "flush");
        let conn = match self.factory.connect(&self.connection).await {
            Ok(conn) => conn,
            Err(source) => {
                error!(
                    state = %FlushState::Failed,
                    endpoint = %endpoint,
                    error = %source,
                    "Could not open connection for flush"
                );
                return Err(Error::Connectivity { endpoint, source });
            }
        };

        let outcome = self.run(conn.as_ref(), chunk).await;

        if let Err(e) = conn.close().await {
            warn!(endpoint = %endpoint, error = %e, "Failed to close connection after flush");
        }
        trace!(state = %FlushState::Closed, "flush");

        match outcome {
            Ok((entries, rows_affected)) => {
                let report = FlushReport {
                    entries,
                    rows_affected,
                    duration: started.elapsed(),
                };
                info!(
                    state = %FlushState::Committed,
                    table = self.insert.table().unwrap_or("-"),
                    entries = report.entries,
                    rows = report.rows_affected,
                    duration_ms = report.duration.as_millis() as u64,
                    "Chunk flushed"
                );
                Ok(report)
            }
            Err(e) => {
                error!(
                    state = %FlushState::Failed,
                    table = self.insert.table().unwrap_or("-"),
                    applied = e.applied_entries(),
                    error = %e,
                    "Chunk flush failed"
                );
                Err(e)
            }
        }
    }

    async fn run(&self, conn: &dyn Connection, chunk: &[u8]) -> Result<(u64, u64)> {
        trace!(state = %FlushState::Preparing, statement = STATEMENT_NAME, "flush");
        let stmt = conn
            .prepare(STATEMENT_NAME, self.insert.sql())
            .await
            .map_err(|source| Error::Statement {
                sql: self.insert.sql().to_string(),
                source,
            })?;

        trace!(state = %FlushState::Executing, bytes = chunk.len(), "flush");
        let arguments = decode_chunk(chunk)?
            .into_iter()
            .map(|entry| self.formatter.arguments(entry.into_payload()))
            .collect::<Result<Vec<_>>>()?;

        if !self.transactional {
            return execute_all(stmt.as_ref(), &arguments).await;
        }

        let tx = conn.begin().await.map_err(|source| Error::Database {
            index: 0,
            applied: 0,
            source,
        })?;

        match execute_all(stmt.as_ref(), &arguments).await {
            Ok(done) => {
                tx.commit().await.map_err(|source| Error::Database {
                    index: arguments.len(),
                    applied: 0,
                    source,
                })?;
                Ok(done)
            }
            Err(err) => {
                if let Err(e) = tx.rollback().await {
                    warn!(error = %e, "Rollback after failed entry did not complete");
                }
                Err(match err {
                    Error::Database { index, source, .. } => Error::Database {
                        index,
                        applied: 0,
                        source,
                    },
                    other => other,
                })
            }
        }
    }
}

async fn execute_all(stmt: &dyn PreparedStatement, arguments: &[Vec<Value>]) -> Result<(u64, u64)> {
    let mut rows = 0u64;
    for (index, args) in arguments.iter().enumerate() {
        match stmt.execute(args).await {
            Ok(n) => rows += n,
            Err(source) => {
                return Err(Error::Database {
                    index,
                    applied: index,
                    source,
                })
            }
        }
    }
    debug!(entries = arguments.len(), rows, "Executed chunk entries");
    Ok((arguments.len() as u64, rows))
}

impl fmt::Debug for ChunkWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkWriter")
            .field("backend", &self.factory.backend())
            .field("connection", &self.connection)
            .field("insert", &self.insert)
            .field("transactional", &self.transactional)
            .finish()
    }
}
