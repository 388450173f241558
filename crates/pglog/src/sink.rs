//! The log sink a batching scheduler drives
//!
//! The scheduler calls [`PgLogSink::format`] for each record at enqueue time,
//! concatenates the returned bytes into chunks, and hands every chunk to
//! [`PgLogSink::write`]. Retry, backoff and persistence of unflushed chunks
//! belong to the scheduler; the sink never retries.
//!
//! # Example
//!
//! ```rust,ignore
//! use pglog::prelude::*;
//!
//! let config = PgLogConfig::from_yaml_str(r#"
//! host: localhost
//! database: logs
//! username: writer
//! table: events
//! columns: a,b
//! key_names: a,b
//! "#)?;
//! let sink = PgLogSink::new(config)?;
//!
//! let record = Record::new().with("a", 1_i64).with("b", "x");
//! let chunk = sink.format("app.web", 1_700_000_000, &record)?;
//! sink.write(&chunk).await?;
//! ```

use pglog_rdbc::connection::{ConnectionConfig, ConnectionFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::check::{CheckReport, CheckStep, StepOutcome};
use crate::config::PgLogConfig;
use crate::error::Result;
use crate::format::RecordFormatter;
use crate::record::Record;
use crate::statement::{PreparedInsert, StatementBuilder, STATEMENT_NAME};
use crate::stats::{AtomicFlushStats, FlushReport, FlushStats};
use crate::writer::ChunkWriter;

/// PostgreSQL log sink
pub struct PgLogSink {
    config: PgLogConfig,
    factory: Arc<dyn ConnectionFactory>,
    connection: ConnectionConfig,
    formatter: Arc<RecordFormatter>,
    writer: ChunkWriter,
    stats: AtomicFlushStats,
}

impl PgLogSink {
    /// Create a sink writing through `tokio-postgres`.
    ///
    /// Every configuration problem is reported here, before any record.
    #[cfg(feature = "postgres")]
    pub fn new(config: PgLogConfig) -> Result<Self> {
        Self::with_factory(config, Arc::new(pglog_rdbc::postgres::PgConnectionFactory))
    }

    /// Create a sink opening its connections through `factory`
    pub fn with_factory(config: PgLogConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Self> {
        config.validate_all()?;

        let insert = Arc::new(StatementBuilder::from_config(&config).build()?);
        let formatter = Arc::new(RecordFormatter::from_config(&config)?);
        let connection = config.connection_config();
        let writer = ChunkWriter::new(
            Arc::clone(&factory),
            connection.clone(),
            Arc::clone(&insert),
            Arc::clone(&formatter),
        )
        .with_transactional(config.transactional);

        info!(
            endpoint = %connection.endpoint(),
            backend = factory.backend(),
            statement = %insert.sql(),
            format = ?config.format,
            transactional = config.transactional,
            "Configured log sink"
        );

        Ok(Self {
            config,
            factory,
            connection,
            formatter,
            writer,
            stats: AtomicFlushStats::default(),
        })
    }

    /// Serialize one record as a chunk entry
    pub fn format(&self, tag: &str, time: i64, record: &Record) -> Result<Vec<u8>> {
        self.formatter.format(tag, time, record)?.to_bytes()
    }

    /// Flush one chunk.
    ///
    /// Concurrent calls are independent: each opens its own connection.
    pub async fn write(&self, chunk: &[u8]) -> Result<FlushReport> {
        match self.writer.write(chunk).await {
            Ok(report) => {
                self.stats.record_flush(&report);
                Ok(report)
            }
            Err(e) => {
                self.stats.record_failure(e.applied_entries() as u64);
                Err(e)
            }
        }
    }

    /// Connect and prepare the insert without writing anything, then close
    pub async fn check(&self) -> CheckReport {
        let mut report = CheckReport::default();

        let started = Instant::now();
        let conn = match self.factory.connect(&self.connection).await {
            Ok(conn) => conn,
            Err(e) => {
                report.push(StepOutcome::failed(CheckStep::Connect, started.elapsed(), e));
                warn!(endpoint = %self.connection.endpoint(), "Check failed: {}", report);
                return report;
            }
        };
        report.push(StepOutcome::passed(CheckStep::Connect, started.elapsed()));

        let started = Instant::now();
        let insert = self.writer.insert();
        match conn.prepare(STATEMENT_NAME, insert.sql()).await {
            Ok(_) => report.push(StepOutcome::passed(CheckStep::Prepare, started.elapsed())),
            Err(e) => report.push(StepOutcome::failed(CheckStep::Prepare, started.elapsed(), e)),
        }

        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close connection after check");
        }

        debug!(ok = report.is_ok(), "Check finished: {}", report);
        report
    }

    /// Counters over every flush so far
    pub fn stats(&self) -> FlushStats {
        self.stats.snapshot()
    }

    /// The insert every flush prepares
    pub fn statement(&self) -> &PreparedInsert {
        self.writer.insert()
    }

    /// Effective configuration
    pub fn config(&self) -> &PgLogConfig {
        &self.config
    }
}

impl std::fmt::Debug for PgLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgLogSink")
            .field("config", &self.config)
            .field("writer", &self.writer)
            .finish()
    }
}
