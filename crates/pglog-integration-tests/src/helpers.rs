//! Test helpers

use anyhow::Result;
use pglog::{PgLogSink, Record};

/// Initialize tracing for tests (call once at start of test)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pglog=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Format `records` into one chunk, tagging them `tag`
pub fn build_chunk(sink: &PgLogSink, tag: &str, records: &[Record]) -> Result<Vec<u8>> {
    let mut chunk = Vec::new();
    for (i, record) in records.iter().enumerate() {
        chunk.extend(sink.format(tag, 1_700_000_000 + i as i64, record)?);
    }
    Ok(chunk)
}
