//! Flush pipeline against a real PostgreSQL
//!
//! Run with: cargo test -p pglog-integration-tests --test flush_pipeline -- --ignored --nocapture
//!
//! Requirements: Docker must be running for testcontainers.

use anyhow::Result;
use pglog::config::PayloadFormat;
use pglog::{Error, PgLogSink, Record};
use pglog_integration_tests::*;
use pglog_rdbc::error::ErrorCategory;
use tracing::info;

fn events_sink(pg: &TestPostgres, transactional: bool) -> Result<PgLogSink> {
    let mut config = pg.sink_config();
    config.table = Some("events".into());
    config.columns = Some("a,b".into());
    config.key_names = Some("a,b".into());
    config.transactional = transactional;
    Ok(PgLogSink::new(config)?)
}

async fn count_events(pg: &TestPostgres) -> Result<i64> {
    let row = pg
        .connect()
        .await?
        .query_one("SELECT COUNT(*) FROM events", &[])
        .await?;
    Ok(row.get(0))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_insert_single_record() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    pg.create_events_table().await?;

    let sink = events_sink(&pg, false)?;
    let report = sink.check().await;
    assert!(report.is_ok(), "{}", report);

    let chunk = build_chunk(&sink, "app", &[Record::new().with("a", 1_i64).with("b", "x")])?;
    let report = sink.write(&chunk).await?;
    assert_eq!(report.entries, 1);
    assert_eq!(report.rows_affected, 1);

    let row = pg
        .connect()
        .await?
        .query_one("SELECT a, b FROM events", &[])
        .await?;
    assert_eq!(row.get::<_, i64>(0), 1);
    assert_eq!(row.get::<_, String>(1), "x");

    info!("single record insert passed");
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_primary_key_violation_keeps_earlier_rows() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    pg.create_events_table().await?;
    let sink = events_sink(&pg, false)?;

    let records = [
        Record::new().with("a", 1_i64).with("b", "first"),
        Record::new().with("a", 1_i64).with("b", "duplicate"),
        Record::new().with("a", 3_i64).with("b", "never attempted"),
    ];
    let err = sink
        .write(&build_chunk(&sink, "app", &records)?)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Database { index: 1, applied: 1, .. }));
    assert_eq!(err.category(), ErrorCategory::Constraint);
    assert_eq!(count_events(&pg).await?, 1);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_transactional_violation_rolls_back() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    pg.create_events_table().await?;
    let sink = events_sink(&pg, true)?;

    let records = [
        Record::new().with("a", 1_i64).with("b", "first"),
        Record::new().with("a", 1_i64).with("b", "duplicate"),
    ];
    let err = sink
        .write(&build_chunk(&sink, "app", &records)?)
        .await
        .unwrap_err();

    assert_eq!(err.applied_entries(), 0);
    assert_eq!(count_events(&pg).await?, 0);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_wrong_port_is_connectivity_error() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;

    let mut config = pg.sink_config();
    config.port = Some(1);
    config.connect_timeout_ms = 2_000;
    config.table = Some("events".into());
    config.columns = Some("a,b".into());
    config.key_names = Some("a,b".into());
    let sink = PgLogSink::new(config)?;

    let chunk = build_chunk(&sink, "app", &[Record::new().with("a", 1_i64)])?;
    let err = sink.write(&chunk).await.unwrap_err();

    assert!(matches!(err, Error::Connectivity { .. }));
    assert!(err.is_retriable());
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_json_mode_with_explicit_sql() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    pg.connect()
        .await?
        .batch_execute(
            "CREATE TABLE access_log (host TEXT, status INT, latency_ms DOUBLE PRECISION, meta JSONB)",
        )
        .await?;

    let mut config = pg.sink_config();
    config.format = PayloadFormat::Json;
    config.sql =
        Some("INSERT INTO access_log (host, status, latency_ms, meta) VALUES ($1,$2,$3,$4)".into());
    let sink = PgLogSink::new(config)?;

    let record = Record::from_json_str(
        r#"{"host":"web-1","status":200,"latency_ms":12.5,"meta":{"path":"/health"}}"#,
    )?;
    sink.write(&build_chunk(&sink, "nginx.access", &[record])?).await?;

    let row = pg
        .connect()
        .await?
        .query_one("SELECT host, status, latency_ms, meta FROM access_log", &[])
        .await?;
    assert_eq!(row.get::<_, String>(0), "web-1");
    assert_eq!(row.get::<_, i32>(1), 200);
    assert_eq!(row.get::<_, f64>(2), 12.5);
    assert_eq!(
        row.get::<_, serde_json::Value>(3),
        serde_json::json!({"path": "/health"})
    );
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_missing_table_is_statement_error() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;

    let mut config = pg.sink_config();
    config.table = Some("no_such_table".into());
    config.columns = Some("a".into());
    config.key_names = Some("a".into());
    let sink = PgLogSink::new(config)?;

    let chunk = build_chunk(&sink, "app", &[Record::new().with("a", 1_i64)])?;
    let err = sink.write(&chunk).await.unwrap_err();

    assert!(matches!(err, Error::Statement { .. }));
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_text_into_typed_columns() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    pg.connect()
        .await?
        .batch_execute(
            "CREATE TABLE requests (
                time TIMESTAMP,
                id UUID,
                client INET,
                started TIME,
                took INTERVAL
            )",
        )
        .await?;

    let mut config = pg.sink_config();
    config.table = Some("requests".into());
    config.columns = Some("time,id,client,started,took".into());
    config.key_names = Some("time,id,client,started,took".into());
    config.include_time_key = true;
    let sink = PgLogSink::new(config)?;

    let record = Record::new()
        .with("id", "6f1c7f4e-2a4b-4c1e-9d1a-0b6a5f6e7d8c")
        .with("client", "192.168.1.20")
        .with("started", "08:15:00")
        .with("took", "1 day 02:00:00");
    sink.write(&build_chunk(&sink, "api", &[record])?).await?;

    let row = pg
        .connect()
        .await?
        .query_one(
            "SELECT time::text, id::text, client::text, started::text, took::text FROM requests",
            &[],
        )
        .await?;
    assert_eq!(row.get::<_, String>(0), "2023-11-14 22:13:20");
    assert_eq!(row.get::<_, String>(1), "6f1c7f4e-2a4b-4c1e-9d1a-0b6a5f6e7d8c");
    assert_eq!(row.get::<_, String>(2), "192.168.1.20");
    assert_eq!(row.get::<_, String>(3), "08:15:00");
    assert_eq!(row.get::<_, String>(4), "1 day 02:00:00");
    Ok(())
}
