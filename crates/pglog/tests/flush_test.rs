//! Flush pipeline tests against the in-memory database

use pglog::prelude::*;
use pglog::testing::{Fault, MockDatabase, MockEvent};
use pglog_rdbc::error::ErrorCategory;
use serde_json::json;
use std::time::Duration;

const T0: i64 = 1_700_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn events_config() -> PgLogConfig {
    PgLogConfig {
        host: "db.test".into(),
        port: Some(5432),
        database: "logs".into(),
        username: "writer".into(),
        table: Some("events".into()),
        columns: Some("a,b".into()),
        key_names: Some("a,b".into()),
        ..Default::default()
    }
}

fn chunk_of(sink: &PgLogSink, records: &[Record]) -> Vec<u8> {
    let mut chunk = Vec::new();
    for (i, record) in records.iter().enumerate() {
        chunk.extend(sink.format("app.web", T0 + i as i64, record).unwrap());
    }
    chunk
}

fn row(a: i64, b: &str) -> Record {
    Record::new().with("a", a).with("b", b)
}

#[tokio::test]
async fn test_single_entry_flush() {
    init_tracing();
    let db = MockDatabase::new();
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    assert_eq!(sink.statement().sql(), "INSERT INTO events (a,b) VALUES ($1,$2)");

    let chunk = chunk_of(&sink, &[row(1, "x")]);
    let report = sink.write(&chunk).await.unwrap();

    assert_eq!(report.entries, 1);
    assert_eq!(report.rows_affected, 1);
    assert_eq!(
        db.prepared(),
        vec![(
            STATEMENT_NAME.to_string(),
            "INSERT INTO events (a,b) VALUES ($1,$2)".to_string()
        )]
    );
    assert_eq!(db.executions(), vec![vec![Value::Int64(1), Value::from("x")]]);
    assert_eq!(db.closes(), 1);
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_failing_entry_aborts_rest_of_chunk() {
    init_tracing();
    let db = MockDatabase::new().fail_on_execution(2, Fault::constraint("events_pkey"));
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    let chunk = chunk_of(&sink, &[row(1, "first"), row(2, "second"), row(3, "third")]);
    let err = sink.write(&chunk).await.unwrap_err();

    match &err {
        Error::Database { index, applied, .. } => {
            assert_eq!(*index, 1);
            assert_eq!(*applied, 1);
        }
        other => panic!("expected database error, got {other:?}"),
    }
    assert_eq!(err.category(), ErrorCategory::Constraint);

    assert_eq!(db.rows(), vec![vec![Value::Int64(1), Value::from("first")]]);
    assert_eq!(db.executions().len(), 2);
    assert_eq!(db.closes(), 1);

    let stats = sink.stats();
    assert_eq!(stats.chunks_failed, 1);
    assert_eq!(stats.entries_partially_applied, 1);
}

#[tokio::test]
async fn test_duplicate_key_leaves_earlier_rows() {
    let db = MockDatabase::new().unique_on(0);
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    let chunk = chunk_of(&sink, &[row(1, "a"), row(1, "dup"), row(2, "b")]);
    let err = sink.write(&chunk).await.unwrap_err();

    assert!(matches!(err, Error::Database { index: 1, .. }));
    assert_eq!(db.rows().len(), 1);
    assert!(!db
        .executions()
        .iter()
        .any(|args| args.first() == Some(&Value::Int64(2))));
}

#[tokio::test]
async fn test_unreachable_database() {
    init_tracing();
    let db = MockDatabase::new()
        .fail_connect(Fault::refused())
        .fail_close(Fault::Connection("close failed".into()));
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    let chunk = chunk_of(&sink, &[row(1, "x")]);
    let err = sink.write(&chunk).await.unwrap_err();

    match &err {
        Error::Connectivity { endpoint, .. } => assert_eq!(endpoint, "db.test:5432/logs"),
        other => panic!("expected connectivity error, got {other:?}"),
    }
    assert!(err.is_retriable());
    assert!(db.events().is_empty());
    assert_eq!(db.closes(), 0);
}

#[tokio::test]
async fn test_bad_credentials_not_retriable() {
    let db = MockDatabase::new().fail_connect(Fault::Authentication(
        "password authentication failed for user \"writer\"".into(),
    ));
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    let err = sink.write(&chunk_of(&sink, &[row(1, "x")])).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Authentication);
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn test_missing_key_binds_null() {
    let db = MockDatabase::new();
    let config = PgLogConfig {
        columns: Some("a,b,c".into()),
        key_names: Some("a,b,not_in_any_record".into()),
        ..events_config()
    };
    let sink = PgLogSink::with_factory(config, db.factory()).unwrap();

    let chunk = chunk_of(&sink, &[row(1, "x"), Record::new().with("b", "only b")]);
    sink.write(&chunk).await.unwrap();

    assert_eq!(
        db.executions(),
        vec![
            vec![Value::Int64(1), Value::from("x"), Value::Null],
            vec![Value::Null, Value::from("only b"), Value::Null],
        ]
    );
}

#[tokio::test]
async fn test_json_mode_binds_values_in_record_order() {
    let db = MockDatabase::new();
    let config = PgLogConfig {
        sql: Some("INSERT INTO events (host, status, meta) VALUES ($1, $2, $3)".into()),
        table: None,
        columns: None,
        key_names: None,
        format: PayloadFormat::Json,
        ..events_config()
    };
    let sink = PgLogSink::with_factory(config, db.factory()).unwrap();

    let record = Record::from_json_str(r#"{"host":"web-1","status":200,"meta":{"path":"/"}}"#).unwrap();
    sink.write(&chunk_of(&sink, &[record])).await.unwrap();

    assert_eq!(
        db.executions(),
        vec![vec![
            Value::from("web-1"),
            Value::Int64(200),
            Value::Json(json!({"path": "/"})),
        ]]
    );
}

#[tokio::test]
async fn test_transactional_rolls_back_chunk() {
    let db = MockDatabase::new().fail_on_execution(2, Fault::constraint("events_pkey"));
    let config = PgLogConfig {
        transactional: true,
        ..events_config()
    };
    let sink = PgLogSink::with_factory(config, db.factory()).unwrap();

    let chunk = chunk_of(&sink, &[row(1, "a"), row(2, "b"), row(3, "c")]);
    let err = sink.write(&chunk).await.unwrap_err();

    assert!(matches!(err, Error::Database { index: 1, applied: 0, .. }));
    assert!(db.rows().is_empty());
    assert_eq!(db.rollbacks(), 1);
    assert_eq!(db.commits(), 0);
    assert_eq!(db.closes(), 1);
}

#[tokio::test]
async fn test_transactional_commits_chunk() {
    let db = MockDatabase::new();
    let config = PgLogConfig {
        transactional: true,
        ..events_config()
    };
    let sink = PgLogSink::with_factory(config, db.factory()).unwrap();

    let chunk = chunk_of(&sink, &[row(1, "a"), row(2, "b")]);
    sink.write(&chunk).await.unwrap();

    assert_eq!(db.rows().len(), 2);
    assert_eq!(db.commits(), 1);

    let kinds: Vec<&str> = db
        .events()
        .iter()
        .map(|e| match e {
            MockEvent::Connect { .. } => "connect",
            MockEvent::Prepare { .. } => "prepare",
            MockEvent::Begin { .. } => "begin",
            MockEvent::Execute { .. } => "execute",
            MockEvent::Commit { .. } => "commit",
            MockEvent::Close { .. } => "close",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        ["connect", "prepare", "begin", "execute", "execute", "commit", "close"]
    );
}

#[tokio::test]
async fn test_close_failure_does_not_mask_outcome() {
    let db = MockDatabase::new().fail_close(Fault::Connection("socket reset".into()));
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    let report = sink.write(&chunk_of(&sink, &[row(1, "x")])).await.unwrap();
    assert_eq!(report.entries, 1);

    let db = MockDatabase::new()
        .fail_close(Fault::Connection("socket reset".into()))
        .fail_on_execution(1, Fault::TypeConversion("invalid input syntax for type integer".into()));
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    let err = sink.write(&chunk_of(&sink, &[row(1, "x")])).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TypeConversion);
    assert_eq!(db.closes(), 1);
}

#[tokio::test]
async fn test_prepare_failure_is_statement_error() {
    let db = MockDatabase::new().fail_prepare(Fault::Query(
        "relation \"events\" does not exist".into(),
    ));
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    let err = sink.write(&chunk_of(&sink, &[row(1, "x")])).await.unwrap_err();

    match &err {
        Error::Statement { sql, .. } => assert_eq!(sql, "INSERT INTO events (a,b) VALUES ($1,$2)"),
        other => panic!("expected statement error, got {other:?}"),
    }
    assert!(db.executions().is_empty());
    assert_eq!(db.closes(), 1);
}

#[tokio::test]
async fn test_malformed_chunk_applies_nothing() {
    let db = MockDatabase::new();
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    let mut chunk = chunk_of(&sink, &[row(1, "ok")]);
    chunk.extend_from_slice(&[0x07, b'a', b'p']);

    let err = sink.write(&chunk).await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    assert!(db.executions().is_empty());
    assert_eq!(db.closes(), 1);
}

#[tokio::test]
async fn test_every_flush_uses_fresh_connection() {
    let db = MockDatabase::new();
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    sink.write(&chunk_of(&sink, &[row(1, "a")])).await.unwrap();
    sink.write(&chunk_of(&sink, &[row(2, "b")])).await.unwrap();

    assert_eq!(db.connects(), 2);
    assert_eq!(db.prepared().len(), 2);
    assert_eq!(db.closes(), 2);

    let stats = sink.stats();
    assert_eq!(stats.chunks_written, 2);
    assert_eq!(stats.entries_written, 2);
}

#[tokio::test]
async fn test_concurrent_flushes_use_separate_connections() {
    let db = MockDatabase::new().with_execute_delay(Duration::from_millis(20));
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    let first = chunk_of(&sink, &[row(1, "a"), row(2, "b")]);
    let second = chunk_of(&sink, &[row(3, "c"), row(4, "d")]);

    let results = futures::future::join_all([sink.write(&first), sink.write(&second)]).await;
    assert!(results.iter().all(Result::is_ok));

    assert_eq!(db.rows().len(), 4);
    assert_eq!(db.max_open_connections(), 2);
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_cancelled_flush_releases_connection() {
    let db = MockDatabase::new().with_execute_delay(Duration::from_secs(60));
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();
    let chunk = chunk_of(&sink, &[row(1, "a")]);

    let outcome = tokio::time::timeout(Duration::from_millis(50), sink.write(&chunk)).await;

    assert!(outcome.is_err());
    assert_eq!(db.open_connections(), 0);
    assert_eq!(db.dropped_unclosed(), 1);
}

#[tokio::test]
async fn test_flush_normalizes_decoded_values() {
    let db = MockDatabase::new();
    let config = PgLogConfig {
        force_encoding: Some("ISO-8859-1".into()),
        ..events_config()
    };
    let sink = PgLogSink::with_factory(config, db.factory()).unwrap();

    // Entry produced elsewhere, without going through this sink's formatter.
    let entry = ChunkEntry::new(
        "app.web",
        T0,
        Payload::Raw(vec![Value::Int64(1), Value::Bytes(vec![0x63, 0x61, 0x66, 0xe9])]),
    );
    sink.write(&entry.to_bytes().unwrap()).await.unwrap();

    assert_eq!(db.executions(), vec![vec![Value::Int64(1), Value::from("café")]]);
}

#[tokio::test]
async fn test_encoding_error_at_format_time() {
    let db = MockDatabase::new();
    let config = PgLogConfig {
        force_encoding: Some("US-ASCII".into()),
        ..events_config()
    };
    let sink = PgLogSink::with_factory(config, db.factory()).unwrap();

    let err = sink.format("app.web", T0, &row(1, "naïve")).unwrap_err();
    assert!(matches!(err, Error::Encoding { ref field, .. } if field == "b"));
}

#[tokio::test]
async fn test_tag_and_time_injection() {
    let db = MockDatabase::new();
    let config = PgLogConfig {
        columns: Some("tag,time,a".into()),
        key_names: Some("tag,time,a".into()),
        include_tag_key: true,
        include_time_key: true,
        time_format: Some("%Y-%m-%d".into()),
        ..events_config()
    };
    let sink = PgLogSink::with_factory(config, db.factory()).unwrap();

    sink.write(&chunk_of(&sink, &[row(1, "x")])).await.unwrap();

    assert_eq!(
        db.executions(),
        vec![vec![
            Value::from("app.web"),
            Value::from("2023-11-14"),
            Value::Int64(1),
        ]]
    );
}

#[tokio::test]
async fn test_configuration_errors_before_any_flush() {
    let db = MockDatabase::new();

    let no_statement = PgLogConfig {
        columns: None,
        ..events_config()
    };
    let err = PgLogSink::with_factory(no_statement, db.factory()).unwrap_err();
    assert!(matches!(err, Error::Configuration(ref m) if m.contains("columns or sql")));

    let bad_encoding = PgLogConfig {
        force_encoding: Some("UTF-7".into()),
        ..events_config()
    };
    assert!(matches!(
        PgLogSink::with_factory(bad_encoding, db.factory()),
        Err(Error::Configuration(_))
    ));

    let raw_without_keys = PgLogConfig {
        key_names: None,
        ..events_config()
    };
    assert!(matches!(
        PgLogSink::with_factory(raw_without_keys, db.factory()),
        Err(Error::Configuration(_))
    ));

    assert_eq!(db.connects(), 0);
}

#[tokio::test]
async fn test_check_prepares_without_writing() {
    let db = MockDatabase::new();
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    let report = sink.check().await;
    assert!(report.is_ok());
    assert_eq!(report.steps().len(), 2);
    assert_eq!(db.prepared(), vec![(STATEMENT_NAME.to_string(), sink.statement().sql().to_string())]);
    assert!(db.executions().is_empty());
    assert_eq!(db.closes(), 1);
}

#[tokio::test]
async fn test_check_reports_failed_step() {
    let db = MockDatabase::new().fail_connect(Fault::refused());
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    let report = sink.check().await;
    assert!(!report.is_ok());
    assert_eq!(report.failure().map(|s| s.step), Some(CheckStep::Connect));
    assert_eq!(report.steps().len(), 1);

    let db = MockDatabase::new().fail_prepare(Fault::Query("relation \"events\" does not exist".into()));
    let sink = PgLogSink::with_factory(events_config(), db.factory()).unwrap();

    let report = sink.check().await;
    assert_eq!(report.failure().map(|s| s.step), Some(CheckStep::Prepare));
    assert_eq!(db.closes(), 1);
}
