//! Testing utilities
//!
//! [`MockDatabase`] is an in-memory stand-in for the server side of the
//! connection layer. It records every connect, prepare, execution,
//! transaction and close, keeps the rows that were applied, and can be told
//! to fail at any of those steps.
//!
//! # Example
//!
//! ```rust,ignore
//! use pglog::testing::{Fault, MockDatabase};
//!
//! let db = MockDatabase::new().fail_on_execution(2, Fault::constraint("events_pkey"));
//! let sink = PgLogSink::with_factory(config, db.factory())?;
//!
//! assert!(sink.write(&chunk).await.is_err());
//! assert_eq!(db.rows().len(), 1);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use pglog_rdbc::connection::{
    Connection, ConnectionConfig, ConnectionFactory, PreparedStatement, Transaction,
};
use pglog_rdbc::error::{Error, Result};
use pglog_rdbc::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A failure the mock raises instead of doing the work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Socket-level failure
    Connection(String),
    /// Rejected credentials
    Authentication(String),
    /// Rejected SQL
    Query(String),
    /// Constraint violation
    Constraint {
        /// Constraint name
        name: String,
        /// Server message
        message: String,
    },
    /// Value not convertible to the column type
    TypeConversion(String),
}

impl Fault {
    /// Connection refused
    pub fn refused() -> Self {
        Self::Connection("connection refused".into())
    }

    /// Unique violation on `name`
    pub fn constraint(name: impl Into<String>) -> Self {
        Self::Constraint {
            name: name.into(),
            message: "duplicate key value violates unique constraint".into(),
        }
    }

    fn to_error(&self) -> Error {
        match self {
            Self::Connection(m) => Error::connection(m.clone()),
            Self::Authentication(m) => Error::authentication(m.clone()),
            Self::Query(m) => Error::query(m.clone()),
            Self::Constraint { name, message } => Error::constraint(name.clone(), message.clone()),
            Self::TypeConversion(m) => Error::type_conversion(m.clone()),
        }
    }
}

/// Something a mock connection was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    /// Connection opened
    Connect {
        /// Connection id
        conn: u64,
        /// `host:port/database` requested
        endpoint: String,
    },
    /// Statement prepared
    Prepare {
        /// Connection id
        conn: u64,
        /// Statement name
        name: String,
        /// SQL text
        sql: String,
    },
    /// Prepared statement executed
    Execute {
        /// Connection id
        conn: u64,
        /// Bound arguments
        params: Vec<Value>,
    },
    /// Transaction started
    Begin {
        /// Connection id
        conn: u64,
    },
    /// Transaction committed
    Commit {
        /// Connection id
        conn: u64,
    },
    /// Transaction rolled back
    Rollback {
        /// Connection id
        conn: u64,
    },
    /// Connection closed through `close`
    Close {
        /// Connection id
        conn: u64,
    },
}

#[derive(Debug, Default)]
struct State {
    events: Vec<MockEvent>,
    rows: Vec<Vec<Value>>,
    pending: HashMap<u64, Vec<Vec<Value>>>,
    next_conn: u64,
    executions: usize,
    open: usize,
    max_open: usize,
    dropped_unclosed: usize,
    fail_connect: Option<Fault>,
    fail_prepare: Option<Fault>,
    fail_close: Option<Fault>,
    fail_executions: HashMap<usize, Fault>,
    unique_column: Option<usize>,
    execute_delay: Option<Duration>,
}

impl State {
    fn discard_pending(&mut self, conn: u64) {
        self.pending.remove(&conn);
    }
}

/// In-memory database shared by every mock connection it hands out
#[derive(Debug, Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<State>>,
}

impl MockDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection factory backed by this database
    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(MockConnectionFactory { db: self.clone() })
    }

    /// Fail every connection attempt
    pub fn fail_connect(self, fault: Fault) -> Self {
        self.state.lock().fail_connect = Some(fault);
        self
    }

    /// Fail every prepare
    pub fn fail_prepare(self, fault: Fault) -> Self {
        self.state.lock().fail_prepare = Some(fault);
        self
    }

    /// Fail every close
    pub fn fail_close(self, fault: Fault) -> Self {
        self.state.lock().fail_close = Some(fault);
        self
    }

    /// Fail the `n`-th statement execution (1-based, counted across connections)
    pub fn fail_on_execution(self, n: usize, fault: Fault) -> Self {
        self.state.lock().fail_executions.insert(n, fault);
        self
    }

    /// Reject a row whose value at `position` equals one already applied
    pub fn unique_on(self, position: usize) -> Self {
        self.state.lock().unique_column = Some(position);
        self
    }

    /// Sleep before each execution
    pub fn with_execute_delay(self, delay: Duration) -> Self {
        self.state.lock().execute_delay = Some(delay);
        self
    }

    /// Everything the mock was asked to do, in order
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().events.clone()
    }

    /// Applied rows (autocommitted or committed), in order
    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.state.lock().rows.clone()
    }

    /// Arguments of every attempted execution, in order
    pub fn executions(&self) -> Vec<Vec<Value>> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                MockEvent::Execute { params, .. } => Some(params.clone()),
                _ => None,
            })
            .collect()
    }

    /// SQL text of every prepare, in order
    pub fn prepared(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                MockEvent::Prepare { name, sql, .. } => Some((name.clone(), sql.clone())),
                _ => None,
            })
            .collect()
    }

    /// Successful connection attempts
    pub fn connects(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Connect { .. }))
    }

    /// Calls to `close`
    pub fn closes(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Close { .. }))
    }

    /// Commits
    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Commit { .. }))
    }

    /// Rollbacks
    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Rollback { .. }))
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.state.lock().open
    }

    /// Highest number of connections open at once
    pub fn max_open_connections(&self) -> usize {
        self.state.lock().max_open
    }

    /// Connections dropped without `close`
    pub fn dropped_unclosed(&self) -> usize {
        self.state.lock().dropped_unclosed
    }

    fn count(&self, pred: impl Fn(&MockEvent) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| pred(e)).count()
    }
}

/// Factory handing out connections to a [`MockDatabase`]
#[derive(Debug, Clone)]
pub struct MockConnectionFactory {
    db: MockDatabase,
}

impl MockConnectionFactory {
    /// Create a factory for `db`
    pub fn new(db: MockDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut state = self.db.state.lock();
        if let Some(fault) = &state.fail_connect {
            return Err(fault.to_error());
        }

        state.next_conn += 1;
        let conn = state.next_conn;
        state.open += 1;
        state.max_open = state.max_open.max(state.open);
        state.events.push(MockEvent::Connect {
            conn,
            endpoint: config.endpoint(),
        });

        Ok(Box::new(MockConnection {
            db: self.db.clone(),
            id: conn,
            closed: false,
        }))
    }

    fn backend(&self) -> &'static str {
        "mock"
    }
}

struct MockConnection {
    db: MockDatabase,
    id: u64,
    closed: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn prepare(&self, name: &str, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let mut state = self.db.state.lock();
        if let Some(fault) = &state.fail_prepare {
            return Err(fault.to_error());
        }
        state.events.push(MockEvent::Prepare {
            conn: self.id,
            name: name.to_string(),
            sql: sql.to_string(),
        });

        Ok(Box::new(MockStatement {
            db: self.db.clone(),
            conn: self.id,
            name: name.to_string(),
            sql: sql.to_string(),
            params: placeholder_count(sql),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut state = self.db.state.lock();
        state.events.push(MockEvent::Begin { conn: self.id });
        state.pending.insert(self.id, Vec::new());

        Ok(Box::new(MockTransaction {
            db: self.db.clone(),
            conn: self.id,
        }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.closed = true;
        let mut state = this.db.state.lock();
        state.open -= 1;
        state.discard_pending(this.id);
        state.events.push(MockEvent::Close { conn: this.id });
        match state.fail_close.clone() {
            Some(fault) => Err(fault.to_error()),
            None => Ok(()),
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if !self.closed {
            let mut state = self.db.state.lock();
            state.open -= 1;
            state.dropped_unclosed += 1;
            state.discard_pending(self.id);
        }
    }
}

struct MockStatement {
    db: MockDatabase,
    conn: u64,
    name: String,
    sql: String,
    params: usize,
}

#[async_trait]
impl PreparedStatement for MockStatement {
    async fn execute(&self, params: &[Value]) -> Result<u64> {
        let delay = self.db.state.lock().execute_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut guard = self.db.state.lock();
        let state = &mut *guard;
        state.executions += 1;
        state.events.push(MockEvent::Execute {
            conn: self.conn,
            params: params.to_vec(),
        });

        if let Some(fault) = state.fail_executions.get(&state.executions) {
            return Err(fault.to_error());
        }
        if params.len() != self.params {
            return Err(Error::query_with_sql(
                format!(
                    "bind message supplies {} parameters, but prepared statement \"{}\" requires {}",
                    params.len(),
                    self.name,
                    self.params
                ),
                self.sql.clone(),
            ));
        }
        if let Some(col) = state.unique_column {
            let key = params.get(col);
            let visible = state
                .rows
                .iter()
                .chain(state.pending.get(&self.conn).into_iter().flatten());
            if key.is_some() && visible.into_iter().any(|row| row.get(col) == key) {
                return Err(Error::constraint(
                    "mock_unique",
                    "duplicate key value violates unique constraint",
                ));
            }
        }

        let row = params.to_vec();
        match state.pending.get_mut(&self.conn) {
            Some(pending) => pending.push(row),
            None => state.rows.push(row),
        }
        Ok(1)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    fn param_count(&self) -> usize {
        self.params
    }
}

struct MockTransaction {
    db: MockDatabase,
    conn: u64,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.db.state.lock();
        let rows = state.pending.remove(&self.conn).unwrap_or_default();
        state.rows.extend(rows);
        state.events.push(MockEvent::Commit { conn: self.conn });
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut state = self.db.state.lock();
        state.discard_pending(self.conn);
        state.events.push(MockEvent::Rollback { conn: self.conn });
        Ok(())
    }
}

/// Highest `$n` placeholder in `sql`
fn placeholder_count(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let digits: String = sql[i + 1..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(n) = digits.parse::<usize>() {
                max = max.max(n);
            }
            i += 1 + digits.len();
        } else {
            i += 1;
        }
    }
    max
}
