//! PostgreSQL backend implementation for pglog-rdbc
//!
//! Provides PostgreSQL-specific implementations:
//! - Connection and server-side prepared statements
//! - Transactions (BEGIN/COMMIT/ROLLBACK on the owning session)
//! - Parameter encoding that adapts a [`Value`] to the type the server
//!   inferred for each placeholder
//! - SQLSTATE to [`ErrorCategory`](crate::error::ErrorCategory) mapping

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::types::{to_sql_checked, IsNull, Kind, ToSql, Type};
use tracing::{debug, trace, warn};

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, PreparedStatement, Transaction,
};
use crate::error::{Error, Result};
use crate::types::Value;

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// How long `close` waits for the server to acknowledge termination
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Values are encoded against the parameter type the server inferred at
/// prepare time, the way a text-format client lets the server coerce.
impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                _ => encode_text(&b.to_string(), ty, out),
            },
            Value::Int64(n) => match *ty {
                Type::INT2 => i16::try_from(*n)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*n)?.to_sql(ty, out),
                Type::INT8 => n.to_sql(ty, out),
                Type::FLOAT4 => (*n as f32).to_sql(ty, out),
                Type::FLOAT8 => (*n as f64).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*n).to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::Value::from(*n).to_sql(ty, out),
                _ => encode_text(&n.to_string(), ty, out),
            },
            Value::Float64(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::FLOAT8 => f.to_sql(ty, out),
                Type::NUMERIC if !f.is_finite() => encode_numeric_special(*f, out),
                Type::NUMERIC => Decimal::try_from(*f)?.to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::Value::from(*f).to_sql(ty, out),
                _ => encode_text(&f.to_string(), ty, out),
            },
            Value::String(s) => encode_text(s, ty, out),
            Value::Bytes(b) => match *ty {
                Type::BYTEA => b.as_slice().to_sql(ty, out),
                _ => encode_text(std::str::from_utf8(b)?, ty, out),
            },
            Value::Json(j) => match *ty {
                Type::JSON | Type::JSONB => j.to_sql(ty, out),
                _ => encode_text(&j.to_string(), ty, out),
            },
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Encode text for a typed parameter, parsing it as the server would parse a
/// text-format literal of that type.
fn encode_text(
    text: &str,
    ty: &Type,
    out: &mut BytesMut,
) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::BOOL => parse_bool(text)?.to_sql(ty, out),
        Type::INT2 => text.trim().parse::<i16>()?.to_sql(ty, out),
        Type::INT4 => text.trim().parse::<i32>()?.to_sql(ty, out),
        Type::INT8 => text.trim().parse::<i64>()?.to_sql(ty, out),
        Type::FLOAT4 => text.trim().parse::<f32>()?.to_sql(ty, out),
        Type::FLOAT8 => text.trim().parse::<f64>()?.to_sql(ty, out),
        Type::NUMERIC => match text.trim().parse::<Decimal>() {
            Ok(d) => d.to_sql(ty, out),
            Err(e) => match text.trim().parse::<f64>() {
                Ok(f) if !f.is_finite() => encode_numeric_special(f, out),
                _ => Err(e.into()),
            },
        },
        Type::JSON | Type::JSONB => {
            serde_json::from_str::<serde_json::Value>(text)?.to_sql(ty, out)
        }
        Type::TIMESTAMPTZ => parse_timestamptz(text.trim())?.to_sql(ty, out),
        Type::TIMESTAMP => parse_timestamp(text.trim())?.to_sql(ty, out),
        Type::DATE => {
            chrono::NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")?.to_sql(ty, out)
        }
        Type::TIME => parse_time(text.trim())?.to_sql(ty, out),
        Type::UUID => uuid::Uuid::parse_str(text.trim())?.to_sql(ty, out),
        Type::INET | Type::CIDR => encode_inet(text.trim(), *ty == Type::CIDR, out),
        Type::INTERVAL => encode_interval(text.trim(), out),
        Type::BYTEA => text.as_bytes().to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            out.extend_from_slice(text.as_bytes());
            Ok(IsNull::No)
        }
        // Enum labels and citext use the plain text bytes as binary format.
        _ if matches!(ty.kind(), Kind::Enum(_)) || ty.name() == "citext" => {
            out.extend_from_slice(text.as_bytes());
            Ok(IsNull::No)
        }
        _ => Err(format!("cannot encode text value as parameter of type {}", ty.name()).into()),
    }
}

/// Boolean literals the server accepts, including unique prefixes
fn parse_bool(text: &str) -> std::result::Result<bool, BoxError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "t" | "tr" | "tru" | "true" | "y" | "ye" | "yes" | "on" | "1" => Ok(true),
        "f" | "fa" | "fal" | "fals" | "false" | "n" | "no" | "of" | "off" | "0" => Ok(false),
        _ => Err(format!("invalid input syntax for type boolean: \"{}\"", text).into()),
    }
}

fn parse_with_offset(text: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    chrono::DateTime::parse_from_rfc3339(text)
        .or_else(|_| chrono::DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .ok()
}

fn parse_timestamptz(text: &str) -> std::result::Result<chrono::DateTime<chrono::Utc>, BoxError> {
    if let Some(ts) = parse_with_offset(text) {
        return Ok(ts.with_timezone(&chrono::Utc));
    }
    // No offset given: the value is taken as UTC.
    Ok(parse_timestamp(text)?.and_utc())
}

/// A `timestamp` column keeps the wall-clock part and drops any offset.
fn parse_timestamp(text: &str) -> std::result::Result<chrono::NaiveDateTime, BoxError> {
    if let Some(ts) = parse_with_offset(text) {
        return Ok(ts.naive_local());
    }
    chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(Into::into)
}

fn parse_time(text: &str) -> std::result::Result<chrono::NaiveTime, BoxError> {
    chrono::NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| chrono::NaiveTime::parse_from_str(text, "%H:%M"))
        .map_err(Into::into)
}

/// NaN and the infinities in numeric's binary format, which `Decimal` cannot
/// hold. Infinity needs PostgreSQL 14 or later; older servers reject it.
fn encode_numeric_special(f: f64, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    let sign: u16 = if f.is_nan() {
        0xC000
    } else if f > 0.0 {
        0xD000
    } else {
        0xF000
    };
    out.put_i16(0); // ndigits
    out.put_i16(0); // weight
    out.put_u16(sign);
    out.put_u16(0); // dscale
    Ok(IsNull::No)
}

/// `addr` or `addr/bits` in inet's binary format
fn encode_inet(text: &str, cidr: bool, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    let (addr, bits) = match text.split_once('/') {
        Some((addr, bits)) => (addr.parse::<IpAddr>()?, Some(bits.parse::<u8>()?)),
        None => (text.parse::<IpAddr>()?, None),
    };
    let (family, max_bits, octets) = match addr {
        IpAddr::V4(a) => (2u8, 32u8, a.octets().to_vec()),
        IpAddr::V6(a) => (3u8, 128u8, a.octets().to_vec()),
    };
    let bits = bits.unwrap_or(max_bits);
    if bits > max_bits {
        return Err(format!("invalid input syntax for type inet: \"{}\"", text).into());
    }
    out.put_u8(family);
    out.put_u8(bits);
    out.put_u8(u8::from(cidr));
    out.put_u8(octets.len() as u8);
    out.put_slice(&octets);
    Ok(IsNull::No)
}

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Interval text in the server's `<n> <unit> ... [HH:MM[:SS]] [ago]` form,
/// written as interval's binary format. ISO 8601 `P...` durations are not
/// accepted.
fn encode_interval(text: &str, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    let invalid = || -> BoxError {
        format!("invalid input syntax for type interval: \"{}\"", text).into()
    };

    let (mut months, mut days, mut micros) = (0f64, 0f64, 0f64);
    let mut tokens = text.split_whitespace().peekable();
    let mut negate = false;
    let mut seen = false;

    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case("ago") && tokens.peek().is_none() {
            negate = true;
            continue;
        }
        seen = true;
        if token.contains(':') {
            micros += parse_clock(token).ok_or_else(invalid)?;
            continue;
        }
        let n: f64 = token.parse().map_err(|_| invalid())?;
        let unit = tokens.next().ok_or_else(invalid)?.to_ascii_lowercase();
        match unit.trim_end_matches(',') {
            "year" | "years" | "y" => months += n * 12.0,
            "mon" | "mons" | "month" | "months" => months += n,
            "week" | "weeks" | "w" => days += n * 7.0,
            "day" | "days" | "d" => days += n,
            "hour" | "hours" | "hr" | "hrs" | "h" => micros += n * 3600.0 * MICROS_PER_SECOND,
            "minute" | "minutes" | "min" | "mins" | "m" => micros += n * 60.0 * MICROS_PER_SECOND,
            "second" | "seconds" | "sec" | "secs" | "s" => micros += n * MICROS_PER_SECOND,
            "millisecond" | "milliseconds" | "ms" => micros += n * 1_000.0,
            "microsecond" | "microseconds" | "us" => micros += n,
            _ => return Err(invalid()),
        }
    }
    if !seen {
        return Err(invalid());
    }

    // Fractions spill downward: a month is 30 days, a day 24 hours.
    let whole_months = months.trunc();
    days += (months - whole_months) * 30.0;
    let whole_days = days.trunc();
    micros += (days - whole_days) * 86_400.0 * MICROS_PER_SECOND;

    let sign = if negate { -1.0 } else { 1.0 };
    out.put_i64((sign * micros).round() as i64);
    out.put_i32((sign * whole_days) as i32);
    out.put_i32((sign * whole_months) as i32);
    Ok(IsNull::No)
}

/// `[-]HH:MM[:SS[.f]]` in microseconds
fn parse_clock(token: &str) -> Option<f64> {
    let (sign, clock) = match token.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, token.strip_prefix('+').unwrap_or(token)),
    };
    let mut parts = clock.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = match parts.next() {
        Some(s) => s.parse().ok()?,
        None => 0.0,
    };
    if parts.next().is_some() || minutes >= 60.0 || seconds >= 60.0 {
        return None;
    }
    Some(sign * (hours * 3600.0 + minutes * 60.0 + seconds) * MICROS_PER_SECOND)
}

/// Classify a tokio-postgres error by its SQLSTATE
pub(crate) fn map_pg_error(err: tokio_postgres::Error, sql: Option<&str>) -> Error {
    let db = err.as_db_error().map(|db| {
        (
            db.code().code().to_owned(),
            db.message().to_owned(),
            db.constraint().map(str::to_owned),
        )
    });

    let Some((code, message, constraint)) = db else {
        if err.is_closed() {
            return Error::connection_with_source("connection closed", err);
        }
        return Error::Query {
            message: err.to_string(),
            sql: sql.map(str::to_owned),
            sqlstate: None,
            source: Some(Box::new(err)),
        };
    };

    match code.as_str() {
        "40P01" => Error::Deadlock,
        "57014" => Error::timeout(message),
        c if c.starts_with("08") => Error::connection_with_source(message, err),
        c if c.starts_with("28") => Error::authentication(message),
        c if c.starts_with("23") => {
            Error::constraint(constraint.unwrap_or_else(|| code.clone()), message)
        }
        c if c.starts_with("22") => Error::type_conversion(message),
        _ => Error::Query {
            message: format!("{} (SQLSTATE {})", message, code),
            sql: sql.map(str::to_owned),
            sqlstate: Some(code.clone()),
            source: Some(Box::new(err)),
        },
    }
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    driver: JoinHandle<std::result::Result<(), tokio_postgres::Error>>,
}

impl PgConnection {
    /// Wrap a client and the task driving its socket
    pub fn new(
        client: tokio_postgres::Client,
        driver: JoinHandle<std::result::Result<(), tokio_postgres::Error>>,
    ) -> Self {
        Self {
            client: Arc::new(client),
            driver,
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn prepare(&self, name: &str, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| map_pg_error(e, Some(sql)))?;

        trace!(
            statement = name,
            params = statement.params().len(),
            "Prepared statement"
        );

        Ok(Box::new(PgPreparedStatement {
            client: Arc::clone(&self.client),
            statement,
            name: name.to_string(),
            sql: sql.to_string(),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| Error::transaction(e.to_string(), e))?;

        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
            finished: AtomicBool::new(false),
        }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let Self { client, mut driver } = *self;

        // The driver sends Terminate once the last client handle is gone.
        drop(client);

        match tokio::time::timeout(CLOSE_TIMEOUT, &mut driver).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(Error::connection_with_source(
                "connection terminated with error",
                e,
            )),
            Ok(Err(join)) => Err(Error::connection(format!(
                "connection task failed: {}",
                join
            ))),
            Err(_) => {
                driver.abort();
                Err(Error::timeout("connection did not terminate in time"))
            }
        }
    }
}

/// PostgreSQL prepared statement
pub struct PgPreparedStatement {
    client: Arc<tokio_postgres::Client>,
    statement: tokio_postgres::Statement,
    name: String,
    sql: String,
}

#[async_trait]
impl PreparedStatement for PgPreparedStatement {
    async fn execute(&self, params: &[Value]) -> Result<u64> {
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

        self.client
            .execute(&self.statement, &param_refs)
            .await
            .map_err(|e| map_pg_error(e, Some(&self.sql)))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    fn param_count(&self) -> usize {
        self.statement.params().len()
    }
}

/// PostgreSQL transaction
pub struct PgTransaction {
    client: Arc<tokio_postgres::Client>,
    finished: AtomicBool,
}

impl PgTransaction {
    async fn finish(&self, sql: &str) -> Result<()> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| Error::transaction(e.to_string(), e))?;
        self.finished.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        // Can't roll back from drop; the server discards the open transaction
        // when the session ends.
        if !self.finished.load(Ordering::Relaxed) {
            warn!("transaction dropped without commit or rollback");
        }
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .dbname(&config.database)
            .user(&config.user);
        if config.has_password() {
            pg.password(config.password.expose_secret());
        }
        if let Some(port) = config.port {
            pg.port(port);
        }
        if let Some(timeout) = config.connect_timeout {
            pg.connect_timeout(timeout);
        }
        if let Some(name) = &config.application_name {
            pg.application_name(name);
        }

        let (client, connection) = pg
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| match map_pg_error(e, None) {
                e @ (Error::Authentication { .. } | Error::Connection { .. }) => e,
                other => Error::Connection {
                    message: format!("failed to connect to {}", config.endpoint()),
                    source: Some(Box::new(other)),
                },
            })?;

        let endpoint = config.endpoint();
        let driver = tokio::spawn(async move {
            let result = connection.await;
            if let Err(e) = &result {
                debug!(endpoint = %endpoint, error = %e, "postgres connection ended with error");
            }
            result
        });

        Ok(Box::new(PgConnection::new(client, driver)))
    }

    fn backend(&self) -> &'static str {
        "postgresql"
    }
}

/// Connect to a PostgreSQL database
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
    PgConnectionFactory.connect(config).await
}
