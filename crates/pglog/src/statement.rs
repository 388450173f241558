//! Insert statement derivation
//!
//! The statement is built once when the sink is created and shared read-only
//! by every flush afterwards.

use crate::config::PgLogConfig;
use crate::error::{Error, Result};

/// Label the insert is prepared with on each connection
pub const STATEMENT_NAME: &str = "write";

/// Parameterized insert, immutable after construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedInsert {
    table: Option<String>,
    columns: Vec<String>,
    sql: String,
}

impl PreparedInsert {
    /// Target table; `None` for an explicit statement
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Target columns; empty for an explicit statement
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// SQL text with `$n` placeholders
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Builds the [`PreparedInsert`] from configuration
#[derive(Debug, Default)]
pub struct StatementBuilder {
    sql: Option<String>,
    table: Option<String>,
    columns: Option<String>,
}

impl StatementBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `sql`, `table` and `columns` from the sink configuration
    pub fn from_config(config: &PgLogConfig) -> Self {
        Self {
            sql: config.sql.clone(),
            table: config.table.clone(),
            columns: config.columns.clone(),
        }
    }

    /// Use an explicit statement verbatim
    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Target table
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Comma-separated column list
    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = Some(columns.into());
        self
    }

    /// Derive the insert.
    ///
    /// An explicit statement wins and is not checked against the columns.
    pub fn build(self) -> Result<PreparedInsert> {
        if let Some(sql) = self.sql.filter(|s| !s.trim().is_empty()) {
            return Ok(PreparedInsert {
                table: None,
                columns: Vec::new(),
                sql,
            });
        }

        let columns = match self.columns.as_deref().map(parse_columns) {
            Some(columns) if !columns.is_empty() => columns,
            _ => return Err(Error::config("columns or sql MUST be specified, but missing")),
        };

        let table = match self.table.as_deref().map(str::trim) {
            Some(table) if !table.is_empty() => table.to_string(),
            _ => return Err(Error::config("'table' required when 'columns' is used")),
        };

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(","),
            placeholders.join(",")
        );

        Ok(PreparedInsert {
            table: Some(table),
            columns,
            sql,
        })
    }
}

fn parse_columns(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_from_columns() {
        let insert = StatementBuilder::new()
            .table("events")
            .columns("a,b")
            .build()
            .unwrap();

        assert_eq!(insert.sql(), "INSERT INTO events (a,b) VALUES ($1,$2)");
        assert_eq!(insert.table(), Some("events"));
        assert_eq!(insert.columns(), ["a", "b"]);
    }

    #[test]
    fn test_columns_are_trimmed() {
        let insert = StatementBuilder::new()
            .table("access_log")
            .columns(" host , path,status ,  ua")
            .build()
            .unwrap();

        assert_eq!(
            insert.sql(),
            "INSERT INTO access_log (host,path,status,ua) VALUES ($1,$2,$3,$4)"
        );
    }

    #[test]
    fn test_placeholders_match_column_count() {
        for n in 1..=12 {
            let columns: Vec<String> = (0..n).map(|i| format!("c{}", i)).collect();
            let insert = StatementBuilder::new()
                .table("t")
                .columns(columns.join(","))
                .build()
                .unwrap();

            assert_eq!(insert.columns().len(), n);
            assert_eq!(insert.sql().matches('$').count(), n);
            assert!(insert.sql().ends_with(&format!("${})", n)));
        }
    }

    #[test]
    fn test_explicit_sql_verbatim() {
        let sql = "INSERT INTO events (payload, at) VALUES ($1, now())";
        let insert = StatementBuilder::new()
            .sql(sql)
            .columns("ignored,entirely")
            .build()
            .unwrap();

        assert_eq!(insert.sql(), sql);
        assert_eq!(insert.table(), None);
        assert!(insert.columns().is_empty());
    }

    #[test]
    fn test_missing_sql_and_columns() {
        let err = StatementBuilder::new().table("events").build().unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("columns or sql")));

        let err = StatementBuilder::new().columns(" , ").table("t").build().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_columns_without_table() {
        let err = StatementBuilder::new().columns("a").build().unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("table")));
    }

    #[test]
    fn test_from_config() {
        let config = PgLogConfig {
            table: Some("events".into()),
            columns: Some("a, b".into()),
            ..Default::default()
        };
        let insert = StatementBuilder::from_config(&config).build().unwrap();
        assert_eq!(insert.sql(), "INSERT INTO events (a,b) VALUES ($1,$2)");
    }
}
