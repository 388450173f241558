//! Record formatting
//!
//! The formatter turns a [`Record`] into a [`ChunkEntry`] at enqueue time and
//! turns a decoded payload back into positional statement arguments at flush
//! time. The payload shape is fixed when the formatter is built.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use indexmap::IndexMap;
use pglog_rdbc::Value;

use crate::chunk::{ChunkEntry, Payload};
use crate::config::{PayloadFormat, PgLogConfig};
use crate::encoding::TextEncoding;
use crate::error::{Error, Result};
use crate::record::Record;

/// Payload shape, chosen once from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatMode {
    /// Values of these fields, in this order
    Raw(Vec<String>),
    /// The whole record as a JSON object
    Json,
}

impl FormatMode {
    /// Raw mode from a comma-separated field list.
    ///
    /// Names are taken as written; surrounding spaces are part of the name.
    pub fn raw(key_names: &str) -> Self {
        Self::Raw(key_names.split(',').map(str::to_string).collect())
    }
}

#[derive(Debug, Clone)]
struct TimeField {
    key: String,
    format: Option<String>,
    localtime: bool,
}

impl TimeField {
    fn render(&self, time: i64) -> Result<String> {
        let utc = DateTime::<Utc>::from_timestamp(time, 0).ok_or_else(|| {
            Error::encoding(&self.key, format!("timestamp {} out of range", time))
        })?;

        Ok(match (&self.format, self.localtime) {
            (Some(fmt), false) => utc.format(fmt).to_string(),
            (Some(fmt), true) => utc.with_timezone(&Local).format(fmt).to_string(),
            (None, false) => utc.to_rfc3339_opts(SecondsFormat::Secs, true),
            (None, true) => utc
                .with_timezone(&Local)
                .to_rfc3339_opts(SecondsFormat::Secs, false),
        })
    }
}

/// Formats records into chunk entries and back into statement arguments
#[derive(Debug, Clone)]
pub struct RecordFormatter {
    mode: FormatMode,
    encoding: Option<TextEncoding>,
    time_field: Option<TimeField>,
    tag_key: Option<String>,
}

impl RecordFormatter {
    /// Create a formatter with no encoding and no injected fields
    pub fn new(mode: FormatMode) -> Self {
        Self {
            mode,
            encoding: None,
            time_field: None,
            tag_key: None,
        }
    }

    /// Build from the sink configuration
    pub fn from_config(config: &PgLogConfig) -> Result<Self> {
        let mode = match config.format {
            PayloadFormat::Json => FormatMode::Json,
            PayloadFormat::Raw => match config.key_names.as_deref() {
                Some(names) if !names.is_empty() => FormatMode::raw(names),
                _ => return Err(Error::config("'key_names' required for raw format")),
            },
        };

        let mut formatter = Self::new(mode);
        if let Some(name) = &config.force_encoding {
            formatter = formatter.with_encoding(name.parse()?);
        }
        if config.include_time_key {
            formatter = formatter.with_time_key(
                &config.time_key,
                config.time_format.clone(),
                config.localtime,
            )?;
        }
        if config.include_tag_key {
            formatter = formatter.with_tag_key(&config.tag_key);
        }
        Ok(formatter)
    }

    /// Coerce string values to `encoding`
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Inject the entry time under `key`, rendered with a strftime `format`
    pub fn with_time_key(
        mut self,
        key: impl Into<String>,
        format: Option<String>,
        localtime: bool,
    ) -> Result<Self> {
        if let Some(fmt) = &format {
            if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
                return Err(Error::config(format!("invalid time_format '{}'", fmt)));
            }
        }
        self.time_field = Some(TimeField {
            key: key.into(),
            format,
            localtime,
        });
        Ok(self)
    }

    /// Inject the tag under `key`
    pub fn with_tag_key(mut self, key: impl Into<String>) -> Self {
        self.tag_key = Some(key.into());
        self
    }

    /// Payload shape
    pub fn mode(&self) -> &FormatMode {
        &self.mode
    }

    /// Configured encoding, if any
    pub fn encoding(&self) -> Option<TextEncoding> {
        self.encoding
    }

    /// Format one record. The caller's record is never modified.
    pub fn format(&self, tag: &str, time: i64, record: &Record) -> Result<ChunkEntry> {
        let record = self.prepare(tag, time, record)?;

        let payload = match &self.mode {
            FormatMode::Raw(keys) => Payload::Raw(
                keys.iter()
                    .map(|key| record.get(key).cloned().unwrap_or(Value::Null))
                    .collect(),
            ),
            FormatMode::Json => Payload::Json(record.to_json_string()?),
        };

        Ok(ChunkEntry::new(tag, time, payload))
    }

    /// Positional statement arguments for a decoded payload.
    ///
    /// Normalization runs again here since the codec does not carry encoding
    /// metadata. JSON payloads yield their values in the object's key order.
    pub fn arguments(&self, payload: Payload) -> Result<Vec<Value>> {
        match payload {
            Payload::Raw(mut values) => {
                if let Some(encoding) = self.encoding {
                    encoding.normalize_values(&mut values)?;
                }
                Ok(values)
            }
            Payload::Json(text) => {
                let object: IndexMap<String, serde_json::Value> = serde_json::from_str(&text)
                    .map_err(|e| Error::Decode(format!("JSON payload: {}", e)))?;

                object
                    .into_iter()
                    .map(|(key, json)| {
                        let value = Value::from(json);
                        match self.encoding {
                            Some(encoding) if value.is_stringish() => {
                                encoding.normalize_value(&key, value)
                            }
                            _ => Ok(value),
                        }
                    })
                    .collect()
            }
        }
    }

    fn prepare(&self, tag: &str, time: i64, record: &Record) -> Result<Record> {
        if self.time_field.is_none() && self.tag_key.is_none() {
            return match self.encoding {
                Some(encoding) => encoding.normalize_record(record),
                None => Ok(record.clone()),
            };
        }

        let mut record = record.clone();
        if let Some(field) = &self.time_field {
            record.insert(field.key.as_str(), field.render(time)?);
        }
        if let Some(key) = &self.tag_key {
            record.insert(key.as_str(), tag);
        }
        match self.encoding {
            Some(encoding) => encoding.normalize_record(&record),
            None => Ok(record),
        }
    }
}
