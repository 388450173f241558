//! Text encoding normalization
//!
//! When `force_encoding` is configured, every string-typed value is
//! reinterpreted in that encoding before formatting, and again at flush time
//! after the chunk is decoded. Non-string values pass through untouched.
//! Applying the same encoding twice is the same as applying it once.

use pglog_rdbc::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::record::Record;

/// Target text encoding for string values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    /// UTF-8; byte strings must decode strictly
    Utf8,
    /// 7-bit US-ASCII
    Ascii,
    /// ISO-8859-1, every byte is one code point
    Latin1,
    /// Opaque bytes (`ASCII-8BIT`); text is kept as raw bytes
    Binary,
}

impl TextEncoding {
    /// Canonical encoding name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Ascii => "US-ASCII",
            Self::Latin1 => "ISO-8859-1",
            Self::Binary => "ASCII-8BIT",
        }
    }

    /// Reinterpret one value
    pub fn normalize_value(self, field: &str, value: Value) -> Result<Value> {
        match (self, value) {
            (Self::Utf8, Value::Bytes(bytes)) => String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|e| self.malformed(field, e.utf8_error().valid_up_to())),
            (Self::Ascii, Value::String(s)) => match s.bytes().position(|b| !b.is_ascii()) {
                None => Ok(Value::String(s)),
                Some(at) => Err(self.malformed(field, at)),
            },
            (Self::Ascii, Value::Bytes(bytes)) => match bytes.iter().position(|b| !b.is_ascii()) {
                // ASCII is a subset of UTF-8.
                None => Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned())),
                Some(at) => Err(self.malformed(field, at)),
            },
            (Self::Latin1, Value::Bytes(bytes)) => {
                Ok(Value::String(bytes.iter().map(|&b| char::from(b)).collect()))
            }
            (Self::Binary, Value::String(s)) => Ok(Value::Bytes(s.into_bytes())),
            (_, value) => Ok(value),
        }
    }

    /// Normalize a copy of the record
    pub fn normalize_record(self, record: &Record) -> Result<Record> {
        let mut normalized = Record::new();
        for (name, value) in record.iter() {
            let value = if value.is_stringish() {
                self.normalize_value(name, value.clone())?
            } else {
                value.clone()
            };
            normalized.insert(name, value);
        }
        Ok(normalized)
    }

    /// Normalize positional values in place; fields are labelled by position
    pub fn normalize_values(self, values: &mut [Value]) -> Result<()> {
        for (i, slot) in values.iter_mut().enumerate() {
            if slot.is_stringish() {
                let value = std::mem::replace(slot, Value::Null);
                *slot = self.normalize_value(&format!("${}", i + 1), value)?;
            }
        }
        Ok(())
    }

    fn malformed(self, field: &str, offset: usize) -> Error {
        Error::encoding(
            field,
            format!("invalid byte sequence in {} at offset {}", self.name(), offset),
        )
    }
}

impl FromStr for TextEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        match key.as_str() {
            "utf8" => Ok(Self::Utf8),
            "usascii" | "ascii" => Ok(Self::Ascii),
            "iso88591" | "latin1" => Ok(Self::Latin1),
            "ascii8bit" | "binary" => Ok(Self::Binary),
            _ => Err(Error::config(format!("unknown force_encoding '{}'", s))),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
