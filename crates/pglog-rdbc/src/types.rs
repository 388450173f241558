//! Positional statement arguments

use serde::{Deserialize, Serialize};

/// One positional argument of the prepared insert.
///
/// A record field maps to exactly one variant. Objects and arrays stay
/// nested as [`Value::Json`] so a JSON/JSONB column receives them intact;
/// any other column receives their text form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL, also used for a missing field
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int64(i64),
    /// Float
    Float64(f64),
    /// UTF-8 text
    String(String),
    /// Bytes whose text encoding is unknown
    Bytes(Vec<u8>),
    /// Object or array
    #[serde(with = "json_text")]
    Json(serde_json::Value),
}

impl Value {
    /// `true` for [`Value::Null`]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text or bytes: the variants an encoding applies to
    pub const fn is_stringish(&self) -> bool {
        matches!(self, Self::String(_) | Self::Bytes(_))
    }

    /// The text of a [`Value::String`]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Variant name for error messages
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int64(_) => "integer",
            Self::Float64(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::$variant(v.into())
            }
        })*
    };
}

value_from! {
    bool => Bool,
    i32 => Int64,
    i64 => Int64,
    f64 => Float64,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match v {
            J::Null => Self::Null,
            J::Bool(b) => Self::Bool(b),
            J::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int64(i)
                } else if n.is_u64() {
                    // Above i64::MAX; kept as digits so no precision is lost
                    Self::String(n.to_string())
                } else {
                    n.as_f64().map_or_else(|| Self::String(n.to_string()), Self::Float64)
                }
            }
            J::String(s) => Self::String(s),
            nested @ (J::Array(_) | J::Object(_)) => Self::Json(nested),
        }
    }
}

/// Nested JSON is carried as its text so the chunk codec, which is not
/// self-describing, can round-trip it.
mod json_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &serde_json::Value, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<serde_json::Value, D::Error> {
        let text = String::deserialize(d)?;
        serde_json::from_str(&text).map_err(serde::de::Error::custom)
    }
}
