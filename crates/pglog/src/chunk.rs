//! Chunk wire format
//!
//! Each formatted entry is the ordered triple `[tag, time, payload]`, packed
//! with postcard. A chunk is the entries concatenated in enqueue order; it
//! carries no header and no count, so the scheduler can append the output of
//! [`ChunkEntry::to_bytes`] directly.

use bytes::{BufMut, Bytes, BytesMut};
use pglog_rdbc::Value;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Formatted payload of one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Positional values in `key_names` order
    Raw(Vec<Value>),
    /// JSON object text, keys in record order
    Json(String),
}

impl Payload {
    /// Number of positional values; `None` until a JSON payload is parsed
    pub fn arity(&self) -> Option<usize> {
        match self {
            Self::Raw(values) => Some(values.len()),
            Self::Json(_) => None,
        }
    }
}

/// One formatted record as stored in a chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntry(pub String, pub i64, pub Payload);

impl ChunkEntry {
    /// Create an entry
    pub fn new(tag: impl Into<String>, time: i64, payload: Payload) -> Self {
        Self(tag.into(), time, payload)
    }

    /// Record tag
    pub fn tag(&self) -> &str {
        &self.0
    }

    /// Event time, epoch seconds
    pub fn time(&self) -> i64 {
        self.1
    }

    /// Formatted payload
    pub fn payload(&self) -> &Payload {
        &self.2
    }

    /// Take the payload out of the entry
    pub fn into_payload(self) -> Payload {
        self.2
    }

    /// Serialize the entry
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| Error::encoding(self.tag(), e.to_string()))
    }

    /// Append the serialized entry to `buf`
    pub fn write_to(&self, buf: Vec<u8>) -> Result<Vec<u8>> {
        postcard::to_extend(self, buf).map_err(|e| Error::encoding(self.tag(), e.to_string()))
    }
}

/// Decode every entry of a chunk, in order.
///
/// The whole buffer is decoded up front; trailing garbage or a truncated
/// entry fails the chunk without yielding any entry.
pub fn decode_chunk(mut data: &[u8]) -> Result<Vec<ChunkEntry>> {
    let mut entries = Vec::new();
    while !data.is_empty() {
        let (entry, rest) = postcard::take_from_bytes::<ChunkEntry>(data).map_err(|e| {
            Error::Decode(format!("entry {}: {}", entries.len(), e))
        })?;
        entries.push(entry);
        data = rest;
    }
    Ok(entries)
}

/// Accumulates serialized entries into a chunk buffer
#[derive(Debug, Default)]
pub struct ChunkBuilder {
    buf: BytesMut,
    entries: usize,
}

impl ChunkBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one serialized entry
    pub fn push(&mut self, entry: &[u8]) -> &mut Self {
        self.buf.put_slice(entry);
        self.entries += 1;
        self
    }

    /// Serialize and append an entry
    pub fn push_entry(&mut self, entry: &ChunkEntry) -> Result<&mut Self> {
        let bytes = entry.to_bytes()?;
        Ok(self.push(&bytes))
    }

    /// Entries appended so far
    pub fn len(&self) -> usize {
        self.entries
    }

    /// Whether nothing was appended
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Buffered bytes
    pub fn byte_len(&self) -> usize {
        self.buf.len()
    }

    /// Freeze into the chunk bytes
    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}
