use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("record is full ({capacity} entries), dropped {path}")]
    Overflow { path: String, capacity: usize },
    #[error("value for {path} is not finite")]
    NotFinite { path: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntryValue {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub path: String,
    #[serde(rename = "ts")]
    pub timestamp_ms: u64,
    pub value: EntryValue,
}

/// Open record of timestamped entries. It lives for the whole process; whether a push drains
/// it is up to the sink.
#[derive(Debug)]
pub struct Batch {
    entries: Vec<Entry>,
    capacity: usize,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record_int(&mut self, path: &str, value: i64, timestamp_ms: u64) -> Result<(), RecordError> {
        self.push(path, EntryValue::Int(value), timestamp_ms)
    }

    pub fn record_float(&mut self, path: &str, value: f64, timestamp_ms: u64) -> Result<(), RecordError> {
        if !value.is_finite() {
            return Err(RecordError::NotFinite {
                path: path.to_string(),
            });
        }
        self.push(path, EntryValue::Float(value), timestamp_ms)
    }

    fn push(&mut self, path: &str, value: EntryValue, timestamp_ms: u64) -> Result<(), RecordError> {
        if self.entries.len() >= self.capacity {
            return Err(RecordError::Overflow {
                path: path.to_string(),
                capacity: self.capacity,
            });
        }
        self.entries.push(Entry {
            path: path.to_string(),
            timestamp_ms,
            value,
        });
        Ok(())
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
