use crate::batch::{Batch, RecordError};
use crate::quantity::Reading;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

/// A source of fresh readings for one quantity. Failures are transient.
pub trait Driver<V>: Send {
    fn read(&mut self) -> Result<V, SensorError>;
}

/// Type-erased view of a descriptor, so the registry can hold every quantity in one list.
pub trait Sensor: Send {
    fn name(&self) -> &str;

    /// Reads into the last-read slot and stamps it with `now_ms`. On failure nothing changes.
    fn read(&mut self, now_ms: u64) -> Result<(), SensorError>;

    /// Change test of the last-read value against the last-recorded one.
    fn exceeds_threshold(&self) -> bool;

    /// Appends the last-read value to `batch` under `timestamp_ms`.
    fn record(&self, batch: &mut Batch, timestamp_ms: u64) -> Result<(), RecordError>;

    /// Copies the last-read value into the last-recorded slot.
    fn mark_recorded(&mut self, timestamp_ms: u64);

    fn last_read_time(&self) -> u64;

    /// Zero until the first successful record.
    fn last_recorded_time(&self) -> u64;

    fn snapshot(&self) -> SensorSnapshot;
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorSnapshot {
    pub name: String,
    pub last_read: serde_json::Value,
    pub last_recorded: serde_json::Value,
    pub last_read_time_ms: u64,
    pub last_recorded_time_ms: u64,
}

pub struct Descriptor<V: Reading> {
    name: String,
    driver: Box<dyn Driver<V>>,
    last_read: V,
    last_recorded: V,
    last_read_time: u64,
    last_recorded_time: u64,
}

impl<V: Reading> Descriptor<V> {
    pub fn new(name: impl Into<String>, driver: impl Driver<V> + 'static) -> Self {
        Self {
            name: name.into(),
            driver: Box::new(driver),
            last_read: V::default(),
            last_recorded: V::default(),
            last_read_time: 0,
            last_recorded_time: 0,
        }
    }

    pub fn boxed(name: impl Into<String>, driver: impl Driver<V> + 'static) -> Box<dyn Sensor> {
        Box::new(Self::new(name, driver))
    }
}

impl<V: Reading> Sensor for Descriptor<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, now_ms: u64) -> Result<(), SensorError> {
        self.last_read = self.driver.read()?;
        self.last_read_time = now_ms;
        Ok(())
    }

    fn exceeds_threshold(&self) -> bool {
        V::exceeds_threshold(&self.last_recorded, &self.last_read)
    }

    fn record(&self, batch: &mut Batch, timestamp_ms: u64) -> Result<(), RecordError> {
        self.last_read.record_into(batch, timestamp_ms)
    }

    fn mark_recorded(&mut self, timestamp_ms: u64) {
        self.last_recorded = self.last_read;
        self.last_recorded_time = timestamp_ms;
    }

    fn last_read_time(&self) -> u64 {
        self.last_read_time
    }

    fn last_recorded_time(&self) -> u64 {
        self.last_recorded_time
    }

    fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            name: self.name.clone(),
            last_read: serde_json::to_value(self.last_read).unwrap_or_default(),
            last_recorded: serde_json::to_value(self.last_recorded).unwrap_or_default(),
            last_read_time_ms: self.last_read_time,
            last_recorded_time_ms: self.last_recorded_time,
        }
    }
}
