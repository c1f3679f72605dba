use crate::batch::Batch;
use crate::config::PublishPolicy;
use crate::sampler::{elapsed_ms, read_is_newer, record_reading, sample_all};
use crate::sensor::{Sensor, SensorSnapshot};
use crate::sink::Sink;
use serde::Serialize;
use uuid::Uuid;


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishState {
    /// Zero until the first accepted push.
    pub last_publish_time_ms: u64,
    /// A publish was wanted but the minimum interval had not elapsed.
    pub deferred_publish: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Deferred,
    Published { batch_id: Uuid, entries: usize },
    PushFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublisherStatus {
    #[serde(flatten)]
    pub state: PublishState,
    pub batch_entries: usize,
    pub sensors: Vec<SensorSnapshot>,
}

/// Owns the registry, the open record and the publish state. Everything here is driven from a
/// single tick handler.
pub struct Publisher {
    sensors: Vec<Box<dyn Sensor>>,
    batch: Batch,
    state: PublishState,
    policy: PublishPolicy,
}

impl Publisher {
    pub fn new(sensors: Vec<Box<dyn Sensor>>, policy: PublishPolicy, max_batch_entries: usize) -> Self {
        Self {
            sensors,
            batch: Batch::with_capacity(max_batch_entries),
            state: PublishState::default(),
            policy,
        }
    }

    pub fn tick(&mut self, now: u64, sink: &mut dyn Sink) -> TickOutcome {
        let publish = sample_all(
            &mut self.sensors,
            &mut self.batch,
            &self.policy,
            self.state.last_publish_time_ms,
            now,
        );
        self.schedule(publish, now, sink)
    }

    fn schedule(&mut self, publish: bool, now: u64, sink: &mut dyn Sink) -> TickOutcome {
        if !publish && !self.state.deferred_publish {
            return TickOutcome::Idle;
        }

        if elapsed_ms(now, self.state.last_publish_time_ms) < self.policy.min_interval_ms {
            if !self.state.deferred_publish {
                tracing::debug!(
                    last_publish_time_ms = self.state.last_publish_time_ms,
                    "publish deferred by minimum interval"
                );
            }
            self.state.deferred_publish = true;
            return TickOutcome::Deferred;
        }

        let stale = self.record_stale(now);
        if self.batch.is_empty() {
            tracing::debug!("flushing an empty record");
        }
        match sink.push(&mut self.batch) {
            Ok(ticket) => {
                self.state.last_publish_time_ms = now;
                self.state.deferred_publish = false;
                tracing::info!(
                    batch_id = %ticket.batch_id,
                    entries = ticket.entries,
                    stale,
                    "published sensor record"
                );
                TickOutcome::Published {
                    batch_id: ticket.batch_id,
                    entries: ticket.entries,
                }
            }
            Err(err) => {
                tracing::error!(error=%err, entries = self.batch.len(), "failed to push record");
                TickOutcome::PushFailed
            }
        }
    }

    /// Records the latest reading of every sensor whose last record is older than the stale
    /// bound and which has been read since. Returns how many sensors were recorded.
    fn record_stale(&mut self, now: u64) -> usize {
        let mut recorded = 0;
        for sensor in self.sensors.iter_mut() {
            let sensor = sensor.as_mut();
            let last_recorded = sensor.last_recorded_time();
            let last_read = sensor.last_read_time();
            let stale = elapsed_ms(now, last_recorded) > self.policy.stale_after_ms
                && read_is_newer(last_read, last_recorded, now);
            if stale && record_reading(sensor, &mut self.batch, last_read) {
                tracing::debug!(sensor = %sensor.name(), "recorded stale reading");
                recorded += 1;
            }
        }
        recorded
    }

    pub fn state(&self) -> PublishState {
        self.state
    }

    pub fn status(&self) -> PublisherStatus {
        PublisherStatus {
            state: self.state(),
            batch_entries: self.batch.len(),
            sensors: self.sensors.iter().map(|s| s.snapshot()).collect(),
        }
    }
}
