use crate::batch::Batch;
use crate::config::PublishPolicy;
use crate::sensor::Sensor;

/// Milliseconds from `since` to `now`. A `since` in the future means the wall clock stepped
/// back, which counts as every bound having elapsed.
pub(crate) fn elapsed_ms(now: u64, since: u64) -> u64 {
    now.checked_sub(since).unwrap_or(u64::MAX)
}

/// Whether a read stamped `read` is newer than an event stamped `reference`. After a backward
/// clock step, reads stamped at or before `now` are newer than anything stamped after it.
/// Zero means never read.
pub(crate) fn read_is_newer(read: u64, reference: u64, now: u64) -> bool {
    read > reference || (reference > now && read != 0 && read <= now)
}

/// Records `sensor`'s last-read value at `timestamp_ms` and advances its recorded state.
/// Returns false when the append failed; the descriptor is left as it was.
pub(crate) fn record_reading(sensor: &mut dyn Sensor, batch: &mut Batch, timestamp_ms: u64) -> bool {
    match sensor.record(batch, timestamp_ms) {
        Ok(()) => {
            sensor.mark_recorded(timestamp_ms);
            true
        }
        Err(err) => {
            tracing::warn!(sensor = %sensor.name(), error=%err, "failed to record reading");
            false
        }
    }
}

/// One sampling pass over the registry. Returns whether a publish is wanted this tick.
pub fn sample_all(
    sensors: &mut [Box<dyn Sensor>],
    batch: &mut Batch,
    policy: &PublishPolicy,
    last_publish_time: u64,
    now: u64,
) -> bool {
    let mut publish = false;

    for sensor in sensors.iter_mut() {
        let sensor = sensor.as_mut();
        match sensor.read(now) {
            Ok(()) => {
                let wanted = sensor.last_recorded_time() == 0 || sensor.exceeds_threshold();
                if wanted && record_reading(sensor, batch, now) {
                    tracing::trace!(sensor = %sensor.name(), "recorded reading");
                    publish = true;
                }
            }
            Err(err) => {
                tracing::warn!(sensor = %sensor.name(), error=%err, "failed to read sensor");
            }
        }

        // Nothing crossed a threshold for too long, but there is fresh data to send.
        let unpublished_read = read_is_newer(sensor.last_read_time(), last_publish_time, now);
        if elapsed_ms(now, sensor.last_recorded_time()) > policy.max_interval_ms && unpublished_read {
            publish = true;
        }
    }

    publish
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::{LightLevel, Temperature};
    use crate::sensor::fakes::ScriptedDriver;
    use crate::sensor::Descriptor;

    #[test]
    fn first_reading_is_always_recorded() {
        let light = ScriptedDriver::new();
        light.push(LightLevel(0));
        let mut sensors = vec![Descriptor::boxed("light level", light)];
        let mut batch = Batch::with_capacity(16);

        let publish = sample_all(&mut sensors, &mut batch, &PublishPolicy::default(), 0, 1_000);

        assert!(publish);
        assert_eq!(batch.len(), 1);
        assert_eq!(sensors[0].last_recorded_time(), 1_000);
    }

    #[test]
    fn temperature_records_only_past_threshold() {
        let temperature = ScriptedDriver::new();
        for value in [20.0, 20.5, 23.5] {
            temperature.push(Temperature(value));
        }
        let mut sensors = vec![Descriptor::boxed("temperature", temperature)];
        let mut batch = Batch::with_capacity(16);
        let policy = PublishPolicy::default();

        assert!(sample_all(&mut sensors, &mut batch, &policy, 0, 1_000));
        assert!(!sample_all(&mut sensors, &mut batch, &policy, 1_000, 2_000));
        assert!(sample_all(&mut sensors, &mut batch, &policy, 1_000, 3_000));

        let values: Vec<_> = batch.entries().iter().map(|e| e.value).collect();
        assert_eq!(
            values,
            vec![
                crate::batch::EntryValue::Float(20.0),
                crate::batch::EntryValue::Float(23.5)
            ]
        );
        assert_eq!(sensors[0].last_recorded_time(), 3_000);
    }

    #[test]
    fn read_failure_skips_only_that_sensor() {
        let light = ScriptedDriver::<LightLevel>::new();
        light.push_failure();
        let temperature = ScriptedDriver::new();
        temperature.push(Temperature(18.0));
        let mut sensors = vec![
            Descriptor::boxed("light level", light),
            Descriptor::boxed("temperature", temperature),
        ];
        let mut batch = Batch::with_capacity(16);

        assert!(sample_all(&mut sensors, &mut batch, &PublishPolicy::default(), 0, 1_000));
        assert_eq!(sensors[0].last_read_time(), 0);
        assert_eq!(sensors[0].last_recorded_time(), 0);
        assert_eq!(sensors[1].last_recorded_time(), 1_000);
    }

    #[test]
    fn record_failure_does_not_advance_state() {
        let temperature = ScriptedDriver::new();
        temperature.push(Temperature(18.0));
        temperature.push(Temperature(18.0));
        let mut sensors = vec![Descriptor::boxed("temperature", temperature)];
        let mut batch = Batch::with_capacity(1);
        batch.record_int("filler", 0, 0).unwrap();

        assert!(!sample_all(&mut sensors, &mut batch, &PublishPolicy::default(), 0, 1_000));
        assert_eq!(sensors[0].last_recorded_time(), 0);

        // Same value is retried once there is room.
        batch.clear();
        assert!(sample_all(&mut sensors, &mut batch, &PublishPolicy::default(), 0, 2_000));
        assert_eq!(sensors[0].last_recorded_time(), 2_000);
    }

    #[test]
    fn max_interval_forces_publish_for_fresh_unpublished_reads() {
        let temperature = ScriptedDriver::new();
        temperature.push(Temperature(20.0));
        temperature.push(Temperature(20.1));
        temperature.push(Temperature(20.2));
        let mut sensors = vec![Descriptor::boxed("temperature", temperature)];
        let mut batch = Batch::with_capacity(16);
        let policy = PublishPolicy::default();

        assert!(sample_all(&mut sensors, &mut batch, &policy, 0, 1_000));
        // Exactly at the bound: not yet.
        assert!(!sample_all(&mut sensors, &mut batch, &policy, 1_000, 121_000));
        assert!(sample_all(&mut sensors, &mut batch, &policy, 1_000, 121_001));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn max_interval_ignores_reads_already_published() {
        let temperature = ScriptedDriver::new();
        temperature.push(Temperature(20.0));
        temperature.push_failure();
        let mut sensors = vec![Descriptor::boxed("temperature", temperature)];
        let mut batch = Batch::with_capacity(16);
        let policy = PublishPolicy::default();

        assert!(sample_all(&mut sensors, &mut batch, &policy, 0, 1_000));
        // Last read at 1_000 was already published at 1_000 and the new read failed.
        assert!(!sample_all(&mut sensors, &mut batch, &policy, 1_000, 200_000));
    }

    #[test]
    fn clock_step_back_counts_as_elapsed() {
        assert_eq!(elapsed_ms(5_000, 2_000), 3_000);
        assert_eq!(elapsed_ms(2_000, 5_000), u64::MAX);

        assert!(read_is_newer(6_000, 5_000, 6_000));
        assert!(!read_is_newer(5_000, 5_000, 6_000));
        // Published at 5_000, clock now reads 2_000: a read at 2_000 is the newer one.
        assert!(read_is_newer(2_000, 5_000, 2_000));
        assert!(!read_is_newer(0, 5_000, 2_000));
    }
}
