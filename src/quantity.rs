//! Value shapes for every monitored quantity.
//!
//! Each shape owns its change test and the wire paths it is recorded under, so a descriptor's
//! read, compare, record and copy steps are always checked against one concrete type.

use crate::batch::{Batch, RecordError};
use serde::Serialize;
use std::f64::consts::FRAC_PI_2;
use std::fmt;

pub const LIGHT_LEVEL_PATH: &str = "MangOH.Sensors.Light.Level";
pub const PRESSURE_PATH: &str = "MangOH.Sensors.Pressure.Pressure";
pub const TEMPERATURE_PATH: &str = "MangOH.Sensors.Pressure.Temperature";
pub const ACCELERATION_PATH_PREFIX: &str = "MangOH.Sensors.Accelerometer.Acceleration.";
pub const GYRO_PATH_PREFIX: &str = "MangOH.Sensors.Accelerometer.Gyro.";
pub const LOCATION_LATITUDE_PATH: &str = "lwm2m.6.0.0";
pub const LOCATION_LONGITUDE_PATH: &str = "lwm2m.6.0.1";
pub const LOCATION_ALTITUDE_PATH: &str = "lwm2m.6.0.2";
pub const LOCATION_H_ACCURACY_PATH: &str = "lwm2m.6.0.3";
pub const LOCATION_V_ACCURACY_PATH: &str = "lwm2m.6.0.MangOH.Sensors.Gps.VerticalAccuracy";

const LIGHT_THRESHOLD: i64 = 200;
const PRESSURE_THRESHOLD: f64 = 1.0;
const TEMPERATURE_THRESHOLD: f64 = 2.0;
// m/s^2; one G is about 9.8.
const ACCELERATION_THRESHOLD: f64 = 1.0;
// rad/s
const ANGULAR_VELOCITY_THRESHOLD: f64 = FRAC_PI_2;
// Degrees of latitude plus degrees of longitude, not a distance.
const LOCATION_THRESHOLD: f64 = 0.01;

pub trait Reading: Copy + Default + fmt::Debug + Serialize + Send + 'static {
    /// True when `candidate` differs enough from `recorded` to be worth recording.
    fn exceeds_threshold(recorded: &Self, candidate: &Self) -> bool;

    /// Appends this value to `batch`. Composite values append one entry per field and stop at
    /// the first failure; entries already appended stay in the batch.
    fn record_into(&self, batch: &mut Batch, timestamp_ms: u64) -> Result<(), RecordError>;
}

fn record_fields(batch: &mut Batch, timestamp_ms: u64, fields: &[(&str, f64)]) -> Result<(), RecordError> {
    for (path, value) in fields {
        batch.record_float(path, *value, timestamp_ms).inspect_err(|err| {
            tracing::warn!(path, error=%err, "failed to record field");
        })?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LightLevel(pub i32);

impl Reading for LightLevel {
    fn exceeds_threshold(recorded: &Self, candidate: &Self) -> bool {
        (i64::from(recorded.0) - i64::from(candidate.0)).abs() > LIGHT_THRESHOLD
    }

    fn record_into(&self, batch: &mut Batch, timestamp_ms: u64) -> Result<(), RecordError> {
        batch.record_int(LIGHT_LEVEL_PATH, i64::from(self.0), timestamp_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Pressure(pub f64);

impl Reading for Pressure {
    fn exceeds_threshold(recorded: &Self, candidate: &Self) -> bool {
        (recorded.0 - candidate.0).abs() > PRESSURE_THRESHOLD
    }

    fn record_into(&self, batch: &mut Batch, timestamp_ms: u64) -> Result<(), RecordError> {
        batch.record_float(PRESSURE_PATH, self.0, timestamp_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Temperature(pub f64);

impl Reading for Temperature {
    fn exceeds_threshold(recorded: &Self, candidate: &Self) -> bool {
        (recorded.0 - candidate.0).abs() > TEMPERATURE_THRESHOLD
    }

    fn record_into(&self, batch: &mut Batch, timestamp_ms: u64) -> Result<(), RecordError> {
        batch.record_float(TEMPERATURE_PATH, self.0, timestamp_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn delta_norm(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    fn record_axes(&self, prefix: &str, batch: &mut Batch, timestamp_ms: u64) -> Result<(), RecordError> {
        let x = format!("{prefix}X");
        let y = format!("{prefix}Y");
        let z = format!("{prefix}Z");
        record_fields(batch, timestamp_ms, &[(&x, self.x), (&y, self.y), (&z, self.z)])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Acceleration(pub Vector3);

impl Reading for Acceleration {
    fn exceeds_threshold(recorded: &Self, candidate: &Self) -> bool {
        recorded.0.delta_norm(&candidate.0) > ACCELERATION_THRESHOLD
    }

    fn record_into(&self, batch: &mut Batch, timestamp_ms: u64) -> Result<(), RecordError> {
        self.0.record_axes(ACCELERATION_PATH_PREFIX, batch, timestamp_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AngularVelocity(pub Vector3);

impl Reading for AngularVelocity {
    fn exceeds_threshold(recorded: &Self, candidate: &Self) -> bool {
        recorded.0.delta_norm(&candidate.0) > ANGULAR_VELOCITY_THRESHOLD
    }

    fn record_into(&self, batch: &mut Batch, timestamp_ms: u64) -> Result<(), RecordError> {
        self.0.record_axes(GYRO_PATH_PREFIX, batch, timestamp_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub h_accuracy: f64,
    pub altitude: f64,
    pub v_accuracy: f64,
}

impl Reading for Location {
    // Altitude and accuracy changes never trigger a record on their own.
    fn exceeds_threshold(recorded: &Self, candidate: &Self) -> bool {
        let delta_lat = candidate.latitude - recorded.latitude;
        let delta_lon = candidate.longitude - recorded.longitude;
        delta_lat.abs() + delta_lon.abs() > LOCATION_THRESHOLD
    }

    fn record_into(&self, batch: &mut Batch, timestamp_ms: u64) -> Result<(), RecordError> {
        record_fields(
            batch,
            timestamp_ms,
            &[
                (LOCATION_LATITUDE_PATH, self.latitude),
                (LOCATION_LONGITUDE_PATH, self.longitude),
                (LOCATION_H_ACCURACY_PATH, self.h_accuracy),
                (LOCATION_ALTITUDE_PATH, self.altitude),
                (LOCATION_V_ACCURACY_PATH, self.v_accuracy),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(batch: &Batch) -> Vec<&str> {
        batch.entries().iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn scalar_thresholds_are_strict() {
        assert!(!LightLevel::exceeds_threshold(&LightLevel(100), &LightLevel(300)));
        assert!(LightLevel::exceeds_threshold(&LightLevel(300), &LightLevel(99)));
        assert!(!LightLevel::exceeds_threshold(&LightLevel(i32::MIN), &LightLevel(i32::MIN + 200)));

        assert!(!Pressure::exceeds_threshold(&Pressure(101.0), &Pressure(102.0)));
        assert!(Pressure::exceeds_threshold(&Pressure(101.0), &Pressure(99.9)));

        assert!(!Temperature::exceeds_threshold(&Temperature(20.0), &Temperature(20.5)));
        assert!(Temperature::exceeds_threshold(&Temperature(20.0), &Temperature(23.5)));
    }

    #[test]
    fn vector_thresholds_use_euclidean_delta() {
        let rest = Acceleration(Vector3::new(0.0, 0.0, 9.8));
        // sqrt(0.6^2 + 0.6^2 + 0.6^2) ~= 1.04
        let tilted = Acceleration(Vector3::new(0.6, 0.6, 10.4));
        let nudged = Acceleration(Vector3::new(0.5, 0.5, 9.8));
        assert!(Acceleration::exceeds_threshold(&rest, &tilted));
        assert!(!Acceleration::exceeds_threshold(&rest, &nudged));

        let still = AngularVelocity(Vector3::default());
        let slow = AngularVelocity(Vector3::new(1.0, 1.0, 0.0));
        let fast = AngularVelocity(Vector3::new(1.2, 1.2, 0.0));
        assert!(!AngularVelocity::exceeds_threshold(&still, &slow));
        assert!(AngularVelocity::exceeds_threshold(&still, &fast));
    }

    #[test]
    fn location_threshold_ignores_altitude_and_accuracy() {
        let base = Location {
            latitude: 49.0,
            longitude: -123.0,
            h_accuracy: 5.0,
            altitude: 10.0,
            v_accuracy: 3.0,
        };
        let climbed = Location {
            altitude: 900.0,
            h_accuracy: 50.0,
            v_accuracy: 40.0,
            ..base
        };
        assert!(!Location::exceeds_threshold(&base, &climbed));

        let moved = Location {
            latitude: 49.006,
            longitude: -123.006,
            ..base
        };
        assert!(Location::exceeds_threshold(&base, &moved));
    }

    #[test]
    fn composite_records_use_fixed_paths_in_order() {
        let mut batch = Batch::with_capacity(16);
        Acceleration(Vector3::new(1.0, 2.0, 3.0)).record_into(&mut batch, 7).unwrap();
        Location::default().record_into(&mut batch, 8).unwrap();

        assert_eq!(
            paths(&batch),
            vec![
                "MangOH.Sensors.Accelerometer.Acceleration.X",
                "MangOH.Sensors.Accelerometer.Acceleration.Y",
                "MangOH.Sensors.Accelerometer.Acceleration.Z",
                "lwm2m.6.0.0",
                "lwm2m.6.0.1",
                "lwm2m.6.0.3",
                "lwm2m.6.0.2",
                "lwm2m.6.0.MangOH.Sensors.Gps.VerticalAccuracy",
            ]
        );
        assert!(batch.entries()[..3].iter().all(|e| e.timestamp_ms == 7));
    }

    #[test]
    fn composite_record_stops_at_first_failed_field() {
        let mut batch = Batch::with_capacity(2);
        let err = AngularVelocity(Vector3::new(0.1, 0.2, 0.3))
            .record_into(&mut batch, 1)
            .unwrap_err();

        assert_eq!(
            err,
            RecordError::Overflow {
                path: "MangOH.Sensors.Accelerometer.Gyro.Z".to_string(),
                capacity: 2
            }
        );
        assert_eq!(
            paths(&batch),
            vec!["MangOH.Sensors.Accelerometer.Gyro.X", "MangOH.Sensors.Accelerometer.Gyro.Y"]
        );
    }
}
