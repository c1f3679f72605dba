//! Linux drivers for the board's sensors and the fixed registry built from them.
//!
//! Light, pressure/temperature and the IMU are exposed by the kernel as IIO devices under
//! sysfs. Position comes from a JSON fix file kept up to date by the positioning service.

use crate::config::Config;
use crate::quantity::{Acceleration, AngularVelocity, LightLevel, Location, Pressure, Temperature, Vector3};
use crate::sensor::{Descriptor, Driver, Sensor, SensorError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const MILLIDEGREES_PER_DEGREE: f64 = 1000.0;

/// One IIO channel such as `in_temp` or `in_accel_x`.
#[derive(Debug, Clone)]
pub struct IioChannel {
    device_dir: PathBuf,
    channel: String,
    unit_factor: f64,
}

impl IioChannel {
    pub fn new(device_dir: impl Into<PathBuf>, channel: impl Into<String>) -> Self {
        Self {
            device_dir: device_dir.into(),
            channel: channel.into(),
            unit_factor: 1.0,
        }
    }

    pub fn with_unit_factor(mut self, unit_factor: f64) -> Self {
        self.unit_factor = unit_factor;
        self
    }

    /// Prefers the processed `_input` attribute; otherwise `(raw + offset) * scale`.
    pub fn read(&self) -> Result<f64, SensorError> {
        let input = self.attribute("input");
        if input.exists() {
            return Ok(read_number(&input)? * self.unit_factor);
        }

        let raw = read_number(&self.attribute("raw"))?;
        let offset = self.optional_attribute("offset")?.unwrap_or(0.0);
        let scale = self.optional_attribute("scale")?.unwrap_or(1.0);
        Ok((raw + offset) * scale * self.unit_factor)
    }

    fn attribute(&self, suffix: &str) -> PathBuf {
        self.device_dir.join(format!("{}_{}", self.channel, suffix))
    }

    fn optional_attribute(&self, suffix: &str) -> Result<Option<f64>, SensorError> {
        let path = self.attribute(suffix);
        if !path.exists() {
            return Ok(None);
        }
        read_number(&path).map(Some)
    }
}

fn read_number(path: &Path) -> Result<f64, SensorError> {
    let raw = fs::read_to_string(path).map_err(|source| SensorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value = raw.trim().parse::<f64>().map_err(|err| SensorError::Parse {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    if !value.is_finite() {
        return Err(SensorError::Parse {
            path: path.to_path_buf(),
            reason: format!("non-finite value {value}"),
        });
    }
    Ok(value)
}

pub struct LightDriver(IioChannel);

impl Driver<LightLevel> for LightDriver {
    fn read(&mut self) -> Result<LightLevel, SensorError> {
        let value = self.0.read()?.round();
        if value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
            return Err(SensorError::Parse {
                path: self.0.attribute("input"),
                reason: format!("light level {value} out of range"),
            });
        }
        Ok(LightLevel(value as i32))
    }
}

pub struct PressureDriver(IioChannel);

impl Driver<Pressure> for PressureDriver {
    fn read(&mut self) -> Result<Pressure, SensorError> {
        self.0.read().map(Pressure)
    }
}

pub struct TemperatureDriver(IioChannel);

impl Driver<Temperature> for TemperatureDriver {
    fn read(&mut self) -> Result<Temperature, SensorError> {
        self.0.read().map(Temperature)
    }
}

/// Three channels of one IIO device read back to back.
pub struct TriAxisDriver {
    axes: [IioChannel; 3],
}

impl TriAxisDriver {
    pub fn new(device_dir: &Path, channel_prefix: &str) -> Self {
        let axis = |name: &str| IioChannel::new(device_dir, format!("{channel_prefix}_{name}"));
        Self {
            axes: [axis("x"), axis("y"), axis("z")],
        }
    }

    fn read_vector(&self) -> Result<Vector3, SensorError> {
        let [x, y, z] = &self.axes;
        Ok(Vector3::new(x.read()?, y.read()?, z.read()?))
    }
}

impl Driver<Acceleration> for TriAxisDriver {
    fn read(&mut self) -> Result<Acceleration, SensorError> {
        self.read_vector().map(Acceleration)
    }
}

impl Driver<AngularVelocity> for TriAxisDriver {
    fn read(&mut self) -> Result<AngularVelocity, SensorError> {
        self.read_vector().map(AngularVelocity)
    }
}

#[derive(Debug, Deserialize)]
struct GpsFix {
    latitude: f64,
    longitude: f64,
    h_accuracy: f64,
    altitude: f64,
    v_accuracy: f64,
}

pub struct GpsFixDriver {
    path: PathBuf,
}

impl GpsFixDriver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Driver<Location> for GpsFixDriver {
    fn read(&mut self) -> Result<Location, SensorError> {
        if !self.path.exists() {
            return Err(SensorError::Unavailable(format!(
                "no position fix at {}",
                self.path.display()
            )));
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| SensorError::Io {
            path: self.path.clone(),
            source,
        })?;
        let fix: GpsFix = serde_json::from_str(&raw).map_err(|err| SensorError::Parse {
            path: self.path.clone(),
            reason: err.to_string(),
        })?;
        Ok(Location {
            latitude: fix.latitude,
            longitude: fix.longitude,
            h_accuracy: fix.h_accuracy,
            altitude: fix.altitude,
            v_accuracy: fix.v_accuracy,
        })
    }
}

/// Every monitored quantity, in the order they are sampled each tick.
pub fn build_registry(config: &Config) -> Vec<Box<dyn Sensor>> {
    let light_dir = config.iio_dir.join(&config.light_device);
    let pressure_dir = config.iio_dir.join(&config.pressure_device);
    let imu_dir = config.iio_dir.join(&config.imu_device);

    vec![
        Descriptor::boxed("light level", LightDriver(IioChannel::new(&light_dir, "in_illuminance"))),
        Descriptor::boxed("pressure", PressureDriver(IioChannel::new(&pressure_dir, "in_pressure"))),
        Descriptor::boxed(
            "temperature",
            TemperatureDriver(
                IioChannel::new(&pressure_dir, "in_temp").with_unit_factor(1.0 / MILLIDEGREES_PER_DEGREE),
            ),
        ),
        Descriptor::<Acceleration>::boxed("accelerometer", TriAxisDriver::new(&imu_dir, "in_accel")),
        Descriptor::<AngularVelocity>::boxed("gyro", TriAxisDriver::new(&imu_dir, "in_anglvel")),
        Descriptor::boxed("gps", GpsFixDriver::new(&config.gps_fix_path)),
    ]
}
