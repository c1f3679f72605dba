use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub node_id: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,
    pub mqtt_client_id: String,
    pub mqtt_keepalive_secs: u64,

    pub http_bind: String,

    pub delay_between_readings_ms: u64,
    pub min_interval_between_publish_secs: u64,
    pub max_interval_between_publish_secs: u64,
    pub stale_after_secs: u64,
    pub max_batch_entries: usize,

    pub iio_dir: PathBuf,
    pub light_device: String,
    pub pressure_device: String,
    pub imu_device: String,
    pub gps_fix_path: PathBuf,
}

/// Scheduling constants shared by the sampler and the publish scheduler, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishPolicy {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub stale_after_ms: u64,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            min_interval_ms: 10_000,
            max_interval_ms: 120_000,
            stale_after_ms: 60_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let node_id = env_string("PUBLISHER_NODE_ID", Some("mangoh".to_string()))?;
        let mqtt_url = env_string("PUBLISHER_MQTT_URL", Some("mqtt://127.0.0.1:1883".to_string()))?;
        let mqtt_username = env_optional("PUBLISHER_MQTT_USERNAME");
        let mqtt_password = env_optional("PUBLISHER_MQTT_PASSWORD");

        let url = Url::parse(&mqtt_url).context("invalid PUBLISHER_MQTT_URL")?;
        let mqtt_host = url
            .host_str()
            .ok_or_else(|| anyhow!("PUBLISHER_MQTT_URL missing host"))?
            .to_string();
        let mqtt_port = url.port().unwrap_or(1883);

        let mqtt_topic_prefix = env_string("PUBLISHER_MQTT_TOPIC_PREFIX", Some("iot".to_string()))?;
        let mqtt_client_id = env_string(
            "PUBLISHER_MQTT_CLIENT_ID",
            Some(format!("sensor-publisher-{}", node_id)),
        )?;
        let mqtt_keepalive_secs = env_u64("PUBLISHER_MQTT_KEEPALIVE_SECS", Some(15))?;

        let http_bind = env_string("PUBLISHER_HTTP_BIND", Some("127.0.0.1:9102".to_string()))?;

        let delay_between_readings_ms =
            env_u64("PUBLISHER_DELAY_BETWEEN_READINGS_MS", Some(1000))?;
        let min_interval_between_publish_secs =
            env_u64("PUBLISHER_MIN_INTERVAL_BETWEEN_PUBLISH_SECS", Some(10))?;
        let max_interval_between_publish_secs =
            env_u64("PUBLISHER_MAX_INTERVAL_BETWEEN_PUBLISH_SECS", Some(120))?;
        let stale_after_secs = env_u64("PUBLISHER_STALE_AFTER_SECS", Some(60))?;
        let max_batch_entries = env_u64("PUBLISHER_MAX_BATCH_ENTRIES", Some(4096))? as usize;

        let iio_dir = PathBuf::from(env_string(
            "PUBLISHER_IIO_DIR",
            Some("/sys/bus/iio/devices".to_string()),
        )?);
        let light_device = env_string("PUBLISHER_LIGHT_DEVICE", Some("iio:device0".to_string()))?;
        let pressure_device =
            env_string("PUBLISHER_PRESSURE_DEVICE", Some("iio:device1".to_string()))?;
        let imu_device = env_string("PUBLISHER_IMU_DEVICE", Some("iio:device2".to_string()))?;
        let gps_fix_path = PathBuf::from(env_string(
            "PUBLISHER_GPS_FIX_PATH",
            Some("/tmp/gps_fix.json".to_string()),
        )?);

        let config = Self {
            node_id,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic_prefix,
            mqtt_client_id,
            mqtt_keepalive_secs,
            http_bind,
            delay_between_readings_ms,
            min_interval_between_publish_secs,
            max_interval_between_publish_secs,
            stale_after_secs,
            max_batch_entries,
            iio_dir,
            light_device,
            pressure_device,
            imu_device,
            gps_fix_path,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.delay_between_readings_ms == 0 {
            bail!("PUBLISHER_DELAY_BETWEEN_READINGS_MS must be greater than zero");
        }
        if self.min_interval_between_publish_secs > self.max_interval_between_publish_secs {
            bail!(
                "PUBLISHER_MIN_INTERVAL_BETWEEN_PUBLISH_SECS ({}) exceeds PUBLISHER_MAX_INTERVAL_BETWEEN_PUBLISH_SECS ({})",
                self.min_interval_between_publish_secs,
                self.max_interval_between_publish_secs
            );
        }
        if self.max_batch_entries == 0 {
            bail!("PUBLISHER_MAX_BATCH_ENTRIES must be greater than zero");
        }
        Ok(())
    }

    pub fn policy(&self) -> PublishPolicy {
        PublishPolicy {
            min_interval_ms: self.min_interval_between_publish_secs.saturating_mul(1000),
            max_interval_ms: self.max_interval_between_publish_secs.saturating_mul(1000),
            stale_after_ms: self.stale_after_secs.saturating_mul(1000),
        }
    }

    pub fn delay_between_readings(&self) -> Duration {
        Duration::from_millis(self.delay_between_readings_ms)
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn record_topic(&self) -> String {
        format!("{}/{}/record", self.mqtt_topic_prefix, self.node_id)
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
pub(crate) fn test_config(iio_dir: &std::path::Path) -> Config {
    Config {
        node_id: "test-node".to_string(),
        mqtt_host: "127.0.0.1".to_string(),
        mqtt_port: 1883,
        mqtt_username: None,
        mqtt_password: None,
        mqtt_topic_prefix: "iot".to_string(),
        mqtt_client_id: "sensor-publisher-test".to_string(),
        mqtt_keepalive_secs: 15,
        http_bind: "127.0.0.1:0".to_string(),
        delay_between_readings_ms: 1000,
        min_interval_between_publish_secs: 10,
        max_interval_between_publish_secs: 120,
        stale_after_secs: 60,
        max_batch_entries: 4096,
        iio_dir: iio_dir.to_path_buf(),
        light_device: "iio:device0".to_string(),
        pressure_device: "iio:device1".to_string(),
        imu_device: "iio:device2".to_string(),
        gps_fix_path: iio_dir.join("gps_fix.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_converts_seconds_to_millis() {
        let config = test_config(std::path::Path::new("/nonexistent"));
        assert_eq!(config.policy(), PublishPolicy::default());
        assert_eq!(config.delay_between_readings(), Duration::from_secs(1));
    }

    #[test]
    fn validate_rejects_inverted_publish_window() {
        let mut config = test_config(std::path::Path::new("/nonexistent"));
        config.min_interval_between_publish_secs = 300;
        assert!(config.validate().is_err());

        config.min_interval_between_publish_secs = 10;
        config.delay_between_readings_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn record_topic_is_scoped_to_node() {
        let config = test_config(std::path::Path::new("/nonexistent"));
        assert_eq!(config.record_topic(), "iot/test-node/record");
    }
}
