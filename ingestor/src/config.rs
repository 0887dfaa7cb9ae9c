use crate::errors::{Error, Result};
use crate::rules::AlertThresholds;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Service settings collected from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub http_addr: String,
    pub mqtt_enabled: bool,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_topic: String,
    pub channel_capacity: usize,
    pub thresholds_file: Option<PathBuf>,
    pub seed_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            mqtt_enabled: true,
            mqtt_broker: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_topic: "telemetry/+".to_string(),
            channel_capacity: 10_000,
            thresholds_file: None,
            seed_file: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any key lookup; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            http_addr: lookup("HTTP_ADDR").unwrap_or(defaults.http_addr),
            mqtt_enabled: parse_or(&lookup, "MQTT_ENABLED", defaults.mqtt_enabled),
            mqtt_broker: lookup("MQTT_BROKER").unwrap_or(defaults.mqtt_broker),
            mqtt_port: parse_or(&lookup, "MQTT_PORT", defaults.mqtt_port),
            mqtt_topic: lookup("MQTT_TOPIC").unwrap_or(defaults.mqtt_topic),
            channel_capacity: parse_or(&lookup, "CHANNEL_CAPACITY", defaults.channel_capacity),
            thresholds_file: lookup("THRESHOLDS_FILE").map(PathBuf::from),
            seed_file: lookup("SEED_FILE").map(PathBuf::from),
        }
    }

    /// Thresholds from `THRESHOLDS_FILE`, or the built-in defaults.
    pub fn thresholds(&self) -> Result<AlertThresholds> {
        match &self.thresholds_file {
            Some(path) => load_thresholds(path),
            None => Ok(AlertThresholds::default()),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn load_thresholds(path: &Path) -> Result<AlertThresholds> {
    let raw = std::fs::read_to_string(path)?;
    let thresholds: AlertThresholds = serde_json::from_str(&raw)?;
    check_thresholds(&thresholds)?;
    info!("Loaded alert thresholds from {}", path.display());
    Ok(thresholds)
}

/// Rejects threshold sets whose graded levels are inverted or non-finite.
pub fn check_thresholds(t: &AlertThresholds) -> Result<()> {
    let all = [
        t.low_battery,
        t.weak_signal_rssi,
        t.packet_loss,
        t.pressure_ratio,
        t.min_flow_rate,
        t.aqi_warning,
        t.aqi_danger,
        t.temperature_low,
        t.temperature_high,
        t.noise_warning,
        t.noise_danger,
    ];
    if all.iter().any(|v| !v.is_finite()) {
        return Err(Error::Config("thresholds must be finite numbers".to_string()));
    }
    if t.pressure_ratio <= 0.0 {
        return Err(Error::Config("pressure_ratio must be positive".to_string()));
    }
    if t.aqi_danger < t.aqi_warning {
        return Err(Error::Config(
            "aqi_danger must not be below aqi_warning".to_string(),
        ));
    }
    if t.noise_danger < t.noise_warning {
        return Err(Error::Config(
            "noise_danger must not be below noise_warning".to_string(),
        ));
    }
    if t.temperature_low >= t.temperature_high {
        return Err(Error::Config(
            "temperature_low must be below temperature_high".to_string(),
        ));
    }
    Ok(())
}
