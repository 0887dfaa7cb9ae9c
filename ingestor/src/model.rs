use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of metering or sensing endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceCategory {
    Water,
    Gas,
    Electric,
    PressureSensor,
    FlowSensor,
    Environmental,
    Other,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum DeviceStatus {
    #[default]
    Active,
    Maintenance,
    Offline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayStatus {
    Online,
    #[default]
    Offline,
}

/// Link-layer outcome recorded with every reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransmissionStatus {
    Success,
    Warning,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertType {
    Battery,
    Signal,
    Network,
    Tamper,
    Pressure,
    Flow,
    AirQuality,
    Temperature,
    Noise,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Alert lifecycle state. Ordering follows the only permitted direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "Active",
            AlertStatus::Acknowledged => "Acknowledged",
            AlertStatus::Resolved => "Resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Battery => "Battery",
            AlertType::Signal => "Signal",
            AlertType::Network => "Network",
            AlertType::Tamper => "Tamper",
            AlertType::Pressure => "Pressure",
            AlertType::Flow => "Flow",
            AlertType::AirQuality => "AirQuality",
            AlertType::Temperature => "Temperature",
            AlertType::Noise => "Noise",
            AlertType::Manual => "Manual",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        };
        f.write_str(s)
    }
}

/// Provisioned metering/sensor endpoint with its cached last-known state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: u64,
    pub code: String,
    pub name: String,
    pub category: DeviceCategory,
    pub status: DeviceStatus,
    pub gateway_id: Option<u64>,
    pub location: Option<String>,
    pub battery_level: f64,
    pub signal_strength: Option<f64>,
    pub snr: Option<f64>,
    pub last_reading_value: Option<f64>,
    pub last_communication: Option<DateTime<Utc>>,
    pub firmware_version: Option<String>,
    /// Pipeline sensors only
    pub rated_max_pressure: Option<f64>,
    /// Overrides the deployment-wide low-flow threshold
    pub min_flow_rate: Option<f64>,
    pub installed_at: DateTime<Utc>,
}

/// Administrative create-or-update payload for a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceUpsert {
    #[serde(default)]
    pub id: Option<u64>,
    pub code: String,
    pub name: String,
    pub category: DeviceCategory,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub gateway_id: Option<u64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub battery_level: Option<f64>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub rated_max_pressure: Option<f64>,
    #[serde(default)]
    pub min_flow_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gateway {
    pub id: u64,
    pub code: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: GatewayStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayUpsert {
    #[serde(default)]
    pub id: Option<u64>,
    pub code: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub status: GatewayStatus,
}

/// Gateway as returned to callers, with its device count computed at read time
#[derive(Debug, Clone, Serialize)]
pub struct GatewayOverview {
    #[serde(flatten)]
    pub gateway: Gateway,
    pub connected_devices: usize,
}

/// Measurement fields reported by a device. Every field is optional;
/// absent fields leave the device's cached state untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub flow_rate: Option<f64>,
    #[serde(default)]
    pub air_quality_index: Option<f64>,
    #[serde(default)]
    pub noise_level: Option<f64>,
    #[serde(default)]
    pub rssi: Option<f64>,
    #[serde(default)]
    pub snr: Option<f64>,
    #[serde(default)]
    pub packet_loss_rate: Option<f64>,
    #[serde(default)]
    pub battery_level: Option<f64>,
    #[serde(default)]
    pub tamper_status: Option<String>,
    #[serde(default)]
    pub valve_status: Option<String>,
    #[serde(default)]
    pub transmission_status: Option<TransmissionStatus>,
}

/// One immutable timestamped sample from a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub id: u64,
    pub device_id: u64,
    pub timestamp: DateTime<Utc>,
    pub frame_counter: u64,
    pub value: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub flow_rate: Option<f64>,
    pub air_quality_index: Option<f64>,
    pub noise_level: Option<f64>,
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
    pub packet_loss_rate: Option<f64>,
    pub battery_level: Option<f64>,
    pub tamper_status: Option<String>,
    pub valve_status: Option<String>,
    pub transmission_status: TransmissionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub device_id: u64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
}

/// Alert content produced by a rule (or a manual escalation) before the
/// store assigns its id and creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    pub device_id: u64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceFilter {
    pub status: Option<DeviceStatus>,
    pub search: Option<String>,
    pub gateway_id: Option<u64>,
}

impl DeviceFilter {
    pub fn matches(&self, device: &Device) -> bool {
        if self.status.is_some_and(|s| s != device.status) {
            return false;
        }
        if self.gateway_id.is_some() && self.gateway_id != device.gateway_id {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                device.name.to_lowercase().contains(&term)
                    || device.code.to_lowercase().contains(&term)
                    || device
                        .location
                        .as_deref()
                        .is_some_and(|l| l.to_lowercase().contains(&term))
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadingQuery {
    pub device_id: Option<u64>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub device_id: Option<u64>,
    pub severity: Option<Severity>,
    pub alert_type: Option<AlertType>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.status.map_or(true, |s| s == alert.status)
            && self.device_id.map_or(true, |d| d == alert.device_id)
            && self.severity.map_or(true, |s| s == alert.severity)
            && self.alert_type.map_or(true, |t| t == alert.alert_type)
    }
}
