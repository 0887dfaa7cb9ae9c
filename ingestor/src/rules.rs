//! Threshold alert rules.
//!
//! Every rule looks at one (device, reading) pair and either stays quiet,
//! produces an [`AlertDraft`], or fails with a [`RuleError`]. Rules are
//! independent: the engine runs all of them in order, a failing rule does
//! not stop the others, and there is no deduplication against alerts that
//! already exist for the device.

use crate::errors::RuleError;
use crate::model::{AlertDraft, AlertType, Device, Reading, Severity};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

type RuleResult = std::result::Result<Option<AlertDraft>, RuleError>;

/// Per-deployment rule parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Percent
    pub low_battery: f64,
    /// dBm
    pub weak_signal_rssi: f64,
    /// Percent
    pub packet_loss: f64,
    /// Fraction of the device's rated max pressure
    pub pressure_ratio: f64,
    pub min_flow_rate: f64,
    pub aqi_warning: f64,
    pub aqi_danger: f64,
    /// °C
    pub temperature_low: f64,
    pub temperature_high: f64,
    /// dB
    pub noise_warning: f64,
    pub noise_danger: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            low_battery: 20.0,
            weak_signal_rssi: -115.0,
            packet_loss: 10.0,
            pressure_ratio: 0.9,
            min_flow_rate: 0.5,
            aqi_warning: 150.0,
            aqi_danger: 200.0,
            temperature_low: 5.0,
            temperature_high: 38.0,
            noise_warning: 80.0,
            noise_danger: 90.0,
        }
    }
}

pub trait AlertRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, device: &Device, reading: &Reading) -> RuleResult;
}

/// A rule that failed while evaluating one reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleFailure {
    pub rule: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Evaluation {
    pub drafts: Vec<AlertDraft>,
    pub failures: Vec<RuleFailure>,
}

pub struct RuleEngine {
    rules: Vec<Box<dyn AlertRule>>,
}

impl fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEngine")
            .field("rules", &self.rule_names())
            .finish()
    }
}

impl RuleEngine {
    /// The standard ordered rule set.
    pub fn new(t: &AlertThresholds) -> Self {
        Self::empty()
            .with_rule(LowBattery {
                threshold: t.low_battery,
            })
            .with_rule(WeakSignal {
                threshold: t.weak_signal_rssi,
            })
            .with_rule(PacketLoss {
                threshold: t.packet_loss,
            })
            .with_rule(Tamper)
            .with_rule(OverPressure {
                ratio: t.pressure_ratio,
            })
            .with_rule(LowFlow {
                minimum: t.min_flow_rate,
            })
            .with_rule(AirQuality {
                warning: t.aqi_warning,
                danger: t.aqi_danger,
            })
            .with_rule(ExtremeTemperature {
                low: t.temperature_low,
                high: t.temperature_high,
            })
            .with_rule(Noise {
                warning: t.noise_warning,
                danger: t.noise_danger,
            })
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: impl AlertRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn evaluate(&self, device: &Device, reading: &Reading) -> Evaluation {
        let mut evaluation = Evaluation::default();
        for rule in &self.rules {
            match rule.evaluate(device, reading) {
                Ok(Some(draft)) => {
                    debug!(
                        "Rule {} fired for device {}: {}",
                        rule.name(),
                        device.id,
                        draft.message
                    );
                    evaluation.drafts.push(draft);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Rule {} failed for device {}: {}", rule.name(), device.id, e);
                    evaluation.failures.push(RuleFailure {
                        rule: rule.name(),
                        message: e.to_string(),
                    });
                }
            }
        }
        evaluation
    }
}

fn finite(
    rule: &'static str,
    field: &'static str,
    value: Option<f64>,
) -> Result<Option<f64>, RuleError> {
    match value {
        Some(v) if !v.is_finite() => Err(RuleError::NonFinite { rule, field }),
        other => Ok(other),
    }
}

fn draft(
    device: &Device,
    alert_type: AlertType,
    severity: Severity,
    message: String,
) -> RuleResult {
    Ok(Some(AlertDraft {
        device_id: device.id,
        alert_type,
        severity,
        message,
    }))
}

pub struct LowBattery {
    pub threshold: f64,
}

impl AlertRule for LowBattery {
    fn name(&self) -> &'static str {
        "low_battery"
    }

    fn evaluate(&self, device: &Device, reading: &Reading) -> RuleResult {
        match finite(self.name(), "battery_level", reading.battery_level)? {
            Some(level) if level < self.threshold => draft(
                device,
                AlertType::Battery,
                Severity::High,
                format!(
                    "Battery level {:.1}% on {} is below {}%",
                    level, device.code, self.threshold
                ),
            ),
            _ => Ok(None),
        }
    }
}

pub struct WeakSignal {
    pub threshold: f64,
}

impl AlertRule for WeakSignal {
    fn name(&self) -> &'static str {
        "weak_signal"
    }

    fn evaluate(&self, device: &Device, reading: &Reading) -> RuleResult {
        match finite(self.name(), "rssi", reading.rssi)? {
            Some(rssi) if rssi < self.threshold => draft(
                device,
                AlertType::Signal,
                Severity::Medium,
                format!(
                    "Signal strength {} dBm on {} is below {} dBm",
                    rssi, device.code, self.threshold
                ),
            ),
            _ => Ok(None),
        }
    }
}

pub struct PacketLoss {
    pub threshold: f64,
}

impl AlertRule for PacketLoss {
    fn name(&self) -> &'static str {
        "packet_loss"
    }

    fn evaluate(&self, device: &Device, reading: &Reading) -> RuleResult {
        match finite(self.name(), "packet_loss_rate", reading.packet_loss_rate)? {
            Some(loss) if loss > self.threshold => draft(
                device,
                AlertType::Network,
                Severity::Medium,
                format!(
                    "Packet loss {:.1}% on {} exceeds {}%",
                    loss, device.code, self.threshold
                ),
            ),
            _ => Ok(None),
        }
    }
}

pub struct Tamper;

impl AlertRule for Tamper {
    fn name(&self) -> &'static str {
        "tamper"
    }

    fn evaluate(&self, device: &Device, reading: &Reading) -> RuleResult {
        match reading.tamper_status.as_deref().map(str::trim) {
            Some(status) if !status.is_empty() && !status.eq_ignore_ascii_case("normal") => draft(
                device,
                AlertType::Tamper,
                Severity::Medium,
                format!("Tamper status '{}' reported by {}", status, device.code),
            ),
            _ => Ok(None),
        }
    }
}

pub struct OverPressure {
    pub ratio: f64,
}

impl AlertRule for OverPressure {
    fn name(&self) -> &'static str {
        "over_pressure"
    }

    fn evaluate(&self, device: &Device, reading: &Reading) -> RuleResult {
        let Some(pressure) = finite(self.name(), "pressure", reading.pressure)? else {
            return Ok(None);
        };
        let Some(rated) = device.rated_max_pressure else {
            return Ok(None);
        };
        if !rated.is_finite() || rated <= 0.0 {
            return Err(RuleError::Misconfigured {
                rule: self.name(),
                device_id: device.id,
                reason: format!("rated max pressure {} is not positive", rated),
            });
        }
        let limit = rated * self.ratio;
        if pressure > limit {
            draft(
                device,
                AlertType::Pressure,
                Severity::High,
                format!(
                    "Pressure {} on {} exceeds {:.1} ({}% of rated max {})",
                    pressure,
                    device.code,
                    limit,
                    self.ratio * 100.0,
                    rated
                ),
            )
        } else {
            Ok(None)
        }
    }
}

pub struct LowFlow {
    pub minimum: f64,
}

impl AlertRule for LowFlow {
    fn name(&self) -> &'static str {
        "low_flow"
    }

    fn evaluate(&self, device: &Device, reading: &Reading) -> RuleResult {
        let minimum = device.min_flow_rate.unwrap_or(self.minimum);
        match finite(self.name(), "flow_rate", reading.flow_rate)? {
            Some(flow) if flow < minimum => draft(
                device,
                AlertType::Flow,
                Severity::Medium,
                format!(
                    "Flow rate {} on {} is below minimum {}",
                    flow, device.code, minimum
                ),
            ),
            _ => Ok(None),
        }
    }
}

pub struct AirQuality {
    pub warning: f64,
    pub danger: f64,
}

impl AlertRule for AirQuality {
    fn name(&self) -> &'static str {
        "air_quality"
    }

    fn evaluate(&self, device: &Device, reading: &Reading) -> RuleResult {
        match finite(self.name(), "air_quality_index", reading.air_quality_index)? {
            Some(aqi) if aqi > self.danger => draft(
                device,
                AlertType::AirQuality,
                Severity::High,
                format!(
                    "Dangerous air quality at {}: AQI {} exceeds {}",
                    device.code, aqi, self.danger
                ),
            ),
            Some(aqi) if aqi > self.warning => draft(
                device,
                AlertType::AirQuality,
                Severity::Medium,
                format!(
                    "Poor air quality at {}: AQI {} exceeds {}",
                    device.code, aqi, self.warning
                ),
            ),
            _ => Ok(None),
        }
    }
}

pub struct ExtremeTemperature {
    pub low: f64,
    pub high: f64,
}

impl AlertRule for ExtremeTemperature {
    fn name(&self) -> &'static str {
        "extreme_temperature"
    }

    fn evaluate(&self, device: &Device, reading: &Reading) -> RuleResult {
        match finite(self.name(), "temperature", reading.temperature)? {
            Some(t) if t < self.low => draft(
                device,
                AlertType::Temperature,
                Severity::Medium,
                format!("Temperature {}°C at {} is below {}°C", t, device.code, self.low),
            ),
            Some(t) if t > self.high => draft(
                device,
                AlertType::Temperature,
                Severity::Medium,
                format!("Temperature {}°C at {} is above {}°C", t, device.code, self.high),
            ),
            _ => Ok(None),
        }
    }
}

pub struct Noise {
    pub warning: f64,
    pub danger: f64,
}

impl AlertRule for Noise {
    fn name(&self) -> &'static str {
        "noise"
    }

    fn evaluate(&self, device: &Device, reading: &Reading) -> RuleResult {
        match finite(self.name(), "noise_level", reading.noise_level)? {
            Some(db) if db > self.danger => draft(
                device,
                AlertType::Noise,
                Severity::High,
                format!(
                    "Dangerous noise level {} dB at {} exceeds {} dB",
                    db, device.code, self.danger
                ),
            ),
            Some(db) if db > self.warning => draft(
                device,
                AlertType::Noise,
                Severity::Medium,
                format!(
                    "High noise level {} dB at {} exceeds {} dB",
                    db, device.code, self.warning
                ),
            ),
            _ => Ok(None),
        }
    }
}
