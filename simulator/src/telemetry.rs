use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Uplink payload published on `telemetry/{device_id}`. Absent fields are
/// left out of the JSON so the ingestor sees them as not reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Uplink {
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_quality_index: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_level: Option<f64>,
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
    pub packet_loss_rate: Option<f64>,
    pub battery_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tamper_status: Option<String>,
}

/// What kind of readings a simulated device produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Meter,
    Pressure,
    Flow,
    Environmental,
}

impl Profile {
    /// Profiles cycle in the same order as the seed fixtures: three meters,
    /// one pressure sensor, one flow sensor, then environmental monitors.
    pub fn for_device(device_id: u64) -> Self {
        match (device_id.saturating_sub(1)) % 7 {
            0..=2 => Profile::Meter,
            3 => Profile::Pressure,
            4 => Profile::Flow,
            _ => Profile::Environmental,
        }
    }
}

/// Builds one uplink. `anomaly_rate` is the chance that any single
/// field is pushed outside its normal band.
pub fn generate(rng: &mut impl Rng, profile: Profile, anomaly_rate: f64) -> Uplink {
    let mut uplink = Uplink {
        timestamp: Some(Utc::now()),
        rssi: Some(if rng.gen_bool(anomaly_rate) {
            rng.gen_range(-130.0..-116.0)
        } else {
            rng.gen_range(-110.0..-70.0)
        }),
        snr: Some(rng.gen_range(-5.0..12.0)),
        packet_loss_rate: Some(if rng.gen_bool(anomaly_rate) {
            rng.gen_range(10.5..40.0)
        } else {
            rng.gen_range(0.0..5.0)
        }),
        battery_level: Some(if rng.gen_bool(anomaly_rate) {
            rng.gen_range(0.0..19.0)
        } else {
            rng.gen_range(25.0..100.0)
        }),
        ..Default::default()
    };

    match profile {
        Profile::Meter => {
            uplink.value = Some(rng.gen_range(0.0..2500.0));
            if rng.gen_bool(anomaly_rate) {
                uplink.tamper_status = Some("MagnetDetected".to_string());
            }
        }
        Profile::Pressure => {
            uplink.pressure = Some(if rng.gen_bool(anomaly_rate) {
                rng.gen_range(910.0..1100.0)
            } else {
                rng.gen_range(550.0..850.0)
            });
        }
        Profile::Flow => {
            uplink.flow_rate = Some(if rng.gen_bool(anomaly_rate) {
                rng.gen_range(0.0..1.0)
            } else {
                rng.gen_range(2.0..14.0)
            });
        }
        Profile::Environmental => {
            uplink.temperature = Some(if rng.gen_bool(anomaly_rate) {
                rng.gen_range(38.5..45.0)
            } else {
                rng.gen_range(8.0..30.0)
            });
            uplink.humidity = Some(rng.gen_range(30.0..80.0));
            uplink.air_quality_index = Some(if rng.gen_bool(anomaly_rate) {
                rng.gen_range(151.0..260.0)
            } else {
                rng.gen_range(20.0..120.0)
            });
            uplink.noise_level = Some(if rng.gen_bool(anomaly_rate) {
                rng.gen_range(81.0..100.0)
            } else {
                rng.gen_range(35.0..70.0)
            });
        }
    }

    uplink
}
