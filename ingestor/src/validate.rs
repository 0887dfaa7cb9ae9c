use crate::errors::{Error, Result};
use crate::model::{DeviceUpsert, GatewayUpsert, Measurement};

const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 100.0;
const HUMIDITY_MIN: f64 = 0.0;
const HUMIDITY_MAX: f64 = 100.0;
const BATTERY_MIN: f64 = 0.0;
const BATTERY_MAX: f64 = 100.0;
const PACKET_LOSS_MIN: f64 = 0.0;
const PACKET_LOSS_MAX: f64 = 100.0;

/// Clamps a battery level into [0, 100]. Battery is the one field with a safe default.
pub fn clamp_battery(level: f64) -> f64 {
    level.clamp(BATTERY_MIN, BATTERY_MAX)
}

/// Validates an incoming measurement. Battery is only checked for finiteness
/// because ingestion clamps it; everything else is rejected when out of range.
pub fn validate(measurement: &Measurement) -> Result<()> {
    let fields = [
        ("value", measurement.value),
        ("temperature", measurement.temperature),
        ("humidity", measurement.humidity),
        ("pressure", measurement.pressure),
        ("flow_rate", measurement.flow_rate),
        ("air_quality_index", measurement.air_quality_index),
        ("noise_level", measurement.noise_level),
        ("rssi", measurement.rssi),
        ("snr", measurement.snr),
        ("packet_loss_rate", measurement.packet_loss_rate),
        ("battery_level", measurement.battery_level),
    ];
    for (name, value) in fields {
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(Error::Validation(format!("{} must be a finite number", name)));
            }
        }
    }

    if let Some(t) = measurement.temperature {
        if !(TEMP_MIN..=TEMP_MAX).contains(&t) {
            return Err(Error::Validation(format!(
                "Temperature {} out of range [{}, {}]",
                t, TEMP_MIN, TEMP_MAX
            )));
        }
    }

    if let Some(h) = measurement.humidity {
        if !(HUMIDITY_MIN..=HUMIDITY_MAX).contains(&h) {
            return Err(Error::Validation(format!(
                "Humidity {} out of range [{}, {}]",
                h, HUMIDITY_MIN, HUMIDITY_MAX
            )));
        }
    }

    if let Some(p) = measurement.packet_loss_rate {
        if !(PACKET_LOSS_MIN..=PACKET_LOSS_MAX).contains(&p) {
            return Err(Error::Validation(format!(
                "Packet loss rate {} out of range [{}, {}]",
                p, PACKET_LOSS_MIN, PACKET_LOSS_MAX
            )));
        }
    }

    // dBm; a received signal is always at or below 0
    if let Some(rssi) = measurement.rssi {
        if rssi > 0.0 {
            return Err(Error::Validation(format!("RSSI {} dBm cannot be positive", rssi)));
        }
    }

    let non_negative = [
        ("Pressure", measurement.pressure),
        ("Flow rate", measurement.flow_rate),
        ("Air quality index", measurement.air_quality_index),
        ("Noise level", measurement.noise_level),
    ];
    for (name, value) in non_negative {
        if let Some(v) = value {
            if v < 0.0 {
                return Err(Error::Validation(format!("{} {} cannot be negative", name, v)));
            }
        }
    }

    Ok(())
}

pub fn validate_device(device: &DeviceUpsert) -> Result<()> {
    if device.code.trim().is_empty() {
        return Err(Error::Validation("Device code cannot be empty".to_string()));
    }
    if device.name.trim().is_empty() {
        return Err(Error::Validation("Device name cannot be empty".to_string()));
    }
    let numeric = [
        ("battery_level", device.battery_level),
        ("rated_max_pressure", device.rated_max_pressure),
        ("min_flow_rate", device.min_flow_rate),
    ];
    for (name, value) in numeric {
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(Error::Validation(format!("{} must be a finite number", name)));
        }
    }
    Ok(())
}

pub fn validate_gateway(gateway: &GatewayUpsert) -> Result<()> {
    if gateway.code.trim().is_empty() {
        return Err(Error::Validation("Gateway code cannot be empty".to_string()));
    }
    if gateway.latitude.is_some_and(|lat| !(-90.0..=90.0).contains(&lat)) {
        return Err(Error::Validation("Latitude out of range [-90, 90]".to_string()));
    }
    if gateway.longitude.is_some_and(|lon| !(-180.0..=180.0).contains(&lon)) {
        return Err(Error::Validation("Longitude out of range [-180, 180]".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceCategory, DeviceStatus, GatewayStatus};

    fn measurement() -> Measurement {
        Measurement {
            value: Some(12.5),
            temperature: Some(25.0),
            humidity: Some(60.0),
            battery_level: Some(80.0),
            rssi: Some(-100.0),
            packet_loss_rate: Some(1.5),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_measurement() {
        assert!(validate(&measurement()).is_ok());
        assert!(validate(&Measurement::default()).is_ok());
    }

    #[test]
    fn test_invalid_temperature() {
        let m = Measurement {
            temperature: Some(150.0), // Out of range
            ..measurement()
        };
        assert!(validate(&m).is_err());
    }

    #[test]
    fn test_invalid_humidity() {
        let m = Measurement {
            humidity: Some(150.0), // Out of range
            ..measurement()
        };
        assert!(validate(&m).is_err());
    }

    #[test]
    fn test_out_of_range_battery_is_left_for_clamping() {
        let m = Measurement {
            battery_level: Some(150.0),
            ..measurement()
        };
        assert!(validate(&m).is_ok());
        assert_eq!(clamp_battery(150.0), 100.0);
        assert_eq!(clamp_battery(-4.0), 0.0);
        assert_eq!(clamp_battery(42.5), 42.5);
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let m = Measurement {
            battery_level: Some(f64::NAN),
            ..measurement()
        };
        assert!(matches!(validate(&m), Err(Error::Validation(_))));

        let m = Measurement {
            pressure: Some(f64::INFINITY),
            ..measurement()
        };
        assert!(validate(&m).is_err());
    }

    #[test]
    fn test_negative_flow_and_packet_loss_rejected() {
        let m = Measurement {
            flow_rate: Some(-1.0),
            ..measurement()
        };
        assert!(validate(&m).is_err());

        let m = Measurement {
            packet_loss_rate: Some(120.0),
            ..measurement()
        };
        assert!(validate(&m).is_err());
    }

    #[test]
    fn test_positive_rssi_rejected() {
        let m = Measurement {
            rssi: Some(20.0),
            ..Default::default()
        };
        assert!(matches!(validate(&m), Err(Error::Validation(_))));

        let m = Measurement {
            rssi: Some(0.0),
            ..Default::default()
        };
        assert!(validate(&m).is_ok());
    }

    #[test]
    fn test_empty_device_code() {
        let device = DeviceUpsert {
            id: None,
            code: "  ".to_string(),
            name: "Meter".to_string(),
            category: DeviceCategory::Water,
            status: DeviceStatus::Active,
            gateway_id: None,
            location: None,
            battery_level: None,
            firmware_version: None,
            rated_max_pressure: None,
            min_flow_rate: None,
        };
        assert!(validate_device(&device).is_err());
    }

    #[test]
    fn test_gateway_coordinates() {
        let gateway = GatewayUpsert {
            id: None,
            code: "GW-01".to_string(),
            location: None,
            latitude: Some(91.0),
            longitude: Some(10.0),
            status: GatewayStatus::Online,
        };
        assert!(validate_gateway(&gateway).is_err());

        let gateway = GatewayUpsert {
            latitude: Some(48.1),
            ..gateway
        };
        assert!(validate_gateway(&gateway).is_ok());
    }
}
