use crate::errors::{Error, Result};
use crate::metrics::{
    ALERTS_RAISED_TOTAL, INGEST_LATENCY_SECONDS, READINGS_INGESTED_TOTAL, READINGS_REJECTED_TOTAL,
    RULE_FAILURES_TOTAL,
};
use crate::model::{Alert, Device, Measurement, Reading, TransmissionStatus};
use crate::rules::{AlertThresholds, RuleEngine, RuleFailure};
use crate::store::{Collections, TelemetryStore};
use crate::validate::{clamp_battery, validate};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Alerts raised and rules that failed during one evaluation pass
#[derive(Debug, Default, Serialize)]
pub struct RuleRun {
    pub alerts: Vec<Alert>,
    pub rule_failures: Vec<RuleFailure>,
}

#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub reading: Reading,
    #[serde(flatten)]
    pub rules: RuleRun,
}

/// Appends readings, refreshes cached device state and runs the rule engine,
/// all under one store write guard.
#[derive(Debug, Clone)]
pub struct Ingestor {
    store: Arc<TelemetryStore>,
    rules: Arc<RuleEngine>,
    weak_signal_rssi: f64,
    packet_loss: f64,
}

impl Ingestor {
    pub fn new(store: Arc<TelemetryStore>, thresholds: &AlertThresholds) -> Self {
        Self::with_rules(store, RuleEngine::new(thresholds), thresholds)
    }

    pub fn with_rules(
        store: Arc<TelemetryStore>,
        rules: RuleEngine,
        thresholds: &AlertThresholds,
    ) -> Self {
        Self {
            store,
            rules: Arc::new(rules),
            weak_signal_rssi: thresholds.weak_signal_rssi,
            packet_loss: thresholds.packet_loss,
        }
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    pub async fn ingest(&self, device_id: u64, measurement: Measurement) -> Result<IngestOutcome> {
        let start = Instant::now();
        let mut store = self.store.write().await;
        if store.device(device_id).is_none() {
            READINGS_REJECTED_TOTAL.inc();
            warn!("Rejected reading for unknown device {}", device_id);
            return Err(Error::DeviceNotFound(device_id));
        }
        if let Err(e) = validate(&measurement) {
            READINGS_REJECTED_TOTAL.inc();
            warn!("Rejected reading for device {}: {}", device_id, e);
            return Err(e);
        }

        let mut reading = self.build_reading(&store, device_id, measurement, Utc::now());
        reading.id = store.append_reading(reading.clone())?;

        let device = store
            .device_mut(device_id)
            .ok_or(Error::DeviceNotFound(device_id))?;
        apply_reading(device, &reading);

        let rules = self.run_rules(&mut store, device_id, &reading)?;
        drop(store);

        READINGS_INGESTED_TOTAL.inc();
        INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        debug!(
            "Ingested reading {} (frame {}) for device {}",
            reading.id, reading.frame_counter, device_id
        );
        if !rules.alerts.is_empty() {
            info!(
                "Reading {} on device {} raised {} alert(s)",
                reading.id,
                device_id,
                rules.alerts.len()
            );
        }

        Ok(IngestOutcome { reading, rules })
    }

    /// Runs the rules again against the device's most recent reading, for
    /// derived metrics checked on demand. Alerts raised are appended as usual.
    pub async fn reevaluate(&self, device_id: u64) -> Result<RuleRun> {
        let mut store = self.store.write().await;
        if store.device(device_id).is_none() {
            return Err(Error::DeviceNotFound(device_id));
        }
        let Some(latest) = store.latest_reading(device_id).cloned() else {
            debug!("Device {} has no readings to re-evaluate", device_id);
            return Ok(RuleRun::default());
        };
        self.run_rules(&mut store, device_id, &latest)
    }

    fn build_reading(
        &self,
        store: &Collections,
        device_id: u64,
        m: Measurement,
        now: DateTime<Utc>,
    ) -> Reading {
        let transmission_status = m.transmission_status.unwrap_or_else(|| {
            let weak = m.rssi.is_some_and(|rssi| rssi < self.weak_signal_rssi);
            let lossy = m.packet_loss_rate.is_some_and(|loss| loss > self.packet_loss);
            if weak || lossy {
                TransmissionStatus::Warning
            } else {
                TransmissionStatus::Success
            }
        });

        Reading {
            id: 0,
            device_id,
            timestamp: m.timestamp.unwrap_or(now),
            frame_counter: store.next_frame_counter(device_id),
            value: m.value,
            temperature: m.temperature,
            humidity: m.humidity,
            pressure: m.pressure,
            flow_rate: m.flow_rate,
            air_quality_index: m.air_quality_index,
            noise_level: m.noise_level,
            rssi: m.rssi,
            snr: m.snr,
            packet_loss_rate: m.packet_loss_rate,
            battery_level: m.battery_level.map(clamp_battery),
            tamper_status: m.tamper_status,
            valve_status: m.valve_status,
            transmission_status,
        }
    }

    fn run_rules(
        &self,
        store: &mut Collections,
        device_id: u64,
        reading: &Reading,
    ) -> Result<RuleRun> {
        let evaluation = {
            let device = store
                .device(device_id)
                .ok_or(Error::DeviceNotFound(device_id))?;
            self.rules.evaluate(device, reading)
        };

        let now = Utc::now();
        let mut alerts = Vec::with_capacity(evaluation.drafts.len());
        for draft in evaluation.drafts {
            let alert = store.append_alert(draft, now)?;
            ALERTS_RAISED_TOTAL
                .with_label_values(&[alert.alert_type.as_str()])
                .inc();
            alerts.push(alert);
        }
        RULE_FAILURES_TOTAL.inc_by(evaluation.failures.len() as f64);

        Ok(RuleRun {
            alerts,
            rule_failures: evaluation.failures,
        })
    }
}

/// Copies the fields present on the reading into the device's cached state.
fn apply_reading(device: &mut Device, reading: &Reading) {
    device.last_communication = Some(reading.timestamp);
    if let Some(value) = reading.value {
        device.last_reading_value = Some(value);
    }
    if let Some(level) = reading.battery_level {
        device.battery_level = clamp_battery(level);
    }
    if let Some(rssi) = reading.rssi {
        device.signal_strength = Some(rssi);
    }
    if let Some(snr) = reading.snr {
        device.snr = Some(snr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RuleError;
    use crate::model::{
        AlertDraft, AlertFilter, AlertType, DeviceCategory, DeviceStatus, DeviceUpsert, Severity,
    };
    use crate::rules::AlertRule;

    async fn setup() -> (Ingestor, u64) {
        let store = Arc::new(TelemetryStore::new());
        let device = store
            .upsert_device(DeviceUpsert {
                id: None,
                code: "LW-100".to_string(),
                name: "Lot 100 meter".to_string(),
                category: DeviceCategory::Electric,
                status: DeviceStatus::Active,
                gateway_id: None,
                location: None,
                battery_level: Some(100.0),
                firmware_version: None,
                rated_max_pressure: None,
                min_flow_rate: None,
            })
            .await
            .unwrap();
        (
            Ingestor::new(store, &AlertThresholds::default()),
            device.id,
        )
    }

    #[tokio::test]
    async fn test_unknown_device_is_rejected() {
        let (ingestor, _) = setup().await;
        let err = ingestor.ingest(404, Measurement::default()).await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(404)));
    }

    #[tokio::test]
    async fn test_device_lookup_precedes_validation() {
        let (ingestor, id) = setup().await;
        let out_of_range = || Measurement {
            humidity: Some(140.0),
            ..Default::default()
        };

        let err = ingestor.ingest(404, out_of_range()).await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(404)));

        let err = ingestor.ingest(id, out_of_range()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(ingestor.store().read().await.latest_reading(id).is_none());
    }

    #[tokio::test]
    async fn test_device_state_tracks_reading() {
        let (ingestor, id) = setup().await;
        let outcome = ingestor
            .ingest(
                id,
                Measurement {
                    value: Some(1532.7),
                    battery_level: Some(88.0),
                    rssi: Some(-97.0),
                    snr: Some(7.5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let device = ingestor.store().device(id).await.unwrap();
        assert_eq!(device.last_reading_value, Some(1532.7));
        assert_eq!(device.last_communication, Some(outcome.reading.timestamp));
        assert_eq!(device.battery_level, 88.0);
        assert_eq!(device.signal_strength, Some(-97.0));
        assert_eq!(device.snr, Some(7.5));
        assert_eq!(outcome.reading.transmission_status, TransmissionStatus::Success);
    }

    #[tokio::test]
    async fn test_absent_fields_leave_cached_state() {
        let (ingestor, id) = setup().await;
        ingestor
            .ingest(
                id,
                Measurement {
                    value: Some(10.0),
                    rssi: Some(-100.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        ingestor
            .ingest(
                id,
                Measurement {
                    temperature: Some(20.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let device = ingestor.store().device(id).await.unwrap();
        assert_eq!(device.last_reading_value, Some(10.0));
        assert_eq!(device.signal_strength, Some(-100.0));
        assert_eq!(device.battery_level, 100.0);
    }

    #[tokio::test]
    async fn test_frame_counter_increments_per_device() {
        let (ingestor, id) = setup().await;
        for expected in 1..=3 {
            let outcome = ingestor.ingest(id, Measurement::default()).await.unwrap();
            assert_eq!(outcome.reading.frame_counter, expected);
        }
    }

    #[tokio::test]
    async fn test_battery_is_clamped() {
        let (ingestor, id) = setup().await;
        let outcome = ingestor
            .ingest(
                id,
                Measurement {
                    battery_level: Some(-12.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.reading.battery_level, Some(0.0));
        assert_eq!(ingestor.store().device(id).await.unwrap().battery_level, 0.0);
        assert_eq!(outcome.rules.alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_weak_link_marks_transmission_warning() {
        let (ingestor, id) = setup().await;
        let outcome = ingestor
            .ingest(
                id,
                Measurement {
                    packet_loss_rate: Some(25.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.reading.transmission_status, TransmissionStatus::Warning);
        assert_eq!(outcome.rules.alerts[0].alert_type, AlertType::Network);

        let outcome = ingestor
            .ingest(
                id,
                Measurement {
                    packet_loss_rate: Some(25.0),
                    transmission_status: Some(TransmissionStatus::Retry),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.reading.transmission_status, TransmissionStatus::Retry);
    }

    struct AlwaysFails;

    impl AlertRule for AlwaysFails {
        fn name(&self) -> &'static str {
            "always_fails"
        }

        fn evaluate(
            &self,
            device: &Device,
            _reading: &Reading,
        ) -> std::result::Result<Option<AlertDraft>, RuleError> {
            Err(RuleError::Misconfigured {
                rule: "always_fails",
                device_id: device.id,
                reason: "broken on purpose".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_rule_failure_keeps_the_reading() {
        let (base, id) = setup().await;
        let thresholds = AlertThresholds::default();
        let engine = RuleEngine::new(&thresholds).with_rule(AlwaysFails);
        let ingestor = Ingestor::with_rules(base.store().clone(), engine, &thresholds);

        let outcome = ingestor
            .ingest(
                id,
                Measurement {
                    battery_level: Some(10.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.rules.rule_failures.len(), 1);
        assert_eq!(outcome.rules.alerts.len(), 1);
        let stored = ingestor
            .store()
            .list_readings(&crate::model::ReadingQuery {
                device_id: Some(id),
                ..Default::default()
            })
            .await;
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_reevaluate_uses_latest_reading() {
        let (ingestor, id) = setup().await;
        assert!(ingestor.reevaluate(id).await.unwrap().alerts.is_empty());
        assert!(matches!(
            ingestor.reevaluate(77).await,
            Err(Error::DeviceNotFound(77))
        ));

        ingestor
            .ingest(
                id,
                Measurement {
                    battery_level: Some(12.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let run = ingestor.reevaluate(id).await.unwrap();
        assert_eq!(run.alerts.len(), 1);
        assert_eq!(run.alerts[0].severity, Severity::High);
        let all = ingestor.store().list_alerts(&AlertFilter::default()).await;
        assert_eq!(all.len(), 2);
    }
}
