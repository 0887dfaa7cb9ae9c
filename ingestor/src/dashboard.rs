//! Read-only statistics, recomputed from the store on every call.

use crate::model::{
    AlertStatus, AlertType, DeviceStatus, GatewayStatus, Severity, TransmissionStatus,
};
use crate::store::{Collections, TelemetryStore};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const SEVERITIES: [Severity; 4] = [
    Severity::Low,
    Severity::Medium,
    Severity::High,
    Severity::Critical,
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSummary {
    pub total_devices: usize,
    pub active_devices: usize,
    pub offline_devices: usize,
    pub maintenance_devices: usize,
    pub average_battery: f64,
    pub average_signal_strength: f64,
    pub gateways_online: usize,
    pub gateways_offline: usize,
    pub total_readings: usize,
    pub readings_last_24h: usize,
    /// Percent of readings transmitted with status Success
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub devices_by_status: BTreeMap<DeviceStatus, usize>,
    pub active_alerts: usize,
    pub active_alerts_by_severity: BTreeMap<Severity, usize>,
    pub active_alerts_by_type: BTreeMap<AlertType, usize>,
    pub acknowledged_alerts: usize,
    pub alerts_today: usize,
    pub total_readings: usize,
    pub readings_today: usize,
    pub readings_this_month: usize,
}

#[derive(Debug, Clone)]
pub struct DashboardAggregator {
    store: Arc<TelemetryStore>,
}

impl DashboardAggregator {
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        Self { store }
    }

    pub async fn network_summary(&self) -> NetworkSummary {
        network_summary_at(&*self.store.read().await, Utc::now())
    }

    pub async fn active_alert_count(&self, severity: Option<Severity>) -> usize {
        self.store
            .read()
            .await
            .all_alerts()
            .filter(|a| a.status == AlertStatus::Active)
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .count()
    }

    pub async fn dashboard_stats(&self) -> DashboardStats {
        dashboard_stats_at(&*self.store.read().await, Utc::now())
    }
}

/// Rounds to two decimals; non-finite input becomes zero.
pub fn round2(value: f64) -> f64 {
    if value.is_finite() {
        (value * 100.0).round() / 100.0
    } else {
        0.0
    }
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        round2(sum / count as f64)
    }
}

pub fn network_summary_at(c: &Collections, now: DateTime<Utc>) -> NetworkSummary {
    let count_status =
        |status: DeviceStatus| c.all_devices().filter(|d| d.status == status).count();
    let day_ago = now - Duration::hours(24);

    let total_readings = c.all_readings().count();
    let successful = c
        .all_readings()
        .filter(|r| r.transmission_status == TransmissionStatus::Success)
        .count();
    let success_rate = if total_readings == 0 {
        0.0
    } else {
        round2(successful as f64 * 100.0 / total_readings as f64)
    };

    NetworkSummary {
        total_devices: c.all_devices().count(),
        active_devices: count_status(DeviceStatus::Active),
        offline_devices: count_status(DeviceStatus::Offline),
        maintenance_devices: count_status(DeviceStatus::Maintenance),
        average_battery: average(c.all_devices().map(|d| d.battery_level)),
        average_signal_strength: average(c.all_devices().filter_map(|d| d.signal_strength)),
        gateways_online: c
            .all_gateways()
            .filter(|g| g.status == GatewayStatus::Online)
            .count(),
        gateways_offline: c
            .all_gateways()
            .filter(|g| g.status == GatewayStatus::Offline)
            .count(),
        total_readings,
        readings_last_24h: c
            .all_readings()
            .filter(|r| r.timestamp > day_ago && r.timestamp <= now)
            .count(),
        success_rate,
    }
}

pub fn dashboard_stats_at(c: &Collections, now: DateTime<Utc>) -> DashboardStats {
    let today = now.date_naive();
    let same_month = |ts: DateTime<Utc>| ts.year() == now.year() && ts.month() == now.month();

    let mut devices_by_status: BTreeMap<DeviceStatus, usize> = [
        DeviceStatus::Active,
        DeviceStatus::Maintenance,
        DeviceStatus::Offline,
    ]
    .into_iter()
    .map(|s| (s, 0))
    .collect();
    for device in c.all_devices() {
        *devices_by_status.entry(device.status).or_default() += 1;
    }

    let mut active_alerts_by_severity: BTreeMap<Severity, usize> =
        SEVERITIES.into_iter().map(|s| (s, 0)).collect();
    let mut active_alerts_by_type: BTreeMap<AlertType, usize> = BTreeMap::new();
    let mut active_alerts = 0;
    for alert in c.all_alerts().filter(|a| a.status == AlertStatus::Active) {
        active_alerts += 1;
        *active_alerts_by_severity.entry(alert.severity).or_default() += 1;
        *active_alerts_by_type.entry(alert.alert_type).or_default() += 1;
    }

    DashboardStats {
        devices_by_status,
        active_alerts,
        active_alerts_by_severity,
        active_alerts_by_type,
        acknowledged_alerts: c
            .all_alerts()
            .filter(|a| a.status == AlertStatus::Acknowledged)
            .count(),
        alerts_today: c
            .all_alerts()
            .filter(|a| a.created_at.date_naive() == today)
            .count(),
        total_readings: c.all_readings().count(),
        readings_today: c
            .all_readings()
            .filter(|r| r.timestamp.date_naive() == today)
            .count(),
        readings_this_month: c
            .all_readings()
            .filter(|r| same_month(r.timestamp))
            .count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::AlertTransition;
    use crate::model::{AlertDraft, DeviceCategory, DeviceUpsert, GatewayUpsert, Reading};
    use chrono::TimeZone;

    fn upsert(code: &str, status: DeviceStatus, battery: f64) -> DeviceUpsert {
        DeviceUpsert {
            id: None,
            code: code.to_string(),
            name: code.to_string(),
            category: DeviceCategory::Environmental,
            status,
            gateway_id: None,
            location: None,
            battery_level: Some(battery),
            firmware_version: None,
            rated_max_pressure: None,
            min_flow_rate: None,
        }
    }

    fn reading(device_id: u64, ts: DateTime<Utc>, status: TransmissionStatus) -> Reading {
        Reading {
            id: 0,
            device_id,
            timestamp: ts,
            frame_counter: 1,
            value: None,
            temperature: None,
            humidity: None,
            pressure: None,
            flow_rate: None,
            air_quality_index: None,
            noise_level: None,
            rssi: None,
            snr: None,
            packet_loss_rate: None,
            battery_level: None,
            tamper_status: None,
            valve_status: None,
            transmission_status: status,
        }
    }

    #[test]
    fn test_empty_store_is_all_zero() {
        let c = Collections::default();
        let summary = network_summary_at(&c, Utc::now());
        assert_eq!(summary.total_devices, 0);
        assert_eq!(summary.average_battery, 0.0);
        assert_eq!(summary.average_signal_strength, 0.0);
        assert_eq!(summary.success_rate, 0.0);
        assert!(!summary.success_rate.is_nan());

        let stats = dashboard_stats_at(&c, Utc::now());
        assert_eq!(stats.active_alerts, 0);
        assert_eq!(stats.devices_by_status[&DeviceStatus::Active], 0);
        assert_eq!(stats.active_alerts_by_severity[&Severity::Critical], 0);
    }

    #[test]
    fn test_summary_counts_and_rounding() {
        let mut c = Collections::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
        let a = c.upsert_device(upsert("A", DeviceStatus::Active, 90.0), now).unwrap();
        c.upsert_device(upsert("B", DeviceStatus::Offline, 45.0), now).unwrap();
        c.upsert_device(upsert("C", DeviceStatus::Active, 10.0), now).unwrap();
        c.upsert_gateway(GatewayUpsert {
            id: None,
            code: "GW".to_string(),
            location: None,
            latitude: None,
            longitude: None,
            status: GatewayStatus::Online,
        })
        .unwrap();
        c.device_mut(a.id).unwrap().signal_strength = Some(-101.0);

        c.append_reading(reading(a.id, now - Duration::hours(1), TransmissionStatus::Success))
            .unwrap();
        c.append_reading(reading(a.id, now - Duration::hours(2), TransmissionStatus::Success))
            .unwrap();
        c.append_reading(reading(a.id, now - Duration::hours(30), TransmissionStatus::Retry))
            .unwrap();

        let s = network_summary_at(&c, now);
        assert_eq!(s.total_devices, 3);
        assert_eq!(s.active_devices, 2);
        assert_eq!(s.offline_devices, 1);
        assert_eq!(s.average_battery, 48.33);
        assert_eq!(s.average_signal_strength, -101.0);
        assert_eq!(s.gateways_online, 1);
        assert_eq!(s.gateways_offline, 0);
        assert_eq!(s.readings_last_24h, 2);
        assert_eq!(s.success_rate, 66.67);
    }

    #[test]
    fn test_stats_use_calendar_boundaries() {
        let mut c = Collections::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 15, 0, 30, 0).unwrap();
        let d = c.upsert_device(upsert("A", DeviceStatus::Maintenance, 50.0), now).unwrap();
        // 31 minutes earlier is yesterday but still this month
        c.append_reading(reading(d.id, now - Duration::minutes(31), TransmissionStatus::Success))
            .unwrap();
        c.append_reading(reading(d.id, now, TransmissionStatus::Success))
            .unwrap();
        c.append_reading(reading(d.id, now - Duration::days(20), TransmissionStatus::Success))
            .unwrap();

        let draft = |severity| AlertDraft {
            device_id: d.id,
            alert_type: AlertType::Noise,
            severity,
            message: "noise".to_string(),
        };
        c.append_alert(draft(Severity::Medium), now).unwrap();
        c.append_alert(draft(Severity::High), now).unwrap();
        let acked = c.append_alert(draft(Severity::High), now).unwrap();
        c.update_alert(
            acked.id,
            AlertTransition::Acknowledge {
                actor: "ops".to_string(),
            },
            now,
        )
        .unwrap();

        let stats = dashboard_stats_at(&c, now);
        assert_eq!(stats.devices_by_status[&DeviceStatus::Maintenance], 1);
        assert_eq!(stats.readings_today, 1);
        assert_eq!(stats.readings_this_month, 2);
        assert_eq!(stats.total_readings, 3);
        assert_eq!(stats.active_alerts, 2);
        assert_eq!(stats.active_alerts_by_severity[&Severity::High], 1);
        assert_eq!(stats.active_alerts_by_type[&AlertType::Noise], 2);
        assert_eq!(stats.acknowledged_alerts, 1);
        assert_eq!(stats.alerts_today, 3);
    }

    #[tokio::test]
    async fn test_aggregator_reads_through_store() {
        let store = Arc::new(TelemetryStore::new());
        let device = store
            .upsert_device(upsert("EN-1", DeviceStatus::Active, 64.0))
            .await
            .unwrap();
        store
            .append_reading(reading(device.id, Utc::now(), TransmissionStatus::Success))
            .await
            .unwrap();
        let dashboard = DashboardAggregator::new(store.clone());

        let summary = dashboard.network_summary().await;
        assert_eq!(summary.total_devices, 1);
        assert_eq!(summary.average_battery, 64.0);
        assert_eq!(summary.success_rate, 100.0);

        let stats = dashboard.dashboard_stats().await;
        assert_eq!(stats.total_readings, 1);
        assert_eq!(stats.devices_by_status[&DeviceStatus::Active], 1);
        assert_eq!(dashboard.active_alert_count(None).await, 0);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(2.0 / 3.0), 0.67);
        assert_eq!(round2(f64::NAN), 0.0);
    }
}
