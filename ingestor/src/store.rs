//! In-memory telemetry store.
//!
//! `TelemetryStore` is the only owner of the device, gateway, reading and
//! alert collections. Every mutation takes the write half of a single
//! `RwLock`, so at most one mutation runs at a time per store instance.
//! Listing and aggregate reads take the shared half and may observe the
//! store one mutation before a write that is queued behind them.

use crate::errors::{Error, Result};
use crate::lifecycle::AlertTransition;
use crate::model::{
    Alert, AlertDraft, AlertFilter, AlertStatus, Device, DeviceFilter, DeviceUpsert, Gateway,
    GatewayOverview, GatewayStatus, GatewayUpsert, Reading, ReadingQuery,
};
use crate::validate::{clamp_battery, validate_device, validate_gateway};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

pub const DEFAULT_READING_LIMIT: usize = 100;

#[derive(Debug, Default)]
pub struct TelemetryStore {
    inner: RwLock<Collections>,
}

/// The four collections plus their id sequences
#[derive(Debug, Default)]
pub struct Collections {
    devices: BTreeMap<u64, Device>,
    gateways: BTreeMap<u64, Gateway>,
    readings: Vec<Reading>,
    alerts: BTreeMap<u64, Alert>,
    /// Highest frame counter seen per device
    frame_counters: BTreeMap<u64, u64>,
    /// Most recent reading per device, by (timestamp, id)
    latest: BTreeMap<u64, Reading>,
    last_device_id: u64,
    last_gateway_id: u64,
    last_reading_id: u64,
    last_alert_id: u64,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access for multi-step reads.
    pub async fn read(&self) -> RwLockReadGuard<'_, Collections> {
        self.inner.read().await
    }

    /// Exclusive access; everything done through one guard is atomic to other callers.
    pub async fn write(&self) -> RwLockWriteGuard<'_, Collections> {
        self.inner.write().await
    }

    pub async fn upsert_device(&self, upsert: DeviceUpsert) -> Result<Device> {
        self.write().await.upsert_device(upsert, Utc::now())
    }

    pub async fn device(&self, id: u64) -> Result<Device> {
        self.read()
            .await
            .device(id)
            .cloned()
            .ok_or(Error::DeviceNotFound(id))
    }

    pub async fn list_devices(&self, filter: &DeviceFilter) -> Vec<Device> {
        self.read().await.devices(filter)
    }

    pub async fn delete_device(&self, id: u64) -> Result<Device> {
        self.write().await.delete_device(id)
    }

    pub async fn upsert_gateway(&self, upsert: GatewayUpsert) -> Result<GatewayOverview> {
        self.write().await.upsert_gateway(upsert)
    }

    pub async fn gateway(&self, id: u64) -> Result<GatewayOverview> {
        self.read()
            .await
            .gateway_overview(id)
            .ok_or(Error::GatewayNotFound(id))
    }

    pub async fn list_gateways(&self) -> Vec<GatewayOverview> {
        self.read().await.gateways()
    }

    pub async fn record_heartbeat(&self, id: u64) -> Result<GatewayOverview> {
        self.write().await.record_heartbeat(id, Utc::now())
    }

    pub async fn set_gateway_status(
        &self,
        id: u64,
        status: GatewayStatus,
    ) -> Result<GatewayOverview> {
        self.write().await.set_gateway_status(id, status)
    }

    pub async fn append_reading(&self, reading: Reading) -> Result<u64> {
        self.write().await.append_reading(reading)
    }

    pub async fn list_readings(&self, query: &ReadingQuery) -> Vec<Reading> {
        self.read().await.readings(query)
    }

    pub async fn append_alert(&self, draft: AlertDraft) -> Result<Alert> {
        self.write().await.append_alert(draft, Utc::now())
    }

    pub async fn update_alert(&self, id: u64, transition: AlertTransition) -> Result<Alert> {
        self.write().await.update_alert(id, transition, Utc::now())
    }

    pub async fn alert(&self, id: u64) -> Result<Alert> {
        self.read()
            .await
            .alert(id)
            .cloned()
            .ok_or(Error::AlertNotFound(id))
    }

    pub async fn list_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.read().await.alerts(filter)
    }
}

/// Advances an id sequence, refusing to wrap around onto existing ids.
fn next_id(last: &mut u64, kind: &str) -> Result<u64> {
    let id = last
        .checked_add(1)
        .ok_or_else(|| Error::Validation(format!("{} id space exhausted", kind)))?;
    *last = id;
    Ok(id)
}

impl Collections {
    pub fn upsert_device(&mut self, upsert: DeviceUpsert, now: DateTime<Utc>) -> Result<Device> {
        validate_device(&upsert)?;
        if let Some(gateway_id) = upsert.gateway_id {
            if !self.gateways.contains_key(&gateway_id) {
                return Err(Error::GatewayNotFound(gateway_id));
            }
        }

        let id = match upsert.id {
            Some(id) => {
                self.last_device_id = self.last_device_id.max(id);
                id
            }
            None => next_id(&mut self.last_device_id, "device")?,
        };

        let device = match self.devices.get_mut(&id) {
            Some(existing) => {
                existing.code = upsert.code;
                existing.name = upsert.name;
                existing.category = upsert.category;
                existing.status = upsert.status;
                existing.gateway_id = upsert.gateway_id;
                existing.location = upsert.location;
                if let Some(level) = upsert.battery_level {
                    existing.battery_level = clamp_battery(level);
                }
                existing.firmware_version = upsert.firmware_version;
                existing.rated_max_pressure = upsert.rated_max_pressure;
                existing.min_flow_rate = upsert.min_flow_rate;
                debug!("Updated device {} ({})", id, existing.code);
                existing.clone()
            }
            None => {
                let device = Device {
                    id,
                    code: upsert.code,
                    name: upsert.name,
                    category: upsert.category,
                    status: upsert.status,
                    gateway_id: upsert.gateway_id,
                    location: upsert.location,
                    battery_level: clamp_battery(upsert.battery_level.unwrap_or(100.0)),
                    signal_strength: None,
                    snr: None,
                    last_reading_value: None,
                    last_communication: None,
                    firmware_version: upsert.firmware_version,
                    rated_max_pressure: upsert.rated_max_pressure,
                    min_flow_rate: upsert.min_flow_rate,
                    installed_at: now,
                };
                info!("Provisioned device {} ({})", id, device.code);
                self.devices.insert(id, device.clone());
                device
            }
        };

        Ok(device)
    }

    pub fn device(&self, id: u64) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn device_mut(&mut self, id: u64) -> Option<&mut Device> {
        self.devices.get_mut(&id)
    }

    pub fn devices(&self, filter: &DeviceFilter) -> Vec<Device> {
        self.devices
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect()
    }

    /// Removes a device together with every reading and alert that references it.
    pub fn delete_device(&mut self, id: u64) -> Result<Device> {
        let device = self.devices.remove(&id).ok_or(Error::DeviceNotFound(id))?;
        let readings_before = self.readings.len();
        self.readings.retain(|r| r.device_id != id);
        self.frame_counters.remove(&id);
        self.latest.remove(&id);
        let alerts_before = self.alerts.len();
        self.alerts.retain(|_, a| a.device_id != id);
        info!(
            "Deleted device {} ({}) with {} readings and {} alerts",
            id,
            device.code,
            readings_before - self.readings.len(),
            alerts_before - self.alerts.len()
        );
        Ok(device)
    }

    pub fn upsert_gateway(&mut self, upsert: GatewayUpsert) -> Result<GatewayOverview> {
        validate_gateway(&upsert)?;
        let id = match upsert.id {
            Some(id) => {
                self.last_gateway_id = self.last_gateway_id.max(id);
                id
            }
            None => next_id(&mut self.last_gateway_id, "gateway")?,
        };

        let last_heartbeat = self.gateways.get(&id).and_then(|g| g.last_heartbeat);
        let gateway = Gateway {
            id,
            code: upsert.code,
            location: upsert.location,
            latitude: upsert.latitude,
            longitude: upsert.longitude,
            status: upsert.status,
            last_heartbeat,
        };
        debug!("Upserted gateway {} ({})", id, gateway.code);
        self.gateways.insert(id, gateway);
        self.gateway_overview(id).ok_or(Error::GatewayNotFound(id))
    }

    pub fn gateway_overview(&self, id: u64) -> Option<GatewayOverview> {
        self.gateways.get(&id).map(|g| self.overview(g))
    }

    pub fn gateways(&self) -> Vec<GatewayOverview> {
        self.gateways.values().map(|g| self.overview(g)).collect()
    }

    /// Recomputed from device membership on every call.
    pub fn connected_devices(&self, gateway_id: u64) -> usize {
        self.devices
            .values()
            .filter(|d| d.gateway_id == Some(gateway_id))
            .count()
    }

    fn overview(&self, gateway: &Gateway) -> GatewayOverview {
        GatewayOverview {
            gateway: gateway.clone(),
            connected_devices: self.connected_devices(gateway.id),
        }
    }

    pub fn record_heartbeat(&mut self, id: u64, now: DateTime<Utc>) -> Result<GatewayOverview> {
        let gateway = self.gateways.get_mut(&id).ok_or(Error::GatewayNotFound(id))?;
        gateway.status = GatewayStatus::Online;
        gateway.last_heartbeat = Some(now);
        debug!("Heartbeat from gateway {} ({})", id, gateway.code);
        self.gateway_overview(id).ok_or(Error::GatewayNotFound(id))
    }

    pub fn set_gateway_status(
        &mut self,
        id: u64,
        status: GatewayStatus,
    ) -> Result<GatewayOverview> {
        let gateway = self.gateways.get_mut(&id).ok_or(Error::GatewayNotFound(id))?;
        gateway.status = status;
        self.gateway_overview(id).ok_or(Error::GatewayNotFound(id))
    }

    /// Appends a reading and returns its assigned id. The incoming `id` is ignored.
    pub fn append_reading(&mut self, mut reading: Reading) -> Result<u64> {
        if !self.devices.contains_key(&reading.device_id) {
            return Err(Error::DeviceNotFound(reading.device_id));
        }
        let id = next_id(&mut self.last_reading_id, "reading")?;
        reading.id = id;

        let frames = self.frame_counters.entry(reading.device_id).or_default();
        *frames = (*frames).max(reading.frame_counter);
        let newer = self
            .latest
            .get(&reading.device_id)
            .map_or(true, |latest| (reading.timestamp, id) >= (latest.timestamp, latest.id));
        if newer {
            self.latest.insert(reading.device_id, reading.clone());
        }

        self.readings.push(reading);
        Ok(id)
    }

    /// Next diagnostic frame counter for a device (max existing + 1).
    pub fn next_frame_counter(&self, device_id: u64) -> u64 {
        self.frame_counters
            .get(&device_id)
            .map_or(1, |max| max.saturating_add(1))
    }

    pub fn latest_reading(&self, device_id: u64) -> Option<&Reading> {
        self.latest.get(&device_id)
    }

    /// Newest first. Without a device id the limit defaults to
    /// [`DEFAULT_READING_LIMIT`]; with one, all matching readings are returned
    /// unless a limit is given.
    pub fn readings(&self, query: &ReadingQuery) -> Vec<Reading> {
        let mut matched: Vec<&Reading> = self
            .readings
            .iter()
            .filter(|r| query.device_id.map_or(true, |d| r.device_id == d))
            .filter(|r| query.from.map_or(true, |from| r.timestamp >= from))
            .filter(|r| query.to.map_or(true, |to| r.timestamp <= to))
            .collect();
        matched.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));

        let limit = match (query.device_id, query.limit) {
            (_, Some(limit)) => limit,
            (None, None) => DEFAULT_READING_LIMIT,
            (Some(_), None) => matched.len(),
        };
        matched.into_iter().take(limit).cloned().collect()
    }

    pub fn append_alert(&mut self, draft: AlertDraft, now: DateTime<Utc>) -> Result<Alert> {
        if !self.devices.contains_key(&draft.device_id) {
            return Err(Error::DeviceNotFound(draft.device_id));
        }
        let id = next_id(&mut self.last_alert_id, "alert")?;
        let alert = Alert {
            id,
            device_id: draft.device_id,
            alert_type: draft.alert_type,
            severity: draft.severity,
            message: draft.message,
            status: AlertStatus::Active,
            created_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        };
        self.alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    pub fn update_alert(
        &mut self,
        id: u64,
        transition: AlertTransition,
        now: DateTime<Utc>,
    ) -> Result<Alert> {
        let alert = self.alerts.get_mut(&id).ok_or(Error::AlertNotFound(id))?;
        transition.apply(alert, now)?;
        Ok(alert.clone())
    }

    pub fn alert(&self, id: u64) -> Option<&Alert> {
        self.alerts.get(&id)
    }

    /// Newest first.
    pub fn alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.alerts
            .values()
            .rev()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect()
    }

    pub(crate) fn all_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub(crate) fn all_gateways(&self) -> impl Iterator<Item = &Gateway> {
        self.gateways.values()
    }

    pub(crate) fn all_readings(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    pub(crate) fn all_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.values()
    }
}
