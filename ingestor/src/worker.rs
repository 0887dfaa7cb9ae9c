use crate::errors::Error;
use crate::ingest::Ingestor;
use crate::mqtt::Uplink;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Drains queued uplinks into the ingestor until the channel closes.
/// Failed uplinks are logged once and dropped; there is no internal retry.
pub async fn run_ingest_worker(mut rx: mpsc::Receiver<Uplink>, ingestor: Ingestor) {
    info!("Starting uplink ingest worker");

    let mut ingested: u64 = 0;
    while let Some(uplink) = rx.recv().await {
        match ingestor.ingest(uplink.device_id, uplink.measurement).await {
            Ok(outcome) => {
                ingested += 1;
                if !outcome.rules.rule_failures.is_empty() {
                    warn!(
                        "Reading {} stored but {} rule(s) failed",
                        outcome.reading.id,
                        outcome.rules.rule_failures.len()
                    );
                }
                if ingested % 10_000 == 0 {
                    debug!("Worker has ingested {} uplinks", ingested);
                }
            }
            Err(e @ Error::DeviceNotFound(_)) | Err(e @ Error::Validation(_)) => {
                warn!("Dropped uplink for device {}: {}", uplink.device_id, e);
            }
            Err(e) => {
                error!("Failed to ingest uplink for device {}: {}", uplink.device_id, e);
            }
        }
    }

    info!("Channel closed, ingest worker stopped after {} uplinks", ingested);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertFilter, DeviceCategory, DeviceStatus, DeviceUpsert, Measurement};
    use crate::rules::AlertThresholds;
    use crate::store::TelemetryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_worker_ingests_until_closed() {
        let store = Arc::new(TelemetryStore::new());
        let device = store
            .upsert_device(DeviceUpsert {
                id: None,
                code: "NS-1".to_string(),
                name: "Noise sensor".to_string(),
                category: DeviceCategory::Environmental,
                status: DeviceStatus::Active,
                gateway_id: None,
                location: Some("Playground".to_string()),
                battery_level: None,
                firmware_version: None,
                rated_max_pressure: None,
                min_flow_rate: None,
            })
            .await
            .unwrap();
        let ingestor = Ingestor::new(store.clone(), &AlertThresholds::default());

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_ingest_worker(rx, ingestor));

        tx.send(Uplink {
            device_id: device.id,
            measurement: Measurement {
                noise_level: Some(92.0),
                ..Default::default()
            },
        })
        .await
        .unwrap();
        tx.send(Uplink {
            device_id: 999,
            measurement: Measurement::default(),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let alerts = store.list_alerts(&AlertFilter::default()).await;
        assert_eq!(alerts.len(), 1);
        assert!(store
            .device(device.id)
            .await
            .unwrap()
            .last_communication
            .is_some());
    }
}
