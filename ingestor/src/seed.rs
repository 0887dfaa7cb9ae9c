use crate::errors::Result;
use crate::model::{DeviceUpsert, GatewayUpsert};
use crate::store::TelemetryStore;
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Gateways and devices provisioned at startup
#[derive(Debug, Default, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub gateways: Vec<GatewayUpsert>,
    #[serde(default)]
    pub devices: Vec<DeviceUpsert>,
}

impl Fixtures {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Gateways go first so devices can reference them. Stops at the first invalid entry.
    pub async fn apply(self, store: &TelemetryStore) -> Result<()> {
        let mut collections = store.write().await;
        let (gateways, devices) = (self.gateways.len(), self.devices.len());
        for gateway in self.gateways {
            collections.upsert_gateway(gateway)?;
        }
        let now = Utc::now();
        for device in self.devices {
            collections.upsert_device(device, now)?;
        }
        info!("Seeded {} gateways and {} devices", gateways, devices);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::model::DeviceFilter;

    #[test]
    fn test_fixtures_apply_in_order() {
        tokio_test::block_on(async {
            let fixtures: Fixtures = serde_json::from_str(
                r#"{
                    "gateways": [{"id": 1, "code": "GW-NORTH", "status": "Online"}],
                    "devices": [
                        {"id": 10, "code": "GS-10", "name": "Gas meter", "category": "Gas", "gateway_id": 1},
                        {"code": "PS-01", "name": "Main line", "category": "PressureSensor", "rated_max_pressure": 1000}
                    ]
                }"#,
            )
            .unwrap();

            let store = TelemetryStore::new();
            fixtures.apply(&store).await.unwrap();

            let devices = store.list_devices(&DeviceFilter::default()).await;
            assert_eq!(devices.len(), 2);
            assert_eq!(store.gateway(1).await.unwrap().connected_devices, 1);
            // the unnumbered device continues after the highest explicit id
            assert!(store.device(11).await.is_ok());
        });
    }

    #[test]
    fn test_dangling_gateway_reference_fails() {
        tokio_test::block_on(async {
            let fixtures: Fixtures = serde_json::from_str(
                r#"{"devices": [{"code": "W-1", "name": "Water", "category": "Water", "gateway_id": 4}]}"#,
            )
            .unwrap();
            let store = TelemetryStore::new();
            assert!(matches!(
                fixtures.apply(&store).await,
                Err(Error::GatewayNotFound(4))
            ));
        });
    }
}
