use crate::errors::{Error, Result};
use crate::metrics::{CHANNEL_FULL_TOTAL, INVALID_UPLINKS_TOTAL, UPLINKS_TOTAL};
use crate::model::Measurement;
use crate::validate::validate;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A decoded device uplink waiting to be ingested
#[derive(Debug, Clone)]
pub struct Uplink {
    pub device_id: u64,
    pub measurement: Measurement,
}

pub async fn run_mqtt(
    broker: String,
    port: u16,
    client_id: String,
    topic: String,
    tx: mpsc::Sender<Uplink>,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    client
        .subscribe(topic.as_str(), QoS::AtLeastOnce)
        .await
        .map_err(Error::Mqtt)?;

    info!("Subscribed to {} with QoS 1", topic);

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    UPLINKS_TOTAL.inc();

                    debug!(
                        "Received uplink on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    match process_message(&publish.topic, &publish.payload, &tx).await {
                        Ok(()) => {}
                        Err(e) if stops_subscriber(&e) => {
                            error!("Uplink channel closed, stopping MQTT subscriber");
                            return Err(e);
                        }
                        Err(e) => {
                            warn!("Dropped uplink on {}: {}", publish.topic, e);
                            INVALID_UPLINKS_TOTAL.inc();
                        }
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Topics look like `telemetry/{device_id}`; the id is the last segment.
pub fn device_id_from_topic(topic: &str) -> Result<u64> {
    topic
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse().ok())
        .ok_or_else(|| Error::Validation(format!("Topic {} does not end in a device id", topic)))
}

async fn process_message(topic: &str, payload: &[u8], tx: &mpsc::Sender<Uplink>) -> Result<()> {
    let device_id = device_id_from_topic(topic)?;
    let measurement = serde_json::from_slice::<Measurement>(payload)
        .map_err(|e| Error::Validation(format!("JSON parse error: {}", e)))?;

    // Reject early so bad payloads never occupy the channel
    validate(&measurement)?;

    let uplink = Uplink {
        device_id,
        measurement,
    };
    match tx.try_send(uplink) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(uplink)) => {
            CHANNEL_FULL_TOTAL.inc();
            debug!("Channel full, using blocking send");
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            tx.send(uplink).await.map_err(|_| Error::ChannelSend)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ChannelSend),
    }
}

/// Only a closed channel is fatal: the worker is gone and nothing can be
/// ingested. Bad topics and payloads stay bad and are dropped one by one.
fn stops_subscriber(error: &Error) -> bool {
    match error {
        Error::ChannelSend => true,

        Error::DeviceNotFound(_)
        | Error::GatewayNotFound(_)
        | Error::AlertNotFound(_)
        | Error::InvalidTransition { .. }
        | Error::Validation(_)
        | Error::Rule(_)
        | Error::Config(_)
        | Error::Mqtt(_)
        | Error::Json(_)
        | Error::Io(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_closed_channel_stops_subscriber() {
        assert!(stops_subscriber(&Error::ChannelSend));
        assert!(!stops_subscriber(&Error::Validation("test".to_string())));
        assert!(!stops_subscriber(&Error::DeviceNotFound(3)));
    }

    #[test]
    fn test_device_id_from_topic() {
        assert_eq!(device_id_from_topic("telemetry/42").unwrap(), 42);
        assert_eq!(device_id_from_topic("site/a/telemetry/7").unwrap(), 7);
        assert!(device_id_from_topic("telemetry/").is_err());
        assert!(device_id_from_topic("telemetry/meter-1").is_err());
    }

    #[test]
    fn test_process_message_valid() {
        tokio_test::block_on(async {
            let (tx, mut rx) = mpsc::channel(10);

            let measurement = Measurement {
                value: Some(118.4),
                battery_level: Some(80.0),
                rssi: Some(-104.0),
                ..Default::default()
            };
            let payload = serde_json::to_vec(&measurement).unwrap();

            assert!(process_message("telemetry/5", &payload, &tx).await.is_ok());

            let received = rx.recv().await.unwrap();
            assert_eq!(received.device_id, 5);
            assert_eq!(received.measurement.value, Some(118.4));
        });
    }

    #[test]
    fn test_process_message_invalid_json() {
        tokio_test::block_on(async {
            let (tx, _rx) = mpsc::channel(10);
            let payload = b"invalid json";

            assert!(process_message("telemetry/5", payload, &tx).await.is_err());
        });
    }

    #[test]
    fn test_process_message_invalid_temperature() {
        tokio_test::block_on(async {
            let (tx, _rx) = mpsc::channel(10);

            let measurement = Measurement {
                temperature: Some(999.0), // Out of range
                ..Default::default()
            };
            let payload = serde_json::to_vec(&measurement).unwrap();

            assert!(process_message("telemetry/5", &payload, &tx).await.is_err());
        });
    }

    #[test]
    fn test_closed_channel_is_reported() {
        tokio_test::block_on(async {
            let (tx, rx) = mpsc::channel(1);
            drop(rx);
            let payload = serde_json::to_vec(&Measurement::default()).unwrap();
            assert!(matches!(
                process_message("telemetry/1", &payload, &tx).await,
                Err(Error::ChannelSend)
            ));
        });
    }
}
