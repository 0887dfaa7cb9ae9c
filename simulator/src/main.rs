mod telemetry;

use clap::Parser;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::{Duration, Instant};
use telemetry::Profile;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Publishes synthetic device uplinks to the ingestor's MQTT topic
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// MQTT broker host
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Uplinks per second across all devices
    #[arg(short, long, env = "RATE", default_value_t = 50)]
    rate: u64,

    /// Number of devices, published as ids 1..=N
    #[arg(short, long, env = "DEVICES", default_value_t = 7)]
    devices: u64,

    /// Chance that a single field is outside its normal band
    #[arg(long, env = "ANOMALY_RATE", default_value_t = 0.03)]
    anomaly_rate: f64,

    /// Stop after this many uplinks (0 runs until interrupted)
    #[arg(long, default_value_t = 0)]
    count: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if args.devices == 0 || args.rate == 0 || !(0.0..=1.0).contains(&args.anomaly_rate) {
        error!("devices and rate must be positive and anomaly rate within [0, 1]");
        std::process::exit(2);
    }

    info!("Starting uplink simulator");
    info!(
        "Broker: {}:{}, Rate: {} uplinks/s, Devices: {}, Anomaly rate: {}",
        args.broker, args.port, args.rate, args.devices, args.anomaly_rate
    );

    let client_id = format!("uplink-sim-{}", rand::thread_rng().gen::<u32>());
    let mut mqtt_options = MqttOptions::new(client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 1000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let mut rng = rand::thread_rng();
    let mut published = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_micros(1_000_000 / args.rate.max(1)));

    loop {
        ticker.tick().await;

        let device_id = published % args.devices + 1;
        let uplink =
            telemetry::generate(&mut rng, Profile::for_device(device_id), args.anomaly_rate);
        let payload = match serde_json::to_vec(&uplink) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to serialize uplink: {}", e);
                continue;
            }
        };

        let topic = format!("telemetry/{}", device_id);
        let started = Instant::now();
        match client.publish(topic, QoS::AtLeastOnce, false, payload).await {
            Ok(_) => published += 1,
            Err(e) => warn!("Failed to publish for device {}: {}", device_id, e),
        }
        if started.elapsed() > Duration::from_secs(1) {
            warn!("Publish blocked for {:?}, broker may be unreachable", started.elapsed());
        }

        if published > 0 && published % 1000 == 0 {
            info!("Published {} uplinks", published);
        }
        if args.count > 0 && published >= args.count {
            info!("Reached {} uplinks, stopping", published);
            // let the eventloop flush queued publishes
            tokio::time::sleep(Duration::from_secs(1)).await;
            break;
        }
    }
}
