use axum::{routing::get, Router};
use std::sync::Arc;
use telemetry_ingestor::config::Settings;
use telemetry_ingestor::ingest::Ingestor;
use telemetry_ingestor::rest::{self, AppState};
use telemetry_ingestor::seed::Fixtures;
use telemetry_ingestor::store::TelemetryStore;
use telemetry_ingestor::{metrics, mqtt, worker};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let settings = Settings::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting telemetry ingestor");
    info!("HTTP server: {}", settings.http_addr);

    metrics::init_metrics();

    let thresholds = match settings.thresholds() {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to load alert thresholds: {}", e);
            std::process::exit(1);
        }
    };

    // One store per process, shared by every request and the uplink worker
    let store = Arc::new(TelemetryStore::new());

    if let Some(path) = &settings.seed_file {
        let seeded = match Fixtures::from_file(path) {
            Ok(fixtures) => fixtures.apply(&store).await,
            Err(e) => Err(e),
        };
        if let Err(e) = seeded {
            error!("Failed to seed store from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }

    let ingestor = Ingestor::new(store.clone(), &thresholds);

    let mut tasks = tokio::task::JoinSet::new();

    if settings.mqtt_enabled {
        info!("MQTT broker: {}:{}", settings.mqtt_broker, settings.mqtt_port);
        info!("Channel capacity: {}", settings.channel_capacity);
        let (tx, rx) = mpsc::channel(settings.channel_capacity);

        let client_id = format!("ingestor-{}", uuid::Uuid::new_v4());
        let (broker, port, topic) = (
            settings.mqtt_broker.clone(),
            settings.mqtt_port,
            settings.mqtt_topic.clone(),
        );
        tasks.spawn(async move {
            if let Err(e) = mqtt::run_mqtt(broker, port, client_id, topic, tx).await {
                error!("MQTT task failed: {}", e);
            }
            "MQTT task"
        });

        let worker_ingestor = ingestor.clone();
        tasks.spawn(async move {
            worker::run_ingest_worker(rx, worker_ingestor).await;
            "Ingest worker"
        });
    } else {
        info!("MQTT uplinks disabled");
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(AppState::new(ingestor)));

    let listener = tokio::net::TcpListener::bind(&settings.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", settings.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", settings.http_addr);

    tasks.spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
        "HTTP server"
    });

    tokio::select! {
        Some(finished) = tasks.join_next() => {
            match finished {
                Ok(name) => error!("{} terminated", name),
                Err(e) => error!("Task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
