use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref UPLINKS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_uplinks_total",
        "Total uplink messages received from MQTT"
    ))
    .unwrap();
    pub static ref INVALID_UPLINKS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_invalid_uplinks_total",
        "Total uplink messages that could not be decoded or queued"
    ))
    .unwrap();
    pub static ref READINGS_INGESTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_readings_ingested_total",
        "Total readings persisted"
    ))
    .unwrap();
    pub static ref READINGS_REJECTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_readings_rejected_total",
        "Total readings rejected by validation or for an unknown device"
    ))
    .unwrap();
    pub static ref ALERTS_RAISED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("ingestor_alerts_raised_total", "Total alerts created"),
        &["alert_type"]
    )
    .unwrap();
    pub static ref RULE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_rule_failures_total",
        "Total alert rule evaluations that failed"
    ))
    .unwrap();
    pub static ref ALERT_TRANSITIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "ingestor_alert_transitions_total",
            "Total successful alert lifecycle transitions"
        ),
        &["status"]
    )
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_ingest_latency_seconds",
            "Time taken to ingest one reading including rule evaluation"
        )
        .buckets(vec![
            0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0
        ])
    )
    .unwrap();
    pub static ref CHANNEL_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_channel_full_total",
        "Total number of times the uplink channel was full (backpressure events)"
    ))
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(UPLINKS_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(INVALID_UPLINKS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(READINGS_INGESTED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(READINGS_REJECTED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ALERTS_RAISED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(RULE_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ALERT_TRANSITIONS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INGEST_LATENCY_SECONDS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CHANNEL_FULL_TOTAL.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
