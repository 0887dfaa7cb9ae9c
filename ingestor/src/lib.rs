//! Telemetry ingestion and threshold alerting for metering and sensor fleets.
//!
//! Readings enter through [`ingest::Ingestor`], which persists them in the
//! shared [`store::TelemetryStore`], refreshes the device's cached state and
//! runs the [`rules::RuleEngine`]. Raised alerts move through
//! [`lifecycle::AlertLifecycle`]; [`dashboard::DashboardAggregator`]
//! recomputes statistics on demand.

pub mod config;
pub mod dashboard;
pub mod errors;
pub mod ingest;
pub mod lifecycle;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod rest;
pub mod rules;
pub mod seed;
pub mod store;
pub mod validate;
pub mod worker;
