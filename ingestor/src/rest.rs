use crate::dashboard::{DashboardAggregator, DashboardStats, NetworkSummary};
use crate::errors::Error;
use crate::ingest::{IngestOutcome, Ingestor, RuleRun};
use crate::lifecycle::AlertLifecycle;
use crate::model::{
    Alert, AlertDraft, AlertFilter, AlertStatus, Device, DeviceFilter, DeviceUpsert,
    GatewayOverview, GatewayUpsert, Measurement, Reading, ReadingQuery, Severity,
};
use crate::store::TelemetryStore;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

/// Services shared by every request handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Arc<TelemetryStore>,
    pub ingestor: Ingestor,
    pub lifecycle: AlertLifecycle,
    pub dashboard: DashboardAggregator,
}

impl AppState {
    pub fn new(ingestor: Ingestor) -> Self {
        let store = ingestor.store().clone();
        Self {
            lifecycle: AlertLifecycle::new(store.clone()),
            dashboard: DashboardAggregator::new(store.clone()),
            store,
            ingestor,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadingWindow {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RecentReadings {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SeverityQuery {
    severity: Option<Severity>,
}

/// Body of `PUT /alerts/{id}/status`
#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    status: AlertStatus,
    #[serde(default)]
    actor: Option<String>,
    #[serde(default)]
    resolved_by: Option<String>,
    #[serde(default)]
    resolution_notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActiveAlertCount {
    severity: Option<Severity>,
    count: usize,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/devices", get(list_devices).put(upsert_device))
        .route("/api/v1/devices/:id", get(get_device).delete(delete_device))
        .route(
            "/api/v1/devices/:id/readings",
            get(device_readings).post(ingest_reading),
        )
        .route("/api/v1/devices/:id/reevaluate", post(reevaluate_device))
        .route("/api/v1/readings", get(recent_readings))
        .route("/api/v1/gateways", get(list_gateways).put(upsert_gateway))
        .route("/api/v1/gateways/:id", get(get_gateway))
        .route("/api/v1/gateways/:id/heartbeat", post(gateway_heartbeat))
        .route("/api/v1/alerts", get(list_alerts).post(raise_alert))
        .route("/api/v1/alerts/:id", get(get_alert))
        .route("/api/v1/alerts/:id/status", put(update_alert_status))
        .route("/api/v1/dashboard/stats", get(dashboard_stats))
        .route("/api/v1/dashboard/active-alerts", get(active_alert_count))
        .route("/api/v1/network/summary", get(network_summary))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn list_devices(
    State(state): State<AppState>,
    Query(filter): Query<DeviceFilter>,
) -> Json<Vec<Device>> {
    Json(state.store.list_devices(&filter).await)
}

async fn upsert_device(
    State(state): State<AppState>,
    Json(upsert): Json<DeviceUpsert>,
) -> Result<Json<Device>, AppError> {
    Ok(Json(state.store.upsert_device(upsert).await?))
}

async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Device>, AppError> {
    Ok(Json(state.store.device(id).await?))
}

async fn delete_device(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Device>, AppError> {
    Ok(Json(state.store.delete_device(id).await?))
}

async fn ingest_reading(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(measurement): Json<Measurement>,
) -> Result<(StatusCode, Json<IngestOutcome>), AppError> {
    let outcome = state.ingestor.ingest(id, measurement).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn device_readings(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(window): Query<ReadingWindow>,
) -> Result<Json<Vec<Reading>>, AppError> {
    // unknown device is a 404, not an empty list
    state.store.device(id).await?;
    let query = ReadingQuery {
        device_id: Some(id),
        from: window.from,
        to: window.to,
        limit: window.limit,
    };
    Ok(Json(state.store.list_readings(&query).await))
}

async fn reevaluate_device(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<RuleRun>, AppError> {
    Ok(Json(state.ingestor.reevaluate(id).await?))
}

async fn recent_readings(
    State(state): State<AppState>,
    Query(params): Query<RecentReadings>,
) -> Json<Vec<Reading>> {
    let query = ReadingQuery {
        limit: params.limit.map(|l| l.min(1000)),
        ..Default::default()
    };
    Json(state.store.list_readings(&query).await)
}

async fn list_gateways(State(state): State<AppState>) -> Json<Vec<GatewayOverview>> {
    Json(state.store.list_gateways().await)
}

async fn upsert_gateway(
    State(state): State<AppState>,
    Json(upsert): Json<GatewayUpsert>,
) -> Result<Json<GatewayOverview>, AppError> {
    Ok(Json(state.store.upsert_gateway(upsert).await?))
}

async fn get_gateway(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<GatewayOverview>, AppError> {
    Ok(Json(state.store.gateway(id).await?))
}

async fn gateway_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<GatewayOverview>, AppError> {
    Ok(Json(state.store.record_heartbeat(id).await?))
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(filter): Query<AlertFilter>,
) -> Json<Vec<Alert>> {
    Json(state.store.list_alerts(&filter).await)
}

async fn raise_alert(
    State(state): State<AppState>,
    Json(draft): Json<AlertDraft>,
) -> Result<(StatusCode, Json<Alert>), AppError> {
    let alert = state.lifecycle.raise(draft).await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

async fn get_alert(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Alert>, AppError> {
    Ok(Json(state.store.alert(id).await?))
}

async fn update_alert_status(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Alert>, AppError> {
    let actor = update
        .actor
        .or(update.resolved_by)
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| Error::Validation("actor is required".to_string()))?;
    let alert = state
        .lifecycle
        .transition(id, update.status, &actor, update.resolution_notes)
        .await?;
    Ok(Json(alert))
}

async fn dashboard_stats(State(state): State<AppState>) -> Json<DashboardStats> {
    Json(state.dashboard.dashboard_stats().await)
}

async fn active_alert_count(
    State(state): State<AppState>,
    Query(params): Query<SeverityQuery>,
) -> Json<ActiveAlertCount> {
    let count = state.dashboard.active_alert_count(params.severity).await;
    Json(ActiveAlertCount {
        severity: params.severity,
        count,
    })
}

async fn network_summary(State(state): State<AppState>) -> Json<NetworkSummary> {
    Json(state.dashboard.network_summary().await)
}

pub struct AppError(anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<Error>() {
            Some(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Some(Error::InvalidTransition { .. }) => StatusCode::CONFLICT,
            Some(Error::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("API error: {}", self.0);
        } else {
            warn!("API request rejected ({}): {}", status, self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
