use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::alerts::{Alert, AlertQuery};
use crate::compression::StatsSummary;
use crate::health::{HealthReport, MonitoringState};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub state: MonitoringState,
    pub connected: bool,
    pub connection_attempts: u32,
    pub alerts_fired: u64,
}

#[derive(Serialize)]
pub struct CompressionReport {
    pub enabled: bool,
    pub cache_entries: usize,
    pub message_types: Vec<StatsSummary>,
}

pub async fn get_health(State(state): State<AdminState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.pipeline.health();
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn get_metrics(State(state): State<AdminState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.pipeline.metrics().render(),
    )
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let pipeline = &state.pipeline;
    let health = pipeline.health_state();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        state: health.state(),
        connected: health.is_connected(),
        connection_attempts: pipeline.connection_attempts(),
        alerts_fired: pipeline.alerts().total_alerts(),
    })
}

pub async fn get_alerts(
    State(state): State<AdminState>,
    Query(query): Query<AlertQuery>,
) -> Json<Vec<Alert>> {
    Json(state.pipeline.alerts().alerts(&query))
}

pub async fn get_compression(State(state): State<AdminState>) -> Json<CompressionReport> {
    let engine = state.pipeline.compression();
    Json(CompressionReport {
        enabled: engine.config().enabled,
        cache_entries: engine.cache_len(),
        message_types: engine.summaries(),
    })
}
