//! Admin and scrape HTTP surface.
//!
//! ```text
//! GET /health             → HealthReport (200 healthy, 503 otherwise)
//! GET /metrics            → Prometheus text
//! GET /admin/status       → version, state, connection summary   [bearer]
//! GET /admin/alerts       → alert log, filtered by query string   [bearer]
//! GET /admin/compression  → per-type stats and cache size         [bearer]
//! ```

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::pipeline::Pipeline;

use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub pipeline: Arc<Pipeline>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let api_key = Arc::from(pipeline.config().observability.admin_api_key.as_str());
        Self { pipeline, api_key }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    let protected = Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/alerts", get(get_alerts))
        .route("/admin/compression", get(get_compression))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
