//! HTTP API for health checks, Prometheus metrics and flag/strategy admin

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use protect_lib::{
    error::LedgerError,
    health::{ComponentStatus, HealthRegistry},
    ledger::FlagLedger,
    observability::{ProtectMetrics, StructuredLogger},
    strategy::{ReloadSummary, StrategyReloader, StrategyStore},
    FlagRecord,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ProtectMetrics,
    pub ledger: Arc<FlagLedger>,
    pub store: Arc<StrategyStore>,
    pub reloader: StrategyReloader,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: ProtectMetrics,
        ledger: Arc<FlagLedger>,
        store: Arc<StrategyStore>,
        logger: StructuredLogger,
    ) -> Self {
        let reloader = StrategyReloader::new(store.clone(), health_registry.clone(), metrics.clone(), logger);
        Self {
            health_registry,
            metrics,
            ledger,
            store,
            reloader,
        }
    }

    /// Reload strategies from disk and publish the outcome
    pub async fn reload_strategies(&self) -> ReloadSummary {
        self.reloader.reload().await
    }
}

#[derive(Debug, Serialize)]
struct FlagList {
    records: Vec<FlagRecord>,
    total: usize,
}

#[derive(Debug, Serialize)]
struct StrategySummary {
    name: String,
    #[serde(rename = "type")]
    category: String,
    checks: usize,
}

#[derive(Debug, Serialize)]
struct StrategyList {
    strategies: Vec<StrategySummary>,
    total: usize,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn list_flags(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let records = state.ledger.list();
    let total = records.len();
    Json(FlagList { records, total })
}

async fn get_flag(State(state): State<Arc<AppState>>, Path(uuid): Path<String>) -> Response {
    match state.ledger.get(&uuid) {
        Some(record) => Json(record).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("no flag record for {}", uuid)),
    }
}

async fn release_flag(State(state): State<Arc<AppState>>, Path(uuid): Path<String>) -> Response {
    match state.ledger.release(&uuid).await {
        Ok(record) => {
            info!(container_uuid = %uuid, "Suspension released via admin API");
            Json(record).into_response()
        }
        Err(LedgerError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, format!("no flag record for {}", uuid))
        }
        Err(e @ LedgerError::Unavailable(_)) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        Err(e) => {
            error!(container_uuid = %uuid, error = %e, "Release failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn list_strategies(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let set = state.store.current();
    let strategies: Vec<StrategySummary> = set
        .iter()
        .map(|s| StrategySummary {
            name: s.name.clone(),
            category: s.category.clone(),
            checks: s.checks.len(),
        })
        .collect();
    let total = strategies.len();
    Json(StrategyList { strategies, total })
}

async fn reload_strategies(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let summary = state.reload_strategies().await;
    let status = if summary.replaced {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(summary))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/flags", get(list_flags))
        .route("/api/v1/flags/:uuid", get(get_flag))
        .route("/api/v1/flags/:uuid/release", post(release_flag))
        .route("/api/v1/strategies", get(list_strategies))
        .route("/api/v1/strategies/reload", post(reload_strategies))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
