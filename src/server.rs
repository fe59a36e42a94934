//! HTTP server for line controllers and the dashboard.
//!
//! This module provides an HTTP server that:
//! - Accepts pulse packets from line controllers via POST /data
//! - Serves live line status, chart data and reports
//! - Reads and updates the detection settings
//!
//! # Architecture
//!
//! ```text
//! Controller ──→ POST /data ──→ Monitor ──→ Engine (smoothing, state)
//!                                  │
//!                                  ▼
//! Dashboard  ←── GET /status, /chartdata, /report ←── Store
//! ```

use crate::config::{Config, SettingsPatch};
use crate::monitor::{LineStatus, Monitor, MonitorError, PacketInput};
use crate::report::{report_range, rfc3339_label, ChartData, DailyReport, Report};
use crate::telemetry::{unix_now, LineState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: IpAddr,
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    /// Listen on all interfaces.
    pub fn new(port: u16) -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
        }
    }

    /// Listen on loopback only.
    pub fn local(port: u16) -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
        }
    }
}

type SharedMonitor = Arc<Monitor>;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server clock, for controllers without a time source
#[derive(Serialize)]
pub struct TimeResponse {
    pub now: i64,
    pub iso: String,
}

/// Response from the data endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse {
    pub ok: bool,
    pub speed: f64,
    pub state: LineState,
    pub state_changed: bool,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: MonitorError) -> ApiError {
    let (status, code) = match e {
        MonitorError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
        MonitorError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_ERROR"),
        MonitorError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
    };
    if status != StatusCode::BAD_REQUEST {
        tracing::error!(error = %e, "request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Run a monitor call off the async runtime.
async fn blocking<T, F>(monitor: SharedMonitor, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Monitor) -> Result<T, MonitorError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(&monitor)).await {
        Ok(result) => result.map_err(api_error),
        Err(e) => {
            tracing::error!(error = %e, "query task failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "query task failed".to_string(),
                    code: "INTERNAL".to_string(),
                }),
            ))
        }
    }
}

/// GET /healthz
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /time
async fn time() -> Json<TimeResponse> {
    let now = unix_now();
    Json(TimeResponse {
        now,
        iso: rfc3339_label(now),
    })
}

/// POST /data
async fn data(
    State(monitor): State<SharedMonitor>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<DataResponse>, ApiError> {
    let input = PacketInput::from_json(&body).map_err(|e| {
        monitor.stats().record_rejected();
        api_error(e)
    })?;
    let outcome = blocking(monitor, move |m| m.handle_packet(&input)).await?;

    Ok(Json(DataResponse {
        ok: true,
        speed: outcome.smoothed_speed,
        state: outcome.state,
        state_changed: outcome.state_changed,
    }))
}

/// GET /status
async fn status(State(monitor): State<SharedMonitor>) -> Json<Vec<LineStatus>> {
    Json(monitor.line_statuses(unix_now()))
}

/// GET /chartdata/:line_id
async fn chart_data(
    State(monitor): State<SharedMonitor>,
    Path(line_id): Path<String>,
) -> Result<Json<ChartData>, ApiError> {
    blocking(monitor, move |m| m.chart_data(&line_id, unix_now()))
        .await
        .map(Json)
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    from: Option<String>,
    to: Option<String>,
}

/// GET /report?from=&to=
async fn report(
    State(monitor): State<SharedMonitor>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Report>, ApiError> {
    let default_days = monitor.config().report_days;
    let (from, to) = report_range(
        query.from.as_deref(),
        query.to.as_deref(),
        unix_now(),
        default_days,
    );
    blocking(monitor, move |m| m.report(from, to)).await.map(Json)
}

#[derive(Debug, Deserialize)]
struct DailyQuery {
    days: Option<u32>,
}

/// GET /report/daily?days=
async fn daily_report(
    State(monitor): State<SharedMonitor>,
    Query(query): Query<DailyQuery>,
) -> Result<Json<DailyReport>, ApiError> {
    let days = query.days.unwrap_or_else(|| monitor.config().report_days);
    blocking(monitor, move |m| m.daily_report(days, unix_now()))
        .await
        .map(Json)
}

/// GET /settings/info
async fn settings_info(State(monitor): State<SharedMonitor>) -> Json<Config> {
    Json(monitor.config())
}

/// POST /settings/save
async fn settings_save(
    State(monitor): State<SharedMonitor>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let config = blocking(monitor, move |m| m.update_settings(&patch)).await?;
    Ok(Json(serde_json::json!({ "ok": true, "settings": config })))
}

/// Build the router.
pub fn router(monitor: SharedMonitor) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/time", get(time))
        .route("/data", post(data))
        .route("/status", get(status))
        .route("/chartdata/:line_id", get(chart_data))
        .route("/report", get(report))
        .route("/report/daily", get(daily_report))
        .route("/settings/info", get(settings_info))
        .route("/settings/save", post(settings_save))
        .layer(CorsLayer::permissive())
        .with_state(monitor)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    monitor: SharedMonitor,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(monitor);

    let addr = SocketAddr::new(config.bind, config.port);
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Line monitor server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
