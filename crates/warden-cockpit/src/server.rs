//! [`ApiServer`] – HTTP/1.1 JSON API over the device state.
//!
//! Listens on `0.0.0.0:8080` (configurable via [`ApiServer::with_port`]).
//! Routing is an axum [`Router`] built by [`ApiServer::router`], which tests
//! drive directly; [`ApiServer::serve`] runs it over hyper connections.
//!
//! Every request first passes the client allow-list.  Bodies on the
//! matched routes are buffered under a deadline and a size cap before any
//! handler sees them, and a connection that never finishes its request
//! head is dropped after the header timeout.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Local, NaiveDateTime};
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use warden_hal::PeripheralRegistry;
use warden_hal::thermometer::cpu_temperature;
use warden_kernel::{DeviceState, PinScheduler};
use warden_memory::TemperatureLog;
use warden_network::Probe;
use warden_types::{
    HistoryRange, PinCommand, PinCommandReport, ScheduleCommand, ScheduleReport,
    StateSnapshot, TemperatureSample, WardenError,
};

use crate::chart;

/// Default TCP port for the API server.
pub const DEFAULT_PORT: u16 = 8080;

/// Header naming the caller when an allow-list is configured.
pub const CLIENT_HEADER: &str = "x-warden-client";

/// Default time a client gets to send its full request head.
pub const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a client gets to send its full request body.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_BODY: usize = 1024 * 1024;

// ────────────────────────────────────────────────────────────────────────────
// Context
// ────────────────────────────────────────────────────────────────────────────

/// Shared handles every request handler reads from.
pub struct ApiContext {
    pub state: Arc<DeviceState>,
    pub scheduler: Arc<PinScheduler>,
    pub peripherals: PeripheralRegistry,
    pub temperature_log: Arc<TemperatureLog>,
    pub probe: Arc<dyn Probe>,
    /// Client names accepted in [`CLIENT_HEADER`]; empty admits everyone.
    pub allowed_clients: Vec<String>,
}

impl ApiContext {
    fn admits(&self, headers: &HeaderMap) -> bool {
        self.allowed_clients.is_empty()
            || headers
                .get(CLIENT_HEADER)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|c| self.allowed_clients.iter().any(|a| a == c))
    }
}

type Ctx = State<Arc<ApiContext>>;

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// A request that could not be answered normally.  Rendered as
/// `{"error": "<message>"}` with the matching status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid body: {0}")]
    InvalidBody(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("end precedes begin")]
    InvertedRange,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    NotFound(&'static str),
    #[error("request too large")]
    TooLarge,
    #[error("request body timed out")]
    Timeout,
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) | Self::InvertedRange => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if matches!(rejection, JsonRejection::MissingJsonContentType(_)) {
            Self::UnsupportedMediaType(rejection.body_text())
        } else {
            Self::InvalidBody(rejection.body_text())
        }
    }
}

impl From<WardenError> for ApiError {
    fn from(e: WardenError) -> Self {
        Self::Internal(e.to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Server
// ────────────────────────────────────────────────────────────────────────────

/// HTTP server answering the JSON API.
pub struct ApiServer {
    ctx: Arc<ApiContext>,
    port: u16,
    header_timeout: Duration,
    request_timeout: Duration,
}

impl ApiServer {
    /// Create a server over `ctx` on the [`DEFAULT_PORT`].
    pub fn new(ctx: Arc<ApiContext>) -> Self {
        Self {
            ctx,
            port: DEFAULT_PORT,
            header_timeout: DEFAULT_HEADER_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override how long a client may take to send its request head.
    pub fn with_header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    /// Override how long a client may take to send its request body.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The full route table with the allow-list and body layers applied.
    ///
    /// A known path hit with the wrong method answers 405; anything else
    /// unmatched answers 404.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(system_info))
            .route("/t", get(temperature))
            .route("/t/history", post(history))
            .route("/t/history.jpeg", post(history_chart))
            .route("/check-internet", get(check_internet))
            .route("/photo.png", get(photo))
            .route("/photo-events", get(photo_events))
            .route("/gpio", post(gpio))
            .route("/gpio-state", get(gpio_state))
            .route("/gpio-schedule", post(gpio_schedule))
            .route("/values", get(values))
            .route_layer(middleware::from_fn_with_state(
                self.request_timeout,
                buffer_body,
            ))
            .fallback(not_found)
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.ctx),
                require_client,
            ))
            .with_state(Arc::clone(&self.ctx))
    }

    /// Bind `0.0.0.0:<port>` and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Unavailable`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), WardenError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| WardenError::Unavailable(format!("bind error on {addr}: {e}")))?;
        info!(port = self.port, "api listening");
        self.serve(listener).await;
        Ok(())
    }

    /// Serve connections accepted from an already bound `listener`.
    pub async fn serve(self, listener: TcpListener) {
        let app = self.router();
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept error");
                    continue;
                }
            };
            let service = TowerToHyperService::new(app.clone());
            let header_timeout = self.header_timeout;
            tokio::spawn(async move {
                let mut http = http1::Builder::new();
                http.timer(TokioTimer::new())
                    .header_read_timeout(header_timeout);
                if let Err(e) = http.serve_connection(TokioIo::new(stream), service).await {
                    debug!(%peer, error = %e, "connection dropped");
                }
            });
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Layers
// ────────────────────────────────────────────────────────────────────────────

async fn require_client(State(ctx): Ctx, req: Request, next: Next) -> Response {
    if !ctx.admits(req.headers()) {
        warn!(
            path = %req.uri().path(),
            client = ?req.headers().get(CLIENT_HEADER),
            "client rejected"
        );
        return ApiError::Forbidden.into_response();
    }
    debug!(method = %req.method(), path = %req.uri().path(), "request");
    next.run(req).await
}

/// Read the whole body (chunked or sized) within `limit` and hand the
/// handler a buffered copy.
async fn buffer_body(
    State(limit): State<Duration>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (parts, body) = req.into_parts();
    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > MAX_BODY) {
        return Err(ApiError::TooLarge);
    }
    let bytes = tokio::time::timeout(limit, to_bytes(body, MAX_BODY))
        .await
        .map_err(|_| {
            warn!(path = %parts.uri.path(), "request body timed out");
            ApiError::Timeout
        })?
        .map_err(|e| ApiError::InvalidBody(e.to_string()))?;
    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

async fn not_found() -> ApiError {
    ApiError::NotFound("not found")
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!(error = %e, "blocking handler panicked");
        ApiError::Internal("internal error".to_owned())
    })
}

fn iso(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

async fn system_info(State(ctx): Ctx) -> Result<Json<Value>, ApiError> {
    let commands = Arc::clone(&ctx.peripherals.commands);
    let zone = ctx.peripherals.cpu_thermal_zone.clone();
    let (os, cpu) = blocking(move || {
        let os = match commands.run("uname", &["-a"]) {
            Ok(out) if out.success => out.stdout.trim().to_owned(),
            Ok(out) => {
                warn!(stderr = %out.stderr.trim(), "uname failed");
                String::new()
            }
            Err(e) => {
                warn!(error = %e, "uname unavailable");
                String::new()
            }
        };
        (os, cpu_temperature(zone))
    })
    .await?;
    Ok(Json(json!({ "os": os, "cpu_temperature": cpu })))
}

async fn temperature(State(ctx): Ctx) -> Result<Json<Value>, ApiError> {
    let sensor = Arc::clone(&ctx.peripherals.thermometer);
    let reading = blocking(move || sensor.read_celsius()).await?;
    let temperature = match reading {
        Ok(c) => Some(format!("{c:.2} C")),
        Err(e) => {
            warn!(error = %e, "temperature read failed");
            None
        }
    };
    Ok(Json(json!({ "temperature": temperature })))
}

async fn load_history(
    ctx: &ApiContext,
    payload: Result<Json<HistoryRange>, JsonRejection>,
) -> Result<Vec<TemperatureSample>, ApiError> {
    let Json(range) = payload?;
    if range.end < range.begin {
        return Err(ApiError::InvertedRange);
    }
    let log = Arc::clone(&ctx.temperature_log);
    blocking(move || log.history(&range)).await?.map_err(|e| {
        error!(error = %e, "history read failed");
        ApiError::Internal(e.to_string())
    })
}

async fn history(
    State(ctx): Ctx,
    payload: Result<Json<HistoryRange>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let samples = load_history(&ctx, payload).await?;
    let rows: Vec<(String, f64)> = samples
        .iter()
        .map(|s| (iso(s.timestamp), s.celsius))
        .collect();
    Ok(Json(json!({ "history": rows })))
}

async fn history_chart(
    State(ctx): Ctx,
    payload: Result<Json<HistoryRange>, JsonRejection>,
) -> Result<Response, ApiError> {
    let samples = load_history(&ctx, payload).await?;
    let jpeg = blocking(move || chart::render_jpeg(&chart::hourly_means(&samples))).await??;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

async fn check_internet(State(ctx): Ctx) -> Result<Json<Value>, ApiError> {
    let probe = Arc::clone(&ctx.probe);
    let ok = blocking(move || probe.check()).await?;
    Ok(Json(json!({ "ok": ok })))
}

async fn photo(State(ctx): Ctx) -> Result<Response, ApiError> {
    let camera = Arc::clone(&ctx.peripherals.camera);
    let png = blocking(move || camera.capture().and_then(|frame| frame.to_png())).await?;
    match png {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response()),
        Err(e) => {
            warn!(error = %e, "photo unavailable");
            Err(ApiError::NotFound("photo unavailable"))
        }
    }
}

async fn photo_events(State(ctx): Ctx) -> Json<Value> {
    let data: BTreeMap<String, u8> = ctx
        .state
        .drain_motion_events()
        .into_iter()
        .map(|e| (iso(e.timestamp), e.score))
        .collect();
    Json(json!({ "data": data }))
}

async fn gpio(
    State(ctx): Ctx,
    payload: Result<Json<PinCommand>, JsonRejection>,
) -> Result<Json<PinCommandReport>, ApiError> {
    let Json(cmd) = payload?;
    let scheduler = Arc::clone(&ctx.scheduler);
    let report =
        blocking(move || scheduler.apply_command(&cmd, Local::now().naive_local())).await?;
    Ok(Json(report))
}

async fn gpio_state(State(ctx): Ctx) -> Json<StateSnapshot> {
    Json(ctx.state.snapshot())
}

async fn gpio_schedule(
    State(ctx): Ctx,
    payload: Result<Json<ScheduleCommand>, JsonRejection>,
) -> Result<Json<ScheduleReport>, ApiError> {
    let Json(cmd) = payload?;
    Ok(Json(ctx.scheduler.update_schedule(&cmd)))
}

async fn values(State(ctx): Ctx) -> Json<BTreeMap<String, Value>> {
    Json(ctx.state.values())
}
