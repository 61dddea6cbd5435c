// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Thin adapter over the capture scheduler and the analytics engines. Every
// failure is rendered as a JSON diagnostic `{ "error": .., "kind": .. }`;
// nothing here can take the process down.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::analytics::bucket::{HEATMAP_BANDS, HISTOGRAM_BANDS};
use crate::analytics::{
    heatmap_report, histogram_report, HeatmapParams, HeatmapSource, HistogramParams,
    PriceBucketPolicy, TimeGranularity,
};
use crate::app_state::AppState;
use crate::error::{CaptureError, StoreError};
use crate::types::{normalize_symbol, CaptureStatus, Side};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        // ── Capture control ─────────────────────────────────────────
        .route("/api/v1/capture/start", post(capture_start))
        .route("/api/v1/capture/stop", post(capture_stop))
        .route("/api/v1/capture/status", get(capture_status))
        .route("/api/v1/capture/:symbol", post(capture_once))
        // ── Queries ─────────────────────────────────────────────────
        .route("/api/v1/heatmap", get(heatmap_all))
        .route("/api/v1/heatmap/:symbol", get(heatmap_symbol))
        .route("/api/v1/histogram/:symbol", get(histogram))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Error rendering
// =============================================================================

struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match err {
            StoreError::InvalidSymbol { .. } => StatusCode::BAD_REQUEST,
            StoreError::LogNotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::LogSchemaInvalid { .. } | StoreError::LogCorrupt { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            StoreError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<CaptureError> for ApiError {
    fn from(err: CaptureError) -> Self {
        let status = match err {
            CaptureError::Store(e) => return e.into(),
            CaptureError::Fetch(_) => StatusCode::BAD_GATEWAY,
            CaptureError::SymbolBusy(_) => StatusCode::CONFLICT,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
            "kind": self.kind,
        });
        (self.status, Json(body)).into_response()
    }
}

/// Upper-cased path symbol, or 400 unless it is 1-20 ASCII letters or digits.
fn path_symbol(raw: &str) -> Result<String, ApiError> {
    normalize_symbol(raw).ok_or_else(|| ApiError {
        status: StatusCode::BAD_REQUEST,
        kind: "invalid_symbol",
        message: format!("invalid symbol {raw:?}"),
    })
}

/// Run blocking log reads off the async thread.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("query task failed: {e}")))
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    capture: CaptureStatus,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        capture: state.scheduler.status(),
        uptime_secs: state.uptime_secs(),
        server_time: Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Capture control
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    changed: bool,
    status: CaptureStatus,
    message: &'static str,
}

async fn capture_start(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let changed = state.scheduler.start().await;
    let message = if changed {
        info!("capture started via API");
        "Capture scheduler started"
    } else {
        "Capture scheduler already running"
    };
    (
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            changed,
            status: state.scheduler.status(),
            message,
        }),
    )
}

async fn capture_stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let changed = state.scheduler.stop().await;
    let message = if changed {
        info!("capture stopped via API");
        "Capture scheduler stopped"
    } else {
        "Capture scheduler was not running"
    };
    (
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            changed,
            status: state.scheduler.status(),
            message,
        }),
    )
}

async fn capture_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let settings = state.scheduler.settings();
    Json(serde_json::json!({
        "status": state.scheduler.status(),
        "symbols": settings.symbols,
        "active_tasks": state.scheduler.active_symbols().await,
        "interval_seconds": settings.interval.as_secs(),
        "depth_limit": settings.depth_limit,
        "data_dir": state.config.data_dir.display().to_string(),
        "captures": state.scheduler.ledger().snapshot(),
        "stored_symbols": state.store.symbols(Side::Bid).unwrap_or_default(),
    }))
}

async fn capture_once(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.scheduler.capture_once(&symbol).await?;
    Ok(Json(report))
}

// =============================================================================
// Heatmap
// =============================================================================

fn default_time_bucket() -> String {
    "5min".to_string()
}

#[derive(Deserialize)]
struct HeatmapQuery {
    #[serde(default)]
    price_bucket: Option<f64>,
    #[serde(default)]
    bands: Option<u32>,
    #[serde(default = "default_time_bucket")]
    time_bucket: String,
    #[serde(default)]
    side: Option<String>,
}

fn parse_side(raw: Option<&str>) -> Result<Option<Side>, ApiError> {
    match raw {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => Side::parse(raw)
            .map(Some)
            .ok_or_else(|| ApiError::bad_request(format!("invalid side '{raw}'; use 'bid' or 'ask'"))),
    }
}

fn price_policy(width: Option<f64>, bands: Option<u32>, default_bands: u32) -> Result<PriceBucketPolicy, ApiError> {
    if let Some(w) = width {
        if !w.is_finite() || w <= 0.0 {
            return Err(ApiError::bad_request(format!(
                "bucket width must be a positive number, got {w}"
            )));
        }
    }
    let bands = bands.unwrap_or(default_bands);
    if bands == 0 {
        return Err(ApiError::bad_request("bands must be at least 1"));
    }
    Ok(PriceBucketPolicy::from_request(width, bands))
}

impl HeatmapQuery {
    fn params(&self) -> Result<(HeatmapParams, Option<Side>), ApiError> {
        let granularity = TimeGranularity::parse(&self.time_bucket).ok_or_else(|| {
            ApiError::bad_request(format!("invalid time_bucket '{}'", self.time_bucket))
        })?;
        let params = HeatmapParams {
            price_policy: price_policy(self.price_bucket, self.bands, HEATMAP_BANDS)?,
            granularity,
        };
        Ok((params, parse_side(self.side.as_deref())?))
    }
}

async fn heatmap_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<HeatmapQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = path_symbol(&symbol)?;
    let (params, side) = query.params()?;
    let store = Arc::clone(&state.store);
    let report = blocking(move || {
        heatmap_report(&store, &HeatmapSource::Symbol(symbol), side, &params)
    })
    .await?;
    Ok(Json(report))
}

async fn heatmap_all(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HeatmapQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (params, side) = query.params()?;
    let store = Arc::clone(&state.store);
    let report = blocking(move || heatmap_report(&store, &HeatmapSource::Folder, side, &params)).await?;
    Ok(Json(report))
}

// =============================================================================
// Histogram
// =============================================================================

fn default_minutes() -> u32 {
    60
}

#[derive(Deserialize)]
struct HistogramQuery {
    #[serde(default)]
    top: Option<usize>,
    #[serde(default = "default_minutes")]
    minutes: u32,
    #[serde(default)]
    bucket_size: Option<f64>,
    #[serde(default)]
    bands: Option<u32>,
    #[serde(default)]
    side: Option<String>,
}

async fn histogram(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<HistogramQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = path_symbol(&symbol)?;
    let params = HistogramParams {
        window_minutes: query.minutes,
        top: query.top,
        price_policy: price_policy(query.bucket_size, query.bands, HISTOGRAM_BANDS)?,
    };
    let side = parse_side(query.side.as_deref())?;

    let store = Arc::clone(&state.store);
    let result = blocking(move || histogram_report(&store, &symbol, side, &params, Utc::now())).await?;

    match result {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            warn!(error = %e, "histogram query failed");
            Err(e.into())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::scheduler::tests::StubFetcher;
    use crate::runtime_config::RuntimeConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> (Router, Arc<AppState>) {
        let config = RuntimeConfig {
            symbols: vec!["BTCUSDT".into()],
            capture_interval_seconds: 60,
            data_dir: dir.to_path_buf(),
            ..RuntimeConfig::default()
        };
        let state = Arc::new(AppState::with_fetcher(config, Arc::new(StubFetcher::default())));
        (router(Arc::clone(&state)), state)
    }

    async fn call(router: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn start_stop_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (router, state) = app(dir.path());

        let (status, body) = call(&router, "GET", "/api/v1/capture/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "inactive");

        let (status, body) = call(&router, "POST", "/api/v1/capture/start").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["changed"], true);
        assert_eq!(body["status"], "active");

        let (_, body) = call(&router, "POST", "/api/v1/capture/start").await;
        assert_eq!(body["changed"], false);
        assert_eq!(state.scheduler.active_symbols().await, vec!["BTCUSDT"]);

        let (status, body) = call(&router, "POST", "/api/v1/capture/stop").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "inactive");
    }

    #[tokio::test]
    async fn manual_capture_then_queries() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _state) = app(dir.path());

        let (status, body) = call(&router, "POST", "/api/v1/capture/ethusdt").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "ETHUSDT");
        assert_eq!(body["bid_levels"], 2);

        let (status, body) = call(
            &router,
            "GET",
            "/api/v1/histogram/ETHUSDT?minutes=0&bucket_size=5",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["panels"][0]["side"], "ASK");
        assert_eq!(body["panels"][0]["status"], "ready");
        assert_eq!(body["panels"][1]["bars"][0]["class"], "support");

        let (status, body) = call(&router, "GET", "/api/v1/heatmap/ETHUSDT?side=bid&price_bucket=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["panels"][0]["status"], "ready");
        assert_eq!(body["panels"][0]["price_labels"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_log_is_structured_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _state) = app(dir.path());

        let (status, body) = call(&router, "GET", "/api/v1/histogram/BTCUSDT").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "log_not_found");

        let (status, body) = call(&router, "GET", "/api/v1/heatmap/BTCUSDT").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["panels"][0]["status"], "failed");
        assert_eq!(body["panels"][1]["kind"], "log_not_found");
    }

    #[tokio::test]
    async fn invalid_query_parameters_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _state) = app(dir.path());

        let (status, body) = call(&router, "GET", "/api/v1/heatmap?time_bucket=fortnight").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "bad_request");

        let (status, _) = call(&router, "GET", "/api/v1/histogram/BTCUSDT?bucket_size=-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&router, "GET", "/api/v1/heatmap/BTCUSDT?side=middle").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn path_symbols_cannot_leave_the_data_root() {
        let dir = tempfile::tempdir().unwrap();
        let (router, state) = app(dir.path());

        for uri in [
            "/api/v1/histogram/..%2F..%2Fetc%2Fsecret",
            "/api/v1/heatmap/..%2F..%2Fetc%2Fsecret",
            "/api/v1/heatmap/BTC.USDT",
        ] {
            let (status, body) = call(&router, "GET", uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["kind"], "invalid_symbol");
        }

        let (status, body) = call(&router, "POST", "/api/v1/capture/..%2Fx").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_symbol");
        assert!(state.scheduler.ledger().snapshot().is_empty());
    }

    #[tokio::test]
    async fn manual_capture_of_running_symbol_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _state) = app(dir.path());

        call(&router, "POST", "/api/v1/capture/start").await;
        let (status, body) = call(&router, "POST", "/api/v1/capture/btcusdt").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "capture_busy");
        call(&router, "POST", "/api/v1/capture/stop").await;

        let (status, _) = call(&router, "POST", "/api/v1/capture/BTCUSDT").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_capture_status() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _state) = app(dir.path());
        let (status, body) = call(&router, "GET", "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["capture"], "inactive");
    }
}
