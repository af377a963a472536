use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use phishguard_forest::{
    LoadReport, ModelStore, PredictError, Prediction, StoreStats, UrlFeatureExtractor, UrlFeatures,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ModelStore>,
    pub start_time: Instant,
    pub req_count: Arc<AtomicUsize>,
    /// Artifact reloaded by `POST /model/reload`; falls back to the source of
    /// the currently served forest
    pub model_path: Option<PathBuf>,
    pub expected_model_hash: Option<String>,
    pub metrics: Option<PrometheusHandle>,
    pub extractor: UrlFeatureExtractor,
}

impl AppState {
    pub fn new(store: Arc<ModelStore>) -> Self {
        Self {
            store,
            start_time: Instant::now(),
            req_count: Arc::new(AtomicUsize::new(0)),
            model_path: None,
            expected_model_hash: None,
            metrics: None,
            extractor: UrlFeatureExtractor::new(),
        }
    }

    fn record_request(&self) -> u64 {
        self.req_count.fetch_add(1, Ordering::Relaxed) as u64 + 1
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
struct RootResponse {
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    model_loaded: bool,
    trees: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
    req_total: u64,
    stats: StoreStats,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ModelResponse {
    trees: usize,
    n_estimators: usize,
    feature_names: Option<Vec<String>>,
    min_feature_len: usize,
    malformed_leaves: usize,
    fingerprint: String,
    source: Option<String>,
    loaded_at_unix: u64,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub features: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub struct UrlPredictRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub class_index: usize,
    pub is_phishing: u8,
    pub votes: Vec<usize>,
    pub probabilities: Vec<f64>,
    pub anomalies: usize,
}

impl From<Prediction> for PredictResponse {
    fn from(prediction: Prediction) -> Self {
        Self {
            class_index: prediction.class_index,
            is_phishing: u8::from(prediction.class_index == PHISHING_CLASS),
            votes: prediction.votes,
            probabilities: prediction.probabilities,
            anomalies: prediction.anomalies.len(),
        }
    }
}

#[derive(Debug, Serialize)]
struct UrlPredictResponse {
    url: String,
    features: UrlFeatures,
    #[serde(flatten)]
    prediction: PredictResponse,
}

#[derive(Debug, Serialize)]
struct ReloadResponse {
    status: &'static str,
    #[serde(flatten)]
    report: LoadReport,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Class index the training labels use for phishing URLs
pub const PHISHING_CLASS: usize = 1;

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unprocessable<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn service_unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(rejection.status(), rejection.body_text())
    }
}

impl From<PredictError> for ApiError {
    fn from(err: PredictError) -> Self {
        match err {
            PredictError::ModelUnavailable => ApiError::service_unavailable(err.to_string()),
            PredictError::FeatureIndexOutOfRange { .. } => ApiError::unprocessable(err.to_string()),
            PredictError::TraversalLimitExceeded { .. } => ApiError::internal(err.to_string()),
        }
    }
}

pub async fn start_server(state: AppState, addr: &str) -> Result<()> {
    let app = build_router(state);
    let listener = bind_listener(addr).await?;
    info!("PhishGuard API listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {addr}"))
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/version", get(handle_version))
        .route("/metrics", get(handle_metrics))
        .route("/model", get(handle_model))
        .route("/model/reload", post(handle_reload))
        .route("/predict", post(handle_predict))
        .route("/predict/url", post(handle_predict_url))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn handle_root(State(state): State<SharedState>) -> Json<RootResponse> {
    state.record_request();
    Json(RootResponse {
        message: "PhishGuard prediction service is running",
    })
}

async fn handle_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let req_total = state.record_request();
    let snapshot = state.store.snapshot();

    Json(HealthResponse {
        status: if snapshot.is_some() { "ok" } else { "degraded" },
        uptime_secs: state.uptime_seconds(),
        model_loaded: snapshot.is_some(),
        trees: snapshot.as_ref().map_or(0, |s| s.forest.num_trees()),
        fingerprint: snapshot.map(|s| s.fingerprint.clone()),
        req_total,
        stats: state.store.stats(),
    })
}

async fn handle_version(State(state): State<SharedState>) -> Json<VersionResponse> {
    state.record_request();
    Json(VersionResponse {
        service: "phishguard",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_metrics(State(state): State<SharedState>) -> Response {
    let req_total = state.record_request();

    let body = if let Some(handle) = &state.metrics {
        handle.render()
    } else {
        let stats = state.store.stats();
        let trees = state
            .store
            .snapshot()
            .map_or(0, |s| s.forest.num_trees());

        let mut metrics =
            "# HELP phishguard_http_requests_total Total number of HTTP requests handled\n"
                .to_string();
        metrics.push_str("# TYPE phishguard_http_requests_total counter\n");
        metrics.push_str(&format!("phishguard_http_requests_total {req_total}\n"));
        metrics.push_str("# HELP forest_predictions_total Predictions served\n");
        metrics.push_str("# TYPE forest_predictions_total counter\n");
        metrics.push_str(&format!("forest_predictions_total {}\n", stats.predictions_total));
        metrics.push_str("# HELP forest_prediction_errors_total Predictions that failed\n");
        metrics.push_str("# TYPE forest_prediction_errors_total counter\n");
        metrics.push_str(&format!(
            "forest_prediction_errors_total {}\n",
            stats.prediction_errors_total
        ));
        metrics.push_str("# HELP forest_malformed_leaf_total Votes cast by malformed leaves\n");
        metrics.push_str("# TYPE forest_malformed_leaf_total counter\n");
        metrics.push_str(&format!(
            "forest_malformed_leaf_total {}\n",
            stats.malformed_leaf_total
        ));
        metrics.push_str("# HELP forest_trees Trees in the served forest\n");
        metrics.push_str("# TYPE forest_trees gauge\n");
        metrics.push_str(&format!("forest_trees {trees}\n"));
        metrics
    };

    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

async fn handle_model(
    State(state): State<SharedState>,
) -> Result<Json<ModelResponse>, ApiError> {
    state.record_request();
    let snapshot = state
        .store
        .snapshot()
        .ok_or_else(|| ApiError::from(PredictError::ModelUnavailable))?;
    let forest = &snapshot.forest;

    Ok(Json(ModelResponse {
        trees: forest.num_trees(),
        n_estimators: forest.n_estimators(),
        feature_names: forest.feature_names().map(<[String]>::to_vec),
        min_feature_len: forest.min_feature_len(),
        malformed_leaves: forest.malformed_leaves(),
        fingerprint: snapshot.fingerprint.clone(),
        source: snapshot
            .source
            .as_ref()
            .map(|path| path.display().to_string()),
        loaded_at_unix: snapshot
            .loaded_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    }))
}

async fn handle_predict(
    State(state): State<SharedState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    state.record_request();
    let Json(request) = payload?;
    let prediction = state.store.predict(&request.features)?;
    Ok(Json(prediction.into()))
}

async fn handle_predict_url(
    State(state): State<SharedState>,
    payload: Result<Json<UrlPredictRequest>, JsonRejection>,
) -> Result<Json<UrlPredictResponse>, ApiError> {
    state.record_request();
    let Json(request) = payload?;
    let features = state.extractor.extract(&request.url);
    let prediction = state.store.predict(&features.to_vec())?;

    Ok(Json(UrlPredictResponse {
        url: request.url,
        features,
        prediction: prediction.into(),
    }))
}

async fn handle_reload(
    State(state): State<SharedState>,
) -> Result<Json<ReloadResponse>, ApiError> {
    state.record_request();

    let worker_state = state.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let expected = worker_state.expected_model_hash.as_deref();
        match &worker_state.model_path {
            Some(path) => worker_state.store.load_from_path(path, expected),
            None => worker_state.store.reload(expected),
        }
    })
    .await
    .map_err(|err| ApiError::internal(format!("reload task failed: {err}")))?;

    match outcome {
        Ok(report) => Ok(Json(ReloadResponse {
            status: "ok",
            report,
        })),
        Err(err) => {
            warn!("model reload rejected, keeping current forest: {}", err);
            Err(ApiError::unprocessable(format!("model reload failed: {err}")))
        }
    }
}
