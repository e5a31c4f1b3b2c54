use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unipush_rs::{UniPushClient, UniPushConfig};

/// Server configuration
struct ServerConfig {
    port: u16,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
        }
    }
}

/// Application state shared across all requests
#[derive(Clone)]
struct AppState {
    client: Arc<UniPushClient>,
    metrics: Arc<Metrics>,
}

/// Server metrics
struct Metrics {
    total_requests: AtomicU64,
    requests_in_flight: AtomicU64,
    start_time: Instant,
}

/// RAII guard for tracking in-flight requests
struct RequestGuard<'a>(&'a AtomicU64);

impl<'a> Drop for RequestGuard<'a> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Read configuration from environment
    let config = ServerConfig::from_env();

    // One shared client: every request reuses its connection pool and token
    let push_client = Arc::new(
        UniPushClient::new(credentials_from_env()?).context("Failed to initialize push client")?,
    );
    tracing::info!(app_id = %push_client.config().app_id, "Push client initialized");

    // Build Axum app with routes
    let app = build_app(push_client);

    // Bind server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

fn credentials_from_env() -> Result<UniPushConfig> {
    let var = |name: &str| env::var(name).with_context(|| format!("{} not set", name));
    Ok(UniPushConfig {
        app_id: var("UNIPUSH_APP_ID")?,
        app_key: var("UNIPUSH_APP_KEY")?,
        app_secret: var("UNIPUSH_APP_SECRET")?,
        master_secret: var("UNIPUSH_MASTER_SECRET")?,
        base_url: env::var("UNIPUSH_BASE_URL").ok(),
    })
}

/// Build the Axum application with routes and middleware
fn build_app(client: Arc<UniPushClient>) -> Router {
    let metrics = Arc::new(Metrics {
        total_requests: AtomicU64::new(0),
        requests_in_flight: AtomicU64::new(0),
        start_time: Instant::now(),
    });

    let state = AppState { client, metrics };

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // API routes
        .route("/api/push", post(push_single))
        .route("/api/push/batch", post(push_batch))
        .route("/api/metrics", get(get_metrics))
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Push a notification to a single device
async fn push_single(
    State(state): State<AppState>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>, ApiError> {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    state
        .metrics
        .requests_in_flight
        .fetch_add(1, Ordering::Relaxed);
    let _guard = RequestGuard(&state.metrics.requests_in_flight);

    if request.cid.is_empty() {
        return Err(ApiError::BadRequest("cid cannot be empty".to_string()));
    }

    tracing::info!("Pushing notification to cid {}", request.cid);

    let envelope = state
        .client
        .push_single_cid(vendor_message(&request))
        .await
        .map_err(|e| {
            tracing::error!("Push error: {}", e);
            ApiError::InternalError(e.to_string())
        })?;

    Ok(Json(PushResponse::from_envelope(envelope)))
}

/// Push individually-addressed notifications to many devices
async fn push_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchPushRequest>,
) -> Result<Json<PushResponse>, ApiError> {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    state
        .metrics
        .requests_in_flight
        .fetch_add(1, Ordering::Relaxed);
    let _guard = RequestGuard(&state.metrics.requests_in_flight);

    if request.messages.is_empty() {
        return Err(ApiError::BadRequest(
            "messages cannot be empty".to_string(),
        ));
    }

    tracing::info!("Batch pushing {} notifications", request.messages.len());

    let msg_list: Vec<Value> = request.messages.iter().map(vendor_message).collect();
    let envelope = state
        .client
        .push_single_batch_cid(msg_list)
        .await
        .map_err(|e| {
            tracing::error!("Batch push error: {}", e);
            ApiError::InternalError(e.to_string())
        })?;

    Ok(Json(PushResponse::from_envelope(envelope)))
}

#[derive(Deserialize)]
struct PushRequest {
    cid: String,
    title: String,
    body: String,
    #[serde(default)]
    click_type: Option<String>,
}

#[derive(Deserialize)]
struct BatchPushRequest {
    messages: Vec<PushRequest>,
}

/// The vendor envelope relayed verbatim to the facade caller
#[derive(Serialize)]
struct PushResponse {
    success: bool,
    code: i32,
    msg: Option<String>,
    data: Option<Value>,
}

impl PushResponse {
    fn from_envelope(envelope: unipush_rs::ApiResponse) -> Self {
        Self {
            success: envelope.is_success(),
            code: envelope.code,
            msg: envelope.msg,
            data: envelope.data,
        }
    }
}

fn vendor_message(request: &PushRequest) -> Value {
    json!({
        "audience": { "cid": [request.cid.as_str()] },
        "push_message": {
            "notification": {
                "title": request.title.as_str(),
                "body": request.body.as_str(),
                "click_type": request.click_type.as_deref().unwrap_or("none"),
            }
        }
    })
}

/// Get server metrics
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        total_requests: state.metrics.total_requests.load(Ordering::Relaxed),
        requests_in_flight: state.metrics.requests_in_flight.load(Ordering::Relaxed),
        uptime_seconds: state.metrics.start_time.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    total_requests: u64,
    requests_in_flight: u64,
    uptime_seconds: u64,
}

/// API error types
enum ApiError {
    BadRequest(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "success": false,
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}
