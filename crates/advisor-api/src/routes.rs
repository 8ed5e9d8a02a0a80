//! API route definitions.

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::time::Instant;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};
use tracing::info;

use crate::{
    handlers::{
        get_recommendation, health, ingest_incident, ingest_metric, list_recommendations,
        optimize_threshold, stats, AppState,
    },
    ApiConfig,
};

/// Create the API router
pub fn create_router(config: &ApiConfig, state: AppState) -> Router {
    let api_v1 = Router::new()
        .route("/ingest/metric", post(ingest_metric))
        .route("/ingest/incident", post(ingest_incident))
        .route("/optimize/:metric_key", post(optimize_threshold))
        .route("/recommendations", get(list_recommendations))
        .route("/recommendations/:metric_key", get(get_recommendation))
        .route("/stats", get(stats));

    let app = Router::new()
        .nest("/api/v1", api_v1)
        .route("/health", get(health))
        .with_state(state);

    let app = if config.enable_logging {
        app.layer(middleware::from_fn(logging_middleware))
    } else {
        app
    };

    app.layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(config.timeout()))
}

async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "HTTP request"
    );
    response
}
