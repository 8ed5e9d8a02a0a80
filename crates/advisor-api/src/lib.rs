//! # Advisor API
//!
//! HTTP surface of the advisor:
//! - `POST /api/v1/ingest/metric`, `POST /api/v1/ingest/incident`
//! - `POST /api/v1/optimize/:metric_key` runs one evaluation
//! - `GET /api/v1/recommendations[/:metric_key]`
//! - `GET /api/v1/stats`, `GET /health`
//!
//! Every response body is a `SuccessResponse` or an `ErrorResponse`.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod error;
pub mod handlers;
pub mod routes;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use llm_advisor_core::config::ServerConfig;

pub use error::ApiError;
pub use handlers::AppState;
pub use routes::create_router;

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub timeout_secs: u64,
    pub enable_logging: bool,
}

impl ApiConfig {
    pub fn from_server_config(server: &ServerConfig) -> llm_advisor_core::Result<Self> {
        let bind_addr = format!("{}:{}", server.host, server.port)
            .parse()
            .map_err(|e| {
                llm_advisor_core::Error::config(format!(
                    "invalid bind address {}:{}: {}",
                    server.host, server.port, e
                ))
            })?;
        Ok(Self {
            bind_addr,
            timeout_secs: server.request_timeout_secs,
            enable_logging: true,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            timeout_secs: 90,
            enable_logging: true,
        }
    }
}

/// Successful response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Error response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bind and serve the API until `shutdown` resolves
pub async fn serve(
    config: ApiConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "API server listening");
    axum::serve(listener, create_router(&config, state))
        .with_graceful_shutdown(shutdown)
        .await
}
