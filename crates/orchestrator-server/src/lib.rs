//! # Orchestrator Server
//!
//! HTTP surface for the LLM Orchestration Gateway:
//! - `POST /v1/generate` and `POST /v1/generate/stream` (SSE)
//! - `GET /metrics` (Prometheus)
//! - health probes and admin endpoints

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod handlers;
pub mod routes;
pub mod shutdown;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

use orchestrator_core::{GatewayError, GatewayResult};
use tracing::info;

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// The gateway HTTP server.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a server over the given state.
    #[must_use]
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Serve until a shutdown signal arrives.
    ///
    /// # Errors
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn run(self) -> GatewayResult<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::configuration(format!("failed to bind {addr}: {e}")))?;

        info!(addr = %addr, "gateway listening");

        let router = create_router(self.state, self.config.max_body_bytes);
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown::shutdown_signal())
            .await
            .map_err(|e| GatewayError::internal(format!("server error: {e}")))?;

        info!("server stopped");
        Ok(())
    }
}
