//! Read-only HTTP API over the device directory

pub mod devices;
pub mod health;

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::db::DeviceStore;
use crate::stats::{Call, CallStatistics};
use crate::Result;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub store: DeviceStore,
    pub stats: Arc<CallStatistics>,
}

/// Error body returned by failing endpoints
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Build the API router
pub fn router(state: ApiState) -> Router {
    let stats = Arc::clone(&state.stats);
    let state = Arc::new(state);

    Router::new()
        .nest("/webapi", devices::router(state))
        .merge(health::router())
        .layer(middleware::from_fn_with_state(stats, count_requests))
        .layer(TraceLayer::new_for_http())
}

/// Count every request on arrival and once its response is ready
async fn count_requests(
    State(stats): State<Arc<CallStatistics>>,
    request: Request,
    next: Next,
) -> Response {
    stats.increment(Call::RequestScheduled);
    let response = next.run(request).await;
    stats.increment(Call::RequestServed);
    response
}

/// HTTP API server
pub struct ApiServer {
    state: ApiState,
    port: u16,
}

impl ApiServer {
    /// Create a server for `state` listening on `port`
    #[must_use]
    pub const fn new(state: ApiState, port: u16) -> Self {
        Self { state, port }
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Api(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| crate::Error::Api(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
