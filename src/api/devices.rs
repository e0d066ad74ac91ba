//! Device directory endpoints
//!
//! - `GET /webapi/lamps`: every known device
//! - `GET /webapi/lamp/{id}`: one device by name, ignoring case
//! - `GET /webapi/stats`: call counters since startup

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};

use super::{ApiError, ApiState};
use crate::db::DeviceRecord;
use crate::stats::{Call, CallCounts};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

/// List all devices
async fn list_devices(State(state): State<Arc<ApiState>>) -> ApiResult<Vec<DeviceRecord>> {
    state.stats.increment(Call::DevicesGetAll);

    state.store.get_all().map(Json).map_err(|e| {
        tracing::error!(error = %e, "failed to list devices");
        internal_error(&e)
    })
}

/// Get one device
async fn get_device(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<DeviceRecord> {
    state.stats.increment(Call::DeviceGet);

    match state.store.get_by_name(&id) {
        Ok(Some(device)) => Ok(Json(device)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiError::new("not_found", format!("device '{id}' not found"))),
        )),
        Err(e) => {
            tracing::error!(error = %e, %id, "failed to read device");
            Err(internal_error(&e))
        }
    }
}

/// Call counters since startup
async fn stats(State(state): State<Arc<ApiState>>) -> Json<CallCounts> {
    Json(state.stats.snapshot())
}

fn internal_error(e: &crate::Error) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::new("internal", e.to_string())),
    )
}

/// Build device router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/lamps", get(list_devices))
        .route("/lamp/{id}", get(get_device))
        .route("/stats", get(stats))
        .with_state(state)
}
