use axum::Json;

use crate::error::Error;
use crate::gateway_util::AppState;
use crate::retention::{RetentionRunSummary, RetentionStatus};

/// POST /internal/retention/sweep
///
/// Triggered by the deployment's scheduler. Exposed on the internal
/// surface only; the public router never mounts it.
pub async fn sweep_handler(
    axum::extract::State(state): AppState,
) -> Result<Json<RetentionRunSummary>, Error> {
    Ok(Json(state.sweeper.sweep().await?))
}

/// GET /internal/retention/status
pub async fn retention_status_handler(
    axum::extract::State(state): AppState,
) -> Result<Json<RetentionStatus>, Error> {
    Ok(Json(state.sweeper.status().await?))
}
