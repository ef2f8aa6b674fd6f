use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report storage liveness together with the number of live sessions.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let counts = state.registry().session_counts().await;

    match state.stores().health.health_check().await {
        Ok(()) => HealthResponse::ok(counts),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            HealthResponse::degraded(counts)
        }
    }
}
