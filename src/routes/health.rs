use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::health::HealthResponse, routes::RouterState, services::health_service,
    state::SharedState,
};

/// Return the storage status and the number of live sessions.
pub async fn healthcheck(State(state): State<SharedState>) -> Json<HealthResponse> {
    let status = health_service::health_status(&state).await;
    Json(status)
}

/// Configure the health routes subtree.
pub fn router() -> Router<RouterState> {
    Router::<RouterState>::new().route("/healthcheck", get(healthcheck))
}
