//! Webhook ingestion: the Bot API posts updates to `/{token}`.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};
use tracing::{debug, warn};

use crate::{
    gateway::{InboundEvent, telegram::Update},
    routes::RouterState,
};

/// Accept one update and queue it for the worker pool.
///
/// Requests carrying another token are answered with 404 so the endpoint does not reveal
/// itself. A closed event stream (shutdown in progress) yields 503 and the Bot API
/// retries the update later.
pub async fn receive_update(
    State(state): State<RouterState>,
    Path(token): Path<String>,
    Json(update): Json<Update>,
) -> StatusCode {
    if token != state.app.config().bot_token {
        warn!("webhook called with an unknown token");
        return StatusCode::NOT_FOUND;
    }

    let event = InboundEvent::from(update);
    debug!(update_id = event.update_id, "webhook update received");
    match state.events.send(event).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Configure the webhook route.
pub fn router() -> Router<RouterState> {
    Router::<RouterState>::new().route("/{token}", post(receive_update))
}
