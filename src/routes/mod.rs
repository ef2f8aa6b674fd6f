use axum::{Router, extract::FromRef};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::{gateway::InboundEvent, state::SharedState};

pub mod health;
pub mod webhook;

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct RouterState {
    /// Application state.
    pub app: SharedState,
    /// Ingestion side of the event stream consumed by the worker pool.
    pub events: mpsc::Sender<InboundEvent>,
}

impl FromRef<RouterState> for SharedState {
    fn from_ref(input: &RouterState) -> Self {
        input.app.clone()
    }
}

/// Compose the webhook and health routes.
pub fn router(state: SharedState, events: mpsc::Sender<InboundEvent>) -> Router<()> {
    health::router()
        .merge(webhook::router())
        .layer(TraceLayer::new_for_http())
        .with_state(RouterState { app: state, events })
}
