use crate::{error::ServiceError, gateway::OutboundMessage, state::SharedState};

/// Exact-text commands, middleware and their handlers.
pub mod commands;
/// Event routing and the worker pool.
pub mod dispatch;
/// Health check service.
pub mod health_service;
/// Sender to user resolution.
pub mod identity;
/// Callbacks the engines report lifecycle transitions through.
pub mod lifecycle;
/// Turning a completed wizard into a running match.
pub mod match_creation;
/// User-facing texts and keyboards.
pub mod messages;
/// Restoring interrupted matches and persisting them on interruption.
pub mod recovery;
/// Graceful drain of live sessions.
pub mod shutdown;
/// Per-player statistics of finished matches.
pub mod stats;

/// Send `message` through the gateway, tagging a failure with `operation`.
pub(crate) async fn notify(
    state: &SharedState,
    message: OutboundMessage,
    operation: &'static str,
) -> Result<(), ServiceError> {
    state
        .gateway()
        .send(message)
        .await
        .map_err(ServiceError::gateway(operation))
}
