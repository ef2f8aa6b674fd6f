use thiserror::Error;

use crate::{dao::storage::StorageError, engine::EngineError, gateway::GatewayError};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed user input. Already reported to the user, so never logged as an error.
    #[error("validation: {0}")]
    Validation(String),
    /// A storage collaborator failed.
    #[error("storage failure during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StorageError,
    },
    /// The chat gateway failed to deliver a message.
    #[error("gateway failure during {operation}: {source}")]
    Gateway {
        operation: &'static str,
        #[source]
        source: GatewayError,
    },
    /// A wizard or match engine rejected an event.
    #[error("engine failure during {operation}: {source}")]
    Engine {
        operation: &'static str,
        #[source]
        source: EngineError,
    },
    /// The inbound event cannot be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The application state was torn down while a callback was still running.
    #[error("application state is gone")]
    StateGone,
}

impl ServiceError {
    /// Whether the error is an expected user-input problem.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ServiceError::Validation(_)
                | ServiceError::Engine {
                    source: EngineError::Validation(_),
                    ..
                }
        )
    }

    /// Wrap a storage failure with the operation it interrupted.
    pub fn storage(operation: &'static str) -> impl FnOnce(StorageError) -> Self {
        move |source| ServiceError::Storage { operation, source }
    }

    /// Wrap a gateway failure with the operation it interrupted.
    pub fn gateway(operation: &'static str) -> impl FnOnce(GatewayError) -> Self {
        move |source| ServiceError::Gateway { operation, source }
    }

    /// Wrap an engine failure with the operation it interrupted.
    pub fn engine(operation: &'static str) -> impl FnOnce(EngineError) -> Self {
        move |source| ServiceError::Engine { operation, source }
    }
}
