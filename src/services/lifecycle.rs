//! Lifecycle callbacks handed to every wizard and match.

use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use tracing::{error, warn};

use crate::{
    engine::{MatchHandle, MatchListener, WizardListener},
    error::ServiceError,
    services::{match_creation, recovery, stats},
    state::{AppState, SharedState, session::WizardSession},
};

/// Listener shared by all sessions. Holds the application state weakly so that sessions
/// never keep it alive.
pub struct SessionHooks {
    state: Weak<AppState>,
}

impl SessionHooks {
    /// Build hooks reporting into `state`.
    pub fn new(state: Weak<AppState>) -> Self {
        Self { state }
    }

    fn state(&self) -> Result<SharedState, ServiceError> {
        self.state.upgrade().ok_or(ServiceError::StateGone)
    }
}

fn log_failure(result: Result<(), ServiceError>, what: &'static str) {
    match result {
        Ok(()) => {}
        Err(ServiceError::StateGone) => warn!(callback = what, "state gone before callback ran"),
        Err(err) => error!(callback = what, error = %err, "lifecycle callback failed"),
    }
}

impl WizardListener for SessionHooks {
    fn completed(&self, session: WizardSession) -> BoxFuture<'static, ()> {
        let state = self.state();
        Box::pin(async move {
            let result = match state {
                Ok(state) => match_creation::on_wizard_completed(&state, session)
                    .await
                    .map(|_| ()),
                Err(err) => Err(err),
            };
            log_failure(result, "wizard completed");
        })
    }

    fn abandoned(&self, session: WizardSession) -> BoxFuture<'static, ()> {
        let state = self.state();
        Box::pin(async move {
            let result = match state {
                Ok(state) => {
                    match_creation::on_wizard_abandoned(&state, session).await;
                    Ok(())
                }
                Err(err) => Err(err),
            };
            log_failure(result, "wizard abandoned");
        })
    }
}

impl MatchListener for SessionHooks {
    fn finished(&self, session: Arc<dyn MatchHandle>) -> BoxFuture<'static, ()> {
        let state = self.state();
        Box::pin(async move {
            let result = match state {
                Ok(state) => stats::on_match_finished(&state, session).await,
                Err(err) => Err(err),
            };
            log_failure(result, "match finished");
        })
    }

    fn interrupted(&self, session: Arc<dyn MatchHandle>) -> BoxFuture<'static, ()> {
        let state = self.state();
        Box::pin(async move {
            let result = match state {
                Ok(state) => recovery::persist_interrupted(&state, session).await,
                Err(err) => Err(err),
            };
            log_failure(result, "match interrupted");
        })
    }
}
