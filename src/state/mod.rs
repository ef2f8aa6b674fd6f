pub mod join_code;
pub mod registry;
pub mod session;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::BotConfig,
    dao::store::Stores,
    engine::{MatchEngine, WizardEngine},
    gateway::ChatGateway,
    services::lifecycle::SessionHooks,
};

pub use self::registry::{ReplyCallback, SessionCounts, SessionRegistry};
use self::join_code::{JoinCodeGenerator, TimeHashCodes};

pub type SharedState = Arc<AppState>;

/// Engines the orchestration layer drives.
#[derive(Clone)]
pub struct Engines {
    /// Configuration dialogues.
    pub wizards: Arc<dyn WizardEngine>,
    /// Matches.
    pub matches: Arc<dyn MatchEngine>,
    /// Join code source.
    pub codes: Arc<dyn JoinCodeGenerator>,
}

impl Engines {
    /// Bundle engines with the default time-hash join codes.
    pub fn new(wizards: Arc<dyn WizardEngine>, matches: Arc<dyn MatchEngine>) -> Self {
        Self {
            wizards,
            matches,
            codes: Arc::new(TimeHashCodes),
        }
    }

    /// Replace the join code source.
    pub fn with_codes(mut self, codes: Arc<dyn JoinCodeGenerator>) -> Self {
        self.codes = codes;
        self
    }
}

/// Central application state: routing tables, collaborators and cancellation scopes.
pub struct AppState {
    config: BotConfig,
    registry: SessionRegistry,
    stores: Stores,
    gateway: Arc<dyn ChatGateway>,
    engines: Engines,
    run_scope: CancellationToken,
    session_scope: CancellationToken,
    hooks: Arc<SessionHooks>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        config: BotConfig,
        stores: Stores,
        gateway: Arc<dyn ChatGateway>,
        engines: Engines,
    ) -> SharedState {
        Arc::new_cyclic(|weak| Self {
            config,
            registry: SessionRegistry::new(),
            stores,
            gateway,
            engines,
            run_scope: CancellationToken::new(),
            session_scope: CancellationToken::new(),
            hooks: Arc::new(SessionHooks::new(weak.clone())),
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Routing tables.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Storage collaborators.
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Outbound chat gateway.
    pub fn gateway(&self) -> &Arc<dyn ChatGateway> {
        &self.gateway
    }

    /// Wizard and match engines.
    pub fn engines(&self) -> &Engines {
        &self.engines
    }

    /// Lifecycle callbacks handed to every wizard and match.
    pub fn hooks(&self) -> Arc<SessionHooks> {
        self.hooks.clone()
    }

    /// Scope of event ingestion and transport. Cancelling it stops the worker pool only.
    pub fn run_scope(&self) -> &CancellationToken {
        &self.run_scope
    }

    /// Scope of live sessions. Cancelling it starts every session's interruption path.
    pub fn session_scope(&self) -> &CancellationToken {
        &self.session_scope
    }
}
