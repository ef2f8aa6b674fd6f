//! Seams towards the wizard and match engines.
//!
//! The orchestration layer never looks inside an engine: it constructs handles,
//! forwards events, and reacts to the lifecycle callbacks declared here.

pub mod basic;

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    gateway::InboundEvent,
    state::session::{
        ChatId, JoinCode, MachineState, MatchConfig, MatchSnapshot, Player, User, UserId,
        WizardSession,
    },
};

/// Result alias for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures reported by engines.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed player input; the engine already told the user.
    #[error("validation: {0}")]
    Validation(String),
    /// The operation is not allowed in the current state (e.g. joining a started match).
    #[error("rejected: {0}")]
    Rejected(String),
    /// Anything else, including gateway failures while the engine talked to players.
    #[error("engine failure: {0}")]
    Internal(String),
}

/// Callbacks a wizard uses to hand its result back.
pub trait WizardListener: Send + Sync {
    /// The author finished the configuration.
    fn completed(&self, session: WizardSession) -> BoxFuture<'static, ()>;
    /// The wizard was cancelled or timed out; nothing is created.
    fn abandoned(&self, session: WizardSession) -> BoxFuture<'static, ()>;
}

/// Live configuration dialogue owned by one author.
pub trait WizardHandle: Send + Sync {
    /// Author owning the dialogue.
    fn author_id(&self) -> UserId;
    /// Start the dialogue. It must call [`WizardListener::abandoned`] once `cancel` fires.
    fn run(&self, cancel: CancellationToken);
    /// Feed one event (text reply or button press) to the dialogue.
    fn execute<'a>(&'a self, event: InboundEvent) -> BoxFuture<'a, EngineResult<()>>;
    /// Stop the dialogue silently after it was deregistered. The listener is not
    /// called and later cancellation of the `run` token is ignored. Idempotent.
    fn close(&self);
}

/// Factory for wizard dialogues.
pub trait WizardEngine: Send + Sync {
    /// Create a dialogue for `author`, talking through `chat_id`.
    fn start(
        &self,
        author: &User,
        chat_id: ChatId,
        listener: Arc<dyn WizardListener>,
    ) -> Arc<dyn WizardHandle>;
}

/// Callbacks a match uses when it ends.
pub trait MatchListener: Send + Sync {
    /// Normal completion; statistics are aggregated.
    fn finished(&self, session: Arc<dyn MatchHandle>) -> BoxFuture<'static, ()>;
    /// Abnormal end (shutdown, restart); state is persisted for recovery.
    fn interrupted(&self, session: Arc<dyn MatchHandle>) -> BoxFuture<'static, ()>;
}

/// Running match.
pub trait MatchHandle: Send + Sync {
    /// Join code the match was configured with.
    fn code(&self) -> JoinCode;
    /// Start driving the match. Once `cancel` fires the match must call
    /// [`MatchListener::interrupted`] exactly once.
    fn run(&self, cancel: CancellationToken);
    /// Feed an event produced by `user_id`.
    fn execute<'a>(&'a self, user_id: UserId, event: InboundEvent)
    -> BoxFuture<'a, EngineResult<()>>;
    /// Force re-entry into `state`, replaying its entry side effects.
    fn move_state(&self, state: MachineState);
    /// Best-performing players at the end of the match.
    fn favorites(&self) -> Vec<Player>;
    /// Consistent copy of the full match state.
    fn snapshot(&self) -> MatchSnapshot;
    /// Add a participant.
    fn add_player(&self, player: Player) -> EngineResult<()>;
    /// Remove a participant that left.
    fn remove_player(&self, user_id: UserId) -> EngineResult<()>;
}

/// Factory for matches.
pub trait MatchEngine: Send + Sync {
    /// Build a fresh match from its configuration. The match is not started.
    fn create(&self, config: MatchConfig, listener: Arc<dyn MatchListener>)
    -> Arc<dyn MatchHandle>;
    /// Rebuild a match from a persisted snapshot without replaying state entry effects.
    fn resume(
        &self,
        snapshot: MatchSnapshot,
        listener: Arc<dyn MatchListener>,
    ) -> Arc<dyn MatchHandle>;
}
