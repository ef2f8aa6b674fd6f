//! Routing tables tying users and join codes to live sessions.
//!
//! Every mutation takes the exclusive side of a single lock over all tables, reads
//! take the shared side. Per-session state lives inside the engines and is
//! synchronized there.

use std::{collections::HashMap, future::Future, sync::Arc};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::{Notify, RwLock, futures::Notified};
use tracing::debug;

use crate::{
    engine::{MatchHandle, WizardHandle},
    error::ServiceError,
    services::commands::CommandHandler,
    state::{
        join_code::JoinCodeGenerator,
        session::{JoinCode, UserId},
    },
};

/// Handler consuming the free-text reply to a previous prompt.
pub type ReplyCallback =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<(), ServiceError>> + Send + Sync>;

/// Number of live sessions, used by the shutdown drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionCounts {
    /// Registered wizard dialogues.
    pub wizards: usize,
    /// Registered matches.
    pub matches: usize,
}

impl SessionCounts {
    /// Sum of wizards and matches.
    pub fn total(&self) -> usize {
        self.wizards + self.matches
    }
}

#[derive(Default)]
struct Routes {
    // key: author id
    wizards: HashMap<UserId, Arc<dyn WizardHandle>>,
    // key: join code
    matches: HashMap<JoinCode, Arc<dyn MatchHandle>>,
    // key: member id, value: code of the match the member plays in
    members: HashMap<UserId, JoinCode>,
    callbacks: HashMap<UserId, ReplyCallback>,
    commands: IndexMap<String, Arc<CommandHandler>>,
}

impl Routes {
    fn remove_match(&mut self, code: JoinCode) -> Option<Arc<dyn MatchHandle>> {
        self.members.retain(|_, member_code| *member_code != code);
        self.matches.remove(&code)
    }
}

/// Concurrency-safe multi-index store of active sessions and handlers.
#[derive(Default)]
pub struct SessionRegistry {
    routes: RwLock<Routes>,
    released: Notify,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the wizard owned by `author`. A previous wizard of `author` is closed.
    pub async fn register_wizard(&self, author: UserId, wizard: Arc<dyn WizardHandle>) {
        let replaced = {
            let mut routes = self.routes.write().await;
            routes.wizards.insert(author, wizard)
        };
        if let Some(replaced) = replaced {
            replaced.close();
        }
    }

    /// Wizard owned by `user`, if any.
    pub async fn wizard_by_user(&self, user: UserId) -> Option<Arc<dyn WizardHandle>> {
        let routes = self.routes.read().await;
        routes.wizards.get(&user).cloned()
    }

    /// Drop the wizard owned by `author`. Returns whether one was registered.
    pub async fn unregister_wizard(&self, author: UserId) -> bool {
        let removed = {
            let mut routes = self.routes.write().await;
            routes.wizards.remove(&author).is_some()
        };
        self.released.notify_waiters();
        removed
    }

    /// Remove the user's wizard, match membership and pending callback as one unit.
    ///
    /// The removed wizard is closed, so it never reports back to its listener.
    pub async fn unregister_user_sessions(&self, user: UserId) {
        let wizard = {
            let mut routes = self.routes.write().await;
            routes.members.remove(&user);
            routes.callbacks.remove(&user);
            routes.wizards.remove(&user)
        };
        if let Some(wizard) = wizard {
            wizard.close();
        }
        self.released.notify_waiters();
    }

    /// Register a match under `code`.
    pub async fn register_match(&self, code: JoinCode, session: Arc<dyn MatchHandle>) {
        let mut routes = self.routes.write().await;
        routes.matches.insert(code, session);
    }

    /// Draw codes until one is free, then build and register the match for it.
    ///
    /// Probing and insertion happen under the same exclusive lock, so two concurrent
    /// creations can never end up with the same code. `build` must not block.
    pub async fn register_new_match<F>(
        &self,
        codes: &dyn JoinCodeGenerator,
        build: F,
    ) -> Arc<dyn MatchHandle>
    where
        F: FnOnce(JoinCode) -> Arc<dyn MatchHandle>,
    {
        let mut routes = self.routes.write().await;
        let code = loop {
            let candidate = codes.generate();
            if !routes.matches.contains_key(&candidate) {
                break candidate;
            }
            debug!(code = %candidate, "join code collision; drawing another");
        };

        let session = build(code);
        routes.matches.insert(code, session.clone());
        session
    }

    /// Match registered under `code`.
    pub async fn match_by_code(&self, code: JoinCode) -> Option<Arc<dyn MatchHandle>> {
        let routes = self.routes.read().await;
        routes.matches.get(&code).cloned()
    }

    /// Match `user` currently plays in.
    pub async fn match_by_user(&self, user: UserId) -> Option<Arc<dyn MatchHandle>> {
        let routes = self.routes.read().await;
        routes
            .members
            .get(&user)
            .and_then(|code| routes.matches.get(code))
            .cloned()
    }

    /// Route `user` to the match under `code`. Fails when no such match is registered.
    pub async fn register_match_member(&self, user: UserId, code: JoinCode) -> bool {
        let mut routes = self.routes.write().await;
        if !routes.matches.contains_key(&code) {
            return false;
        }
        routes.members.insert(user, code);
        true
    }

    /// Remove the match under `code` and every membership pointing at it.
    ///
    /// Idempotent: removing an absent match is a no-op returning `None`.
    pub async fn unregister_match(&self, code: JoinCode) -> Option<Arc<dyn MatchHandle>> {
        let removed = {
            let mut routes = self.routes.write().await;
            routes.remove_match(code)
        };
        self.released.notify_waiters();
        removed
    }

    /// Run `work` while holding the exclusive lock, then deregister the match.
    ///
    /// No event can be routed to the match while `work` runs. The match is removed
    /// whatever `work` returns.
    pub async fn retire_match<F, Fut, T>(&self, code: JoinCode, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let outcome = {
            let mut routes = self.routes.write().await;
            let outcome = work().await;
            routes.remove_match(code);
            outcome
        };
        self.released.notify_waiters();
        outcome
    }

    /// Add a static command. Called at startup only.
    pub async fn register_command(&self, text: impl Into<String>, handler: CommandHandler) {
        let mut routes = self.routes.write().await;
        routes.commands.insert(text.into(), Arc::new(handler));
    }

    /// Command registered for the exact message `text`.
    pub async fn command(&self, text: &str) -> Option<Arc<CommandHandler>> {
        let routes = self.routes.read().await;
        routes.commands.get(text).cloned()
    }

    /// Registered command texts in registration order.
    pub async fn command_names(&self) -> Vec<String> {
        let routes = self.routes.read().await;
        routes.commands.keys().cloned().collect()
    }

    /// Expect the next free-text message of `user` to be handled by `callback`.
    pub async fn register_one_shot_callback(&self, user: UserId, callback: ReplyCallback) {
        let mut routes = self.routes.write().await;
        routes.callbacks.insert(user, callback);
    }

    /// Pending callback for `user`. The entry stays registered; callers clear it
    /// with [`Self::clear_one_shot_callback`] once the interaction is over.
    pub async fn one_shot_callback(&self, user: UserId) -> Option<ReplyCallback> {
        let routes = self.routes.read().await;
        routes.callbacks.get(&user).cloned()
    }

    /// Forget the pending callback of `user`.
    pub async fn clear_one_shot_callback(&self, user: UserId) {
        let mut routes = self.routes.write().await;
        routes.callbacks.remove(&user);
    }

    /// Current number of wizards and matches.
    pub async fn session_counts(&self) -> SessionCounts {
        let routes = self.routes.read().await;
        SessionCounts {
            wizards: routes.wizards.len(),
            matches: routes.matches.len(),
        }
    }

    /// Resolves after the next deregistration. Deregistrations that happen after this
    /// call but before the future is first polled still wake it.
    pub fn released(&self) -> Notified<'_> {
        self.released.notified()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        state::join_code::TimeHashCodes,
        testing::{ScriptedCodes, StubMatch, StubWizard},
    };

    fn noop_callback() -> ReplyCallback {
        Arc::new(|_reply| Box::pin(async { Ok(()) }))
    }

    #[tokio::test]
    async fn unregister_user_sessions_clears_every_route() {
        let registry = SessionRegistry::new();
        let user = UserId(7);
        let code = JoinCode(123_456);

        registry
            .register_wizard(user, StubWizard::new(user) as Arc<dyn WizardHandle>)
            .await;
        registry.register_match(code, StubMatch::new(code)).await;
        assert!(registry.register_match_member(user, code).await);
        registry
            .register_one_shot_callback(user, noop_callback())
            .await;

        registry.unregister_user_sessions(user).await;

        assert!(registry.wizard_by_user(user).await.is_none());
        assert!(registry.match_by_user(user).await.is_none());
        assert!(registry.one_shot_callback(user).await.is_none());
        // the match itself belongs to every player and survives
        assert!(registry.match_by_code(code).await.is_some());
    }

    #[tokio::test]
    async fn removed_and_replaced_wizards_are_closed() {
        let registry = SessionRegistry::new();
        let user = UserId(8);
        let first = StubWizard::new(user);
        let second = StubWizard::new(user);

        registry.register_wizard(user, first.clone()).await;
        registry.register_wizard(user, second.clone()).await;
        assert!(first.is_closed());
        assert!(!second.is_closed());

        registry.unregister_user_sessions(user).await;
        assert!(second.is_closed());
    }

    #[tokio::test]
    async fn unregister_user_sessions_on_unknown_user_is_a_noop() {
        let registry = SessionRegistry::new();
        registry.unregister_user_sessions(UserId(1)).await;
        assert_eq!(registry.session_counts().await.total(), 0);
    }

    #[tokio::test]
    async fn membership_requires_a_registered_match() {
        let registry = SessionRegistry::new();
        assert!(!registry.register_match_member(UserId(1), JoinCode(999_999)).await);
        assert!(registry.match_by_user(UserId(1)).await.is_none());
    }

    #[tokio::test]
    async fn unregister_match_drops_members_and_is_idempotent() {
        let registry = SessionRegistry::new();
        let code = JoinCode(555_555);
        let other = JoinCode(666_666);
        registry.register_match(code, StubMatch::new(code)).await;
        registry.register_match(other, StubMatch::new(other)).await;
        registry.register_match_member(UserId(1), code).await;
        registry.register_match_member(UserId(2), code).await;
        registry.register_match_member(UserId(3), other).await;

        assert!(registry.unregister_match(code).await.is_some());
        assert!(registry.unregister_match(code).await.is_none());

        assert!(registry.match_by_user(UserId(1)).await.is_none());
        assert!(registry.match_by_user(UserId(2)).await.is_none());
        assert_eq!(
            registry.match_by_user(UserId(3)).await.map(|m| m.code()),
            Some(other)
        );
    }

    #[tokio::test]
    async fn one_shot_callback_is_not_consumed_by_lookup() {
        let registry = SessionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .register_one_shot_callback(
                UserId(4),
                Arc::new(move |_reply| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Ok(()) })
                }),
            )
            .await;

        for _ in 0..2 {
            let callback = registry.one_shot_callback(UserId(4)).await.unwrap();
            callback("reply".into()).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        registry.clear_one_shot_callback(UserId(4)).await;
        assert!(registry.one_shot_callback(UserId(4)).await.is_none());
    }

    #[tokio::test]
    async fn forced_collision_registers_under_second_code() {
        let registry = SessionRegistry::new();
        let taken = JoinCode(111_111);
        let fresh = JoinCode(222_222);
        registry.register_match(taken, StubMatch::new(taken)).await;

        let codes = ScriptedCodes::new([taken, fresh]);
        let session = registry
            .register_new_match(&codes, |code| StubMatch::new(code) as Arc<dyn MatchHandle>)
            .await;

        assert_eq!(session.code(), fresh);
        assert_eq!(codes.drawn(), 2);
        assert_eq!(registry.session_counts().await.matches, 2);
    }

    #[tokio::test]
    async fn concurrent_creations_never_share_a_code() {
        let registry = Arc::new(SessionRegistry::new());
        let codes = Arc::new(TimeHashCodes);
        let mut tasks = Vec::new();
        for _ in 0..64 {
            let registry = registry.clone();
            let codes = codes.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .register_new_match(codes.as_ref(), |code| {
                        StubMatch::new(code) as Arc<dyn MatchHandle>
                    })
                    .await
                    .code()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for task in tasks {
            assert!(seen.insert(task.await.unwrap()));
        }
        assert_eq!(registry.session_counts().await.matches, 64);
    }

    #[tokio::test]
    async fn retire_match_runs_work_before_removal() {
        let registry = SessionRegistry::new();
        let code = JoinCode(777_777);
        registry.register_match(code, StubMatch::new(code)).await;
        registry.register_match_member(UserId(9), code).await;

        let result: Result<(), &str> = registry.retire_match(code, || async { Err("boom") }).await;

        assert!(result.is_err());
        assert!(registry.match_by_code(code).await.is_none());
        assert!(registry.match_by_user(UserId(9)).await.is_none());
    }

    #[tokio::test]
    async fn commands_keep_registration_order() {
        let registry = SessionRegistry::new();
        for text in ["/start", "/rules", "/profile"] {
            registry
                .register_command(text, CommandHandler::from_fn(|_, _, _| Box::pin(async { Ok(()) })))
                .await;
        }

        assert!(registry.command("/rules").await.is_some());
        assert!(registry.command("/rule").await.is_none());
        assert_eq!(
            registry.command_names().await,
            vec!["/start", "/rules", "/profile"]
        );
    }
}
