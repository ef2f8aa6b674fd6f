//! Static command table: exact-text commands and reply-keyboard buttons, gated by middleware.

use std::{future::Future, sync::Arc};

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::{
    dao::models::UserEntity,
    engine::EngineError,
    error::ServiceError,
    gateway::OutboundMessage,
    services::{identity, messages, notify},
    state::{
        ReplyCallback, SharedState,
        join_code::parse_join_code,
        session::{ChatId, Player, User, UserId, UserStatus},
    },
};

/// Handler body: receives the state, the resolved user and the chat the command came from.
pub type CommandFn = Arc<
    dyn Fn(SharedState, User, ChatId) -> BoxFuture<'static, Result<(), ServiceError>>
        + Send
        + Sync,
>;

/// Verdict of a middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Continue with the next middleware or the handler.
    Proceed,
    /// Silently stop; the command is not executed and nothing is reported.
    Drop,
}

/// Pre-condition evaluated before a command runs.
pub type Middleware = fn(&User) -> Result<Gate, ServiceError>;

/// Command body plus the middleware guarding it.
pub struct CommandHandler {
    handler: CommandFn,
    middleware: Vec<Middleware>,
}

impl CommandHandler {
    /// Wrap a handler without middleware.
    pub fn from_fn<F>(handler: F) -> Self
    where
        F: Fn(SharedState, User, ChatId) -> BoxFuture<'static, Result<(), ServiceError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Arc::new(handler),
            middleware: Vec::new(),
        }
    }

    /// Append a middleware; middleware run in insertion order.
    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Run the middleware chain, then the handler unless a middleware dropped the command.
    pub async fn execute(
        &self,
        state: SharedState,
        user: User,
        chat_id: ChatId,
    ) -> Result<Gate, ServiceError> {
        for middleware in &self.middleware {
            if middleware(&user)? == Gate::Drop {
                debug!(user_id = %user.id, "command dropped by middleware");
                return Ok(Gate::Drop);
            }
        }

        (self.handler)(state, user, chat_id).await?;
        Ok(Gate::Proceed)
    }
}

/// Drop every command of banned users.
pub fn is_active(user: &User) -> Result<Gate, ServiceError> {
    Ok(if user.is_active() {
        Gate::Proceed
    } else {
        Gate::Drop
    })
}

/// Drop the command unless the user is an administrator.
pub fn is_admin(user: &User) -> Result<Gate, ServiceError> {
    Ok(if user.admin { Gate::Proceed } else { Gate::Drop })
}

fn handler<F, Fut>(body: F) -> CommandHandler
where
    F: Fn(SharedState, User, ChatId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
{
    CommandHandler::from_fn(move |state, user, chat_id| Box::pin(body(state, user, chat_id)))
}

/// Populate the command table. Called once at startup, before any event is consumed.
pub async fn register_commands(state: &SharedState) {
    let registry = state.registry();
    let table = [
        (messages::CMD_START, handler(start)),
        (messages::CMD_FEEDBACK, handler(feedback)),
        (messages::CMD_RULES, handler(rules)),
        (messages::CMD_PROFILE, handler(profile_lookup)),
        (messages::PROFILE_BUTTON, handler(own_profile)),
        (messages::CREATE_BUTTON, handler(create)),
        (messages::JOIN_BUTTON, handler(join)),
        (messages::LEAVE_BUTTON, handler(leave)),
        (messages::RULES_BUTTON, handler(rules)),
        (messages::CMD_ADD_PLAYER, handler(add_offline_player)),
    ];
    for (text, command) in table {
        registry
            .register_command(text, command.with_middleware(is_active))
            .await;
    }
    registry
        .register_command(messages::CMD_BAN, handler(ban).with_middleware(is_admin))
        .await;

    debug!(
        commands = registry.command_names().await.len(),
        "command table registered"
    );
}

/// Route the next free-text message of `user` to `reply`.
///
/// The callback holds a weak reference to the state; replies after teardown fail with
/// [`ServiceError::StateGone`].
async fn expect_reply<F, Fut>(state: &SharedState, user: UserId, reply: F)
where
    F: Fn(SharedState, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
{
    let weak = Arc::downgrade(state);
    let callback: ReplyCallback = Arc::new(move |text| match weak.upgrade() {
        Some(state) => Box::pin(reply(state, text)),
        None => Box::pin(async { Err(ServiceError::StateGone) }),
    });
    state
        .registry()
        .register_one_shot_callback(user, callback)
        .await;
}

/// Tell the user why a reply was refused and keep waiting for another one.
async fn refuse(state: &SharedState, chat_id: ChatId, text: &str) -> Result<(), ServiceError> {
    notify(state, OutboundMessage::new(chat_id, text), "refuse reply").await?;
    Err(ServiceError::Validation(text.to_owned()))
}

fn normalize_username(text: &str) -> String {
    text.trim().trim_start_matches('@').to_owned()
}

async fn start(state: SharedState, user: User, chat_id: ChatId) -> Result<(), ServiceError> {
    let message = OutboundMessage::new(chat_id, messages::greeting(&user))
        .with_keyboard(messages::main_keyboard());
    notify(&state, message, "send greeting").await
}

async fn rules(state: SharedState, _user: User, chat_id: ChatId) -> Result<(), ServiceError> {
    notify(&state, OutboundMessage::new(chat_id, messages::RULES), "send rules").await
}

async fn feedback(state: SharedState, user: User, chat_id: ChatId) -> Result<(), ServiceError> {
    let user_id = user.id;
    expect_reply(&state, user_id, move |state, text| {
        deliver_feedback(state, user_id, chat_id, text)
    })
    .await;
    notify(
        &state,
        OutboundMessage::new(chat_id, messages::FEEDBACK_PROMPT),
        "prompt feedback",
    )
    .await
}

async fn deliver_feedback(
    state: SharedState,
    user_id: UserId,
    chat_id: ChatId,
    text: String,
) -> Result<(), ServiceError> {
    let review = text.trim();
    if review.is_empty() {
        return refuse(&state, chat_id, messages::FEEDBACK_PROMPT).await;
    }
    state.registry().clear_one_shot_callback(user_id).await;

    let admin = &state.config().admin;
    let recipient = if admin.is_empty() {
        None
    } else {
        state
            .stores()
            .users
            .find_by_username(admin.clone())
            .await
            .map_err(ServiceError::storage("find admin"))?
    };
    match recipient {
        // private chats share the id of their user
        Some(admin) => {
            notify(
                &state,
                OutboundMessage::new(admin.id.0, messages::feedback_for_admin(review)),
                "forward feedback",
            )
            .await?
        }
        None => info!(review, "feedback received, no admin to forward it to"),
    }

    notify(
        &state,
        OutboundMessage::new(chat_id, messages::FEEDBACK_THANKS)
            .with_keyboard(messages::main_keyboard()),
        "thank for feedback",
    )
    .await
}

async fn own_profile(state: SharedState, user: User, chat_id: ChatId) -> Result<(), ServiceError> {
    notify(
        &state,
        OutboundMessage::new(chat_id, messages::profile(&user)),
        "send profile",
    )
    .await
}

async fn profile_lookup(
    state: SharedState,
    user: User,
    chat_id: ChatId,
) -> Result<(), ServiceError> {
    let user_id = user.id;
    expect_reply(&state, user_id, move |state, text| {
        show_profile(state, user_id, chat_id, text)
    })
    .await;
    notify(
        &state,
        OutboundMessage::new(chat_id, messages::PROFILE_PROMPT),
        "prompt profile",
    )
    .await
}

async fn show_profile(
    state: SharedState,
    user_id: UserId,
    chat_id: ChatId,
    text: String,
) -> Result<(), ServiceError> {
    let username = normalize_username(&text);
    let found = state
        .stores()
        .users
        .find_by_username(username)
        .await
        .map_err(ServiceError::storage("find user"))?;
    let Some(entity) = found else {
        return refuse(&state, chat_id, messages::USER_NOT_FOUND).await;
    };
    state.registry().clear_one_shot_callback(user_id).await;

    let target = identity::with_rating(&state, User::from(entity)).await?;
    notify(
        &state,
        OutboundMessage::new(chat_id, messages::profile(&target)),
        "send profile",
    )
    .await
}

/// Leave whatever the user is part of: their wizard, their match and any pending prompt.
async fn leave_sessions(state: &SharedState, user_id: UserId) -> Result<(), ServiceError> {
    if let Some(session) = state.registry().match_by_user(user_id).await {
        session
            .remove_player(user_id)
            .map_err(ServiceError::engine("remove player"))?;
    }
    state.registry().unregister_user_sessions(user_id).await;
    Ok(())
}

async fn leave(state: SharedState, user: User, chat_id: ChatId) -> Result<(), ServiceError> {
    leave_sessions(&state, user.id).await?;
    notify(
        &state,
        OutboundMessage::new(chat_id, messages::LEFT_SESSIONS)
            .with_keyboard(messages::main_keyboard()),
        "confirm leave",
    )
    .await
}

async fn create(state: SharedState, user: User, chat_id: ChatId) -> Result<(), ServiceError> {
    leave_sessions(&state, user.id).await?;

    let wizard = state
        .engines()
        .wizards
        .start(&user, chat_id, state.hooks());
    state
        .registry()
        .register_wizard(user.id, wizard.clone())
        .await;
    wizard.run(state.session_scope().child_token());
    debug!(user_id = %user.id, "wizard started");
    Ok(())
}

async fn join(state: SharedState, user: User, chat_id: ChatId) -> Result<(), ServiceError> {
    leave_sessions(&state, user.id).await?;
    let user_id = user.id;
    expect_reply(&state, user_id, move |state, text| {
        join_by_code(state, user.clone(), chat_id, text)
    })
    .await;
    notify(
        &state,
        OutboundMessage::new(chat_id, messages::JOIN_CODE_PROMPT)
            .with_keyboard(messages::leave_keyboard()),
        "prompt join code",
    )
    .await
}

async fn join_by_code(
    state: SharedState,
    user: User,
    chat_id: ChatId,
    text: String,
) -> Result<(), ServiceError> {
    let Some(code) = parse_join_code(&text) else {
        return refuse(&state, chat_id, messages::JOIN_CODE_INVALID).await;
    };
    let Some(session) = state.registry().match_by_code(code).await else {
        return refuse(&state, chat_id, messages::MATCH_NOT_FOUND).await;
    };

    match session.add_player(Player::online(user.id, user.display_name())) {
        Ok(()) => {}
        Err(EngineError::Rejected(reason)) => return refuse(&state, chat_id, &reason).await,
        Err(err) => return Err(ServiceError::engine("add player")(err)),
    }
    state.registry().clear_one_shot_callback(user.id).await;

    if !state.registry().register_match_member(user.id, code).await {
        // the match ended between lookup and registration
        return refuse(&state, chat_id, messages::MATCH_NOT_FOUND).await;
    }
    info!(user_id = %user.id, %code, "player joined match");

    notify(
        &state,
        OutboundMessage::new(chat_id, messages::JOINED_MATCH)
            .with_keyboard(messages::leave_keyboard()),
        "confirm join",
    )
    .await
}

async fn add_offline_player(
    state: SharedState,
    user: User,
    chat_id: ChatId,
) -> Result<(), ServiceError> {
    if state.registry().match_by_user(user.id).await.is_none() {
        return notify(
            &state,
            OutboundMessage::new(chat_id, messages::JOIN_MATCH_FIRST),
            "refuse offline player",
        )
        .await;
    }

    let user_id = user.id;
    expect_reply(&state, user_id, move |state, text| {
        register_offline_player(state, user_id, chat_id, text)
    })
    .await;
    notify(
        &state,
        OutboundMessage::new(chat_id, messages::OFFLINE_PLAYER_PROMPT),
        "prompt offline player",
    )
    .await
}

async fn register_offline_player(
    state: SharedState,
    user_id: UserId,
    chat_id: ChatId,
    text: String,
) -> Result<(), ServiceError> {
    let name = text.trim();
    if name.is_empty() {
        return refuse(&state, chat_id, messages::OFFLINE_PLAYER_PROMPT).await;
    }
    state.registry().clear_one_shot_callback(user_id).await;

    let Some(session) = state.registry().match_by_user(user_id).await else {
        return notify(
            &state,
            OutboundMessage::new(chat_id, messages::JOIN_MATCH_FIRST),
            "refuse offline player",
        )
        .await;
    };

    session
        .add_player(Player::offline(offline_player_id(), name))
        .map_err(ServiceError::engine("add offline player"))?;
    debug!(author_id = %user_id, code = %session.code(), "offline player added");

    notify(
        &state,
        OutboundMessage::new(chat_id, messages::OFFLINE_PLAYER_ADDED),
        "confirm offline player",
    )
    .await
}

/// Synthetic identity for a player without an account. Always negative, so it never
/// collides with a gateway user.
fn offline_player_id() -> UserId {
    UserId(-1 - i64::from(rand::random::<u32>()))
}

async fn ban(state: SharedState, user: User, chat_id: ChatId) -> Result<(), ServiceError> {
    let admin_id = user.id;
    expect_reply(&state, admin_id, move |state, text| {
        ban_user(state, admin_id, chat_id, text)
    })
    .await;
    notify(
        &state,
        OutboundMessage::new(chat_id, messages::BAN_PROMPT),
        "prompt ban",
    )
    .await
}

async fn ban_user(
    state: SharedState,
    admin_id: UserId,
    chat_id: ChatId,
    text: String,
) -> Result<(), ServiceError> {
    let username = normalize_username(&text);
    let found = state
        .stores()
        .users
        .find_by_username(username.clone())
        .await
        .map_err(ServiceError::storage("find user"))?;
    let Some(target) = found else {
        return refuse(&state, chat_id, messages::USER_NOT_FOUND).await;
    };
    state.registry().clear_one_shot_callback(admin_id).await;

    let target_id = target.id;
    state
        .stores()
        .users
        .store(UserEntity {
            status: UserStatus::Banned,
            ..target
        })
        .await
        .map_err(ServiceError::storage("ban user"))?;
    if let Err(err) = leave_sessions(&state, target_id).await {
        warn!(error = %err, user_id = %target_id, "banned user could not leave their match");
        state.registry().unregister_user_sessions(target_id).await;
    }
    info!(%admin_id, user_id = %target_id, "user banned");

    notify(
        &state,
        OutboundMessage::new(chat_id, messages::user_banned(&username)),
        "confirm ban",
    )
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        dao::store::UserStore,
        engine::MatchHandle,
        state::session::JoinCode,
        testing::{StubMatch, sample_user, test_state},
    };

    fn counting(calls: Arc<AtomicUsize>) -> CommandHandler {
        CommandHandler::from_fn(move |_, _, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        })
    }

    fn refuse_everyone(_: &User) -> Result<Gate, ServiceError> {
        Err(ServiceError::Protocol("middleware failure".into()))
    }

    #[tokio::test]
    async fn banned_user_is_dropped_silently() {
        let harness = test_state();
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting(calls.clone()).with_middleware(is_active);
        let mut user = sample_user(UserId(1));
        user.status = UserStatus::Banned;

        let gate = command.execute(harness.state.clone(), user, 1).await.unwrap();

        assert_eq!(gate, Gate::Drop);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn passing_middleware_runs_the_handler() {
        let harness = test_state();
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting(calls.clone())
            .with_middleware(is_active)
            .with_middleware(is_admin);
        let mut user = sample_user(UserId(2));
        user.admin = true;

        let gate = command.execute(harness.state.clone(), user, 2).await.unwrap();

        assert_eq!(gate, Gate::Proceed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn middleware_error_aborts_the_command() {
        let harness = test_state();
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting(calls.clone()).with_middleware(refuse_everyone);

        let result = command
            .execute(harness.state.clone(), sample_user(UserId(3)), 3)
            .await;

        assert!(matches!(result, Err(ServiceError::Protocol(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn table_contains_every_command() {
        let harness = test_state();
        register_commands(&harness.state).await;

        let names = harness.state.registry().command_names().await;
        assert_eq!(names.len(), 11);
        assert_eq!(names.first().map(String::as_str), Some(messages::CMD_START));
        assert!(names.iter().any(|name| name == messages::CMD_BAN));
    }

    #[tokio::test]
    async fn ban_is_admin_only() {
        let harness = test_state();
        register_commands(&harness.state).await;
        let ban = harness
            .state
            .registry()
            .command(messages::CMD_BAN)
            .await
            .unwrap();

        let gate = ban
            .execute(harness.state.clone(), sample_user(UserId(4)), 4)
            .await
            .unwrap();

        assert_eq!(gate, Gate::Drop);
        assert!(harness.state.registry().one_shot_callback(UserId(4)).await.is_none());
    }

    #[tokio::test]
    async fn join_keeps_prompting_until_a_match_is_found() {
        let harness = test_state();
        let code = JoinCode(424_242);
        let session = StubMatch::new(code);
        harness
            .state
            .registry()
            .register_match(code, session.clone())
            .await;
        let user = sample_user(UserId(5));

        join(harness.state.clone(), user.clone(), 5).await.unwrap();
        let callback = harness
            .state
            .registry()
            .one_shot_callback(user.id)
            .await
            .unwrap();

        let refused = callback("not a code".into()).await.unwrap_err();
        assert!(refused.is_validation());
        assert!(harness.state.registry().one_shot_callback(user.id).await.is_some());

        callback(code.to_string()).await.unwrap();
        assert!(harness.state.registry().one_shot_callback(user.id).await.is_none());
        assert_eq!(
            harness.state.registry().match_by_user(user.id).await.map(|m| m.code()),
            Some(code)
        );
        assert_eq!(session.snapshot().players.len(), 1);
    }

    #[tokio::test]
    async fn leave_removes_the_player_and_every_route() {
        let harness = test_state();
        let code = JoinCode(515_151);
        let session = StubMatch::new(code);
        let user = sample_user(UserId(6));
        session.add_player(Player::online(user.id, "Dana")).unwrap();
        harness
            .state
            .registry()
            .register_match(code, session.clone())
            .await;
        harness
            .state
            .registry()
            .register_match_member(user.id, code)
            .await;

        leave(harness.state.clone(), user.clone(), 6).await.unwrap();

        assert!(harness.state.registry().match_by_user(user.id).await.is_none());
        assert!(session.snapshot().players.is_empty());
        assert!(harness.gateway.texts_to(6).contains(&messages::LEFT_SESSIONS.to_owned()));
    }

    #[tokio::test]
    async fn leaving_closes_the_wizard_for_good() {
        let harness = test_state();
        let user = sample_user(UserId(12));

        for _ in 0..2 {
            create(harness.state.clone(), user.clone(), 12).await.unwrap();
            leave(harness.state.clone(), user.clone(), 12).await.unwrap();
        }

        let started = harness.wizards.started();
        assert_eq!(started.len(), 2);
        assert!(started.iter().all(|wizard| wizard.is_closed()));
        assert_eq!(harness.state.registry().session_counts().await.wizards, 0);
    }

    #[tokio::test]
    async fn creating_again_closes_the_previous_wizard() {
        let harness = test_state();
        let user = sample_user(UserId(13));

        create(harness.state.clone(), user.clone(), 13).await.unwrap();
        create(harness.state.clone(), user.clone(), 13).await.unwrap();

        let started = harness.wizards.started();
        assert!(started[0].is_closed());
        assert!(!started[1].is_closed());
        assert_eq!(harness.state.registry().session_counts().await.wizards, 1);
    }

    #[tokio::test]
    async fn offline_player_gets_a_negative_identity() {
        let harness = test_state();
        let code = JoinCode(616_161);
        let session = StubMatch::new(code);
        harness
            .state
            .registry()
            .register_match(code, session.clone())
            .await;
        harness
            .state
            .registry()
            .register_match_member(UserId(7), code)
            .await;

        add_offline_player(harness.state.clone(), sample_user(UserId(7)), 7)
            .await
            .unwrap();
        let callback = harness
            .state
            .registry()
            .one_shot_callback(UserId(7))
            .await
            .unwrap();
        callback("Grandma".into()).await.unwrap();

        let players = session.snapshot().players;
        assert_eq!(players.len(), 1);
        assert!(players[0].offline);
        assert!(players[0].user_id.0 < 0);
        assert_eq!(players[0].name, "Grandma");
    }

    #[tokio::test]
    async fn ban_flags_the_target_and_drops_their_sessions() {
        let harness = test_state();
        let target = sample_user(UserId(8));
        harness
            .store
            .store(UserEntity::from(target.clone()))
            .await
            .unwrap();
        harness
            .state
            .registry()
            .register_one_shot_callback(target.id, Arc::new(|_| Box::pin(async { Ok(()) })))
            .await;

        ban_user(harness.state.clone(), UserId(99), 99, format!("@{}", target.username))
            .await
            .unwrap();

        let stored = harness.store.fetch(target.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UserStatus::Banned);
        assert!(harness.state.registry().one_shot_callback(target.id).await.is_none());
    }
}
