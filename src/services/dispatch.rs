//! Inbound event routing and the worker pool draining the gateway stream.

use std::sync::Arc;

use tokio::{
    sync::{Mutex, mpsc},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::ServiceError,
    gateway::{ChatKind, EventPayload, InboundEvent, OutboundMessage},
    services::{identity, messages, notify},
    state::SharedState,
};

/// Where an event ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Exact-text command table.
    Command,
    /// Pending one-shot callback of the sender.
    Callback,
    /// Sender's wizard.
    Wizard,
    /// Sender's match.
    Match,
    /// Nothing claimed the event (or it came from a group chat).
    Ignored,
}

/// Resolve the sender of `event` and hand the event to the first route that claims it.
///
/// Text messages try the command table, the pending callback, the wizard and the match
/// in that order. Button presses only reach wizards and matches.
pub async fn dispatch(state: &SharedState, event: InboundEvent) -> Result<Route, ServiceError> {
    let Some(sender) = event.sender() else {
        return Err(ServiceError::Protocol(format!(
            "update {} has no sender",
            event.update_id
        )));
    };
    let user = identity::resolve_user(state, sender).await?;
    let registry = state.registry();

    match &event.payload {
        EventPayload::Message(message) => {
            if message.chat.kind != ChatKind::Private {
                notify(
                    state,
                    OutboundMessage::new(message.chat.id, messages::CHAT_NOT_ALLOWED),
                    "reject group chat",
                )
                .await?;
                return Ok(Route::Ignored);
            }
            info!(user_id = %user.id, text = %message.text, "message received");

            if let Some(command) = registry.command(&message.text).await {
                command
                    .execute(state.clone(), user, message.chat.id)
                    .await?;
                return Ok(Route::Command);
            }

            if let Some(callback) = registry.one_shot_callback(user.id).await {
                callback(message.text.clone()).await?;
                return Ok(Route::Callback);
            }
        }
        EventPayload::Button(press) => {
            info!(user_id = %user.id, data = %press.data, "button pressed");
        }
        EventPayload::Unsupported => {
            return Err(ServiceError::Protocol(format!(
                "update {} carries neither a message nor a button press",
                event.update_id
            )));
        }
    }

    if let Some(wizard) = registry.wizard_by_user(user.id).await {
        wizard
            .execute(event)
            .await
            .map_err(ServiceError::engine("execute wizard"))?;
        return Ok(Route::Wizard);
    }

    if let Some(session) = registry.match_by_user(user.id).await {
        session
            .execute(user.id, event)
            .await
            .map_err(ServiceError::engine("execute match"))?;
        return Ok(Route::Match);
    }

    debug!(user_id = %user.id, "event not claimed by any route");
    Ok(Route::Ignored)
}

/// Log a routing failure at the level it deserves.
fn report(err: &ServiceError, update_id: i64) {
    if err.is_validation() {
        debug!(update_id, error = %err, "input rejected");
    } else if matches!(err, ServiceError::Protocol(_)) {
        warn!(update_id, error = %err, "malformed update dropped");
    } else {
        error!(update_id, error = %err, "failed to handle update");
    }
}

/// Run `workers` tasks sharing `events` until the stream closes or the run scope is cancelled.
///
/// Events are taken off the stream in gateway order; each worker handles one event at a
/// time, so events of different users are processed concurrently.
pub async fn run_workers(state: SharedState, events: mpsc::Receiver<InboundEvent>, workers: usize) {
    let events = Arc::new(Mutex::new(events));
    let mut pool = JoinSet::new();

    for worker in 0..workers.max(1) {
        let state = state.clone();
        let events = events.clone();
        pool.spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = state.run_scope().cancelled() => None,
                    event = async { events.lock().await.recv().await } => event,
                };
                let Some(event) = next else {
                    break;
                };

                let update_id = event.update_id;
                if let Err(err) = dispatch(&state, event).await {
                    report(&err, update_id);
                }
            }
            debug!(worker, "event worker stopped");
        });
    }

    while let Some(joined) = pool.join_next().await {
        if let Err(err) = joined {
            error!(error = %err, "event worker panicked");
        }
    }
    info!("event workers stopped");
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        engine::WizardHandle,
        gateway::{Chat, InboundEvent},
        services::commands::register_commands,
        state::{
            ReplyCallback,
            session::{JoinCode, UserId},
        },
        testing::{StubMatch, StubWizard, sample_sender, test_state},
    };

    fn private(id: i64) -> Chat {
        Chat {
            id,
            kind: ChatKind::Private,
        }
    }

    fn text(user: i64, body: &str) -> InboundEvent {
        InboundEvent::text(1, private(user), sample_sender(UserId(user), "player"), body)
    }

    fn recording_callback(seen: Arc<std::sync::Mutex<Vec<String>>>) -> ReplyCallback {
        Arc::new(move |reply| {
            seen.lock().unwrap().push(reply);
            Box::pin(async { Ok(()) })
        })
    }

    #[tokio::test]
    async fn group_chats_are_rejected_with_a_notice() {
        let harness = test_state();
        let event = InboundEvent::text(
            1,
            Chat {
                id: -100,
                kind: ChatKind::Group,
            },
            sample_sender(UserId(1), "player"),
            "/start",
        );

        let route = dispatch(&harness.state, event).await.unwrap();

        assert_eq!(route, Route::Ignored);
        assert_eq!(
            harness.gateway.texts_to(-100),
            vec![messages::CHAT_NOT_ALLOWED.to_owned()]
        );
    }

    #[tokio::test]
    async fn commands_win_over_every_other_route() {
        let harness = test_state();
        register_commands(&harness.state).await;
        let user = UserId(2);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        harness
            .state
            .registry()
            .register_one_shot_callback(user, recording_callback(seen.clone()))
            .await;

        let route = dispatch(&harness.state, text(2, messages::CMD_RULES))
            .await
            .unwrap();

        assert_eq!(route, Route::Command);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn callback_wins_over_sessions() {
        let harness = test_state();
        let user = UserId(3);
        let wizard = StubWizard::new(user);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let registry = harness.state.registry();
        registry
            .register_wizard(user, wizard.clone() as Arc<dyn WizardHandle>)
            .await;
        registry
            .register_one_shot_callback(user, recording_callback(seen.clone()))
            .await;

        let route = dispatch(&harness.state, text(3, "hello")).await.unwrap();

        assert_eq!(route, Route::Callback);
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_owned()]);
        assert!(wizard.executed().is_empty());
    }

    #[tokio::test]
    async fn wizard_wins_over_match() {
        let harness = test_state();
        let user = UserId(4);
        let code = JoinCode(404_404);
        let wizard = StubWizard::new(user);
        let session = StubMatch::new(code);
        let registry = harness.state.registry();
        registry
            .register_wizard(user, wizard.clone() as Arc<dyn WizardHandle>)
            .await;
        registry.register_match(code, session.clone()).await;
        registry.register_match_member(user, code).await;

        let route = dispatch(&harness.state, text(4, "5")).await.unwrap();
        assert_eq!(route, Route::Wizard);
        assert_eq!(wizard.executed(), vec!["5".to_owned()]);

        registry.unregister_wizard(user).await;
        let route = dispatch(&harness.state, text(4, "cat")).await.unwrap();
        assert_eq!(route, Route::Match);
        assert_eq!(session.executed(), vec![(user, "cat".to_owned())]);
    }

    #[tokio::test]
    async fn buttons_skip_commands_and_callbacks() {
        let harness = test_state();
        register_commands(&harness.state).await;
        let user = UserId(5);
        let code = JoinCode(505_505);
        let session = StubMatch::new(code);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let registry = harness.state.registry();
        registry.register_match(code, session.clone()).await;
        registry.register_match_member(user, code).await;
        registry
            .register_one_shot_callback(user, recording_callback(seen.clone()))
            .await;

        let event = InboundEvent::button(9, 5, sample_sender(user, "player"), messages::CMD_RULES);
        let route = dispatch(&harness.state, event).await.unwrap();

        assert_eq!(route, Route::Match);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(session.executed().len(), 1);
    }

    #[tokio::test]
    async fn unclaimed_text_is_ignored() {
        let harness = test_state();
        let route = dispatch(&harness.state, text(6, "anyone?")).await.unwrap();
        assert_eq!(route, Route::Ignored);
    }

    #[tokio::test]
    async fn events_without_sender_are_protocol_errors() {
        let harness = test_state();
        let event = InboundEvent {
            update_id: 3,
            payload: EventPayload::Unsupported,
        };

        let err = dispatch(&harness.state, event).await.unwrap_err();
        assert!(matches!(err, ServiceError::Protocol(_)));
        assert!(!err.is_validation());
    }

    #[tokio::test]
    async fn engine_validation_errors_are_marked_as_validation() {
        let harness = test_state();
        let user = UserId(7);
        let code = JoinCode(707_707);
        let session = StubMatch::new(code);
        session.reject_input_with_validation();
        harness.state.registry().register_match(code, session).await;
        harness.state.registry().register_match_member(user, code).await;

        let err = dispatch(&harness.state, text(7, "???")).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn concurrent_routing_keeps_one_entry_per_match() {
        const MATCHES: i64 = 16;
        const PLAYERS: i64 = 4;

        let harness = test_state();
        let registry = harness.state.registry();
        let mut sessions = Vec::new();
        for index in 0..MATCHES {
            let code = JoinCode(300_000 + index);
            let session = StubMatch::new(code);
            registry.register_match(code, session.clone()).await;
            for player in 0..PLAYERS {
                registry
                    .register_match_member(UserId(index * 100 + player + 1), code)
                    .await;
            }
            sessions.push(session);
        }

        let (tx, rx) = mpsc::channel(256);
        let workers = tokio::spawn(run_workers(harness.state.clone(), rx, 8));
        for index in 0..MATCHES {
            for player in 0..PLAYERS {
                tx.send(text(index * 100 + player + 1, "word")).await.unwrap();
            }
        }
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), workers)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            harness.state.registry().session_counts().await.matches,
            MATCHES as usize
        );
        for session in sessions {
            assert_eq!(session.executed().len(), PLAYERS as usize);
        }
    }

    #[tokio::test]
    async fn workers_stop_when_the_run_scope_is_cancelled() {
        let harness = test_state();
        let (_tx, rx) = mpsc::channel(8);
        let workers = tokio::spawn(run_workers(harness.state.clone(), rx, 3));

        harness.state.run_scope().cancel();

        tokio::time::timeout(Duration::from_secs(1), workers)
            .await
            .unwrap()
            .unwrap();
    }
}
