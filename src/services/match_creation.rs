//! Completed wizard to running match: unique join code, configuration, registration.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    config::BotConfig,
    engine::MatchHandle,
    error::ServiceError,
    gateway::OutboundMessage,
    services::{messages, notify},
    state::{
        SharedState,
        session::{Choice, JoinCode, MatchConfig, Player, WizardSession},
    },
};

fn selected(choices: &[Choice]) -> Vec<String> {
    choices
        .iter()
        .filter(|choice| choice.selected)
        .map(|choice| choice.text.clone())
        .collect()
}

/// Freeze the wizard's answers into the configuration of the match registered under `code`.
///
/// Only the selected categories and letters are kept. The bonus task catalog is copied
/// when the author enabled bonus tasks, so later catalog changes never reach the match.
pub fn build_match_config(config: &BotConfig, session: &WizardSession, code: JoinCode) -> MatchConfig {
    MatchConfig {
        code,
        author_id: session.author_id,
        author_name: session.author_name.clone(),
        chat_id: session.chat_id,
        rounds_num: session.rounds_num,
        round_time: session.round_time,
        timeout: config.playing_timeout,
        categories: selected(&session.categories),
        letters: selected(&session.letters),
        bonus_tasks: if session.bloops {
            config.bonus_tasks.clone()
        } else {
            Vec::new()
        },
        vote: session.vote,
    }
}

/// Turn the completed wizard of `session.author_id` into a running match.
///
/// The wizard is deregistered whatever happens next. The author joins the new match as
/// its first player. The match stays registered and running even when the author cannot
/// be notified; that failure is still returned.
pub async fn on_wizard_completed(
    state: &SharedState,
    session: WizardSession,
) -> Result<JoinCode, ServiceError> {
    state.registry().unregister_wizard(session.author_id).await;

    let engine = state.engines().matches.clone();
    let listener = state.hooks();
    let created: Arc<dyn MatchHandle> = state
        .registry()
        .register_new_match(state.engines().codes.as_ref(), |code| {
            engine.create(build_match_config(state.config(), &session, code), listener)
        })
        .await;
    let code = created.code();
    created
        .add_player(Player::online(session.author_id, session.author_name.clone()))
        .map_err(ServiceError::engine("add author"))?;
    state
        .registry()
        .register_match_member(session.author_id, code)
        .await;
    created.run(state.session_scope().child_token());
    info!(%code, author_id = %session.author_id, "match created");

    notify(
        state,
        OutboundMessage::new(session.chat_id, messages::MATCH_CREATED),
        "announce match",
    )
    .await?;
    notify(
        state,
        OutboundMessage::new(session.chat_id, code.to_string())
            .with_keyboard(messages::main_keyboard()),
        "send join code",
    )
    .await?;

    Ok(code)
}

/// Forget an abandoned wizard. Nothing else is created or persisted.
pub async fn on_wizard_abandoned(state: &SharedState, session: WizardSession) {
    if state.registry().unregister_wizard(session.author_id).await {
        debug!(author_id = %session.author_id, "wizard abandoned");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        engine::WizardHandle,
        state::session::{BonusTask, UserId},
        testing::{ScriptedCodes, StubWizard, test_state, test_state_with_codes},
    };

    fn wizard_session(author: UserId, bloops: bool) -> WizardSession {
        WizardSession {
            author_id: author,
            author_name: "Alice".into(),
            chat_id: author.0,
            rounds_num: 3,
            round_time: Duration::from_secs(45),
            categories: vec![Choice::selected("Animals"), Choice::deselected("Cities")],
            letters: vec![
                Choice::deselected("A"),
                Choice::selected("B"),
                Choice::selected("C"),
            ],
            vote: true,
            bloops,
        }
    }

    #[test]
    fn config_keeps_selected_entries_only() {
        let config = BotConfig::for_tests();
        let built = build_match_config(&config, &wizard_session(UserId(1), false), JoinCode(123_456));

        assert_eq!(built.code, JoinCode(123_456));
        assert_eq!(built.categories, vec!["Animals"]);
        assert_eq!(built.letters, vec!["B", "C"]);
        assert_eq!(built.round_time, Duration::from_secs(45));
        assert_eq!(built.timeout, config.playing_timeout);
        assert!(built.bonus_tasks.is_empty());
    }

    #[test]
    fn bonus_catalog_is_copied_when_enabled() {
        let mut config = BotConfig::for_tests();
        config.bonus_tasks = vec![BonusTask {
            name: "Opera".into(),
            task: "Sing your answers".into(),
            points: 3,
        }];

        let built = build_match_config(&config, &wizard_session(UserId(1), true), JoinCode(123_456));
        config.bonus_tasks.clear();

        assert_eq!(built.bonus_tasks.len(), 1);
        assert_eq!(built.bonus_tasks[0].name, "Opera");
    }

    #[tokio::test]
    async fn completion_registers_and_runs_the_match() {
        let harness = test_state();
        let author = UserId(21);
        harness
            .state
            .registry()
            .register_wizard(author, StubWizard::new(author) as Arc<dyn WizardHandle>)
            .await;

        let code = on_wizard_completed(&harness.state, wizard_session(author, false))
            .await
            .unwrap();

        let registry = harness.state.registry();
        assert!(registry.wizard_by_user(author).await.is_none());
        assert_eq!(registry.match_by_code(code).await.map(|m| m.code()), Some(code));
        let created = harness.matches.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].runs(), 1);
        assert_eq!(
            harness.gateway.texts_to(author.0).last(),
            Some(&code.to_string())
        );
    }

    #[tokio::test]
    async fn author_plays_in_the_match_they_created() {
        let harness = test_state();
        let author = UserId(25);

        let code = on_wizard_completed(&harness.state, wizard_session(author, false))
            .await
            .unwrap();

        let joined = harness.state.registry().match_by_user(author).await;
        assert_eq!(joined.map(|m| m.code()), Some(code));
        let players = harness.matches.created()[0].snapshot().players;
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].user_id, author);
        assert!(!players[0].offline);
        assert_eq!(players[0].name, "Alice");
    }

    #[tokio::test]
    async fn colliding_code_is_redrawn() {
        let taken = JoinCode(111_111);
        let fresh = JoinCode(222_222);
        let harness = test_state_with_codes(ScriptedCodes::new([taken, taken, fresh]));
        harness
            .state
            .registry()
            .register_match(taken, crate::testing::StubMatch::new(taken))
            .await;

        let code = on_wizard_completed(&harness.state, wizard_session(UserId(22), false))
            .await
            .unwrap();

        assert_eq!(code, fresh);
        assert_eq!(harness.state.registry().session_counts().await.matches, 2);
    }

    #[tokio::test]
    async fn notification_failure_keeps_the_match() {
        let harness = test_state();
        harness.gateway.fail_sends(true);

        let err = on_wizard_completed(&harness.state, wizard_session(UserId(23), false))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Gateway { .. }));
        assert_eq!(harness.state.registry().session_counts().await.matches, 1);
    }

    #[tokio::test]
    async fn abandon_only_drops_the_wizard() {
        let harness = test_state();
        let author = UserId(24);
        harness
            .state
            .registry()
            .register_wizard(author, StubWizard::new(author) as Arc<dyn WizardHandle>)
            .await;

        on_wizard_abandoned(&harness.state, wizard_session(author, false)).await;

        let counts = harness.state.registry().session_counts().await;
        assert_eq!((counts.wizards, counts.matches), (0, 0));
        assert!(harness.matches.created().is_empty());
    }
}
