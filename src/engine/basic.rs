//! Minimal engines driving a word round: one turn per player per round, a point per word.
//!
//! The wizard is text driven: the author toggles options by sending their names and
//! finishes with `done`. The match waits in `waiting` until the author sends `start`,
//! plays in `playing`, and reports through its listener once `finished`.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::{Instant, SystemTime},
};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::WizardDefaults,
    engine::{
        EngineError, EngineResult, MatchEngine, MatchHandle, MatchListener, WizardEngine,
        WizardHandle, WizardListener,
    },
    gateway::{ChatGateway, InboundEvent, OutboundMessage},
    state::session::{
        BonusTask, ChatId, Choice, JoinCode, MachineState, MatchConfig, MatchSnapshot, Player,
        Rate, User, UserId, WizardSession,
    },
};

/// Players are joining.
pub const WAITING: &str = "waiting";
/// Turns are being played.
pub const PLAYING: &str = "playing";
/// Results are in.
pub const FINISHED: &str = "finished";

/// Sent to the author when their wizard is cut short by a shutdown.
pub const WIZARD_INTERRUPTED: &str =
    "💔 Sorry, the 🤖 bot is updating, please try again in a few minutes";
/// Sent to every player when their match is cut short by a shutdown.
pub const MATCH_INTERRUPTED: &str =
    "💔 Sorry, the 🤖 bot is updating, this round will restart in a few seconds!";

const MAX_ROUNDS: u32 = 10;
const CMD_DONE: &str = "done";
const CMD_CANCEL: &str = "cancel";
const CMD_VOTE: &str = "vote";
const CMD_BLOOPS: &str = "bloops";
const CMD_START: &str = "start";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Send every message, logging the ones the gateway refuses.
async fn deliver(gateway: &Arc<dyn ChatGateway>, outbox: Vec<OutboundMessage>) {
    for message in outbox {
        let chat_id = message.chat_id;
        if let Err(err) = gateway.send(message).await {
            warn!(error = %err, chat_id, "engine message not delivered");
        }
    }
}

/// Exactly-once latch shared by the event path and the cancellation watcher.
#[derive(Default)]
struct Settled {
    flag: AtomicBool,
    token: CancellationToken,
}

impl Settled {
    /// `true` for the first caller only.
    fn claim(&self) -> bool {
        let first = !self.flag.swap(true, Ordering::SeqCst);
        if first {
            self.token.cancel();
        }
        first
    }

    fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Factory for [`BasicWizard`] dialogues.
pub struct BasicWizardEngine {
    defaults: WizardDefaults,
    gateway: Arc<dyn ChatGateway>,
}

impl BasicWizardEngine {
    /// Wizards start from `defaults` and talk through `gateway`.
    pub fn new(defaults: WizardDefaults, gateway: Arc<dyn ChatGateway>) -> Self {
        Self { defaults, gateway }
    }
}

impl WizardEngine for BasicWizardEngine {
    fn start(
        &self,
        author: &User,
        chat_id: ChatId,
        listener: Arc<dyn WizardListener>,
    ) -> Arc<dyn WizardHandle> {
        let session = WizardSession {
            author_id: author.id,
            author_name: author.display_name().to_owned(),
            chat_id,
            rounds_num: self.defaults.rounds_num,
            round_time: self.defaults.round_time,
            categories: self.defaults.categories.iter().map(Choice::selected).collect(),
            letters: self.defaults.letters.iter().map(Choice::selected).collect(),
            vote: false,
            bloops: false,
        };

        Arc::new_cyclic(|me| BasicWizard {
            me: me.clone(),
            session: Mutex::new(session),
            listener,
            gateway: self.gateway.clone(),
            settled: Settled::default(),
        })
    }
}

/// Text-driven configuration dialogue.
pub struct BasicWizard {
    me: Weak<BasicWizard>,
    session: Mutex<WizardSession>,
    listener: Arc<dyn WizardListener>,
    gateway: Arc<dyn ChatGateway>,
    settled: Settled,
}

enum WizardStep {
    Continue,
    Complete(WizardSession),
    Abandon(WizardSession),
}

fn toggle(choices: &mut [Choice], text: &str) -> bool {
    match choices
        .iter_mut()
        .find(|choice| choice.text.eq_ignore_ascii_case(text))
    {
        Some(choice) => {
            choice.selected = !choice.selected;
            true
        }
        None => false,
    }
}

fn selected(choices: &[Choice]) -> String {
    choices
        .iter()
        .filter(|choice| choice.selected)
        .map(|choice| choice.text.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

impl BasicWizard {
    fn summary(session: &WizardSession) -> OutboundMessage {
        let text = format!(
            "⚙️ Rounds: {}\nCategories: {}\nLetters: {}\nVote: {}\nBloops: {}\n\n\
             Send a number to change the rounds, a category or a letter to toggle it, \
             `{CMD_VOTE}` or `{CMD_BLOOPS}` to switch them, `{CMD_DONE}` to create the game \
             or `{CMD_CANCEL}` to stop.",
            session.rounds_num,
            selected(&session.categories),
            selected(&session.letters),
            on_off(session.vote),
            on_off(session.bloops),
        );
        OutboundMessage::new(session.chat_id, text)
    }

    /// Apply one reply to the session. Validation failures carry the notice for the author.
    fn apply(&self, text: &str) -> Result<WizardStep, String> {
        let mut session = lock(&self.session);

        if text.eq_ignore_ascii_case(CMD_DONE) {
            let has_categories = session.categories.iter().any(|choice| choice.selected);
            let has_letters = session.letters.iter().any(|choice| choice.selected);
            if !has_categories || !has_letters {
                return Err("Keep at least one category and one letter".into());
            }
            return Ok(WizardStep::Complete(session.clone()));
        }
        if text.eq_ignore_ascii_case(CMD_CANCEL) {
            return Ok(WizardStep::Abandon(session.clone()));
        }

        if text.eq_ignore_ascii_case(CMD_VOTE) {
            session.vote = !session.vote;
        } else if text.eq_ignore_ascii_case(CMD_BLOOPS) {
            session.bloops = !session.bloops;
        } else if let Ok(rounds) = text.parse::<u32>() {
            if !(1..=MAX_ROUNDS).contains(&rounds) {
                return Err(format!(
                    "The number of rounds must be between 1 and {MAX_ROUNDS}"
                ));
            }
            session.rounds_num = rounds;
        } else if !toggle(&mut session.categories, text) && !toggle(&mut session.letters, text) {
            return Err("Unknown option".into());
        }
        Ok(WizardStep::Continue)
    }
}

impl WizardHandle for BasicWizard {
    fn author_id(&self) -> UserId {
        lock(&self.session).author_id
    }

    fn run(&self, cancel: CancellationToken) {
        let Some(me) = self.me.upgrade() else {
            return;
        };

        tokio::spawn(async move {
            let opening = Self::summary(&lock(&me.session));
            deliver(&me.gateway, vec![opening]).await;

            tokio::select! {
                _ = me.settled.token.cancelled() => {}
                _ = cancel.cancelled() => {
                    if me.settled.claim() {
                        let session = lock(&me.session).clone();
                        deliver(
                            &me.gateway,
                            vec![OutboundMessage::new(session.chat_id, WIZARD_INTERRUPTED)],
                        )
                        .await;
                        me.listener.abandoned(session).await;
                    }
                }
            }
        });
    }

    fn execute<'a>(&'a self, event: InboundEvent) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            if self.settled.is_set() {
                return Err(EngineError::Rejected("the wizard is already closed".into()));
            }

            match self.apply(event.content().trim()) {
                Err(reason) => {
                    let chat_id = lock(&self.session).chat_id;
                    deliver(&self.gateway, vec![OutboundMessage::new(chat_id, reason.clone())])
                        .await;
                    Err(EngineError::Validation(reason))
                }
                Ok(WizardStep::Continue) => {
                    let summary = Self::summary(&lock(&self.session));
                    deliver(&self.gateway, vec![summary]).await;
                    Ok(())
                }
                Ok(WizardStep::Complete(session)) => {
                    if self.settled.claim() {
                        self.listener.completed(session).await;
                    }
                    Ok(())
                }
                Ok(WizardStep::Abandon(session)) => {
                    if self.settled.claim() {
                        self.listener.abandoned(session).await;
                    }
                    Ok(())
                }
            }
        })
    }

    fn close(&self) {
        if self.settled.claim() {
            debug!(author_id = %self.author_id(), "wizard closed");
        }
    }
}

/// Factory for [`BasicMatch`].
pub struct BasicMatchEngine {
    gateway: Arc<dyn ChatGateway>,
}

impl BasicMatchEngine {
    /// Matches talk through `gateway`.
    pub fn new(gateway: Arc<dyn ChatGateway>) -> Self {
        Self { gateway }
    }

    fn build(
        &self,
        config: MatchConfig,
        progress: Progress,
        listener: Arc<dyn MatchListener>,
    ) -> Arc<BasicMatch> {
        Arc::new_cyclic(|me| BasicMatch {
            me: me.clone(),
            config,
            progress: Mutex::new(progress),
            listener,
            gateway: self.gateway.clone(),
            ended: Settled::default(),
        })
    }
}

impl MatchEngine for BasicMatchEngine {
    fn create(
        &self,
        config: MatchConfig,
        listener: Arc<dyn MatchListener>,
    ) -> Arc<dyn MatchHandle> {
        let progress = Progress {
            players: Vec::new(),
            state: MachineState::new(WAITING),
            current_round: 0,
            turn: 0,
            turn_started: Instant::now(),
            created_at: SystemTime::now(),
        };
        self.build(config, progress, listener)
    }

    fn resume(
        &self,
        snapshot: MatchSnapshot,
        listener: Arc<dyn MatchListener>,
    ) -> Arc<dyn MatchHandle> {
        let MatchSnapshot {
            config,
            players,
            current_round,
            state,
            created_at,
        } = snapshot;
        // the interrupted round restarts from its first player
        let progress = Progress {
            players,
            state,
            current_round,
            turn: 0,
            turn_started: Instant::now(),
            created_at,
        };
        self.build(config, progress, listener)
    }
}

struct Progress {
    players: Vec<Player>,
    state: MachineState,
    current_round: usize,
    turn: usize,
    turn_started: Instant,
    created_at: SystemTime,
}

/// Match with one turn per player and round.
pub struct BasicMatch {
    me: Weak<BasicMatch>,
    config: MatchConfig,
    progress: Mutex<Progress>,
    listener: Arc<dyn MatchListener>,
    gateway: Arc<dyn ChatGateway>,
    ended: Settled,
}

fn total_points(player: &Player) -> i64 {
    player.rates.iter().map(|rate| i64::from(rate.points)).sum()
}

fn leaders(players: &[Player]) -> Vec<Player> {
    let Some(best) = players.iter().map(total_points).max() else {
        return Vec::new();
    };
    players
        .iter()
        .filter(|player| total_points(player) == best)
        .cloned()
        .collect()
}

impl BasicMatch {
    fn chat_of(&self, player: &Player) -> ChatId {
        if player.offline {
            self.config.chat_id
        } else {
            player.user_id.0
        }
    }

    fn broadcast(&self, players: &[Player], text: &str) -> Vec<OutboundMessage> {
        let mut chats: Vec<ChatId> = players.iter().map(|player| self.chat_of(player)).collect();
        chats.sort_unstable();
        chats.dedup();
        chats
            .into_iter()
            .map(|chat_id| OutboundMessage::new(chat_id, text))
            .collect()
    }

    fn bonus_for(&self, round: usize) -> Option<&BonusTask> {
        match self.config.bonus_tasks.len() {
            0 => None,
            len => self.config.bonus_tasks.get(round % len),
        }
    }

    fn turn_prompt(&self, progress: &Progress) -> Vec<OutboundMessage> {
        let Some(player) = progress.players.get(progress.turn) else {
            return Vec::new();
        };
        let letter = match self.config.letters.len() {
            0 => "?",
            len => self.config.letters[progress.current_round % len].as_str(),
        };
        let bonus = self
            .bonus_for(progress.current_round)
            .map(|task| format!("\n\n💎 Or send `{CMD_BLOOPS}` to take the bonus: {}", task.task))
            .unwrap_or_default();

        let text = format!(
            "Round {} of {}. {}, your turn! Letter *{letter}*, categories: {}{bonus}",
            progress.current_round + 1,
            self.config.rounds_num,
            player.name,
            self.config.categories.join(", "),
        );
        vec![OutboundMessage::new(self.chat_of(player), text)]
    }

    fn entry_effects(&self, progress: &Progress) -> Vec<OutboundMessage> {
        match progress.state.as_str() {
            WAITING => vec![OutboundMessage::new(
                self.config.chat_id,
                format!(
                    "Game {} is waiting for players. Send `{CMD_START}` once everyone joined",
                    self.config.code
                ),
            )],
            PLAYING => self.turn_prompt(progress),
            _ => Vec::new(),
        }
    }

    fn begin(
        &self,
        progress: &mut Progress,
        user_id: UserId,
        text: &str,
    ) -> EngineResult<Vec<OutboundMessage>> {
        if user_id != self.config.author_id || !text.eq_ignore_ascii_case(CMD_START) {
            return Err(EngineError::Validation(
                "Waiting for the author to start the game".into(),
            ));
        }
        if progress.players.len() < 2 {
            return Err(EngineError::Validation(
                "At least two players are needed".into(),
            ));
        }
        progress.state = MachineState::new(PLAYING);
        progress.current_round = 0;
        progress.turn = 0;
        progress.turn_started = Instant::now();
        Ok(self.entry_effects(progress))
    }

    /// Score the current turn. Returns the messages to send and whether the match ended.
    fn play_turn(
        &self,
        progress: &mut Progress,
        user_id: UserId,
        text: &str,
    ) -> EngineResult<(Vec<OutboundMessage>, bool)> {
        let Some(player) = progress.players.get(progress.turn) else {
            return Err(EngineError::Internal("no player holds the turn".into()));
        };
        // the author plays for offline players
        let acting = if player.offline {
            self.config.author_id
        } else {
            player.user_id
        };
        if acting != user_id {
            return Err(EngineError::Validation(format!("It is {}'s turn", player.name)));
        }
        if text.is_empty() {
            return Err(EngineError::Validation("Send your words as text".into()));
        }

        let duration = progress.turn_started.elapsed();
        let rate = match self.bonus_for(progress.current_round) {
            Some(task) if text.eq_ignore_ascii_case(CMD_BLOOPS) => Rate {
                duration,
                points: task.points,
                bonus: true,
                bonus_name: Some(task.name.clone()),
            },
            _ => Rate {
                duration,
                points: i32::try_from(text.split_whitespace().count()).unwrap_or(i32::MAX),
                bonus: false,
                bonus_name: None,
            },
        };
        let scored = format!("{} scored {}", player.name, rate.points);
        let turn = progress.turn;
        progress.players[turn].rates.push(rate);

        let mut outbox = self.broadcast(&progress.players, &scored);
        progress.turn += 1;
        if progress.turn >= progress.players.len() {
            progress.turn = 0;
            progress.current_round += 1;
        }
        progress.turn_started = Instant::now();

        if progress.current_round >= self.config.rounds_num as usize {
            progress.state = MachineState::new(FINISHED);
            let names: Vec<String> = leaders(&progress.players)
                .into_iter()
                .map(|player| player.name)
                .collect();
            let results = format!("🏆 Game over! Favorites: {}", names.join(", "));
            outbox.extend(self.broadcast(&progress.players, &results));
            return Ok((outbox, true));
        }
        outbox.extend(self.turn_prompt(progress));
        Ok((outbox, false))
    }
}

impl MatchHandle for BasicMatch {
    fn code(&self) -> JoinCode {
        self.config.code
    }

    fn run(&self, cancel: CancellationToken) {
        let Some(me) = self.me.upgrade() else {
            return;
        };

        tokio::spawn(async move {
            tokio::select! {
                _ = me.ended.token.cancelled() => {}
                _ = cancel.cancelled() => {
                    if me.ended.claim() {
                        let players = lock(&me.progress).players.clone();
                        deliver(&me.gateway, me.broadcast(&players, MATCH_INTERRUPTED)).await;
                        let handle: Arc<dyn MatchHandle> = me.clone();
                        me.listener.interrupted(handle).await;
                    }
                }
            }
        });
    }

    fn execute<'a>(
        &'a self,
        user_id: UserId,
        event: InboundEvent,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            if self.ended.is_set() {
                return Err(EngineError::Rejected("the game is over".into()));
            }
            let text = event.content().trim();

            let outcome = {
                let mut progress = lock(&self.progress);
                match progress.state.as_str() {
                    WAITING => self
                        .begin(&mut progress, user_id, text)
                        .map(|outbox| (outbox, false)),
                    PLAYING => self.play_turn(&mut progress, user_id, text),
                    _ => Err(EngineError::Rejected("the game is over".into())),
                }
            };

            let (outbox, finished) = match outcome {
                Ok(outcome) => outcome,
                Err(EngineError::Validation(reason)) => {
                    deliver(&self.gateway, vec![OutboundMessage::new(user_id.0, reason.clone())])
                        .await;
                    return Err(EngineError::Validation(reason));
                }
                Err(err) => return Err(err),
            };

            deliver(&self.gateway, outbox).await;
            if finished
                && self.ended.claim()
                && let Some(me) = self.me.upgrade()
            {
                debug!(code = %self.config.code, "match reached its last round");
                self.listener.finished(me).await;
            }
            Ok(())
        })
    }

    fn move_state(&self, state: MachineState) {
        let outbox = {
            let mut progress = lock(&self.progress);
            progress.state = state;
            progress.turn_started = Instant::now();
            self.entry_effects(&progress)
        };
        let gateway = self.gateway.clone();
        tokio::spawn(async move { deliver(&gateway, outbox).await });
    }

    fn favorites(&self) -> Vec<Player> {
        leaders(&lock(&self.progress).players)
    }

    fn snapshot(&self) -> MatchSnapshot {
        let progress = lock(&self.progress);
        MatchSnapshot {
            config: self.config.clone(),
            players: progress.players.clone(),
            current_round: progress.current_round,
            state: progress.state.clone(),
            created_at: progress.created_at,
        }
    }

    fn add_player(&self, player: Player) -> EngineResult<()> {
        let mut progress = lock(&self.progress);
        if progress.state.as_str() != WAITING {
            return Err(EngineError::Rejected("the game has already started".into()));
        }
        if progress
            .players
            .iter()
            .all(|known| known.user_id != player.user_id)
        {
            progress.players.push(player);
        }
        Ok(())
    }

    fn remove_player(&self, user_id: UserId) -> EngineResult<()> {
        let mut progress = lock(&self.progress);
        let Some(index) = progress
            .players
            .iter()
            .position(|player| player.user_id == user_id)
        else {
            return Ok(());
        };
        progress.players.remove(index);
        if index < progress.turn {
            progress.turn -= 1;
        }
        if progress.turn >= progress.players.len() {
            progress.turn = 0;
        }
        Ok(())
    }
}
