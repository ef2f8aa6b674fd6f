//! Fixtures shared by the unit tests: recording gateway, scripted engines and stores.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::{
    config::BotConfig,
    dao::{
        models::{MatchStateEntity, StatEntity},
        storage::{StorageError, StorageResult},
        store::{MatchStateStore, StatStore, Stores, memory::MemoryStore},
    },
    engine::{
        EngineError, EngineResult, MatchEngine, MatchHandle, MatchListener, WizardEngine,
        WizardHandle, WizardListener,
    },
    gateway::{ChatGateway, GatewayError, InboundEvent, OutboundMessage, Sender},
    services::lifecycle::SessionHooks,
    state::{
        AppState, Engines, SharedState,
        join_code::{JoinCodeGenerator, TimeHashCodes},
        session::{
            ChatId, JoinCode, MachineState, MatchConfig, MatchSnapshot, Player, Rating, User,
            UserId, UserStatus, WizardSession,
        },
    },
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Gateway keeping every delivered message.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: AtomicBool,
}

impl RecordingGateway {
    /// Bodies delivered to `chat_id`, oldest first.
    pub fn texts_to(&self, chat_id: ChatId) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .filter(|message| message.chat_id == chat_id)
            .map(|message| message.text.clone())
            .collect()
    }

    /// Make every following send fail.
    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ChatGateway for RecordingGateway {
    fn send(&self, message: OutboundMessage) -> BoxFuture<'static, Result<(), GatewayError>> {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(GatewayError::Closed)
        } else {
            lock(&self.sent).push(message);
            Ok(())
        };
        Box::pin(async move { result })
    }
}

/// Hands out a fixed sequence of codes, then falls back to random ones.
pub struct ScriptedCodes {
    queue: Mutex<VecDeque<JoinCode>>,
    drawn: AtomicUsize,
}

impl ScriptedCodes {
    pub fn new(codes: impl IntoIterator<Item = JoinCode>) -> Self {
        Self {
            queue: Mutex::new(codes.into_iter().collect()),
            drawn: AtomicUsize::new(0),
        }
    }

    /// Number of codes handed out so far.
    pub fn drawn(&self) -> usize {
        self.drawn.load(Ordering::SeqCst)
    }
}

impl JoinCodeGenerator for ScriptedCodes {
    fn generate(&self) -> JoinCode {
        self.drawn.fetch_add(1, Ordering::SeqCst);
        lock(&self.queue)
            .pop_front()
            .unwrap_or_else(|| TimeHashCodes.generate())
    }
}

/// Wizard recording what it is fed. With a listener it abandons on cancellation.
pub struct StubWizard {
    author: UserId,
    executed: Mutex<Vec<String>>,
    listener: Option<Arc<dyn WizardListener>>,
    closed: CancellationToken,
}

impl StubWizard {
    pub fn new(author: UserId) -> Arc<Self> {
        Self::build(author, None)
    }

    pub fn listening(author: UserId, hooks: Arc<SessionHooks>) -> Arc<Self> {
        Self::build(author, Some(hooks as Arc<dyn WizardListener>))
    }

    fn build(author: UserId, listener: Option<Arc<dyn WizardListener>>) -> Arc<Self> {
        Arc::new(Self {
            author,
            executed: Mutex::new(Vec::new()),
            listener,
            closed: CancellationToken::new(),
        })
    }

    /// Contents of every event fed so far.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    /// Whether the registry closed the wizard.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn session(&self) -> WizardSession {
        WizardSession {
            author_id: self.author,
            author_name: "Author".into(),
            chat_id: self.author.0,
            rounds_num: 1,
            round_time: Duration::from_secs(30),
            categories: Vec::new(),
            letters: Vec::new(),
            vote: false,
            bloops: false,
        }
    }
}

impl WizardHandle for StubWizard {
    fn author_id(&self) -> UserId {
        self.author
    }

    fn run(&self, cancel: CancellationToken) {
        if let Some(listener) = self.listener.clone() {
            let session = self.session();
            let closed = self.closed.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = closed.cancelled() => {}
                    _ = cancel.cancelled() => listener.abandoned(session).await,
                }
            });
        }
    }

    fn execute<'a>(&'a self, event: InboundEvent) -> BoxFuture<'a, EngineResult<()>> {
        lock(&self.executed).push(event.content().to_owned());
        Box::pin(async { Ok(()) })
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Wizard engine producing [`StubWizard`]s wired to the given listener.
#[derive(Default)]
pub struct StubWizardEngine {
    started: Mutex<Vec<Arc<StubWizard>>>,
}

impl StubWizardEngine {
    /// Every wizard started so far.
    pub fn started(&self) -> Vec<Arc<StubWizard>> {
        lock(&self.started).clone()
    }
}

impl WizardEngine for StubWizardEngine {
    fn start(
        &self,
        author: &User,
        _chat_id: ChatId,
        listener: Arc<dyn WizardListener>,
    ) -> Arc<dyn WizardHandle> {
        let wizard = StubWizard::build(author.id, Some(listener));
        lock(&self.started).push(wizard.clone());
        wizard
    }
}

/// Match recording every call. With a listener it reports interruption on cancellation.
pub struct StubMatch {
    me: Weak<StubMatch>,
    snapshot: Mutex<MatchSnapshot>,
    favorites: Mutex<Vec<Player>>,
    executed: Mutex<Vec<(UserId, String)>>,
    moves: Mutex<Vec<MachineState>>,
    runs: AtomicUsize,
    reject_input: AtomicBool,
    listener: Option<Arc<dyn MatchListener>>,
}

impl StubMatch {
    pub fn new(code: JoinCode) -> Arc<Self> {
        Self::build(sample_snapshot(code), None)
    }

    pub fn with_snapshot(snapshot: MatchSnapshot) -> Arc<Self> {
        Self::build(snapshot, None)
    }

    pub fn listening(code: JoinCode, hooks: Arc<SessionHooks>) -> Arc<Self> {
        Self::build(sample_snapshot(code), Some(hooks as Arc<dyn MatchListener>))
    }

    fn build(snapshot: MatchSnapshot, listener: Option<Arc<dyn MatchListener>>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            snapshot: Mutex::new(snapshot),
            favorites: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            moves: Mutex::new(Vec::new()),
            runs: AtomicUsize::new(0),
            reject_input: AtomicBool::new(false),
            listener,
        })
    }

    pub fn set_favorites(&self, favorites: Vec<Player>) {
        *lock(&self.favorites) = favorites;
    }

    /// Answer every following event with a validation error.
    pub fn reject_input_with_validation(&self) {
        self.reject_input.store(true, Ordering::SeqCst);
    }

    pub fn executed(&self) -> Vec<(UserId, String)> {
        lock(&self.executed).clone()
    }

    pub fn moves(&self) -> Vec<MachineState> {
        lock(&self.moves).clone()
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl MatchHandle for StubMatch {
    fn code(&self) -> JoinCode {
        lock(&self.snapshot).config.code
    }

    fn run(&self, cancel: CancellationToken) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(listener) = self.listener.clone() {
            let me = self.me.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                if let Some(me) = me.upgrade() {
                    listener.interrupted(me).await;
                }
            });
        }
    }

    fn execute<'a>(
        &'a self,
        user_id: UserId,
        event: InboundEvent,
    ) -> BoxFuture<'a, EngineResult<()>> {
        lock(&self.executed).push((user_id, event.content().to_owned()));
        let result = if self.reject_input.load(Ordering::SeqCst) {
            Err(EngineError::Validation("not a valid answer".into()))
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn move_state(&self, state: MachineState) {
        lock(&self.snapshot).state = state.clone();
        lock(&self.moves).push(state);
    }

    fn favorites(&self) -> Vec<Player> {
        lock(&self.favorites).clone()
    }

    fn snapshot(&self) -> MatchSnapshot {
        lock(&self.snapshot).clone()
    }

    fn add_player(&self, player: Player) -> EngineResult<()> {
        let mut snapshot = lock(&self.snapshot);
        if snapshot
            .players
            .iter()
            .all(|known| known.user_id != player.user_id)
        {
            snapshot.players.push(player);
        }
        Ok(())
    }

    fn remove_player(&self, user_id: UserId) -> EngineResult<()> {
        lock(&self.snapshot)
            .players
            .retain(|player| player.user_id != user_id);
        Ok(())
    }
}

/// Match engine producing [`StubMatch`]es wired to the given listener.
#[derive(Default)]
pub struct StubMatchEngine {
    created: Mutex<Vec<Arc<StubMatch>>>,
    resumed: Mutex<Vec<Arc<StubMatch>>>,
}

impl StubMatchEngine {
    pub fn created(&self) -> Vec<Arc<StubMatch>> {
        lock(&self.created).clone()
    }

    pub fn resumed(&self) -> Vec<Arc<StubMatch>> {
        lock(&self.resumed).clone()
    }
}

impl MatchEngine for StubMatchEngine {
    fn create(
        &self,
        config: MatchConfig,
        listener: Arc<dyn MatchListener>,
    ) -> Arc<dyn MatchHandle> {
        let snapshot = MatchSnapshot {
            config,
            players: Vec::new(),
            current_round: 0,
            state: MachineState::new("waiting"),
            created_at: SystemTime::now(),
        };
        let session = StubMatch::build(snapshot, Some(listener));
        lock(&self.created).push(session.clone());
        session
    }

    fn resume(
        &self,
        snapshot: MatchSnapshot,
        listener: Arc<dyn MatchListener>,
    ) -> Arc<dyn MatchHandle> {
        let session = StubMatch::build(snapshot, Some(listener));
        lock(&self.resumed).push(session.clone());
        session
    }
}

/// Stat store whose writes always fail.
pub struct FailingStats;

impl StatStore for FailingStats {
    fn fetch_rating(&self, _id: UserId) -> BoxFuture<'static, StorageResult<Option<Rating>>> {
        Box::pin(async { Ok(None) })
    }

    fn add(&self, _stat: StatEntity) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async {
            Err(StorageError::MissingBucket {
                bucket: "stats".into(),
            })
        })
    }
}

/// Snapshot store serving a fixed list whose collection vanishes on clean.
pub struct MissingBucketStates {
    states: Vec<MatchStateEntity>,
}

impl MissingBucketStates {
    pub fn with(states: Vec<MatchStateEntity>) -> Self {
        Self { states }
    }
}

impl MatchStateStore for MissingBucketStates {
    fn fetch_all(&self) -> BoxFuture<'static, StorageResult<Vec<MatchStateEntity>>> {
        let states = self.states.clone();
        Box::pin(async move { Ok(states) })
    }

    fn add(&self, _state: MatchStateEntity) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn clean(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async {
            Err(StorageError::MissingBucket {
                bucket: "match_states".into(),
            })
        })
    }
}

/// Snapshot store over memory whose `clean` fails as if the backend went away.
pub struct UncleanableStates {
    memory: MemoryStore,
}

impl UncleanableStates {
    pub fn over(memory: MemoryStore) -> Self {
        Self { memory }
    }
}

impl MatchStateStore for UncleanableStates {
    fn fetch_all(&self) -> BoxFuture<'static, StorageResult<Vec<MatchStateEntity>>> {
        self.memory.fetch_all()
    }

    fn add(&self, state: MatchStateEntity) -> BoxFuture<'static, StorageResult<()>> {
        MatchStateStore::add(&self.memory, state)
    }

    fn clean(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async {
            Err(StorageError::unavailable(
                "clean match states".into(),
                std::io::Error::other("connection reset"),
            ))
        })
    }
}

pub fn sample_user(id: UserId) -> User {
    User {
        id,
        first_name: "Dana".into(),
        last_name: String::new(),
        username: format!("player{}", id.0),
        language_code: "en".into(),
        admin: false,
        status: UserStatus::Active,
        created_at: OffsetDateTime::UNIX_EPOCH,
        stars: 0,
        bloops: 0,
    }
}

pub fn sample_sender(id: UserId, username: &str) -> Sender {
    Sender {
        id,
        first_name: "Dana".into(),
        last_name: String::new(),
        username: username.into(),
        language_code: "en".into(),
    }
}

/// Two-round configuration authored by user 1 from chat 1.
pub fn sample_config(code: JoinCode) -> MatchConfig {
    MatchConfig {
        code,
        author_id: UserId(1),
        author_name: "Ann".into(),
        chat_id: 1,
        rounds_num: 2,
        round_time: Duration::from_secs(30),
        timeout: Duration::from_secs(30 * 60),
        categories: vec!["Animals".into(), "Cities".into()],
        letters: vec!["A".into(), "B".into()],
        bonus_tasks: Vec::new(),
        vote: false,
    }
}

/// Waiting match without players.
pub fn sample_snapshot(code: JoinCode) -> MatchSnapshot {
    MatchSnapshot {
        config: sample_config(code),
        players: Vec::new(),
        current_round: 0,
        state: MachineState::new("waiting"),
        created_at: SystemTime::UNIX_EPOCH,
    }
}

/// Application state over stub engines, an in-memory store and a recording gateway.
pub struct TestHarness {
    pub state: SharedState,
    pub store: MemoryStore,
    pub gateway: Arc<RecordingGateway>,
    pub matches: Arc<StubMatchEngine>,
    pub wizards: Arc<StubWizardEngine>,
}

fn harness(
    codes: Arc<dyn JoinCodeGenerator>,
    stores: impl FnOnce(MemoryStore) -> Stores,
) -> TestHarness {
    let store = MemoryStore::new();
    let gateway = Arc::new(RecordingGateway::default());
    let matches = Arc::new(StubMatchEngine::default());
    let wizards = Arc::new(StubWizardEngine::default());
    let engines = Engines::new(wizards.clone(), matches.clone()).with_codes(codes);
    let state = AppState::new(
        BotConfig::for_tests(),
        stores(store.clone()),
        gateway.clone(),
        engines,
    );

    TestHarness {
        state,
        store,
        gateway,
        matches,
        wizards,
    }
}

pub fn test_state() -> TestHarness {
    harness(Arc::new(TimeHashCodes), Stores::from_backend)
}

pub fn test_state_with_codes(codes: ScriptedCodes) -> TestHarness {
    harness(Arc::new(codes), Stores::from_backend)
}

pub fn test_state_with_stores(stores: impl FnOnce(MemoryStore) -> Stores) -> TestHarness {
    harness(Arc::new(TimeHashCodes), stores)
}
