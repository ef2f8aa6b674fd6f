//! bloops-bot binary entrypoint wiring the Telegram gateway, storage, engines and the
//! worker pool.

use std::sync::Arc;

use anyhow::Context;
use futures::{Stream, StreamExt};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bloops_bot::{
    config::{BotConfig, StoreBackend},
    dao::store::{Stores, memory::MemoryStore},
    engine::basic::{BasicMatchEngine, BasicWizardEngine},
    gateway::{ChatGateway, InboundEvent, telegram::TelegramClient},
    routes,
    services::{commands, dispatch, recovery, shutdown},
    state::{AppState, Engines, SharedState},
};

const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = BotConfig::load().context("loading bot configuration")?;
    let stores = connect_stores(config.store).await?;
    let client = TelegramClient::new(&config.bot_token).context("building Telegram client")?;
    let gateway: Arc<dyn ChatGateway> = Arc::new(client.clone());
    let engines = Engines::new(
        Arc::new(BasicWizardEngine::new(config.wizard.clone(), gateway.clone())),
        Arc::new(BasicMatchEngine::new(gateway.clone())),
    );
    let workers = config.workers;
    let state = AppState::new(config, stores, gateway, engines);

    commands::register_commands(&state).await;
    let source = prepare_ingestion(&state, &client).await?;

    let restored = recovery::restore_or_drain(&state)
        .await
        .context("restoring interrupted matches")?;
    info!(restored, "recovery finished");

    let (events, inbox) = mpsc::channel(EVENT_BUFFER);
    let pool = tokio::spawn(dispatch::run_workers(state.clone(), inbox, workers));
    let ingestion = spawn_ingestion(&state, &client, source, events);

    shutdown_signal().await;
    info!("shutdown requested; draining sessions");
    shutdown::drain(&state).await;

    if let Err(err) = ingestion.await {
        warn!(error = %err, "ingestion task ended abnormally");
    }
    if let Err(err) = pool.await {
        warn!(error = %err, "worker pool ended abnormally");
    }
    info!("bye");
    Ok(())
}

/// Where updates come from once the bot is running.
enum UpdateSource {
    Webhook(TcpListener),
    Polling,
}

/// Register (or remove) the webhook with the Bot API and bind the listener. Nothing is
/// consumed yet.
async fn prepare_ingestion(
    state: &SharedState,
    client: &TelegramClient,
) -> anyhow::Result<UpdateSource> {
    let Some(webhook) = state.config().webhook.clone() else {
        client
            .delete_webhook()
            .await
            .context("removing webhook before long polling")?;
        return Ok(UpdateSource::Polling);
    };

    let url = format!(
        "{}/{}",
        webhook.url.trim_end_matches('/'),
        state.config().bot_token
    );
    client.set_webhook(&url).await.context("registering webhook")?;
    match client.webhook_info().await {
        Ok(info) => info!(
            pending = info.pending_update_count,
            last_error = info.last_error_message.as_deref().unwrap_or(""),
            "webhook registered"
        ),
        Err(err) => warn!(error = %err, "could not read webhook info"),
    }

    let listener = TcpListener::bind(webhook.addr)
        .await
        .with_context(|| format!("binding {}", webhook.addr))?;
    Ok(UpdateSource::Webhook(listener))
}

/// Serve the webhook or long-poll into `events`. Both stop with the run scope.
fn spawn_ingestion(
    state: &SharedState,
    client: &TelegramClient,
    source: UpdateSource,
    events: mpsc::Sender<InboundEvent>,
) -> JoinHandle<()> {
    let stop = state.run_scope().clone();

    match source {
        UpdateSource::Webhook(listener) => {
            if let Ok(addr) = listener.local_addr() {
                info!(%addr, "serving webhook");
            }
            let app = routes::router(state.clone(), events);
            tokio::spawn(async move {
                let served = axum::serve(listener, app.into_make_service())
                    .with_graceful_shutdown(stop.cancelled_owned())
                    .await;
                if let Err(err) = served {
                    error!(error = %err, "webhook server failed");
                }
            })
        }
        UpdateSource::Polling => {
            info!("long polling for updates");
            let updates = client.updates(state.config().poll_timeout, stop);
            tokio::spawn(forward(updates, events))
        }
    }
}

async fn forward(updates: impl Stream<Item = InboundEvent>, events: mpsc::Sender<InboundEvent>) {
    let mut updates = std::pin::pin!(updates);
    while let Some(event) = updates.next().await {
        if events.send(event).await.is_err() {
            break;
        }
    }
}

/// Open the configured backend. Connection failures are retried with backoff.
async fn connect_stores(backend: StoreBackend) -> anyhow::Result<Stores> {
    match backend {
        StoreBackend::Memory => {
            warn!("using the in-memory store; interrupted matches will not survive a restart");
            Ok(Stores::from_backend(MemoryStore::new()))
        }
        #[cfg(feature = "couch-store")]
        StoreBackend::Couch => {
            use bloops_bot::dao::store::couchdb::{CouchConfig, CouchStore};

            let config = CouchConfig::from_env().context("reading CouchDB configuration")?;
            let store = with_backoff("CouchDB", || CouchStore::connect(config.clone())).await?;
            Ok(Stores::from_backend(store))
        }
        #[cfg(feature = "mongo-store")]
        StoreBackend::Mongo => {
            use bloops_bot::dao::store::mongodb::{MongoConfig, MongoStore};

            let config = MongoConfig::from_env()
                .await
                .context("reading MongoDB configuration")?;
            // `connect` retries the initial ping itself.
            let store = MongoStore::connect(config)
                .await
                .context("connecting to MongoDB")?;
            info!(backend = "MongoDB", "storage connected");
            Ok(Stores::from_backend(store))
        }
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("store backend {other:?} is not compiled in"),
    }
}

/// Retry `connect` with exponential backoff: 5 attempts, 1 s doubling up to 10 s.
#[cfg(feature = "couch-store")]
async fn with_backoff<T, E, F, Fut>(backend: &'static str, mut connect: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    use std::time::Duration;

    const CONNECT_ATTEMPTS: u32 = 5;
    const MAX_BACKOFF: Duration = Duration::from_secs(10);

    let mut delay = Duration::from_secs(1);
    let mut attempt = 1;
    loop {
        match connect().await {
            Ok(store) => {
                info!(backend, attempt, "storage connected");
                return Ok(store);
            }
            Err(err) if attempt < CONNECT_ATTEMPTS => {
                warn!(backend, attempt, error = %err, "storage connection failed; retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_BACKOFF);
                attempt += 1;
            }
            Err(err) => {
                return Err(anyhow::Error::new(err).context(format!("connecting to {backend}")));
            }
        }
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
