//! Application-level configuration loading: bot credentials, transport mode, session
//! defaults and the bonus task catalog.

use std::{
    env, fs,
    io::ErrorKind,
    net::{AddrParseError, SocketAddr},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::state::session::BonusTask;

/// Default location on disk where the bot looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/bot.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "BLOOPS_BOT_CONFIG_PATH";

const TOKEN_ENV: &str = "BLOOPS_BOT_TOKEN";
const ADMIN_ENV: &str = "BLOOPS_ADMIN";
const WEBHOOK_URL_ENV: &str = "BLOOPS_WEBHOOK_URL";
const WORKERS_ENV: &str = "BLOOPS_WORKERS";
const PORT_ENV: &str = "PORT";
const STORE_ENV: &str = "STORE_BACKEND";

/// Errors raised while assembling the runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationErrors),
    /// An environment override could not be interpreted.
    #[error("invalid value `{value}` for environment variable `{var}`")]
    InvalidEnv { var: &'static str, value: String },
    /// The webhook listen address is malformed.
    #[error("invalid webhook listen address `{value}`")]
    InvalidAddr {
        value: String,
        #[source]
        source: AddrParseError,
    },
}

/// Persistence backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local maps; nothing survives a restart.
    #[default]
    Memory,
    /// CouchDB, configured through `COUCH_*` variables.
    Couch,
    /// MongoDB, configured through `MONGO_*` variables.
    Mongo,
}

impl StoreBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "couch" | "couchdb" => Some(Self::Couch),
            "mongo" | "mongodb" => Some(Self::Mongo),
            _ => None,
        }
    }
}

/// Webhook transport settings. Absent means long polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Public URL prefix; the bot token is appended to form the hook URL.
    pub url: String,
    /// Local address the HTTP listener binds to.
    pub addr: SocketAddr,
}

/// Values a fresh wizard starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardDefaults {
    /// Rounds preselected in the wizard.
    pub rounds_num: u32,
    /// Turn duration.
    pub round_time: Duration,
    /// Categories offered to the author.
    pub categories: Vec<String>,
    /// Letters offered to the author.
    pub letters: Vec<String>,
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct BotConfig {
    /// Bot API token.
    pub bot_token: String,
    /// Username (without `@`) granted the admin flag on first contact.
    pub admin: String,
    /// Webhook transport, when configured.
    pub webhook: Option<WebhookConfig>,
    /// Long-poll timeout.
    pub poll_timeout: Duration,
    /// Inactivity timeout handed to every match.
    pub playing_timeout: Duration,
    /// Size of the event worker pool.
    pub workers: usize,
    /// Wizard starting values.
    pub wizard: WizardDefaults,
    /// Bonus task catalog copied into matches that enable bonus tasks.
    pub bonus_tasks: Vec<BonusTask>,
    /// Persistence backend.
    pub store: StoreBackend,
}

impl BotConfig {
    /// Load the configuration from disk and the environment.
    ///
    /// A missing or unreadable file falls back to built-in defaults; a configuration
    /// that fails validation is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let raw = read_raw(&resolve_config_path());
        Self::from_sources(raw, |key| env::var(key).ok())
    }

    fn from_sources<E>(mut raw: RawConfig, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        if let Some(token) = env(TOKEN_ENV) {
            raw.bot_token = token;
        }
        if let Some(admin) = env(ADMIN_ENV) {
            raw.admin = admin;
        }
        if let Some(url) = env(WEBHOOK_URL_ENV) {
            raw.webhook_url = Some(url).filter(|url| !url.trim().is_empty());
        }
        if let Some(port) = env(PORT_ENV) {
            let port = port.parse::<u16>().map_err(|_| ConfigError::InvalidEnv {
                var: PORT_ENV,
                value: port.clone(),
            })?;
            raw.webhook_addr = format!("0.0.0.0:{port}");
        }
        if let Some(workers) = env(WORKERS_ENV) {
            raw.workers = workers.parse().map_err(|_| ConfigError::InvalidEnv {
                var: WORKERS_ENV,
                value: workers.clone(),
            })?;
        }
        if let Some(store) = env(STORE_ENV) {
            raw.store = StoreBackend::parse(&store).ok_or(ConfigError::InvalidEnv {
                var: STORE_ENV,
                value: store.clone(),
            })?;
        }

        raw.validate()?;
        raw.try_into()
    }

    /// Built-in defaults with a fixed token and admin, no file or environment involved.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        let raw = RawConfig {
            bot_token: "test-token".into(),
            admin: "boss".into(),
            workers: 4,
            ..RawConfig::default()
        };
        match Self::from_sources(raw, |_| None) {
            Ok(config) => config,
            Err(err) => panic!("default test configuration is invalid: {err}"),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[validate(length(min = 1, message = "bot token must not be empty"))]
    bot_token: String,
    admin: String,
    #[validate(url)]
    webhook_url: Option<String>,
    webhook_addr: String,
    #[validate(range(min = 1, max = 600))]
    poll_timeout_secs: u64,
    #[validate(range(min = 1))]
    playing_timeout_secs: u64,
    #[validate(range(min = 1, max = 512))]
    workers: usize,
    #[validate(nested)]
    wizard: RawWizardDefaults,
    #[validate(custom(function = "validate_bonus_tasks"))]
    bonus_tasks: Vec<BonusTask>,
    store: StoreBackend,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            admin: String::new(),
            webhook_url: None,
            webhook_addr: "0.0.0.0:8080".to_owned(),
            poll_timeout_secs: 60,
            playing_timeout_secs: 30 * 60,
            workers: thread::available_parallelism().map_or(4, |n| n.get()),
            wizard: RawWizardDefaults::default(),
            bonus_tasks: default_bonus_tasks(),
            store: StoreBackend::default(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(default)]
struct RawWizardDefaults {
    #[validate(range(min = 1, max = 10))]
    rounds_num: u32,
    #[validate(range(min = 5, max = 300))]
    round_time_secs: u64,
    #[validate(length(min = 1))]
    categories: Vec<String>,
    #[validate(length(min = 1))]
    letters: Vec<String>,
}

impl Default for RawWizardDefaults {
    fn default() -> Self {
        Self {
            rounds_num: 1,
            round_time_secs: 30,
            categories: default_categories(),
            letters: ('A'..='Z').map(String::from).collect(),
        }
    }
}

impl TryFrom<RawConfig> for BotConfig {
    type Error = ConfigError;

    fn try_from(value: RawConfig) -> Result<Self, Self::Error> {
        let webhook = match value.webhook_url.filter(|url| !url.trim().is_empty()) {
            Some(url) => {
                let addr = value.webhook_addr.parse::<SocketAddr>().map_err(|source| {
                    ConfigError::InvalidAddr {
                        value: value.webhook_addr.clone(),
                        source,
                    }
                })?;
                Some(WebhookConfig { url, addr })
            }
            None => None,
        };

        Ok(Self {
            bot_token: value.bot_token,
            admin: value.admin.trim_start_matches('@').to_owned(),
            webhook,
            poll_timeout: Duration::from_secs(value.poll_timeout_secs),
            playing_timeout: Duration::from_secs(value.playing_timeout_secs),
            workers: value.workers,
            wizard: WizardDefaults {
                rounds_num: value.wizard.rounds_num,
                round_time: Duration::from_secs(value.wizard.round_time_secs),
                categories: value.wizard.categories,
                letters: value.wizard.letters,
            },
            bonus_tasks: value.bonus_tasks,
            store: value.store,
        })
    }
}

/// Every bonus task needs a name (it ends up in stat records) and a description.
fn validate_bonus_tasks(tasks: &[BonusTask]) -> Result<(), ValidationError> {
    if let Some(task) = tasks
        .iter()
        .find(|task| task.name.trim().is_empty() || task.task.trim().is_empty())
    {
        let mut err = ValidationError::new("bonus_task_incomplete");
        err.message = Some(
            format!(
                "bonus task must have a name and a description (got `{}`)",
                task.name
            )
            .into(),
        );
        return Err(err);
    }

    Ok(())
}

fn read_raw(path: &Path) -> RawConfig {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
            Ok(raw) => {
                info!(path = %path.display(), "loaded bot config");
                raw
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to parse config; falling back to defaults"
                );
                RawConfig::default()
            }
        },
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(
                path = %path.display(),
                "config file not found; using built-in defaults"
            );
            RawConfig::default()
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "failed to read config; falling back to defaults"
            );
            RawConfig::default()
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn default_categories() -> Vec<String> {
    [
        "Animals",
        "Cities",
        "Countries",
        "Food",
        "Movies",
        "Professions",
        "Plants",
        "Brands",
        "Sports",
        "Bands",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Built-in bonus task catalog shipped with the binary.
fn default_bonus_tasks() -> Vec<BonusTask> {
    [
        ("Whisper", "Say every word in a whisper", 2),
        ("Opera", "Sing every word like an opera singer", 3),
        ("Mime", "Show the first word without speaking, then say the rest", 3),
        ("Backwards", "Name the categories in reverse order", 2),
        ("Eyes shut", "Keep your eyes closed for the whole turn", 1),
    ]
    .into_iter()
    .map(|(name, task, points)| BonusTask {
        name: name.to_owned(),
        task: task.to_owned(),
        points,
    })
    .collect()
}
