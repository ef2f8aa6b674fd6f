//! Runtime data model shared by the registry, the engines and the services.

use std::{
    fmt,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// External numeric identity of a chat user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Short numeric identifier players type to enter a running match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JoinCode(pub i64);

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Chat destination as understood by the gateway.
pub type ChatId = i64;

/// Whether a user may interact with the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Regular user.
    #[default]
    Active,
    /// Blocked by an administrator; every command is silently dropped.
    Banned,
}

/// Known user, enriched with rating counters on every inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Gateway identity.
    pub id: UserId,
    /// Given name as reported by the gateway.
    pub first_name: String,
    /// Family name as reported by the gateway (may be empty).
    pub last_name: String,
    /// Public handle without the leading `@` (may be empty).
    pub username: String,
    /// IETF language tag reported by the client.
    pub language_code: String,
    /// Whether admin-only commands are allowed.
    pub admin: bool,
    /// Active or banned.
    pub status: UserStatus,
    /// First time the user was seen.
    pub created_at: OffsetDateTime,
    /// Matches in which the user ended up among the favorites.
    pub stars: u64,
    /// Bonus tasks collected across all matches.
    pub bloops: u64,
}

impl User {
    /// Whether the user may use regular commands.
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Name used when talking about the user to other players.
    pub fn display_name(&self) -> &str {
        if self.first_name.is_empty() {
            &self.username
        } else {
            &self.first_name
        }
    }
}

/// Aggregate rating fetched from the stat store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    /// Number of favorite conclusions.
    pub stars: u64,
    /// Number of collected bonus tasks.
    pub bloops: u64,
}

/// Selectable wizard entry (category or letter) and whether it was kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Displayed text, a category name or a single letter.
    pub text: String,
    /// Whether the author kept the entry.
    pub selected: bool,
}

impl Choice {
    /// Build a selected choice.
    pub fn selected(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            selected: true,
        }
    }

    /// Build a deselected choice.
    pub fn deselected(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            selected: false,
        }
    }
}

/// Match configuration being assembled by a wizard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardSession {
    /// Author owning the wizard.
    pub author_id: UserId,
    /// Author display name, copied into the match.
    pub author_name: String,
    /// Chat the author talks from.
    pub chat_id: ChatId,
    /// Number of rounds.
    pub rounds_num: u32,
    /// Duration of one player turn.
    pub round_time: Duration,
    /// Categories offered to the author.
    pub categories: Vec<Choice>,
    /// Letters offered to the author.
    pub letters: Vec<Choice>,
    /// Whether players vote after each turn.
    pub vote: bool,
    /// Whether bonus tasks are dealt during the match.
    pub bloops: bool,
}

/// Optional side objective dealt to a player during a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusTask {
    /// Short name, collected into stat records.
    pub name: String,
    /// What the player has to do.
    pub task: String,
    /// Points awarded when completed.
    pub points: i32,
}

/// Immutable configuration of a running match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchConfig {
    /// Join code the match is registered under.
    pub code: JoinCode,
    /// Author identity.
    pub author_id: UserId,
    /// Author display name.
    pub author_name: String,
    /// Chat the match was created from.
    pub chat_id: ChatId,
    /// Number of rounds.
    pub rounds_num: u32,
    /// Duration of one player turn.
    pub round_time: Duration,
    /// Inactivity timeout after which the engine may end the match.
    pub timeout: Duration,
    /// Selected categories.
    pub categories: Vec<String>,
    /// Selected letters.
    pub letters: Vec<String>,
    /// Bonus task pool; a copy of the catalog taken at creation time.
    pub bonus_tasks: Vec<BonusTask>,
    /// Whether players vote after each turn.
    pub vote: bool,
}

/// Engine-defined state tag. This layer only stores and replays it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct MachineState(pub String);

impl MachineState {
    /// Build a state tag from its engine name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Engine name of the state.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Performance of a player during one completed round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rate {
    /// Time the player needed for the turn.
    pub duration: Duration,
    /// Points awarded for the turn.
    pub points: i32,
    /// Whether the turn was a bonus task.
    pub bonus: bool,
    /// Name of the bonus task, when `bonus` is set.
    pub bonus_name: Option<String>,
}

/// Participant of a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Identity of the participant. Offline players carry a synthetic identity.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Virtual participant without a direct channel; messages go to the author.
    pub offline: bool,
    /// One entry per completed round.
    pub rates: Vec<Rate>,
}

impl Player {
    /// Player reachable through their own chat.
    pub fn online(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            offline: false,
            rates: Vec::new(),
        }
    }

    /// Virtual player routed through the match author.
    pub fn offline(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            offline: true,
            rates: Vec::new(),
        }
    }
}

/// Complete view of a live match, the unit of persistence and recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnapshot {
    /// Configuration the match was created with.
    pub config: MatchConfig,
    /// Participants in join order.
    pub players: Vec<Player>,
    /// Index of the round currently played.
    pub current_round: usize,
    /// Engine state at snapshot time.
    pub state: MachineState,
    /// When the match was created.
    pub created_at: SystemTime,
}

impl MatchSnapshot {
    /// Players that own a direct channel and can be routed to.
    pub fn online_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|player| !player.offline)
    }
}
