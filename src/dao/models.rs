use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, DurationNanoSeconds, serde_as};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::state::session::{
    BonusTask, ChatId, JoinCode, MachineState, MatchConfig, MatchSnapshot, Player, Rate, User,
    UserId, UserStatus,
};

/// User record as stored by the identity store. Rating counters are derived, not stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntity {
    /// Gateway identity.
    pub id: UserId,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub language_code: String,
    /// Whether admin-only commands are allowed.
    pub admin: bool,
    /// Active or banned.
    pub status: UserStatus,
    /// First contact.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Tag attached to a stat record at the end of a match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    /// Nothing notable.
    #[default]
    None,
    /// The player was among the match favorites.
    Favorite,
}

/// Per-player result of one finished match. Written once, never updated.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatEntity {
    /// Record identifier.
    pub id: Uuid,
    /// Player the record belongs to.
    pub user_id: UserId,
    /// When the match finished.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Favorite tag.
    pub conclusion: Conclusion,
    /// Categories played.
    pub categories: Vec<String>,
    /// Configured number of rounds.
    pub rounds_num: u32,
    /// Number of participants, offline players included.
    pub players_num: usize,
    /// Names of the collected bonus tasks.
    pub bloops: Vec<String>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sum_duration: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub best_duration: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub worst_duration: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub average_duration: Duration,
    pub sum_points: i64,
    pub best_points: i64,
    pub worst_points: i64,
    pub average_points: i64,
}

/// Persisted round result of a player.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateEntity {
    #[serde_as(as = "DurationNanoSeconds<u64>")]
    pub duration: Duration,
    pub points: i32,
    pub bonus: bool,
    #[serde(default)]
    pub bonus_name: Option<String>,
}

/// Persisted match participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    pub user_id: UserId,
    pub name: String,
    pub offline: bool,
    pub rates: Vec<RateEntity>,
}

/// Self-contained snapshot of an interrupted match, read back in bulk at startup.
///
/// Durations are stored in nanoseconds so a restored match is the one that was stored.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchStateEntity {
    /// Join code; unique among stored snapshots.
    pub code: JoinCode,
    pub author_id: UserId,
    pub author_name: String,
    pub chat_id: ChatId,
    pub rounds_num: u32,
    #[serde_as(as = "DurationNanoSeconds<u64>")]
    pub round_time: Duration,
    #[serde_as(as = "DurationNanoSeconds<u64>")]
    pub timeout: Duration,
    pub categories: Vec<String>,
    pub letters: Vec<String>,
    pub bloopses: Vec<BonusTask>,
    pub vote: bool,
    /// Engine state at interruption time.
    pub state: MachineState,
    pub current_round: usize,
    pub created_at: SystemTime,
    pub players: Vec<PlayerEntity>,
}

impl From<User> for UserEntity {
    fn from(value: User) -> Self {
        Self {
            id: value.id,
            first_name: value.first_name,
            last_name: value.last_name,
            username: value.username,
            language_code: value.language_code,
            admin: value.admin,
            status: value.status,
            created_at: value.created_at,
        }
    }
}

impl From<UserEntity> for User {
    fn from(value: UserEntity) -> Self {
        Self {
            id: value.id,
            first_name: value.first_name,
            last_name: value.last_name,
            username: value.username,
            language_code: value.language_code,
            admin: value.admin,
            status: value.status,
            created_at: value.created_at,
            stars: 0,
            bloops: 0,
        }
    }
}

impl From<Rate> for RateEntity {
    fn from(value: Rate) -> Self {
        Self {
            duration: value.duration,
            points: value.points,
            bonus: value.bonus,
            bonus_name: value.bonus_name,
        }
    }
}

impl From<RateEntity> for Rate {
    fn from(value: RateEntity) -> Self {
        Self {
            duration: value.duration,
            points: value.points,
            bonus: value.bonus,
            bonus_name: value.bonus_name,
        }
    }
}

impl From<Player> for PlayerEntity {
    fn from(value: Player) -> Self {
        Self {
            user_id: value.user_id,
            name: value.name,
            offline: value.offline,
            rates: value.rates.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<PlayerEntity> for Player {
    fn from(value: PlayerEntity) -> Self {
        Self {
            user_id: value.user_id,
            name: value.name,
            offline: value.offline,
            rates: value.rates.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<MatchSnapshot> for MatchStateEntity {
    fn from(value: MatchSnapshot) -> Self {
        let MatchSnapshot {
            config,
            players,
            current_round,
            state,
            created_at,
        } = value;

        Self {
            code: config.code,
            author_id: config.author_id,
            author_name: config.author_name,
            chat_id: config.chat_id,
            rounds_num: config.rounds_num,
            round_time: config.round_time,
            timeout: config.timeout,
            categories: config.categories,
            letters: config.letters,
            bloopses: config.bonus_tasks,
            vote: config.vote,
            state,
            current_round,
            created_at,
            players: players.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<MatchStateEntity> for MatchSnapshot {
    fn from(value: MatchStateEntity) -> Self {
        Self {
            config: MatchConfig {
                code: value.code,
                author_id: value.author_id,
                author_name: value.author_name,
                chat_id: value.chat_id,
                rounds_num: value.rounds_num,
                round_time: value.round_time,
                timeout: value.timeout,
                categories: value.categories,
                letters: value.letters,
                bonus_tasks: value.bloopses,
                vote: value.vote,
            },
            players: value.players.into_iter().map(Into::into).collect(),
            current_round: value.current_round,
            state: value.state,
            created_at: value.created_at,
        }
    }
}
