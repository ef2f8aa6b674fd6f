//! Statistics aggregation for finished matches.

use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::models::{Conclusion, StatEntity},
    engine::MatchHandle,
    error::ServiceError,
    state::{
        SharedState,
        session::{MatchSnapshot, Player, Rate},
    },
};

/// Aggregate of one player's rates.
///
/// Duration figures only count regular turns; point figures count every turn, bonus
/// tasks included. Without any qualifying turn the figures are zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateSummary {
    /// Total time of regular turns.
    pub sum_duration: Duration,
    /// Fastest regular turn.
    pub best_duration: Duration,
    /// Slowest regular turn.
    pub worst_duration: Duration,
    /// Mean regular turn time.
    pub average_duration: Duration,
    /// Total points.
    pub sum_points: i64,
    /// Highest points in a turn.
    pub best_points: i64,
    /// Lowest points in a turn.
    pub worst_points: i64,
    /// Mean points, truncated towards zero.
    pub average_points: i64,
    /// Names of the bonus tasks completed, in round order.
    pub bloops: Vec<String>,
}

/// Fold `rates` into a [`RateSummary`].
pub fn fold_rates(rates: &[Rate]) -> RateSummary {
    let mut summary = RateSummary::default();

    let durations: Vec<Duration> = rates
        .iter()
        .filter(|rate| !rate.bonus)
        .map(|rate| rate.duration)
        .collect();
    if let (Some(best), Some(worst)) = (durations.iter().min(), durations.iter().max()) {
        summary.best_duration = *best;
        summary.worst_duration = *worst;
        summary.sum_duration = durations.iter().sum();
        summary.average_duration = summary.sum_duration / durations.len() as u32;
    }

    let points: Vec<i64> = rates.iter().map(|rate| i64::from(rate.points)).collect();
    if let (Some(best), Some(worst)) = (points.iter().max(), points.iter().min()) {
        summary.best_points = *best;
        summary.worst_points = *worst;
        summary.sum_points = points.iter().sum();
        summary.average_points = summary.sum_points / points.len() as i64;
    }

    summary.bloops = rates
        .iter()
        .filter(|rate| rate.bonus)
        .map(|rate| rate.bonus_name.clone().unwrap_or_default())
        .collect();

    summary
}

/// One record per online player of `snapshot`; offline players leave no trace.
pub fn build_stat_records(
    snapshot: &MatchSnapshot,
    favorites: &[Player],
    finished_at: OffsetDateTime,
) -> Vec<StatEntity> {
    snapshot
        .online_players()
        .map(|player| {
            let conclusion = if favorites
                .iter()
                .any(|favorite| favorite.user_id == player.user_id)
            {
                Conclusion::Favorite
            } else {
                Conclusion::None
            };
            let summary = fold_rates(&player.rates);

            StatEntity {
                id: Uuid::new_v4(),
                user_id: player.user_id,
                created_at: finished_at,
                conclusion,
                categories: snapshot.config.categories.clone(),
                rounds_num: snapshot.config.rounds_num,
                players_num: snapshot.players.len(),
                bloops: summary.bloops,
                sum_duration: summary.sum_duration,
                best_duration: summary.best_duration,
                worst_duration: summary.worst_duration,
                average_duration: summary.average_duration,
                sum_points: summary.sum_points,
                best_points: summary.best_points,
                worst_points: summary.worst_points,
                average_points: summary.average_points,
            }
        })
        .collect()
}

/// Record the results of a finished match, then deregister it.
///
/// Records are written one by one and the first failure stops the pass. The match is
/// deregistered in every case.
pub async fn on_match_finished(
    state: &SharedState,
    session: Arc<dyn MatchHandle>,
) -> Result<(), ServiceError> {
    let code = session.code();
    let snapshot = session.snapshot();
    let records = build_stat_records(&snapshot, &session.favorites(), OffsetDateTime::now_utc());

    let mut written = 0usize;
    let mut outcome = Ok(());
    for record in records {
        if let Err(err) = state.stores().stats.add(record).await {
            outcome = Err(ServiceError::storage("append stat")(err));
            break;
        }
        written += 1;
    }

    state.registry().unregister_match(code).await;
    if outcome.is_ok() {
        info!(%code, records = written, "match finished");
    } else {
        debug!(%code, records = written, "match finished with incomplete statistics");
    }
    outcome
}
