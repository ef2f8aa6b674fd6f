//! Graceful shutdown: stop ingestion, interrupt every session, wait until none is left.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::state::SharedState;

const DRAIN_TICK: Duration = Duration::from_millis(200);

/// Cancel both scopes and wait until every wizard and match has deregistered.
///
/// Wakes on each deregistration and at least every 200 ms. There is no deadline: a
/// session that never reports back keeps the process alive.
pub async fn drain(state: &SharedState) {
    state.run_scope().cancel();
    state.session_scope().cancel();

    let registry = state.registry();
    let mut ticker = time::interval(DRAIN_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let released = registry.released();
        let counts = registry.session_counts().await;
        if counts.total() == 0 {
            break;
        }
        debug!(
            wizards = counts.wizards,
            matches = counts.matches,
            "waiting for sessions to drain"
        );

        tokio::select! {
            _ = released => {}
            _ = ticker.tick() => {}
        }
    }

    info!("all sessions drained");
}
