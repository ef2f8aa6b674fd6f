//! Crash recovery: persist matches on interruption and bring them back at startup.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    dao::models::MatchStateEntity,
    engine::MatchHandle,
    error::ServiceError,
    services::shutdown,
    state::{SharedState, session::MatchSnapshot},
};

/// Persist the snapshot of an interrupted match, then deregister it with its members.
///
/// Both steps run under the registry's exclusive lock, so no event reaches the match
/// once its state has been captured. The match is deregistered even when the write
/// fails; the failure is returned.
pub async fn persist_interrupted(
    state: &SharedState,
    session: Arc<dyn MatchHandle>,
) -> Result<(), ServiceError> {
    let code = session.code();
    let stores = state.stores();

    let result = state
        .registry()
        .retire_match(code, || async {
            let entity = MatchStateEntity::from(session.snapshot());
            stores.match_states.add(entity).await
        })
        .await;

    match result {
        Ok(()) => {
            info!(%code, "interrupted match persisted");
            Ok(())
        }
        Err(err) => Err(ServiceError::storage("persist interrupted match")(err)),
    }
}

/// Resume every match interrupted by the previous process.
///
/// All snapshots are resumed and registered, members included, before any match is
/// moved back into its state, so entry side effects can reach every player. Stored
/// snapshots are cleaned afterwards; a missing collection counts as already clean.
pub async fn restore_interrupted_matches(state: &SharedState) -> Result<usize, ServiceError> {
    let stored = state
        .stores()
        .match_states
        .fetch_all()
        .await
        .map_err(ServiceError::storage("fetch interrupted matches"))?;
    if stored.is_empty() {
        info!("no interrupted matches to restore");
        return Ok(0);
    }

    let registry = state.registry();
    let mut restored = Vec::with_capacity(stored.len());
    for entity in stored {
        let snapshot = MatchSnapshot::from(entity);
        let code = snapshot.config.code;
        let current = snapshot.state.clone();
        let members: Vec<_> = snapshot.online_players().map(|player| player.user_id).collect();

        let session = state.engines().matches.resume(snapshot, state.hooks());
        registry.register_match(code, session.clone()).await;
        for member in members {
            registry.register_match_member(member, code).await;
        }
        session.run(state.session_scope().child_token());
        restored.push((session, current));
    }

    for (session, current) in &restored {
        session.move_state(current.clone());
    }

    match state.stores().match_states.clean().await {
        Ok(()) => {}
        Err(err) if err.is_missing_bucket() => {
            warn!(error = %err, "match state collection already gone");
        }
        Err(err) => return Err(ServiceError::storage("clean interrupted matches")(err)),
    }

    info!(count = restored.len(), "interrupted matches restored");
    Ok(restored.len())
}

/// Startup variant of [`restore_interrupted_matches`]: when restoring fails, every
/// session resumed so far is drained, which persists its snapshot again, before the
/// error is returned. The caller must not serve events afterwards.
pub async fn restore_or_drain(state: &SharedState) -> Result<usize, ServiceError> {
    match restore_interrupted_matches(state).await {
        Ok(restored) => Ok(restored),
        Err(err) => {
            warn!(error = %err, "restore failed; draining resumed matches");
            shutdown::drain(state).await;
            Err(err)
        }
    }
}
