//! Process-local backend, used when no database is configured and in tests.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;

use crate::{
    dao::{
        models::{MatchStateEntity, StatEntity, UserEntity},
        storage::StorageResult,
    },
    state::session::{JoinCode, Rating, UserId},
};

use super::{HealthCheck, MatchStateStore, StatStore, UserStore, rating_from};

/// In-memory store backed by concurrent maps. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    users: DashMap<UserId, UserEntity>,
    stats: DashMap<UserId, Vec<StatEntity>>,
    match_states: DashMap<JoinCode, MatchStateEntity>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stat record of `user`, oldest first.
    pub fn stats_of(&self, user: UserId) -> Vec<StatEntity> {
        self.inner
            .stats
            .get(&user)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Number of stored match snapshots.
    pub fn match_state_count(&self) -> usize {
        self.inner.match_states.len()
    }
}

impl UserStore for MemoryStore {
    fn fetch(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.users.get(&id).map(|user| user.clone())) })
    }

    fn find_by_username(
        &self,
        username: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .users
                .iter()
                .find(|entry| entry.username.eq_ignore_ascii_case(&username))
                .map(|entry| entry.value().clone()))
        })
    }

    fn store(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.users.insert(user.id, user);
            Ok(())
        })
    }
}

impl StatStore for MemoryStore {
    fn fetch_rating(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<Rating>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .stats
                .get(&id)
                .and_then(|records| rating_from(records.iter())))
        })
    }

    fn add(&self, stat: StatEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.stats.entry(stat.user_id).or_default().push(stat);
            Ok(())
        })
    }
}

impl MatchStateStore for MemoryStore {
    fn fetch_all(&self) -> BoxFuture<'static, StorageResult<Vec<MatchStateEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut states: Vec<_> = store
                .inner
                .match_states
                .iter()
                .map(|entry| entry.value().clone())
                .collect();
            states.sort_by_key(|state| state.code);
            Ok(states)
        })
    }

    fn add(&self, state: MatchStateEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.match_states.insert(state.code, state);
            Ok(())
        })
    }

    fn clean(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.match_states.clear();
            Ok(())
        })
    }
}

impl HealthCheck for MemoryStore {
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::dao::models::Conclusion;

    fn record(user: UserId, conclusion: Conclusion, bloops: &[&str]) -> StatEntity {
        StatEntity {
            id: Uuid::new_v4(),
            user_id: user,
            created_at: OffsetDateTime::UNIX_EPOCH,
            conclusion,
            categories: vec!["Animals".into()],
            rounds_num: 1,
            players_num: 2,
            bloops: bloops.iter().map(|name| name.to_string()).collect(),
            sum_duration: Default::default(),
            best_duration: Default::default(),
            worst_duration: Default::default(),
            average_duration: Default::default(),
            sum_points: 0,
            best_points: 0,
            worst_points: 0,
            average_points: 0,
        }
    }

    #[tokio::test]
    async fn rating_counts_favorites_and_bloops() {
        let store = MemoryStore::new();
        let user = UserId(5);
        assert_eq!(store.fetch_rating(user).await.unwrap(), None);

        StatStore::add(&store, record(user, Conclusion::Favorite, &["Whisper"]))
            .await
            .unwrap();
        StatStore::add(&store, record(user, Conclusion::None, &["Sing", "Dance"]))
            .await
            .unwrap();
        StatStore::add(&store, record(UserId(6), Conclusion::Favorite, &[]))
            .await
            .unwrap();

        assert_eq!(
            store.fetch_rating(user).await.unwrap(),
            Some(Rating { stars: 1, bloops: 3 })
        );
    }

    #[tokio::test]
    async fn clean_on_empty_store_succeeds() {
        let store = MemoryStore::new();
        store.clean().await.unwrap();
        assert!(store.fetch_all().await.unwrap().is_empty());
    }
}
