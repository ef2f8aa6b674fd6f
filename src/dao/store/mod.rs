//! Storage collaborators of the orchestration layer and their backends.

#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{
    dao::{
        models::{Conclusion, MatchStateEntity, StatEntity, UserEntity},
        storage::StorageResult,
    },
    state::session::{Rating, UserId},
};

/// Identity store.
pub trait UserStore: Send + Sync {
    /// Load a user. Unknown users are `None`.
    fn fetch(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<UserEntity>>>;
    /// Look a user up by handle, given without the leading `@`.
    fn find_by_username(
        &self,
        username: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>>;
    /// Insert or replace a user.
    fn store(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>>;
}

/// Append-only match results.
pub trait StatStore: Send + Sync {
    /// Aggregate rating of a user. Users without records are `None`.
    fn fetch_rating(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<Rating>>>;
    /// Append one record.
    fn add(&self, stat: StatEntity) -> BoxFuture<'static, StorageResult<()>>;
}

/// Snapshots of matches interrupted by a shutdown.
pub trait MatchStateStore: Send + Sync {
    /// Every stored snapshot. An empty store yields an empty list.
    fn fetch_all(&self) -> BoxFuture<'static, StorageResult<Vec<MatchStateEntity>>>;
    /// Store one snapshot, replacing any snapshot with the same code.
    fn add(&self, state: MatchStateEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove every snapshot. May report [`StorageError::MissingBucket`] when nothing
    /// was ever stored.
    ///
    /// [`StorageError::MissingBucket`]: crate::dao::storage::StorageError::MissingBucket
    fn clean(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Liveness probe of a backend.
pub trait HealthCheck: Send + Sync {
    /// Succeeds when the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Storage collaborators handed to the services.
#[derive(Clone)]
pub struct Stores {
    /// Users.
    pub users: Arc<dyn UserStore>,
    /// Stat records.
    pub stats: Arc<dyn StatStore>,
    /// Interrupted match snapshots.
    pub match_states: Arc<dyn MatchStateStore>,
    /// Backend liveness.
    pub health: Arc<dyn HealthCheck>,
}

impl Stores {
    /// Use a single backend for every concern.
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: UserStore + StatStore + MatchStateStore + HealthCheck + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            users: backend.clone(),
            stats: backend.clone(),
            match_states: backend.clone(),
            health: backend,
        }
    }
}

/// Fold a user's stat records into a rating. No records means no rating.
pub(crate) fn rating_from<'a>(records: impl IntoIterator<Item = &'a StatEntity>) -> Option<Rating> {
    records.into_iter().fold(None, |rating, record| {
        let Rating { stars, bloops } = rating.unwrap_or_default();
        Some(Rating {
            stars: stars + u64::from(record.conclusion == Conclusion::Favorite),
            bloops: bloops + record.bloops.len() as u64,
        })
    })
}
