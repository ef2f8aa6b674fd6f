use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
};
use crate::{
    dao::{
        models::{MatchStateEntity, StatEntity, UserEntity},
        storage::StorageResult,
        store::{HealthCheck, MatchStateStore, StatStore, UserStore, rating_from},
    },
    state::session::{Rating, UserId},
};

const USER_COLLECTION_NAME: &str = "users";
const STAT_COLLECTION_NAME: &str = "stats";
const MATCH_STATE_COLLECTION_NAME: &str = "match_states";

/// MongoDB backend with one collection per entity kind.
#[derive(Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let store = Self { database };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = &self.database;

        for (collection, field, name, unique) in [
            (USER_COLLECTION_NAME, "id", "user_id_idx", true),
            (STAT_COLLECTION_NAME, "user_id", "stat_user_idx", false),
            (MATCH_STATE_COLLECTION_NAME, "code", "match_state_code_idx", true),
        ] {
            let index = IndexModel::builder()
                .keys(doc! { field: 1 })
                .options(
                    IndexOptions::builder()
                        .name(Some(name.to_owned()))
                        .unique(Some(unique))
                        .build(),
                )
                .build();

            database
                .collection::<Document>(collection)
                .create_index(index)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index: field,
                    source,
                })?;
        }

        Ok(())
    }

    fn users(&self) -> Collection<UserEntity> {
        self.database.collection(USER_COLLECTION_NAME)
    }

    fn stats(&self) -> Collection<StatEntity> {
        self.database.collection(STAT_COLLECTION_NAME)
    }

    fn match_states(&self) -> Collection<MatchStateEntity> {
        self.database.collection(MATCH_STATE_COLLECTION_NAME)
    }

    async fn fetch_user(&self, id: UserId) -> MongoResult<Option<UserEntity>> {
        self.users()
            .find_one(doc! { "id": id.0 })
            .await
            .map_err(|source| MongoDaoError::LoadUser { id: id.0, source })
    }

    async fn find_user_by_username(&self, username: String) -> MongoResult<Option<UserEntity>> {
        self.users()
            .find_one(doc! { "username": &username })
            .await
            .map_err(|source| MongoDaoError::FindUser { username, source })
    }

    async fn store_user(&self, user: UserEntity) -> MongoResult<()> {
        let id = user.id.0;
        self.users()
            .replace_one(doc! { "id": id }, &user)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveUser { id, source })?;
        Ok(())
    }

    async fn fetch_rating(&self, id: UserId) -> MongoResult<Option<Rating>> {
        let records: Vec<StatEntity> = self
            .stats()
            .find(doc! { "user_id": id.0 })
            .await
            .map_err(|source| MongoDaoError::LoadStats { id: id.0, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadStats { id: id.0, source })?;

        Ok(rating_from(records.iter()))
    }

    async fn add_stat(&self, stat: StatEntity) -> MongoResult<()> {
        let id = stat.user_id.0;
        self.stats()
            .insert_one(&stat)
            .await
            .map_err(|source| MongoDaoError::AppendStat { id, source })?;
        Ok(())
    }

    async fn fetch_match_states(&self) -> MongoResult<Vec<MatchStateEntity>> {
        self.match_states()
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::ListMatchStates { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListMatchStates { source })
    }

    async fn add_match_state(&self, state: MatchStateEntity) -> MongoResult<()> {
        let code = state.code.0;
        self.match_states()
            .replace_one(doc! { "code": code }, &state)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveMatchState { code, source })?;
        Ok(())
    }

    async fn drop_match_states(&self) -> MongoResult<()> {
        self.match_states()
            .drop()
            .await
            .map_err(|source| MongoDaoError::DropCollection {
                collection: MATCH_STATE_COLLECTION_NAME,
                source,
            })
    }

    async fn ping(&self) -> MongoResult<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }
}

impl UserStore for MongoStore {
    fn fetch(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.fetch_user(id).await.map_err(Into::into) })
    }

    fn find_by_username(
        &self,
        username: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_user_by_username(username).await.map_err(Into::into) })
    }

    fn store(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.store_user(user).await.map_err(Into::into) })
    }
}

impl StatStore for MongoStore {
    fn fetch_rating(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<Rating>>> {
        let store = self.clone();
        Box::pin(async move { store.fetch_rating(id).await.map_err(Into::into) })
    }

    fn add(&self, stat: StatEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.add_stat(stat).await.map_err(Into::into) })
    }
}

impl MatchStateStore for MongoStore {
    fn fetch_all(&self) -> BoxFuture<'static, StorageResult<Vec<MatchStateEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.fetch_match_states().await.map_err(Into::into) })
    }

    fn add(&self, state: MatchStateEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.add_match_state(state).await.map_err(Into::into) })
    }

    fn clean(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.drop_match_states().await.map_err(Into::into) })
    }
}

impl HealthCheck for MongoStore {
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }
}
