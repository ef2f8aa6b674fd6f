use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use tracing::debug;

use crate::{
    dao::{
        models::{MatchStateEntity, StatEntity, UserEntity},
        storage::StorageResult,
        store::{HealthCheck, MatchStateStore, StatStore, UserStore, rating_from},
    },
    state::session::{Rating, UserId},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, BulkDocsRequest, CouchDocument, DocumentRevision, END_SUFFIX,
        MATCH_STATE_PREFIX, Tombstone, USER_PREFIX, match_state_doc_id, stat_doc_id, stat_user_prefix,
        user_doc_id,
    },
};

const ALL_DOCS: &str = "_all_docs";
const BULK_DOCS: &str = "_bulk_docs";

/// CouchDB backend keeping every entity kind in one database, separated by id prefix.
#[derive(Clone)]
pub struct CouchStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.with_auth(self.client.request(method, url))
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .with_auth(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    debug!(%database, "created CouchDB database");
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<CouchDocument<T>>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CouchDocument<T>>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: doc_id.to_string(),
                    source,
                }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, document: &CouchDocument<T>) -> CouchResult<()>
    where
        T: Serialize,
    {
        let response = self
            .request(Method::PUT, &document.id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: document.id.clone(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: document.id.clone(),
                status: response.status(),
            })
        }
    }

    /// Insert or replace, reusing the current revision when the document exists.
    async fn upsert_document<T>(&self, mut document: CouchDocument<T>) -> CouchResult<()>
    where
        T: Serialize,
    {
        if let Some(existing) = self
            .get_document::<serde_json::Value>(&document.id)
            .await?
        {
            document.rev = existing.rev;
        }
        self.put_document(&document).await
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(CouchDaoError::MissingDatabase {
                    database: self.database.to_string(),
                });
            }
            status if !status.is_success() => {
                return Err(CouchDaoError::RequestStatus {
                    path: ALL_DOCS.to_string(),
                    status,
                });
            }
            _ => {}
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let mut documents = Vec::new();
        for row in payload.rows {
            if let Some(doc) = row.doc {
                let parsed = from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: row.id,
                    source,
                })?;
                documents.push(parsed);
            }
        }

        Ok(documents)
    }

    async fn delete_prefix(&self, prefix: &str) -> CouchResult<usize> {
        let docs: Vec<Tombstone> = self
            .list_documents::<DocumentRevision>(prefix)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
        if docs.is_empty() {
            return Ok(0);
        }

        let count = docs.len();
        let response = self
            .request(Method::POST, BULK_DOCS)
            .json(&BulkDocsRequest { docs })
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: BULK_DOCS.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(count)
        } else {
            Err(CouchDaoError::RequestStatus {
                path: BULK_DOCS.to_string(),
                status: response.status(),
            })
        }
    }
}

impl UserStore for CouchStore {
    fn fetch(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store.get_document::<UserEntity>(&user_doc_id(id)).await?;
            Ok(doc.map(|doc| doc.body))
        })
    }

    fn find_by_username(
        &self,
        username: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let users = store
                .list_documents::<CouchDocument<UserEntity>>(USER_PREFIX)
                .await?;
            Ok(users
                .into_iter()
                .map(|doc| doc.body)
                .find(|user| user.username.eq_ignore_ascii_case(&username)))
        })
    }

    fn store(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = CouchDocument::new(user_doc_id(user.id), user);
            store.upsert_document(doc).await.map_err(Into::into)
        })
    }
}

impl StatStore for CouchStore {
    fn fetch_rating(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<Rating>>> {
        let store = self.clone();
        Box::pin(async move {
            let records = store
                .list_documents::<CouchDocument<StatEntity>>(&stat_user_prefix(id))
                .await?;
            Ok(rating_from(records.iter().map(|doc| &doc.body)))
        })
    }

    fn add(&self, stat: StatEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = CouchDocument::new(stat_doc_id(stat.user_id, stat.id), stat);
            store.put_document(&doc).await.map_err(Into::into)
        })
    }
}

impl MatchStateStore for CouchStore {
    fn fetch_all(&self) -> BoxFuture<'static, StorageResult<Vec<MatchStateEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let docs = store
                .list_documents::<CouchDocument<MatchStateEntity>>(MATCH_STATE_PREFIX)
                .await?;
            Ok(docs.into_iter().map(|doc| doc.body).collect())
        })
    }

    fn add(&self, state: MatchStateEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = CouchDocument::new(match_state_doc_id(state.code), state);
            store.upsert_document(doc).await.map_err(Into::into)
        })
    }

    fn clean(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let removed = store.delete_prefix(MATCH_STATE_PREFIX).await?;
            debug!(removed, "removed stored match states");
            Ok(())
        })
    }
}

impl HealthCheck for CouchStore {
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .with_auth(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            match response.status() {
                status if status.is_success() => Ok(()),
                StatusCode::NOT_FOUND => Err(CouchDaoError::MissingDatabase {
                    database: store.database.to_string(),
                }
                .into()),
                status => Err(CouchDaoError::RequestStatus { path: url, status }.into()),
            }
        })
    }
}
