use mongodb::error::{Error as MongoError, ErrorKind};
use thiserror::Error;

use crate::dao::storage::StorageError;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Server code reported when a collection does not exist.
const NAMESPACE_NOT_FOUND: i32 = 26;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to load user `{id}`")]
    LoadUser {
        id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to find user `{username}`")]
    FindUser {
        username: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to save user `{id}`")]
    SaveUser {
        id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to load stats of user `{id}`")]
    LoadStats {
        id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to append stat for user `{id}`")]
    AppendStat {
        id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to list match states")]
    ListMatchStates {
        #[source]
        source: MongoError,
    },
    #[error("failed to save match state `{code}`")]
    SaveMatchState {
        code: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to drop collection `{collection}`")]
    DropCollection {
        collection: &'static str,
        #[source]
        source: MongoError,
    },
}

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::DropCollection { collection, source }
                if is_namespace_not_found(&source) =>
            {
                StorageError::MissingBucket {
                    bucket: collection.to_owned(),
                }
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}

fn is_namespace_not_found(err: &MongoError) -> bool {
    matches!(err.kind.as_ref(), ErrorKind::Command(command) if command.code == NAMESPACE_NOT_FOUND)
}
