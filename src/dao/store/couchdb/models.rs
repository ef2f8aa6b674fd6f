use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::state::session::{JoinCode, UserId};

pub const USER_PREFIX: &str = "user::";
pub const STAT_PREFIX: &str = "stat::";
pub const MATCH_STATE_PREFIX: &str = "matchstate::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Any entity wrapped with CouchDB's `_id` / `_rev` bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> CouchDocument<T> {
    pub fn new(id: String, body: T) -> Self {
        Self {
            id,
            rev: None,
            body,
        }
    }
}

/// Only the bookkeeping fields of a document, used when deleting in bulk.
#[derive(Debug, Deserialize)]
pub struct DocumentRevision {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev")]
    pub rev: String,
}

#[derive(Debug, Serialize)]
pub struct Tombstone {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev")]
    pub rev: String,
    #[serde(rename = "_deleted")]
    pub deleted: bool,
}

impl From<DocumentRevision> for Tombstone {
    fn from(value: DocumentRevision) -> Self {
        Self {
            id: value.id,
            rev: value.rev,
            deleted: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BulkDocsRequest<T> {
    pub docs: Vec<T>,
}

pub fn user_doc_id(id: UserId) -> String {
    format!("{USER_PREFIX}{id}")
}

/// Stat ids start with the user so a user's records form one key range.
pub fn stat_doc_id(user: UserId, id: Uuid) -> String {
    format!("{}{}", stat_user_prefix(user), id)
}

pub fn stat_user_prefix(user: UserId) -> String {
    format!("{STAT_PREFIX}{user}::")
}

pub fn match_state_doc_id(code: JoinCode) -> String {
    format!("{MATCH_STATE_PREFIX}{code}")
}
