//! Keyed record collections.
//!
//! Every entity lives in a named collection of JSON objects keyed by an
//! opaque `_id`. Two backends implement [`RecordStore`]: [`MemoryStore`]
//! keeps everything in process, [`SqlStore`] persists the same documents
//! through `sqlx`. Callers only see the trait, so the backend can be swapped
//! from configuration.

use crate::config::{Config, get_config};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use eyre::{WrapErr, bail, eyre};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[cfg(test)]
mod failing;
mod memory;
mod sql;

#[cfg(test)]
pub use failing::FailingStore;
pub use memory::MemoryStore;
pub use sql::SqlStore;

pub type Document = serde_json::Map<String, Value>;

pub const ID_FIELD: &str = "_id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Collection {
    Users,
    Students,
    Supervisors,
    Projects,
    Allocations,
    Progress,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Students => "students",
            Collection::Supervisors => "supervisors",
            Collection::Projects => "projects",
            Collection::Allocations => "allocations",
            Collection::Progress => "progress",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection}.{field} already holds {value:?}")]
    Duplicate {
        collection: Collection,
        field: String,
        value: String,
    },
    #[error("record for {0} is not a JSON object")]
    NotADocument(Collection),
    #[error("record in {collection} has no string field {field}")]
    MissingKey {
        collection: Collection,
        field: String,
    },
    #[error("cannot convert record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Conjunction of field equalities, the only query shape callers need.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((field.to_owned(), value.into()));
        self
    }

    pub fn eq_opt<V: Into<Value>>(self, field: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.eq(field, value),
            None => self,
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value))
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store a new record, assigning `_id` and timestamps when missing.
    async fn insert(&self, collection: Collection, doc: Document) -> Result<Document, StoreError>;

    /// Like [`RecordStore::insert`], but rejects the record if another one
    /// in the collection holds the same value for `field`.
    async fn insert_unique(
        &self,
        collection: Collection,
        doc: Document,
        field: &str,
    ) -> Result<Document, StoreError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError>;

    /// Batched point lookups. Unknown ids are skipped.
    async fn get_many(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<Vec<Document>, StoreError>;

    async fn query(&self, collection: Collection, filter: &Filter)
    -> Result<Vec<Document>, StoreError>;

    /// Shallow merge of `patch` into the record. `_id` and `createdAt` are
    /// never overwritten, `updatedAt` is refreshed.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
    ) -> Result<Option<Document>, StoreError>;

    /// Like [`RecordStore::update`], moving the record's claim on `field`
    /// to the value carried by `patch`. Fails if another record of the
    /// collection holds that value.
    async fn update_unique(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
        field: &str,
    ) -> Result<Option<Document>, StoreError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool, StoreError>;

    async fn clear(&self, collection: Collection) -> Result<usize, StoreError>;
}

/// Typed view of a collection member.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
}

pub fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

pub async fn fetch<T: Record>(store: &dyn RecordStore, id: &str) -> Result<Option<T>, StoreError> {
    store
        .get(T::COLLECTION, id)
        .await?
        .map(from_document)
        .transpose()
}

pub async fn fetch_many<T: Record>(
    store: &dyn RecordStore,
    ids: &[String],
) -> Result<Vec<T>, StoreError> {
    store
        .get_many(T::COLLECTION, ids)
        .await?
        .into_iter()
        .map(from_document)
        .collect()
}

pub async fn fetch_all<T: Record>(
    store: &dyn RecordStore,
    filter: &Filter,
) -> Result<Vec<T>, StoreError> {
    store
        .query(T::COLLECTION, filter)
        .await?
        .into_iter()
        .map(from_document)
        .collect()
}

pub async fn create<T: Record>(store: &dyn RecordStore, doc: Document) -> Result<T, StoreError> {
    from_document(store.insert(T::COLLECTION, doc).await?)
}

pub async fn create_unique<T: Record>(
    store: &dyn RecordStore,
    doc: Document,
    field: &str,
) -> Result<T, StoreError> {
    from_document(store.insert_unique(T::COLLECTION, doc, field).await?)
}

pub async fn patch<T: Record>(
    store: &dyn RecordStore,
    id: &str,
    patch: Document,
) -> Result<Option<T>, StoreError> {
    store
        .update(T::COLLECTION, id, patch)
        .await?
        .map(from_document)
        .transpose()
}

pub async fn patch_unique<T: Record>(
    store: &dyn RecordStore,
    id: &str,
    patch: Document,
    field: &str,
) -> Result<Option<T>, StoreError> {
    store
        .update_unique(T::COLLECTION, id, patch, field)
        .await?
        .map(from_document)
        .transpose()
}

fn timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Fill in `_id` and timestamps of a record about to be inserted.
fn stamp_new(collection: Collection, mut doc: Document) -> Result<(String, Document), StoreError> {
    if !doc.contains_key(ID_FIELD) {
        doc.insert(
            ID_FIELD.to_owned(),
            Value::String(uuid::Uuid::new_v4().simple().to_string()),
        );
    }
    let now = timestamp();
    doc.entry(CREATED_AT_FIELD).or_insert_with(|| now.clone());
    doc.insert(UPDATED_AT_FIELD.to_owned(), now);
    let id = string_field(collection, &doc, ID_FIELD)?;
    Ok((id, doc))
}

fn merge(doc: &mut Document, patch: Document) {
    for (key, value) in patch {
        if key != ID_FIELD && key != CREATED_AT_FIELD {
            doc.insert(key, value);
        }
    }
    doc.insert(UPDATED_AT_FIELD.to_owned(), timestamp());
}

fn string_field(collection: Collection, doc: &Document, field: &str) -> Result<String, StoreError> {
    doc.get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| StoreError::MissingKey {
            collection,
            field: field.to_owned(),
        })
}

/// Open the record store described by the `[store]` configuration section.
///
/// When the SQL backend is unreachable and `store.fallback` is set (the
/// default), the in-memory store is used instead and a warning is logged.
pub async fn open(config: &Config) -> eyre::Result<Arc<dyn RecordStore>> {
    let backend = get_config(config, "store", "backend").unwrap_or_else(|| "memory".to_owned());
    match &backend[..] {
        "memory" => {
            info!("using in-memory record store");
            Ok(Arc::new(MemoryStore::new()))
        }
        "sql" => {
            let url = get_config(config, "store", "url")
                .ok_or_else(|| eyre!("store.url is required by the sql backend"))?;
            let fallback = get_config(config, "store", "fallback")
                .map(|s| s.parse::<bool>())
                .transpose()
                .wrap_err("cannot parse store.fallback configuration parameter")?
                .unwrap_or(true);
            match SqlStore::connect(&url).await {
                Ok(store) => {
                    info!("using sql record store");
                    Ok(Arc::new(store))
                }
                Err(e) if fallback => {
                    warn!(
                        error = %e,
                        "database unreachable, nothing will be persisted",
                    );
                    Ok(Arc::new(MemoryStore::new()))
                }
                Err(e) => Err(e).wrap_err("cannot connect to database"),
            }
        }
        other => bail!("unknown store backend: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_all_conditions() {
        let doc = document(json!({"studentId": "s1", "projectId": "p1"}));
        assert!(Filter::new().matches(&doc));
        assert!(Filter::new().eq("studentId", "s1").matches(&doc));
        assert!(
            !Filter::new()
                .eq("studentId", "s1")
                .eq("projectId", "p2")
                .matches(&doc)
        );
        assert!(
            Filter::new()
                .eq_opt("projectId", None::<String>)
                .eq_opt("studentId", Some("s1"))
                .matches(&doc)
        );
    }

    #[test]
    fn merge_keeps_identity() {
        let (id, mut doc) =
            stamp_new(Collection::Projects, document(json!({"title": "A"}))).unwrap();
        let created = doc[CREATED_AT_FIELD].clone();
        merge(
            &mut doc,
            document(json!({"_id": "other", "createdAt": "never", "title": "B"})),
        );
        assert_eq!(doc[ID_FIELD], json!(id));
        assert_eq!(doc[CREATED_AT_FIELD], created);
        assert_eq!(doc["title"], json!("B"));
    }

    #[tokio::test]
    async fn open_defaults_to_memory() {
        let store = open(&Config::default()).await.unwrap();
        let doc = store
            .insert(Collection::Users, document(json!({"name": "x"})))
            .await
            .unwrap();
        assert!(doc.contains_key(ID_FIELD));
    }

    #[tokio::test]
    async fn open_rejects_unknown_backend() {
        let config = "[store]\nbackend = \"redis\"\n".parse::<Config>().unwrap();
        assert!(open(&config).await.is_err());
    }
}
