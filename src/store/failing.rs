use super::{Collection, Document, Filter, MemoryStore, RecordStore, StoreError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// In-memory store whose writes to chosen collections fail as if the
/// database had gone away.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    inserts: Mutex<HashSet<Collection>>,
    updates: Mutex<HashSet<Collection>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, collection: Collection) {
        lock(&self.inserts).insert(collection);
    }

    pub fn fail_updates(&self, collection: Collection) {
        lock(&self.updates).insert(collection);
    }

    pub fn heal(&self) {
        lock(&self.inserts).clear();
        lock(&self.updates).clear();
    }

    fn check(set: &Mutex<HashSet<Collection>>, collection: Collection) -> Result<(), StoreError> {
        if lock(set).contains(&collection) {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

fn lock(set: &Mutex<HashSet<Collection>>) -> std::sync::MutexGuard<'_, HashSet<Collection>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl RecordStore for FailingStore {
    async fn insert(&self, collection: Collection, doc: Document) -> Result<Document, StoreError> {
        Self::check(&self.inserts, collection)?;
        self.inner.insert(collection, doc).await
    }

    async fn insert_unique(
        &self,
        collection: Collection,
        doc: Document,
        field: &str,
    ) -> Result<Document, StoreError> {
        Self::check(&self.inserts, collection)?;
        self.inner.insert_unique(collection, doc, field).await
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn get_many(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.get_many(collection, ids).await
    }

    async fn query(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.query(collection, filter).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
    ) -> Result<Option<Document>, StoreError> {
        Self::check(&self.updates, collection)?;
        self.inner.update(collection, id, patch).await
    }

    async fn update_unique(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
        field: &str,
    ) -> Result<Option<Document>, StoreError> {
        Self::check(&self.updates, collection)?;
        self.inner.update_unique(collection, id, patch, field).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(collection, id).await
    }

    async fn clear(&self, collection: Collection) -> Result<usize, StoreError> {
        self.inner.clear(collection).await
    }
}
