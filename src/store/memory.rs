use super::{
    Collection, Document, Filter, RecordStore, StoreError, merge, stamp_new, string_field,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    records: HashMap<Collection, BTreeMap<String, Document>>,
    // (collection, field, value) -> id of the record holding the value
    unique: HashMap<(Collection, String, String), String>,
}

impl Tables {
    fn collection(&mut self, collection: Collection) -> &mut BTreeMap<String, Document> {
        self.records.entry(collection).or_default()
    }

    fn release_keys(&mut self, collection: Collection, id: &str) {
        self.unique
            .retain(|(c, _, _), holder| *c != collection || holder != id);
    }
}

/// Process-local record store. Every operation holds the table lock for
/// its whole duration, so each call is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, collection: Collection, doc: Document) -> Result<Document, StoreError> {
        let (id, doc) = stamp_new(collection, doc)?;
        self.tables
            .write()
            .await
            .collection(collection)
            .insert(id, doc.clone());
        Ok(doc)
    }

    async fn insert_unique(
        &self,
        collection: Collection,
        doc: Document,
        field: &str,
    ) -> Result<Document, StoreError> {
        let value = string_field(collection, &doc, field)?;
        let (id, doc) = stamp_new(collection, doc)?;
        let mut tables = self.tables.write().await;
        let key = (collection, field.to_owned(), value);
        if tables.unique.contains_key(&key) {
            return Err(StoreError::Duplicate {
                collection,
                field: key.1,
                value: key.2,
            });
        }
        tables.unique.insert(key, id.clone());
        tables.collection(collection).insert(id, doc.clone());
        Ok(doc)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .records
            .get(&collection)
            .and_then(|records| records.get(id))
            .cloned())
    }

    async fn get_many(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<Vec<Document>, StoreError> {
        let tables = self.tables.read().await;
        let Some(records) = tables.records.get(&collection) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| records.get(id)).cloned().collect())
    }

    async fn query(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .records
            .get(&collection)
            .map(|records| {
                records
                    .values()
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
    ) -> Result<Option<Document>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.collection(collection).get_mut(id).map(|doc| {
            merge(doc, patch);
            doc.clone()
        }))
    }

    async fn update_unique(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
        field: &str,
    ) -> Result<Option<Document>, StoreError> {
        let value = string_field(collection, &patch, field)?;
        let mut tables = self.tables.write().await;
        if !tables.collection(collection).contains_key(id) {
            return Ok(None);
        }
        let key = (collection, field.to_owned(), value);
        if tables.unique.get(&key).is_some_and(|holder| holder != id) {
            return Err(StoreError::Duplicate {
                collection,
                field: key.1,
                value: key.2,
            });
        }
        tables
            .unique
            .retain(|(c, f, _), holder| *c != collection || f != field || holder != id);
        tables.unique.insert(key, id.to_owned());
        Ok(tables.collection(collection).get_mut(id).map(|doc| {
            merge(doc, patch);
            doc.clone()
        }))
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let removed = tables.collection(collection).remove(id).is_some();
        if removed {
            tables.release_keys(collection, id);
        }
        Ok(removed)
    }

    async fn clear(&self, collection: Collection) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let removed = tables.records.remove(&collection).map_or(0, |r| r.len());
        tables.unique.retain(|(c, _, _), _| *c != collection);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ID_FIELD, document};
    use serde_json::json;

    #[tokio::test]
    async fn crud_cycle() {
        let store = MemoryStore::new();
        let doc = store
            .insert(Collection::Projects, document(json!({"title": "Drones"})))
            .await
            .unwrap();
        let id = doc[ID_FIELD].as_str().unwrap().to_owned();
        assert_eq!(
            store.get(Collection::Projects, &id).await.unwrap(),
            Some(doc)
        );
        assert!(store.get(Collection::Students, &id).await.unwrap().is_none());

        let updated = store
            .update(Collection::Projects, &id, document(json!({"title": "Robots"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["title"], json!("Robots"));
        assert!(
            store
                .update(Collection::Projects, "missing", Document::new())
                .await
                .unwrap()
                .is_none()
        );

        assert!(store.delete(Collection::Projects, &id).await.unwrap());
        assert!(!store.delete(Collection::Projects, &id).await.unwrap());
    }

    #[tokio::test]
    async fn explicit_ids_are_kept() {
        let store = MemoryStore::new();
        store
            .insert(Collection::Students, document(json!({"_id": "s1"})))
            .await
            .unwrap();
        store
            .insert(Collection::Students, document(json!({"_id": "s2"})))
            .await
            .unwrap();
        let found = store
            .get_many(
                Collection::Students,
                &["s2".to_owned(), "nope".to_owned(), "s1".to_owned()],
            )
            .await
            .unwrap();
        let ids = found
            .iter()
            .map(|d| d[ID_FIELD].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["s2", "s1"]);
    }

    #[tokio::test]
    async fn unique_field_is_enforced_until_delete() {
        let store = MemoryStore::new();
        let first = store
            .insert_unique(
                Collection::Users,
                document(json!({"email": "a@b.c"})),
                "email",
            )
            .await
            .unwrap();
        let err = store
            .insert_unique(
                Collection::Users,
                document(json!({"email": "a@b.c"})),
                "email",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));

        let id = first[ID_FIELD].as_str().unwrap();
        store.delete(Collection::Users, id).await.unwrap();
        store
            .insert_unique(
                Collection::Users,
                document(json!({"email": "a@b.c"})),
                "email",
            )
            .await
            .unwrap();
        assert_eq!(store.clear(Collection::Users).await.unwrap(), 1);
        assert!(
            store
                .query(Collection::Users, &Filter::new())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn unique_claims_follow_updates() {
        let store = MemoryStore::new();
        for (id, matric) in [("s1", "CS001"), ("s2", "CS002")] {
            store
                .insert_unique(
                    Collection::Students,
                    document(json!({"_id": id, "matricNumber": matric})),
                    "matricNumber",
                )
                .await
                .unwrap();
        }
        let taken = store
            .update_unique(
                Collection::Students,
                "s2",
                document(json!({"matricNumber": "CS001"})),
                "matricNumber",
            )
            .await;
        assert!(matches!(taken, Err(StoreError::Duplicate { .. })));

        let moved = store
            .update_unique(
                Collection::Students,
                "s1",
                document(json!({"matricNumber": "CS009"})),
                "matricNumber",
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved["matricNumber"], json!("CS009"));
        store
            .update_unique(
                Collection::Students,
                "s2",
                document(json!({"matricNumber": "CS001"})),
                "matricNumber",
            )
            .await
            .unwrap()
            .unwrap();
        assert!(
            store
                .update_unique(
                    Collection::Students,
                    "ghost",
                    document(json!({"matricNumber": "CS003"})),
                    "matricNumber",
                )
                .await
                .unwrap()
                .is_none()
        );
    }
}
