use super::{
    Collection, Document, Filter, ID_FIELD, RecordStore, StoreError, merge, stamp_new,
    string_field,
};
use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow, install_default_drivers};
use sqlx::{Any, AnyPool, Row, Transaction};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, trace};

const SCHEMA: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS records (
        collection VARCHAR(32) NOT NULL,
        id VARCHAR(64) NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (collection, id)
    )",
    "CREATE TABLE IF NOT EXISTS unique_keys (
        collection VARCHAR(32) NOT NULL,
        field VARCHAR(64) NOT NULL,
        value VARCHAR(255) NOT NULL,
        record_id VARCHAR(64) NOT NULL,
        PRIMARY KEY (collection, field, value)
    )",
];

/// Record store persisting JSON bodies in a relational database.
///
/// Any database reachable through the `sqlx` Any driver works; MySQL is
/// always compiled in, SQLite comes with the `sqlite` feature.
pub struct SqlStore {
    pool: AnyPool,
    // Appended to reads that precede a write in the same transaction.
    row_lock: &'static str,
}

impl SqlStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(pool_size(url))
            .connect(url)
            .await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        debug!("record tables are ready");
        Ok(Self {
            pool,
            row_lock: row_lock(url),
        })
    }

    async fn locked_body(
        &self,
        tx: &mut Transaction<'static, Any>,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let sql = format!(
            "SELECT body FROM records WHERE collection = ? AND id = ?{}",
            self.row_lock
        );
        sqlx::query(&sql)
            .bind(collection.name())
            .bind(id.to_owned())
            .fetch_optional(&mut **tx)
            .await?
            .as_ref()
            .map(|row| body_of(collection, row))
            .transpose()
    }

    async fn write_body(
        tx: &mut Transaction<'static, Any>,
        collection: Collection,
        id: &str,
        doc: &Document,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE records SET body = ? WHERE collection = ? AND id = ?")
            .bind(serde_json::to_string(doc)?)
            .bind(collection.name())
            .bind(id.to_owned())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

// SQLite serializes writers itself and has no row locks.
fn row_lock(url: &str) -> &'static str {
    if url.starts_with("sqlite:") {
        ""
    } else {
        " FOR UPDATE"
    }
}

// Each connection to an in-memory SQLite database sees its own database.
fn pool_size(url: &str) -> u32 {
    if url.starts_with("sqlite::memory:") || url.contains("mode=memory") {
        1
    } else {
        8
    }
}

fn body_of(collection: Collection, row: &AnyRow) -> Result<Document, StoreError> {
    let body: String = row.try_get("body")?;
    match serde_json::from_str(&body)? {
        Value::Object(doc) => Ok(doc),
        _ => Err(StoreError::NotADocument(collection)),
    }
}

#[async_trait]
impl RecordStore for SqlStore {
    async fn insert(&self, collection: Collection, doc: Document) -> Result<Document, StoreError> {
        let (id, doc) = stamp_new(collection, doc)?;
        sqlx::query("INSERT INTO records (collection, id, body) VALUES (?, ?, ?)")
            .bind(collection.name())
            .bind(id)
            .bind(serde_json::to_string(&doc)?)
            .execute(&self.pool)
            .await?;
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
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query(
            "INSERT INTO unique_keys (collection, field, value, record_id) VALUES (?, ?, ?, ?)",
        )
        .bind(collection.name())
        .bind(field.to_owned())
        .bind(value.clone())
        .bind(id.clone())
        .execute(&mut *tx)
        .await;
        match claimed {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                trace!(%collection, field, "unique key already claimed");
                return Err(StoreError::Duplicate {
                    collection,
                    field: field.to_owned(),
                    value,
                });
            }
            Err(e) => return Err(e.into()),
        }
        sqlx::query("INSERT INTO records (collection, id, body) VALUES (?, ?, ?)")
            .bind(collection.name())
            .bind(id)
            .bind(serde_json::to_string(&doc)?)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(doc)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        sqlx::query("SELECT body FROM records WHERE collection = ? AND id = ?")
            .bind(collection.name())
            .bind(id.to_owned())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(|row| body_of(collection, row))
            .transpose()
    }

    async fn get_many(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<Vec<Document>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql =
            format!("SELECT body FROM records WHERE collection = ? AND id IN ({placeholders})");
        let mut query = sqlx::query(&sql).bind(collection.name());
        for id in ids {
            query = query.bind(id.clone());
        }
        let mut found = query
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| {
                let doc = body_of(collection, row)?;
                Ok((string_field(collection, &doc, ID_FIELD)?, doc))
            })
            .collect::<Result<HashMap<_, _>, StoreError>>()?;
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn query(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query("SELECT body FROM records WHERE collection = ?")
            .bind(collection.name())
            .fetch_all(&self.pool)
            .await?;
        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let doc = body_of(collection, row)?;
            if filter.matches(&doc) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
    ) -> Result<Option<Document>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(mut doc) = self.locked_body(&mut tx, collection, id).await? else {
            return Ok(None);
        };
        merge(&mut doc, patch);
        Self::write_body(&mut tx, collection, id, &doc).await?;
        tx.commit().await?;
        Ok(Some(doc))
    }

    async fn update_unique(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
        field: &str,
    ) -> Result<Option<Document>, StoreError> {
        let value = string_field(collection, &patch, field)?;
        let mut tx = self.pool.begin().await?;
        let Some(mut doc) = self.locked_body(&mut tx, collection, id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM unique_keys WHERE collection = ? AND field = ? AND record_id = ?")
            .bind(collection.name())
            .bind(field.to_owned())
            .bind(id.to_owned())
            .execute(&mut *tx)
            .await?;
        let claimed = sqlx::query(
            "INSERT INTO unique_keys (collection, field, value, record_id) VALUES (?, ?, ?, ?)",
        )
        .bind(collection.name())
        .bind(field.to_owned())
        .bind(value.clone())
        .bind(id.to_owned())
        .execute(&mut *tx)
        .await;
        match claimed {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                trace!(%collection, field, "unique key already claimed");
                return Err(StoreError::Duplicate {
                    collection,
                    field: field.to_owned(),
                    value,
                });
            }
            Err(e) => return Err(e.into()),
        }
        merge(&mut doc, patch);
        Self::write_body(&mut tx, collection, id, &doc).await?;
        tx.commit().await?;
        Ok(Some(doc))
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
            .bind(collection.name())
            .bind(id.to_owned())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM unique_keys WHERE collection = ? AND record_id = ?")
            .bind(collection.name())
            .bind(id.to_owned())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn clear(&self, collection: Collection) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(collection.name())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM unique_keys WHERE collection = ?")
            .bind(collection.name())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(usize::try_from(removed).unwrap_or(usize::MAX))
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::store::document;
    use serde_json::json;

    async fn store() -> SqlStore {
        SqlStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn documents_survive_a_round_trip() {
        let store = store().await;
        let doc = store
            .insert(
                Collection::Projects,
                document(json!({"title": "Drones", "maxStudents": 3})),
            )
            .await
            .unwrap();
        let id = doc[ID_FIELD].as_str().unwrap().to_owned();
        assert_eq!(
            store.get(Collection::Projects, &id).await.unwrap(),
            Some(doc)
        );
        let updated = store
            .update(Collection::Projects, &id, document(json!({"maxStudents": 4})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["maxStudents"], json!(4));
        assert_eq!(updated["title"], json!("Drones"));
        let found = store
            .query(Collection::Projects, &Filter::new().eq("maxStudents", 4))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(store.delete(Collection::Projects, &id).await.unwrap());
        assert!(store.get(Collection::Projects, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unique_keys_are_released_on_delete() {
        let store = store().await;
        let user = store
            .insert_unique(Collection::Users, document(json!({"email": "x@y.z"})), "email")
            .await
            .unwrap();
        assert!(matches!(
            store
                .insert_unique(Collection::Users, document(json!({"email": "x@y.z"})), "email")
                .await,
            Err(StoreError::Duplicate { .. })
        ));
        store
            .delete(Collection::Users, user[ID_FIELD].as_str().unwrap())
            .await
            .unwrap();
        store
            .insert_unique(Collection::Users, document(json!({"email": "x@y.z"})), "email")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn batched_lookup_keeps_request_order() {
        let store = store().await;
        for id in ["a", "b", "c"] {
            store
                .insert(Collection::Students, document(json!({"_id": id})))
                .await
                .unwrap();
        }
        let docs = store
            .get_many(
                Collection::Students,
                &["c".to_owned(), "zz".to_owned(), "a".to_owned()],
            )
            .await
            .unwrap();
        let ids = docs
            .iter()
            .map(|d| d[ID_FIELD].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["c", "a"]);
        assert_eq!(store.clear(Collection::Students).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn unique_claims_follow_updates() {
        let store = store().await;
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
        let patch = || document(json!({"matricNumber": "CS001"}));
        assert!(matches!(
            store
                .update_unique(Collection::Students, "s2", patch(), "matricNumber")
                .await,
            Err(StoreError::Duplicate { .. })
        ));
        let kept = store.get(Collection::Students, "s2").await.unwrap().unwrap();
        assert_eq!(kept["matricNumber"], json!("CS002"));

        store
            .update_unique(
                Collection::Students,
                "s1",
                document(json!({"matricNumber": "CS009"})),
                "matricNumber",
            )
            .await
            .unwrap()
            .unwrap();
        store
            .update_unique(Collection::Students, "s2", patch(), "matricNumber")
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn row_locks_skip_sqlite() {
        assert_eq!(row_lock("sqlite::memory:"), "");
        assert_eq!(row_lock("mysql://localhost/rassign"), " FOR UPDATE");
    }
}
