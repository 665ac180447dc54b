//! Read-time joins.
//!
//! Foreign ids are replaced by small display records when listing. Each
//! join collects the distinct ids of a page of results and resolves them
//! with one batched lookup per collection.

use crate::model::{Project, ProjectStatus, Student, Supervisor};
use crate::store::{Record, RecordStore, StoreError, fetch_many};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub matric_number: String,
}

impl From<&Student> for StudentRef {
    fn from(s: &Student) -> Self {
        StudentRef {
            id: s.id.clone(),
            name: s.name.clone(),
            email: s.email.clone(),
            matric_number: s.matric_number.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub department: String,
    pub status: ProjectStatus,
}

impl From<&Project> for ProjectRef {
    fn from(p: &Project) -> Self {
        ProjectRef {
            id: p.id.clone(),
            title: p.title.clone(),
            description: p.description.clone(),
            department: p.department.clone(),
            status: p.status,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<&Supervisor> for SupervisorRef {
    fn from(s: &Supervisor) -> Self {
        SupervisorRef {
            id: s.id.clone(),
            name: s.name.clone(),
            email: s.email.clone(),
        }
    }
}

/// Resolve a set of ids into records keyed by id.
pub async fn index_by_id<T: Record>(
    store: &dyn RecordStore,
    ids: impl IntoIterator<Item = String>,
) -> Result<HashMap<String, T>, StoreError> {
    let mut ids = ids.into_iter().collect::<Vec<_>>();
    ids.sort_unstable();
    ids.dedup();
    Ok(fetch_many::<T>(store, &ids)
        .await?
        .into_iter()
        .map(|record| (record.id().to_owned(), record))
        .collect())
}

/// Display record for `id`, or `None` when it dangles.
pub fn lookup<'a, T, R>(index: &'a HashMap<String, T>, id: &str) -> Option<R>
where
    R: From<&'a T>,
{
    index.get(id).map(R::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Collection, MemoryStore, document};
    use serde_json::json;

    #[tokio::test]
    async fn duplicate_and_missing_ids_are_tolerated() {
        let store = MemoryStore::new();
        store
            .insert(
                Collection::Supervisors,
                document(json!({
                    "_id": "v1",
                    "name": "Dr. Jane Smith",
                    "email": "jane.smith@example.com",
                    "department": "Computer Science",
                    "specialization": "AI",
                })),
            )
            .await
            .unwrap();
        let index = index_by_id::<Supervisor>(
            &store,
            ["v1".to_owned(), "v1".to_owned(), "gone".to_owned()],
        )
        .await
        .unwrap();
        assert_eq!(index.len(), 1);
        let found: Option<SupervisorRef> = lookup(&index, "v1");
        assert_eq!(found.unwrap().name, "Dr. Jane Smith");
        assert!(lookup::<_, SupervisorRef>(&index, "gone").is_none());
    }
}
