use crate::store::{Collection, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binding of a student to a project and that project's supervisor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_id: String,
    pub project_id: String,
    pub supervisor_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Allocation {
    const COLLECTION: Collection = Collection::Allocations;

    fn id(&self) -> &str {
        &self.id
    }
}
