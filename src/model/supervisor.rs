use crate::store::{Collection, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supervisor {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub department: String,
    pub specialization: String,
    #[serde(default)]
    pub projects_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Supervisor {
    const COLLECTION: Collection = Collection::Supervisors;

    fn id(&self) -> &str {
        &self.id
    }
}
