use crate::store::{Collection, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub matric_number: String,
    pub department: String,
    #[serde(default)]
    pub preference: Option<String>,
    /// Written only by the allocation manager.
    #[serde(default)]
    pub assigned_project: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Student {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.matric_number)
    }
}

impl Record for Student {
    const COLLECTION: Collection = Collection::Students;

    fn id(&self) -> &str {
        &self.id
    }
}
