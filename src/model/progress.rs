use crate::store::{Collection, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_id: String,
    pub project_id: String,
    pub report: String,
    pub submission_date: DateTime<Utc>,
    #[serde(default)]
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressReport {
    pub fn awaits_feedback(&self) -> bool {
        self.feedback.is_none()
    }
}

impl Record for ProgressReport {
    const COLLECTION: Collection = Collection::Progress;

    fn id(&self) -> &str {
        &self.id
    }
}
