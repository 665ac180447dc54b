use crate::store::{Collection, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Available,
    Assigned,
    Full,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Available => "available",
            ProjectStatus::Assigned => "assigned",
            ProjectStatus::Full => "full",
            ProjectStatus::Completed => "completed",
        }
    }

    /// Status after a student joins. Only `available` moves; `full` and
    /// `completed` are administrative.
    pub fn after_assignment(self) -> Self {
        match self {
            ProjectStatus::Available => ProjectStatus::Assigned,
            other => other,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub department: String,
    pub supervisor_id: String,
    pub max_students: u32,
    /// Written only by the allocation manager.
    #[serde(default)]
    pub current_students: u32,
    pub status: ProjectStatus,
    #[serde(default)]
    pub requirements: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn is_at_capacity(&self) -> bool {
        self.current_students >= self.max_students
    }

    pub fn open_spots(&self) -> u32 {
        self.max_students.saturating_sub(self.current_students)
    }
}

impl Record for Project {
    const COLLECTION: Collection = Collection::Projects;

    fn id(&self) -> &str {
        &self.id
    }
}

#[test]
fn test_capacity() {
    let p: Project = serde_json::from_value(serde_json::json!({
        "_id": "p1",
        "title": "dummy",
        "description": "dummy",
        "department": "CS",
        "supervisorId": "v1",
        "maxStudents": 2,
        "status": "available",
        "createdAt": "2024-01-15T00:00:00Z",
        "updatedAt": "2024-01-15T00:00:00Z",
    }))
    .unwrap();
    assert_eq!(p.current_students, 0);
    assert_eq!(p.open_spots(), 2);
    let p = Project {
        current_students: 2,
        ..p
    };
    assert!(p.is_at_capacity());
    assert_eq!(p.open_spots(), 0);
    assert_eq!(
        ProjectStatus::Available.after_assignment(),
        ProjectStatus::Assigned
    );
    assert_eq!(
        ProjectStatus::Completed.after_assignment(),
        ProjectStatus::Completed
    );
}
