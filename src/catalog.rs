//! Project listings.

use crate::error::AppError;
use crate::identity::required;
use crate::locks::KeyedLocks;
use crate::model::{Allocation, Project, ProjectStatus, Supervisor, newest_first};
use crate::populate::{SupervisorRef, index_by_id, lookup};
use crate::store::{
    self, Collection, Document, Filter, RecordStore, document, fetch, fetch_all,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub department: String,
    pub max_students: Option<u32>,
    pub requirements: Option<String>,
    pub duration: Option<String>,
    #[serde(default)]
    pub supervisor_id: String,
}

/// Editable project fields. Occupancy is not among them.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub department: Option<String>,
    pub max_students: Option<u32>,
    pub requirements: Option<String>,
    pub duration: Option<String>,
    pub status: Option<ProjectStatus>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFilter {
    pub supervisor_id: Option<String>,
    pub department: Option<String>,
    pub status: Option<ProjectStatus>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    pub supervisor: Option<SupervisorRef>,
}

pub struct Catalog {
    store: Arc<dyn RecordStore>,
    locks: Arc<KeyedLocks>,
}

impl Catalog {
    pub fn new(store: Arc<dyn RecordStore>, locks: Arc<KeyedLocks>) -> Self {
        Self { store, locks }
    }

    pub async fn create_project(&self, draft: ProjectDraft) -> Result<ProjectView, AppError> {
        let title = required(&draft.title, "title")?;
        let description = required(&draft.description, "description")?;
        let department = required(&draft.department, "department")?;
        let supervisor_id = required(&draft.supervisor_id, "supervisorId")?;
        let max_students = match draft.max_students {
            None => return Err(AppError::MissingRequiredField("maxStudents")),
            Some(0) => return Err(AppError::Invalid("maxStudents must be at least 1".into())),
            Some(n) => n,
        };

        let _guard = self.locks.supervisor(&supervisor_id).await;
        let supervisor = fetch::<Supervisor>(&*self.store, &supervisor_id)
            .await?
            .ok_or_else(|| AppError::SupervisorNotFound(supervisor_id.clone()))?;
        let project: Project = store::create(
            &*self.store,
            document(json!({
                "title": title,
                "description": description,
                "department": department,
                "supervisorId": supervisor.id,
                "maxStudents": max_students,
                "currentStudents": 0,
                "status": ProjectStatus::Available,
                "requirements": draft.requirements,
                "duration": draft.duration,
            })),
        )
        .await?;
        self.recount_projects(&supervisor.id).await?;
        info!(project = %project.id, supervisor = %supervisor.id, "project created");
        Ok(ProjectView {
            supervisor: Some(SupervisorRef::from(&supervisor)),
            project,
        })
    }

    /// Refresh the denormalized `projectsCount`. Callers hold the
    /// supervisor lock.
    async fn recount_projects(&self, supervisor_id: &str) -> Result<(), AppError> {
        let count = fetch_all::<Project>(
            &*self.store,
            &Filter::new().eq("supervisorId", supervisor_id),
        )
        .await?
        .len();
        self.store
            .update(
                Collection::Supervisors,
                supervisor_id,
                document(json!({ "projectsCount": count })),
            )
            .await?;
        debug!(supervisor = %supervisor_id, count, "projects recounted");
        Ok(())
    }

    pub async fn list_projects(
        &self,
        filter: &ProjectFilter,
    ) -> Result<Vec<ProjectView>, AppError> {
        let query = Filter::new()
            .eq_opt("supervisorId", filter.supervisor_id.as_deref())
            .eq_opt("department", filter.department.as_deref())
            .eq_opt("status", filter.status.map(ProjectStatus::as_str));
        let mut projects = fetch_all::<Project>(&*self.store, &query).await?;
        newest_first(&mut projects, |p| p.created_at);
        self.enrich(projects).await
    }

    async fn enrich(&self, projects: Vec<Project>) -> Result<Vec<ProjectView>, AppError> {
        let supervisors = index_by_id::<Supervisor>(
            &*self.store,
            projects.iter().map(|p| p.supervisor_id.clone()),
        )
        .await?;
        Ok(projects
            .into_iter()
            .map(|project| ProjectView {
                supervisor: lookup(&supervisors, &project.supervisor_id),
                project,
            })
            .collect())
    }

    pub async fn get_project(&self, id: &str) -> Result<ProjectView, AppError> {
        let project = fetch::<Project>(&*self.store, id)
            .await?
            .ok_or_else(|| AppError::ProjectNotFound(id.to_owned()))?;
        let mut views = self.enrich(vec![project]).await?;
        Ok(views.remove(0))
    }

    pub async fn update_project(
        &self,
        id: &str,
        update: ProjectUpdate,
    ) -> Result<ProjectView, AppError> {
        let _guard = self.locks.project(id).await;
        let project = fetch::<Project>(&*self.store, id)
            .await?
            .ok_or_else(|| AppError::ProjectNotFound(id.to_owned()))?;

        let mut patch = Document::new();
        for (field, value) in [
            ("title", update.title),
            ("description", update.description),
            ("department", update.department),
        ] {
            if let Some(value) = value {
                patch.insert(field.to_owned(), Value::String(required(&value, field)?));
            }
        }
        if let Some(max_students) = update.max_students {
            if max_students == 0 || max_students < project.current_students {
                return Err(AppError::Invalid(format!(
                    "maxStudents must be at least {}",
                    project.current_students.max(1)
                )));
            }
            patch.insert("maxStudents".to_owned(), json!(max_students));
        }
        if let Some(requirements) = update.requirements {
            patch.insert("requirements".to_owned(), json!(requirements));
        }
        if let Some(duration) = update.duration {
            patch.insert("duration".to_owned(), json!(duration));
        }
        if let Some(status) = update.status {
            patch.insert("status".to_owned(), json!(status));
        }

        let project = store::patch::<Project>(&*self.store, id, patch)
            .await?
            .ok_or_else(|| AppError::ProjectNotFound(id.to_owned()))?;
        info!(project = %id, status = project.status.as_str(), "project updated");
        let mut views = self.enrich(vec![project]).await?;
        Ok(views.remove(0))
    }

    /// Remove a project that no allocation references.
    pub async fn delete_project(&self, id: &str) -> Result<bool, AppError> {
        let Some(project) = fetch::<Project>(&*self.store, id).await? else {
            return Ok(false);
        };
        let _supervisor = self.locks.supervisor(&project.supervisor_id).await;
        let _project = self.locks.project(id).await;
        let allocations =
            fetch_all::<Allocation>(&*self.store, &Filter::new().eq("projectId", id)).await?;
        if !allocations.is_empty() {
            return Err(AppError::InUse(format!(
                "project {id} still has {} allocation(s)",
                allocations.len()
            )));
        }
        let removed = self.store.delete(Collection::Projects, id).await?;
        if removed {
            self.recount_projects(&project.supervisor_id).await?;
            info!(project = %id, "project deleted");
        }
        Ok(removed)
    }
}
