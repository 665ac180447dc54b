//! Student and supervisor profiles.
//!
//! Profiles share their id with the account they were registered with.
//! Edits here touch the profile only; login credentials stay with the
//! identity service.

use crate::error::AppError;
use crate::identity::{Identity, Registration, normalize_email, required};
use crate::locks::KeyedLocks;
use crate::model::{Account, Allocation, Project, Student, Supervisor, newest_first};
use crate::populate::{ProjectRef, index_by_id, lookup};
use crate::store::{
    self, Collection, Document, Filter, RecordStore, StoreError, fetch, fetch_all,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub matric_number: Option<String>,
    pub department: Option<String>,
    pub preference: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    pub specialization: Option<String>,
}

/// A student with the assigned project resolved.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub matric_number: String,
    pub department: String,
    pub preference: Option<String>,
    pub assigned_project: Option<ProjectRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudentView {
    fn new(student: Student, project: Option<ProjectRef>) -> Self {
        StudentView {
            id: student.id,
            name: student.name,
            email: student.email,
            matric_number: student.matric_number,
            department: student.department,
            preference: student.preference,
            assigned_project: project,
            created_at: student.created_at,
            updated_at: student.updated_at,
        }
    }
}

/// Build a patch from optional text fields, rejecting blanks.
fn text_patch(fields: Vec<(&'static str, Option<String>)>) -> Result<Document, AppError> {
    let mut patch = Document::new();
    for (field, value) in fields {
        let Some(value) = value else { continue };
        let value = if field == "email" {
            normalize_email(&value)?
        } else {
            required(&value, field)?
        };
        patch.insert(field.to_owned(), Value::String(value));
    }
    Ok(patch)
}

pub struct Directory {
    store: Arc<dyn RecordStore>,
    locks: Arc<KeyedLocks>,
    identity: Identity,
}

impl Directory {
    pub fn new(store: Arc<dyn RecordStore>, locks: Arc<KeyedLocks>) -> Self {
        Self {
            identity: Identity::new(Arc::clone(&store)),
            store,
            locks,
        }
    }

    /// Register a student account on someone else's behalf.
    pub async fn create_student(
        &self,
        mut registration: Registration,
    ) -> Result<StudentView, AppError> {
        registration.role = "student".to_owned();
        let account: Account = self.identity.register(registration).await?;
        self.get_student(&account.id).await
    }

    pub async fn list_students(&self) -> Result<Vec<StudentView>, AppError> {
        let mut students = fetch_all::<Student>(&*self.store, &Filter::new()).await?;
        newest_first(&mut students, |s| s.created_at);
        self.enrich(students).await
    }

    pub async fn get_student(&self, id: &str) -> Result<StudentView, AppError> {
        let student = fetch::<Student>(&*self.store, id)
            .await?
            .ok_or_else(|| AppError::StudentNotFound(id.to_owned()))?;
        let mut views = self.enrich(vec![student]).await?;
        Ok(views.remove(0))
    }

    async fn enrich(&self, students: Vec<Student>) -> Result<Vec<StudentView>, AppError> {
        let projects = index_by_id::<Project>(
            &*self.store,
            students.iter().filter_map(|s| s.assigned_project.clone()),
        )
        .await?;
        Ok(students
            .into_iter()
            .map(|student| {
                let project = student
                    .assigned_project
                    .as_deref()
                    .and_then(|id| lookup(&projects, id));
                StudentView::new(student, project)
            })
            .collect())
    }

    pub async fn update_student(
        &self,
        id: &str,
        update: StudentUpdate,
    ) -> Result<StudentView, AppError> {
        let mut patch = text_patch(vec![
            ("name", update.name),
            ("email", update.email),
            ("matricNumber", update.matric_number),
            ("department", update.department),
        ])?;
        if let Some(preference) = update.preference {
            patch.insert("preference".to_owned(), json!(preference));
        }
        let _guard = self.locks.student(id).await;
        let updated = match patch.get("matricNumber").and_then(Value::as_str) {
            Some(matric) => {
                let matric = matric.to_owned();
                store::patch_unique::<Student>(&*self.store, id, patch, "matricNumber")
                    .await
                    .map_err(|e| match e {
                        StoreError::Duplicate { .. } => AppError::DuplicateMatricNumber(matric),
                        e => e.into(),
                    })?
            }
            None => store::patch::<Student>(&*self.store, id, patch).await?,
        };
        let student = updated.ok_or_else(|| AppError::StudentNotFound(id.to_owned()))?;
        info!(student = %id, "student updated");
        let mut views = self.enrich(vec![student]).await?;
        Ok(views.remove(0))
    }

    /// Remove a student profile that holds no allocation.
    pub async fn delete_student(&self, id: &str) -> Result<bool, AppError> {
        let _guard = self.locks.student(id).await;
        let held = fetch_all::<Allocation>(&*self.store, &Filter::new().eq("studentId", id)).await?;
        if !held.is_empty() {
            return Err(AppError::InUse(format!(
                "student {id} is allocated; unassign first"
            )));
        }
        let removed = self.store.delete(Collection::Students, id).await?;
        if removed {
            info!(student = %id, "student deleted");
        }
        Ok(removed)
    }

    /// Register a supervisor account on someone else's behalf.
    pub async fn create_supervisor(
        &self,
        mut registration: Registration,
    ) -> Result<Supervisor, AppError> {
        registration.role = "supervisor".to_owned();
        let account = self.identity.register(registration).await?;
        self.get_supervisor(&account.id).await
    }

    pub async fn list_supervisors(&self) -> Result<Vec<Supervisor>, AppError> {
        let mut supervisors = fetch_all::<Supervisor>(&*self.store, &Filter::new()).await?;
        newest_first(&mut supervisors, |s| s.created_at);
        Ok(supervisors)
    }

    pub async fn get_supervisor(&self, id: &str) -> Result<Supervisor, AppError> {
        fetch::<Supervisor>(&*self.store, id)
            .await?
            .ok_or_else(|| AppError::SupervisorNotFound(id.to_owned()))
    }

    pub async fn update_supervisor(
        &self,
        id: &str,
        update: SupervisorUpdate,
    ) -> Result<Supervisor, AppError> {
        let patch = text_patch(vec![
            ("name", update.name),
            ("email", update.email),
            ("department", update.department),
            ("specialization", update.specialization),
        ])?;
        let _guard = self.locks.supervisor(id).await;
        let supervisor = store::patch::<Supervisor>(&*self.store, id, patch)
            .await?
            .ok_or_else(|| AppError::SupervisorNotFound(id.to_owned()))?;
        info!(supervisor = %id, "supervisor updated");
        Ok(supervisor)
    }

    /// Remove a supervisor profile that owns no project.
    pub async fn delete_supervisor(&self, id: &str) -> Result<bool, AppError> {
        let _guard = self.locks.supervisor(id).await;
        let owned =
            fetch_all::<Project>(&*self.store, &Filter::new().eq("supervisorId", id)).await?;
        if !owned.is_empty() {
            return Err(AppError::InUse(format!(
                "supervisor {id} still owns {} project(s)",
                owned.len()
            )));
        }
        let removed = self.store.delete(Collection::Supervisors, id).await?;
        if removed {
            info!(supervisor = %id, "supervisor deleted");
        }
        Ok(removed)
    }
}
