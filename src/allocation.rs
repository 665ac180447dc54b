//! Allocation of students to projects.
//!
//! This is the only writer of `Project.currentStudents`, of the automatic
//! `available -> assigned` status move, and of `Student.assignedProject`.
//! Every sequence below runs while holding the student lock and then the
//! project lock, which closes the check-then-act races on occupancy and on
//! the one-allocation-per-student rule.

use crate::error::AppError;
use crate::locks::KeyedLocks;
use crate::model::{Allocation, Project, Student, Supervisor, newest_first};
use crate::populate::{ProjectRef, StudentRef, SupervisorRef, index_by_id, lookup};
use crate::store::{
    self, Collection, Document, Filter, RecordStore, document, fetch, fetch_all,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationFilter {
    pub student_id: Option<String>,
    pub project_id: Option<String>,
    pub supervisor_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllocationView {
    #[serde(flatten)]
    pub allocation: Allocation,
    pub student: Option<StudentRef>,
    pub project: Option<ProjectRef>,
    pub supervisor: Option<SupervisorRef>,
}

/// Outcome of [`Allocations::reconcile`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub dry_run: bool,
    pub projects_fixed: Vec<String>,
    pub students_fixed: Vec<String>,
    pub duplicate_allocations: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.projects_fixed.is_empty()
            && self.students_fixed.is_empty()
            && self.duplicate_allocations.is_empty()
    }
}

pub struct Allocations {
    store: Arc<dyn RecordStore>,
    locks: Arc<KeyedLocks>,
}

impl Allocations {
    pub fn new(store: Arc<dyn RecordStore>, locks: Arc<KeyedLocks>) -> Self {
        Self { store, locks }
    }

    /// Bind a student to a project and to that project's supervisor.
    #[instrument(skip(self))]
    pub async fn assign(&self, student_id: &str, project_id: &str) -> Result<Allocation, AppError> {
        let _student_guard = self.locks.student(student_id).await;
        let _project_guard = self.locks.project(project_id).await;

        let project = fetch::<Project>(&*self.store, project_id)
            .await?
            .ok_or_else(|| AppError::ProjectNotFound(project_id.to_owned()))?;
        let student = fetch::<Student>(&*self.store, student_id)
            .await?
            .ok_or_else(|| AppError::StudentNotFound(student_id.to_owned()))?;
        let held =
            fetch_all::<Allocation>(&*self.store, &Filter::new().eq("studentId", student_id))
                .await?;
        if !held.is_empty() {
            return Err(AppError::StudentAlreadyAllocated(student_id.to_owned()));
        }
        if project.is_at_capacity() {
            return Err(AppError::ProjectFull(project_id.to_owned()));
        }

        let allocation: Allocation = store::create(
            &*self.store,
            document(json!({
                "studentId": student.id,
                "projectId": project.id,
                "supervisorId": project.supervisor_id,
            })),
        )
        .await?;

        let occupied = document(json!({
            "currentStudents": project.current_students + 1,
            "status": project.status.after_assignment(),
        }));
        if let Err(e) = self
            .store
            .update(Collection::Projects, &project.id, occupied)
            .await
        {
            self.undo(Collection::Allocations, &allocation.id, None).await;
            return Err(e.into());
        }

        let assigned = document(json!({ "assignedProject": project.id }));
        if let Err(e) = self
            .store
            .update(Collection::Students, &student.id, assigned)
            .await
        {
            let restored = document(json!({
                "currentStudents": project.current_students,
                "status": project.status,
            }));
            self.undo(Collection::Projects, &project.id, Some(restored))
                .await;
            self.undo(Collection::Allocations, &allocation.id, None).await;
            return Err(e.into());
        }

        info!(
            allocation = %allocation.id,
            supervisor = %allocation.supervisor_id,
            occupancy = project.current_students + 1,
            capacity = project.max_students,
            "student assigned",
        );
        Ok(allocation)
    }

    /// Best-effort rollback of one step of a failed assignment: restore a
    /// patch when given one, delete the record otherwise.
    async fn undo(&self, collection: Collection, id: &str, restore: Option<Document>) {
        let result = match restore {
            Some(patch) => self.store.update(collection, id, patch).await.map(|_| ()),
            None => self.store.delete(collection, id).await.map(|_| ()),
        };
        if let Err(e) = result {
            error!(%collection, id, error = %e, "rollback failed, run reconcile");
        }
    }

    /// Remove an allocation, giving the seat back and clearing the student's
    /// assignment. The allocation record goes last so an interrupted
    /// sequence leaves it behind for [`Allocations::reconcile`].
    #[instrument(skip(self))]
    pub async fn unassign(&self, allocation_id: &str) -> Result<(), AppError> {
        let allocation = fetch::<Allocation>(&*self.store, allocation_id)
            .await?
            .ok_or_else(|| AppError::AllocationNotFound(allocation_id.to_owned()))?;
        let _student_guard = self.locks.student(&allocation.student_id).await;
        let _project_guard = self.locks.project(&allocation.project_id).await;
        // Someone may have removed it while we were waiting for the locks.
        if fetch::<Allocation>(&*self.store, allocation_id)
            .await?
            .is_none()
        {
            return Err(AppError::AllocationNotFound(allocation_id.to_owned()));
        }

        if let Some(project) = fetch::<Project>(&*self.store, &allocation.project_id).await? {
            self.store
                .update(
                    Collection::Projects,
                    &project.id,
                    document(json!({
                        "currentStudents": project.current_students.saturating_sub(1),
                    })),
                )
                .await?;
        } else {
            warn!(project = %allocation.project_id, "allocation points to a missing project");
        }

        if let Some(student) = fetch::<Student>(&*self.store, &allocation.student_id).await? {
            if student.assigned_project.as_deref() == Some(allocation.project_id.as_str()) {
                self.store
                    .update(
                        Collection::Students,
                        &student.id,
                        document(json!({ "assignedProject": Value::Null })),
                    )
                    .await?;
            }
        }

        self.store
            .delete(Collection::Allocations, allocation_id)
            .await?;
        info!(
            student = %allocation.student_id,
            project = %allocation.project_id,
            "student unassigned",
        );
        Ok(())
    }

    pub async fn list(&self, filter: &AllocationFilter) -> Result<Vec<AllocationView>, AppError> {
        let query = Filter::new()
            .eq_opt("studentId", filter.student_id.as_deref())
            .eq_opt("projectId", filter.project_id.as_deref())
            .eq_opt("supervisorId", filter.supervisor_id.as_deref());
        let mut allocations = fetch_all::<Allocation>(&*self.store, &query).await?;
        newest_first(&mut allocations, |a| a.created_at);
        self.enrich(allocations).await
    }

    pub async fn get(&self, id: &str) -> Result<AllocationView, AppError> {
        let allocation = fetch::<Allocation>(&*self.store, id)
            .await?
            .ok_or_else(|| AppError::AllocationNotFound(id.to_owned()))?;
        let mut views = self.enrich(vec![allocation]).await?;
        Ok(views.remove(0))
    }

    async fn enrich(&self, allocations: Vec<Allocation>) -> Result<Vec<AllocationView>, AppError> {
        let store = &*self.store;
        let students =
            index_by_id::<Student>(store, allocations.iter().map(|a| a.student_id.clone()))
                .await?;
        let projects =
            index_by_id::<Project>(store, allocations.iter().map(|a| a.project_id.clone()))
                .await?;
        let supervisors = index_by_id::<Supervisor>(
            store,
            allocations.iter().map(|a| a.supervisor_id.clone()),
        )
        .await?;
        Ok(allocations
            .into_iter()
            .map(|allocation| AllocationView {
                student: lookup(&students, &allocation.student_id),
                project: lookup(&projects, &allocation.project_id),
                supervisor: lookup(&supervisors, &allocation.supervisor_id),
                allocation,
            })
            .collect())
    }

    /// Recompute occupancy and assignment pointers from the allocation
    /// records, repairing whatever an interrupted sequence left behind.
    /// Students holding several allocations keep the oldest one as their
    /// assignment; the others are reported, not deleted.
    pub async fn reconcile(&self, dry_run: bool) -> Result<ReconcileReport, AppError> {
        let mut report = ReconcileReport {
            dry_run,
            ..ReconcileReport::default()
        };

        let mut students = fetch_all::<Student>(&*self.store, &Filter::new())
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect::<Vec<_>>();
        let orphans = fetch_all::<Allocation>(&*self.store, &Filter::new())
            .await?
            .into_iter()
            .map(|a| a.student_id)
            .collect::<HashSet<_>>();
        students.extend(orphans);
        students.sort_unstable();
        students.dedup();
        for student_id in students {
            self.reconcile_student(&student_id, &mut report).await?;
        }

        let projects = fetch_all::<Project>(&*self.store, &Filter::new()).await?;
        for project in projects {
            self.reconcile_project(&project.id, &mut report).await?;
        }

        if report.is_clean() {
            info!("allocation state is consistent");
        } else {
            warn!(
                projects = report.projects_fixed.len(),
                students = report.students_fixed.len(),
                duplicates = report.duplicate_allocations.len(),
                dry_run,
                "allocation state was inconsistent",
            );
        }
        Ok(report)
    }

    async fn reconcile_student(
        &self,
        student_id: &str,
        report: &mut ReconcileReport,
    ) -> Result<(), AppError> {
        let _guard = self.locks.student(student_id).await;
        let mut held =
            fetch_all::<Allocation>(&*self.store, &Filter::new().eq("studentId", student_id))
                .await?;
        held.sort_by_key(|a| a.created_at);
        report
            .duplicate_allocations
            .extend(held.iter().skip(1).map(|a| a.id.clone()));
        let expected = held.first().map(|a| a.project_id.clone());
        let Some(student) = fetch::<Student>(&*self.store, student_id).await? else {
            warn!(student = %student_id, "allocation points to a missing student");
            return Ok(());
        };
        if student.assigned_project != expected {
            report.students_fixed.push(student.id.clone());
            if !report.dry_run {
                self.store
                    .update(
                        Collection::Students,
                        &student.id,
                        document(json!({ "assignedProject": expected })),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn reconcile_project(
        &self,
        project_id: &str,
        report: &mut ReconcileReport,
    ) -> Result<(), AppError> {
        let _guard = self.locks.project(project_id).await;
        let Some(project) = fetch::<Project>(&*self.store, project_id).await? else {
            return Ok(());
        };
        let held =
            fetch_all::<Allocation>(&*self.store, &Filter::new().eq("projectId", project_id))
                .await?
                .len();
        let held = u32::try_from(held).unwrap_or(u32::MAX);
        if project.current_students != held {
            report.projects_fixed.push(project.id.clone());
            if !report.dry_run {
                let mut patch = document(json!({ "currentStudents": held }));
                if held > 0 {
                    patch.insert(
                        "status".to_owned(),
                        json!(project.status.after_assignment()),
                    );
                }
                self.store
                    .update(Collection::Projects, &project.id, patch)
                    .await?;
            }
        }
        Ok(())
    }
}
