//! Progress reports filed by allocated students, and supervisor feedback.

use crate::error::AppError;
use crate::identity::required;
use crate::locks::KeyedLocks;
use crate::model::{Allocation, ProgressReport, Project, Student, newest_first};
use crate::populate::{ProjectRef, StudentRef, index_by_id, lookup};
use crate::store::{self, Collection, Filter, RecordStore, document, fetch_all};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub report: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressFilter {
    pub student_id: Option<String>,
    pub project_id: Option<String>,
    /// Reports on projects owned by this supervisor.
    pub supervisor_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressView {
    #[serde(flatten)]
    pub report: ProgressReport,
    pub student: Option<StudentRef>,
    pub project: Option<ProjectRef>,
}

pub struct Ledger {
    store: Arc<dyn RecordStore>,
    locks: Arc<KeyedLocks>,
}

impl Ledger {
    pub fn new(store: Arc<dyn RecordStore>, locks: Arc<KeyedLocks>) -> Self {
        Self { store, locks }
    }

    /// File a report against the project the student is allocated to.
    pub async fn submit(&self, submission: Submission) -> Result<ProgressReport, AppError> {
        let student_id = required(&submission.student_id, "studentId")?;
        let project_id = required(&submission.project_id, "projectId")?;
        let text = required(&submission.report, "report")?;

        // Unassignment waits until the report is stored.
        let _guard = self.locks.student(&student_id).await;
        let bound = fetch_all::<Allocation>(
            &*self.store,
            &Filter::new()
                .eq("studentId", student_id.as_str())
                .eq("projectId", project_id.as_str()),
        )
        .await?;
        if bound.is_empty() {
            return Err(AppError::NotAllocated {
                student: student_id,
                project: project_id,
            });
        }

        let report: ProgressReport = store::create(
            &*self.store,
            document(json!({
                "studentId": student_id,
                "projectId": project_id,
                "report": text,
                "submissionDate": Utc::now(),
                "feedback": null,
            })),
        )
        .await?;
        info!(report = %report.id, student = %report.student_id, "progress report submitted");
        Ok(report)
    }

    /// Set the supervisor's feedback, replacing any earlier one.
    pub async fn attach_feedback(
        &self,
        id: &str,
        feedback: &str,
    ) -> Result<ProgressReport, AppError> {
        let feedback = required(feedback, "feedback")?;
        let report = store::patch::<ProgressReport>(
            &*self.store,
            id,
            document(json!({ "feedback": feedback })),
        )
        .await?
        .ok_or_else(|| AppError::ReportNotFound(id.to_owned()))?;
        debug!(report = %report.id, "feedback attached");
        Ok(report)
    }

    pub async fn list(&self, filter: &ProgressFilter) -> Result<Vec<ProgressView>, AppError> {
        let mut query = Filter::new()
            .eq_opt("studentId", filter.student_id.as_deref())
            .eq_opt("projectId", filter.project_id.as_deref());
        let owned = match &filter.supervisor_id {
            Some(supervisor_id) => Some(
                fetch_all::<Project>(
                    &*self.store,
                    &Filter::new().eq("supervisorId", supervisor_id.as_str()),
                )
                .await?
                .into_iter()
                .map(|p| p.id)
                .collect::<Vec<_>>(),
            ),
            None => None,
        };
        if let Some([only]) = owned.as_deref() {
            query = query.eq("projectId", only.as_str());
        }
        let mut reports = fetch_all::<ProgressReport>(&*self.store, &query).await?;
        if let Some(owned) = &owned {
            reports.retain(|r| owned.contains(&r.project_id));
        }
        newest_first(&mut reports, |r| r.created_at);
        self.enrich(reports).await
    }

    async fn enrich(&self, reports: Vec<ProgressReport>) -> Result<Vec<ProgressView>, AppError> {
        let students =
            index_by_id::<Student>(&*self.store, reports.iter().map(|r| r.student_id.clone()))
                .await?;
        let projects =
            index_by_id::<Project>(&*self.store, reports.iter().map(|r| r.project_id.clone()))
                .await?;
        Ok(reports
            .into_iter()
            .map(|report| ProgressView {
                student: lookup(&students, &report.student_id),
                project: lookup(&projects, &report.project_id),
                report,
            })
            .collect())
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let deleted = self.store.delete(Collection::Progress, id).await?;
        if deleted {
            info!(report = %id, "progress report deleted");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    async fn ledger() -> Ledger {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        store
            .insert(
                Collection::Students,
                document(json!({
                    "_id": "s1",
                    "name": "Alice Brown",
                    "email": "alice@example.com",
                    "matricNumber": "CS2023001",
                    "department": "Computer Science",
                    "assignedProject": "p1",
                })),
            )
            .await
            .unwrap();
        for (id, supervisor) in [("p1", "v1"), ("p2", "v2")] {
            store
                .insert(
                    Collection::Projects,
                    document(json!({
                        "_id": id,
                        "title": format!("Project {id}"),
                        "description": "d",
                        "department": "Computer Science",
                        "supervisorId": supervisor,
                        "maxStudents": 2,
                        "currentStudents": 1,
                        "status": "assigned",
                    })),
                )
                .await
                .unwrap();
        }
        store
            .insert(
                Collection::Allocations,
                document(json!({"studentId": "s1", "projectId": "p1", "supervisorId": "v1"})),
            )
            .await
            .unwrap();
        Ledger::new(store, Arc::new(KeyedLocks::new()))
    }

    fn submission(project: &str, report: &str) -> Submission {
        Submission {
            student_id: "s1".into(),
            project_id: project.into(),
            report: report.into(),
        }
    }

    #[tokio::test]
    async fn reports_need_a_matching_allocation() {
        let ledger = ledger().await;
        assert!(matches!(
            ledger.submit(submission("p2", "week 1")).await,
            Err(AppError::NotAllocated { .. })
        ));
        assert!(matches!(
            ledger.submit(submission("p1", "  ")).await,
            Err(AppError::MissingRequiredField("report"))
        ));
        let report = ledger.submit(submission("p1", "week 1")).await.unwrap();
        assert!(report.awaits_feedback());
    }

    #[tokio::test]
    async fn feedback_overwrites() {
        let ledger = ledger().await;
        let report = ledger.submit(submission("p1", "week 1")).await.unwrap();
        ledger.attach_feedback(&report.id, "good start").await.unwrap();
        let again = ledger.attach_feedback(&report.id, "needs tests").await.unwrap();
        assert_eq!(again.feedback.as_deref(), Some("needs tests"));
        assert!(matches!(
            ledger.attach_feedback(&report.id, "").await,
            Err(AppError::MissingRequiredField("feedback"))
        ));
        assert!(matches!(
            ledger.attach_feedback("missing", "x").await,
            Err(AppError::ReportNotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_filters_and_enriches() {
        let ledger = ledger().await;
        let report = ledger.submit(submission("p1", "week 1")).await.unwrap();

        let all = ledger.list(&ProgressFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].student.as_ref().unwrap().name, "Alice Brown");
        assert_eq!(all[0].project.as_ref().unwrap().title, "Project p1");

        let mine = ProgressFilter {
            supervisor_id: Some("v1".into()),
            ..ProgressFilter::default()
        };
        assert_eq!(ledger.list(&mine).await.unwrap().len(), 1);
        let other = ProgressFilter {
            supervisor_id: Some("v2".into()),
            ..ProgressFilter::default()
        };
        assert!(ledger.list(&other).await.unwrap().is_empty());

        assert!(ledger.delete(&report.id).await.unwrap());
        assert!(!ledger.delete(&report.id).await.unwrap());
    }

    #[tokio::test]
    async fn submission_waits_for_the_student() {
        let ledger = Arc::new(ledger().await);
        let guard = ledger.locks.student("s1").await;
        let pending = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.submit(submission("p1", "week 1")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        // The allocation disappears before the submission gets its turn.
        ledger
            .store
            .clear(Collection::Allocations)
            .await
            .unwrap();
        drop(guard);
        assert!(matches!(
            pending.await.unwrap(),
            Err(AppError::NotAllocated { .. })
        ));
        assert!(ledger.list(&ProgressFilter::default()).await.unwrap().is_empty());
    }
}
