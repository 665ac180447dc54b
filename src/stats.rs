use crate::model::{Allocation, Project, Student, Supervisor};
use crate::store::{Filter, RecordStore, StoreError, fetch_all};
use std::collections::HashMap;

/// Everything the offline reports look at, read once.
pub struct Snapshot {
    pub students: Vec<Student>,
    pub supervisors: Vec<Supervisor>,
    pub projects: Vec<Project>,
    pub allocations: Vec<Allocation>,
}

impl Snapshot {
    pub async fn load(store: &dyn RecordStore) -> Result<Snapshot, StoreError> {
        let all = Filter::new();
        Ok(Snapshot {
            students: fetch_all::<Student>(store, &all).await?,
            supervisors: fetch_all::<Supervisor>(store, &all).await?,
            projects: fetch_all::<Project>(store, &all).await?,
            allocations: fetch_all::<Allocation>(store, &all).await?,
        })
    }

    pub fn student(&self, id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn supervisor(&self, id: &str) -> Option<&Supervisor> {
        self.supervisors.iter().find(|s| s.id == id)
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    /// Students holding an allocation to `project`.
    pub fn students_for(&self, project: &str) -> Vec<&Student> {
        self.allocations
            .iter()
            .filter(|a| a.project_id == project)
            .filter_map(|a| self.student(&a.student_id))
            .collect()
    }

    pub fn unassigned_students(&self) -> Vec<&Student> {
        self.students
            .iter()
            .filter(|s| !self.allocations.iter().any(|a| a.student_id == s.id))
            .collect()
    }

    pub fn filter_projects<F: Fn(&Project) -> bool>(&self, f: F) -> Vec<&Project> {
        self.projects.iter().filter(|p| f(p)).collect()
    }
}

/// Number of projects per occupancy level, counted from the allocation
/// records: `result[n]` is how many projects hold exactly `n` students.
/// Trailing empty levels are dropped.
pub fn statistics(snapshot: &Snapshot) -> Vec<usize> {
    let mut held = HashMap::<&str, usize>::new();
    for allocation in &snapshot.allocations {
        *held.entry(allocation.project_id.as_str()).or_default() += 1;
    }
    let mut levels = vec![0; snapshot.projects.len() + 1];
    for project in &snapshot.projects {
        let n = held.get(project.id.as_str()).copied().unwrap_or(0);
        if n >= levels.len() {
            levels.resize(n + 1, 0);
        }
        levels[n] += 1;
    }
    let latest = levels.iter().rposition(|&n| n != 0).map_or(0, |n| n + 1);
    levels.truncate(latest);
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn project(id: &str) -> Project {
        Project {
            id: id.to_owned(),
            title: id.to_uppercase(),
            description: String::new(),
            department: "CS".to_owned(),
            supervisor_id: "v".to_owned(),
            max_students: 3,
            current_students: 0,
            status: crate::model::ProjectStatus::Available,
            requirements: None,
            duration: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn allocation(student: &str, project: &str) -> Allocation {
        Allocation {
            id: format!("{student}-{project}"),
            student_id: student.to_owned(),
            project_id: project.to_owned(),
            supervisor_id: "v".to_owned(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_statistics() {
        let snapshot = Snapshot {
            students: vec![],
            supervisors: vec![],
            projects: vec![project("a"), project("b"), project("c")],
            allocations: vec![
                allocation("s1", "a"),
                allocation("s2", "a"),
                allocation("s3", "b"),
            ],
        };
        assert_eq!(statistics(&snapshot), vec![1, 1, 1]);

        let empty = Snapshot {
            allocations: vec![],
            ..snapshot
        };
        assert_eq!(statistics(&empty), vec![3]);
    }
}
