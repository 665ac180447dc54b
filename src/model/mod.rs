//! Entities held in the record store.

mod account;
mod allocation;
mod progress;
mod project;
mod student;
mod supervisor;

pub use account::{Account, AccountRecord, Role};
pub use allocation::Allocation;
pub use progress::ProgressReport;
pub use project::{Project, ProjectStatus};
pub use student::Student;
pub use supervisor::Supervisor;

use chrono::{DateTime, Utc};

/// Sort records newest first.
pub fn newest_first<T>(records: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    records.sort_by_key(|r| std::cmp::Reverse(created_at(r)));
}
