use crate::stats::{self, Snapshot};
use eyre::WrapErr;
use serde::Serialize;
use std::io::Write;

pub fn display_details(s: &Snapshot) {
    let mut projects = s.projects.iter().collect::<Vec<_>>();
    projects.sort_by_key(|p| p.title.clone());
    for p in projects {
        let mut students = s.students_for(&p.id);
        students.sort_by_key(|st| st.name.clone());
        if !students.is_empty() {
            let supervisor = s.supervisor(&p.supervisor_id);
            print!("{} [{}/{}]", p.title, students.len(), p.max_students);
            if let Some(supervisor) = supervisor {
                print!(" - {}", supervisor.name);
            }
            println!(":");
            for st in students {
                print!("  - {st}");
                if supervisor
                    .is_some_and(|v| st.preference.as_deref() == Some(v.specialization.as_str()))
                {
                    print!(" (preference matched)");
                }
                println!();
            }
            println!();
        }
    }
}

pub fn display_stats(s: &Snapshot) {
    let students = s.students.len();
    let unassigned = s.unassigned_students().len();
    println!(
        "Students assigned/unassigned/total: {}/{}/{}",
        students - unassigned,
        unassigned,
        students
    );
    let seats: u32 = s.projects.iter().map(|p| p.max_students).sum();
    let free: u32 = s.projects.iter().map(|p| p.open_spots()).sum();
    println!(
        "Seats taken/free/total: {}/{}/{}",
        s.allocations.len(),
        free,
        seats
    );
    let levels = stats::statistics(s);
    let cumul = levels.iter().scan(0, |acc, &n| {
        *acc += n;
        Some(*acc)
    });
    let total: usize = levels.iter().sum();
    println!("Project occupancy:");
    for (occupancy, (n, c)) in levels.iter().zip(cumul).enumerate() {
        if *n != 0 {
            println!(
                "  - {} student(s): {} (cumulative {} - {:.2}%)",
                occupancy,
                n,
                c,
                100.0 * c as f32 / total as f32
            );
        }
    }
}

pub fn display_empty(s: &Snapshot) {
    let mut projects = s.filter_projects(|p| s.students_for(&p.id).is_empty());
    projects.sort_by_key(|p| p.title.clone());
    if !projects.is_empty() {
        println!("Empty projects:");
        for p in projects {
            println!("  - {} ({})", p.title, p.status.as_str());
        }
    }
}

pub fn display_unassigned(s: &Snapshot) {
    let mut students = s.unassigned_students();
    students.sort_by_key(|st| st.name.clone());
    if !students.is_empty() {
        println!("Students without a project:");
        for st in students {
            match &st.preference {
                Some(preference) => println!("  - {st}, prefers {preference}"),
                None => println!("  - {st}"),
            }
        }
    }
}

#[derive(Serialize)]
struct ExportRow<'a> {
    student: &'a str,
    matric_number: &'a str,
    email: &'a str,
    project: &'a str,
    supervisor: &'a str,
    allocated_at: String,
}

/// Write one CSV line per allocation, ordered by project then student.
pub fn export_csv<W: Write>(s: &Snapshot, output: W) -> eyre::Result<()> {
    let mut writer = csv::Writer::from_writer(output);
    let mut rows = s
        .allocations
        .iter()
        .filter_map(|a| {
            let student = s.student(&a.student_id)?;
            let project = s.project(&a.project_id)?;
            Some(ExportRow {
                student: &student.name,
                matric_number: &student.matric_number,
                email: &student.email,
                project: &project.title,
                supervisor: s
                    .supervisor(&a.supervisor_id)
                    .map_or("", |v| v.name.as_str()),
                allocated_at: a.created_at.to_rfc3339(),
            })
        })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| (a.project, a.student).cmp(&(b.project, b.student)));
    for row in rows {
        writer
            .serialize(row)
            .wrap_err("cannot write allocation row")?;
    }
    writer.flush().wrap_err("cannot flush CSV output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::seed::seed;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn export_lists_every_allocation() {
        let app = App::new(Arc::new(MemoryStore::new()));
        seed(&app).await.unwrap();
        let snapshot = Snapshot::load(&*app.store).await.unwrap();
        let mut out = Vec::new();
        export_csv(&snapshot, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(
            lines[0],
            "student,matric_number,email,project,supervisor,allocated_at"
        );
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("John Doe,CS2024001,"));
        assert!(lines[2].contains("Blockchain Security Analysis,Dr. Sarah Wilson"));
    }
}
