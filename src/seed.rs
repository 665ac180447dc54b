//! Demonstration data.
//!
//! Everything goes through the regular services, so the seeded state obeys
//! the same invariants as data entered over HTTP.

use crate::app::App;
use crate::catalog::ProjectDraft;
use crate::error::AppError;
use crate::identity::{Registration, RoleFields};
use crate::progress::Submission;
use tracing::info;

pub const DEMO_PASSWORD: &str = "password123";

const SUPERVISORS: [(&str, &str, &str, &str); 3] = [
    (
        "Dr. Jane Smith",
        "jane.smith@example.com",
        "Computer Science",
        "AI and Machine Learning",
    ),
    (
        "Prof. Michael Johnson",
        "michael.johnson@example.com",
        "Engineering",
        "Energy Systems",
    ),
    (
        "Dr. Sarah Wilson",
        "sarah.wilson@example.com",
        "Cybersecurity",
        "Blockchain Security",
    ),
];

// name, email, department, matric number, preference
const STUDENTS: [(&str, &str, &str, &str, &str); 5] = [
    (
        "John Doe",
        "john.doe@example.com",
        "Computer Science",
        "CS2024001",
        "AI and Machine Learning",
    ),
    (
        "Alice Brown",
        "alice.brown@example.com",
        "Engineering",
        "ENG2024001",
        "Energy Systems",
    ),
    (
        "Bob Wilson",
        "bob.wilson@example.com",
        "Cybersecurity",
        "CS2024002",
        "Blockchain Security",
    ),
    (
        "Emma Davis",
        "emma.davis@example.com",
        "Computer Science",
        "CS2024003",
        "Web Development",
    ),
    (
        "James Wilson",
        "james.wilson@example.com",
        "Engineering",
        "ENG2024002",
        "Robotics",
    ),
];

struct DemoProject {
    title: &'static str,
    description: &'static str,
    supervisor: usize,
    max_students: u32,
    duration: &'static str,
    requirements: &'static str,
}

const PROJECTS: [DemoProject; 5] = [
    DemoProject {
        title: "AI-Powered Healthcare System",
        description: "Develop an AI system for medical diagnosis assistance using machine learning algorithms.",
        supervisor: 0,
        max_students: 3,
        duration: "6 months",
        requirements: "Python, Machine Learning, Healthcare domain knowledge",
    },
    DemoProject {
        title: "Natural Language Processing for Education",
        description: "Create an NLP system to assist in educational content creation and assessment.",
        supervisor: 0,
        max_students: 2,
        duration: "4 months",
        requirements: "NLP, Python, Education background preferred",
    },
    DemoProject {
        title: "Blockchain Security Analysis",
        description: "Analyze security vulnerabilities in blockchain networks and develop mitigation strategies.",
        supervisor: 2,
        max_students: 2,
        duration: "5 months",
        requirements: "Cryptography, Network Security, Programming",
    },
    DemoProject {
        title: "Sustainable Energy Optimization",
        description: "Research and develop algorithms for optimizing renewable energy distribution in smart grids.",
        supervisor: 1,
        max_students: 4,
        duration: "8 months",
        requirements: "Mathematics, Programming, Energy systems knowledge",
    },
    DemoProject {
        title: "Autonomous Drone Navigation",
        description: "Develop algorithms for autonomous drone navigation in complex environments.",
        supervisor: 1,
        max_students: 3,
        duration: "7 months",
        requirements: "Computer Vision, Robotics, C++/Python",
    },
];

// student index, project index, report, feedback
const REPORTS: [(usize, usize, &str, Option<&str>); 2] = [
    (
        0,
        0,
        "I have completed the initial research phase and started implementing the machine learning model. Currently working on data preprocessing and feature selection.",
        Some("Good progress. Consider exploring more recent research papers on feature selection techniques for healthcare data."),
    ),
    (
        2,
        2,
        "I have analyzed three different blockchain protocols and identified common security vulnerabilities. Currently working on developing a testing framework for automated vulnerability detection.",
        None,
    ),
];

fn registration(name: &str, email: &str, role: &str, fields: RoleFields) -> Registration {
    Registration {
        name: name.to_owned(),
        email: email.to_owned(),
        password: DEMO_PASSWORD.to_owned(),
        role: role.to_owned(),
        fields,
    }
}

/// Populate an empty store. Returns `false` without touching anything when
/// accounts already exist.
pub async fn seed(app: &App) -> Result<bool, AppError> {
    if app.identity.count_accounts().await? > 0 {
        info!("store already holds accounts, not seeding");
        return Ok(false);
    }

    app.identity
        .register(registration(
            "Admin User",
            "admin@example.com",
            "admin",
            RoleFields::default(),
        ))
        .await?;

    let mut supervisors = Vec::with_capacity(SUPERVISORS.len());
    for (name, email, department, specialization) in SUPERVISORS {
        let fields = RoleFields {
            department: Some(department.to_owned()),
            specialization: Some(specialization.to_owned()),
            ..RoleFields::default()
        };
        let account = app
            .identity
            .register(registration(name, email, "supervisor", fields))
            .await?;
        supervisors.push(account.id);
    }

    let mut students = Vec::with_capacity(STUDENTS.len());
    for (name, email, department, matric_number, preference) in STUDENTS {
        let fields = RoleFields {
            department: Some(department.to_owned()),
            matric_number: Some(matric_number.to_owned()),
            preference: Some(preference.to_owned()),
            ..RoleFields::default()
        };
        let account = app
            .identity
            .register(registration(name, email, "student", fields))
            .await?;
        students.push(account.id);
    }

    let mut projects = Vec::with_capacity(PROJECTS.len());
    for demo in &PROJECTS {
        let supervisor = &SUPERVISORS[demo.supervisor];
        let view = app
            .catalog
            .create_project(ProjectDraft {
                title: demo.title.to_owned(),
                description: demo.description.to_owned(),
                department: supervisor.2.to_owned(),
                max_students: Some(demo.max_students),
                requirements: Some(demo.requirements.to_owned()),
                duration: Some(demo.duration.to_owned()),
                supervisor_id: supervisors[demo.supervisor].clone(),
            })
            .await?;
        projects.push(view.project.id);
    }

    for &(student, project, text, feedback) in &REPORTS {
        app.allocations
            .assign(&students[student], &projects[project])
            .await?;
        let report = app
            .ledger
            .submit(Submission {
                student_id: students[student].clone(),
                project_id: projects[project].clone(),
                report: text.to_owned(),
            })
            .await?;
        if let Some(feedback) = feedback {
            app.ledger.attach_feedback(&report.id, feedback).await?;
        }
    }

    info!(
        supervisors = supervisors.len(),
        students = students.len(),
        projects = projects.len(),
        allocations = REPORTS.len(),
        "demo data loaded",
    );
    Ok(true)
}
