//! HTTP surface.
//!
//! Handlers only translate between JSON and the services in [`App`];
//! failures turn into responses through [`AppError`].

use crate::allocation::AllocationFilter;
use crate::app::App;
use crate::catalog::{ProjectDraft, ProjectFilter, ProjectUpdate};
use crate::directory::{StudentUpdate, SupervisorUpdate};
use crate::error::AppError;
use crate::extract::{Params, Payload};
use crate::identity::{Credentials, Registration};
use crate::progress::{ProgressFilter, Submission};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

type Shared = State<Arc<App>>;

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/users", get(list_users).delete(purge_users))
        .route("/auth/users/{id}", axum::routing::patch(set_user_active))
        .route("/students", get(list_students).post(create_student))
        .route(
            "/students/{id}",
            get(get_student).put(update_student).delete(delete_student),
        )
        .route("/supervisors", get(list_supervisors).post(create_supervisor))
        .route(
            "/supervisors/{id}",
            get(get_supervisor)
                .put(update_supervisor)
                .delete(delete_supervisor),
        )
        .route("/projects", get(list_projects).post(create_project))
        .route(
            "/projects/{id}",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/allocations", get(list_allocations).post(assign))
        .route("/allocations/reconcile", post(reconcile))
        .route("/allocations/{id}", get(get_allocation).delete(unassign))
        .route("/progress", get(list_progress).post(submit_progress))
        .route(
            "/progress/{id}",
            axum::routing::patch(attach_feedback).delete(delete_progress),
        )
        .with_state(app)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn deleted(what: &str, id: &str, removed: bool) -> Result<Json<Value>, AppError> {
    if removed {
        Ok(Json(json!({ "message": format!("{what} deleted"), "id": id })))
    } else {
        Err(match what {
            "student" => AppError::StudentNotFound(id.to_owned()),
            "supervisor" => AppError::SupervisorNotFound(id.to_owned()),
            "project" => AppError::ProjectNotFound(id.to_owned()),
            _ => AppError::ReportNotFound(id.to_owned()),
        })
    }
}

async fn register(
    State(app): Shared,
    Payload(registration): Payload<Registration>,
) -> Result<impl IntoResponse, AppError> {
    let account = app.identity.register(registration).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn login(
    State(app): Shared,
    Payload(credentials): Payload<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.identity.authenticate(credentials).await?))
}

async fn list_users(State(app): Shared) -> Result<impl IntoResponse, AppError> {
    let users = app.identity.list_accounts().await?;
    Ok(Json(json!({ "count": users.len(), "users": users })))
}

async fn purge_users(State(app): Shared) -> Result<impl IntoResponse, AppError> {
    let removed = app.identity.purge_accounts().await?;
    Ok(Json(json!({ "deletedCount": removed })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Activation {
    is_active: bool,
}

async fn set_user_active(
    State(app): Shared,
    Path(id): Path<String>,
    Payload(activation): Payload<Activation>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.identity.set_active(&id, activation.is_active).await?))
}

async fn list_students(State(app): Shared) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.directory.list_students().await?))
}

async fn create_student(
    State(app): Shared,
    Payload(registration): Payload<Registration>,
) -> Result<impl IntoResponse, AppError> {
    let student = app.directory.create_student(registration).await?;
    Ok((StatusCode::CREATED, Json(student)))
}

async fn get_student(
    State(app): Shared,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.directory.get_student(&id).await?))
}

async fn update_student(
    State(app): Shared,
    Path(id): Path<String>,
    Payload(update): Payload<StudentUpdate>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.directory.update_student(&id, update).await?))
}

async fn delete_student(
    State(app): Shared,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let removed = app.directory.delete_student(&id).await?;
    deleted("student", &id, removed)
}

async fn list_supervisors(State(app): Shared) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.directory.list_supervisors().await?))
}

async fn create_supervisor(
    State(app): Shared,
    Payload(registration): Payload<Registration>,
) -> Result<impl IntoResponse, AppError> {
    let supervisor = app.directory.create_supervisor(registration).await?;
    Ok((StatusCode::CREATED, Json(supervisor)))
}

async fn get_supervisor(
    State(app): Shared,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.directory.get_supervisor(&id).await?))
}

async fn update_supervisor(
    State(app): Shared,
    Path(id): Path<String>,
    Payload(update): Payload<SupervisorUpdate>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.directory.update_supervisor(&id, update).await?))
}

async fn delete_supervisor(
    State(app): Shared,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let removed = app.directory.delete_supervisor(&id).await?;
    deleted("supervisor", &id, removed)
}

async fn list_projects(
    State(app): Shared,
    Params(filter): Params<ProjectFilter>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.catalog.list_projects(&filter).await?))
}

async fn create_project(
    State(app): Shared,
    Payload(draft): Payload<ProjectDraft>,
) -> Result<impl IntoResponse, AppError> {
    let project = app.catalog.create_project(draft).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(app): Shared,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.catalog.get_project(&id).await?))
}

async fn update_project(
    State(app): Shared,
    Path(id): Path<String>,
    Payload(update): Payload<ProjectUpdate>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.catalog.update_project(&id, update).await?))
}

async fn delete_project(
    State(app): Shared,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let removed = app.catalog.delete_project(&id).await?;
    deleted("project", &id, removed)
}

async fn list_allocations(
    State(app): Shared,
    Params(filter): Params<AllocationFilter>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.allocations.list(&filter).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Assignment {
    #[serde(default)]
    student_id: String,
    #[serde(default)]
    project_id: String,
}

async fn assign(
    State(app): Shared,
    Payload(assignment): Payload<Assignment>,
) -> Result<impl IntoResponse, AppError> {
    if assignment.student_id.trim().is_empty() {
        return Err(AppError::MissingRequiredField("studentId"));
    }
    if assignment.project_id.trim().is_empty() {
        return Err(AppError::MissingRequiredField("projectId"));
    }
    let allocation = app
        .allocations
        .assign(&assignment.student_id, &assignment.project_id)
        .await?;
    let view = app.allocations.get(&allocation.id).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_allocation(
    State(app): Shared,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.allocations.get(&id).await?))
}

async fn unassign(
    State(app): Shared,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    app.allocations.unassign(&id).await?;
    Ok(Json(json!({ "message": "allocation deleted", "id": id })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileParams {
    #[serde(default)]
    dry_run: bool,
}

async fn reconcile(
    State(app): Shared,
    Params(params): Params<ReconcileParams>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.allocations.reconcile(params.dry_run).await?))
}

async fn list_progress(
    State(app): Shared,
    Params(filter): Params<ProgressFilter>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.ledger.list(&filter).await?))
}

async fn submit_progress(
    State(app): Shared,
    Payload(submission): Payload<Submission>,
) -> Result<impl IntoResponse, AppError> {
    let report = app.ledger.submit(submission).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

#[derive(Deserialize)]
struct Feedback {
    #[serde(default)]
    feedback: String,
}

async fn attach_feedback(
    State(app): Shared,
    Path(id): Path<String>,
    Payload(body): Payload<Feedback>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.ledger.attach_feedback(&id, &body.feedback).await?))
}

async fn delete_progress(
    State(app): Shared,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let removed = app.ledger.delete(&id).await?;
    deleted("progress report", &id, removed)
}
