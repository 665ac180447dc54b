use crate::store::StoreError;
use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("invalid user role: {0}")]
    InvalidRole(String),

    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("{0}")]
    Invalid(String),

    #[error("{}", .0.body_text())]
    MalformedBody(#[from] JsonRejection),

    #[error("{}", .0.body_text())]
    MalformedQuery(#[from] QueryRejection),

    #[error("user with email {0} already exists")]
    DuplicateEmail(String),

    #[error("student with matriculation number {0} already exists")]
    DuplicateMatricNumber(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account is deactivated")]
    AccountDeactivated,

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("student {0} not found")]
    StudentNotFound(String),

    #[error("supervisor {0} not found")]
    SupervisorNotFound(String),

    #[error("project {0} not found")]
    ProjectNotFound(String),

    #[error("allocation {0} not found")]
    AllocationNotFound(String),

    #[error("progress report {0} not found")]
    ReportNotFound(String),

    #[error("student {0} is already allocated to a project")]
    StudentAlreadyAllocated(String),

    #[error("project {0} has no room left")]
    ProjectFull(String),

    #[error("student {student} is not allocated to project {project}")]
    NotAllocated { student: String, project: String },

    #[error("{0}")]
    InUse(String),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::MissingRequiredField(_)
            | AppError::InvalidRole(_)
            | AppError::InvalidEmail(_)
            | AppError::Invalid(_)
            | AppError::MalformedBody(_)
            | AppError::MalformedQuery(_) => ErrorKind::Validation,
            AppError::InvalidCredentials | AppError::AccountDeactivated => ErrorKind::Unauthorized,
            AppError::AccountNotFound(_)
            | AppError::StudentNotFound(_)
            | AppError::SupervisorNotFound(_)
            | AppError::ProjectNotFound(_)
            | AppError::AllocationNotFound(_)
            | AppError::ReportNotFound(_) => ErrorKind::NotFound,
            AppError::DuplicateEmail(_)
            | AppError::DuplicateMatricNumber(_)
            | AppError::StudentAlreadyAllocated(_)
            | AppError::ProjectFull(_)
            | AppError::NotAllocated { .. }
            | AppError::InUse(_) => ErrorKind::Conflict,
            AppError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Stable identifier clients can match on.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::MissingRequiredField(_) => "MissingRequiredField",
            AppError::InvalidRole(_) => "InvalidRole",
            AppError::InvalidEmail(_) => "InvalidEmail",
            AppError::Invalid(_) => "ValidationError",
            AppError::MalformedBody(_) => "MalformedBody",
            AppError::MalformedQuery(_) => "InvalidQuery",
            AppError::DuplicateEmail(_) => "DuplicateEmail",
            AppError::DuplicateMatricNumber(_) => "DuplicateMatricNumber",
            AppError::InvalidCredentials => "InvalidCredentials",
            AppError::AccountDeactivated => "AccountDeactivated",
            AppError::AccountNotFound(_) => "AccountNotFound",
            AppError::StudentNotFound(_) => "StudentNotFound",
            AppError::SupervisorNotFound(_) => "SupervisorNotFound",
            AppError::ProjectNotFound(_) => "ProjectNotFound",
            AppError::AllocationNotFound(_) => "AllocationNotFound",
            AppError::ReportNotFound(_) => "NotFound",
            AppError::StudentAlreadyAllocated(_) => "StudentAlreadyAllocated",
            AppError::ProjectFull(_) => "ProjectFull",
            AppError::NotAllocated { .. } => "NotAllocated",
            AppError::InUse(_) => "InUse",
            AppError::Store(_) => "InternalError",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let message = if kind == ErrorKind::Internal {
            error!(error = %self, "request failed");
            "internal error".to_owned()
        } else {
            self.to_string()
        };
        let body = json!({
            "error": {
                "kind": kind,
                "code": self.code(),
                "message": message,
            }
        });
        (kind.status(), Json(body)).into_response()
    }
}
