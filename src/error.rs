use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors. None of these are fatal to the process; the
/// last loaded library snapshot stays visible through all of them.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// The store could not be reached; recovered by the next poll.
    #[error("movie database unavailable: {0}")]
    Connectivity(String),

    /// The anonymous session could not be established.
    #[error("could not authenticate with the service: {0}")]
    Auth(String),

    /// The generative-text or metadata call failed or returned a payload
    /// that did not match the declared shape. The attempt is discarded and
    /// prior state left unchanged.
    #[error("the suggestion service failed: {0}")]
    ExternalService(String),

    /// A user-triggered precondition was not met; resolved by user action,
    /// not by retrying.
    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Auth(_) | AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
