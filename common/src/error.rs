use async_openai::error::OpenAIError;
use axum::http::StatusCode;
use thiserror::Error;
use tokio::task::JoinError;

/// Application-wide error taxonomy. Every variant maps to exactly one HTTP
/// status class so handlers never need to guess at a status code.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Upstream dependency (LLM vendor, embedder) failed in a way a retry may fix.
    #[error("Transient upstream error: {0}")]
    TransientUpstream(String),
    /// A dependency is known to be down or overloaded; retrying immediately won't help.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TransientUpstream(_) => StatusCode::BAD_GATEWAY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<surrealdb::Error> for AppError {
    fn from(err: surrealdb::Error) -> Self {
        Self::Internal(format!("database error: {err}"))
    }
}

impl From<OpenAIError> for AppError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::Reqwest(_) | OpenAIError::StreamError(_) => {
                Self::TransientUpstream(err.to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<JoinError> for AppError {
    fn from(err: JoinError) -> Self {
        Self::Internal(format!("task join error: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("io error: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::TransientUpstream(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<object_store::Error> for AppError {
    fn from(err: object_store::Error) -> Self {
        Self::Internal(format!("object store error: {err}"))
    }
}

impl From<duckdb::Error> for AppError {
    fn from(err: duckdb::Error) -> Self {
        Self::Internal(format!("sql sandbox error: {err}"))
    }
}
