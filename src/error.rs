use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Training data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Empty vocabulary: no n-gram reaches min_df={min_df} across {n_docs} documents")]
    EmptyVocabulary { min_df: usize, n_docs: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Artifact missing: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Artifact corrupt at {}: {reason}", path.display())]
    ArtifactCorrupt { path: PathBuf, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] bincode::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            _ => {
                tracing::error!("Internal server error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

// Helper function for creating artifact decoding errors
pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> AppError {
    AppError::ArtifactCorrupt {
        path: path.into(),
        reason: reason.into(),
    }
}

// Helper function for creating configuration errors
pub fn invalid_config(msg: &str) -> AppError {
    AppError::InvalidConfig(msg.to_string())
}
