//! Error taxonomy shared by the query and ingestion paths, and its mapping
//! onto HTTP responses.

use crate::cursor::CursorError;
use crate::renderer::RenderError;
use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Generic message returned for every backend failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Handle missing or outside the accepted grammar
    #[error("Must provide a valid handle")]
    InvalidHandle,

    #[error("No user for handle {0} found")]
    ProfileNotFound(String),

    /// The rendered page had no recognizable profile image
    #[error("Unable to scrape profile image for user")]
    ImageNotFound,

    #[error("Invalid pagination cursor: {0}")]
    InvalidCursor(#[from] CursorError),

    #[error("Store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Render failure: {0}")]
    Render(#[from] RenderError),
}

impl DirectoryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidHandle | Self::InvalidCursor(_) => StatusCode::BAD_REQUEST,
            Self::ProfileNotFound(_) | Self::ImageNotFound => StatusCode::NOT_FOUND,
            Self::Store(_) | Self::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidHandle => "VALIDATION_ERROR",
            Self::InvalidCursor(_) => "INVALID_CURSOR",
            Self::ProfileNotFound(_) | Self::ImageNotFound => "NOT_FOUND",
            Self::Store(_) | Self::Render(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this is an infrastructure failure rather than a caller mistake
    /// or a legitimate absence.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Render(_))
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for DirectoryError {
    fn into_response(self) -> Response {
        let error = if self.is_internal() {
            tracing::error!(error = %self, "request failed on backend");
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            code: self.code().to_string(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}
