use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::models::key::KeyError;
use crate::services::object_store::StoreError;
use crate::services::transformer::TransformError;

/// Classification of a per-record failure, as reported in batch results and
/// failure notifications.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedKey,
    NotFound,
    AccessDenied,
    InvalidRequest,
    UnsupportedFormat,
    CorruptImage,
    TransientIo,
}

impl ErrorKind {
    /// Transient failures may succeed on retry; everything else is final.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::TransientIo)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MalformedKey => "malformed_key",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::CorruptImage => "corrupt_image",
            ErrorKind::TransientIo => "transient_io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a single record.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

impl ProcessingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::Key(_) => ErrorKind::MalformedKey,
            ProcessingError::Store(err) => err.kind(),
            ProcessingError::Transform(err) => err.kind(),
        }
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}
