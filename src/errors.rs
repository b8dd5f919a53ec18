use crate::services::{
    metadata_store::MetadataError, object_store::ObjectStoreError, upload_service::UploadError,
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

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

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

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

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match &err {
            UploadError::Transfer(ObjectStoreError::InvalidPath) => {
                AppError::bad_request(err.to_string())
            }
            UploadError::Transfer(ObjectStoreError::Io(io))
                if io.kind() == std::io::ErrorKind::FileTooLarge =>
            {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            _ => AppError::new(StatusCode::BAD_GATEWAY, err.to_string()),
        }
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    }
}

impl From<ObjectStoreError> for AppError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotFound(path) => {
                AppError::not_found(format!("object `{}` not found", path))
            }
            ObjectStoreError::InvalidPath => AppError::bad_request("invalid storage path"),
            ObjectStoreError::Io(io) => AppError::internal(io.to_string()),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transfer_error_is_bad_gateway() {
        let err = UploadError::Transfer(ObjectStoreError::Io(std::io::Error::other("reset")));
        let app: AppError = err.into();
        assert_eq!(app.status, StatusCode::BAD_GATEWAY);
        assert!(app.message.contains("reset"));
    }

    #[test]
    fn test_oversized_transfer_is_payload_too_large() {
        let io = std::io::Error::new(std::io::ErrorKind::FileTooLarge, "too big");
        let app: AppError = UploadError::Transfer(ObjectStoreError::Io(io)).into();
        assert_eq!(app.status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_missing_object_is_not_found() {
        let app: AppError = ObjectStoreError::NotFound("abc.png".into()).into();
        assert_eq!(app.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_metadata_error_is_unavailable() {
        let app: AppError = MetadataError::Closed.into();
        assert_eq!(app.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(app.to_string(), "metadata store closed");
    }
}
