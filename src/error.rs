use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpiosError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Missing parameter: {0}")]
    MissingParameter(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Command error: {0}")]
    Command(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("GPIO error: {0}")]
    Gpio(String),
}

impl ResponseError for GpiosError {
    fn status_code(&self) -> StatusCode {
        match self {
            GpiosError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            GpiosError::InvalidState(_)
            | GpiosError::InvalidParameter(_)
            | GpiosError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            GpiosError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            GpiosError::Command(_) | GpiosError::Config(_) | GpiosError::Gpio(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
