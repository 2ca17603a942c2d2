//! HTTP error rendering.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::engine::SchedulingError;
use crate::messages::{error_message, Locale};

/// Failure body: `{success: false, code, message}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub code: &'static str,
    pub message: String,
}

/// A scheduling error plus the locale its message should be rendered in.
#[derive(Debug)]
pub struct AppError {
    pub error: SchedulingError,
    pub locale: Locale,
}

impl AppError {
    pub fn new(error: SchedulingError, locale: Locale) -> Self {
        Self { error, locale }
    }
}

pub fn status_of(err: &SchedulingError) -> StatusCode {
    match err {
        SchedulingError::Authentication => StatusCode::UNAUTHORIZED,
        SchedulingError::Authorization(_) => StatusCode::FORBIDDEN,
        SchedulingError::Validation(_) => StatusCode::BAD_REQUEST,
        SchedulingError::NotFound { .. } => StatusCode::NOT_FOUND,
        SchedulingError::Conflict(_) => StatusCode::CONFLICT,
        SchedulingError::QuotaExceeded { .. } | SchedulingError::InsufficientCredit { .. } => {
            StatusCode::BAD_REQUEST
        }
        SchedulingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let SchedulingError::Storage(detail) = &self.error {
            error!("storage failure: {detail}");
        }
        let body = ErrorBody {
            success: false,
            code: self.error.code(),
            message: error_message(&self.error, self.locale),
        };
        (status_of(&self.error), Json(body)).into_response()
    }
}

/// Attach the caller's locale to an engine result.
pub trait Localized<T> {
    fn localized(self, locale: Locale) -> Result<T, AppError>;
}

impl<T> Localized<T> for Result<T, SchedulingError> {
    fn localized(self, locale: Locale) -> Result<T, AppError> {
        self.map_err(|e| AppError::new(e, locale))
    }
}
