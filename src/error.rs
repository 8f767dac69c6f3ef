use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

// Taken from https://github.com/tokio-rs/axum/blob/main/examples/anyhow-error-response/src/main.rs
#[derive(Debug)]
pub struct ServiceError {
    pub status: StatusCode,
    pub message: HttpErrorResponse,
}

#[derive(Debug, Serialize)]
pub struct HttpErrorResponse {
    error: String,
}

impl From<String> for HttpErrorResponse {
    fn from(message: String) -> Self {
        HttpErrorResponse { error: message }
    }
}

impl From<&str> for HttpErrorResponse {
    fn from(message: &str) -> Self {
        HttpErrorResponse {
            error: message.to_string(),
        }
    }
}

impl ServiceError {
    pub fn new(status: StatusCode, message: impl Into<HttpErrorResponse>) -> Self {
        ServiceError {
            status,
            message: message.into(),
        }
    }

    /// Keeps the status the multipart parser picked, e.g. 413 for oversized bodies
    pub fn from_multipart(err: MultipartError) -> Self {
        ServiceError::new(err.status(), err.body_text())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let mut res = Json(self.message).into_response();
        *res.status_mut() = self.status;
        res
    }
}

impl<E> From<E> for ServiceError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        ServiceError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: HttpErrorResponse::from(err.into().to_string()),
        }
    }
}

pub type ServiceResult<T, E = ServiceError> = Result<T, E>;

#[macro_export]
macro_rules! bail_service {
    ($error_message:expr) => {
        return Err($crate::error::ServiceError::new(
            ::axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            $error_message,
        ))
    };
    ($status_code:expr, $error_message:expr) => {
        return Err($crate::error::ServiceError::new($status_code, $error_message))
    };
    ($status:expr, $fmt:expr $(, $arg:expr)*) => {
        return Err($crate::error::ServiceError::new($status, format!($fmt $(, $arg)*)))
    };
}
