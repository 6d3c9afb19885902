//! Types for reporting errors that happened during a request.
//!
//! If your function is called from a request handler, you likely want to
//! return an [`ApiResult`]. Every error becomes an [`ErrorBody`] carrying a
//! stable error code of the form `ITEMSVC-00002`.

use super::extract::Json;
use crate::{feature::item::unit_of_work::UowError, store::StoreError};
use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::HeaderValue,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tower_http::catch_panic::ResponseForPanic;
use utoipa::ToSchema;

/// Prefixes every error code.
pub const SERVICE_ID: &str = "ITEMSVC";

/// The message sent for every internal error.
pub const INTERNAL_ERROR_MESSAGE: &str = "An unexpected error occurred.";

/// Categories of errors reported to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Something went wrong on our side.
    InternalServerError = 0,
    /// The request was malformed or invalid.
    BadRequest = 1,
    /// The resource does not exist.
    ResourceNotFound = 2,
    /// The resource clashes with an existing one.
    ResourceConflict = 3,
}

impl ErrorCode {
    /// The code as sent to clients, e.g. `ITEMSVC-00002`.
    pub fn as_code(self) -> String {
        format!("{SERVICE_ID}-{:05X}", self as u32)
    }
}

/// A standard error response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Always `false`.
    success: bool,
    /// A stable code identifying the kind of error.
    #[schema(example = "ITEMSVC-00002")]
    error_code: String,
    /// A description of the error.
    #[schema(example = "Item not found")]
    message: String,
    /// When the error happened.
    timestamp: DateTime<Utc>,
}

impl ErrorBody {
    pub(crate) fn new(code: ErrorCode, message: String) -> Self {
        Self {
            success: false,
            error_code: code.as_code(),
            message,
            timestamp: Utc::now(),
        }
    }

    /// The error code.
    pub fn error_code(&self) -> &str {
        self.error_code.as_ref()
    }

    /// The error message.
    pub fn message(&self) -> &str {
        self.message.as_ref()
    }

    /// When the error happened.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// An error from our API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// An error caused by the client.
    #[error("{0}")]
    ClientError(#[from] ClientError),
    /// An internal error.
    #[error("{0}")]
    InternalError(#[from] InternalError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::ClientError(e) => e.into_response(),
            ApiError::InternalError(e) => {
                tracing::error!("internal error: {}", e);
                e.into_response()
            }
        }
    }
}

/// The result of calling API-related functions.
pub type ApiResult<T> = Result<T, ApiError>;

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::InternalError(InternalError::Store(e))
    }
}

impl From<UowError> for ApiError {
    fn from(e: UowError) -> Self {
        ApiError::InternalError(InternalError::Transaction(e))
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = e
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let codes: Vec<_> = errors.iter().map(|e| e.code.as_ref()).collect();
                format!("{field} ({})", codes.join(","))
            })
            .collect();
        fields.sort();
        ApiError::ClientError(ClientError::BadRequest(format!(
            "invalid field(s): {}",
            fields.join(",")
        )))
    }
}

/// Errors caused by the client.
/// The client can do something to fix these.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Input validation failed, or some illegal operation was attempted.
    #[error("{0}")]
    BadRequest(String),
    /// The resource was not found.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The resource already exists.
    #[error("conflict")]
    Conflict,
    /// A rejection from one of axum's extractors.
    #[error("{1}")]
    Custom(StatusCode, String),
}

impl ClientError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Custom(status, _) => *status,
        }
    }

    fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::ResourceNotFound,
            Self::Conflict => ErrorCode::ResourceConflict,
            Self::Custom(status, _) if *status == StatusCode::NOT_FOUND => {
                ErrorCode::ResourceNotFound
            }
            Self::BadRequest(_) | Self::Custom(..) => ErrorCode::BadRequest,
        }
    }
}

impl Default for ClientError {
    fn default() -> Self {
        Self::BadRequest("Bad Request".to_string())
    }
}

impl From<JsonRejection> for ClientError {
    fn from(value: JsonRejection) -> Self {
        ClientError::Custom(value.status(), value.body_text())
    }
}

impl From<PathRejection> for ClientError {
    fn from(value: PathRejection) -> Self {
        ClientError::Custom(value.status(), value.body_text())
    }
}

impl IntoResponse for ClientError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = ErrorBody::new(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

/// An internal error.
/// The client cannot do anything about this.
#[derive(Debug, thiserror::Error)]
pub enum InternalError {
    /// The document store failed.
    #[error("{0}")]
    Store(StoreError),
    /// A transaction could not be completed.
    #[error("transaction failed: {0}")]
    Transaction(UowError),
    /// Other miscellaneous errors.
    #[error("{0}")]
    Other(String),
}

impl IntoResponse for InternalError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorBody::new(
            ErrorCode::InternalServerError,
            INTERNAL_ERROR_MESSAGE.to_string(),
        );
        let mut response = (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        response
            .headers_mut()
            .insert("Retry-After", HeaderValue::from_static("5"));
        response
    }
}

/// A handler for converting panics into proper responses for the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PanicHandler;

impl ResponseForPanic for PanicHandler {
    type ResponseBody = axum::body::Body;

    fn response_for_panic(
        &mut self,
        _: Box<dyn std::any::Any + Send + 'static>,
    ) -> http::Response<Self::ResponseBody> {
        ApiError::InternalError(InternalError::Other("Panic".to_string())).into_response()
    }
}
