//! The envelope every successful response is wrapped in.

use super::extract::Json;
use crate::feature::{health::health_api::Health, item::item_service::ItemView};
use axum::response::IntoResponse;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A standard success response body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[aliases(
    ItemEnvelope = Envelope<ItemView>,
    ItemListEnvelope = Envelope<Vec<ItemView>>,
    MessageEnvelope = Envelope<String>,
    HealthEnvelope = Envelope<Health>
)]
pub struct Envelope<T> {
    /// Always `true`.
    pub success: bool,
    /// A human readable note, often empty.
    pub message: String,
    /// The payload.
    pub data: Option<T>,
    /// Mirrors the HTTP status code.
    #[schema(example = 200)]
    pub status_code: u16,
}

impl<T> Envelope<T> {
    /// Wraps `data` in a `200 OK` envelope.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: String::new(),
            data: Some(data),
            status_code: StatusCode::OK.as_u16(),
        }
    }

    /// Sets the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Sets the status code.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status_code = status.as_u16();
        self
    }

    /// The status code as an [`http::StatusCode`].
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK)
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> axum::response::Response {
        (self.status(), Json(self)).into_response()
    }
}
