//! APIs for checking that the application is alive.

use crate::{
    infra::{response::Envelope, state::AppState},
    store::DocumentStore,
};
use axum::{extract::State, routing::get, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The health API endpoints.
pub fn routes<S: DocumentStore>() -> Router<AppState<S>> {
    Router::new().route("/health", get(health::<S>))
}

/// Application health.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    /// Always `UP` while the server answers.
    #[schema(example = "UP")]
    pub status: String,
    /// Whether the document store answered a ping.
    #[schema(example = "Connected")]
    pub db_status: String,
    /// Seconds since startup.
    #[schema(example = "42s")]
    pub uptime: String,
}

/// Returns application health.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Success", body = HealthEnvelope),
    )
)]
pub async fn health<S: DocumentStore>(State(state): State<AppState<S>>) -> Envelope<Health> {
    let db_status = if state.store().ping().await {
        "Connected"
    } else {
        "Disconnected"
    };
    Envelope::ok(Health {
        status: "UP".to_string(),
        db_status: db_status.to_string(),
        uptime: format!("{}s", state.started_at().elapsed().as_secs()),
    })
}
