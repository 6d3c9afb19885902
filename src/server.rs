//! The HTTP server.
//!
//! # Examples
//!
//! Create an item, then read it back.
//!
//! ```rust
//! # use item_service::{feature::item::item_service::ItemView, infra::response::Envelope};
//! # use item_service::store::memory::MemoryStore;
//! # tokio_test::block_on(async {
//! # let url = item_service::server::spawn_app_with_store(MemoryStore::new()).await.unwrap();
//! let client = reqwest::Client::new();
//! let response = client
//!     .post(format!("{url}/api/items"))
//!     .json(&serde_json::json!({ "name": "Widget", "price": 9.99 }))
//!     .send()
//!     .await
//!     .unwrap();
//! assert_eq!(201, response.status());
//! let created = response.json::<Envelope<ItemView>>().await.unwrap().data.unwrap();
//!
//! let response = reqwest::get(format!("{url}/api/items/{}", created.id)).await.unwrap();
//! assert_eq!(200, response.status());
//! let item = response.json::<Envelope<ItemView>>().await.unwrap().data.unwrap();
//! assert_eq!(created, item);
//! # });
//! ```

use crate::{
    feature::{health::health_api, item::item_api},
    infra::{
        config::ServerConfig,
        error::{InternalError, PanicHandler},
        middleware::MakeRequestIdSpan,
        openapi::ApiDoc,
        state::AppState,
    },
    store::DocumentStore,
};
use axum::{error_handling::HandleErrorLayer, response::IntoResponse, Router};
use http::header::AUTHORIZATION;
use std::{iter, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    sensitive_headers::SetSensitiveRequestHeadersLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;
use utoipa_redoc::{Redoc, Servable};
use utoipa_swagger_ui::SwaggerUi;

/// Constructs the full axum application.
pub fn app<S: DocumentStore>(state: AppState<S>, config: &ServerConfig) -> Router {
    // Fallible middleware from tower, mapped to infallible response with [`HandleErrorLayer`].
    let tower_middleware = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|e| async move {
            InternalError::Other(format!("Tower middleware failed: {e}")).into_response()
        }))
        .concurrency_limit(config.concurrency_limit);

    Router::new()
        .merge(SwaggerUi::new("/api/swagger-ui").url("/api/openapi.json", ApiDoc::openapi()))
        .merge(Redoc::with_url("/api/redoc", ApiDoc::openapi()))
        .merge(RapiDoc::new("/api/openapi.json").path("/api/rapidoc"))
        .merge(health_api::routes())
        .nest("/api", item_api::routes())
        .with_state(state)
        // Layers
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(MakeRequestIdSpan)
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(()),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(SetSensitiveRequestHeadersLayer::new(iter::once(
            AUTHORIZATION,
        )))
        .layer(tower_middleware)
        .layer(CatchPanicLayer::custom(PanicHandler))
}

/// Starts the axum server, serving until ctrl-c or until the state's
/// shutdown token is cancelled.
pub async fn run_app<S: DocumentStore>(
    listener: TcpListener,
    state: AppState<S>,
    config: ServerConfig,
) -> std::io::Result<()> {
    let shutdown = state.shutdown().clone();
    let app = app(state, &config);

    tracing::info!("Starting axum on {}", listener.local_addr()?);
    let exit_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await;

    match &exit_result {
        Ok(_) => tracing::info!("Successfully shut down"),
        Err(e) => tracing::error!("Shutdown failed: {}", e),
    }
    exit_result
}

/// Completes on ctrl-c or cancellation, then cancels in-flight requests.
async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to fetch ctrl_c: {}", e);
                token.cancelled().await;
            }
        }
        _ = token.cancelled() => {}
    }
    tracing::info!("Shutting down");
    token.cancel();
}

/// Spawn a server on a random port, returning its base url.
pub async fn spawn_app_with_store<S: DocumentStore>(store: S) -> std::io::Result<String> {
    let address = "127.0.0.1";
    let listener = TcpListener::bind(format!("{address}:0")).await?;
    let port = listener.local_addr()?.port();
    let config = ServerConfig {
        address: address.to_string(),
        http_port: port,
        request_timeout: Duration::from_secs(10),
        concurrency_limit: 500,
    };
    tokio::spawn(run_app(listener, AppState::new(store), config));
    Ok(format!("http://{address}:{port}"))
}
