//! The item API implementation.

use crate::{
    feature::item::{
        item_repository::{NewItem, UpdateItem},
        item_service::{ItemService, ItemView, UpdateOutcome},
        unit_of_work::UnitOfWork,
    },
    infra::{
        error::{ApiResult, ClientError},
        extract::Json,
        response::Envelope,
        state::AppState,
        validation::Valid,
    },
    store::DocumentStore,
};
use axum::{extract::State, Router};
use axum_extra::routing::{RouterExt, TypedPath};
use http::{header::LOCATION, HeaderName, StatusCode};
use serde::Deserialize;
use tracing::instrument;

/// The item API endpoints.
pub fn routes<S: DocumentStore>() -> Router<AppState<S>> {
    Router::new()
        .typed_post(create_item::<S>)
        .typed_get(list_items::<S>)
        .typed_get(get_item::<S>)
        .typed_patch(update_item::<S>)
        .typed_delete(delete_item::<S>)
}

#[derive(Deserialize, TypedPath)]
#[typed_path("/items", rejection(ClientError))]
struct Items;

#[derive(Deserialize, TypedPath)]
#[typed_path("/items/:id", rejection(ClientError))]
struct ItemsId(String);

fn item_service<S: DocumentStore>(state: &AppState<S>) -> ItemService<S> {
    ItemService::new(UnitOfWork::new(state.store().clone()))
}

/// Creates a new item.
#[utoipa::path(
    post,
    path = "/api/items",
    request_body = NewItem,
    responses(
        (status = 201, description = "Created", body = ItemEnvelope),
        (status = 400, description = "Bad Request", body = ErrorBody),
        (status = 500, description = "Internal Server Error", body = ErrorBody),
    )
)]
#[instrument(skip_all)]
async fn create_item<S: DocumentStore>(
    Items: Items,
    State(state): State<AppState<S>>,
    Json(new_item): Json<NewItem>,
) -> ApiResult<([(HeaderName, String); 1], Envelope<ItemView>)> {
    let new_item = Valid::new(new_item)?;
    let cancel = state.request_token();
    let item = item_service(&state).create(new_item, &cancel).await?;
    let location = format!("/api{}", ItemsId(item.id.clone()));
    Ok((
        [(LOCATION, location)],
        Envelope::ok(item).with_status(StatusCode::CREATED),
    ))
}

/// Lists all items.
#[utoipa::path(
    get,
    path = "/api/items",
    responses(
        (status = 200, description = "Success", body = ItemListEnvelope),
        (status = 500, description = "Internal Server Error", body = ErrorBody),
    )
)]
#[instrument(skip_all)]
async fn list_items<S: DocumentStore>(
    Items: Items,
    State(state): State<AppState<S>>,
) -> ApiResult<Envelope<Vec<ItemView>>> {
    let items = item_service(&state).get_all().await?;
    Ok(Envelope::ok(items))
}

/// Gets an item.
#[utoipa::path(
    get,
    path = "/api/items/{id}",
    params(("id" = String, Path, description = "The item's identifier")),
    responses(
        (status = 200, description = "Success", body = ItemEnvelope),
        (status = 404, description = "Not Found", body = ErrorBody),
        (status = 500, description = "Internal Server Error", body = ErrorBody),
    )
)]
#[instrument(skip(state))]
async fn get_item<S: DocumentStore>(
    ItemsId(id): ItemsId,
    State(state): State<AppState<S>>,
) -> ApiResult<Envelope<ItemView>> {
    let item = item_service(&state)
        .get_by_id(&id)
        .await?
        .ok_or(ClientError::NotFound("Item"))?;
    Ok(Envelope::ok(item))
}

/// Applies a partial update to an item.
#[utoipa::path(
    patch,
    path = "/api/items/{id}",
    params(("id" = String, Path, description = "The item's identifier")),
    request_body = UpdateItem,
    responses(
        (status = 200, description = "Success", body = ItemEnvelope),
        (status = 400, description = "Bad Request", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody),
        (status = 500, description = "Internal Server Error", body = ErrorBody),
    )
)]
#[instrument(skip(state, patch))]
async fn update_item<S: DocumentStore>(
    ItemsId(id): ItemsId,
    State(state): State<AppState<S>>,
    Json(patch): Json<UpdateItem>,
) -> ApiResult<Envelope<ItemView>> {
    let patch = Valid::new(patch)?;
    let cancel = state.request_token();
    match item_service(&state).update(&id, patch, &cancel).await? {
        UpdateOutcome::Updated(item) => Ok(Envelope::ok(item)),
        UpdateOutcome::NoFieldsProvided => {
            Err(ClientError::BadRequest("no updatable fields provided".to_string()).into())
        }
        UpdateOutcome::NotFound => Err(ClientError::NotFound("Item").into()),
    }
}

/// Deletes an item.
#[utoipa::path(
    delete,
    path = "/api/items/{id}",
    params(("id" = String, Path, description = "The item's identifier")),
    responses(
        (status = 200, description = "Success", body = MessageEnvelope),
        (status = 404, description = "Not Found", body = ErrorBody),
        (status = 500, description = "Internal Server Error", body = ErrorBody),
    )
)]
#[instrument(skip(state))]
async fn delete_item<S: DocumentStore>(
    ItemsId(id): ItemsId,
    State(state): State<AppState<S>>,
) -> ApiResult<Envelope<String>> {
    let cancel = state.request_token();
    if !item_service(&state).delete(&id, &cancel).await? {
        return Err(ClientError::NotFound("Item").into());
    }
    Ok(Envelope::ok(String::new()).with_message("Item deleted"))
}
