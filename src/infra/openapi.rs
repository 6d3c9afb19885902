//! OpenAPI configuration.

use crate::feature::{
    health::health_api,
    item::{item_api, item_repository, item_service},
};
use crate::infra::{error, response};
use utoipa::OpenApi;

/// OpenApi configuration.
#[derive(OpenApi)]
#[openapi(
    info(title = "Item Service", description = "Create, read, patch and delete items."),
    paths(
        health_api::health,
        item_api::create_item,
        item_api::list_items,
        item_api::get_item,
        item_api::update_item,
        item_api::delete_item,
    ),
    components(
        schemas(
            health_api::Health,
            item_repository::NewItem,
            item_repository::UpdateItem,
            item_service::ItemView,
            response::ItemEnvelope,
            response::ItemListEnvelope,
            response::MessageEnvelope,
            response::HealthEnvelope,
            error::ErrorBody,
        )
    )
)]
#[derive(Clone, Copy, Debug)]
pub struct ApiDoc;
