//! A service for interacting with items.
//!
//! Every mutating call runs in its own transaction: begin, do the repository
//! work, then commit. Any failure along the way rolls back and hands the
//! original error to the caller.

use super::{
    item_repository::{Item, NewItem, UpdateItem},
    unit_of_work::{UnitOfWork, UowResult},
};
use crate::{
    infra::validation::Valid,
    store::{cancellable, DocumentStore},
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use utoipa::ToSchema;

/// An item as shown to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ItemView {
    /// The item's identifier.
    #[schema(example = "6f1c3a52-6f54-4b0f-9a43-0e8b3f8f4d2a")]
    pub id: String,
    /// The item's name.
    #[schema(example = "Widget")]
    pub name: String,
    /// The item's description.
    #[schema(example = "A widget")]
    pub description: String,
    /// The item's price.
    #[schema(value_type = f64, example = 9.99)]
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

impl From<Item> for ItemView {
    fn from(item: Item) -> Self {
        Self {
            id: item.id.map(|id| id.to_string()).unwrap_or_default(),
            name: item.name,
            description: item.description,
            price: item.price,
        }
    }
}

/// What came of an update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The item was changed and now looks like this.
    Updated(ItemView),
    /// The patch was empty, so nothing was sent to the store.
    NoFieldsProvided,
    /// No such item.
    NotFound,
}

/// Item operations for one request.
#[derive(Debug)]
pub struct ItemService<S: DocumentStore> {
    uow: UnitOfWork<S>,
}

impl<S: DocumentStore> ItemService<S> {
    /// Creates a service working through `uow`.
    pub fn new(uow: UnitOfWork<S>) -> Self {
        Self { uow }
    }

    /// The unit of work backing this service.
    pub fn unit_of_work(&self) -> &UnitOfWork<S> {
        &self.uow
    }

    /// Creates an item.
    #[instrument(skip_all)]
    pub async fn create(
        &mut self,
        new_item: Valid<NewItem>,
        cancel: &CancellationToken,
    ) -> UowResult<ItemView> {
        let mut item = Item::new(new_item.into_inner(), Utc::now());
        let mut tx = self.uow.begin(cancel).await?;
        let added = cancellable(cancel, self.uow.items().add(tx.session(), &mut item)).await;
        if let Err(e) = added {
            tracing::warn!("Create failed, rolling back: {}", e);
            self.uow.rollback(tx).await;
            return Err(e.into());
        }
        self.uow.commit(tx, cancel).await?;
        Ok(ItemView::from(item))
    }

    /// Lists all items.
    #[instrument(skip_all)]
    pub async fn get_all(&self) -> UowResult<Vec<ItemView>> {
        let items = self.uow.items().get_all().await?;
        Ok(items.into_iter().map(ItemView::from).collect())
    }

    /// Reads an item.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: &str) -> UowResult<Option<ItemView>> {
        let item = self.uow.items().get_by_id(id).await?;
        Ok(item.map(ItemView::from))
    }

    /// Applies the fields present in `patch` to an item.
    #[instrument(skip(self, patch, cancel))]
    pub async fn update(
        &mut self,
        id: &str,
        patch: Valid<UpdateItem>,
        cancel: &CancellationToken,
    ) -> UowResult<UpdateOutcome> {
        let Some(update) = patch.inner().to_update(Utc::now()) else {
            tracing::info!("No updatable fields provided");
            return Ok(UpdateOutcome::NoFieldsProvided);
        };

        let mut tx = self.uow.begin(cancel).await?;
        let patched = cancellable(cancel, self.uow.items().patch(tx.session(), id, &update)).await;
        let found = match patched {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Update failed, rolling back: {}", e);
                self.uow.rollback(tx).await;
                return Err(e.into());
            }
        };
        if !found {
            self.uow.rollback(tx).await;
            return Ok(UpdateOutcome::NotFound);
        }
        self.uow.commit(tx, cancel).await?;

        Ok(match self.uow.items().get_by_id(id).await? {
            Some(item) => UpdateOutcome::Updated(item.into()),
            None => UpdateOutcome::NotFound,
        })
    }

    /// Deletes an item, returning whether it existed.
    #[instrument(skip(self, cancel))]
    pub async fn delete(&mut self, id: &str, cancel: &CancellationToken) -> UowResult<bool> {
        let mut tx = self.uow.begin(cancel).await?;
        let deleted = cancellable(cancel, self.uow.items().delete(tx.session(), id)).await;
        match deleted {
            Ok(true) => {
                self.uow.commit(tx, cancel).await?;
                Ok(true)
            }
            Ok(false) => {
                self.uow.rollback(tx).await;
                Ok(false)
            }
            Err(e) => {
                tracing::warn!("Delete failed, rolling back: {}", e);
                self.uow.rollback(tx).await;
                Err(e.into())
            }
        }
    }
}
