//! Types and functions for storing and loading items from the document store.

use crate::store::{
    Collection, Document, DocumentStore, ObjectId, StoreError, StoreResult, UpdateDefinition,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

/// The collection items are stored in.
pub const ITEMS: &str = "items";

const NAME: &str = "name";
const DESCRIPTION: &str = "description";
const PRICE: &str = "price";
const UPDATED_AT: &str = "updatedAt";

const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);
const MAX_PRICE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if *price < MIN_PRICE || *price > MAX_PRICE {
        return Err(ValidationError::new("range"));
    }
    Ok(())
}

/// A new item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
pub struct NewItem {
    /// The item's name.
    #[schema(example = "Widget")]
    #[validate(length(min = 2, max = 100))]
    pub name: String,
    /// The item's description.
    #[schema(example = "A widget")]
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: String,
    /// The item's price.
    #[schema(example = 9.99)]
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    #[validate(custom(function = "validate_price"))]
    pub price: Decimal,
}

/// A partial update of an item. Absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
pub struct UpdateItem {
    /// The item's new name.
    #[schema(example = "Gadget")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 2, max = 100))]
    pub name: Option<String>,
    /// The item's new description.
    #[schema(example = "A gadget")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 500))]
    pub description: Option<String>,
    /// The item's new price.
    #[schema(example = 5)]
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "rust_decimal::serde::float_option::serialize"
    )]
    #[validate(custom(function = "validate_price"))]
    pub price: Option<Decimal>,
}

impl UpdateItem {
    /// Builds the store update for the fields that are present.
    ///
    /// Every patchable field is listed here explicitly. `updatedAt` is set to
    /// `now` whenever anything else is. Returns `None` when no field is
    /// present, in which case nothing should be sent to the store.
    pub fn to_update(&self, now: DateTime<Utc>) -> Option<UpdateDefinition> {
        let fields: [(&str, Option<Value>); 3] = [
            (NAME, self.name.clone().map(Value::from)),
            (DESCRIPTION, self.description.clone().map(Value::from)),
            (PRICE, self.price.map(|price| Value::from(price.to_string()))),
        ];

        let mut update = UpdateDefinition::new();
        for (field, value) in fields {
            if let Some(value) = value {
                update.set(field, value);
            }
        }
        if update.is_empty() {
            return None;
        }
        update.set(UPDATED_AT, timestamp(now));
        Some(update)
    }
}

/// Formats a timestamp the way [`chrono`] serializes it.
fn timestamp(at: DateTime<Utc>) -> Value {
    Value::from(at.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
}

/// A stored item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Assigned by the store on insert.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// A not yet stored item with both timestamps set to `now`.
    pub fn new(new_item: NewItem, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            name: new_item.name,
            description: new_item.description,
            price: new_item.price,
            created_at: now,
            updated_at: now,
        }
    }
}

fn to_document(item: &Item) -> StoreResult<Document> {
    match serde_json::to_value(item)? {
        Value::Object(doc) => Ok(doc),
        other => Err(StoreError::Fault(format!("item encoded as non-object {other}"))),
    }
}

fn from_document(doc: Document) -> StoreResult<Item> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// An item repository.
///
/// Identifiers arrive as strings; one that is not a valid [`ObjectId`]
/// simply matches nothing.
#[derive(Clone, Debug)]
pub struct ItemRepository<S> {
    store: S,
    collection: Collection,
}

impl<S: DocumentStore> ItemRepository<S> {
    /// Creates a new repository.
    pub fn new(store: S) -> Self {
        let collection = store.collection(ITEMS);
        Self { store, collection }
    }

    /// Inserts an item and assigns its identifier.
    #[instrument(skip(self, session))]
    pub async fn add(&self, session: &mut S::Session, item: &mut Item) -> StoreResult<ObjectId> {
        tracing::info!("Creating item");
        let doc = to_document(item)?;
        let id = self.store.insert_one(session, &self.collection, doc).await?;
        item.id = Some(id);
        tracing::info!("Created item {}", id);
        Ok(id)
    }

    /// Lists all items.
    #[instrument(skip(self))]
    pub async fn get_all(&self) -> StoreResult<Vec<Item>> {
        tracing::info!("Listing items");
        let items = self
            .store
            .find_all(&self.collection)
            .await?
            .into_iter()
            .map(from_document)
            .collect::<StoreResult<Vec<_>>>()?;
        tracing::info!("Listed {} items", items.len());
        Ok(items)
    }

    /// Reads an item.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: &str) -> StoreResult<Option<Item>> {
        tracing::info!("Reading item");
        let Ok(id) = id.parse::<ObjectId>() else {
            tracing::warn!("Malformed item id");
            return Ok(None);
        };
        let item = self
            .store
            .find_by_id(&self.collection, id)
            .await?
            .map(from_document)
            .transpose()?;
        tracing::info!("Found item: {:?}", item);
        Ok(item)
    }

    /// Deletes an item, returning whether it existed.
    #[instrument(skip(self, session))]
    pub async fn delete(&self, session: &mut S::Session, id: &str) -> StoreResult<bool> {
        tracing::info!("Deleting item");
        let Ok(id) = id.parse::<ObjectId>() else {
            tracing::warn!("Malformed item id");
            return Ok(false);
        };
        let deleted = self.store.delete_one(session, &self.collection, id).await?;
        if deleted == 0 {
            tracing::warn!("Item not found");
            return Ok(false);
        }
        tracing::info!("Deleted item");
        Ok(true)
    }

    /// Applies `update` to an item, returning whether it exists.
    ///
    /// An update that leaves the stored values unchanged still counts.
    #[instrument(skip(self, session, update), fields(fields = ?update.fields().collect::<Vec<_>>()))]
    pub async fn patch(
        &self,
        session: &mut S::Session,
        id: &str,
        update: &UpdateDefinition,
    ) -> StoreResult<bool> {
        tracing::info!("Patching item");
        let Ok(id) = id.parse::<ObjectId>() else {
            tracing::warn!("Malformed item id");
            return Ok(false);
        };
        let result = self
            .store
            .update_one(session, &self.collection, id, update)
            .await?;
        tracing::info!(
            "Matched {} and modified {} item(s)",
            result.matched,
            result.modified
        );
        Ok(result.matched > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryStore, StoreOp};
    use serde_json::json;

    fn widget() -> NewItem {
        NewItem {
            name: "Widget".to_string(),
            description: "A widget".to_string(),
            price: Decimal::new(999, 2),
        }
    }

    #[test]
    fn empty_update_builds_nothing() {
        assert_eq!(None, UpdateItem::default().to_update(Utc::now()));
    }

    #[test]
    fn update_sets_present_fields_then_timestamp() {
        let now = Utc::now();
        let patch = UpdateItem {
            name: None,
            description: Some(String::new()),
            price: Some(Decimal::new(5, 0)),
        };

        let update = patch.to_update(now).unwrap();

        let fields: Vec<_> = update.fields().collect();
        assert_eq!(vec!["description", "price", "updatedAt"], fields);
        assert_eq!(Some(&json!("")), update.get("description"));
        assert_eq!(Some(&json!("5")), update.get("price"));
        let stamped: DateTime<Utc> =
            serde_json::from_value(update.get("updatedAt").unwrap().clone()).unwrap();
        assert_eq!(now, stamped);
    }

    #[test]
    fn price_bounds_are_inclusive() {
        assert!(validate_price(&Decimal::new(1, 2)).is_ok());
        assert!(validate_price(&Decimal::new(1_000_000, 0)).is_ok());
        assert!(validate_price(&Decimal::ZERO).is_err());
        assert!(validate_price(&Decimal::new(1_000_001, 0)).is_err());
    }

    #[test]
    fn new_item_rules() {
        assert!(widget().validate().is_ok());
        let short_name = NewItem {
            name: "W".to_string(),
            ..widget()
        };
        assert!(short_name.validate().is_err());
        let long_description = NewItem {
            description: "x".repeat(501),
            ..widget()
        };
        assert!(long_description.validate().is_err());
    }

    #[test]
    fn update_rules_only_check_present_fields() {
        assert!(UpdateItem::default().validate().is_ok());
        let free = UpdateItem {
            price: Some(Decimal::ZERO),
            ..Default::default()
        };
        assert!(free.validate().is_err());
    }

    #[test]
    fn new_item_accepts_numeric_and_string_prices() {
        let numeric: NewItem =
            serde_json::from_str(r#"{"name": "Widget", "price": 9.99}"#).unwrap();
        let string: NewItem =
            serde_json::from_str(r#"{"name": "Widget", "price": "9.99"}"#).unwrap();
        assert_eq!(Decimal::new(999, 2), numeric.price);
        assert_eq!(numeric, string);
        assert_eq!("", numeric.description);
    }

    #[tokio::test]
    async fn add_assigns_an_id_and_stores_the_item() {
        let store = MemoryStore::new();
        let repository = ItemRepository::new(store.clone());
        let mut session = store.start_session().await.unwrap();
        let mut item = Item::new(widget(), Utc::now());

        let id = repository.add(&mut session, &mut item).await.unwrap();

        assert_eq!(Some(id), item.id);
        let stored = repository.get_by_id(&id.to_string()).await.unwrap();
        assert_eq!(Some(item.clone()), stored);
        assert_eq!(vec![item], repository.get_all().await.unwrap());
    }

    #[tokio::test]
    async fn malformed_ids_never_reach_the_store() {
        let store = MemoryStore::new();
        let repository = ItemRepository::new(store.clone());
        let mut session = store.start_session().await.unwrap();
        let update = UpdateItem {
            price: Some(Decimal::new(5, 0)),
            ..Default::default()
        }
        .to_update(Utc::now())
        .unwrap();

        assert_eq!(None, repository.get_by_id("zzz").await.unwrap());
        assert!(!repository.patch(&mut session, "zzz", &update).await.unwrap());
        assert!(!repository.delete(&mut session, "zzz").await.unwrap());
        assert_eq!(0, store.calls(StoreOp::FindById));
        assert_eq!(0, store.calls(StoreOp::UpdateOne));
        assert_eq!(0, store.calls(StoreOp::DeleteOne));
    }

    #[tokio::test]
    async fn patch_and_delete_report_whether_anything_happened() {
        let store = MemoryStore::new();
        let repository = ItemRepository::new(store.clone());
        let mut session = store.start_session().await.unwrap();
        let mut item = Item::new(widget(), Utc::now());
        let id = repository.add(&mut session, &mut item).await.unwrap().to_string();
        let update = UpdateItem {
            name: Some("Gadget".to_string()),
            ..Default::default()
        }
        .to_update(Utc::now())
        .unwrap();

        assert!(repository.patch(&mut session, &id, &update).await.unwrap());
        let patched = repository.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!("Gadget", patched.name);
        assert_eq!(item.description, patched.description);
        assert_eq!(item.price, patched.price);

        assert!(repository.delete(&mut session, &id).await.unwrap());
        assert!(!repository.delete(&mut session, &id).await.unwrap());
        assert!(!repository.patch(&mut session, &id, &update).await.unwrap());
    }

    #[tokio::test]
    async fn patch_that_changes_nothing_still_finds_the_item() {
        let store = MemoryStore::new();
        let repository = ItemRepository::new(store.clone());
        let mut session = store.start_session().await.unwrap();
        let now = Utc::now();
        let mut item = Item::new(widget(), now);
        let id = repository.add(&mut session, &mut item).await.unwrap().to_string();
        let update = UpdateItem {
            name: Some("Gadget".to_string()),
            ..Default::default()
        }
        .to_update(now)
        .unwrap();

        assert!(repository.patch(&mut session, &id, &update).await.unwrap());
        let before = store.documents(ITEMS);
        assert!(repository.patch(&mut session, &id, &update).await.unwrap());
        assert_eq!(before, store.documents(ITEMS));
    }
}
