//! A small document store abstraction.
//!
//! The rest of the application only talks to a [`DocumentStore`], which
//! offers the handful of operations a collection of JSON documents needs:
//! insert, find, targeted updates, delete, and session-scoped transactions.
//!
//! Two backends exist, [`postgres::PgDocumentStore`] for production and
//! [`memory::MemoryStore`] for local runs and tests.

pub mod memory;
pub mod postgres;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{borrow::Cow, fmt, future::Future, str::FromStr};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A stored document.
pub type Document = Map<String, Value>;

/// The field every stored document keeps its identifier in.
pub const ID_FIELD: &str = "_id";

/// A store-assigned document identifier.
///
/// Crosses API boundaries in its canonical string form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Generates a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying uuid.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ObjectId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ObjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A handle to a named collection of documents.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Collection {
    name: Cow<'static, str>,
}

impl Collection {
    /// Creates a handle for the collection with the given name.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self { name: name.into() }
    }

    /// The collection name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An ordered list of `set field = value` operations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateDefinition {
    sets: Vec<(String, Value)>,
}

impl UpdateDefinition {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `set field = value`.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.sets.push((field.into(), value.into()));
        self
    }

    /// Whether no operation has been added.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// The number of operations.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// The fields touched, in order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.sets.iter().map(|(field, _)| field.as_str())
    }

    /// The value set for `field`, if any. Later sets win.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.sets
            .iter()
            .rev()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Collapses the operations into the object that gets merged into a document.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        for (field, value) in &self.sets {
            doc.insert(field.clone(), value.clone());
        }
        doc
    }

    /// Applies the update to `doc`, returning whether anything changed.
    pub fn apply(&self, doc: &mut Document) -> bool {
        let mut changed = false;
        for (field, value) in &self.sets {
            if field == ID_FIELD {
                continue;
            }
            if doc.get(field) != Some(value) {
                doc.insert(field.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }
}

/// The outcome of [`DocumentStore::update_one`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Documents matching the filter.
    pub matched: u64,
    /// Documents whose content changed.
    pub modified: u64,
}

/// Errors from a document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An [`sqlx`] error.
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    /// A migration failed.
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A transaction was started on a session that already has one.
    #[error("a transaction is already in progress on this session")]
    TransactionInProgress,
    /// A transaction operation was used on a session without one.
    #[error("no transaction in progress on this session")]
    NoTransaction,
    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
    /// A fault raised by the store itself.
    #[error("store fault: {0}")]
    Fault(String),
}

/// The result of calling store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The capabilities the application needs from a document database.
///
/// Reads are not bound to a session. Writes go through a session, and are
/// staged until commit whenever the session has a transaction open.
/// Dropping a session with an open transaction aborts it.
#[async_trait::async_trait]
pub trait DocumentStore: Clone + Send + Sync + 'static {
    /// A client session that can carry a transaction.
    type Session: Send;

    /// Checks connectivity. Never fails.
    async fn ping(&self) -> bool;

    /// Returns a handle to the named collection.
    fn collection(&self, name: &'static str) -> Collection {
        Collection::new(name)
    }

    /// Starts a new session.
    async fn start_session(&self) -> StoreResult<Self::Session>;

    /// Starts a transaction on the session.
    async fn start_transaction(&self, session: &mut Self::Session) -> StoreResult<()>;

    /// Commits the session's transaction.
    async fn commit_transaction(&self, session: &mut Self::Session) -> StoreResult<()>;

    /// Aborts the session's transaction, discarding its writes.
    async fn abort_transaction(&self, session: &mut Self::Session) -> StoreResult<()>;

    /// Inserts a document and returns the identifier assigned to it.
    async fn insert_one(
        &self,
        session: &mut Self::Session,
        collection: &Collection,
        document: Document,
    ) -> StoreResult<ObjectId>;

    /// Returns every document in the collection, in insertion order.
    async fn find_all(&self, collection: &Collection) -> StoreResult<Vec<Document>>;

    /// Returns the document with the given identifier.
    async fn find_by_id(&self, collection: &Collection, id: ObjectId)
        -> StoreResult<Option<Document>>;

    /// Applies `update` to the document with the given identifier.
    async fn update_one(
        &self,
        session: &mut Self::Session,
        collection: &Collection,
        id: ObjectId,
        update: &UpdateDefinition,
    ) -> StoreResult<UpdateResult>;

    /// Deletes the document with the given identifier, returning how many were removed.
    async fn delete_one(
        &self,
        session: &mut Self::Session,
        collection: &Collection,
        id: ObjectId,
    ) -> StoreResult<u64>;
}

/// Runs `fut` unless `cancel` fires first.
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        result = fut => result,
    }
}
