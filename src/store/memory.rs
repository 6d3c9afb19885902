//! An in-process [`DocumentStore`].
//!
//! Transactions work on a snapshot of the collections and record their
//! writes; committing replays the writes onto the shared state, aborting or
//! dropping the session throws them away. Every operation is counted, and a
//! single failure can be injected into the next call of any operation.
//!
//! [`MemoryStore::calls`], [`MemoryStore::fail_next`] and
//! [`MemoryStore::open_transactions`] are public so that integration tests and
//! doctests of code built on this crate can observe and break the store. They
//! are not compiled out of release builds.

use super::{
    Collection, Document, DocumentStore, ObjectId, StoreError, StoreResult, UpdateDefinition,
    UpdateResult, ID_FIELD,
};
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::instrument;

/// The operations of a [`DocumentStore`], for counting calls and injecting faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Ping,
    StartSession,
    StartTransaction,
    CommitTransaction,
    AbortTransaction,
    InsertOne,
    FindAll,
    FindById,
    UpdateOne,
    DeleteOne,
}

type Collections = HashMap<String, Vec<(ObjectId, Document)>>;

#[derive(Debug)]
enum Write {
    Insert(String, ObjectId, Document),
    Update(String, ObjectId, UpdateDefinition),
    Delete(String, ObjectId),
}

#[derive(Debug, Default)]
struct State {
    collections: Collections,
    calls: HashMap<StoreOp, usize>,
    faults: HashSet<StoreOp>,
    open_transactions: usize,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn update(collections: &mut Collections, name: &str, id: ObjectId, def: &UpdateDefinition) -> UpdateResult {
    let Some(doc) = collections
        .get_mut(name)
        .and_then(|docs| docs.iter_mut().find(|(doc_id, _)| *doc_id == id))
        .map(|(_, doc)| doc)
    else {
        return UpdateResult::default();
    };
    let modified = def.apply(doc);
    UpdateResult {
        matched: 1,
        modified: u64::from(modified),
    }
}

fn delete(collections: &mut Collections, name: &str, id: ObjectId) -> u64 {
    let Some(docs) = collections.get_mut(name) else {
        return 0;
    };
    let before = docs.len();
    docs.retain(|(doc_id, _)| *doc_id != id);
    (before - docs.len()) as u64
}

fn replay(collections: &mut Collections, writes: Vec<Write>) {
    for write in writes {
        match write {
            Write::Insert(name, id, doc) => collections.entry(name).or_default().push((id, doc)),
            Write::Update(name, id, def) => {
                update(collections, &name, id, &def);
            }
            Write::Delete(name, id) => {
                delete(collections, &name, id);
            }
        }
    }
}

/// An in-memory document store. Clones share the same data.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `op` fail with [`StoreError::Fault`].
    pub fn fail_next(&self, op: StoreOp) {
        lock(&self.state).faults.insert(op);
    }

    /// How many times `op` has been called.
    pub fn calls(&self, op: StoreOp) -> usize {
        lock(&self.state).calls.get(&op).copied().unwrap_or(0)
    }

    /// How many transactions are currently open.
    pub fn open_transactions(&self) -> usize {
        lock(&self.state).open_transactions
    }

    /// A copy of the committed documents in a collection.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        lock(&self.state)
            .collections
            .get(collection)
            .map(|docs| docs.iter().map(|(_, doc)| doc.clone()).collect())
            .unwrap_or_default()
    }

    fn record(&self, op: StoreOp) -> StoreResult<()> {
        let mut state = lock(&self.state);
        *state.calls.entry(op).or_default() += 1;
        if state.faults.remove(&op) {
            tracing::debug!("Injecting {:?} fault", op);
            return Err(StoreError::Fault(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

/// A session on a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<State>>,
    transaction: Option<Staged>,
}

#[derive(Debug)]
struct Staged {
    snapshot: Collections,
    writes: Vec<Write>,
}

impl MemorySession {
    /// Whether a transaction is open on this session.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.transaction.take().is_some() {
            tracing::debug!("Session dropped with an open transaction, discarding it");
            lock(&self.state).open_transactions -= 1;
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    type Session = MemorySession;

    async fn ping(&self) -> bool {
        self.record(StoreOp::Ping).is_ok()
    }

    async fn start_session(&self) -> StoreResult<MemorySession> {
        self.record(StoreOp::StartSession)?;
        Ok(MemorySession {
            state: self.state.clone(),
            transaction: None,
        })
    }

    #[instrument(skip_all)]
    async fn start_transaction(&self, session: &mut MemorySession) -> StoreResult<()> {
        self.record(StoreOp::StartTransaction)?;
        if session.transaction.is_some() {
            return Err(StoreError::TransactionInProgress);
        }
        let mut state = lock(&self.state);
        session.transaction = Some(Staged {
            snapshot: state.collections.clone(),
            writes: Vec::new(),
        });
        state.open_transactions += 1;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn commit_transaction(&self, session: &mut MemorySession) -> StoreResult<()> {
        self.record(StoreOp::CommitTransaction)?;
        let staged = session.transaction.take().ok_or(StoreError::NoTransaction)?;
        let mut state = lock(&self.state);
        tracing::debug!("Committing {} write(s)", staged.writes.len());
        replay(&mut state.collections, staged.writes);
        state.open_transactions -= 1;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn abort_transaction(&self, session: &mut MemorySession) -> StoreResult<()> {
        self.record(StoreOp::AbortTransaction)?;
        let staged = session.transaction.take().ok_or(StoreError::NoTransaction)?;
        tracing::debug!("Discarding {} write(s)", staged.writes.len());
        lock(&self.state).open_transactions -= 1;
        Ok(())
    }

    async fn insert_one(
        &self,
        session: &mut MemorySession,
        collection: &Collection,
        mut document: Document,
    ) -> StoreResult<ObjectId> {
        self.record(StoreOp::InsertOne)?;
        let id = ObjectId::new();
        document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        let name = collection.name().to_string();
        match session.transaction.as_mut() {
            Some(staged) => {
                staged
                    .snapshot
                    .entry(name.clone())
                    .or_default()
                    .push((id, document.clone()));
                staged.writes.push(Write::Insert(name, id, document));
            }
            None => lock(&self.state)
                .collections
                .entry(name)
                .or_default()
                .push((id, document)),
        }
        Ok(id)
    }

    async fn find_all(&self, collection: &Collection) -> StoreResult<Vec<Document>> {
        self.record(StoreOp::FindAll)?;
        Ok(self.documents(collection.name()))
    }

    async fn find_by_id(
        &self,
        collection: &Collection,
        id: ObjectId,
    ) -> StoreResult<Option<Document>> {
        self.record(StoreOp::FindById)?;
        Ok(lock(&self.state)
            .collections
            .get(collection.name())
            .and_then(|docs| docs.iter().find(|(doc_id, _)| *doc_id == id))
            .map(|(_, doc)| doc.clone()))
    }

    async fn update_one(
        &self,
        session: &mut MemorySession,
        collection: &Collection,
        id: ObjectId,
        def: &UpdateDefinition,
    ) -> StoreResult<UpdateResult> {
        self.record(StoreOp::UpdateOne)?;
        let name = collection.name();
        match session.transaction.as_mut() {
            Some(staged) => {
                let result = update(&mut staged.snapshot, name, id, def);
                if result.modified > 0 {
                    staged
                        .writes
                        .push(Write::Update(name.to_string(), id, def.clone()));
                }
                Ok(result)
            }
            None => Ok(update(&mut lock(&self.state).collections, name, id, def)),
        }
    }

    async fn delete_one(
        &self,
        session: &mut MemorySession,
        collection: &Collection,
        id: ObjectId,
    ) -> StoreResult<u64> {
        self.record(StoreOp::DeleteOne)?;
        let name = collection.name();
        match session.transaction.as_mut() {
            Some(staged) => {
                let deleted = delete(&mut staged.snapshot, name, id);
                if deleted > 0 {
                    staged.writes.push(Write::Delete(name.to_string(), id));
                }
                Ok(deleted)
            }
            None => Ok(delete(&mut lock(&self.state).collections, name, id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(name: &str) -> Document {
        let mut doc = Document::new();
        doc.insert("name".to_string(), json!(name));
        doc
    }

    #[tokio::test]
    async fn writes_without_a_transaction_apply_immediately() {
        let store = MemoryStore::new();
        let items = Collection::new("items");
        let mut session = store.start_session().await.unwrap();

        let id = store.insert_one(&mut session, &items, doc("Foo")).await.unwrap();

        let found = store.find_by_id(&items, id).await.unwrap().unwrap();
        assert_eq!(Some(&json!("Foo")), found.get("name"));
        assert_eq!(Some(&json!(id.to_string())), found.get(ID_FIELD));
    }

    #[tokio::test]
    async fn transactional_writes_are_invisible_until_commit() {
        let store = MemoryStore::new();
        let items = Collection::new("items");
        let mut session = store.start_session().await.unwrap();
        assert!(!session.in_transaction());
        store.start_transaction(&mut session).await.unwrap();
        assert!(session.in_transaction());

        let id = store.insert_one(&mut session, &items, doc("Foo")).await.unwrap();
        assert!(store.find_by_id(&items, id).await.unwrap().is_none());
        assert_eq!(1, store.open_transactions());

        store.commit_transaction(&mut session).await.unwrap();
        assert!(!session.in_transaction());
        assert!(store.find_by_id(&items, id).await.unwrap().is_some());
        assert_eq!(0, store.open_transactions());
    }

    #[tokio::test]
    async fn abort_discards_staged_writes() {
        let store = MemoryStore::new();
        let items = Collection::new("items");
        let mut session = store.start_session().await.unwrap();
        let id = store.insert_one(&mut session, &items, doc("Foo")).await.unwrap();

        store.start_transaction(&mut session).await.unwrap();
        let mut update = UpdateDefinition::new();
        update.set("name", "Bar");
        let result = store.update_one(&mut session, &items, id, &update).await.unwrap();
        assert_eq!(UpdateResult { matched: 1, modified: 1 }, result);
        assert_eq!(1, store.delete_one(&mut session, &items, id).await.unwrap());
        store.abort_transaction(&mut session).await.unwrap();

        let found = store.find_by_id(&items, id).await.unwrap().unwrap();
        assert_eq!(Some(&json!("Foo")), found.get("name"));
    }

    #[tokio::test]
    async fn dropping_a_session_aborts_its_transaction() {
        let store = MemoryStore::new();
        let items = Collection::new("items");
        {
            let mut session = store.start_session().await.unwrap();
            store.start_transaction(&mut session).await.unwrap();
            store.insert_one(&mut session, &items, doc("Foo")).await.unwrap();
        }
        assert_eq!(0, store.open_transactions());
        assert!(store.documents("items").is_empty());
    }

    #[tokio::test]
    async fn transaction_misuse_is_reported() {
        let store = MemoryStore::new();
        let mut session = store.start_session().await.unwrap();
        assert!(matches!(
            store.commit_transaction(&mut session).await,
            Err(StoreError::NoTransaction)
        ));
        store.start_transaction(&mut session).await.unwrap();
        assert!(matches!(
            store.start_transaction(&mut session).await,
            Err(StoreError::TransactionInProgress)
        ));
    }

    #[tokio::test]
    async fn injected_faults_fire_once() {
        let store = MemoryStore::new();
        let items = Collection::new("items");
        store.fail_next(StoreOp::FindAll);

        assert!(matches!(store.find_all(&items).await, Err(StoreError::Fault(_))));
        assert!(store.find_all(&items).await.unwrap().is_empty());
        assert_eq!(2, store.calls(StoreOp::FindAll));
    }

    #[tokio::test]
    async fn unknown_ids_match_nothing() {
        let store = MemoryStore::new();
        let items = Collection::new("items");
        let mut session = store.start_session().await.unwrap();
        let mut update = UpdateDefinition::new();
        update.set("name", "Bar");

        let result = store
            .update_one(&mut session, &items, ObjectId::new(), &update)
            .await
            .unwrap();
        assert_eq!(UpdateResult::default(), result);
        assert_eq!(0, store.delete_one(&mut session, &items, ObjectId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn ping_reports_injected_faults_as_disconnected() {
        let store = MemoryStore::new();
        assert!(store.ping().await);
        store.fail_next(StoreOp::Ping);
        assert!(!store.ping().await);
    }
}
