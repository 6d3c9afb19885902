//! The transactional boundary around item repository calls.
//!
//! [`UnitOfWork::begin`] hands out a [`Tx`] that owns the store session.
//! The unit of work itself only remembers whether a transaction is open, so a
//! second `begin` before `commit` or `rollback` is refused.
//!
//! ```rust
//! # use item_service::feature::item::{item_repository::{Item, NewItem}, unit_of_work::UnitOfWork};
//! # use item_service::store::memory::MemoryStore;
//! # use tokio_util::sync::CancellationToken;
//! # tokio_test::block_on(async {
//! let mut uow = UnitOfWork::new(MemoryStore::new());
//! let cancel = CancellationToken::new();
//! let new_item = NewItem {
//!     name: "Widget".to_string(),
//!     description: String::new(),
//!     price: rust_decimal::Decimal::new(999, 2),
//! };
//! let mut item = Item::new(new_item, chrono::Utc::now());
//!
//! let mut tx = uow.begin(&cancel).await.unwrap();
//! let added = uow.items().add(tx.session(), &mut item).await;
//! match added {
//!     Ok(_) => uow.commit(tx, &cancel).await.unwrap(),
//!     Err(_) => uow.rollback(tx).await,
//! }
//! assert_eq!(1, uow.items().get_all().await.unwrap().len());
//! # });
//! ```

use super::item_repository::ItemRepository;
use crate::store::{cancellable, DocumentStore, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Errors from a [`UnitOfWork`].
#[derive(Debug, thiserror::Error)]
pub enum UowError {
    /// The unit of work was used out of order.
    #[error("invalid unit of work state: {0}")]
    InvalidState(&'static str),
    /// The store failed.
    #[error("{0}")]
    Store(#[from] StoreError),
}

/// The result of unit of work operations.
pub type UowResult<T> = Result<T, UowError>;

/// Whether a transaction is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Open,
}

/// An open transaction. Consumed by [`UnitOfWork::commit`] or [`UnitOfWork::rollback`].
///
/// Dropping it releases the session, which aborts the transaction.
#[derive(Debug)]
pub struct Tx<S: DocumentStore> {
    session: S::Session,
}

impl<S: DocumentStore> Tx<S> {
    /// The session repository writes should go through.
    pub fn session(&mut self) -> &mut S::Session {
        &mut self.session
    }
}

/// Owns the transaction lifecycle and the item repository.
#[derive(Debug)]
pub struct UnitOfWork<S: DocumentStore> {
    store: S,
    items: ItemRepository<S>,
    state: TxState,
}

impl<S: DocumentStore> UnitOfWork<S> {
    /// Creates an idle unit of work.
    pub fn new(store: S) -> Self {
        let items = ItemRepository::new(store.clone());
        Self {
            store,
            items,
            state: TxState::Idle,
        }
    }

    /// The item repository.
    pub fn items(&self) -> &ItemRepository<S> {
        &self.items
    }

    /// The current state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Starts a session and a transaction on it.
    #[instrument(skip_all)]
    pub async fn begin(&mut self, cancel: &CancellationToken) -> UowResult<Tx<S>> {
        if self.state == TxState::Open {
            return Err(UowError::InvalidState("a transaction is already open"));
        }
        let mut session = cancellable(cancel, self.store.start_session()).await?;
        cancellable(cancel, self.store.start_transaction(&mut session)).await?;
        self.state = TxState::Open;
        tracing::debug!("Transaction started");
        Ok(Tx { session })
    }

    /// Commits the transaction and releases its session.
    ///
    /// A failed commit is aborted before its error is returned.
    #[instrument(skip_all)]
    pub async fn commit(&mut self, mut tx: Tx<S>, cancel: &CancellationToken) -> UowResult<()> {
        if self.state != TxState::Open {
            return Err(UowError::InvalidState("no transaction is open"));
        }
        let result = cancellable(cancel, self.store.commit_transaction(&mut tx.session)).await;
        if let Err(e) = result {
            tracing::warn!("Commit failed: {}", e);
            self.abort(&mut tx).await;
            self.state = TxState::Idle;
            return Err(e.into());
        }
        self.state = TxState::Idle;
        tracing::debug!("Transaction committed");
        Ok(())
    }

    /// Aborts the transaction and releases its session.
    ///
    /// Never fails, and cannot be cancelled: this is the cleanup path.
    #[instrument(skip_all)]
    pub async fn rollback(&mut self, mut tx: Tx<S>) {
        self.abort(&mut tx).await;
        self.state = TxState::Idle;
        tracing::debug!("Transaction rolled back");
    }

    async fn abort(&self, tx: &mut Tx<S>) {
        match self.store.abort_transaction(&mut tx.session).await {
            Ok(()) | Err(StoreError::NoTransaction) => {}
            Err(e) => tracing::error!("Abort failed, dropping the session instead: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryStore, StoreOp};

    #[tokio::test]
    async fn begin_twice_is_refused() {
        let mut uow = UnitOfWork::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        let _tx = uow.begin(&cancel).await.unwrap();
        assert!(matches!(
            uow.begin(&cancel).await,
            Err(UowError::InvalidState(_))
        ));
        assert_eq!(TxState::Open, uow.state());
    }

    #[tokio::test]
    async fn commit_returns_to_idle() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(store.clone());
        let cancel = CancellationToken::new();

        let tx = uow.begin(&cancel).await.unwrap();
        uow.commit(tx, &cancel).await.unwrap();

        assert_eq!(TxState::Idle, uow.state());
        assert_eq!(0, store.open_transactions());
        uow.begin(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn begin_after_rollback_holds_a_single_transaction() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(store.clone());
        let cancel = CancellationToken::new();

        let tx = uow.begin(&cancel).await.unwrap();
        uow.rollback(tx).await;
        let _tx = uow.begin(&cancel).await.unwrap();

        assert_eq!(1, store.open_transactions());
        assert_eq!(TxState::Open, uow.state());
    }

    #[tokio::test]
    async fn commit_while_idle_is_refused() {
        let store = MemoryStore::new();
        let mut idle = UnitOfWork::new(store.clone());
        let mut other = UnitOfWork::new(store.clone());
        let cancel = CancellationToken::new();

        let tx = other.begin(&cancel).await.unwrap();
        assert!(matches!(
            idle.commit(tx, &cancel).await,
            Err(UowError::InvalidState(_))
        ));
        assert_eq!(TxState::Idle, idle.state());
        assert_eq!(0, store.calls(StoreOp::CommitTransaction));
        assert_eq!(0, store.open_transactions());
    }

    #[tokio::test]
    async fn rollback_aborts_once() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(store.clone());
        let cancel = CancellationToken::new();

        let tx = uow.begin(&cancel).await.unwrap();
        uow.rollback(tx).await;

        assert_eq!(1, store.calls(StoreOp::AbortTransaction));
        assert_eq!(0, store.open_transactions());
        assert_eq!(TxState::Idle, uow.state());
    }

    #[tokio::test]
    async fn failed_abort_still_releases_the_session() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(store.clone());
        let cancel = CancellationToken::new();
        store.fail_next(StoreOp::AbortTransaction);

        let tx = uow.begin(&cancel).await.unwrap();
        uow.rollback(tx).await;

        assert_eq!(0, store.open_transactions());
        assert_eq!(TxState::Idle, uow.state());
    }

    #[tokio::test]
    async fn failed_commit_aborts_and_returns_the_commit_error() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(store.clone());
        let cancel = CancellationToken::new();
        store.fail_next(StoreOp::CommitTransaction);

        let tx = uow.begin(&cancel).await.unwrap();
        let result = uow.commit(tx, &cancel).await;

        assert!(matches!(result, Err(UowError::Store(StoreError::Fault(_)))));
        assert_eq!(1, store.calls(StoreOp::AbortTransaction));
        assert_eq!(0, store.open_transactions());
        assert_eq!(TxState::Idle, uow.state());
    }

    #[tokio::test]
    async fn failed_begin_stays_idle() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(store.clone());
        let cancel = CancellationToken::new();
        store.fail_next(StoreOp::StartTransaction);

        assert!(uow.begin(&cancel).await.is_err());
        assert_eq!(TxState::Idle, uow.state());
        uow.begin(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_begin_never_opens_a_transaction() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            uow.begin(&cancel).await,
            Err(UowError::Store(StoreError::Cancelled))
        ));
        assert_eq!(0, store.open_transactions());
        assert_eq!(TxState::Idle, uow.state());
    }

    #[tokio::test]
    async fn cancelled_commit_rolls_back() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(store.clone());
        let cancel = CancellationToken::new();

        let tx = uow.begin(&cancel).await.unwrap();
        cancel.cancel();
        let result = uow.commit(tx, &cancel).await;

        assert!(matches!(result, Err(UowError::Store(StoreError::Cancelled))));
        assert_eq!(0, store.calls(StoreOp::CommitTransaction));
        assert_eq!(1, store.calls(StoreOp::AbortTransaction));
        assert_eq!(0, store.open_transactions());
    }
}
