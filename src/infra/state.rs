//! Global application state.
//!
//! Used for access to common resources such as the document store.

use crate::store::DocumentStore;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Global application state.
#[derive(Clone, Debug)]
pub struct AppState<S> {
    store: S,
    started_at: Instant,
    shutdown: CancellationToken,
}

impl<S: DocumentStore> AppState<S> {
    /// Constructs a new [`AppState`].
    pub fn new(store: S) -> Self {
        Self {
            store,
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the document store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// When the application started.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Cancelled when the server shuts down.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// A token for one request, cancelled on shutdown.
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
