//! Entry point binding a backend to a database.
//!
//! A [`DocumentStore`] owns the shared backend (the connection) and hands out
//! [`CollectionStore`]s for individual collections. Every collection store created from
//! it shares the same backend, configuration and clock.
//!
//! # Example
//!
//! ```ignore
//! use doclane::{store::DocumentStore, memory::InMemoryStore};
//!
//! let store = DocumentStore::new(InMemoryStore::new(), "app");
//! let notes = store.collection("notes");
//! notes.ping().await?;
//! store.shutdown().await?;
//! ```

use std::sync::Arc;

use crate::{
    backend::{Namespace, StoreBackend, StoreBackendBuilder},
    clock::{Clock, SystemClock},
    collection::CollectionStore,
    config::StoreConfig,
    error::DocumentStoreResult,
};

/// A backend bound to one database.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: Arc<B>,
    database: String,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a new document store over `backend` for the database `database`.
    pub fn new(backend: B, database: impl Into<String>) -> Self {
        Self {
            backend: Arc::new(backend),
            database: database.into(),
            config: StoreConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Builds the backend with `builder` and wraps it in a store.
    ///
    /// # Errors
    ///
    /// Returns whatever error the builder reports, typically
    /// [`DocumentStoreError::Initialization`](crate::error::DocumentStoreError::Initialization).
    pub async fn connect<T>(builder: T, database: impl Into<String>) -> DocumentStoreResult<Self>
    where
        T: StoreBackendBuilder<Backend = B>,
    {
        Ok(Self::new(builder.build().await?, database))
    }

    /// Sets the configuration handed to collection stores created afterwards.
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the clock handed to collection stores created afterwards.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Gets a collection store for the collection `name`.
    ///
    /// The returned store has no hooks registered.
    pub fn collection(&self, name: &str) -> CollectionStore<B> {
        CollectionStore::new(self.backend.clone(), Namespace::new(&self.database, name))
            .with_config(self.config)
            .with_clock(self.clock.clone())
    }

    /// Checks that the database is reachable.
    pub async fn ping(&self) -> DocumentStoreResult<()> {
        self.backend.ping().await
    }

    /// Releases the connection. Collection stores created from this store must not be used
    /// afterwards.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await
    }
}
