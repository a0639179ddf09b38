//! Storage backend abstraction for the document store.
//!
//! This module defines the traits that abstract over the database driver, allowing the
//! collection store to run against a live MongoDB deployment or the in-memory engine.
//!
//! # Overview
//!
//! The [`StoreBackend`] trait is a thin async view of the driver: every method takes the
//! target [`Namespace`] and native filter/update documents, and returns raw results. It
//! performs no hook handling, no timestamping and no error classification; those belong to
//! [`CollectionStore`](crate::collection::CollectionStore).
//!
//! Multi-document reads hand out a [`DocumentCursor`], which the caller must close.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`DocumentCursor`]: A server-side cursor over a result set
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use doclane::backend::{Namespace, StoreBackend};
//! use bson::doc;
//!
//! let ns = Namespace::new("app", "users");
//! let id = backend.insert_one(&ns, doc! { "name": "Alice" }).await?;
//! let found = backend.find_one(&ns, doc! { "_id": id }).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::{fmt, fmt::Debug, time::Duration};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Identifies a collection: a database name plus a collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Counts reported by an update or replace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Documents matched by the filter.
    pub matched_count: u64,
    /// Documents whose content actually changed.
    pub modified_count: u64,
    /// Identifier of the document created by an upsert, if any.
    pub upserted_id: Option<Bson>,
}

/// Sorting and paging for multi-document reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

impl FindOptions {
    pub fn with_sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Options for [`StoreBackend::create_index`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    /// Explicit index name. Backends derive one from the keys when unset.
    pub name: Option<String>,
    pub unique: bool,
    pub sparse: bool,
    /// Time-to-live for documents indexed on a date field.
    pub expire_after: Option<Duration>,
}

impl IndexOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn with_sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn with_expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }
}

/// Derives the conventional index name from its key document, e.g. `title_1_age_-1`.
pub fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| match direction {
            Bson::Int32(n) => format!("{field}_{n}"),
            Bson::Int64(n) => format!("{field}_{n}"),
            Bson::Double(n) => format!("{field}_{n}"),
            Bson::String(kind) => format!("{field}_{kind}"),
            other => format!("{field}_{other}"),
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// A server-side cursor over the result of a multi-document read.
///
/// A cursor holds resources on the server until [`DocumentCursor::close`] is called.
#[async_trait]
pub trait DocumentCursor: Send {
    /// Moves to the next document.
    ///
    /// # Returns
    ///
    /// Returns `Ok(true)` when a document is available through [`DocumentCursor::current`],
    /// `Ok(false)` once the result set is exhausted.
    async fn advance(&mut self) -> DocumentStoreResult<bool>;

    /// Returns the document the cursor is positioned on.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor is not positioned on a document or the payload
    /// cannot be read.
    fn current(&self) -> DocumentStoreResult<Document>;

    /// Takes any error the cursor recorded while it was being opened.
    fn take_error(&mut self) -> Option<DocumentStoreError> {
        None
    }

    /// Releases the cursor's server-side resources.
    async fn close(self) -> DocumentStoreResult<()>
    where
        Self: Sized;
}

/// Abstract interface for document storage backends.
///
/// Implementers of this trait forward operations to a database engine. They are
/// shared between collection stores through an `Arc` and must support concurrent use.
///
/// # Error Handling
///
/// Errors reported by the engine itself are returned as
/// [`DocumentStoreError::Driver`], carrying the server error code when there is one, so
/// that callers can classify them.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Cursor type returned by [`StoreBackend::find`].
    type Cursor: DocumentCursor;

    /// Checks that the engine is reachable.
    async fn ping(&self) -> DocumentStoreResult<()>;

    /// Inserts one document.
    ///
    /// # Arguments
    ///
    /// * `namespace` - The target collection. Created automatically if it doesn't exist.
    /// * `document` - The document to insert. An `_id` is generated when absent.
    ///
    /// # Returns
    ///
    /// Returns the identifier the engine stored the document under.
    async fn insert_one(&self, namespace: &Namespace, document: Document) -> DocumentStoreResult<Bson>;

    /// Inserts a batch of documents in order.
    ///
    /// # Returns
    ///
    /// Returns the identifiers of the inserted documents, in input order.
    async fn insert_many(
        &self,
        namespace: &Namespace,
        documents: Vec<Document>,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Applies an update document to every document matching `filter`.
    async fn update_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Atomically updates the first document matching `filter` and returns its post-image.
    ///
    /// # Arguments
    ///
    /// * `upsert` - When set and nothing matches, a new document is created from the
    ///   filter's equality predicates and the update.
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if nothing matched and no document was created.
    async fn find_one_and_update(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Replaces the body of the first document matching `filter`, keeping its `_id`.
    async fn replace_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        replacement: Document,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Returns the first document matching `filter`.
    async fn find_one(&self, namespace: &Namespace, filter: Document) -> DocumentStoreResult<Option<Document>>;

    /// Opens a cursor over every document matching `filter`.
    async fn find(
        &self,
        namespace: &Namespace,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Self::Cursor>;

    /// Counts documents matching `filter`.
    ///
    /// # Arguments
    ///
    /// * `max_time` - Server-side execution budget for the count.
    async fn count(&self, namespace: &Namespace, filter: Document, max_time: Duration) -> DocumentStoreResult<u64>;

    /// Deletes every document matching `filter` and returns how many were removed.
    async fn delete_many(&self, namespace: &Namespace, filter: Document) -> DocumentStoreResult<u64>;

    /// Drops the collection and all of its documents.
    ///
    /// Dropping a collection that does not exist succeeds.
    async fn drop_collection(&self, namespace: &Namespace) -> DocumentStoreResult<()>;

    /// Creates an index and returns its name.
    async fn create_index(
        &self,
        namespace: &Namespace,
        keys: Document,
        options: IndexOptions,
    ) -> DocumentStoreResult<String>;

    /// Releases the connection.
    async fn shutdown(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

/// Factory trait for asynchronously constructing backends.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
