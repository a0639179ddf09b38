//! In-memory storage implementation for document stores.
//!
//! This module provides an engine that keeps every collection as an insertion-ordered
//! list of BSON documents behind an async-safe read-write lock, and interprets native
//! filter and update documents through [`crate::evaluator`].

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use async_trait::async_trait;
use mea::rwlock::RwLock;
use bson::{Bson, Document, doc, oid::ObjectId};
use tracing::trace;

use doclane_core::{
    backend::{
        DocumentCursor, FindOptions, IndexOptions, Namespace, StoreBackend, StoreBackendBuilder, UpdateOutcome,
        default_index_name,
    },
    error::{DUPLICATE_KEY_CODE, DocumentStoreError, DocumentStoreResult},
};

use crate::evaluator::{Comparable, apply_update, compare_by, lookup, matches, seed_from_filter};

type StoreMap = HashMap<Namespace, CollectionState>;

#[derive(Debug, Clone)]
struct IndexSpec {
    name: String,
    fields: Vec<String>,
    unique: bool,
    sparse: bool,
}

impl IndexSpec {
    /// Returns `true` if both documents map to the same key of this index.
    fn collides(&self, a: &Document, b: &Document) -> bool {
        let key_a = self.fields.iter().map(|field| lookup(a, field)).collect::<Vec<_>>();
        let key_b = self.fields.iter().map(|field| lookup(b, field)).collect::<Vec<_>>();

        if self.sparse && (key_a.iter().all(Option::is_none) || key_b.iter().all(Option::is_none)) {
            return false;
        }

        key_a.iter().zip(key_b.iter()).all(|(left, right)| {
            Comparable::from(left.unwrap_or(&Bson::Null)) == Comparable::from(right.unwrap_or(&Bson::Null))
        })
    }
}

#[derive(Debug, Default)]
struct CollectionState {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl CollectionState {
    /// Checks `candidate` against the `_id` and unique indexes, ignoring the document at
    /// position `skip`.
    fn check_unique(&self, namespace: &Namespace, candidate: &Document, skip: Option<usize>) -> DocumentStoreResult<()> {
        for (position, existing) in self.documents.iter().enumerate() {
            if Some(position) == skip {
                continue;
            }
            if existing.get("_id") == candidate.get("_id") {
                return Err(duplicate_key(namespace, "_id_"));
            }
            if let Some(index) = self
                .indexes
                .iter()
                .find(|index| index.unique && index.collides(existing, candidate))
            {
                return Err(duplicate_key(namespace, &index.name));
            }
        }

        Ok(())
    }

    fn position(&self, filter: &Document) -> DocumentStoreResult<Option<usize>> {
        for (position, document) in self.documents.iter().enumerate() {
            if matches(document, filter)? {
                return Ok(Some(position));
            }
        }

        Ok(None)
    }

    fn positions(&self, filter: &Document) -> DocumentStoreResult<Vec<usize>> {
        let mut positions = Vec::new();

        for (position, document) in self.documents.iter().enumerate() {
            if matches(document, filter)? {
                positions.push(position);
            }
        }

        Ok(positions)
    }

    fn insert(&mut self, namespace: &Namespace, document: Document) -> DocumentStoreResult<Bson> {
        let document = with_id(document);
        self.check_unique(namespace, &document, None)?;

        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        self.documents.push(document);

        Ok(id)
    }

    /// Stores `next` at `position` if it differs from the current document.
    ///
    /// Returns whether the document changed.
    fn store_at(&mut self, namespace: &Namespace, position: usize, next: Document) -> DocumentStoreResult<bool> {
        if self.documents.get(position) == Some(&next) {
            return Ok(false);
        }

        self.check_unique(namespace, &next, Some(position))?;
        self.documents[position] = next;

        Ok(true)
    }
}

/// Ensures the document has an `_id`, generating one in first position when missing.
fn with_id(document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }

    let mut identified = doc! { "_id": ObjectId::new() };
    identified.extend(document);
    identified
}

fn duplicate_key(namespace: &Namespace, index: &str) -> DocumentStoreError {
    DocumentStoreError::driver_with_code(
        DUPLICATE_KEY_CODE,
        format!("E11000 duplicate key error collection: {namespace} index: {index}"),
    )
}

/// Thread-safe in-memory document storage backend.
///
/// Implements [`StoreBackend`] entirely in memory. Collections are created on first write
/// and keep documents in insertion order, which is also the order reads return them in
/// when no sort is given.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses `Arc`-wrapped internal state. Clones share the
/// same data.
///
/// # Performance
///
/// Every read scans the whole collection; indexes only enforce uniqueness.
///
/// # Example
///
/// ```ignore
/// use doclane_memory::InMemoryStore;
/// use doclane::backend::{Namespace, StoreBackend};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let ns = Namespace::new("app", "users");
///
/// let id = store.insert_one(&ns, doc! { "name": "Alice" }).await?;
/// let found = store.find_one(&ns, doc! { "_id": id }).await?;
/// assert!(found.is_some());
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
    open_cursors: Arc<AtomicUsize>,
    cursor_error: Arc<RwLock<Option<String>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Number of cursors handed out by [`StoreBackend::find`] that have not been closed.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Makes the next cursor report `message` as an error right after it is opened.
    pub async fn inject_cursor_error(&self, message: impl Into<String>) {
        *self.cursor_error.write().await = Some(message.into());
    }

    /// Returns a snapshot of a collection's documents, in insertion order.
    pub async fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        self.store
            .read()
            .await
            .get(namespace)
            .map(|state| state.documents.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    type Cursor = InMemoryCursor;

    async fn ping(&self) -> DocumentStoreResult<()> {
        Ok(())
    }

    async fn insert_one(&self, namespace: &Namespace, document: Document) -> DocumentStoreResult<Bson> {
        self.store
            .write()
            .await
            .entry(namespace.clone())
            .or_default()
            .insert(namespace, document)
    }

    async fn insert_many(&self, namespace: &Namespace, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        let mut store = self.store.write().await;
        let state = store.entry(namespace.clone()).or_default();

        // Ordered semantics: documents before a failing one stay inserted.
        documents
            .into_iter()
            .map(|document| state.insert(namespace, document))
            .collect()
    }

    async fn update_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut store = self.store.write().await;
        let Some(state) = store.get_mut(namespace) else {
            return Ok(UpdateOutcome::default());
        };

        let positions = state.positions(&filter)?;
        let mut modified_count = 0;

        for &position in &positions {
            let mut next = state.documents[position].clone();
            apply_update(&mut next, &update, false)?;

            if state.store_at(namespace, position, next)? {
                modified_count += 1;
            }
        }

        Ok(UpdateOutcome {
            matched_count: positions.len() as u64,
            modified_count,
            upserted_id: None,
        })
    }

    async fn find_one_and_update(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> DocumentStoreResult<Option<Document>> {
        let mut store = self.store.write().await;
        let state = store.entry(namespace.clone()).or_default();

        match state.position(&filter)? {
            Some(position) => {
                let mut next = state.documents[position].clone();
                apply_update(&mut next, &update, false)?;
                state.store_at(namespace, position, next.clone())?;

                Ok(Some(next))
            }
            None if upsert => {
                let mut created = seed_from_filter(&filter);
                apply_update(&mut created, &update, true)?;
                let created = with_id(created);
                trace!(%namespace, id = ?created.get("_id"), "upserting document");
                state.insert(namespace, created.clone())?;

                Ok(Some(created))
            }
            None => Ok(None),
        }
    }

    async fn replace_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        replacement: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        if replacement.keys().any(|key| key.starts_with('$')) {
            return Err(DocumentStoreError::driver("replacement document must not contain update operators"));
        }

        let mut store = self.store.write().await;
        let Some(state) = store.get_mut(namespace) else {
            return Ok(UpdateOutcome::default());
        };
        let Some(position) = state.position(&filter)? else {
            return Ok(UpdateOutcome::default());
        };

        let id = state.documents[position].get("_id").cloned().unwrap_or(Bson::Null);
        if replacement.get("_id").is_some_and(|replaced| replaced != &id) {
            return Err(DocumentStoreError::driver_with_code(
                66,
                "the (immutable) field '_id' was found to have been altered",
            ));
        }

        let mut next = doc! { "_id": id };
        next.extend(replacement.into_iter().filter(|(key, _)| key != "_id"));
        let modified = state.store_at(namespace, position, next)?;

        Ok(UpdateOutcome {
            matched_count: 1,
            modified_count: modified as u64,
            upserted_id: None,
        })
    }

    async fn find_one(&self, namespace: &Namespace, filter: Document) -> DocumentStoreResult<Option<Document>> {
        let store = self.store.read().await;
        let Some(state) = store.get(namespace) else {
            return Ok(None);
        };

        Ok(state.position(&filter)?.map(|position| state.documents[position].clone()))
    }

    async fn find(
        &self,
        namespace: &Namespace,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<InMemoryCursor> {
        let mut documents = {
            let store = self.store.read().await;

            match store.get(namespace) {
                Some(state) => state
                    .positions(&filter)?
                    .into_iter()
                    .map(|position| state.documents[position].clone())
                    .collect::<Vec<_>>(),
                None => Vec::new(),
            }
        };

        if let Some(sort) = &options.sort {
            documents.sort_by(|a, b| compare_by(a, b, sort));
        }

        let limit = match options.limit {
            Some(limit) if limit != 0 => limit.unsigned_abs() as usize,
            _ => usize::MAX,
        };
        let pending = documents
            .into_iter()
            .skip(options.skip.unwrap_or(0) as usize)
            .take(limit)
            .collect::<VecDeque<_>>();

        self.open_cursors.fetch_add(1, Ordering::SeqCst);

        Ok(InMemoryCursor {
            pending,
            current: None,
            error: self
                .cursor_error
                .write()
                .await
                .take()
                .map(DocumentStoreError::driver),
            open_cursors: self.open_cursors.clone(),
        })
    }

    async fn count(&self, namespace: &Namespace, filter: Document, max_time: Duration) -> DocumentStoreResult<u64> {
        trace!(%namespace, ?max_time, "counting documents");

        let store = self.store.read().await;

        match store.get(namespace) {
            Some(state) => Ok(state.positions(&filter)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn delete_many(&self, namespace: &Namespace, filter: Document) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(state) = store.get_mut(namespace) else {
            return Ok(0);
        };

        let doomed = state.positions(&filter)?;
        let mut position = 0;
        state.documents.retain(|_| {
            let keep = doomed.binary_search(&position).is_err();
            position += 1;
            keep
        });

        Ok(doomed.len() as u64)
    }

    async fn drop_collection(&self, namespace: &Namespace) -> DocumentStoreResult<()> {
        self.store.write().await.remove(namespace);

        Ok(())
    }

    async fn create_index(
        &self,
        namespace: &Namespace,
        keys: Document,
        options: IndexOptions,
    ) -> DocumentStoreResult<String> {
        let name = options.name.clone().unwrap_or_else(|| default_index_name(&keys));
        let mut store = self.store.write().await;
        let state = store.entry(namespace.clone()).or_default();

        if state.indexes.iter().any(|index| index.name == name) {
            return Ok(name);
        }

        let index = IndexSpec {
            name: name.clone(),
            fields: keys.keys().cloned().collect(),
            unique: options.unique,
            sparse: options.sparse,
        };

        if index.unique {
            for (position, document) in state.documents.iter().enumerate() {
                if state.documents[position + 1..]
                    .iter()
                    .any(|other| index.collides(document, other))
                {
                    return Err(duplicate_key(namespace, &name));
                }
            }
        }

        state.indexes.push(index);

        Ok(name)
    }
}

/// Cursor over a snapshot of matching documents.
#[derive(Debug)]
pub struct InMemoryCursor {
    pending: VecDeque<Document>,
    current: Option<Document>,
    error: Option<DocumentStoreError>,
    open_cursors: Arc<AtomicUsize>,
}

#[async_trait]
impl DocumentCursor for InMemoryCursor {
    async fn advance(&mut self) -> DocumentStoreResult<bool> {
        self.current = self.pending.pop_front();

        Ok(self.current.is_some())
    }

    fn current(&self) -> DocumentStoreResult<Document> {
        self.current
            .clone()
            .ok_or_else(|| DocumentStoreError::driver("cursor is not positioned on a document"))
    }

    fn take_error(&mut self) -> Option<DocumentStoreError> {
        self.error.take()
    }

    async fn close(self) -> DocumentStoreResult<()> {
        self.open_cursors.fetch_sub(1, Ordering::SeqCst);

        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use doclane_memory::InMemoryStore;
/// use doclane::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}
