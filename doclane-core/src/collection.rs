//! Hook-aware CRUD operations over a single collection.
//!
//! A [`CollectionStore`] binds a backend to one [`Namespace`] and runs every operation
//! through the same pipeline:
//!
//! 1. the before-hooks registered for the operation, in order; the first failure aborts
//!    the call before the database is touched,
//! 2. the database step, bounded by [`StoreConfig::operation_timeout`] when set,
//! 3. the after-hooks, whatever the outcome of the database step.
//!
//! Operations that delegate to another operation (for example
//! [`CollectionStore::update_one`] to [`CollectionStore::update_many_by_filter`]) also
//! fire the hooks of the operation they delegate to.
//!
//! # Example
//!
//! ```ignore
//! use doclane::{prelude::*, memory::InMemoryStore};
//!
//! let store = DocumentStore::new(InMemoryStore::new(), "app");
//! let mut notes = store.collection("notes");
//!
//! notes.add_before_hook(Operation::InsertOne, |_| async { Ok(()) });
//!
//! let mut note = Note { title: "hello".into(), ..Default::default() };
//! let id = notes.insert_one(&mut note).await?;
//! ```

use bson::{Bson, Document as BsonDocument, doc, oid::ObjectId};
use std::{future::Future, sync::Arc};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::{
    backend::{DocumentCursor, FindOptions, IndexOptions, Namespace, StoreBackend, UpdateOutcome},
    clock::{Clock, SystemClock},
    config::StoreConfig,
    document::{Document, DocumentExt, ID_FIELD},
    error::{DocumentStoreError, DocumentStoreResult, classify_write_error},
    filter::FilterBuilder,
    hooks::{HookContext, HookPhase, HookRegistry, Operation},
    id::{decode_hex, encode_hex},
};

/// CRUD access to one collection with before/after hooks.
///
/// Hooks are registered through `&mut self`, typically right after the store is created
/// and before it is shared. Every operation takes `&self`.
#[derive(Debug)]
pub struct CollectionStore<B: StoreBackend> {
    backend: Arc<B>,
    namespace: Namespace,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    before: HookRegistry,
    after: HookRegistry,
}

impl<B: StoreBackend> Clone for CollectionStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            namespace: self.namespace.clone(),
            config: self.config,
            clock: self.clock.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
        }
    }
}

impl<B: StoreBackend> CollectionStore<B> {
    /// Creates a store for `namespace` with default configuration and the system clock.
    pub fn new(backend: Arc<B>, namespace: Namespace) -> Self {
        Self {
            backend,
            namespace,
            config: StoreConfig::default(),
            clock: Arc::new(SystemClock),
            before: HookRegistry::new(),
            after: HookRegistry::new(),
        }
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the time source used for `created_at` / `updated_at`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Registers a hook that runs before `operation` touches the database.
    ///
    /// An error from the hook aborts the operation and is returned to the caller unchanged.
    pub fn add_before_hook<F, Fut>(&mut self, operation: Operation, hook: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DocumentStoreResult<()>> + Send + 'static,
    {
        self.before.register(operation, false, hook);
    }

    /// Registers a hook that runs after `operation`, whatever its outcome.
    ///
    /// Errors from the hook are logged and otherwise ignored.
    pub fn add_after_hook<F, Fut>(&mut self, operation: Operation, hook: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DocumentStoreResult<()>> + Send + 'static,
    {
        self.after.register(operation, false, hook);
    }

    /// Registers an after hook whose error replaces a successful operation result.
    pub fn add_propagating_after_hook<F, Fut>(&mut self, operation: Operation, hook: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DocumentStoreResult<()>> + Send + 'static,
    {
        self.after.register(operation, true, hook);
    }

    /// Checks that the database is reachable.
    pub async fn ping(&self) -> DocumentStoreResult<()> {
        self.backend.ping().await
    }

    /// Creates an index on the collection.
    ///
    /// # Returns
    ///
    /// The name of the index.
    pub async fn create_index(&self, keys: BsonDocument, options: IndexOptions) -> DocumentStoreResult<String> {
        trace!(namespace = %self.namespace, ?keys, "create_index");

        self.run_hooked(Operation::CreateIndex, async {
            let name = self.backend.create_index(&self.namespace, keys, options).await?;
            debug!(namespace = %self.namespace, index = %name, "index created");

            Ok(name)
        })
        .await
    }

    /// Inserts one document.
    ///
    /// Both timestamps are set to the current time, and the identifier assigned by the
    /// database is written back into `document`.
    ///
    /// # Returns
    ///
    /// The hex form of the new identifier.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::DuplicateDocument`] if the insert violates a unique index.
    /// - [`DocumentStoreError::InvalidIdentifier`] if the database returned an identifier
    ///   that is not an ObjectId.
    pub async fn insert_one<D: Document>(&self, document: &mut D) -> DocumentStoreResult<String> {
        trace!(namespace = %self.namespace, "insert_one");

        self.run_hooked(Operation::InsertOne, async {
            let now = self.clock.now();
            document.stamp_created(now);
            document.stamp_updated(now);

            let id = self.backend
                .insert_one(&self.namespace, document.to_document()?)
                .await
                .map_err(classify_write_error)?;
            let id = inserted_id(&id)?;
            document.set_id(id);
            debug!(namespace = %self.namespace, id = %id, "document inserted");

            Ok(encode_hex(&id))
        })
        .await
    }

    /// Inserts a batch of documents in one round trip.
    ///
    /// Every document is stamped like in [`CollectionStore::insert_one`] and receives its
    /// identifier.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::DuplicateDocument`] if the batch violates a unique index.
    /// - [`DocumentStoreError::PartialInsert`] if an identifier returned by the database is
    ///   not an ObjectId, or the database returned a different number of identifiers than
    ///   documents; it carries the identifiers decoded before that point.
    pub async fn insert_many<D: Document>(&self, documents: &mut [D]) -> DocumentStoreResult<Vec<String>> {
        trace!(namespace = %self.namespace, count = documents.len(), "insert_many");

        self.run_hooked(Operation::InsertMany, async {
            if documents.is_empty() {
                return Ok(Vec::new());
            }

            let now = self.clock.now();
            let payload = documents
                .iter_mut()
                .map(|document| {
                    document.stamp_created(now);
                    document.stamp_updated(now);
                    document.to_document()
                })
                .collect::<DocumentStoreResult<Vec<_>>>()?;

            let ids = self.backend
                .insert_many(&self.namespace, payload)
                .await
                .map_err(classify_write_error)?;

            let mut inserted = Vec::with_capacity(ids.len());
            for (document, id) in documents.iter_mut().zip(ids.iter()) {
                match id {
                    Bson::ObjectId(id) => {
                        document.set_id(*id);
                        inserted.push(encode_hex(id));
                    }
                    _ => return Err(DocumentStoreError::PartialInsert { inserted }),
                }
            }
            if ids.len() != documents.len() {
                warn!(
                    namespace = %self.namespace,
                    sent = documents.len(),
                    returned = ids.len(),
                    "backend returned a mismatched number of ids",
                );
                return Err(DocumentStoreError::PartialInsert { inserted });
            }
            debug!(namespace = %self.namespace, count = inserted.len(), "documents inserted");

            Ok(inserted)
        })
        .await
    }

    /// Writes every field of `document` back to the stored document with the same id.
    ///
    /// Equivalent to [`CollectionStore::update_many_by_filter`] with an `_id` filter, whose
    /// hooks fire as well.
    pub async fn update_one<D: Document>(&self, document: &mut D) -> DocumentStoreResult<()> {
        trace!(namespace = %self.namespace, id = %document.id(), "update_one");

        self.run_hooked(Operation::UpdateOne, async {
            let filter = FilterBuilder::by_id(document.id()).build();

            self.update_many_by_filter(filter, document).await
        })
        .await
    }

    /// Sets every field of `document` (except `_id`) on all documents matching `filter`.
    ///
    /// `updated_at` is refreshed first; `created_at` is written back as it is.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::DocumentNotFound`] if nothing matched.
    /// - [`DocumentStoreError::DocumentNotModified`] if documents matched but none changed.
    /// - [`DocumentStoreError::DuplicateDocument`] if the update violates a unique index.
    pub async fn update_many_by_filter<D: Document>(
        &self,
        filter: BsonDocument,
        document: &mut D,
    ) -> DocumentStoreResult<()> {
        trace!(namespace = %self.namespace, ?filter, "update_many_by_filter");

        self.run_hooked(Operation::UpdateManyByFilter, async {
            document.stamp_updated(self.clock.now());

            let mut body = document.to_document()?;
            body.remove(ID_FIELD);

            let outcome = self.backend
                .update_many(&self.namespace, filter, doc! { "$set": body })
                .await
                .map_err(classify_write_error)?;
            debug!(
                namespace = %self.namespace,
                matched = outcome.matched_count,
                modified = outcome.modified_count,
                "documents updated",
            );

            if outcome.matched_count == 0 {
                return Err(DocumentStoreError::DocumentNotFound);
            }
            if outcome.modified_count == 0 {
                return Err(DocumentStoreError::DocumentNotModified);
            }

            Ok(())
        })
        .await
    }

    /// Applies a raw update document to all documents matching `filter`.
    ///
    /// No timestamps are touched.
    pub async fn update_many(&self, filter: BsonDocument, update: BsonDocument) -> DocumentStoreResult<UpdateOutcome> {
        trace!(namespace = %self.namespace, ?filter, ?update, "update_many");

        self.run_hooked(Operation::UpdateMany, async {
            self.backend
                .update_many(&self.namespace, filter, update)
                .await
                .map_err(classify_write_error)
        })
        .await
    }

    /// Updates the first document matching `filter`, creating it when nothing matches, and
    /// decodes the resulting document into `document`.
    pub async fn upsert_one<D: Document>(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        document: &mut D,
    ) -> DocumentStoreResult<()> {
        trace!(namespace = %self.namespace, ?filter, "upsert_one");

        self.run_hooked(Operation::UpsertOne, self.find_and_modify(filter, update, true, document))
            .await
    }

    /// Updates the first document matching `filter` and decodes the resulting document into
    /// `document`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] if nothing matched.
    pub async fn find_and_update_one<D: Document>(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        document: &mut D,
    ) -> DocumentStoreResult<()> {
        trace!(namespace = %self.namespace, ?filter, "find_and_update_one");

        self.run_hooked(Operation::FindAndUpdateOne, self.find_and_modify(filter, update, false, document))
            .await
    }

    /// Replaces the body of the first document matching `filter` with `document`.
    ///
    /// `updated_at` is refreshed first and `_id` is never sent.
    pub async fn replace_one<D: Document>(
        &self,
        filter: BsonDocument,
        document: &mut D,
    ) -> DocumentStoreResult<UpdateOutcome> {
        trace!(namespace = %self.namespace, ?filter, "replace_one");

        self.run_hooked(Operation::ReplaceOne, async {
            document.stamp_updated(self.clock.now());

            let mut body = document.to_document()?;
            body.remove(ID_FIELD);

            self.backend
                .replace_one(&self.namespace, filter, body)
                .await
                .map_err(classify_write_error)
        })
        .await
    }

    /// Replaces the document with the given hex id. Fires the
    /// [`Operation::ReplaceOne`] hooks as well.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidIdentifier`] without touching the database if
    /// `id` is malformed.
    pub async fn replace_one_by_id<D: Document>(&self, id: &str, document: &mut D) -> DocumentStoreResult<UpdateOutcome> {
        trace!(namespace = %self.namespace, id, "replace_one_by_id");

        self.run_hooked(Operation::ReplaceOneById, async {
            let filter = FilterBuilder::by_id(decode_hex(id)?).build();

            self.replace_one(filter, document).await
        })
        .await
    }

    /// Loads the document with the given hex id into `document`.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::InvalidIdentifier`] if `id` is malformed.
    /// - [`DocumentStoreError::DocumentNotFound`] if no such document exists.
    pub async fn get_one_by_id<D: Document>(&self, id: &str, document: &mut D) -> DocumentStoreResult<()> {
        trace!(namespace = %self.namespace, id, "get_one_by_id");

        self.run_hooked(Operation::GetOneById, async {
            let filter = FilterBuilder::by_id(decode_hex(id)?).build();

            self.get_one_by_filter(filter, document).await
        })
        .await
    }

    /// Loads the first document matching `filter` into `document`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] if nothing matched.
    pub async fn get_one_by_filter<D: Document>(&self, filter: BsonDocument, document: &mut D) -> DocumentStoreResult<()> {
        trace!(namespace = %self.namespace, ?filter, "get_one_by_filter");

        self.run_hooked(Operation::GetOneByFilter, async {
            let raw = self.backend
                .find_one(&self.namespace, filter)
                .await?
                .ok_or(DocumentStoreError::DocumentNotFound)?;

            decode_into(document, &raw)
        })
        .await
    }

    /// Opens a cursor over the documents matching `filter`.
    ///
    /// The caller owns the cursor and must close it. If the driver reports an error on the
    /// fresh cursor, it is closed here and the error returned.
    pub async fn find_many_by_filter(&self, filter: BsonDocument, options: FindOptions) -> DocumentStoreResult<B::Cursor> {
        trace!(namespace = %self.namespace, ?filter, "find_many_by_filter");

        self.run_hooked(Operation::FindManyByFilter, async {
            let mut cursor = timeout(
                self.config.cursor_open_timeout,
                self.backend.find(&self.namespace, filter, options),
            )
            .await
            .map_err(|_| DocumentStoreError::Timeout("cursor open".into()))??;

            if let Some(error) = cursor.take_error() {
                self.close_cursor(cursor).await;
                return Err(error);
            }

            Ok(cursor)
        })
        .await
    }

    /// Collects every document matching `filter`, each built with `factory` and then decoded
    /// from the stored payload.
    ///
    /// The cursor is opened, drained and closed under their own time budgets, and closed
    /// on every path once opened. Fires the [`Operation::FindManyByFilter`] hooks as well.
    pub async fn get_many_by_filter<D, F>(
        &self,
        filter: BsonDocument,
        factory: F,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<D>>
    where
        D: Document,
        F: Fn() -> D + Send + Sync,
    {
        trace!(namespace = %self.namespace, ?filter, "get_many_by_filter");

        self.run_hooked(Operation::GetManyByFilter, async {
            let cursor = self.find_many_by_filter(filter, options).await?;

            self.drain(cursor, |raw| {
                let mut document = factory();
                decode_into(&mut document, &raw)?;

                Ok(document)
            })
            .await
        })
        .await
    }

    /// Appends every document matching `filter` to `results`.
    ///
    /// Like [`CollectionStore::get_many_by_filter`], but each payload is decoded on its own
    /// rather than into a prepared value. `results` is left untouched on error.
    pub async fn find_all_by_filter<D: Document>(
        &self,
        filter: BsonDocument,
        results: &mut Vec<D>,
        options: FindOptions,
    ) -> DocumentStoreResult<()> {
        trace!(namespace = %self.namespace, ?filter, "find_all_by_filter");

        self.run_hooked(Operation::FindAllByFilter, async {
            let cursor = self.find_many_by_filter(filter, options).await?;
            let documents = self.drain(cursor, decode_owned::<D>).await?;
            results.extend(documents);

            Ok(())
        })
        .await
    }

    /// Counts the documents matching `filter`.
    ///
    /// Runs no hooks. The count is bounded server-side by [`StoreConfig::count_max_time`].
    pub async fn count_by_filter(&self, filter: BsonDocument) -> DocumentStoreResult<u64> {
        trace!(namespace = %self.namespace, ?filter, "count_by_filter");

        self.bounded(self.backend.count(&self.namespace, filter, self.config.count_max_time))
            .await
    }

    /// Deletes every document matching `filter`.
    ///
    /// # Returns
    ///
    /// The number of deleted documents.
    pub async fn delete_many_by_filter(&self, filter: BsonDocument) -> DocumentStoreResult<u64> {
        trace!(namespace = %self.namespace, ?filter, "delete_many_by_filter");

        self.run_hooked(Operation::DeleteManyByFilter, async {
            let deleted = self.backend.delete_many(&self.namespace, filter).await?;
            debug!(namespace = %self.namespace, deleted, "documents deleted");

            Ok(deleted)
        })
        .await
    }

    /// Deletes the document with the given hex id. Fires the
    /// [`Operation::DeleteManyByFilter`] hooks as well.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::InvalidIdentifier`] if `id` is malformed.
    /// - [`DocumentStoreError::DocumentNotFound`] unless exactly one document was deleted.
    pub async fn delete_one_by_id(&self, id: &str) -> DocumentStoreResult<()> {
        trace!(namespace = %self.namespace, id, "delete_one_by_id");

        self.run_hooked(Operation::DeleteOneById, async {
            let filter = FilterBuilder::by_id(decode_hex(id)?).build();

            match self.delete_many_by_filter(filter).await? {
                1 => Ok(()),
                _ => Err(DocumentStoreError::DocumentNotFound),
            }
        })
        .await
    }

    /// Drops the collection with all of its documents and indexes.
    pub async fn delete_all(&self) -> DocumentStoreResult<()> {
        trace!(namespace = %self.namespace, "delete_all");

        self.run_hooked(Operation::DeleteAll, self.backend.drop_collection(&self.namespace))
            .await
    }

    async fn find_and_modify<D: Document>(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
        document: &mut D,
    ) -> DocumentStoreResult<()> {
        let raw = self.backend
            .find_one_and_update(&self.namespace, filter, update, upsert)
            .await
            .map_err(classify_write_error)?
            .ok_or(DocumentStoreError::DocumentNotFound)?;

        decode_into(document, &raw)
    }

    /// Drains `cursor` through `decode` under the fetch budget, then closes it.
    async fn drain<T, F>(&self, mut cursor: B::Cursor, mut decode: F) -> DocumentStoreResult<Vec<T>>
    where
        T: Send,
        F: FnMut(BsonDocument) -> DocumentStoreResult<T> + Send,
    {
        let fetched = timeout(self.config.cursor_fetch_timeout, async {
            let mut items = Vec::new();

            while cursor.advance().await? {
                items.push(decode(cursor.current()?)?);
            }

            Ok::<_, DocumentStoreError>(items)
        })
        .await
        .map_err(|_| DocumentStoreError::Timeout("cursor fetch".into()))
        .and_then(|fetched| fetched);

        self.close_cursor(cursor).await;

        fetched
    }

    async fn close_cursor(&self, cursor: B::Cursor) {
        match timeout(self.config.cursor_close_timeout, cursor.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(namespace = %self.namespace, %error, "failed to close cursor"),
            Err(_) => warn!(namespace = %self.namespace, "timed out closing cursor"),
        }
    }

    async fn run_hooked<T, Fut>(&self, operation: Operation, step: Fut) -> DocumentStoreResult<T>
    where
        Fut: Future<Output = DocumentStoreResult<T>>,
    {
        if let Err(failure) = self.before.run(&self.context(operation, HookPhase::Before)).await {
            debug!(%operation, namespace = %self.namespace, error = %failure.error, "before hook rejected operation");
            return Err(failure.error);
        }

        let result = self.bounded(step).await;

        match self.after.run(&self.context(operation, HookPhase::After)).await {
            Ok(()) => result,
            Err(failure) => {
                warn!(%operation, namespace = %self.namespace, error = %failure.error, "after hook failed");

                match result {
                    Ok(_) if failure.propagate => Err(failure.error),
                    result => result,
                }
            }
        }
    }

    async fn bounded<T>(&self, step: impl Future<Output = DocumentStoreResult<T>>) -> DocumentStoreResult<T> {
        match self.config.operation_timeout {
            Some(limit) => timeout(limit, step)
                .await
                .map_err(|_| DocumentStoreError::Timeout("operation".into()))?,
            None => step.await,
        }
    }

    fn context(&self, operation: Operation, phase: HookPhase) -> HookContext {
        HookContext {
            operation,
            phase,
            namespace: self.namespace.clone(),
        }
    }
}

fn inserted_id(id: &Bson) -> DocumentStoreResult<ObjectId> {
    match id {
        Bson::ObjectId(id) => Ok(*id),
        other => Err(DocumentStoreError::InvalidIdentifier(other.to_string())),
    }
}

/// Typed decode followed by re-assigning the identifier from the raw `_id`.
fn decode_into<D: Document>(document: &mut D, raw: &BsonDocument) -> DocumentStoreResult<()> {
    document.decode_from_raw(raw)?;

    if let Some(id) = raw.get(ID_FIELD) {
        document.set_id_from_wire(id)?;
    }

    Ok(())
}

/// Decodes a raw payload into a fresh value, then re-assigns the identifier from `_id`.
fn decode_owned<D: Document>(raw: BsonDocument) -> DocumentStoreResult<D> {
    let id = raw.get(ID_FIELD).cloned();
    let mut document = D::from_document(raw)?;

    if let Some(id) = id {
        document.set_id_from_wire(&id)?;
    }

    Ok(document)
}
