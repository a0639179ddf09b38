use async_trait::async_trait;
use bson::{Bson, Document, doc};
use mongodb::{
    Client, Collection as MongoCollection, Cursor, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{
        ClientOptions, CountOptions, FindOneAndUpdateOptions, FindOptions as MongoFindOptions,
        IndexOptions as MongoIndexOptions, ReturnDocument,
    },
};
use std::time::Duration;
use tracing::{debug, trace};
use doclane_core::{
    backend::{DocumentCursor, FindOptions, IndexOptions, Namespace, StoreBackend, StoreBackendBuilder, UpdateOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Server code reported when dropping a collection that does not exist.
const NAMESPACE_NOT_FOUND: i32 = 26;

/// Converts a driver error into a passthrough error, keeping the server code when the
/// failure carries one.
pub(crate) fn driver_error(error: MongoError) -> DocumentStoreError {
    let code = match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure)) => Some(failure.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(failure)) => Some(failure.code),
        ErrorKind::InsertMany(failure) => failure
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|failure| failure.code),
        ErrorKind::Command(failure) => Some(failure.code),
        _ => None,
    };

    DocumentStoreError::Driver {
        code,
        message: error.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
}

impl MongoDbStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn builder(dsn: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn)
    }

    /// The underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn get_collection(&self, namespace: &Namespace) -> MongoCollection<Document> {
        self.client
            .database(&namespace.database)
            .collection(&namespace.collection)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    type Cursor = MongoCursor;

    async fn ping(&self) -> DocumentStoreResult<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(driver_error)?;

        Ok(())
    }

    async fn insert_one(&self, namespace: &Namespace, document: Document) -> DocumentStoreResult<Bson> {
        Ok(
            self.get_collection(namespace)
                .insert_one(document)
                .await
                .map_err(driver_error)?
                .inserted_id
        )
    }

    async fn insert_many(&self, namespace: &Namespace, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        let mut inserted = self.get_collection(namespace)
            .insert_many(documents)
            .await
            .map_err(driver_error)?
            .inserted_ids
            .into_iter()
            .collect::<Vec<_>>();

        // The driver reports ids keyed by input position.
        inserted.sort_by_key(|(position, _)| *position);

        Ok(inserted.into_iter().map(|(_, id)| id).collect())
    }

    async fn update_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let result = self.get_collection(namespace)
            .update_many(filter, update)
            .await
            .map_err(driver_error)?;

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn find_one_and_update(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> DocumentStoreResult<Option<Document>> {
        let mut options = FindOneAndUpdateOptions::default();
        options.upsert = Some(upsert);
        options.return_document = Some(ReturnDocument::After);

        self.get_collection(namespace)
            .find_one_and_update(filter, update)
            .with_options(options)
            .await
            .map_err(driver_error)
    }

    async fn replace_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        replacement: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let result = self.get_collection(namespace)
            .replace_one(filter, replacement)
            .await
            .map_err(driver_error)?;

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn find_one(&self, namespace: &Namespace, filter: Document) -> DocumentStoreResult<Option<Document>> {
        self.get_collection(namespace)
            .find_one(filter)
            .await
            .map_err(driver_error)
    }

    async fn find(
        &self,
        namespace: &Namespace,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<MongoCursor> {
        let mut find_options = MongoFindOptions::default();
        find_options.sort = options.sort;
        find_options.skip = options.skip;
        find_options.limit = options.limit;

        let cursor = self.get_collection(namespace)
            .find(filter)
            .with_options(find_options)
            .await
            .map_err(driver_error)?;

        Ok(MongoCursor { inner: cursor })
    }

    async fn count(&self, namespace: &Namespace, filter: Document, max_time: Duration) -> DocumentStoreResult<u64> {
        let mut options = CountOptions::default();
        options.max_time = Some(max_time);

        self.get_collection(namespace)
            .count_documents(filter)
            .with_options(options)
            .await
            .map_err(driver_error)
    }

    async fn delete_many(&self, namespace: &Namespace, filter: Document) -> DocumentStoreResult<u64> {
        Ok(
            self.get_collection(namespace)
                .delete_many(filter)
                .await
                .map_err(driver_error)?
                .deleted_count
        )
    }

    async fn drop_collection(&self, namespace: &Namespace) -> DocumentStoreResult<()> {
        match self.get_collection(namespace).drop().await.map_err(driver_error) {
            Err(DocumentStoreError::Driver {
                code: Some(NAMESPACE_NOT_FOUND),
                ..
            }) => Ok(()),
            result => result,
        }
    }

    async fn create_index(
        &self,
        namespace: &Namespace,
        keys: Document,
        options: IndexOptions,
    ) -> DocumentStoreResult<String> {
        let mut index_options = MongoIndexOptions::default();
        index_options.name = options.name;
        index_options.unique = Some(options.unique);
        index_options.sparse = options.sparse.then_some(true);
        index_options.expire_after = options.expire_after;

        let name = self.get_collection(namespace)
            .create_index(
                IndexModel::builder()
                .keys(keys)
                .options(index_options)
                .build()
            )
            .await
            .map_err(driver_error)?
            .index_name;
        debug!(%namespace, index = %name, "index created");

        Ok(name)
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.client.clone().shutdown().await;

        Ok(())
    }
}

/// Wraps a driver cursor.
///
/// Closing drops the driver cursor, which kills it on the server in the background.
#[derive(Debug)]
pub struct MongoCursor {
    inner: Cursor<Document>,
}

#[async_trait]
impl DocumentCursor for MongoCursor {
    async fn advance(&mut self) -> DocumentStoreResult<bool> {
        self.inner.advance().await.map_err(driver_error)
    }

    fn current(&self) -> DocumentStoreResult<Document> {
        self.inner.deserialize_current().map_err(driver_error)
    }

    async fn close(self) -> DocumentStoreResult<()> {
        drop(self.inner);

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    app_name: Option<String>,
    connect_timeout: Option<Duration>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            app_name: None,
            connect_timeout: None,
        }
    }

    /// Name reported to the server in the connection handshake.
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        if let Some(app_name) = self.app_name {
            options.app_name = Some(app_name);
        }
        if let Some(timeout) = self.connect_timeout {
            options.connect_timeout = Some(timeout);
        }
        trace!(hosts = ?options.hosts, "connecting to mongodb");

        Ok(MongoDbStore::new(
            Client::with_options(options)
                .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_settings() {
        let builder = MongoDbStore::builder("mongodb://localhost:27017")
            .with_app_name("doclane")
            .with_connect_timeout(Duration::from_secs(3));

        assert_eq!(builder.dsn, "mongodb://localhost:27017");
        assert_eq!(builder.app_name.as_deref(), Some("doclane"));
        assert_eq!(builder.connect_timeout, Some(Duration::from_secs(3)));
    }
}
