//! Main doclane crate providing a hook-aware data-access layer for document databases.
//!
//! This crate is the primary entry point for users of doclane. It re-exports the core
//! types from the sub-crates and provides access to the storage backends.
//!
//! # Features
//!
//! - **Uniform CRUD** - Insert, update, upsert, replace, read, count and delete over any
//!   type embedding a `BaseDocument`
//! - **Lifecycle hooks** - Async before/after callbacks for every operation
//! - **Identifier and timestamp handling** - `_id`, `created_at` and `updated_at` are
//!   managed by the store
//! - **Error classification** - Duplicate keys, missing and unmodified documents are
//!   reported as distinct errors
//! - **Multiple backends** - MongoDB for production, in-memory for tests
//!
//! # Quick Start
//!
//! ```ignore
//! use doclane::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Document)]
//! pub struct Note {
//!     #[serde(flatten)]
//!     pub base: BaseDocument,
//!     pub title: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = DocumentStore::new(InMemoryStore::new(), "app");
//!     let mut notes = store.collection("notes");
//!
//!     notes.add_after_hook(Operation::InsertOne, |ctx| async move {
//!         println!("{} done on {}", ctx.operation, ctx.namespace);
//!         Ok(())
//!     });
//!
//!     let mut note = Note { title: "groceries".into(), ..Default::default() };
//!     let id = notes.insert_one(&mut note).await?;
//!
//!     let mut loaded = Note::default();
//!     notes.get_one_by_id(&id, &mut loaded).await?;
//!
//!     let open = notes
//!         .get_many_by_filter(
//!             FilterBuilder::new().equal_to("title", "groceries").build(),
//!             Note::default,
//!             FindOptions::default(),
//!         )
//!         .await?;
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use doclane_core::{backend, clock, collection, config, document, error, filter, hooks, id, store};
pub use doclane_macros::Document;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use doclane_memory::{InMemoryCursor, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use doclane_mongodb::{MongoCursor, MongoDbStore, MongoDbStoreBuilder};
}
