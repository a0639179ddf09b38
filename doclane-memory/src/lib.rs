//! In-memory document storage backend for doclane.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait
//! that understands the native filter and update document language. It is meant for tests
//! and local development, where running a database server is inconvenient.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Native filters** - Equality, comparison, membership, existence and `$and`/`$or`
//! - **Updates** - `$set`, `$unset`, `$inc` and `$setOnInsert`, including upserts
//! - **Unique indexes** - Duplicate writes fail with the server's duplicate key code
//! - **Cursor accounting** - [`InMemoryStore::open_cursors`] exposes leaked cursors
//!
//! # Quick Start
//!
//! ```ignore
//! use doclane::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DocumentStore::new(InMemoryStore::new(), "app");
//!     let notes = store.collection("notes");
//!
//!     let mut note = Note { title: "hello".into(), ..Default::default() };
//!     notes.insert_one(&mut note).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as doclane_memory;

pub mod store;
pub(crate) mod evaluator;

pub use store::{InMemoryCursor, InMemoryStore, InMemoryStoreBuilder};
