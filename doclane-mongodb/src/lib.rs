//! MongoDB backend implementation for doclane.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait on top of
//! the official async driver. Filters and updates are handed to the server untouched.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! doclane = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Errors
//!
//! Driver failures are surfaced as `DocumentStoreError::Driver`, carrying the server error
//! code for write, bulk insert and command failures so that duplicate keys can be told
//! apart from other errors.
//!
//! # Example
//!
//! ```ignore
//! use doclane::{backend::StoreBackendBuilder, mongodb::MongoDbStore, store::DocumentStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MongoDbStore::builder("mongodb://localhost:27017")
//!         .with_app_name("notes-service")
//!         .build()
//!         .await?;
//!     let store = DocumentStore::new(backend, "notes");
//!
//!     store.ping().await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as doclane_mongodb;

pub mod store;

pub use store::{MongoCursor, MongoDbStore, MongoDbStoreBuilder};
