//! A hook-aware data-access layer for MongoDB-compatible document databases.
//!
//! This crate is the core of the doclane project and provides:
//!
//! - **Identifier codec** ([`id`]) - Conversions between hex strings and ObjectIds
//! - **Error handling** ([`error`]) - The error taxonomy and the write error classifier
//! - **Document contract** ([`document`]) - The base fields every stored type embeds
//! - **Filter construction** ([`filter`]) - A fluent builder for native filter documents
//! - **Lifecycle hooks** ([`hooks`]) - Before/after callbacks keyed by operation
//! - **Store backend abstraction** ([`backend`]) - Traits implemented by database drivers
//! - **Collections interface** ([`collection`]) - Hook-aware CRUD over one collection
//! - **Document store** ([`store`]) - Binds a backend to a database
//! - **Configuration** ([`config`], [`clock`]) - Time budgets and the time source
//!
//! # Example
//!
//! ```ignore
//! use doclane::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Document)]
//! pub struct User {
//!     #[serde(flatten)]
//!     pub base: BaseDocument,
//!     pub name: String,
//! }
//!
//! let store = DocumentStore::new(InMemoryStore::new(), "app");
//! let users = store.collection("users");
//!
//! let mut user = User { name: "Alice".into(), ..Default::default() };
//! let id = users.insert_one(&mut user).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as doclane_core;

pub mod backend;
pub mod clock;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod id;
pub mod store;
