//! Convenient re-exports of commonly used types from doclane.
//!
//! ```ignore
//! use doclane::prelude::*;
//! ```

pub use doclane_core::{
    backend::{DocumentCursor, FindOptions, IndexOptions, Namespace, StoreBackend, StoreBackendBuilder, UpdateOutcome},
    clock::{Clock, FrozenClock, SystemClock},
    collection::CollectionStore,
    config::StoreConfig,
    document::{BaseDocument, Document, DocumentExt},
    error::{DocumentStoreError, DocumentStoreResult, ErrorKind},
    filter::FilterBuilder,
    hooks::{HookContext, HookPhase, Operation},
    store::DocumentStore,
};
pub use doclane_macros::Document;
