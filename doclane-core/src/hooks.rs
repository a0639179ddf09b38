//! Lifecycle hooks run around collection operations.
//!
//! A [`HookRegistry`] maps each [`Operation`] to an ordered list of async callbacks.
//! Registration is append-only and happens while the owning store is exclusively
//! borrowed, so the hook lists are never mutated while operations are in flight.
//!
//! # Example
//!
//! ```ignore
//! use doclane::hooks::Operation;
//!
//! notes.add_before_hook(Operation::InsertOne, |ctx| async move {
//!     tracing::info!(operation = %ctx.operation, "inserting");
//!     Ok(())
//! });
//! ```

use futures::future::BoxFuture;
use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use crate::{
    backend::Namespace,
    error::{DocumentStoreError, DocumentStoreResult},
};

/// The operations hooks can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateIndex,
    InsertOne,
    InsertMany,
    UpdateOne,
    UpdateManyByFilter,
    UpdateMany,
    UpsertOne,
    FindAndUpdateOne,
    ReplaceOne,
    ReplaceOneById,
    GetOneById,
    GetOneByFilter,
    GetManyByFilter,
    FindAllByFilter,
    FindManyByFilter,
    DeleteManyByFilter,
    DeleteOneById,
    DeleteAll,
}

impl Operation {
    /// Every hookable operation.
    pub const ALL: [Operation; 18] = [
        Operation::CreateIndex,
        Operation::InsertOne,
        Operation::InsertMany,
        Operation::UpdateOne,
        Operation::UpdateManyByFilter,
        Operation::UpdateMany,
        Operation::UpsertOne,
        Operation::FindAndUpdateOne,
        Operation::ReplaceOne,
        Operation::ReplaceOneById,
        Operation::GetOneById,
        Operation::GetOneByFilter,
        Operation::GetManyByFilter,
        Operation::FindAllByFilter,
        Operation::FindManyByFilter,
        Operation::DeleteManyByFilter,
        Operation::DeleteOneById,
        Operation::DeleteAll,
    ];

    /// Stable name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateIndex => "CreateIndex",
            Operation::InsertOne => "InsertOne",
            Operation::InsertMany => "InsertMany",
            Operation::UpdateOne => "UpdateOne",
            Operation::UpdateManyByFilter => "UpdateManyByFilter",
            Operation::UpdateMany => "UpdateMany",
            Operation::UpsertOne => "UpsertOne",
            Operation::FindAndUpdateOne => "FindAndUpdateOne",
            Operation::ReplaceOne => "ReplaceOne",
            Operation::ReplaceOneById => "ReplaceOneByID",
            Operation::GetOneById => "GetOneByID",
            Operation::GetOneByFilter => "GetOneByFilter",
            Operation::GetManyByFilter => "GetManyByFilter",
            Operation::FindAllByFilter => "FindAllByFilter",
            Operation::FindManyByFilter => "FindManyByFilter",
            Operation::DeleteManyByFilter => "DeleteManyByFilter",
            Operation::DeleteOneById => "DeleteOneByID",
            Operation::DeleteAll => "DeleteAll",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a hook runs before or after the database call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Before,
    After,
}

/// Passed to every hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub operation: Operation,
    pub phase: HookPhase,
    pub namespace: Namespace,
}

/// A type-erased hook callback.
pub type HookFn = Arc<dyn Fn(HookContext) -> BoxFuture<'static, DocumentStoreResult<()>> + Send + Sync>;

#[derive(Clone)]
struct HookEntry {
    hook: HookFn,
    propagate: bool,
}

/// Ordered hooks for one phase, keyed by operation.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<Operation, Vec<HookEntry>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `hook` to the list for `operation`.
    ///
    /// When `propagate` is set and the hook runs in the after phase, its error replaces an
    /// otherwise successful operation result.
    pub fn register<F, Fut>(&mut self, operation: Operation, propagate: bool, hook: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DocumentStoreResult<()>> + Send + 'static,
    {
        let hook: HookFn = Arc::new(move |ctx| Box::pin(hook(ctx)));

        self.hooks
            .entry(operation)
            .or_default()
            .push(HookEntry { hook, propagate });
    }

    /// Number of hooks registered for `operation`.
    pub fn count(&self, operation: Operation) -> usize {
        self.hooks.get(&operation).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(Vec::is_empty)
    }

    /// Runs the hooks for `operation` in registration order, stopping at the first failure.
    ///
    /// On failure returns the error together with whether the failing hook was registered
    /// as propagating.
    pub async fn run(&self, ctx: &HookContext) -> Result<(), HookFailure> {
        let Some(entries) = self.hooks.get(&ctx.operation) else {
            return Ok(());
        };

        for entry in entries {
            if let Err(error) = (entry.hook)(ctx.clone()).await {
                return Err(HookFailure {
                    error,
                    propagate: entry.propagate,
                });
            }
        }

        Ok(())
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.hooks.iter().map(|(op, entries)| (op.name(), entries.len())))
            .finish()
    }
}

/// The first hook error of a run.
#[derive(Debug)]
pub struct HookFailure {
    pub error: DocumentStoreError,
    pub propagate: bool,
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn context(operation: Operation) -> HookContext {
        HookContext {
            operation,
            phase: HookPhase::Before,
            namespace: Namespace::new("db", "notes"),
        }
    }

    #[test]
    fn names_are_unique() {
        let mut names = Operation::ALL.iter().map(Operation::name).collect::<Vec<_>>();
        names.sort();
        names.dedup();

        assert_eq!(names.len(), Operation::ALL.len());
        assert_eq!(Operation::DeleteOneById.to_string(), "DeleteOneByID");
    }

    #[tokio::test]
    async fn hooks_run_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();

        for n in 0..3 {
            let calls = calls.clone();
            registry.register(Operation::InsertOne, false, move |_| {
                let calls = calls.clone();
                async move {
                    calls.lock().unwrap().push(n);
                    Ok(())
                }
            });
        }

        registry.run(&context(Operation::InsertOne)).await.unwrap();
        registry.run(&context(Operation::UpdateOne)).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(registry.count(Operation::InsertOne), 3);
        assert_eq!(registry.count(Operation::UpdateOne), 0);
    }

    #[tokio::test]
    async fn first_failure_stops_the_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();

        registry.register(Operation::DeleteAll, true, |_| async {
            Err(DocumentStoreError::Hook("denied".into()))
        });
        let counter = count.clone();
        registry.register(Operation::DeleteAll, false, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let failure = registry.run(&context(Operation::DeleteAll)).await.unwrap_err();

        assert_eq!(failure.error, DocumentStoreError::Hook("denied".into()));
        assert!(failure.propagate);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
