//! Time source used to stamp documents.

use chrono::{DateTime, Duration, Utc};
use std::{
    fmt::Debug,
    sync::{Arc, PoisonError, RwLock},
};

/// Supplies the current time to a store.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that stands still until it is moved explicitly.
///
/// Clones share the same instant, so a test can keep a handle and move the time a store
/// observes.
#[derive(Debug, Clone)]
pub struct FrozenClock {
    at: Arc<RwLock<DateTime<Utc>>>,
}

impl FrozenClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            at: Arc::new(RwLock::new(at)),
        }
    }

    /// Moves the clock to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.at.write().unwrap_or_else(PoisonError::into_inner) = at;
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.at.write().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        *self.at.read().unwrap_or_else(PoisonError::into_inner)
    }
}
