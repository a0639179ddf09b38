//! Time budgets applied by collection stores.
//!
//! Durations are (de)serialized as integer milliseconds, so a config can be embedded in an
//! application's own settings file:
//!
//! ```ignore
//! { "cursor_fetch_timeout": 5000, "operation_timeout": 30000 }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-store time budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Budget for opening a cursor in multi-document reads.
    #[serde(with = "millis")]
    pub cursor_open_timeout: Duration,
    /// Budget for draining a cursor.
    #[serde(with = "millis")]
    pub cursor_fetch_timeout: Duration,
    /// Budget for closing a cursor.
    #[serde(with = "millis")]
    pub cursor_close_timeout: Duration,
    /// Server-side budget for counts.
    #[serde(with = "millis")]
    pub count_max_time: Duration,
    /// Overall budget for the database step of an operation. Unbounded when `None`.
    #[serde(with = "optional_millis")]
    pub operation_timeout: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cursor_open_timeout: Duration::from_secs(1),
            cursor_fetch_timeout: Duration::from_secs(1),
            cursor_close_timeout: Duration::from_secs(1),
            count_max_time: Duration::from_secs(2),
            operation_timeout: None,
        }
    }
}

impl StoreConfig {
    pub fn with_cursor_open_timeout(mut self, timeout: Duration) -> Self {
        self.cursor_open_timeout = timeout;
        self
    }

    pub fn with_cursor_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.cursor_fetch_timeout = timeout;
        self
    }

    pub fn with_cursor_close_timeout(mut self, timeout: Duration) -> Self {
        self.cursor_close_timeout = timeout;
        self
    }

    pub fn with_count_max_time(mut self, max_time: Duration) -> Self {
        self.count_max_time = max_time;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&(value.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
