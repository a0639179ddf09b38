//! Error types and result types for document store operations.
//!
//! Every fallible operation returns [`DocumentStoreResult<T>`]. Callers that need to branch
//! on the failure category should match on [`DocumentStoreError::kind`] rather than on the
//! individual variants, since driver errors pass through unchanged.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Server error code reported when a write violates a unique index.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Represents all possible errors that can occur when interacting with a document store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentStoreError {
    /// The given value is not a valid 24 character hex identifier, or the database
    /// returned an identifier that is not an ObjectId.
    #[error("Invalid object id: {0}")]
    InvalidIdentifier(String),
    /// No document matched the filter of a single-document operation.
    #[error("Document not found")]
    DocumentNotFound,
    /// A document matched the filter but the write left it unchanged.
    #[error("Document not modified")]
    DocumentNotModified,
    /// A write violated a unique index.
    #[error("Duplicate document")]
    DuplicateDocument,
    /// A batch insert reported an identifier that is not an ObjectId. `inserted` holds the
    /// hex ids decoded before the failing entry.
    #[error("Invalid object id returned after inserting {} document(s)", inserted.len())]
    PartialInsert {
        inserted: Vec<String>,
    },
    /// A lifecycle hook rejected the operation.
    #[error("Hook error: {0}")]
    Hook(String),
    /// Error reported by the database driver, passed through unchanged.
    #[error("Driver error: {message}")]
    Driver {
        code: Option<i32>,
        message: String,
    },
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A time budget elapsed. The payload names the phase that ran out of time.
    #[error("Timed out during {0}")]
    Timeout(String),
}

/// The closed set of failure categories callers are expected to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidIdentifier,
    DocumentNotFound,
    DocumentNotModified,
    DuplicateDocument,
    /// Anything else, including driver passthrough errors.
    Other,
}

impl DocumentStoreError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocumentStoreError::InvalidIdentifier(_) | DocumentStoreError::PartialInsert { .. } => {
                ErrorKind::InvalidIdentifier
            }
            DocumentStoreError::DocumentNotFound => ErrorKind::DocumentNotFound,
            DocumentStoreError::DocumentNotModified => ErrorKind::DocumentNotModified,
            DocumentStoreError::DuplicateDocument => ErrorKind::DuplicateDocument,
            _ => ErrorKind::Other,
        }
    }

    /// Creates a driver passthrough error without a server code.
    pub fn driver(message: impl Into<String>) -> Self {
        DocumentStoreError::Driver {
            code: None,
            message: message.into(),
        }
    }

    /// Creates a driver passthrough error carrying a server code.
    pub fn driver_with_code(code: i32, message: impl Into<String>) -> Self {
        DocumentStoreError::Driver {
            code: Some(code),
            message: message.into(),
        }
    }
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

/// Maps a unique-index violation to [`DocumentStoreError::DuplicateDocument`].
///
/// Any other error, including driver errors with a different code, is returned unchanged.
pub fn classify_write_error(err: DocumentStoreError) -> DocumentStoreError {
    match err {
        DocumentStoreError::Driver {
            code: Some(DUPLICATE_KEY_CODE),
            ..
        } => DocumentStoreError::DuplicateDocument,
        other => other,
    }
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_is_classified() {
        let err = DocumentStoreError::driver_with_code(DUPLICATE_KEY_CODE, "E11000 duplicate key");

        assert_eq!(classify_write_error(err), DocumentStoreError::DuplicateDocument);
    }

    #[test]
    fn other_driver_errors_pass_through() {
        let err = DocumentStoreError::driver_with_code(121, "document failed validation");

        assert_eq!(classify_write_error(err.clone()), err);
        assert_eq!(
            classify_write_error(DocumentStoreError::driver("network")),
            DocumentStoreError::driver("network"),
        );
    }

    #[test]
    fn non_driver_errors_pass_through() {
        assert_eq!(
            classify_write_error(DocumentStoreError::DocumentNotFound),
            DocumentStoreError::DocumentNotFound,
        );
    }

    #[test]
    fn kinds() {
        assert_eq!(
            DocumentStoreError::PartialInsert { inserted: vec![] }.kind(),
            ErrorKind::InvalidIdentifier,
        );
        assert_eq!(DocumentStoreError::DuplicateDocument.kind(), ErrorKind::DuplicateDocument);
        assert_eq!(DocumentStoreError::Timeout("fetch".into()).kind(), ErrorKind::Other);
        assert_eq!(DocumentStoreError::driver("boom").kind(), ErrorKind::Other);
    }
}
