//! Core traits and types for document representation and serialization.
//!
//! Every stored type embeds a [`BaseDocument`] carrying the `_id` and the two lifecycle
//! timestamps, and exposes it through the [`Document`] trait. The store only ever touches
//! those three fields; the rest of the document is opaque to it.
//!
//! # Example
//!
//! ```ignore
//! use doclane::{Document, document::BaseDocument};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Document)]
//! pub struct Note {
//!     #[serde(flatten)]
//!     pub base: BaseDocument,
//!     pub title: String,
//! }
//! ```

use bson::{Bson, de::deserialize_from_bson, oid::ObjectId, ser::serialize_to_bson};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, to_value};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    id::{decode_hex, encode_hex, id_from_wire, is_zero_id, zero_id},
};

/// Name of the reserved identifier field.
pub const ID_FIELD: &str = "_id";

/// The fields the store manages on every document.
///
/// The identifier is omitted from the serialized form while it is the zero id, so that the
/// database assigns one on insert. Timestamps are omitted while unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseDocument {
    #[serde(rename = "_id", default = "zero_id", skip_serializing_if = "is_zero_id")]
    pub id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<bson::DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<bson::DateTime>,
}

impl Default for BaseDocument {
    fn default() -> Self {
        Self {
            id: zero_id(),
            created_at: None,
            updated_at: None,
        }
    }
}

/// Contract every stored document type fulfils.
///
/// Implementors only supply access to their embedded [`BaseDocument`]; the identifier and
/// timestamp handling is provided. `#[derive(Document)]` generates the two accessors for
/// structs with a `BaseDocument` field.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the embedded base fields.
    fn base(&self) -> &BaseDocument;

    /// Returns the embedded base fields mutably.
    fn base_mut(&mut self) -> &mut BaseDocument;

    /// Returns the identifier, which is the zero id until the document is inserted.
    fn id(&self) -> ObjectId {
        self.base().id
    }

    /// Returns the identifier as 24 lowercase hex characters.
    fn hex_id(&self) -> String {
        encode_hex(&self.base().id)
    }

    fn set_id(&mut self, id: ObjectId) {
        self.base_mut().id = id;
    }

    /// Sets the identifier from its hex form.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidIdentifier`] and leaves the identifier untouched
    /// if `hex` is malformed.
    fn set_hex_id(&mut self, hex: &str) -> DocumentStoreResult<()> {
        let id = decode_hex(hex)?;
        self.set_id(id);

        Ok(())
    }

    /// Sets the identifier from a value returned by the database.
    ///
    /// See [`id_from_wire`] for the accepted forms.
    fn set_id_from_wire(&mut self, value: &Bson) -> DocumentStoreResult<()> {
        let id = id_from_wire(value)?;
        self.set_id(id);

        Ok(())
    }

    /// Records the creation time.
    fn stamp_created(&mut self, at: DateTime<Utc>) {
        self.base_mut().created_at = Some(bson::DateTime::from_chrono(at));
    }

    /// Records the last modification time.
    fn stamp_updated(&mut self, at: DateTime<Utc>) {
        self.base_mut().updated_at = Some(bson::DateTime::from_chrono(at));
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.base().created_at.map(|at| at.to_chrono())
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.base().updated_at.map(|at| at.to_chrono())
    }

    /// Decodes a raw database payload into this value.
    ///
    /// Fields present in `raw` overwrite the current ones; fields absent from `raw` keep
    /// their current value.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Serialization`] if the merged payload does not
    /// deserialize into `Self`. The value is left untouched in that case.
    fn decode_from_raw(&mut self, raw: &bson::Document) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        let mut merged = self.to_document()?;

        for (key, value) in raw {
            merged.insert(key.clone(), value.clone());
        }

        *self = deserialize_from_bson(Bson::Document(merged))?;

        Ok(())
    }
}

impl Document for BaseDocument {
    fn base(&self) -> &BaseDocument {
        self
    }

    fn base_mut(&mut self) -> &mut BaseDocument {
        self
    }
}

/// Extension trait providing serialization utilities for documents.
///
/// This trait is automatically implemented for all types that implement [`Document`].
pub trait DocumentExt: Sized {
    /// Converts this document to a BSON document for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the type does not serialize to a map.
    fn to_document(&self) -> DocumentStoreResult<bson::Document>;

    /// Creates a document from a BSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the structure is invalid.
    fn from_document(document: bson::Document) -> DocumentStoreResult<Self>;

    /// Converts this document to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn to_json(&self) -> DocumentStoreResult<Value>;
}

impl<D: Document> DocumentExt for D {
    fn to_document(&self) -> DocumentStoreResult<bson::Document> {
        match serialize_to_bson(self)? {
            Bson::Document(document) => Ok(document),
            other => Err(DocumentStoreError::Serialization(format!(
                "expected a document, got {:?}",
                other.element_type()
            ))),
        }
    }

    fn from_document(document: bson::Document) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(document))?)
    }

    fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use chrono::TimeZone;

    use super::*;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Task {
        #[serde(flatten)]
        base: BaseDocument,
        name: String,
        #[serde(default)]
        done: bool,
    }

    impl Document for Task {
        fn base(&self) -> &BaseDocument {
            &self.base
        }

        fn base_mut(&mut self) -> &mut BaseDocument {
            &mut self.base
        }
    }

    #[test]
    fn zero_id_is_not_serialized() {
        let task = Task {
            name: "write".into(),
            ..Default::default()
        };

        let document = task.to_document().unwrap();

        assert!(!document.contains_key(ID_FIELD));
        assert!(!document.contains_key("created_at"));
        assert_eq!(document.get_str("name").unwrap(), "write");
    }

    #[test]
    fn set_hex_id_keeps_id_on_error() {
        let mut task = Task::default();

        task.set_hex_id("6291dc08a802d7000622f16a").unwrap();
        assert_eq!(task.hex_id(), "6291dc08a802d7000622f16a");

        assert!(task.set_hex_id("6291dc08a802d7000622f").is_err());
        assert_eq!(task.hex_id(), "6291dc08a802d7000622f16a");
    }

    #[test]
    fn stamps_are_independent() {
        let created = Utc.with_ymd_and_hms(2022, 5, 28, 10, 0, 0).unwrap();
        let updated = Utc.with_ymd_and_hms(2022, 5, 29, 10, 0, 0).unwrap();
        let mut task = Task::default();

        task.stamp_created(created);
        task.stamp_updated(created);
        task.stamp_updated(updated);

        assert_eq!(task.created_at(), Some(created));
        assert_eq!(task.updated_at(), Some(updated));
    }

    #[test]
    fn decode_from_raw_merges_fields() {
        let id = ObjectId::new();
        let mut task = Task {
            name: "draft".into(),
            done: true,
            ..Default::default()
        };

        task.decode_from_raw(&doc! { "_id": id, "name": "final" }).unwrap();

        assert_eq!(task.id(), id);
        assert_eq!(task.name, "final");
        assert!(task.done);
    }

    #[test]
    fn decode_from_raw_rejects_mismatched_types() {
        let mut task = Task {
            name: "draft".into(),
            ..Default::default()
        };

        assert!(task.decode_from_raw(&doc! { "name": 42 }).is_err());
        assert_eq!(task.name, "draft");
    }
}
