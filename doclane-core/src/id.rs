//! Conversions between textual identifiers and database ObjectIds.
//!
//! Identifiers travel through the public API as 24 character lowercase hex strings and are
//! stored as native [`ObjectId`] values. The all-zero id is the "unset" sentinel.
//!
//! # Example
//!
//! ```ignore
//! use doclane::id::{decode_hex, encode_hex};
//!
//! let id = decode_hex("6291dc08a802d7000622f16a")?;
//! assert_eq!(encode_hex(&id), "6291dc08a802d7000622f16a");
//! ```

use bson::{Bson, oid::ObjectId};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Returns the all-zero identifier.
pub fn zero_id() -> ObjectId {
    ObjectId::from_bytes([0; 12])
}

/// Returns `true` if `id` is the all-zero identifier.
pub fn is_zero_id(id: &ObjectId) -> bool {
    id.bytes() == [0; 12]
}

/// Parses a 24 character hex string into an [`ObjectId`].
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidIdentifier`] carrying the input when it is not
/// exactly 24 hex characters.
pub fn decode_hex(hex: &str) -> DocumentStoreResult<ObjectId> {
    ObjectId::parse_str(hex).map_err(|_| DocumentStoreError::InvalidIdentifier(hex.to_string()))
}

/// Renders an [`ObjectId`] as 24 lowercase hex characters.
pub fn encode_hex(id: &ObjectId) -> String {
    id.to_hex()
}

/// Returns `true` if `hex` would decode successfully.
pub fn is_valid_hex(hex: &str) -> bool {
    decode_hex(hex).is_ok()
}

/// Decodes every entry of `hexes`, failing on the first malformed one.
///
/// The conversion is atomic: either all entries decode, or the error names the first bad
/// entry and its position and no partial list is returned.
pub fn decode_hex_many<S: AsRef<str>>(hexes: &[S]) -> DocumentStoreResult<Vec<ObjectId>> {
    hexes
        .iter()
        .enumerate()
        .map(|(index, hex)| {
            let hex = hex.as_ref();

            ObjectId::parse_str(hex).map_err(|_| {
                DocumentStoreError::InvalidIdentifier(format!("{hex} (at index {index})"))
            })
        })
        .collect()
}

/// Interprets an identifier value as it comes back from the database.
///
/// Accepts a native ObjectId, a hex string, or the extended JSON form `{"$oid": "<hex>"}`.
pub fn id_from_wire(value: &Bson) -> DocumentStoreResult<ObjectId> {
    match value {
        Bson::ObjectId(id) => Ok(*id),
        Bson::String(hex) => decode_hex(hex),
        Bson::Document(doc) => match doc.get("$oid") {
            Some(Bson::String(hex)) if doc.len() == 1 => decode_hex(hex),
            _ => Err(DocumentStoreError::InvalidIdentifier(value.to_string())),
        },
        other => Err(DocumentStoreError::InvalidIdentifier(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn valid_hex_round_trips() {
        let hex = "6291dc08a802d7000622f16a";

        assert!(is_valid_hex(hex));
        assert_eq!(encode_hex(&decode_hex(hex).unwrap()), hex);
    }

    #[test]
    fn malformed_hex_is_rejected() {
        for input in ["", "123", "6291dc08a802d7000622f", "zz91dc08a802d7000622f16a"] {
            let err = decode_hex(input).unwrap_err();

            assert_eq!(err, DocumentStoreError::InvalidIdentifier(input.to_string()));
            assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
            assert!(!is_valid_hex(input));
        }
    }

    #[test]
    fn zero_id_encodes_as_zeros() {
        assert_eq!(encode_hex(&zero_id()), "000000000000000000000000");
        assert!(is_zero_id(&zero_id()));
        assert!(!is_zero_id(&ObjectId::new()));
    }

    #[test]
    fn decode_many_is_atomic() {
        let ids = decode_hex_many(&["6291dc08a802d7000622f16a", "555555555555555555555555"]).unwrap();
        assert_eq!(ids.len(), 2);

        let err = decode_hex_many(&["6291dc08a802d7000622f16a", "bad", "555555555555555555555555"])
            .unwrap_err();
        assert_eq!(err, DocumentStoreError::InvalidIdentifier("bad (at index 1)".into()));
    }

    #[test]
    fn wire_forms() {
        let id = ObjectId::new();

        assert_eq!(id_from_wire(&Bson::ObjectId(id)).unwrap(), id);
        assert_eq!(id_from_wire(&Bson::String(id.to_hex())).unwrap(), id);
        assert_eq!(id_from_wire(&Bson::Document(doc! { "$oid": id.to_hex() })).unwrap(), id);
        assert!(id_from_wire(&Bson::Int32(7)).is_err());
        assert!(id_from_wire(&Bson::Document(doc! { "id": id.to_hex() })).is_err());
    }
}
