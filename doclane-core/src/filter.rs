//! Fluent construction of native filter documents.
//!
//! The builder only assembles the document; it does not validate field names or operator
//! payloads. [`FilterBuilder::or`] and [`FilterBuilder::and`] append to the `$or` / `$and`
//! arrays, every other method replaces whatever predicate the field already had.
//!
//! # Example
//!
//! ```ignore
//! use doclane::filter::FilterBuilder;
//!
//! let filter = FilterBuilder::new()
//!     .equal_to("status", "open")
//!     .greater_than("priority", 2)
//!     .build();
//! // { "status": { "$eq": "open" }, "priority": { "$gt": 2 } }
//! ```

use bson::{Bson, Document as BsonDocument, doc, oid::ObjectId};

use crate::document::ID_FIELD;

/// Accumulates a filter document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterBuilder {
    query: BsonDocument,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a filter matching a single identifier.
    pub fn by_id(id: ObjectId) -> Self {
        Self::new().equal_to(ID_FIELD, id)
    }

    /// Sets `field` to an arbitrary sub-expression.
    pub fn where_field(mut self, field: impl Into<String>, expression: impl Into<Bson>) -> Self {
        self.query.insert(field.into(), expression.into());
        self
    }

    /// Appends each expression to the `$or` array.
    pub fn or<I>(self, expressions: I) -> Self
    where
        I: IntoIterator<Item = BsonDocument>,
    {
        self.append("$or", expressions)
    }

    /// Appends each expression to the `$and` array.
    pub fn and<I>(self, expressions: I) -> Self
    where
        I: IntoIterator<Item = BsonDocument>,
    {
        self.append("$and", expressions)
    }

    pub fn equal_to(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.operator(field, "$eq", value.into())
    }

    pub fn not_equal_to(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.operator(field, "$ne", value.into())
    }

    /// Matches when the field equals any of `values`.
    pub fn in_values<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.operator(field, "$in", Self::array(values))
    }

    /// Matches when the field equals none of `values`.
    pub fn not_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.operator(field, "$nin", Self::array(values))
    }

    pub fn has_field(self, field: impl Into<String>) -> Self {
        self.operator(field, "$exists", Bson::Boolean(true))
    }

    pub fn has_not_field(self, field: impl Into<String>) -> Self {
        self.operator(field, "$exists", Bson::Boolean(false))
    }

    pub fn greater_or_equal(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.operator(field, "$gte", value.into())
    }

    pub fn less_or_equal(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.operator(field, "$lte", value.into())
    }

    pub fn greater_than(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.operator(field, "$gt", value.into())
    }

    pub fn less_than(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.operator(field, "$lt", value.into())
    }

    /// Finalizes the builder into its filter document.
    pub fn build(self) -> BsonDocument {
        self.query
    }

    fn operator(mut self, field: impl Into<String>, op: &str, value: Bson) -> Self {
        self.query.insert(field.into(), doc! { op: value });
        self
    }

    fn append<I>(mut self, key: &str, expressions: I) -> Self
    where
        I: IntoIterator<Item = BsonDocument>,
    {
        let mut items = match self.query.remove(key) {
            Some(Bson::Array(items)) => items,
            _ => Vec::new(),
        };

        items.extend(expressions.into_iter().map(Bson::Document));
        self.query.insert(key, items);
        self
    }

    fn array<I, V>(values: I) -> Bson
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Bson::Array(values.into_iter().map(Into::into).collect())
    }
}

impl From<FilterBuilder> for BsonDocument {
    fn from(builder: FilterBuilder) -> Self {
        builder.build()
    }
}
