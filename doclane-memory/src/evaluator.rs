//! Evaluation of native filter and update documents against in-memory documents.
//!
//! Supports the subset of the query language the collection store and its callers rely
//! on: implicit equality, `$eq`, `$ne`, `$in`, `$nin`, `$exists`, `$gt`, `$gte`, `$lt`,
//! `$lte`, `$not`, the `$and` / `$or` / `$nor` combinators and dotted field paths. Updates
//! support `$set`, `$unset`, `$inc` and `$setOnInsert`.

use std::{cmp::Ordering, collections::HashMap};
use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use doclane_core::error::{DocumentStoreError, DocumentStoreResult};

/// Server code for a malformed query or update operator.
const BAD_VALUE: i32 = 2;
/// Server code for an update document without operators.
const FAILED_TO_PARSE: i32 = 9;
/// Server code for a type mismatch in an update.
const TYPE_MISMATCH: i32 = 14;
/// Server code for an attempt to change `_id`.
const IMMUTABLE_FIELD: i32 = 66;

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that `1`, `1i64` and `1.0` compare equal, as
/// they do on the server.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl Comparable<'_> {
    /// Position of the value's type in the server's cross-type sort order.
    fn type_rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting: by type first, then by value.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.type_rank()
            .cmp(&other.type_rank())
            .then_with(|| self.partial_cmp(other).unwrap_or(Ordering::Equal))
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            _ => None,
        }
    }
}

/// Resolves a dotted path such as `author.name` or `tags.0`.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Returns `true` if `document` satisfies `filter`.
///
/// # Errors
///
/// Returns a driver error with the server's `BadValue` code for unknown operators or
/// malformed operator payloads.
pub(crate) fn matches(document: &Document, filter: &Document) -> DocumentStoreResult<bool> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(bad_value(format!("unknown top level operator: {op}")));
            }
            path => field_matches(lookup(document, path), condition)?,
        };

        if !satisfied {
            return Ok(false);
        }
    }

    Ok(true)
}

fn clauses<'a>(key: &str, condition: &'a Bson) -> DocumentStoreResult<Vec<&'a Document>> {
    match condition {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| {
                item.as_document()
                    .ok_or_else(|| bad_value(format!("{key} entries must be objects")))
            })
            .collect(),
        _ => Err(bad_value(format!("{key} must be a nonempty array"))),
    }
}

fn is_operator_document(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(doc) if doc.keys().next().is_some_and(|key| key.starts_with('$')) => Some(doc),
        _ => None,
    }
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> DocumentStoreResult<bool> {
    let Some(operators) = is_operator_document(condition) else {
        return Ok(equals(value, condition));
    };

    for (op, operand) in operators {
        let satisfied = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$in" => in_list(value, operand)?,
            "$nin" => !in_list(value, operand)?,
            "$exists" => value.is_some() == truthy(operand),
            "$gt" => compare(value, operand, |o| o == Ordering::Greater),
            "$gte" => compare(value, operand, |o| o != Ordering::Less),
            "$lt" => compare(value, operand, |o| o == Ordering::Less),
            "$lte" => compare(value, operand, |o| o != Ordering::Greater),
            "$not" => match operand {
                Bson::Document(_) => !field_matches(value, operand)?,
                _ => return Err(bad_value("$not needs an object")),
            },
            other => return Err(bad_value(format!("unknown operator: {other}"))),
        };

        if !satisfied {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Equality with the server's array semantics: an array field matches a scalar when any
/// element does, and a missing field matches `null`.
fn equals(value: Option<&Bson>, target: &Bson) -> bool {
    let target = Comparable::from(target);

    match value {
        None => target == Comparable::Null,
        Some(array @ Bson::Array(items)) => {
            Comparable::from(array) == target || items.iter().any(|item| Comparable::from(item) == target)
        }
        Some(value) => Comparable::from(value) == target,
    }
}

fn in_list(value: Option<&Bson>, operand: &Bson) -> DocumentStoreResult<bool> {
    match operand {
        Bson::Array(candidates) => Ok(candidates.iter().any(|candidate| equals(value, candidate))),
        _ => Err(bad_value("$in/$nin needs an array")),
    }
}

fn compare(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let operand = Comparable::from(operand);
    let holds = |candidate: &Bson| {
        Comparable::from(candidate)
            .partial_cmp(&operand)
            .is_some_and(&accept)
    };

    match value {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(holds),
        Some(value) => holds(value),
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Null | Bson::Undefined => false,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    }
}

/// Builds the document an upsert starts from: the filter's equality predicates.
pub(crate) fn seed_from_filter(filter: &Document) -> Document {
    let mut seed = Document::new();
    collect_equalities(filter, &mut seed);
    seed
}

fn collect_equalities(filter: &Document, seed: &mut Document) {
    for (key, condition) in filter {
        if key == "$and" {
            if let Bson::Array(items) = condition {
                for clause in items.iter().filter_map(Bson::as_document) {
                    collect_equalities(clause, seed);
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }

        match is_operator_document(condition) {
            Some(operators) => {
                if let Some(value) = operators.get("$eq") {
                    set_path(seed, key, value.clone());
                }
            }
            None => set_path(seed, key, condition.clone()),
        }
    }
}

/// Applies an update document in place.
///
/// `inserting` enables `$setOnInsert`, which is ignored otherwise.
pub(crate) fn apply_update(document: &mut Document, update: &Document, inserting: bool) -> DocumentStoreResult<()> {
    if update.is_empty() || update.keys().any(|key| !key.starts_with('$')) {
        return Err(DocumentStoreError::driver_with_code(
            FAILED_TO_PARSE,
            "update document requires atomic operators",
        ));
    }

    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| DocumentStoreError::driver_with_code(FAILED_TO_PARSE, format!("{op} needs an object")))?;

        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    guard_id(document, path, value)?;
                    set_path(document, path, value.clone());
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (path, value) in fields {
                        set_path(document, path, value.clone());
                    }
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    if path == "_id" {
                        return Err(immutable_id());
                    }
                    remove_path(document, path);
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    let next = increment(lookup(document, path), delta, path)?;
                    set_path(document, path, next);
                }
            }
            other => {
                return Err(DocumentStoreError::driver_with_code(
                    FAILED_TO_PARSE,
                    format!("unknown update operator: {other}"),
                ));
            }
        }
    }

    Ok(())
}

fn guard_id(document: &Document, path: &str, value: &Bson) -> DocumentStoreResult<()> {
    match document.get("_id") {
        Some(existing) if path == "_id" && existing != value => Err(immutable_id()),
        _ => Ok(()),
    }
}

fn immutable_id() -> DocumentStoreError {
    DocumentStoreError::driver_with_code(IMMUTABLE_FIELD, "the (immutable) field '_id' was found to have been altered")
}

fn increment(current: Option<&Bson>, delta: &Bson, path: &str) -> DocumentStoreResult<Bson> {
    let mismatch = || {
        DocumentStoreError::driver_with_code(TYPE_MISMATCH, format!("cannot apply $inc to a non-numeric value at {path}"))
    };

    let overflow = || bad_value(format!("$inc at {path} overflows a 64-bit integer"));

    Ok(match (current, delta) {
        (None, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => delta.clone(),
        // Int32 sums that overflow are promoted to Int64.
        (Some(Bson::Int32(a)), Bson::Int32(b)) => a
            .checked_add(*b)
            .map_or(Bson::Int64(*a as i64 + *b as i64), Bson::Int32),
        (Some(Bson::Int32(a)), Bson::Int64(b)) => Bson::Int64((*a as i64).checked_add(*b).ok_or_else(overflow)?),
        (Some(Bson::Int64(a)), Bson::Int32(b)) => Bson::Int64(a.checked_add(*b as i64).ok_or_else(overflow)?),
        (Some(Bson::Int64(a)), Bson::Int64(b)) => Bson::Int64(a.checked_add(*b).ok_or_else(overflow)?),
        (Some(Bson::Double(a)), Bson::Int32(b)) => Bson::Double(a + *b as f64),
        (Some(Bson::Double(a)), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Some(Bson::Double(a)), Bson::Double(b)) => Bson::Double(a + b),
        (Some(Bson::Int32(a)), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        (Some(Bson::Int64(a)), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => return Err(mismatch()),
    })
}

/// Sets a dotted path, creating intermediate documents as needed.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

/// Orders two documents by a sort specification such as `{ "age": -1, "name": 1 }`.
pub(crate) fn compare_by(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (path, direction) in sort {
        let left = lookup(a, path).map(Comparable::from).unwrap_or(Comparable::Null);
        let right = lookup(b, path).map(Comparable::from).unwrap_or(Comparable::Null);
        let descending = matches!(Comparable::from(direction), Comparable::Number(n) if n < 0.0);

        let ordering = if descending {
            right.sort_cmp(&left)
        } else {
            left.sort_cmp(&right)
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

fn bad_value(message: impl Into<String>) -> DocumentStoreError {
    DocumentStoreError::driver_with_code(BAD_VALUE, message)
}
