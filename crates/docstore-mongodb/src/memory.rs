//! In-process [`Driver`] backed by plain maps.
//!
//! Useful for unit tests and embedding. Supports a practical subset of the
//! MongoDB query language:
//!
//! - Filters: field equality (dotted paths, array membership), `$eq`, `$ne`,
//!   `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists`, and top-level
//!   `$and` / `$or`.
//! - Updates: `$set`, `$unset`, `$inc`.
//!
//! Cursor lifecycle is observable through [`MemoryDriver::cursors_opened`] and
//! [`MemoryDriver::cursors_closed`], and faults can be injected with
//! [`MemoryDriver::fail_operations`] and [`MemoryDriver::fail_cursor_close`].

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document as BsonDocument};
use docstore_common::{DocStoreError, Result};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::driver::{DocumentCursor, Driver, UpdateOutcome};

#[derive(Debug, Default)]
struct CursorStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// In-memory document store
#[derive(Debug, Default)]
pub struct MemoryDriver {
    collections: RwLock<HashMap<String, Vec<BsonDocument>>>,
    cursors: Arc<CursorStats>,
    fail_close: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `Operation(message)`; `None` heals.
    pub fn fail_operations(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(str::to_string);
    }

    /// Make cursors opened from now on fail when closed
    pub fn fail_cursor_close(&self, fail: bool) {
        self.fail_close.store(fail, AtomicOrdering::SeqCst);
    }

    pub fn cursors_opened(&self) -> usize {
        self.cursors.opened.load(AtomicOrdering::SeqCst)
    }

    /// Number of `close` calls made on cursors, including failed ones
    pub fn cursors_closed(&self) -> usize {
        self.cursors.closed.load(AtomicOrdering::SeqCst)
    }

    /// Names of collections that currently exist
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn check_failure(&self) -> Result<()> {
        match self.failure.lock().as_ref() {
            Some(message) => Err(DocStoreError::Operation(message.clone())),
            None => Ok(()),
        }
    }

    fn matching(&self, collection: &str, filter: &BsonDocument) -> Result<Vec<BsonDocument>> {
        let collections = self.collections.read();
        let mut out = Vec::new();
        if let Some(documents) = collections.get(collection) {
            for document in documents {
                if matches_filter(document, filter)? {
                    out.push(document.clone());
                }
            }
        }
        Ok(out)
    }

    fn delete(&self, collection: &str, filter: &BsonDocument, limit: Option<usize>) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut doomed = Vec::new();
        for (index, document) in documents.iter().enumerate() {
            if limit.map_or(false, |max| doomed.len() >= max) {
                break;
            }
            if matches_filter(document, filter)? {
                doomed.push(index);
            }
        }
        for index in doomed.iter().rev() {
            documents.remove(*index);
        }
        Ok(doomed.len() as u64)
    }

    fn update(
        &self,
        collection: &str,
        filter: &BsonDocument,
        update: &BsonDocument,
        limit: Option<usize>,
    ) -> Result<UpdateOutcome> {
        validate_update(update)?;

        let mut collections = self.collections.write();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(UpdateOutcome::default());
        };

        let mut outcome = UpdateOutcome::default();
        for document in documents.iter_mut() {
            if limit.map_or(false, |max| outcome.matched_count as usize >= max) {
                break;
            }
            if !matches_filter(document, filter)? {
                continue;
            }
            outcome.matched_count += 1;

            let mut updated = document.clone();
            apply_update(&mut updated, update)?;
            if updated != *document {
                *document = updated;
                outcome.modified_count += 1;
            }
        }
        Ok(outcome)
    }
}

struct MemoryCursor {
    documents: VecDeque<BsonDocument>,
    stats: Arc<CursorStats>,
    fail_close: bool,
    closed: bool,
}

#[async_trait]
impl DocumentCursor for MemoryCursor {
    async fn next_document(&mut self) -> Result<Option<BsonDocument>> {
        if self.closed {
            return Err(DocStoreError::Operation("cursor is closed".to_string()));
        }
        Ok(self.documents.pop_front())
    }

    async fn close(&mut self) -> Result<()> {
        self.stats.closed.fetch_add(1, AtomicOrdering::SeqCst);
        if self.closed {
            return Err(DocStoreError::ResourceRelease("cursor already closed".to_string()));
        }
        self.closed = true;
        self.documents.clear();
        if self.fail_close {
            return Err(DocStoreError::ResourceRelease("killCursors failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn backend(&self) -> &str {
        "memory"
    }

    fn host(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        self.check_failure()
    }

    async fn insert_one(&self, collection: &str, document: BsonDocument) -> Result<Bson> {
        self.check_failure()?;
        let mut collections = self.collections.write();
        let documents = collections.entry(collection.to_string()).or_default();
        insert_into(documents, collection, document)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        self.check_failure()?;
        if documents.is_empty() {
            return Err(DocStoreError::Operation(
                "documents to insert must not be empty".to_string(),
            ));
        }

        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();
        let mut ids = Vec::with_capacity(documents.len());
        for (index, document) in documents.into_iter().enumerate() {
            // Ordered insert: stop at the first failure, keep what was written.
            let id = insert_into(stored, collection, document).map_err(|e| {
                DocStoreError::Operation(format!("insert aborted at index {}: {}", index, e))
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn find(&self, collection: &str, filter: BsonDocument) -> Result<Box<dyn DocumentCursor>> {
        self.check_failure()?;
        let documents = self.matching(collection, &filter)?;
        self.cursors.opened.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(MemoryCursor {
            documents: documents.into(),
            stats: Arc::clone(&self.cursors),
            fail_close: self.fail_close.load(AtomicOrdering::SeqCst),
            closed: false,
        }))
    }

    async fn find_one(&self, collection: &str, filter: BsonDocument) -> Result<Option<BsonDocument>> {
        self.check_failure()?;
        Ok(self.matching(collection, &filter)?.into_iter().next())
    }

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        self.check_failure()?;
        self.delete(collection, &filter, Some(1))
    }

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        self.check_failure()?;
        self.delete(collection, &filter, None)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> Result<UpdateOutcome> {
        self.check_failure()?;
        self.update(collection, &filter, &update, Some(1))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> Result<UpdateOutcome> {
        self.check_failure()?;
        self.update(collection, &filter, &update, None)
    }

    async fn count_documents(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        self.check_failure()?;
        Ok(self.matching(collection, &filter)?.len() as u64)
    }

    async fn create_collection(&self, collection: &str) -> Result<()> {
        self.check_failure()?;
        let mut collections = self.collections.write();
        if collections.contains_key(collection) {
            return Err(DocStoreError::Operation(format!(
                "Collection already exists. NS: {}",
                collection
            )));
        }
        collections.insert(collection.to_string(), Vec::new());
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.check_failure()?;
        self.collections.write().remove(collection);
        Ok(())
    }
}

fn insert_into(documents: &mut Vec<BsonDocument>, collection: &str, document: BsonDocument) -> Result<Bson> {
    let document = if document.contains_key("_id") {
        document
    } else {
        let mut with_id = BsonDocument::new();
        with_id.insert("_id", ObjectId::new());
        with_id.extend(document);
        with_id
    };

    let id = document.get("_id").cloned().unwrap_or(Bson::Null);
    if documents
        .iter()
        .any(|existing| existing.get("_id").map_or(false, |other| values_equal(other, &id)))
    {
        return Err(DocStoreError::Operation(format!(
            "E11000 duplicate key error collection: {} index: _id_ dup key: {{ _id: {} }}",
            collection, id
        )));
    }

    documents.push(document);
    Ok(id)
}

fn get_path<'a>(document: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(document: &mut BsonDocument, path: &str, value: Bson) -> Result<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, BsonDocument::new());
            }
            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(DocStoreError::Operation(format!(
                    "Cannot create field '{}' in element {{{}: ...}}",
                    rest, head
                ))),
            }
        }
    }
}

fn remove_path(document: &mut BsonDocument, path: &str) {
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

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match compare(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

/// Equality with array membership: `{tags: "a"}` matches `tags: ["a", "b"]`
fn field_equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(actual) => values_equal(actual, expected),
        None => matches!(expected, Bson::Null),
    }
}

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(inner) => inner.keys().next().map_or(false, |k| k.starts_with('$')),
        _ => false,
    }
}

fn matches_operator(value: Option<&Bson>, operator: &str, argument: &Bson) -> Result<bool> {
    let ordered = |wanted: &[Ordering]| -> bool {
        value
            .and_then(|actual| compare(actual, argument))
            .map_or(false, |ordering| wanted.contains(&ordering))
    };

    Ok(match operator {
        "$eq" => field_equals(value, argument),
        "$ne" => !field_equals(value, argument),
        "$gt" => ordered(&[Ordering::Greater]),
        "$gte" => ordered(&[Ordering::Greater, Ordering::Equal]),
        "$lt" => ordered(&[Ordering::Less]),
        "$lte" => ordered(&[Ordering::Less, Ordering::Equal]),
        "$in" | "$nin" => {
            let Bson::Array(candidates) = argument else {
                return Err(DocStoreError::Operation(format!("{} needs an array", operator)));
            };
            let found = candidates.iter().any(|candidate| field_equals(value, candidate));
            if operator == "$in" {
                found
            } else {
                !found
            }
        }
        "$exists" => {
            let wanted = match argument {
                Bson::Boolean(flag) => *flag,
                other => as_f64(other).map_or(true, |n| n != 0.0),
            };
            value.is_some() == wanted
        }
        other => {
            return Err(DocStoreError::Operation(format!(
                "unknown operator: {}",
                other
            )))
        }
    })
}

fn matches_clauses(document: &BsonDocument, operator: &str, clauses: &Bson) -> Result<Vec<bool>> {
    let Bson::Array(items) = clauses else {
        return Err(DocStoreError::Operation(format!("{} must be an array", operator)));
    };
    if items.is_empty() {
        return Err(DocStoreError::Operation(format!(
            "{} argument must be a non-empty array",
            operator
        )));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => matches_filter(document, clause),
            _ => Err(DocStoreError::Operation(format!(
                "{} entries must be documents",
                operator
            ))),
        })
        .collect()
}

fn matches_filter(document: &BsonDocument, filter: &BsonDocument) -> Result<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => matches_clauses(document, key, condition)?.into_iter().all(|m| m),
            "$or" => matches_clauses(document, key, condition)?.into_iter().any(|m| m),
            other if other.starts_with('$') => {
                return Err(DocStoreError::Operation(format!(
                    "unknown top level operator: {}",
                    other
                )))
            }
            path => {
                let value = get_path(document, path);
                match condition {
                    Bson::Document(operators) if is_operator_document(condition) => {
                        let mut all = true;
                        for (operator, argument) in operators {
                            if !matches_operator(value, operator, argument)? {
                                all = false;
                                break;
                            }
                        }
                        all
                    }
                    expected => field_equals(value, expected),
                }
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn validate_update(update: &BsonDocument) -> Result<()> {
    if update.is_empty() {
        return Err(DocStoreError::Operation("update document must not be empty".to_string()));
    }
    for (operator, fields) in update {
        if !operator.starts_with('$') {
            return Err(DocStoreError::Operation(
                "update document requires atomic operators".to_string(),
            ));
        }
        let Bson::Document(fields) = fields else {
            return Err(DocStoreError::Operation(format!(
                "Modifiers operate on fields but we found type {:?} instead",
                fields.element_type()
            )));
        };
        if fields.keys().any(|field| field == "_id" || field.starts_with("_id.")) {
            return Err(DocStoreError::Operation(
                "Performing an update on the path '_id' would modify the immutable field '_id'"
                    .to_string(),
            ));
        }
    }
    Ok(())
}

/// `$inc` arithmetic: Int32 overflow widens to Int64, Int64 overflow is an error
fn increment(current: Option<&Bson>, delta: &Bson, path: &str) -> Result<Bson> {
    let overflow = || {
        DocStoreError::Operation(format!(
            "Failed to apply $inc to '{}': integer overflow",
            path
        ))
    };
    let widened = |a: i64, b: i64| a.checked_add(b).map(Bson::Int64).ok_or_else(overflow);

    match (current, delta) {
        (None, delta) if as_f64(delta).is_some() => Ok(delta.clone()),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Ok(Bson::Int32(sum)),
            None => widened(i64::from(*a), i64::from(*b)),
        },
        (Some(Bson::Int64(a)), Bson::Int64(b)) => widened(*a, *b),
        (Some(Bson::Int32(a)), Bson::Int64(b)) => widened(i64::from(*a), *b),
        (Some(Bson::Int64(a)), Bson::Int32(b)) => widened(*a, i64::from(*b)),
        (Some(current), delta) => match (as_f64(current), as_f64(delta)) {
            (Some(a), Some(b)) => Ok(Bson::Double(a + b)),
            _ => Err(DocStoreError::Operation(format!(
                "Cannot apply $inc to a value of non-numeric type at '{}'",
                path
            ))),
        },
        (None, _) => Err(DocStoreError::Operation(
            "Cannot increment with non-numeric argument".to_string(),
        )),
    }
}

fn apply_update(document: &mut BsonDocument, update: &BsonDocument) -> Result<()> {
    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            continue;
        };
        for (path, argument) in fields {
            match operator.as_str() {
                "$set" => set_path(document, path, argument.clone())?,
                "$unset" => remove_path(document, path),
                "$inc" => {
                    let incremented = increment(get_path(document, path), argument, path)?;
                    set_path(document, path, incremented)?;
                }
                other => {
                    return Err(DocStoreError::Operation(format!(
                        "Unknown modifier: {}",
                        other
                    )))
                }
            }
        }
    }
    Ok(())
}
