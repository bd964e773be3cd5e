//! Driver seam between the [`Client`](crate::Client) facade and a concrete store.
//!
//! The facade never talks to `mongodb` directly. It goes through [`Driver`], which
//! is implemented by [`MongoDriver`](crate::MongoDriver) for a live server and by
//! [`MemoryDriver`](crate::MemoryDriver) for tests and embedding.
//!
//! Every method takes the collection name; implementations resolve the collection
//! on each call and must not cache handles in a way that changes semantics.

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use docstore_common::Result;

/// Counts reported by an update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// An open result stream returned by [`Driver::find`]
///
/// Callers must call [`close`](DocumentCursor::close) exactly once, whether or not
/// the stream was fully consumed.
#[async_trait]
pub trait DocumentCursor: Send {
    /// Next raw document, or `None` once the stream is exhausted
    async fn next_document(&mut self) -> Result<Option<BsonDocument>>;

    /// Release the server-side cursor
    async fn close(&mut self) -> Result<()>;
}

/// Raw document-store operations, one per facade primitive
#[async_trait]
pub trait Driver: Send + Sync {
    /// Backend name used in logs (e.g. "mongo")
    fn backend(&self) -> &str;

    /// Host the driver talks to, used as a metrics label
    fn host(&self) -> &str;

    async fn ping(&self) -> Result<()>;

    /// Insert one document, returning its `_id`
    async fn insert_one(&self, collection: &str, document: BsonDocument) -> Result<Bson>;

    /// Insert documents in order, returning their `_id`s in input order
    async fn insert_many(&self, collection: &str, documents: Vec<BsonDocument>) -> Result<Vec<Bson>>;

    async fn find(&self, collection: &str, filter: BsonDocument) -> Result<Box<dyn DocumentCursor>>;

    async fn find_one(&self, collection: &str, filter: BsonDocument) -> Result<Option<BsonDocument>>;

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> Result<u64>;

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> Result<u64>;

    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> Result<UpdateOutcome>;

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> Result<UpdateOutcome>;

    async fn count_documents(&self, collection: &str, filter: BsonDocument) -> Result<u64>;

    async fn create_collection(&self, collection: &str) -> Result<()>;

    async fn drop_collection(&self, collection: &str) -> Result<()>;
}
