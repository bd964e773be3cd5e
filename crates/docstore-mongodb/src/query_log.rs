//! Per-operation query records

use bson::{Bson, Document as BsonDocument};
use serde::{Serialize, Serializer};
use std::fmt;

/// The facade's operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    InsertOne,
    InsertMany,
    Find,
    FindOne,
    DeleteOne,
    DeleteMany,
    UpdateById,
    UpdateOne,
    UpdateMany,
    CountDocuments,
    Drop,
    CreateCollection,
}

impl Operation {
    /// Name logged before the operation runs, e.g. "InsertOne"
    pub fn name(&self) -> &'static str {
        match self {
            Operation::InsertOne => "InsertOne",
            Operation::InsertMany => "InsertMany",
            Operation::Find => "Find",
            Operation::FindOne => "FindOne",
            Operation::DeleteOne => "DeleteOne",
            Operation::DeleteMany => "DeleteMany",
            Operation::UpdateById => "UpdateByID",
            Operation::UpdateOne => "UpdateOne",
            Operation::UpdateMany => "UpdateMany",
            Operation::CountDocuments => "CountDocuments",
            Operation::Drop => "Drop",
            Operation::CreateCollection => "CreateCollection",
        }
    }

    /// Metrics label, e.g. "insertOne"
    pub fn label(&self) -> &'static str {
        match self {
            Operation::InsertOne => "insertOne",
            Operation::InsertMany => "insertMany",
            Operation::Find => "find",
            Operation::FindOne => "findOne",
            Operation::DeleteOne => "deleteOne",
            Operation::DeleteMany => "deleteMany",
            Operation::UpdateById => "updateByID",
            Operation::UpdateOne => "updateOne",
            Operation::UpdateMany => "updateMany",
            Operation::CountDocuments => "countDocuments",
            Operation::Drop => "drop",
            Operation::CreateCollection => "createCollection",
        }
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What ran, against which collection, and how long it took
#[derive(Debug, Clone, Serialize)]
pub struct QueryLog {
    pub query: Operation,
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    /// Microseconds
    pub duration: u64,
}

impl QueryLog {
    pub fn new(query: Operation, collection: &str) -> Self {
        Self {
            query,
            collection: collection.to_string(),
            filter: None,
            id: None,
            update: None,
            duration: 0,
        }
    }

    pub fn with_filter(mut self, filter: &BsonDocument) -> Self {
        self.filter = Some(filter.to_string());
        self
    }

    pub fn with_id(mut self, id: &Bson) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_update(mut self, update: &BsonDocument) -> Self {
        self.update = Some(update.to_string());
        self
    }
}

impl fmt::Display for QueryLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MONGO {:>8}µs {} {}",
            self.duration,
            self.query.label(),
            self.collection
        )?;
        if let Some(filter) = &self.filter {
            write!(f, " filter={}", filter)?;
        }
        if let Some(id) = &self.id {
            write!(f, " id={}", id)?;
        }
        if let Some(update) = &self.update {
            write!(f, " update={}", update)?;
        }
        Ok(())
    }
}
