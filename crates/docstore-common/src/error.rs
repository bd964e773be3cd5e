//! Error types for docstore

use thiserror::Error;

/// Result type alias for docstore operations
pub type Result<T> = std::result::Result<T, DocStoreError>;

/// Unified error type for all docstore operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocStoreError {
    /// Client construction failed; the store is unreachable or misconfigured
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single-document lookup matched nothing
    #[error("No document found in collection '{collection}'")]
    NotFound { collection: String },

    /// Driver or network failure during a CRUD call
    #[error("Operation error: {0}")]
    Operation(String),

    /// A cursor could not be released
    #[error("Resource release error: {0}")]
    ResourceRelease(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The operation's deadline elapsed before the driver answered
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The operation's context was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl DocStoreError {
    /// Returns true if this is the "no matching document" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocStoreError::NotFound { .. })
    }

    /// Returns true if the error was raised by the caller's context rather than the store
    pub fn is_context_error(&self) -> bool {
        matches!(self, DocStoreError::Timeout(_) | DocStoreError::Cancelled(_))
    }
}

impl From<serde_json::Error> for DocStoreError {
    fn from(err: serde_json::Error) -> Self {
        DocStoreError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for DocStoreError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match err.kind.as_ref() {
            ErrorKind::BsonSerialization(_) => DocStoreError::Serialization(err.to_string()),
            ErrorKind::BsonDeserialization(_) => DocStoreError::Deserialization(err.to_string()),
            _ => DocStoreError::Operation(err.to_string()),
        }
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for DocStoreError {
    fn from(err: bson::ser::Error) -> Self {
        DocStoreError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for DocStoreError {
    fn from(err: bson::de::Error) -> Self {
        DocStoreError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_connection() {
        let err = DocStoreError::Connection("server selection timeout".to_string());
        assert_eq!(err.to_string(), "Connection error: server selection timeout");
    }

    #[test]
    fn test_error_display_not_found() {
        let err = DocStoreError::NotFound {
            collection: "users".to_string(),
        };
        assert_eq!(err.to_string(), "No document found in collection 'users'");
    }

    #[test]
    fn test_error_display_operation() {
        let err = DocStoreError::Operation("E11000 duplicate key".to_string());
        assert_eq!(err.to_string(), "Operation error: E11000 duplicate key");
    }

    #[test]
    fn test_error_display_resource_release() {
        let err = DocStoreError::ResourceRelease("killCursors failed".to_string());
        assert_eq!(err.to_string(), "Resource release error: killCursors failed");
    }

    #[test]
    fn test_error_display_timeout_and_cancelled() {
        assert_eq!(
            DocStoreError::Timeout("find".to_string()).to_string(),
            "Timeout: find"
        );
        assert_eq!(
            DocStoreError::Cancelled("find".to_string()).to_string(),
            "Cancelled: find"
        );
    }

    #[test]
    fn test_is_not_found() {
        let err = DocStoreError::NotFound {
            collection: "users".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!DocStoreError::Operation("boom".to_string()).is_not_found());
    }

    #[test]
    fn test_is_context_error() {
        assert!(DocStoreError::Timeout("t".to_string()).is_context_error());
        assert!(DocStoreError::Cancelled("c".to_string()).is_context_error());
        assert!(!DocStoreError::Connection("c".to_string()).is_context_error());
        assert!(!DocStoreError::Operation("o".to_string()).is_context_error());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: DocStoreError = json_err.into();
        assert!(matches!(err, DocStoreError::Serialization(_)));
    }

    #[cfg(feature = "mongodb-errors")]
    #[test]
    fn test_from_bson_de_error() {
        let doc = bson::doc! { "age": "not a number" };
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Person {
            age: i32,
        }
        let bson_err = bson::from_document::<Person>(doc).unwrap_err();
        let err: DocStoreError = bson_err.into();
        assert!(matches!(err, DocStoreError::Deserialization(_)));
    }
}
