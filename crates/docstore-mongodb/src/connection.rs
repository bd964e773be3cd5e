//! MongoDB connection settings and the live [`Driver`] implementation

use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument};
use docstore_common::{Config, DocStoreError, Result};
use futures::TryStreamExt;
use mongodb::{
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Collection, Cursor, Database,
};
use std::time::Duration;
use tracing::{info, instrument};

use crate::driver::{DocumentCursor, Driver, UpdateOutcome};

pub const MONGO_URI: &str = "MONGO_URI";
pub const MONGO_DATABASE: &str = "MONGO_DATABASE";
pub const MONGO_APP_NAME: &str = "MONGO_APP_NAME";
pub const MONGO_CONNECT_TIMEOUT_MS: &str = "MONGO_CONNECT_TIMEOUT_MS";
pub const MONGO_SERVER_SELECTION_TIMEOUT_MS: &str = "MONGO_SERVER_SELECTION_TIMEOUT_MS";

const DEFAULT_APP_NAME: &str = "docstore";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to open a database handle
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Connection URI (e.g. "mongodb://localhost:27017")
    pub uri: String,
    /// Logical database; falls back to the URI's default database when `None`
    pub database: Option<String>,
    /// Application name for server logs
    pub app_name: String,
    pub connect_timeout: Duration,
    pub server_selection_timeout: Duration,
}

impl ConnectionSettings {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: None,
            app_name: DEFAULT_APP_NAME.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            server_selection_timeout: DEFAULT_SERVER_SELECTION_TIMEOUT,
        }
    }

    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    /// Read settings from the `MONGO_*` configuration keys
    ///
    /// # Errors
    ///
    /// Returns `Connection` if `MONGO_URI` is unset or a timeout is not a number.
    pub fn from_config(config: &dyn Config) -> Result<Self> {
        let uri = config.get(MONGO_URI).ok_or_else(|| {
            DocStoreError::Connection(format!("{} is not configured", MONGO_URI))
        })?;

        Ok(Self {
            uri,
            database: config.get(MONGO_DATABASE),
            app_name: config.get_or_default(MONGO_APP_NAME, DEFAULT_APP_NAME),
            connect_timeout: millis(config, MONGO_CONNECT_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT)?,
            server_selection_timeout: millis(
                config,
                MONGO_SERVER_SELECTION_TIMEOUT_MS,
                DEFAULT_SERVER_SELECTION_TIMEOUT,
            )?,
        })
    }
}

fn millis(config: &dyn Config, key: &str, default: Duration) -> Result<Duration> {
    match config.get(key) {
        Some(raw) => raw.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| {
            DocStoreError::Connection(format!("{} must be a number of milliseconds, got '{}'", key, raw))
        }),
        None => Ok(default),
    }
}

/// Live MongoDB driver bound to one logical database
#[derive(Clone)]
pub struct MongoDriver {
    client: Client,
    database: Database,
    host: String,
}

impl std::fmt::Debug for MongoDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoDriver")
            .field("host", &self.host)
            .field("database", &self.database.name())
            .finish()
    }
}

impl MongoDriver {
    /// Connect and verify the connection with a `ping`.
    ///
    /// Either returns a driver that has answered a ping or an error; nothing
    /// half-initialized escapes.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the URI is invalid, no database name can be
    /// resolved, or the server cannot be reached.
    #[instrument(skip(settings), fields(app_name = %settings.app_name))]
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self> {
        let mut client_options = ClientOptions::parse(settings.uri.as_str())
            .await
            .map_err(|e| DocStoreError::Connection(format!("Invalid connection URI: {}", e)))?;

        client_options.app_name = Some(settings.app_name.clone());
        client_options.connect_timeout = Some(settings.connect_timeout);
        client_options.server_selection_timeout = Some(settings.server_selection_timeout);

        // Set stable API version for compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let host = client_options
            .hosts
            .first()
            .map(|address| address.to_string())
            .unwrap_or_default();

        let database_name = settings
            .database
            .clone()
            .or_else(|| client_options.default_database.clone())
            .ok_or_else(|| {
                DocStoreError::Connection(
                    "No database configured and none specified in connection string".to_string(),
                )
            })?;

        let client = Client::with_options(client_options)
            .map_err(|e| DocStoreError::Connection(e.to_string()))?;
        let database = client.database(&database_name);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| DocStoreError::Connection(format!("Ping failed: {}", e)))?;

        info!(host = %host, database = %database_name, "Connected to MongoDB");

        Ok(Self {
            client,
            database,
            host,
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection(name)
    }
}

/// Server-side cursor over raw documents. Dropping it kills the cursor too,
/// so `close` releases it by dropping the handle eagerly.
struct MongoCursor {
    cursor: Option<Cursor<BsonDocument>>,
}

#[async_trait]
impl DocumentCursor for MongoCursor {
    async fn next_document(&mut self) -> Result<Option<BsonDocument>> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| DocStoreError::Operation("cursor is closed".to_string()))?;

        Ok(cursor.try_next().await?)
    }

    async fn close(&mut self) -> Result<()> {
        match self.cursor.take() {
            Some(cursor) => {
                drop(cursor);
                Ok(())
            }
            None => Err(DocStoreError::ResourceRelease("cursor already closed".to_string())),
        }
    }
}

#[async_trait]
impl Driver for MongoDriver {
    fn backend(&self) -> &str {
        "mongo"
    }

    fn host(&self) -> &str {
        &self.host
    }

    async fn ping(&self) -> Result<()> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn insert_one(&self, collection: &str, document: BsonDocument) -> Result<Bson> {
        let result = self.collection(collection).insert_one(document).await?;
        Ok(result.inserted_id)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        let result = self.collection(collection).insert_many(documents).await?;

        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn find(&self, collection: &str, filter: BsonDocument) -> Result<Box<dyn DocumentCursor>> {
        let cursor = self.collection(collection).find(filter).await?;
        Ok(Box::new(MongoCursor {
            cursor: Some(cursor),
        }))
    }

    async fn find_one(&self, collection: &str, filter: BsonDocument) -> Result<Option<BsonDocument>> {
        Ok(self.collection(collection).find_one(filter).await?)
    }

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let result = self.collection(collection).delete_one(filter).await?;
        Ok(result.deleted_count)
    }

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let result = self.collection(collection).delete_many(filter).await?;
        Ok(result.deleted_count)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> Result<UpdateOutcome> {
        let result = self.collection(collection).update_one(filter, update).await?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> Result<UpdateOutcome> {
        let result = self.collection(collection).update_many(filter, update).await?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn count_documents(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        Ok(self.collection(collection).count_documents(filter).await?)
    }

    async fn create_collection(&self, collection: &str) -> Result<()> {
        self.database.create_collection(collection).await?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.collection(collection).drop().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_common::MapConfig;

    #[test]
    fn test_settings_defaults() {
        let settings = ConnectionSettings::new("mongodb://localhost:27017");
        assert_eq!(settings.database, None);
        assert_eq!(settings.app_name, "docstore");
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.server_selection_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_settings_from_config() {
        let config = MapConfig::new()
            .with(MONGO_URI, "mongodb://db.internal:27017")
            .with(MONGO_DATABASE, "orders")
            .with(MONGO_APP_NAME, "billing")
            .with(MONGO_CONNECT_TIMEOUT_MS, "1500")
            .with(MONGO_SERVER_SELECTION_TIMEOUT_MS, "250");

        let settings = ConnectionSettings::from_config(&config).unwrap();
        assert_eq!(
            settings,
            ConnectionSettings {
                uri: "mongodb://db.internal:27017".to_string(),
                database: Some("orders".to_string()),
                app_name: "billing".to_string(),
                connect_timeout: Duration::from_millis(1500),
                server_selection_timeout: Duration::from_millis(250),
            }
        );
    }

    #[test]
    fn test_settings_require_uri() {
        let config = MapConfig::new().with(MONGO_DATABASE, "orders");
        let err = ConnectionSettings::from_config(&config).unwrap_err();
        assert!(matches!(err, DocStoreError::Connection(ref msg) if msg.contains("MONGO_URI")));
    }

    #[test]
    fn test_settings_reject_bad_timeout() {
        let config = MapConfig::new()
            .with(MONGO_URI, "mongodb://localhost:27017")
            .with(MONGO_CONNECT_TIMEOUT_MS, "soon");
        let err = ConnectionSettings::from_config(&config).unwrap_err();
        assert!(matches!(err, DocStoreError::Connection(ref msg) if msg.contains("soon")));
    }

    #[test]
    fn test_settings_builder() {
        let settings = ConnectionSettings::new("mongodb://localhost").database("inventory");
        assert_eq!(settings.database.as_deref(), Some("inventory"));
    }

    #[tokio::test]
    async fn test_connect_invalid_uri() {
        let settings = ConnectionSettings::new("postgres://localhost/db").database("db");
        let err = MongoDriver::connect(&settings).await.unwrap_err();
        assert!(matches!(err, DocStoreError::Connection(_)));
    }

    #[tokio::test]
    async fn test_connect_without_database_name() {
        let settings = ConnectionSettings::new("mongodb://127.0.0.1:1");
        let err = MongoDriver::connect(&settings).await.unwrap_err();
        assert!(matches!(err, DocStoreError::Connection(ref msg) if msg.contains("No database")));
    }
}
