//! Collection-scoped CRUD facade
//!
//! [`Client`] forwards each operation to its [`Driver`] and wraps it with the
//! same observability seam: the operation name is logged at debug level before
//! the call, then a [`QueryLog`] line and one `app_mongo_stats` histogram
//! observation are emitted after it, whatever the outcome.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bson::doc;
//! use docstore_common::{Context, EnvConfig, NoopMetrics, TracingLogger};
//! use docstore_mongodb::Client;
//!
//! let client = Client::connect(
//!     &EnvConfig::new(),
//!     Arc::new(TracingLogger::default()),
//!     Arc::new(NoopMetrics),
//! )
//! .await?;
//!
//! let ctx = Context::with_timeout(std::time::Duration::from_secs(5));
//! let id = client.insert_one(&ctx, "users", &doc! { "name": "ada" }).await?;
//!
//! let mut users: Vec<User> = Vec::new();
//! client.find(&ctx, "users", doc! {}, &mut users).await?;
//! ```

use bson::{doc, Bson, Document as BsonDocument};
use docstore_common::{Config, Context, DocStoreError, Logger, Metrics, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::connection::{ConnectionSettings, MongoDriver};
use crate::driver::{DocumentCursor, Driver};
use crate::health::{Health, HealthStatus};
use crate::query_log::{Operation, QueryLog};

/// Histogram of operation latency in milliseconds
pub const STATS_HISTOGRAM: &str = "app_mongo_stats";

const STATS_BUCKETS: &[f64] = &[
    0.05, 0.075, 0.1, 0.125, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 3.0, 4.0, 5.0, 7.5, 10.0,
];

/// Document-store client bound to one logical database
#[derive(Clone)]
pub struct Client {
    driver: Arc<dyn Driver>,
    database: String,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn Metrics>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("backend", &self.driver.backend())
            .field("host", &self.driver.host())
            .field("database", &self.database)
            .finish()
    }
}

impl Client {
    /// Connect to MongoDB using the `MONGO_*` configuration keys.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the configuration is incomplete or the server
    /// does not answer a ping. No client is returned in that case.
    pub async fn connect(
        config: &dyn Config,
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn Metrics>,
    ) -> Result<Self> {
        logger.log(format_args!("using docstore-mongodb as external DB for mongo"));

        let connected = match ConnectionSettings::from_config(config) {
            Ok(settings) => MongoDriver::connect(&settings).await,
            Err(err) => Err(err),
        };

        let driver = match connected {
            Ok(driver) => driver,
            Err(err) => {
                logger.error(format_args!("error connecting to mongoDB, err: {}", err));
                return Err(err);
            }
        };

        let database = driver.database_name().to_string();
        Ok(Self::with_driver(Arc::new(driver), database, logger, metrics))
    }

    /// Build a client over an already-connected driver
    pub fn with_driver(
        driver: Arc<dyn Driver>,
        database: impl Into<String>,
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        metrics.new_histogram(
            STATS_HISTOGRAM,
            "Response time of MONGO queries in milliseconds.",
            STATS_BUCKETS,
        );

        Self {
            driver,
            database: database.into(),
            logger,
            metrics,
        }
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn backend(&self) -> &str {
        self.driver.backend()
    }

    async fn observe<T, F>(&self, mut log: QueryLog, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.logger.debug(format_args!("{}", log.query.name()));

        let start = Instant::now();
        let result = operation.await;
        let elapsed = start.elapsed();

        log.duration = elapsed.as_micros() as u64;
        self.logger.debug(format_args!("{}", log));
        self.metrics.record_histogram(
            STATS_HISTOGRAM,
            elapsed.as_secs_f64() * 1000.0,
            &[
                ("hostname", self.driver.host()),
                ("database", self.database.as_str()),
                ("type", log.query.label()),
            ],
        );

        result
    }

    /// Insert one document and return the `_id` the store assigned (or kept)
    pub async fn insert_one<T>(&self, ctx: &Context, collection: &str, document: &T) -> Result<Bson>
    where
        T: Serialize + Sync + ?Sized,
    {
        let op = Operation::InsertOne;
        self.observe(QueryLog::new(op, collection), async {
            let document = bson::to_document(document)?;
            ctx.run(op.label(), self.driver.insert_one(collection, document)).await
        })
        .await
    }

    /// Insert documents in order and return their `_id`s in the same order.
    ///
    /// If the driver aborts mid-batch, its error is returned as-is and the
    /// documents written before the failure stay written.
    pub async fn insert_many<T>(&self, ctx: &Context, collection: &str, documents: &[T]) -> Result<Vec<Bson>>
    where
        T: Serialize + Sync,
    {
        let op = Operation::InsertMany;
        self.observe(QueryLog::new(op, collection), async {
            let documents = documents
                .iter()
                .map(bson::to_document)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ctx.run(op.label(), self.driver.insert_many(collection, documents)).await
        })
        .await
    }

    /// Replace `results` with every document matching `filter`.
    ///
    /// The cursor is closed exactly once on every path, including decode
    /// failures, timeouts and cancellation. A close failure is logged and never
    /// replaces the outcome of the query. `results` is only written on success.
    pub async fn find<T>(
        &self,
        ctx: &Context,
        collection: &str,
        filter: BsonDocument,
        results: &mut Vec<T>,
    ) -> Result<()>
    where
        T: DeserializeOwned + Send,
    {
        let op = Operation::Find;
        let log = QueryLog::new(op, collection).with_filter(&filter);
        let decoded = self
            .observe(log, async {
                let mut cursor = ctx.run(op.label(), self.driver.find(collection, filter)).await?;
                let decoded = ctx.run(op.label(), drain::<T>(cursor.as_mut())).await;

                if let Err(err) = cursor.close().await {
                    self.logger.error(format_args!("error closing cursor: {}", err));
                }

                decoded
            })
            .await?;

        *results = decoded;
        Ok(())
    }

    /// Decode the first document matching `filter` into `result`.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matches, `Deserialization` when the stored
    /// document does not fit `T`. `result` is untouched on error.
    pub async fn find_one<T>(
        &self,
        ctx: &Context,
        collection: &str,
        filter: BsonDocument,
        result: &mut T,
    ) -> Result<()>
    where
        T: DeserializeOwned + Send,
    {
        let op = Operation::FindOne;
        let log = QueryLog::new(op, collection).with_filter(&filter);
        let decoded: T = self
            .observe(log, async {
                let document = ctx
                    .run(op.label(), self.driver.find_one(collection, filter))
                    .await?
                    .ok_or_else(|| DocStoreError::NotFound {
                        collection: collection.to_string(),
                    })?;
                Ok(bson::from_document(document)?)
            })
            .await?;

        *result = decoded;
        Ok(())
    }

    /// Delete the first document matching `filter`; returns 0 or 1
    pub async fn delete_one(&self, ctx: &Context, collection: &str, filter: BsonDocument) -> Result<u64> {
        let op = Operation::DeleteOne;
        let log = QueryLog::new(op, collection).with_filter(&filter);
        self.observe(log, ctx.run(op.label(), self.driver.delete_one(collection, filter)))
            .await
    }

    pub async fn delete_many(&self, ctx: &Context, collection: &str, filter: BsonDocument) -> Result<u64> {
        let op = Operation::DeleteMany;
        let log = QueryLog::new(op, collection).with_filter(&filter);
        self.observe(log, ctx.run(op.label(), self.driver.delete_many(collection, filter)))
            .await
    }

    /// Apply `update` to the document whose `_id` is `id`; returns the modified count.
    ///
    /// A missing id is not an error: the count is simply 0.
    pub async fn update_by_id(
        &self,
        ctx: &Context,
        collection: &str,
        id: impl Into<Bson> + Send,
        update: BsonDocument,
    ) -> Result<u64> {
        let op = Operation::UpdateById;
        let id = id.into();
        let log = QueryLog::new(op, collection).with_id(&id).with_update(&update);
        self.observe(log, async {
            let outcome = ctx
                .run(op.label(), self.driver.update_one(collection, doc! { "_id": id }, update))
                .await?;
            Ok(outcome.modified_count)
        })
        .await
    }

    pub async fn update_one(
        &self,
        ctx: &Context,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> Result<()> {
        let op = Operation::UpdateOne;
        let log = QueryLog::new(op, collection).with_filter(&filter).with_update(&update);
        self.observe(log, async {
            ctx.run(op.label(), self.driver.update_one(collection, filter, update))
                .await?;
            Ok(())
        })
        .await
    }

    /// Apply `update` to every match; returns the modified count
    pub async fn update_many(
        &self,
        ctx: &Context,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> Result<u64> {
        let op = Operation::UpdateMany;
        let log = QueryLog::new(op, collection).with_filter(&filter).with_update(&update);
        self.observe(log, async {
            let outcome = ctx
                .run(op.label(), self.driver.update_many(collection, filter, update))
                .await?;
            Ok(outcome.modified_count)
        })
        .await
    }

    pub async fn count_documents(&self, ctx: &Context, collection: &str, filter: BsonDocument) -> Result<u64> {
        let op = Operation::CountDocuments;
        let log = QueryLog::new(op, collection).with_filter(&filter);
        self.observe(log, ctx.run(op.label(), self.driver.count_documents(collection, filter)))
            .await
    }

    /// Drop the collection and every document in it
    pub async fn drop(&self, ctx: &Context, collection: &str) -> Result<()> {
        let op = Operation::Drop;
        self.observe(
            QueryLog::new(op, collection),
            ctx.run(op.label(), self.driver.drop_collection(collection)),
        )
        .await
    }

    /// Create an empty collection; fails if it already exists
    pub async fn create_collection(&self, ctx: &Context, collection: &str) -> Result<()> {
        let op = Operation::CreateCollection;
        self.observe(
            QueryLog::new(op, collection),
            ctx.run(op.label(), self.driver.create_collection(collection)),
        )
        .await
    }

    /// Ping the store. Failures are reported as `Down`, never as an error.
    pub async fn health_check(&self, ctx: &Context) -> Health {
        let start = Instant::now();
        let outcome = ctx.run("ping", self.driver.ping()).await;

        let mut details = BTreeMap::new();
        details.insert("backend".to_string(), self.driver.backend().to_string());
        details.insert("host".to_string(), self.driver.host().to_string());
        details.insert("database".to_string(), self.database.clone());

        let status = match outcome {
            Ok(()) => HealthStatus::Up,
            Err(err) => {
                details.insert("error".to_string(), err.to_string());
                HealthStatus::Down
            }
        };

        Health {
            status,
            check_latency_ms: start.elapsed().as_millis() as u64,
            details,
        }
    }
}

/// Decode every remaining document of `cursor`, stopping at the first failure
async fn drain<T>(cursor: &mut dyn DocumentCursor) -> Result<Vec<T>>
where
    T: DeserializeOwned,
{
    let mut decoded = Vec::new();
    while let Some(document) = cursor.next_document().await? {
        decoded.push(bson::from_document(document)?);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use docstore_common::{InMemoryMetrics, NoopMetrics};
    use parking_lot::Mutex;
    use std::fmt;

    #[derive(Default)]
    struct RecordingLogger {
        lines: Mutex<Vec<(&'static str, String)>>,
    }

    impl Logger for RecordingLogger {
        fn debug(&self, args: fmt::Arguments<'_>) {
            self.lines.lock().push(("debug", args.to_string()));
        }

        fn log(&self, args: fmt::Arguments<'_>) {
            self.lines.lock().push(("info", args.to_string()));
        }

        fn error(&self, args: fmt::Arguments<'_>) {
            self.lines.lock().push(("error", args.to_string()));
        }
    }

    #[tokio::test]
    async fn test_with_driver_registers_histogram() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let client = Client::with_driver(
            Arc::new(MemoryDriver::new()),
            "app",
            Arc::new(RecordingLogger::default()),
            metrics.clone(),
        );
        assert!(metrics.has_histogram(STATS_HISTOGRAM));
        assert_eq!(client.database_name(), "app");
        assert_eq!(client.backend(), "memory");
    }

    #[tokio::test]
    async fn test_observe_logs_name_first_then_query_log() {
        let logger = Arc::new(RecordingLogger::default());
        let client = Client::with_driver(
            Arc::new(MemoryDriver::new()),
            "app",
            logger.clone(),
            Arc::new(NoopMetrics),
        );

        client
            .count_documents(&Context::background(), "users", doc! { "age": 3 })
            .await
            .unwrap();

        let lines = logger.lines.lock().clone();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], ("debug", "CountDocuments".to_string()));
        assert_eq!(lines[1].0, "debug");
        assert!(lines[1].1.contains("countDocuments users"));
    }

    #[tokio::test]
    async fn test_drain_stops_at_first_bad_document() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Row {
            n: i32,
        }

        let driver = MemoryDriver::new();
        driver
            .insert_many("rows", vec![doc! { "n": 1 }, doc! { "n": "two" }, doc! { "n": 3 }])
            .await
            .unwrap();

        let mut cursor = driver.find("rows", doc! {}).await.unwrap();
        let err = drain::<Row>(cursor.as_mut()).await.unwrap_err();
        assert!(matches!(err, DocStoreError::Deserialization(_)));
        // the third document was never pulled
        assert!(cursor.next_document().await.unwrap().is_some());
        cursor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_debug_impl() {
        let client = Client::with_driver(
            Arc::new(MemoryDriver::new()),
            "app",
            Arc::new(RecordingLogger::default()),
            Arc::new(NoopMetrics),
        );
        let rendered = format!("{:?}", client);
        assert!(rendered.contains("memory"));
        assert!(rendered.contains("app"));
    }
}
