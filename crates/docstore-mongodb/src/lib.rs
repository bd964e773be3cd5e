//! MongoDB document-store client for docstore
//!
//! This crate provides a collection-scoped CRUD facade over the official
//! `mongodb` driver, with injected logging and metrics collaborators.
//!
//! # Features
//! - One method per CRUD primitive, addressed by collection name
//! - Generic, type-checked destinations for `find` / `find_one`
//! - Deterministic cursor release on every exit path
//! - Deadline and cancellation via [`Context`]
//! - Swappable [`Driver`] seam with an in-memory implementation for tests

pub mod client;
pub mod connection;
pub mod driver;
pub mod health;
pub mod memory;
pub mod query_log;

pub use client::{Client, STATS_HISTOGRAM};
pub use connection::{ConnectionSettings, MongoDriver};
pub use docstore_common::{
    Config, Context, DocStoreError, EnvConfig, InMemoryMetrics, Logger, MapConfig, Metrics,
    NoopMetrics, Result, TracingLogger,
};
pub use driver::{DocumentCursor, Driver, UpdateOutcome};
pub use health::{Health, HealthStatus};
pub use memory::MemoryDriver;
pub use query_log::{Operation, QueryLog};
