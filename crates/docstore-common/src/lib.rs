//! Common building blocks for docstore
//!
//! This crate provides the error taxonomy, configuration providers, operation
//! context and the logger/metrics collaborators shared by every store client.

pub mod config;
pub mod context;
pub mod error;
pub mod logger;
pub mod metrics;

pub use config::{Config, EnvConfig, MapConfig};
pub use context::Context;
pub use error::{DocStoreError, Result};
pub use logger::{Logger, TracingLogger};
pub use metrics::{HistogramSeries, InMemoryMetrics, Metrics, MetricsSnapshot, NoopMetrics};
