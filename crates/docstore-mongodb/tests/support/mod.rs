//! Shared fixtures for integration tests

#![allow(dead_code)]

use docstore_mongodb::{Client, InMemoryMetrics, Logger, MemoryDriver};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Error,
}

/// Logger that keeps every line for later assertions
#[derive(Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl RecordingLogger {
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().clone()
    }

    pub fn at(&self, level: Level) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl Logger for RecordingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        self.lines.lock().push((Level::Debug, args.to_string()));
    }

    fn log(&self, args: fmt::Arguments<'_>) {
        self.lines.lock().push((Level::Info, args.to_string()));
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.lines.lock().push((Level::Error, args.to_string()));
    }
}

pub struct Harness {
    pub client: Client,
    pub driver: Arc<MemoryDriver>,
    pub logger: Arc<RecordingLogger>,
    pub metrics: Arc<InMemoryMetrics>,
}

/// Client over a fresh in-memory store
pub fn harness() -> Harness {
    let driver = Arc::new(MemoryDriver::new());
    let logger = Arc::new(RecordingLogger::default());
    let metrics = Arc::new(InMemoryMetrics::new());
    let client = Client::with_driver(driver.clone(), "testdb", logger.clone(), metrics.clone());
    Harness {
        client,
        driver,
        logger,
        metrics,
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
