//! Health reporting for a store client

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

/// Result of a health probe. Never an error: failures are reported as `Down`.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: HealthStatus,
    /// Time taken by the probe in milliseconds
    pub check_latency_ms: u64,
    pub details: BTreeMap<String, String>,
}

impl Health {
    pub fn is_up(&self) -> bool {
        self.status == HealthStatus::Up
    }

    pub fn error(&self) -> Option<&str> {
        self.details.get("error").map(String::as_str)
    }
}
