//! Metrics collaborator and in-memory registry.
//!
//! The [`Metrics`] trait is the seam clients record through. [`InMemoryMetrics`]
//! keeps counters and histograms in process and can export them.
//!
//! # Example
//!
//! ```rust,ignore
//! use docstore_common::{InMemoryMetrics, Metrics};
//!
//! let metrics = InMemoryMetrics::new();
//! metrics.new_histogram("app_mongo_stats", "Response time of MONGO queries in milliseconds.", &[0.5, 1.0, 5.0]);
//! metrics.record_histogram("app_mongo_stats", 0.8, &[("type", "find")]);
//!
//! println!("{}", metrics.to_prometheus());
//! ```

use crate::{DocStoreError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Buckets used when a histogram is recorded without being registered first.
pub const DEFAULT_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0];

/// Counter and histogram sink. Implementations must never fail the caller.
pub trait Metrics: Send + Sync {
    /// Declare a histogram and its bucket upper bounds
    fn new_histogram(&self, name: &str, description: &str, buckets: &[f64]);

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn new_histogram(&self, _name: &str, _description: &str, _buckets: &[f64]) {}

    fn record_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}

    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}
}

type LabelSet = Vec<(String, String)>;

fn label_set(labels: &[(&str, &str)]) -> LabelSet {
    let mut set: LabelSet = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    set.sort();
    set
}

fn render_labels(labels: &LabelSet, extra: Option<(&str, String)>) -> String {
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    if let Some((k, v)) = extra {
        parts.push(format!("{}=\"{}\"", k, v));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", parts.join(","))
    }
}

/// Observations of one histogram for one label set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistogramSeries {
    /// Per-bucket (non-cumulative) observation counts, aligned with the histogram's buckets.
    pub bucket_counts: Vec<u64>,
    pub count: u64,
    pub sum: f64,
}

#[derive(Debug, Clone)]
struct Histogram {
    description: String,
    buckets: Vec<f64>,
    series: BTreeMap<LabelSet, HistogramSeries>,
}

impl Histogram {
    fn new(description: &str, buckets: &[f64]) -> Self {
        let mut buckets = buckets.to_vec();
        buckets.retain(|b| b.is_finite());
        buckets.sort_by(|a, b| a.total_cmp(b));
        buckets.dedup();
        Self {
            description: description.to_string(),
            buckets,
            series: BTreeMap::new(),
        }
    }

    fn observe(&mut self, labels: LabelSet, value: f64) {
        let width = self.buckets.len();
        let series = self.series.entry(labels).or_insert_with(|| HistogramSeries {
            bucket_counts: vec![0; width],
            count: 0,
            sum: 0.0,
        });
        if let Some(idx) = self.buckets.iter().position(|bound| value <= *bound) {
            series.bucket_counts[idx] += 1;
        }
        series.count += 1;
        series.sum += value;
    }
}

#[derive(Debug, Default)]
struct Registry {
    histograms: BTreeMap<String, Histogram>,
    counters: BTreeMap<String, BTreeMap<LabelSet, u64>>,
}

/// Point-in-time copy of every metric, keyed by metric name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, u64>,
}

/// Process-local metrics registry
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    registry: Mutex<Registry>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter for an exact label set (0 if never incremented).
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let registry = self.registry.lock();
        registry
            .counters
            .get(name)
            .and_then(|series| series.get(&label_set(labels)))
            .copied()
            .unwrap_or(0)
    }

    /// Observation count of a histogram for an exact label set.
    pub fn histogram_count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.histogram_series(name, labels)
            .map(|series| series.count)
            .unwrap_or(0)
    }

    pub fn histogram_series(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramSeries> {
        let registry = self.registry.lock();
        registry
            .histograms
            .get(name)
            .and_then(|h| h.series.get(&label_set(labels)))
            .cloned()
    }

    /// Whether a histogram has been declared or recorded
    pub fn has_histogram(&self, name: &str) -> bool {
        self.registry.lock().histograms.contains_key(name)
    }

    /// Totals per metric name, summed across label sets.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let registry = self.registry.lock();
        MetricsSnapshot {
            counters: registry
                .counters
                .iter()
                .map(|(name, series)| (name.clone(), series.values().sum()))
                .collect(),
            histograms: registry
                .histograms
                .iter()
                .map(|(name, h)| (name.clone(), h.series.values().map(|s| s.count).sum()))
                .collect(),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let registry = self.registry.lock();
        let mut output = String::new();

        for (name, series) in &registry.counters {
            output.push_str(&format!("# TYPE {} counter\n", name));
            for (labels, value) in series {
                output.push_str(&format!("{}{} {}\n", name, render_labels(labels, None), value));
            }
        }

        for (name, histogram) in &registry.histograms {
            output.push_str(&format!("# HELP {} {}\n", name, histogram.description));
            output.push_str(&format!("# TYPE {} histogram\n", name));
            for (labels, series) in &histogram.series {
                let mut cumulative = 0;
                for (bound, count) in histogram.buckets.iter().zip(&series.bucket_counts) {
                    cumulative += count;
                    output.push_str(&format!(
                        "{}_bucket{} {}\n",
                        name,
                        render_labels(labels, Some(("le", bound.to_string()))),
                        cumulative
                    ));
                }
                output.push_str(&format!(
                    "{}_bucket{} {}\n",
                    name,
                    render_labels(labels, Some(("le", "+Inf".to_string()))),
                    series.count
                ));
                output.push_str(&format!("{}_sum{} {}\n", name, render_labels(labels, None), series.sum));
                output.push_str(&format!("{}_count{} {}\n", name, render_labels(labels, None), series.count));
            }
        }

        output
    }

    /// Export the snapshot as a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| DocStoreError::Serialization(format!("JSON serialization failed: {}", e)))
    }
}

impl Metrics for InMemoryMetrics {
    fn new_histogram(&self, name: &str, description: &str, buckets: &[f64]) {
        let mut registry = self.registry.lock();
        registry
            .histograms
            .entry(name.to_string())
            .or_insert_with(|| Histogram::new(description, buckets));
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let mut registry = self.registry.lock();
        registry
            .histograms
            .entry(name.to_string())
            .or_insert_with(|| Histogram::new("", DEFAULT_BUCKETS))
            .observe(label_set(labels), value);
    }

    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let mut registry = self.registry.lock();
        *registry
            .counters
            .entry(name.to_string())
            .or_default()
            .entry(label_set(labels))
            .or_insert(0) += 1;
    }
}
