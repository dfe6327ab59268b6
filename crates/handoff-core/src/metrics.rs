//! Fire-and-forget metrics.
//!
//! The coordinator reports through [`MetricsSink`]; recording never fails and
//! never blocks. [`TracingMetrics`] forwards to `tracing` (target
//! `handoff::metrics`), [`MemoryMetrics`] keeps values in process so callers
//! can read them back.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Metric tags as `(key, value)` pairs.
pub type Tags<'a> = &'a [(&'a str, &'a str)];

pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, value: u64, tags: Tags<'_>);

    fn gauge(&self, name: &str, value: f64, tags: Tags<'_>);

    fn histogram(&self, name: &str, value: f64, tags: Tags<'_>);
}

fn format_tags(tags: Tags<'_>) -> String {
    tags.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Emits every metric as a `tracing` debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn increment(&self, name: &str, value: u64, tags: Tags<'_>) {
        debug!(target: "handoff::metrics", metric = name, kind = "counter", value, tags = %format_tags(tags));
    }

    fn gauge(&self, name: &str, value: f64, tags: Tags<'_>) {
        debug!(target: "handoff::metrics", metric = name, kind = "gauge", value, tags = %format_tags(tags));
    }

    fn histogram(&self, name: &str, value: f64, tags: Tags<'_>) {
        debug!(target: "handoff::metrics", metric = name, kind = "histogram", value, tags = %format_tags(tags));
    }
}

/// In-process metric values, keyed by name (tags are folded into the key as
/// `name{k=v,...}` when present).
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, f64>>,
    histograms: Mutex<HashMap<String, Vec<f64>>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, tags: Tags<'_>) -> String {
        if tags.is_empty() {
            name.to_string()
        } else {
            format!("{}{{{}}}", name, format_tags(tags))
        }
    }

    /// Counter value summed across every tag combination.
    pub fn counter(&self, name: &str) -> u64 {
        let prefix = format!("{}{{", name);
        self.counters
            .lock()
            .map(|c| {
                c.iter()
                    .filter(|(k, _)| k.as_str() == name || k.starts_with(&prefix))
                    .map(|(_, v)| *v)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Counter value for one exact tag combination.
    pub fn counter_with(&self, name: &str, tags: Tags<'_>) -> u64 {
        let key = Self::key(name, tags);
        self.counters
            .lock()
            .ok()
            .and_then(|c| c.get(&key).copied())
            .unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.lock().ok().and_then(|g| g.get(name).copied())
    }

    pub fn histogram_count(&self, name: &str) -> usize {
        self.histograms
            .lock()
            .ok()
            .and_then(|h| h.get(name).map(Vec::len))
            .unwrap_or(0)
    }
}

impl MetricsSink for MemoryMetrics {
    fn increment(&self, name: &str, value: u64, tags: Tags<'_>) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(Self::key(name, tags)).or_insert(0) += value;
        }
    }

    fn gauge(&self, name: &str, value: f64, _tags: Tags<'_>) {
        if let Ok(mut gauges) = self.gauges.lock() {
            gauges.insert(name.to_string(), value);
        }
    }

    fn histogram(&self, name: &str, value: f64, _tags: Tags<'_>) {
        if let Ok(mut histograms) = self.histograms.lock() {
            histograms.entry(name.to_string()).or_default().push(value);
        }
    }
}
