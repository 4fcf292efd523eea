//! Metric and event sinks
//!
//! The worker reports through an injected [`Monitor`] rather than a
//! global metrics registry so that the loop can be exercised in tests
//! with a recording sink. The standard implementation forwards to
//! `tracing`, from where a collector can scrape structured fields.

use std::sync::Arc;

use tracing::info;

use gantry_core::domain::WorkerEvent;

/// Sink for counters, measurements, and lifecycle events
pub trait Monitor: Send + Sync {
    /// Increment a counter by `n`
    fn count_n(&self, name: &str, n: u64);

    /// Increment a counter by one
    fn count(&self, name: &str) {
        self.count_n(name, 1);
    }

    /// Record a point-in-time measurement
    fn measure(&self, name: &str, value: f64);

    /// Emit a lifecycle event
    fn event(&self, event: WorkerEvent);

    /// Create a child monitor whose metric names are prefixed with `name`
    fn child(&self, name: &str) -> Arc<dyn Monitor>;
}

/// Monitor that emits through `tracing`
///
/// Counters and measurements become structured log records under the
/// `gantry_worker::metrics` target; events are serialized with their
/// `eventType` tag.
pub struct TracingMonitor {
    prefix: String,
}

impl TracingMonitor {
    /// Creates a root monitor with no name prefix
    pub fn root() -> Self {
        Self {
            prefix: String::new(),
        }
    }

    fn full_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }
}

impl Monitor for TracingMonitor {
    fn count_n(&self, name: &str, n: u64) {
        info!(
            target: "gantry_worker::metrics",
            metric = %self.full_name(name),
            count = n,
            "count"
        );
    }

    fn measure(&self, name: &str, value: f64) {
        info!(
            target: "gantry_worker::metrics",
            metric = %self.full_name(name),
            value,
            "measure"
        );
    }

    fn event(&self, event: WorkerEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!(target: "gantry_worker::events", event = %json, "event"),
            Err(e) => info!(target: "gantry_worker::events", error = %e, "unserializable event"),
        }
    }

    fn child(&self, name: &str) -> Arc<dyn Monitor> {
        Arc::new(TracingMonitor {
            prefix: self.full_name(name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_prefixes_metric_names() {
        let root = TracingMonitor::root();
        assert_eq!(root.full_name("capacity-idle"), "capacity-idle");

        let child = TracingMonitor {
            prefix: "standard".to_string(),
        };
        assert_eq!(child.full_name("capacity-idle"), "standard.capacity-idle");
    }
}
