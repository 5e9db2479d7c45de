use std::time::SystemTime;
use serde::Serialize;

use super::types::MetricTable;

/// The slowest qualifying transaction seen since the last drain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionSample {
    uri: Option<String>,
    metric_name: String,
    total_call_time: f64,
    metrics: MetricTable,
}

impl TransactionSample {
    pub fn new(
        uri: Option<String>,
        metric_name: impl Into<String>,
        total_call_time: f64,
        metrics: MetricTable,
    ) -> Self {
        Self {
            uri,
            metric_name: metric_name.into(),
            total_call_time,
            metrics,
        }
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Root metric name, e.g. `Controller/users/index`.
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Root duration in seconds.
    pub fn total_call_time(&self) -> f64 {
        self.total_call_time
    }

    /// Per-frame stats for the transaction, including category roll-ups.
    pub fn metrics(&self) -> &MetricTable {
        &self.metrics
    }
}

/// Payload handed to a [`ReportSink`](crate::agent::ReportSink) each cycle.
///
/// The sink owns it outright; the store keeps no reference.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub timestamp: SystemTime,
    pub metrics: MetricTable,
    pub sample: Option<TransactionSample>,
}

impl Report {
    pub fn new(metrics: MetricTable, sample: Option<TransactionSample>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            metrics,
            sample,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.sample.is_none()
    }
}
