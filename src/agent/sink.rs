use anyhow::anyhow;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, Level};

use crate::metrics::Report;

/// Destination for drained reports.
///
/// Called only from the background worker or the final shutdown cycle, never
/// from a request path. The sink takes ownership of the report; combining
/// with earlier unsent data and transmitting it are its responsibility.
#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    async fn report(&self, report: Report) -> anyhow::Result<()>;
}

/// Hands reports to a receiver owned by the host application.
///
/// The channel is bounded: when the host stops reading and `capacity` reports
/// are queued, the next report fails instead of piling up.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Report>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Report>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl ReportSink for ChannelSink {
    async fn report(&self, report: Report) -> anyhow::Result<()> {
        self.tx.try_send(report).map_err(|e| match e {
            TrySendError::Full(_) => anyhow!("report channel is full"),
            TrySendError::Closed(_) => anyhow!("report receiver has been dropped"),
        })
    }
}

/// Writes a summary of each report to the log; the full payload as JSON at
/// debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait::async_trait]
impl ReportSink for LogSink {
    async fn report(&self, report: Report) -> anyhow::Result<()> {
        info!(
            metrics = report.metrics.len(),
            slow_transaction = report.sample.as_ref().map(|s| s.metric_name()),
            "Metrics report"
        );
        if tracing::enabled!(Level::DEBUG) {
            let payload = serde_json::to_string(&report)?;
            debug!(%payload, "Metrics report payload");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricTable;

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new(4);
        let mut metrics = MetricTable::new();
        metrics.track("Memory/Physical", 96.0, None, None);

        sink.report(Report::new(metrics, None)).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert!(received.metrics.find("Memory/Physical", None).is_some());
    }

    #[tokio::test]
    async fn test_channel_sink_fails_without_receiver() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        assert!(sink.report(Report::new(MetricTable::new(), None)).await.is_err());
    }

    #[tokio::test]
    async fn test_channel_sink_fails_when_full() {
        let (sink, mut rx) = ChannelSink::new(2);
        sink.report(Report::new(MetricTable::new(), None)).await.unwrap();
        sink.report(Report::new(MetricTable::new(), None)).await.unwrap();

        let err = sink.report(Report::new(MetricTable::new(), None)).await.unwrap_err();
        assert!(err.to_string().contains("full"));

        rx.recv().await.unwrap();
        sink.report(Report::new(MetricTable::new(), None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_log_sink_accepts_reports() {
        LogSink.report(Report::new(MetricTable::new(), None)).await.unwrap();
    }
}
