use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use anyhow::Context;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::AgentConfig,
    error::{AgentError, Result},
    recorder::Store,
    samplers::Sampler,
};
use super::sink::ReportSink;
use super::worker::{BackgroundWorker, WorkerState, WorkerTask};

/// One sampling/report cycle: run the samplers into the store, drain it and
/// hand the result to the sink.
pub struct Reporter {
    store: Arc<Store>,
    samplers: Mutex<Vec<Box<dyn Sampler>>>,
    sink: Arc<dyn ReportSink>,
}

impl Reporter {
    pub fn new(store: Arc<Store>, samplers: Vec<Box<dyn Sampler>>, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            store,
            samplers: Mutex::new(samplers),
            sink,
        }
    }

    /// Run every sampler, tracking each reading unscoped. A failing sampler
    /// is logged and skipped.
    pub fn run_samplers(&self) {
        let mut samplers = self.samplers.lock();
        for sampler in samplers.iter_mut() {
            let metric = sampler.metric_name().to_string();
            match catch_unwind(AssertUnwindSafe(|| sampler.run())) {
                Ok(Ok(Some(value))) => {
                    debug!(%metric, value, "Sampled");
                    self.store.track(&metric, value, None, None);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    info!(%metric, "Error reading sampler");
                    debug!(%metric, error = ?e, "Sampler failure detail");
                }
                Err(_) => {
                    info!(%metric, "Sampler panicked");
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl WorkerTask for Reporter {
    async fn run_cycle(&self) -> anyhow::Result<()> {
        self.run_samplers();
        let report = self.store.drain();
        debug!(
            metrics = report.metrics.len(),
            sample = report.sample.is_some(),
            "Reporting drained metrics"
        );
        self.sink.report(report).await.context("report sink failed")
    }
}

/// The metrics agent: one per process, constructed explicitly and shared by
/// reference with whatever installs instrumentation.
pub struct Agent {
    config: Arc<AgentConfig>,
    store: Arc<Store>,
    reporter: Arc<Reporter>,
    worker: Mutex<Option<BackgroundWorker<Reporter>>>,
    started: AtomicBool,
}

impl Agent {
    pub(crate) fn new(config: Arc<AgentConfig>, store: Arc<Store>, reporter: Arc<Reporter>) -> Self {
        Self {
            config,
            store,
            reporter,
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Create a new agent builder
    pub fn builder() -> super::AgentBuilder {
        super::AgentBuilder::new()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Store that instrumentation records into.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// State of the background worker, `None` before `start`.
    pub fn worker_state(&self) -> Option<WorkerState> {
        self.worker.lock().as_ref().map(|worker| worker.state())
    }

    /// Start the background worker. Requires a tokio runtime.
    pub fn start(&self) -> Result<()> {
        info!(version = crate::VERSION, "Attempting to start metrics agent");

        if !self.config.monitor {
            warn!("Monitoring isn't enabled, not starting agent");
            return Err(AgentError::MonitoringDisabled);
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No tokio runtime available, not starting agent");
            return Err(AgentError::NoRuntime);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Already started agent");
            return Err(AgentError::AlreadyStarted);
        }

        let worker = BackgroundWorker::start(self.reporter.clone(), self.config.worker.period);
        *self.worker.lock() = Some(worker);
        info!(
            period_secs = self.config.worker.period.as_secs_f64(),
            "Metrics agent started"
        );
        Ok(())
    }

    /// Stop the worker, then run one final cycle so nothing recorded since the
    /// last wake is lost. No-op when the agent was never started.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.is_started() {
            return Ok(());
        }
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return Ok(());
        };

        debug!("Shutting down metrics agent");
        worker.stop();
        worker.join().await;
        worker.run_once().await.map_err(AgentError::FinalReport)
    }

    /// Run one cycle immediately, outside the periodic schedule.
    pub async fn run_once(&self) -> anyhow::Result<()> {
        self.reporter.run_cycle().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::agent::ChannelSink;
    use crate::recorder::{ExitOptions, TransactionContext};

    struct FixedSampler(&'static str, f64);

    impl Sampler for FixedSampler {
        fn metric_name(&self) -> &str {
            self.0
        }

        fn run(&mut self) -> anyhow::Result<Option<f64>> {
            Ok(Some(self.1))
        }
    }

    struct FailingSampler;

    impl Sampler for FailingSampler {
        fn metric_name(&self) -> &str {
            "Broken/Sampler"
        }

        fn run(&mut self) -> anyhow::Result<Option<f64>> {
            anyhow::bail!("permission denied")
        }
    }

    struct PanickingSampler;

    impl Sampler for PanickingSampler {
        fn metric_name(&self) -> &str {
            "Panicking/Sampler"
        }

        fn run(&mut self) -> anyhow::Result<Option<f64>> {
            panic!("sampler bug")
        }
    }

    struct EmptySampler;

    impl Sampler for EmptySampler {
        fn metric_name(&self) -> &str {
            "Empty/Sampler"
        }

        fn run(&mut self) -> anyhow::Result<Option<f64>> {
            Ok(None)
        }
    }

    fn reporter_with(
        samplers: Vec<Box<dyn Sampler>>,
    ) -> (Arc<Store>, Reporter, tokio::sync::mpsc::Receiver<crate::metrics::Report>) {
        let store = Arc::new(Store::default());
        let (sink, rx) = ChannelSink::new(8);
        let reporter = Reporter::new(store.clone(), samplers, Arc::new(sink));
        (store, reporter, rx)
    }

    #[tokio::test]
    async fn test_sampler_failures_isolated() {
        let (_store, reporter, mut rx) = reporter_with(vec![
            Box::new(FailingSampler),
            Box::new(PanickingSampler),
            Box::new(EmptySampler),
            Box::new(FixedSampler("Memory/Physical", 256.0)),
        ]);

        reporter.run_cycle().await.unwrap();
        let report = rx.recv().await.unwrap();
        assert_eq!(report.metrics.len(), 1);
        let memory = report.metrics.find("Memory/Physical", None).unwrap();
        assert_eq!(memory.call_count, 1);
        assert_eq!(memory.total_call_time, 256.0);
        assert!(!memory.is_scoped);
    }

    #[tokio::test]
    async fn test_cycle_drains_store() {
        let (store, reporter, mut rx) = reporter_with(Vec::new());
        let mut txn = TransactionContext::new();
        let root = store.enter(&mut txn, "Controller/home/index");
        store.exit(&mut txn, root, ExitOptions::default());

        reporter.run_cycle().await.unwrap();
        let report = rx.recv().await.unwrap();
        assert!(report.metrics.find("Controller/home/index", None).is_some());
        assert!(store.metrics_snapshot().is_empty());

        reporter.run_cycle().await.unwrap();
        assert!(rx.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_fails_cycle() {
        let (_store, reporter, rx) = reporter_with(Vec::new());
        drop(rx);
        assert!(reporter.run_cycle().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown_flushes_tail() {
        let (sink, mut rx) = ChannelSink::new(8);
        let mut config = AgentConfig::default();
        config.worker.period = Duration::from_secs(60);
        let agent = Agent::builder()
            .with_config(config)
            .without_samplers()
            .with_sink(Arc::new(sink))
            .build()
            .unwrap();

        agent.start().unwrap();
        assert!(agent.is_started());
        assert!(matches!(agent.start(), Err(AgentError::AlreadyStarted)));

        agent.store().track("Queue/Depth", 4.0, None, None);
        tokio::time::sleep(Duration::from_secs(61)).await;
        let periodic = rx.recv().await.unwrap();
        assert!(periodic.metrics.find("Queue/Depth", None).is_some());

        agent.store().track("Queue/Depth", 7.0, None, None);
        agent.shutdown().await.unwrap();
        assert_eq!(agent.worker_state(), None);
        let last = rx.recv().await.unwrap();
        assert_eq!(last.metrics.find("Queue/Depth", None).unwrap().total_call_time, 7.0);
    }

    #[tokio::test]
    async fn test_start_refused_when_monitoring_disabled() {
        let config = AgentConfig {
            monitor: false,
            ..Default::default()
        };
        let agent = Agent::builder().with_config(config).build().unwrap();
        assert!(matches!(agent.start(), Err(AgentError::MonitoringDisabled)));
        assert!(!agent.is_started());
        agent.shutdown().await.unwrap();
    }

    #[test]
    fn test_start_requires_runtime() {
        let agent = Agent::builder().build().unwrap();
        assert!(matches!(agent.start(), Err(AgentError::NoRuntime)));
        assert!(!agent.is_started());
    }

    #[tokio::test]
    async fn test_shutdown_reports_final_failure() {
        let (sink, rx) = ChannelSink::new(8);
        let agent = Agent::builder()
            .without_samplers()
            .with_sink(Arc::new(sink))
            .build()
            .unwrap();
        agent.start().unwrap();
        drop(rx);

        assert!(matches!(agent.shutdown().await, Err(AgentError::FinalReport(_))));
    }

    #[tokio::test]
    async fn test_run_once_without_start() {
        let (sink, mut rx) = ChannelSink::new(8);
        let agent = Agent::builder()
            .with_sampler(Box::new(FixedSampler("CPU/Utilization", 12.0)))
            .with_sink(Arc::new(sink))
            .build()
            .unwrap();

        agent.run_once().await.unwrap();
        let report = rx.recv().await.unwrap();
        assert!(report.metrics.find("CPU/Utilization", None).is_some());
        assert!(!agent.is_started());
    }
}
