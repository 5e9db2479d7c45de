use std::backtrace::Backtrace;
use std::time::Instant;
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::config::RecorderConfig;
use crate::metrics::{
    MetricIdentity, MetricTable, Report, TransactionSample, CATEGORY_ALL_SUFFIX, ERRORS_METRIC,
};
use super::context::{FrameToken, TransactionContext};

/// Extra data supplied when a frame closes.
#[derive(Debug, Clone, Default)]
pub struct ExitOptions {
    /// Request URI, kept on the slow sample when this is the root frame
    pub uri: Option<String>,
    /// Description attached to the metric identity
    pub description: Option<String>,
}

impl ExitOptions {
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Process-wide metric storage.
///
/// Transactions record onto their own [`TransactionContext`]; when a request
/// root closes, its data is rolled up here. The background worker drains the
/// table and the slow-sample slot once per cycle.
pub struct Store {
    config: RecorderConfig,
    metrics: Mutex<MetricTable>,
    sample: Mutex<Option<TransactionSample>>,
}

impl Store {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            metrics: Mutex::new(MetricTable::new()),
            sample: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Open a frame named `metric_name` starting now.
    pub fn enter(&self, txn: &mut TransactionContext, metric_name: impl Into<String>) -> FrameToken {
        self.enter_at(txn, metric_name, Instant::now())
    }

    /// Open a frame with an explicit start time.
    pub fn enter_at(
        &self,
        txn: &mut TransactionContext,
        metric_name: impl Into<String>,
        start_time: Instant,
    ) -> FrameToken {
        txn.push(metric_name.into(), start_time)
    }

    /// Close the frame identified by `token`, ending now.
    pub fn exit(&self, txn: &mut TransactionContext, token: FrameToken, options: ExitOptions) {
        self.exit_at(txn, token, options, Instant::now())
    }

    /// Close the frame identified by `token` at `end_time`.
    ///
    /// Never fails: an unbalanced stack flags the transaction as ignored and
    /// its data is dropped when the stack next empties.
    pub fn exit_at(
        &self,
        txn: &mut TransactionContext,
        token: FrameToken,
        options: ExitOptions,
        end_time: Instant,
    ) {
        let Some(frame) = txn.pop() else {
            warn!(
                token = TransactionContext::token_id(&token),
                "Frame closed with an empty stack"
            );
            return;
        };
        let root_complete = !txn.is_active();

        if txn.is_ignored() {
            if root_complete {
                txn.reset();
            }
            return;
        }

        if !TransactionContext::matches(&frame, &token) {
            warn!(
                scope = txn.root_name().unwrap_or(&frame.metric_name),
                popped = %frame.metric_name,
                popped_id = frame.id,
                expected_id = TransactionContext::token_id(&token),
                "Unbalanced stack, ignoring transaction"
            );
            txn.ignore();
            if root_complete {
                txn.reset();
            }
            return;
        }

        let duration = end_time.saturating_duration_since(frame.start_time);
        let exclusive = frame.exclusive_time(duration);
        if let Some(parent) = txn.parent_mut() {
            parent.children_time += duration;
        }

        let scope = txn.root_name().map(str::to_string);
        let backtrace = if !root_complete && duration > self.config.slow_frame_threshold {
            Some(Backtrace::force_capture().to_string())
        } else {
            None
        };

        let call_time = duration.as_secs_f64();
        let identity = MetricIdentity::new(frame.metric_name)
            .with_scope(scope)
            .with_description(options.description)
            .with_backtrace(backtrace);
        let root_name = root_complete.then(|| identity.name.clone());
        txn.metrics_mut()
            .entry(identity, !root_complete)
            .update(call_time, exclusive.as_secs_f64());

        if let Some(root_name) = root_name {
            if self.config.is_entry_point(&root_name) {
                self.complete_transaction(txn, &root_name, call_time, options.uri);
            } else {
                trace!(metric = %root_name, "Discarding transaction without an entry point");
            }
            txn.reset();
        }
    }

    /// Open a frame closed automatically when the guard drops.
    pub fn frame<'a>(
        &'a self,
        txn: &'a mut TransactionContext,
        metric_name: impl Into<String>,
    ) -> super::FrameGuard<'a> {
        let token = self.enter(txn, metric_name);
        super::FrameGuard::new(self, txn, token)
    }

    /// Run `f` inside a frame; the frame closes on every exit path.
    pub fn instrument<R>(
        &self,
        txn: &mut TransactionContext,
        metric_name: impl Into<String>,
        f: impl FnOnce(&mut TransactionContext) -> R,
    ) -> R {
        let mut guard = self.frame(txn, metric_name);
        let result = f(&mut *guard);
        drop(guard);
        result
    }

    /// Drop everything recorded for the transaction in flight.
    pub fn ignore_transaction(&self, txn: &mut TransactionContext) {
        txn.ignore();
    }

    /// Record a value straight into the process-wide table.
    pub fn track(&self, metric_name: &str, value: f64, scope: Option<&str>, exclusive: Option<f64>) {
        self.metrics.lock().track(metric_name, value, scope, exclusive);
    }

    /// Count one failed request.
    pub fn record_error(&self) {
        self.track(ERRORS_METRIC, 1.0, None, None);
    }

    /// Take the process-wide table and the slow sample, leaving both empty.
    ///
    /// Both locks are held together (sample, then metrics), so a report's
    /// sample always belongs to a transaction merged into the same report.
    pub fn drain(&self) -> Report {
        let mut sample = self.sample.lock();
        let mut metrics = self.metrics.lock();
        Report::new(metrics.drain(), sample.take())
    }

    /// Copy of the process-wide table.
    pub fn metrics_snapshot(&self) -> MetricTable {
        self.metrics.lock().clone()
    }

    /// Copy of the current slow sample.
    pub fn sample(&self) -> Option<TransactionSample> {
        self.sample.lock().clone()
    }

    fn complete_transaction(
        &self,
        txn: &mut TransactionContext,
        root_name: &str,
        total_call_time: f64,
        uri: Option<String>,
    ) {
        let mut transaction = txn.metrics_mut().drain();
        let aggregates = aggregate_categories(&transaction, root_name);
        transaction.merge(aggregates);

        // Lock order matches `drain`: sample, then metrics.
        let mut slot = self.sample.lock();
        self.store_sample(&mut slot, uri, root_name, total_call_time, &transaction);
        self.metrics.lock().merge(transaction);
        drop(slot);
        trace!(metric = %root_name, total_call_time, "Transaction recorded");
    }

    fn store_sample(
        &self,
        slot: &mut Option<TransactionSample>,
        uri: Option<String>,
        root_name: &str,
        total_call_time: f64,
        transaction: &MetricTable,
    ) {
        if total_call_time < self.config.slow_transaction_threshold.as_secs_f64() {
            return;
        }
        let slower = slot
            .as_ref()
            .map_or(true, |current| total_call_time > current.total_call_time());
        if slower {
            *slot = Some(TransactionSample::new(
                uri,
                root_name,
                total_call_time,
                transaction.clone(),
            ));
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

/// One `<category>/all` roll-up per category among the scoped entries.
pub(crate) fn aggregate_categories(metrics: &MetricTable, root_name: &str) -> MetricTable {
    let mut aggregates = MetricTable::new();
    for (identity, stats) in metrics {
        if identity.scope.is_none() {
            continue;
        }
        if let Some(category) = identity.category() {
            let name = format!("{category}{CATEGORY_ALL_SUFFIX}");
            aggregates
                .entry(MetricIdentity::scoped(name, root_name), true)
                .combine(stats);
        }
    }
    aggregates
}
