use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::metrics::MetricTable;

// Shared by every context so a token never matches another context's frame.
static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by `enter`, presented back to `exit`.
///
/// Not `Clone`: each frame is closed exactly once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "the token must be handed back to `exit` to close the frame"]
pub struct FrameToken {
    id: u64,
}

/// One in-flight unit of work on a transaction's stack.
#[derive(Debug)]
pub(crate) struct CallFrame {
    pub(crate) id: u64,
    pub(crate) metric_name: String,
    pub(crate) start_time: Instant,
    /// Summed durations of directly nested frames closed so far
    pub(crate) children_time: Duration,
}

impl CallFrame {
    /// Time spent in this frame outside its children, never below zero.
    pub(crate) fn exclusive_time(&self, duration: Duration) -> Duration {
        duration.saturating_sub(self.children_time)
    }
}

/// Per-transaction recording state.
///
/// Owned by whatever handles the request (a thread, a task) and passed by
/// `&mut` to every recording call; never shared between transactions.
#[derive(Debug, Default)]
pub struct TransactionContext {
    stack: Vec<CallFrame>,
    ignore: bool,
    metrics: MetricTable,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Whether a transaction is in flight.
    pub fn is_active(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn is_ignored(&self) -> bool {
        self.ignore
    }

    /// Discard everything recorded for the current transaction.
    ///
    /// Frames still pop normally; nothing is aggregated until the next reset.
    pub fn ignore(&mut self) {
        self.ignore = true;
    }

    /// Stats recorded so far for the transaction in flight.
    pub fn metrics(&self) -> &MetricTable {
        &self.metrics
    }

    /// Name of the bottom frame, if any.
    pub fn root_name(&self) -> Option<&str> {
        self.stack.first().map(|frame| frame.metric_name.as_str())
    }

    /// Clear the stack, the ignore flag and the local stats.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.ignore = false;
        self.metrics.clear();
    }

    pub(crate) fn push(&mut self, metric_name: String, start_time: Instant) -> FrameToken {
        let id = NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed);
        self.stack.push(CallFrame {
            id,
            metric_name,
            start_time,
            children_time: Duration::ZERO,
        });
        FrameToken { id }
    }

    pub(crate) fn pop(&mut self) -> Option<CallFrame> {
        self.stack.pop()
    }

    pub(crate) fn parent_mut(&mut self) -> Option<&mut CallFrame> {
        self.stack.last_mut()
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut MetricTable {
        &mut self.metrics
    }

    pub(crate) fn matches(frame: &CallFrame, token: &FrameToken) -> bool {
        frame.id == token.id
    }

    pub(crate) fn token_id(token: &FrameToken) -> u64 {
        token.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_lifo() {
        let mut txn = TransactionContext::new();
        let now = Instant::now();
        let a = txn.push("Controller/a".to_string(), now);
        let b = txn.push("View/a/Rendering".to_string(), now);
        assert_eq!(txn.depth(), 2);
        assert_eq!(txn.root_name(), Some("Controller/a"));

        let top = txn.pop().unwrap();
        assert!(TransactionContext::matches(&top, &b));
        assert!(!TransactionContext::matches(&top, &a));
    }

    #[test]
    fn test_exclusive_time_clamped() {
        let frame = CallFrame {
            id: 1,
            metric_name: "ActiveRecord/x".to_string(),
            start_time: Instant::now(),
            children_time: Duration::from_millis(300),
        };
        assert_eq!(frame.exclusive_time(Duration::from_millis(500)), Duration::from_millis(200));
        assert_eq!(frame.exclusive_time(Duration::from_millis(200)), Duration::ZERO);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut txn = TransactionContext::new();
        let _token = txn.push("Controller/a".to_string(), Instant::now());
        txn.metrics_mut().track("View/x", 0.1, Some("Controller/a"), None);
        txn.ignore();

        txn.reset();
        assert!(!txn.is_active());
        assert!(!txn.is_ignored());
        assert!(txn.metrics().is_empty());
    }

    #[test]
    fn test_tokens_unique_across_resets() {
        let mut txn = TransactionContext::new();
        let first = txn.push("Controller/a".to_string(), Instant::now());
        txn.reset();
        let _second = txn.push("Controller/a".to_string(), Instant::now());
        let frame = txn.pop().unwrap();
        assert!(!TransactionContext::matches(&frame, &first));
    }

    #[test]
    fn test_tokens_unique_across_contexts() {
        let mut a = TransactionContext::new();
        let mut b = TransactionContext::new();
        let token_a = a.push("Controller/a".to_string(), Instant::now());
        let _token_b = b.push("Controller/b".to_string(), Instant::now());

        let frame = b.pop().unwrap();
        assert!(!TransactionContext::matches(&frame, &token_a));
    }
}
