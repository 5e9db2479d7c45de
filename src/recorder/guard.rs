use std::ops::{Deref, DerefMut};

use super::context::{FrameToken, TransactionContext};
use super::store::{ExitOptions, Store};

/// Guard for an open frame. The frame is closed when the guard drops,
/// including during unwinding.
///
/// Dereferences to the [`TransactionContext`], so nested frames are opened
/// through the outer guard:
///
/// ```
/// use txn_metrics_agent::{Store, TransactionContext};
///
/// let store = Store::default();
/// let mut txn = TransactionContext::new();
/// {
///     let mut request = store.frame(&mut txn, "Controller/users/index");
///     request.set_uri("/users");
///     {
///         let _query = store.frame(&mut request, "ActiveRecord/User/find");
///     }
/// }
/// assert_eq!(store.metrics_snapshot().len(), 3);
/// ```
#[must_use = "dropping the guard immediately closes the frame"]
pub struct FrameGuard<'a> {
    store: &'a Store,
    txn: &'a mut TransactionContext,
    token: Option<FrameToken>,
    options: ExitOptions,
}

impl<'a> FrameGuard<'a> {
    pub(crate) fn new(store: &'a Store, txn: &'a mut TransactionContext, token: FrameToken) -> Self {
        Self {
            store,
            txn,
            token: Some(token),
            options: ExitOptions::default(),
        }
    }

    /// Request URI recorded if this frame turns out to be the slow sample.
    pub fn set_uri(&mut self, uri: impl Into<String>) -> &mut Self {
        self.options.uri = Some(uri.into());
        self
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.options.description = Some(description.into());
        self
    }
}

impl Deref for FrameGuard<'_> {
    type Target = TransactionContext;

    fn deref(&self) -> &Self::Target {
        self.txn
    }
}

impl DerefMut for FrameGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.txn
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let options = std::mem::take(&mut self.options);
            self.store.exit(self.txn, token, options);
        }
    }
}
