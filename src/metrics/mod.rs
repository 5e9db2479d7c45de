//! Metric identities, aggregate stats and the tables that hold them

mod sample;
mod types;

pub use sample::{Report, TransactionSample};
pub use types::{MetricIdentity, MetricStats, MetricTable};

/// Metric recorded once per failed request.
pub const ERRORS_METRIC: &str = "Errors/Request";

/// Suffix of the synthetic per-category roll-up metric.
pub(crate) const CATEGORY_ALL_SUFFIX: &str = "/all";
