//! Transaction metrics agent - in-process timing of nested operations
//!
//! This crate records a call stack of timed frames per transaction, rolls the
//! timings up into scoped and unscoped metrics, keeps the slowest request as a
//! sample and hands everything to a report sink on a fixed, drift-corrected
//! schedule.
//!
//! ```
//! use txn_metrics_agent::{ExitOptions, Store, TransactionContext};
//!
//! let store = Store::default();
//! let mut txn = TransactionContext::new();
//!
//! let root = store.enter(&mut txn, "Controller/users/index");
//! let query = store.enter(&mut txn, "ActiveRecord/User/find");
//! store.exit(&mut txn, query, ExitOptions::default());
//! store.exit(&mut txn, root, ExitOptions::default().with_uri("/users"));
//!
//! let report = store.drain();
//! assert!(report.metrics.find("ActiveRecord/all", Some("Controller/users/index")).is_some());
//! ```

// Public modules
pub mod agent;
pub mod config;
pub mod error;
pub mod metrics;
pub mod recorder;
pub mod samplers;

// Internal modules
mod utils;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-exports for public API
pub use agent::{Agent, AgentBuilder, ChannelSink, LogSink, ReportSink};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use metrics::{MetricIdentity, MetricStats, MetricTable, Report, TransactionSample};
pub use recorder::{ExitOptions, FrameGuard, FrameToken, Store, TransactionContext};
pub use samplers::Sampler;
pub use utils::{parse_level, setup_logging, LogConfig};
