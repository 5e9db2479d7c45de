//! Call-stack recording of nested frames within a transaction

mod context;
mod guard;
mod store;

pub use context::{FrameToken, TransactionContext};
pub use guard::FrameGuard;
pub use store::{ExitOptions, Store};
