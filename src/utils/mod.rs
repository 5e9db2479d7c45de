//! Logging setup shared by the agent and host applications

mod logging;

pub use logging::{parse_level, setup_logging, LogConfig};
