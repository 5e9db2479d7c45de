//! Agent lifecycle: the periodic worker, its report cycle and report sinks

mod agent;
mod builder;
mod sink;
mod worker;

pub use agent::{Agent, Reporter};
pub use builder::AgentBuilder;
pub use sink::{ChannelSink, LogSink, ReportSink};
pub use worker::{next_deadline, BackgroundWorker, WorkerState, WorkerTask};
