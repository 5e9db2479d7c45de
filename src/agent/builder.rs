use std::sync::Arc;
use crate::{
    config::AgentConfig,
    error::Result,
    recorder::Store,
    samplers::{default_samplers, Sampler},
};

use super::agent::{Agent, Reporter};
use super::sink::{LogSink, ReportSink};

/// Builder for constructing an Agent instance
pub struct AgentBuilder {
    config: Option<AgentConfig>,
    samplers: Option<Vec<Box<dyn Sampler>>>,
    sink: Option<Arc<dyn ReportSink>>,
}

impl AgentBuilder {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self {
            config: None,
            samplers: None,
            sink: None,
        }
    }

    /// Set the agent configuration
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Add a sampler. The first call replaces the default process samplers.
    pub fn with_sampler(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.samplers.get_or_insert_with(Vec::new).push(sampler);
        self
    }

    /// Run no samplers at all.
    pub fn without_samplers(mut self) -> Self {
        self.samplers = Some(Vec::new());
        self
    }

    /// Set where drained reports go. Defaults to [`LogSink`].
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the agent instance
    pub fn build(self) -> Result<Agent> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let config = Arc::new(config);
        let store = Arc::new(Store::new(config.recorder.clone()));
        let samplers = self.samplers.unwrap_or_else(default_samplers);
        let sink = self.sink.unwrap_or_else(|| Arc::new(LogSink));

        let reporter = Arc::new(Reporter::new(store.clone(), samplers, sink));
        Ok(Agent::new(config, store, reporter))
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
