//! Process-level samplers run by the background worker each cycle

mod process;

pub use process::{ProcessCpu, ProcessMemory, CPU_METRIC, MEMORY_METRIC};

/// A periodic measurement recorded as an unscoped metric.
///
/// Errors (and panics) are caught by the worker and logged; they never abort
/// the cycle or affect the other samplers.
pub trait Sampler: Send {
    /// Metric the value is tracked under
    fn metric_name(&self) -> &str;

    /// Take one reading. `Ok(None)` means nothing to record this time.
    fn run(&mut self) -> anyhow::Result<Option<f64>>;
}

/// The samplers an agent runs when none are configured explicitly.
pub fn default_samplers() -> Vec<Box<dyn Sampler>> {
    vec![Box::new(ProcessCpu::detect()), Box::new(ProcessMemory::new())]
}
