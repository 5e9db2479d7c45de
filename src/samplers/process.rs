use std::time::{Duration, Instant};
use anyhow::Context;

use super::Sampler;

pub const CPU_METRIC: &str = "CPU/Utilization";
pub const MEMORY_METRIC: &str = "Memory/Physical";

const SCHEDSTAT_PATH: &str = "/proc/self/schedstat";
const STATUS_PATH: &str = "/proc/self/status";

/// Share of the machine's CPU used by this process, in percent.
///
/// Measured between consecutive runs, so the first run only takes a baseline
/// and reports nothing.
pub struct ProcessCpu {
    processors: usize,
    last: Option<CpuReading>,
}

#[derive(Debug, Clone, Copy)]
struct CpuReading {
    cpu_time: Duration,
    taken_at: Instant,
}

impl ProcessCpu {
    pub fn new(processors: usize) -> Self {
        Self {
            processors: processors.max(1),
            last: None,
        }
    }

    /// Sampler sized to the processors available to this process.
    pub fn detect() -> Self {
        let processors = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(processors)
    }

    pub fn processors(&self) -> usize {
        self.processors
    }

    fn record(&mut self, cpu_time: Duration, taken_at: Instant) -> Option<f64> {
        let previous = self.last.replace(CpuReading { cpu_time, taken_at })?;
        let wall = taken_at.saturating_duration_since(previous.taken_at);
        if wall.is_zero() {
            return None;
        }
        let used = cpu_time.saturating_sub(previous.cpu_time);
        Some(utilization(used, wall, self.processors))
    }
}

impl Sampler for ProcessCpu {
    fn metric_name(&self) -> &str {
        CPU_METRIC
    }

    fn run(&mut self) -> anyhow::Result<Option<f64>> {
        if !cfg!(target_os = "linux") {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(SCHEDSTAT_PATH)
            .with_context(|| format!("reading {SCHEDSTAT_PATH}"))?;
        let cpu_time = parse_schedstat(&raw)
            .with_context(|| format!("unexpected {SCHEDSTAT_PATH} contents: {raw:?}"))?;
        Ok(self.record(cpu_time, Instant::now()))
    }
}

/// Resident set size of this process, in megabytes.
#[derive(Debug, Default)]
pub struct ProcessMemory;

impl ProcessMemory {
    pub fn new() -> Self {
        Self
    }
}

impl Sampler for ProcessMemory {
    fn metric_name(&self) -> &str {
        MEMORY_METRIC
    }

    fn run(&mut self) -> anyhow::Result<Option<f64>> {
        if !cfg!(target_os = "linux") {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(STATUS_PATH)
            .with_context(|| format!("reading {STATUS_PATH}"))?;
        Ok(parse_rss_mb(&raw))
    }
}

fn utilization(used: Duration, wall: Duration, processors: usize) -> f64 {
    used.as_secs_f64() / (wall.as_secs_f64() * processors as f64) * 100.0
}

/// On-CPU time, the first field of `/proc/<pid>/schedstat` (nanoseconds).
fn parse_schedstat(raw: &str) -> Option<Duration> {
    let nanos = raw.split_whitespace().next()?.parse::<u64>().ok()?;
    Some(Duration::from_nanos(nanos))
}

/// `VmRSS` from `/proc/<pid>/status`, converted from kB to MB.
fn parse_rss_mb(raw: &str) -> Option<f64> {
    let line = raw.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kb = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()?;
    Some(kb / 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schedstat() {
        assert_eq!(
            parse_schedstat("1500000000 20000 12\n"),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_schedstat(""), None);
        assert_eq!(parse_schedstat("abc 1 2"), None);
    }

    #[test]
    fn test_parse_rss() {
        let status = "Name:\tserver\nVmPeak:\t  300000 kB\nVmRSS:\t  204800 kB\nThreads:\t8\n";
        assert_eq!(parse_rss_mb(status), Some(200.0));
        assert_eq!(parse_rss_mb("Name:\tkthreadd\n"), None);
    }

    #[test]
    fn test_cpu_baseline_then_utilization() {
        let mut cpu = ProcessCpu::new(4);
        let t0 = Instant::now();

        assert_eq!(cpu.record(Duration::from_secs(10), t0), None);
        // 2s of CPU over 1s of wall on 4 cores = 50%
        let pct = cpu.record(Duration::from_secs(12), t0 + Duration::from_secs(1)).unwrap();
        assert!((pct - 50.0).abs() < 1e-9);
        // Same instant again: no interval to measure.
        assert_eq!(cpu.record(Duration::from_secs(12), t0 + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_processors_at_least_one() {
        assert_eq!(ProcessCpu::new(0).processors(), 1);
        assert!(ProcessCpu::detect().processors() >= 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_live_samplers() {
        if std::path::Path::new(STATUS_PATH).exists() {
            let mut memory = ProcessMemory::new();
            assert!(memory.run().unwrap().map_or(true, |rss| rss > 0.0));
        }

        if std::path::Path::new(SCHEDSTAT_PATH).exists() {
            let mut cpu = ProcessCpu::detect();
            assert_eq!(cpu.run().unwrap(), None);
            std::thread::sleep(Duration::from_millis(20));
            assert!(cpu.run().unwrap().unwrap() >= 0.0);
        }
    }
}
