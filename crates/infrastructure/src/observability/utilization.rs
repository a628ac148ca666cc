use std::sync::Mutex;
use std::time::Instant;

use taskplane_core::{PoolStats, TaskplaneError, TaskplaneResult};
use tracing::debug;

/// Kernel clock ticks per second as exposed through /proc
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

/// Source of the CPU and memory percentages in a utilization sample
#[derive(Debug)]
pub enum UtilizationSource {
    /// Busy execution slots stand in for CPU; memory is not reported
    Slots,
    /// Process CPU time and resident memory read from /proc
    Process(ProcessSampler),
}

impl UtilizationSource {
    pub fn from_name(name: &str) -> TaskplaneResult<Self> {
        match name {
            "slots" => Ok(UtilizationSource::Slots),
            "process" => Ok(UtilizationSource::Process(ProcessSampler::default())),
            other => Err(TaskplaneError::Configuration(format!(
                "unknown utilization source: {other}"
            ))),
        }
    }

    /// Returns `(avg_cpu_percent, avg_memory_percent)`
    pub fn measure(&self, stats: &PoolStats) -> (f64, f64) {
        match self {
            UtilizationSource::Slots => (slot_percent(stats), 0.0),
            UtilizationSource::Process(sampler) => match sampler.measure() {
                Ok(reading) => reading,
                Err(e) => {
                    debug!(error = %e, "process sampling unavailable, falling back to slot utilization");
                    (slot_percent(stats), 0.0)
                }
            },
        }
    }
}

fn slot_percent(stats: &PoolStats) -> f64 {
    if stats.total_slots == 0 {
        return 0.0;
    }
    f64::from(stats.active_tasks) * 100.0 / f64::from(stats.total_slots)
}

/// Reads CPU and memory usage of the current process
///
/// CPU is the process CPU time consumed since the previous reading divided by
/// wall time and available cores. The first reading reports 0.
#[derive(Debug, Default)]
pub struct ProcessSampler {
    last: Mutex<Option<(Instant, u64)>>,
}

impl ProcessSampler {
    pub fn measure(&self) -> TaskplaneResult<(f64, f64)> {
        let ticks = read_cpu_ticks()?;
        let now = Instant::now();
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as f64)
            .unwrap_or(1.0);

        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let cpu = match *last {
            Some((at, prev)) => {
                let wall = now.duration_since(at).as_secs_f64();
                if wall > 0.0 {
                    let used = ticks.saturating_sub(prev) as f64 / CLOCK_TICKS_PER_SEC;
                    (used / wall / cores * 100.0).clamp(0.0, 100.0)
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        *last = Some((now, ticks));

        Ok((cpu, read_memory_percent()?))
    }
}

fn proc_error(e: impl std::fmt::Display) -> TaskplaneError {
    TaskplaneError::MetricsUnavailable(format!("failed to read /proc: {e}"))
}

/// utime + stime from /proc/self/stat
fn read_cpu_ticks() -> TaskplaneResult<u64> {
    let stat = std::fs::read_to_string("/proc/self/stat").map_err(proc_error)?;
    parse_cpu_ticks(&stat)
}

fn parse_cpu_ticks(stat: &str) -> TaskplaneResult<u64> {
    // The command name may contain spaces, fields are counted after the closing paren
    let rest = stat
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .ok_or_else(|| proc_error("malformed stat line"))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // utime and stime are fields 14 and 15 of the full line, 12 and 13 after the paren
    let utime: u64 = fields
        .get(11)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| proc_error("missing utime"))?;
    let stime: u64 = fields
        .get(12)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| proc_error("missing stime"))?;
    Ok(utime + stime)
}

fn read_memory_percent() -> TaskplaneResult<f64> {
    let status = std::fs::read_to_string("/proc/self/status").map_err(proc_error)?;
    let meminfo = std::fs::read_to_string("/proc/meminfo").map_err(proc_error)?;
    let rss = kb_field(&status, "VmRSS:").ok_or_else(|| proc_error("missing VmRSS"))?;
    let total = kb_field(&meminfo, "MemTotal:").ok_or_else(|| proc_error("missing MemTotal"))?;
    if total == 0 {
        return Ok(0.0);
    }
    Ok(rss as f64 * 100.0 / total as f64)
}

fn kb_field(content: &str, key: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with(key))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}
