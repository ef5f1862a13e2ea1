use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

use super::{MetricsError, SystemSample};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Produces one `SystemSample` per call. Implementations must be cheap
/// enough to run on the periodic sampling task.
pub trait SystemSampler: Send + Sync {
    fn sample(&self) -> Result<SystemSample, MetricsError>;
}

/// sysinfo-backed sampler for the current process.
///
/// CPU is measured between consecutive refreshes, so the very first
/// reading is 0.
pub struct ProcessSampler {
    sys: Mutex<System>,
    pid: Pid,
    started: Instant,
}

impl ProcessSampler {
    pub fn new() -> Result<Self, MetricsError> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| MetricsError::Sampler(format!("cannot resolve own pid: {e}")))?;

        Ok(Self {
            sys: Mutex::new(System::new()),
            pid,
            started: Instant::now(),
        })
    }
}

impl SystemSampler for ProcessSampler {
    fn sample(&self) -> Result<SystemSample, MetricsError> {
        let mut sys = self.sys.lock();
        sys.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let process = sys.process(self.pid).ok_or_else(|| {
            MetricsError::Sampler(format!("process {} not visible", self.pid))
        })?;

        let sample = SystemSample {
            timestamp: Utc::now(),
            cpu_percent: f64::from(process.cpu_usage()),
            memory_usage_mb: process.memory() as f64 / BYTES_PER_MB,
            uptime_seconds: self.started.elapsed().as_secs_f64(),
        };

        debug!(
            cpu = sample.cpu_percent,
            memory_mb = sample.memory_usage_mb,
            "sampled process resources"
        );
        Ok(sample)
    }
}
