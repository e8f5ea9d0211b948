//! Host resource sampling for the `--print-log` diagnostics side channel.

use sysinfo::System;

const BYTES_PER_MB: f64 = 1_048_576.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SystemSample {
    /// Available memory in MB, rounded.
    pub available_memory_mb: u64,
    /// Global CPU utilization in percent since the previous sample.
    pub cpu_percent: f32,
}

/// Anything that can produce a `SystemSample` without blocking.
pub trait DiagnosticsSampler {
    fn sample(&mut self) -> SystemSample;
}

/// `sysinfo`-backed sampler. Only memory and CPU are refreshed per sample.
pub struct SystemMonitor {
    system: System,
}

impl SystemMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        // First CPU reading is a baseline; usage is reported relative to it.
        system.refresh_cpu();
        Self { system }
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsSampler for SystemMonitor {
    fn sample(&mut self) -> SystemSample {
        self.system.refresh_memory();
        self.system.refresh_cpu();
        SystemSample {
            available_memory_mb: bytes_to_mb(self.system.available_memory()),
            cpu_percent: self.system.global_cpu_info().cpu_usage(),
        }
    }
}

fn bytes_to_mb(bytes: u64) -> u64 {
    (bytes as f64 / BYTES_PER_MB).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_bytes_to_rounded_mb() {
        assert_eq!(bytes_to_mb(0), 0);
        assert_eq!(bytes_to_mb(1_048_576), 1);
        assert_eq!(bytes_to_mb(1_572_864), 2);
        assert_eq!(bytes_to_mb(1_500_000), 1);
    }

    #[test]
    fn monitor_reports_plausible_values() {
        let mut monitor = SystemMonitor::new();
        let sample = monitor.sample();
        assert!(sample.cpu_percent >= 0.0);
        assert!(sample.cpu_percent.is_finite());
    }
}
