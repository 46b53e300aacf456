use std::time::Duration;

use anyhow::{bail, Result};
use weirnet_pow_spec::{FAST_MODE_MEMORY_BYTES, LIGHT_MODE_MEMORY_BYTES};

/// CPU pinning policy for worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuAffinityMode {
    Off,
    Auto,
}

/// Engine configuration, fixed for the lifetime of one start/stop cycle.
///
/// CLI parsing and persistence belong to the node; the engine only validates
/// what it is handed.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Number of grinding threads. Each one owns a full hash oracle.
    pub worker_count: usize,
    /// Script the coinbase output pays to. Opaque to the engine.
    pub coinbase_script: Vec<u8>,
    /// Fast mode trades ~2 GiB of RAM per worker for mining-speed hashing.
    pub fast_mode: bool,
    /// Retained for the node to apply via process nice; the engine does not
    /// touch thread priorities itself.
    pub low_priority: bool,
    pub cpu_affinity: CpuAffinityMode,
    /// Maximum template age before the coordinator refreshes it anyway.
    pub refresh_interval: Duration,
    /// Upper bound on one coordinator wait for a tip notification.
    pub poll_interval: Duration,
    /// How long `start` waits for the coordinator to publish its first
    /// context before letting workers idle.
    pub first_template_timeout: Duration,
}

impl MinerConfig {
    pub fn new(worker_count: usize, coinbase_script: Vec<u8>) -> Self {
        Self {
            worker_count,
            coinbase_script,
            fast_mode: true,
            low_priority: true,
            cpu_affinity: CpuAffinityMode::Auto,
            refresh_interval: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            first_template_timeout: Duration::from_secs(30),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            bail!("worker-count must be >= 1");
        }
        if self.coinbase_script.is_empty() {
            bail!("coinbase script is empty");
        }
        if self.refresh_interval.is_zero() {
            bail!("refresh-interval must be non-zero");
        }
        if self.poll_interval.is_zero() {
            bail!("poll-interval must be non-zero");
        }
        Ok(())
    }

    /// Total oracle memory the configured workers will hold once initialized.
    pub fn required_oracle_memory(&self) -> u64 {
        let per_worker = if self.fast_mode {
            FAST_MODE_MEMORY_BYTES
        } else {
            LIGHT_MODE_MEMORY_BYTES
        };
        per_worker.saturating_mul(self.worker_count as u64)
    }

    /// Warning text when the configured workers would exceed the detected
    /// memory budget, or `None` when the budget fits or cannot be detected.
    ///
    /// Unlike a standalone miner this engine shares its process with a node,
    /// so oversubscription is reported but never fatal.
    pub fn memory_budget_warning(&self) -> Option<String> {
        let required = self.required_oracle_memory();
        let budget = detect_memory_budget_bytes()?;

        if required > budget.effective_total {
            return Some(format!(
                "configured workers need ~{} of oracle memory but the effective memory limit is ~{}; expect failed oracle initialization or swapping",
                human_bytes(required),
                human_bytes(budget.effective_total),
            ));
        }
        if required > budget.effective_available {
            return Some(format!(
                "configured workers need ~{} of oracle memory but only ~{} is currently available (effective limit ~{})",
                human_bytes(required),
                human_bytes(budget.effective_available),
                human_bytes(budget.effective_total),
            ));
        }
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct MemoryBudgetBytes {
    effective_total: u64,
    effective_available: u64,
}

fn detect_memory_budget_bytes() -> Option<MemoryBudgetBytes> {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();

    let total = sys.total_memory();
    if total == 0 {
        return None;
    }

    let mut effective_total = total;
    let mut effective_available = sys.available_memory();
    if effective_available == 0 {
        effective_available = total;
    }

    if let Some(cgroup) = sys.cgroup_limits() {
        if cgroup.total_memory > 0 {
            effective_total = effective_total.min(cgroup.total_memory);
        }
        if cgroup.free_memory > 0 {
            effective_available = effective_available.min(cgroup.free_memory);
        }
    }

    effective_available = effective_available.min(effective_total);
    Some(MemoryBudgetBytes {
        effective_total,
        effective_available,
    })
}

pub(crate) fn human_bytes(bytes: u64) -> String {
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;

    if bytes >= 1024 * 1024 * 1024 {
        return format!("{:.2} GiB", (bytes as f64) / GIB);
    }
    format!("{:.2} MiB", (bytes as f64) / MIB)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> MinerConfig {
        MinerConfig::new(2, vec![0x51])
    }

    #[test]
    fn defaults_match_production_values() {
        let cfg = sample_config();
        assert!(cfg.fast_mode);
        assert!(cfg.low_priority);
        assert_eq!(cfg.cpu_affinity, CpuAffinityMode::Auto);
        assert_eq!(cfg.refresh_interval, Duration::from_secs(30));
        assert_eq!(cfg.poll_interval, Duration::from_millis(100));
        assert_eq!(cfg.first_template_timeout, Duration::from_secs(30));
    }

    #[test]
    fn validate_accepts_sane_config() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut cfg = sample_config();
        cfg.worker_count = 0;
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("worker-count"));
    }

    #[test]
    fn validate_rejects_empty_coinbase_script() {
        let mut cfg = sample_config();
        cfg.coinbase_script.clear();
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("coinbase script"));
    }

    #[test]
    fn validate_rejects_zero_intervals() {
        let mut cfg = sample_config();
        cfg.refresh_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = sample_config();
        cfg.poll_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn required_memory_scales_with_workers_and_mode() {
        let mut cfg = sample_config();
        cfg.worker_count = 4;
        cfg.fast_mode = true;
        assert_eq!(cfg.required_oracle_memory(), 4 * FAST_MODE_MEMORY_BYTES);

        cfg.fast_mode = false;
        assert_eq!(cfg.required_oracle_memory(), 4 * LIGHT_MODE_MEMORY_BYTES);
    }

    #[test]
    fn human_bytes_formats_units() {
        assert_eq!(human_bytes(1024 * 1024), "1.00 MiB");
        assert_eq!(human_bytes(1024 * 1024 * 1024), "1.00 GiB");
    }
}
