use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

/// Engine-wide counters. All increments are relaxed: readers may trail the
/// workers but never observe more work than actually happened.
pub(crate) struct Stats {
    started_at: Mutex<Instant>,
    hash_count: AtomicU64,
    blocks_found: AtomicU64,
    stale_blocks: AtomicU64,
    template_count: AtomicU64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self {
            started_at: Mutex::new(Instant::now()),
            hash_count: AtomicU64::new(0),
            blocks_found: AtomicU64::new(0),
            stale_blocks: AtomicU64::new(0),
            template_count: AtomicU64::new(0),
        }
    }

    /// Zero everything and restart the clock. Called once per `start`, before
    /// any threads are spawned.
    pub(crate) fn reset(&self) {
        if let Ok(mut started_at) = self.started_at.lock() {
            *started_at = Instant::now();
        }
        self.hash_count.store(0, Ordering::Relaxed);
        self.blocks_found.store(0, Ordering::Relaxed);
        self.stale_blocks.store(0, Ordering::Relaxed);
        self.template_count.store(0, Ordering::Relaxed);
    }

    pub(crate) fn add_hashes(&self, hashes: u64) {
        if hashes > 0 {
            self.hash_count.fetch_add(hashes, Ordering::Relaxed);
        }
    }

    pub(crate) fn bump_template(&self) {
        self.template_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_block_found(&self) {
        self.blocks_found.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_stale_block(&self) {
        self.stale_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn hash_count(&self) -> u64 {
        self.hash_count.load(Ordering::Relaxed)
    }

    pub(crate) fn blocks_found(&self) -> u64 {
        self.blocks_found.load(Ordering::Relaxed)
    }

    pub(crate) fn stale_blocks(&self) -> u64 {
        self.stale_blocks.load(Ordering::Relaxed)
    }

    pub(crate) fn template_count(&self) -> u64 {
        self.template_count.load(Ordering::Relaxed)
    }

    fn elapsed_secs(&self) -> f64 {
        self.started_at
            .lock()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
            .max(0.001)
    }

    pub(crate) fn hash_rate(&self) -> f64 {
        self.hash_count() as f64 / self.elapsed_secs()
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let elapsed_secs = self.elapsed_secs();
        let hash_count = self.hash_count();
        StatsSnapshot {
            elapsed_secs,
            hash_count,
            blocks_found: self.blocks_found(),
            stale_blocks: self.stale_blocks(),
            template_count: self.template_count(),
            hash_rate: hash_count as f64 / elapsed_secs,
        }
    }
}

/// Point-in-time view of the engine counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub elapsed_secs: f64,
    pub hash_count: u64,
    pub blocks_found: u64,
    pub stale_blocks: u64,
    pub template_count: u64,
    pub hash_rate: f64,
}

pub fn format_hashrate(hps: f64) -> String {
    if hps >= 1_000_000_000.0 {
        return format!("{:.3} GH/s", hps / 1_000_000_000.0);
    }
    if hps >= 1_000_000.0 {
        return format!("{:.3} MH/s", hps / 1_000_000.0);
    }
    if hps >= 1_000.0 {
        return format!("{:.3} KH/s", hps / 1_000.0);
    }
    format!("{hps:.3} H/s")
}
