use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use weirnet_pow_spec::{expand_compact, seed_height};

use super::context::MiningContext;
use super::EngineShared;
use crate::config::MinerConfig;
use crate::node::{ChainView, TemplateSource, TipInfo};
use crate::types::Hash256;

/// Mining is pointless without at least one peer to relay a found block to.
pub(crate) const MIN_PEERS_FOR_MINING: usize = 1;

/// Cap on the exponential backoff: 2^6 seconds base.
pub(crate) const MAX_BACKOFF_LEVEL: u32 = 6;

const BACKOFF_BASE_MS: u64 = 1000;

/// Exponential backoff with jitter: `1s * 2^min(level, 6)` plus a uniform
/// `[0, base/4]`. The jitter keeps a fleet of miners from stampeding the
/// template source the moment a gate clears.
pub(crate) fn backoff_duration(level: u32) -> Duration {
    let base_ms = BACKOFF_BASE_MS << level.min(MAX_BACKOFF_LEVEL);
    let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 4);
    Duration::from_millis(base_ms + jitter_ms)
}

/// The single template-producing thread.
///
/// Watches the chain tip and the gating signals, turns node templates into
/// published [`MiningContext`]s, and absorbs every transient failure with
/// backoff instead of surfacing it.
pub(crate) struct Coordinator {
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) chain: Arc<dyn ChainView>,
    pub(crate) templates: Arc<dyn TemplateSource>,
    pub(crate) config: MinerConfig,
}

impl Coordinator {
    pub(crate) fn run(self) {
        println!("[coordinator] started");

        let mut last_tip: Option<Hash256> = None;
        let mut last_template_time: Option<Instant> = None;

        while self.shared.running.load(Ordering::Acquire) {
            if !self.should_mine() {
                let wait = self.bump_backoff();
                println!(
                    "[coordinator] mining gated (initial sync or no peers), backing off {}ms",
                    wait.as_millis()
                );
                self.wait_for_tip(wait);
                continue;
            }
            self.shared.backoff_level.store(0, Ordering::Relaxed);

            let Some(tip) = self.chain.tip() else {
                let wait = self.bump_backoff();
                eprintln!(
                    "[coordinator] chain has no tip, backing off {}ms",
                    wait.as_millis()
                );
                self.wait_for_tip(wait);
                continue;
            };

            let refresh_due = last_template_time
                .map_or(true, |at| at.elapsed() >= self.config.refresh_interval);
            let need_template = last_tip != Some(tip.hash)
                || refresh_due
                || self.shared.slot.job_id_relaxed() == 0;

            if need_template {
                let Some(ctx) = self.create_context(tip) else {
                    let wait = self.bump_backoff();
                    eprintln!(
                        "[coordinator] template creation failed, backing off {}ms",
                        wait.as_millis()
                    );
                    self.wait_for_tip(wait);
                    continue;
                };

                let job_id = ctx.job_id;
                let height = ctx.height;
                self.shared.slot.publish(ctx);
                self.shared.stats.bump_template();
                last_tip = Some(tip.hash);
                last_template_time = Some(Instant::now());

                if job_id == 1 {
                    println!("[coordinator] first template ready (height {height})");
                } else {
                    println!("[coordinator] new template #{job_id} (height {height})");
                }
            }

            self.wait_for_tip(self.config.poll_interval);
        }

        println!("[coordinator] stopped");
    }

    fn should_mine(&self) -> bool {
        !self.chain.is_initial_block_download()
            && self.chain.peer_count() >= MIN_PEERS_FOR_MINING
    }

    /// Duration for the current level, then saturating increment. The level
    /// may concurrently be reset to zero by a tip notification; that race is
    /// benign.
    fn bump_backoff(&self) -> Duration {
        let level = self.shared.backoff_level.load(Ordering::Relaxed);
        let wait = backoff_duration(level);
        self.shared
            .backoff_level
            .store((level + 1).min(MAX_BACKOFF_LEVEL), Ordering::Relaxed);
        wait
    }

    /// Wait for a tip notification for at most `timeout`. A pending
    /// notification (the channel holds at most one) returns immediately.
    fn wait_for_tip(&self, timeout: Duration) -> bool {
        self.shared.tip_rx.recv_timeout(timeout).is_ok()
    }

    fn create_context(&self, tip: TipInfo) -> Option<Arc<MiningContext>> {
        let height = tip.height + 1;

        let template = self
            .templates
            .create_new_block(&self.config.coinbase_script)?;
        let mut block = template.block;
        block.recompute_merkle_root();

        let seed_at = seed_height(height);
        let Some(seed_digest) = self.chain.seed_digest(seed_at) else {
            eprintln!("[coordinator] no seed digest for seed height {seed_at}");
            return None;
        };

        let bits = block.header.bits;
        let Some(target) = expand_compact(bits) else {
            eprintln!("[coordinator] template has invalid difficulty bits {bits:#010x}");
            return None;
        };

        Some(Arc::new(MiningContext {
            block,
            target_bits: bits,
            target,
            seed_digest,
            job_id: self.shared.slot.next_job_id(),
            height,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_level_zero_is_one_second_plus_jitter() {
        for _ in 0..50 {
            let wait = backoff_duration(0).as_millis() as u64;
            assert!((1000..=1250).contains(&wait), "out of range: {wait}ms");
        }
    }

    #[test]
    fn backoff_doubles_per_level() {
        for level in 0..=MAX_BACKOFF_LEVEL {
            let base = BACKOFF_BASE_MS << level;
            let wait = backoff_duration(level).as_millis() as u64;
            assert!(
                (base..=base + base / 4).contains(&wait),
                "level {level}: {wait}ms outside [{base}, {}]",
                base + base / 4
            );
        }
    }

    #[test]
    fn backoff_saturates_at_max_level() {
        // Six consecutive gated iterations land at the cap: 64s base with at
        // most 25% jitter.
        for level in [MAX_BACKOFF_LEVEL, MAX_BACKOFF_LEVEL + 1, u32::MAX] {
            let wait = backoff_duration(level).as_millis() as u64;
            assert!(
                (64_000..=80_000).contains(&wait),
                "level {level}: {wait}ms outside [64000, 80000]"
            );
        }
    }
}
