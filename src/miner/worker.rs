use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use weirnet_pow_spec::digest_meets_target;

use super::context::MiningContext;
use super::EngineShared;
use crate::node::{BlockSubmitter, SubmitOutcome};
use crate::oracle::OracleFactory;
use crate::types::Block;

/// Nonces ground per batch before the worker re-checks the running flag.
/// Bounds shutdown latency to one batch of hashes.
pub(crate) const STALENESS_CHECK_INTERVAL: u64 = 1000;

/// Local hashes accumulated before one relaxed add to the global counter.
pub(crate) const HASH_BATCH_SIZE: u64 = 10_000;

/// How often within a batch the worker samples the job id for staleness.
const JOB_SAMPLE_INTERVAL: u64 = 100;

const ORACLE_INIT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Consecutive fast-mode init failures before dropping to a light-mode
/// oracle. Fast mode needs ~2 GiB per worker; on a memory-starved host the
/// light cache is the difference between mining slowly and not at all.
pub(crate) const FAST_INIT_FALLBACK_AFTER: u32 = 2;

/// One grinding thread. Owns its oracle outright; the only shared state it
/// touches on the hot path is a relaxed job-id sample every
/// [`JOB_SAMPLE_INTERVAL`] hashes and a relaxed counter add every
/// [`HASH_BATCH_SIZE`].
pub(crate) struct Worker {
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) submitter: Arc<dyn BlockSubmitter>,
    pub(crate) oracles: Arc<dyn OracleFactory>,
    pub(crate) worker_id: u32,
    pub(crate) worker_count: u32,
    pub(crate) fast_mode: bool,
    pub(crate) core_id: Option<core_affinity::CoreId>,
}

/// The context a worker is currently grinding, plus its private block copy.
struct ActiveJob {
    ctx: Arc<MiningContext>,
    block: Block,
}

impl Worker {
    pub(crate) fn run(self) {
        if let Some(core_id) = self.core_id {
            let _ = core_affinity::set_for_current(core_id);
        }
        println!("[worker {}] started", self.worker_id);

        let mut oracle = self.oracles.create(self.fast_mode);
        let mut fast_mode_active = self.fast_mode;
        let mut init_failures = 0u32;

        let mut job: Option<ActiveJob> = None;
        let mut last_job_id = 0u64;
        let mut stride_iter = 0u64;
        let mut local_hashes = 0u64;

        'outer: while self.shared.running.load(Ordering::Acquire) {
            let current_job = self.shared.slot.job_id_acquire();
            if job.is_none() || current_job != last_job_id {
                let Some(ctx) = self
                    .shared
                    .slot
                    .wait_for_context(last_job_id, &self.shared.running)
                else {
                    break;
                };

                if !oracle.has_seed(&ctx.seed_digest) {
                    match oracle.initialize(ctx.seed_digest) {
                        Ok(()) => {
                            init_failures = 0;
                            println!(
                                "[worker {}] oracle ready (seed {})",
                                self.worker_id,
                                ctx.seed_digest.short()
                            );
                        }
                        Err(err) => {
                            init_failures += 1;
                            eprintln!(
                                "[worker {}] oracle init failed (attempt {}): {err:#}",
                                self.worker_id, init_failures
                            );
                            if fast_mode_active && init_failures >= FAST_INIT_FALLBACK_AFTER {
                                eprintln!(
                                    "[worker {}] falling back to light-mode oracle",
                                    self.worker_id
                                );
                                oracle = self.oracles.create(false);
                                fast_mode_active = false;
                                self.shared.using_fast_mode.store(false, Ordering::Relaxed);
                                init_failures = 0;
                            } else {
                                sleep_while_running(&self.shared.running, ORACLE_INIT_RETRY_DELAY);
                            }
                            continue;
                        }
                    }
                }

                last_job_id = ctx.job_id;
                stride_iter = 0;
                job = Some(ActiveJob {
                    block: ctx.block.clone(),
                    ctx,
                });
            }

            let Some(active) = job.as_mut() else {
                continue;
            };

            let mut solved = false;
            let mut batch_iter = 0u64;
            while batch_iter < STALENESS_CHECK_INTERVAL {
                let nonce = stride_nonce(self.worker_id, self.worker_count, stride_iter);
                stride_iter += 1;
                batch_iter += 1;

                active.block.header.nonce = nonce;
                let header_bytes = active.block.header.serialize();
                let digest = match oracle.hash(&header_bytes) {
                    Ok(digest) => digest,
                    Err(err) => {
                        eprintln!(
                            "[worker {}] hash computation failed, worker exiting: {err:#}",
                            self.worker_id
                        );
                        break 'outer;
                    }
                };
                local_hashes += 1;

                if digest_meets_target(digest.as_bytes(), &active.ctx.target) {
                    println!(
                        "[worker {}] block found: height={} nonce={} hash={}...",
                        self.worker_id,
                        active.ctx.height,
                        nonce,
                        digest.short()
                    );

                    self.shared.stats.add_hashes(local_hashes);
                    local_hashes = 0;

                    match self.submitter.submit_block(&active.block) {
                        SubmitOutcome::Accepted => {
                            self.shared.stats.bump_block_found();
                            println!("[worker {}] block accepted by the node", self.worker_id);
                        }
                        SubmitOutcome::Duplicate => {
                            self.shared.stats.bump_stale_block();
                            println!("[worker {}] block was a duplicate", self.worker_id);
                        }
                        SubmitOutcome::Rejected => {
                            self.shared.stats.bump_stale_block();
                            println!(
                                "[worker {}] block rejected (stale or invalid)",
                                self.worker_id
                            );
                        }
                    }

                    solved = true;
                    break;
                }

                if batch_iter % JOB_SAMPLE_INTERVAL == 0
                    && self.shared.slot.job_id_relaxed() != last_job_id
                {
                    break;
                }
            }

            if solved {
                // Re-sync to the next context. last_job_id stays at the
                // solved job, so the worker cannot refetch the same context
                // and regrind (and resubmit) the nonce it just solved.
                job = None;
            }

            if local_hashes >= HASH_BATCH_SIZE {
                self.shared.stats.add_hashes(local_hashes);
                local_hashes = 0;
            }
        }

        self.shared.stats.add_hashes(local_hashes);
        println!("[worker {}] stopped", self.worker_id);
    }
}

/// Nonce for the k-th attempt of `worker_id` out of `worker_count` workers.
///
/// Striding `i, i+N, i+2N, ...` gives disjoint coverage across workers
/// without range arithmetic and the same expected hit-time for every worker
/// however long a template lives. Wraparound is modulo 2^32 (the full nonce
/// space), not the source tree's `% (2^32 - 1)`.
pub(crate) fn stride_nonce(worker_id: u32, worker_count: u32, iter: u64) -> u32 {
    (u64::from(worker_id).wrapping_add(iter.wrapping_mul(u64::from(worker_count)))) as u32
}

/// Sleep in short slices so shutdown is never blocked behind a retry delay.
fn sleep_while_running(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let slice = deadline
            .saturating_duration_since(now)
            .min(Duration::from_millis(100));
        thread::sleep(slice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn single_worker_stride_is_sequential() {
        for iter in 0..1000u64 {
            assert_eq!(stride_nonce(0, 1, iter), iter as u32);
        }
    }

    #[test]
    fn strides_are_disjoint_across_workers() {
        let workers = 4u32;
        let mut seen = HashSet::new();
        for worker_id in 0..workers {
            for iter in 0..10_000u64 {
                assert!(
                    seen.insert(stride_nonce(worker_id, workers, iter)),
                    "nonce collision for worker {worker_id} at iteration {iter}"
                );
            }
        }
    }

    #[test]
    fn stride_wraps_modulo_nonce_space() {
        // Iteration count large enough to wrap 2^32 with 8 workers.
        let wrapped = stride_nonce(3, 8, (1u64 << 32) / 8);
        assert_eq!(wrapped, 3);
    }

    #[test]
    fn sleep_while_running_returns_early_on_stop() {
        let running = AtomicBool::new(false);
        let start = Instant::now();
        sleep_while_running(&running, Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
