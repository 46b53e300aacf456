//! The mining engine: one coordinator thread producing block templates, N
//! worker threads grinding nonces, and a facade owning their lifecycle.

mod context;
mod coordinator;
mod stats;
mod tip;
mod worker;

pub use context::MiningContext;
pub use stats::{format_hashrate, StatsSnapshot};
pub use tip::TipWatcher;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use weirnet_pow_spec::{FAST_MODE_MEMORY_BYTES, LIGHT_MODE_MEMORY_BYTES};

use crate::config::{human_bytes, CpuAffinityMode, MinerConfig};
use crate::node::{BlockSubmitter, ChainView, TemplateSource};
use crate::oracle::OracleFactory;
use context::ContextSlot;
use coordinator::Coordinator;
use stats::Stats;
use worker::Worker;

/// State shared by the facade, the coordinator, the workers, and the tip
/// watcher.
pub(crate) struct EngineShared {
    pub(crate) running: AtomicBool,
    pub(crate) slot: ContextSlot,
    pub(crate) stats: Stats,
    pub(crate) backoff_level: AtomicU32,
    pub(crate) using_fast_mode: AtomicBool,
    pub(crate) tip_tx: Sender<()>,
    pub(crate) tip_rx: Receiver<()>,
}

impl EngineShared {
    pub(crate) fn new() -> Self {
        // Capacity 1 makes the channel an edge-triggered flag: a full channel
        // is itself a pending wake-up, so sends never need to block.
        let (tip_tx, tip_rx) = bounded(1);
        Self {
            running: AtomicBool::new(false),
            slot: ContextSlot::new(),
            stats: Stats::new(),
            backoff_level: AtomicU32::new(0),
            using_fast_mode: AtomicBool::new(true),
            tip_tx,
            tip_rx,
        }
    }
}

/// In-process miner coupled directly to the node's template producer and
/// block-submission path.
///
/// Construct once with the node's trait objects, then `start`/`stop` at will.
/// Dropping a running miner stops it.
pub struct Miner {
    chain: Arc<dyn ChainView>,
    templates: Arc<dyn TemplateSource>,
    submitter: Arc<dyn BlockSubmitter>,
    oracles: Arc<dyn OracleFactory>,
    shared: Arc<EngineShared>,
    coordinator: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    worker_count: usize,
}

impl Miner {
    pub fn new(
        chain: Arc<dyn ChainView>,
        templates: Arc<dyn TemplateSource>,
        submitter: Arc<dyn BlockSubmitter>,
        oracles: Arc<dyn OracleFactory>,
    ) -> Self {
        Self {
            chain,
            templates,
            submitter,
            oracles,
            shared: Arc::new(EngineShared::new()),
            coordinator: None,
            workers: Vec::new(),
            worker_count: 0,
        }
    }

    /// Start mining. Returns false (and stays stopped) on invalid config or
    /// if already running.
    ///
    /// Blocks for at most `config.first_template_timeout` waiting for the
    /// coordinator's first template; on timeout the workers are spawned
    /// anyway and idle until a template arrives.
    pub fn start(&mut self, config: MinerConfig) -> bool {
        if let Err(err) = config.validate() {
            eprintln!("[miner] invalid config: {err:#}");
            return false;
        }
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            println!("[miner] already running");
            return false;
        }

        self.shared.stats.reset();
        self.shared.slot.reset();
        self.shared.backoff_level.store(0, Ordering::Relaxed);
        self.shared
            .using_fast_mode
            .store(config.fast_mode, Ordering::Relaxed);
        while self.shared.tip_rx.try_recv().is_ok() {}

        let per_worker_memory = if config.fast_mode {
            FAST_MODE_MEMORY_BYTES
        } else {
            LIGHT_MODE_MEMORY_BYTES
        };
        println!(
            "[miner] starting: workers={} oracle={} (~{} per worker) priority={} script_len={} affinity={:?}",
            config.worker_count,
            if config.fast_mode { "fast" } else { "light" },
            human_bytes(per_worker_memory),
            if config.low_priority { "low" } else { "normal" },
            config.coinbase_script.len(),
            config.cpu_affinity,
        );
        println!("[miner] nonce pattern: stride (i, i+N, i+2N, ...)");
        if let Some(warning) = config.memory_budget_warning() {
            eprintln!("[miner] {warning}");
        }

        let coordinator = Coordinator {
            shared: Arc::clone(&self.shared),
            chain: Arc::clone(&self.chain),
            templates: Arc::clone(&self.templates),
            config: config.clone(),
        };
        self.coordinator = Some(thread::spawn(move || coordinator.run()));

        if !self
            .shared
            .slot
            .wait_for_first(config.first_template_timeout, &self.shared.running)
        {
            println!("[miner] timed out waiting for first template; workers will idle until one arrives");
        }

        let core_ids = match config.cpu_affinity {
            CpuAffinityMode::Off => None,
            CpuAffinityMode::Auto => core_affinity::get_core_ids().filter(|ids| !ids.is_empty()),
        };

        self.worker_count = config.worker_count;
        self.workers.reserve(config.worker_count);
        for worker_id in 0..config.worker_count {
            let worker = Worker {
                shared: Arc::clone(&self.shared),
                submitter: Arc::clone(&self.submitter),
                oracles: Arc::clone(&self.oracles),
                worker_id: worker_id as u32,
                worker_count: config.worker_count as u32,
                fast_mode: config.fast_mode,
                core_id: core_ids
                    .as_ref()
                    .and_then(|ids| ids.get(worker_id % ids.len()))
                    .copied(),
            };
            self.workers.push(thread::spawn(move || worker.run()));
        }

        println!(
            "[miner] started coordinator + {} worker(s)",
            config.worker_count
        );
        true
    }

    /// Stop mining and join every engine thread. Idempotent; safe to call on
    /// a never-started miner.
    pub fn stop(&mut self) {
        if self
            .shared
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        println!("[miner] stopping");
        let _ = self.shared.tip_tx.try_send(());
        self.shared.slot.wake_all();

        // Workers first: they may still hold context references the
        // coordinator would otherwise replace under them.
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.coordinator.take() {
            let _ = handle.join();
        }
        self.shared.slot.clear();

        let snapshot = self.shared.stats.snapshot();
        println!(
            "[miner] stopped after {:.1}s: {} hashes ({}) blocks={} stale={} templates={}",
            snapshot.elapsed_secs,
            snapshot.hash_count,
            format_hashrate(snapshot.hash_rate),
            snapshot.blocks_found,
            snapshot.stale_blocks,
            snapshot.template_count,
        );
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn hash_count(&self) -> u64 {
        self.shared.stats.hash_count()
    }

    pub fn blocks_found(&self) -> u64 {
        self.shared.stats.blocks_found()
    }

    pub fn stale_blocks(&self) -> u64 {
        self.shared.stats.stale_blocks()
    }

    pub fn template_count(&self) -> u64 {
        self.shared.stats.template_count()
    }

    pub fn hash_rate(&self) -> f64 {
        self.shared.stats.hash_rate()
    }

    /// Number of worker threads from the most recent `start`.
    pub fn thread_count(&self) -> usize {
        self.worker_count
    }

    /// Current gating backoff level, 0 when mining normally.
    pub fn backoff_level(&self) -> u32 {
        self.shared.backoff_level.load(Ordering::Relaxed)
    }

    /// False once any worker has fallen back to a light-mode oracle.
    pub fn using_fast_mode(&self) -> bool {
        self.shared.using_fast_mode.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Adapter for the node's tip-changed notification path.
    pub fn tip_watcher(&self) -> TipWatcher {
        TipWatcher::new(Arc::clone(&self.shared))
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        self.stop();
    }
}
