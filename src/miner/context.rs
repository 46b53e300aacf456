use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::types::{Block, Hash256};

/// Immutable snapshot handed from the coordinator to the workers.
///
/// Published once and never mutated; workers copy the block locally and only
/// ever touch their copy's nonce. The snapshot is freed when the last worker
/// drops its reference.
#[derive(Debug, Clone)]
pub struct MiningContext {
    pub block: Block,
    /// Compact difficulty encoding, equal to `block.header.bits`.
    pub target_bits: u32,
    /// `target_bits` expanded once at publication so the grinding loop never
    /// re-decodes it.
    pub target: [u8; 32],
    /// Seed the worker's oracle must be initialized for before hashing.
    pub seed_digest: Hash256,
    /// Strictly increasing across the life of the engine.
    pub job_id: u64,
    /// Height this block would occupy.
    pub height: u64,
}

/// Publication slot for the current context.
///
/// The slot pairs a mutex-guarded `Arc` with an atomic job id. The worker
/// fast path is a single acquire load of the job id; only a mismatch pays for
/// the mutex to fetch the new reference. The coordinator stores the job id
/// with release ordering after swapping the pointer, so a worker observing a
/// new id is guaranteed to find the paired context under the mutex.
pub(crate) struct ContextSlot {
    current: Mutex<Option<Arc<MiningContext>>>,
    available: Condvar,
    job_id: AtomicU64,
}

impl ContextSlot {
    pub(crate) fn new() -> Self {
        Self {
            current: Mutex::new(None),
            available: Condvar::new(),
            job_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn job_id_relaxed(&self) -> u64 {
        self.job_id.load(Ordering::Relaxed)
    }

    pub(crate) fn job_id_acquire(&self) -> u64 {
        self.job_id.load(Ordering::Acquire)
    }

    /// Next job id for the coordinator to assign. Only the coordinator calls
    /// this, so a relaxed read is enough.
    pub(crate) fn next_job_id(&self) -> u64 {
        self.job_id.load(Ordering::Relaxed) + 1
    }

    pub(crate) fn publish(&self, ctx: Arc<MiningContext>) {
        let Ok(mut slot) = self.current.lock() else {
            return;
        };
        let job_id = ctx.job_id;
        *slot = Some(ctx);
        self.job_id.store(job_id, Ordering::Release);
        self.available.notify_all();
    }

    /// Block until a context with a job id other than `exclude_job` is
    /// published, or the engine stops. Excluding the last-finished job is
    /// what keeps a worker from regrinding (and resubmitting) a block it
    /// already solved.
    pub(crate) fn wait_for_context(
        &self,
        exclude_job: u64,
        running: &AtomicBool,
    ) -> Option<Arc<MiningContext>> {
        let Ok(mut slot) = self.current.lock() else {
            return None;
        };
        loop {
            if !running.load(Ordering::Acquire) {
                return None;
            }
            if let Some(ctx) = slot.as_ref() {
                if ctx.job_id != exclude_job {
                    return Some(Arc::clone(ctx));
                }
            }
            slot = self.available.wait(slot).ok()?;
        }
    }

    /// Wait up to `timeout` for any context to appear. Used by `start` to
    /// give workers immediate work; a timeout is not fatal.
    pub(crate) fn wait_for_first(&self, timeout: Duration, running: &AtomicBool) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut slot) = self.current.lock() else {
            return false;
        };
        loop {
            if slot.is_some() {
                return true;
            }
            if !running.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.available.wait_timeout(slot, deadline - now) {
                Ok((guard, _)) => slot = guard,
                Err(_) => return false,
            }
        }
    }

    pub(crate) fn current(&self) -> Option<Arc<MiningContext>> {
        self.current.lock().ok()?.clone()
    }

    /// Wake every waiter so they can re-check the running flag. Takes the
    /// slot lock to close the race against a waiter between its predicate
    /// check and its wait.
    pub(crate) fn wake_all(&self) {
        let _guard = self.current.lock();
        self.available.notify_all();
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut slot) = self.current.lock() {
            *slot = None;
        }
    }

    /// Fresh start: no context, job ids restart from zero.
    pub(crate) fn reset(&self) {
        if let Ok(mut slot) = self.current.lock() {
            *slot = None;
            self.job_id.store(0, Ordering::Release);
        }
    }
}
