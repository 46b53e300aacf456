//! Trait seams between the mining engine and the owning node.
//!
//! The engine runs inside the node process, so instead of an RPC client it
//! talks to the node through these traits. All implementations are expected
//! to be internally synchronized; the engine calls them without holding any
//! of its own locks.

use crate::types::{Block, Hash256};

/// The chain tip as seen by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipInfo {
    pub height: u64,
    pub hash: Hash256,
}

/// Read-only chain state and mining-gate signals.
pub trait ChainView: Send + Sync {
    /// Current best tip, or `None` before the chain has one.
    fn tip(&self) -> Option<TipInfo>;

    /// True while the node is still catching up with the network. Mining
    /// during initial sync wastes work on an abandoned branch.
    fn is_initial_block_download(&self) -> bool;

    /// Number of connected peers.
    fn peer_count(&self) -> usize;

    /// Hash of the block at `seed_height`, used to key the hash oracle.
    /// Returns `None` when the block is not available yet.
    fn seed_digest(&self, seed_height: u64) -> Option<Hash256>;
}

/// A candidate block assembled by the node from the mempool plus a coinbase
/// paying the configured script.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: Block,
}

/// Produces candidate blocks on demand from current chain state.
pub trait TemplateSource: Send + Sync {
    /// May fail transiently (mempool lock contention, chain reorg in
    /// progress); the coordinator backs off and retries on `None`.
    fn create_new_block(&self, coinbase_script: &[u8]) -> Option<BlockTemplate>;
}

/// Three-way result of handing a solved block to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Connected as the new tip.
    Accepted,
    /// Already known (usually raced against a relayed copy of itself).
    Duplicate,
    /// Failed validation or lost a race against a competing block.
    Rejected,
}

/// Hands solved blocks to the node's block-processing path.
pub trait BlockSubmitter: Send + Sync {
    /// Synchronous; the node applies its own locking discipline.
    fn submit_block(&self, block: &Block) -> SubmitOutcome;
}
