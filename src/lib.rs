//! In-process mining engine for the Weirnet node.
//!
//! One coordinator thread tracks the chain tip and produces block templates;
//! N worker threads each own a memory-hard hash oracle and grind disjoint
//! nonce strides against the latest published template. The node plugs in
//! through the trait seams in [`node`] and wires its block notifications to a
//! [`TipWatcher`].

pub mod config;
pub mod miner;
pub mod node;
pub mod oracle;
pub mod types;

pub use config::{CpuAffinityMode, MinerConfig};
pub use miner::{format_hashrate, Miner, MiningContext, StatsSnapshot, TipWatcher};
pub use node::{
    BlockSubmitter, BlockTemplate, ChainView, SubmitOutcome, TemplateSource, TipInfo,
};
pub use oracle::{HashOracle, OracleFactory};
pub use types::{merkle_root, Block, BlockHeader, Hash256};
