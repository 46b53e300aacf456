//! The memory-hard hash oracle owned by each worker.
//!
//! An oracle is a virtual machine keyed by a rotating seed digest. Fast mode
//! holds the full dataset (~2 GiB) for mining-speed hashing; light mode holds
//! only the cache (~256 MiB) and hashes an order of magnitude slower.
//! Initialization for a new seed can take seconds, which is why the engine
//! keys it off the published context instead of doing it eagerly.
//!
//! Oracles are not thread-safe and are never shared: each worker creates its
//! own through an [`OracleFactory`] inside its own thread.

use anyhow::Result;

use crate::types::Hash256;

pub trait HashOracle {
    /// The seed this oracle is currently initialized for, if any.
    fn seed_digest(&self) -> Option<Hash256>;

    /// (Re)initialize for `seed_digest`. Idempotent for the current seed.
    /// May take seconds and allocate hundreds of MiB.
    fn initialize(&mut self, seed_digest: Hash256) -> Result<()>;

    /// Hash `input` under the initialized seed. Pure with respect to the
    /// seed; `&mut self` because the underlying VM keeps scratch state.
    fn hash(&mut self, input: &[u8]) -> Result<Hash256>;

    fn has_seed(&self, seed_digest: &Hash256) -> bool {
        self.seed_digest().as_ref() == Some(seed_digest)
    }
}

/// Creates one oracle per worker. The factory crosses thread boundaries;
/// the oracles it creates do not.
pub trait OracleFactory: Send + Sync {
    fn create(&self, fast_mode: bool) -> Box<dyn HashOracle>;
}

#[cfg(feature = "randomx")]
pub use self::randomx::{RandomxOracle, RandomxOracleFactory};

#[cfg(feature = "randomx")]
mod randomx {
    use anyhow::{anyhow, Result};
    use randomx_rs::{RandomXCache, RandomXDataset, RandomXFlag, RandomXVM};

    use super::{HashOracle, OracleFactory};
    use crate::types::Hash256;

    /// Production oracle backed by a RandomX VM.
    ///
    /// Fast mode precomputes the full dataset from the cache; light mode runs
    /// straight off the cache. Seed rotation reinitializes in place rather
    /// than rebuilding the VM.
    pub struct RandomxOracle {
        fast_mode: bool,
        flags: RandomXFlag,
        state: Option<VmState>,
    }

    struct VmState {
        vm: RandomXVM,
        seed: Hash256,
    }

    impl RandomxOracle {
        pub fn new(fast_mode: bool) -> Self {
            let mut flags = RandomXFlag::get_recommended_flags();
            if fast_mode {
                flags |= RandomXFlag::FLAG_FULL_MEM;
            }
            Self {
                fast_mode,
                flags,
                state: None,
            }
        }
    }

    impl HashOracle for RandomxOracle {
        fn seed_digest(&self) -> Option<Hash256> {
            self.state.as_ref().map(|s| s.seed)
        }

        fn initialize(&mut self, seed_digest: Hash256) -> Result<()> {
            if self.has_seed(&seed_digest) {
                return Ok(());
            }

            let cache = RandomXCache::new(self.flags, seed_digest.as_bytes())
                .map_err(|e| anyhow!("oracle cache init failed: {e}"))?;
            let (cache, dataset) = if self.fast_mode {
                let dataset = RandomXDataset::new(self.flags, cache, 0)
                    .map_err(|e| anyhow!("oracle dataset init failed: {e}"))?;
                (None, Some(dataset))
            } else {
                (Some(cache), None)
            };

            if let Some(state) = self.state.as_mut() {
                if let Some(dataset) = dataset {
                    state
                        .vm
                        .reinit_dataset(dataset)
                        .map_err(|e| anyhow!("oracle dataset reinit failed: {e}"))?;
                } else if let Some(cache) = cache {
                    state
                        .vm
                        .reinit_cache(cache)
                        .map_err(|e| anyhow!("oracle cache reinit failed: {e}"))?;
                }
                state.seed = seed_digest;
            } else {
                let vm = RandomXVM::new(self.flags, cache, dataset)
                    .map_err(|e| anyhow!("oracle VM init failed: {e}"))?;
                self.state = Some(VmState {
                    vm,
                    seed: seed_digest,
                });
            }
            Ok(())
        }

        fn hash(&mut self, input: &[u8]) -> Result<Hash256> {
            let state = self
                .state
                .as_ref()
                .ok_or_else(|| anyhow!("oracle used before initialization"))?;
            let result = state
                .vm
                .calculate_hash(input)
                .map_err(|e| anyhow!("oracle hash failed: {e}"))?;
            if result.len() != 32 {
                return Err(anyhow!(
                    "oracle hash returned {} bytes, expected 32",
                    result.len()
                ));
            }
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&result);
            Ok(Hash256(digest))
        }
    }

    pub struct RandomxOracleFactory;

    impl OracleFactory for RandomxOracleFactory {
        fn create(&self, fast_mode: bool) -> Box<dyn HashOracle> {
            Box::new(RandomxOracle::new(fast_mode))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FixedOracle {
        seed: Option<Hash256>,
    }

    impl HashOracle for FixedOracle {
        fn seed_digest(&self) -> Option<Hash256> {
            self.seed
        }

        fn initialize(&mut self, seed_digest: Hash256) -> Result<()> {
            self.seed = Some(seed_digest);
            Ok(())
        }

        fn hash(&mut self, input: &[u8]) -> Result<Hash256> {
            if self.seed.is_none() {
                return Err(anyhow!("uninitialized"));
            }
            let mut out = [0u8; 32];
            for (i, byte) in input.iter().enumerate() {
                out[i % 32] ^= byte;
            }
            Ok(Hash256(out))
        }
    }

    #[test]
    fn has_seed_matches_only_current_seed() {
        let mut oracle = FixedOracle { seed: None };
        let a = Hash256([0xAA; 32]);
        let b = Hash256([0xBB; 32]);

        assert!(!oracle.has_seed(&a));
        oracle.initialize(a).expect("init");
        assert!(oracle.has_seed(&a));
        assert!(!oracle.has_seed(&b));
    }

    #[test]
    fn hash_before_initialize_fails() {
        let mut oracle = FixedOracle { seed: None };
        assert!(oracle.hash(b"header").is_err());
    }

    #[cfg(feature = "randomx")]
    mod randomx_backed {
        use super::super::*;

        #[test]
        fn light_mode_hash_is_deterministic() {
            let mut oracle = RandomxOracle::new(false);
            oracle.initialize(Hash256([0xAA; 32])).expect("init");
            let h1 = oracle.hash(b"test input").expect("hash");
            let h2 = oracle.hash(b"test input").expect("hash");
            assert_eq!(h1, h2);
            assert!(!h1.is_zero());
        }

        #[test]
        fn seed_rotation_changes_output() {
            let mut oracle = RandomxOracle::new(false);
            oracle.initialize(Hash256([0xAA; 32])).expect("init");
            let before = oracle.hash(b"test").expect("hash");
            oracle.initialize(Hash256([0xBB; 32])).expect("reinit");
            let after = oracle.hash(b"test").expect("hash");
            assert_ne!(before, after);
        }
    }
}
