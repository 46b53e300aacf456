//! Consensus-fixed proof-of-work parameters for Weirnet.
//!
//! Everything here is shared verbatim between the node's validation path and
//! the in-process miner: the header wire layout, the seed rotation schedule
//! for the memory-hard hash, compact difficulty decoding, and the memory
//! footprint of the two oracle modes. None of these values can change without
//! a hard fork, which is why they live in their own crate rather than in the
//! miner.

/// Serialized block header length in bytes.
///
/// Layout (little-endian): version(4) | prev_hash(32) | merkle_root(32) |
/// time(4) | bits(4) | nonce(4). The nonce is always the last four bytes.
pub const POW_HEADER_LEN: usize = 80;

/// Number of blocks that share a single oracle seed.
pub const EPOCH_LENGTH: u64 = 2048;

/// Blocks between the seed-defining block and the start of the epoch that
/// uses it, giving nodes time to pre-initialize the oracle dataset.
pub const EPOCH_LAG: u64 = 64;

/// Approximate memory held by one fast-mode oracle (full dataset).
pub const FAST_MODE_MEMORY_BYTES: u64 = 2080 * 1024 * 1024;

/// Approximate memory held by one light-mode oracle (cache only).
pub const LIGHT_MODE_MEMORY_BYTES: u64 = 256 * 1024 * 1024;

/// Height of the block whose hash seeds the oracle for a block at `height`.
///
/// For `height <= EPOCH_LAG` the genesis block (height 0) is the seed.
/// The seed advances when `(height - EPOCH_LAG - 1)` crosses an epoch
/// boundary, so an epoch's seed block is always at least `EPOCH_LAG` blocks
/// behind the first block that uses it.
pub fn seed_height(height: u64) -> u64 {
    if height > EPOCH_LAG {
        ((height - EPOCH_LAG - 1) / EPOCH_LENGTH) * EPOCH_LENGTH
    } else {
        0
    }
}

/// Expand a compact difficulty encoding into a 256-bit little-endian target.
///
/// Standard compact form: the high byte is a base-256 exponent, the low 23
/// bits are the mantissa, and `target = mantissa * 256^(exponent - 3)`.
/// Returns `None` when the sign bit is set or the value overflows 256 bits;
/// a zero mantissa yields the all-zero target (which no digest can meet).
pub fn expand_compact(bits: u32) -> Option<[u8; 32]> {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;

    let mut target = [0u8; 32];
    if mantissa == 0 {
        return Some(target);
    }
    if bits & 0x0080_0000 != 0 {
        return None;
    }
    if exponent > 34
        || (mantissa > 0xff && exponent > 33)
        || (mantissa > 0xffff && exponent > 32)
    {
        return None;
    }

    if exponent < 3 {
        let shifted = mantissa >> (8 * (3 - exponent));
        for (i, byte) in shifted.to_le_bytes().iter().take(3).enumerate() {
            target[i] = *byte;
        }
    } else {
        let offset = exponent - 3;
        for (i, byte) in mantissa.to_le_bytes().iter().take(3).enumerate() {
            if offset + i < 32 {
                target[offset + i] = *byte;
            }
        }
    }

    Some(target)
}

/// Test a digest against an expanded target.
///
/// Both sides are 256-bit little-endian integers; the digest wins ties.
pub fn digest_meets_target(digest: &[u8; 32], target: &[u8; 32]) -> bool {
    for i in (0..32).rev() {
        if digest[i] < target[i] {
            return true;
        }
        if digest[i] > target[i] {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_height_genesis_region() {
        assert_eq!(seed_height(0), 0);
        assert_eq!(seed_height(1), 0);
        assert_eq!(seed_height(EPOCH_LAG), 0);
        assert_eq!(seed_height(EPOCH_LAG + 1), 0);
    }

    #[test]
    fn seed_height_first_rotation() {
        // The seed block advances when (h - LAG - 1) crosses an epoch boundary.
        assert_eq!(seed_height(EPOCH_LENGTH + EPOCH_LAG), 0);
        assert_eq!(seed_height(EPOCH_LENGTH + EPOCH_LAG + 1), EPOCH_LENGTH);
        assert_eq!(seed_height(2 * EPOCH_LENGTH + EPOCH_LAG), EPOCH_LENGTH);
        assert_eq!(
            seed_height(2 * EPOCH_LENGTH + EPOCH_LAG + 1),
            2 * EPOCH_LENGTH
        );
    }

    #[test]
    fn seed_height_lag_and_alignment_invariants() {
        for height in (EPOCH_LAG + 1)..(EPOCH_LAG + 1 + 4 * EPOCH_LENGTH) {
            let seed = seed_height(height);
            assert_eq!(seed % EPOCH_LENGTH, 0, "unaligned seed at height {height}");
            assert!(
                height - seed - 1 >= EPOCH_LAG,
                "seed too recent at height {height}: {seed}"
            );
        }
    }

    #[test]
    fn expand_compact_places_mantissa_at_exponent_offset() {
        // 0x1d00ffff: mantissa 0x00ffff at byte offset 0x1d - 3 = 26.
        let target = expand_compact(0x1d00ffff).expect("valid compact bits");
        assert_eq!(target[26], 0xff);
        assert_eq!(target[27], 0xff);
        assert_eq!(target[28], 0x00);
        assert!(target[..26].iter().all(|b| *b == 0));
        assert!(target[28..].iter().all(|b| *b == 0));
    }

    #[test]
    fn expand_compact_small_exponent_shifts_mantissa_down() {
        // Exponent 2 divides the mantissa by 256.
        let target = expand_compact(0x02123456).expect("valid compact bits");
        assert_eq!(target[0], 0x34);
        assert_eq!(target[1], 0x12);
        assert!(target[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn expand_compact_zero_mantissa_is_zero_target() {
        assert_eq!(expand_compact(0x1d000000), Some([0u8; 32]));
        assert_eq!(expand_compact(0), Some([0u8; 32]));
    }

    #[test]
    fn expand_compact_rejects_sign_bit_and_overflow() {
        assert_eq!(expand_compact(0x04800001), None);
        assert_eq!(expand_compact(0x23000001), None);
        assert_eq!(expand_compact(0x22000100), None);
        assert_eq!(expand_compact(0x21010000), None);
        // Boundary cases that still fit.
        assert!(expand_compact(0x220000ff).is_some());
        assert!(expand_compact(0x2100ffff).is_some());
    }

    #[test]
    fn digest_meets_target_compares_little_endian() {
        let mut target = [0u8; 32];
        target[31] = 0x10;

        let mut below = [0xffu8; 32];
        below[31] = 0x0f;
        assert!(digest_meets_target(&below, &target));

        let mut above = [0u8; 32];
        above[31] = 0x11;
        assert!(!digest_meets_target(&above, &target));
    }

    #[test]
    fn digest_meets_target_ties_pass() {
        let target = expand_compact(0x1d00ffff).expect("valid compact bits");
        assert!(digest_meets_target(&target, &target));
    }

    #[test]
    fn zero_target_rejects_everything_but_zero() {
        let target = [0u8; 32];
        assert!(!digest_meets_target(&[1u8; 32], &target));
        assert!(digest_meets_target(&[0u8; 32], &target));
    }
}
