use std::fmt;

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use weirnet_pow_spec::POW_HEADER_LEN;

/// A 32-byte hash (block hash, merkle root, txid, or oracle seed digest).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// First eight bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", hex::encode(self.0))
    }
}

/// Block header in the fixed 80-byte wire layout.
///
/// The nonce occupies the last four bytes of the serialized form and is the
/// only field the miner mutates while grinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn serialize(&self) -> [u8; POW_HEADER_LEN] {
        let mut out = [0u8; POW_HEADER_LEN];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != POW_HEADER_LEN {
            bail!(
                "header must be {} bytes, got {}",
                POW_HEADER_LEN,
                bytes.len()
            );
        }

        let mut prev_hash = [0u8; 32];
        prev_hash.copy_from_slice(&bytes[4..36]);
        let mut merkle_root = [0u8; 32];
        merkle_root.copy_from_slice(&bytes[36..68]);

        Ok(Self {
            version: i32::from_le_bytes(bytes[0..4].try_into()?),
            prev_hash: Hash256(prev_hash),
            merkle_root: Hash256(merkle_root),
            time: u32::from_le_bytes(bytes[68..72].try_into()?),
            bits: u32::from_le_bytes(bytes[72..76].try_into()?),
            nonce: u32::from_le_bytes(bytes[76..80].try_into()?),
        })
    }

    /// Double-SHA256 of the serialized header; identifies the block.
    pub fn block_hash(&self) -> Hash256 {
        Hash256(double_sha256(&self.serialize()))
    }
}

/// A candidate block: header plus the txids committed by the merkle root.
///
/// The miner never interprets transactions; the body travels opaquely from
/// the template source to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txids: Vec<Hash256>,
}

impl Block {
    /// Recompute the header's merkle commitment from the txid list.
    pub fn recompute_merkle_root(&mut self) {
        self.header.merkle_root = merkle_root(&self.txids);
    }
}

/// Bitcoin-style merkle root over txids: double-SHA256 pairing, odd layers
/// duplicate their last element, a single txid is its own root, and an empty
/// list yields the zero hash.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return Hash256::ZERO;
    }

    let mut layer: Vec<Hash256> = txids.to_vec();
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        for pair in layer.chunks(2) {
            let left = pair[0];
            let right = *pair.get(1).unwrap_or(&left);
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(left.as_bytes());
            buf[32..].copy_from_slice(right.as_bytes());
            next.push(Hash256(double_sha256(&buf)));
        }
        layer = next;
    }
    layer[0]
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> Hash256 {
        Hash256([byte; 32])
    }

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 2,
            prev_hash: h(0xAA),
            merkle_root: h(0xBB),
            time: 1_700_000_000,
            bits: 0x1d00ffff,
            nonce: 0xdeadbeef,
        }
    }

    #[test]
    fn header_serializes_to_80_bytes_with_trailing_nonce() {
        let header = sample_header();
        let bytes = header.serialize();
        assert_eq!(bytes.len(), POW_HEADER_LEN);
        assert_eq!(&bytes[76..80], &0xdeadbeefu32.to_le_bytes());
    }

    #[test]
    fn header_round_trip_preserves_all_fields() {
        let header = sample_header();
        let decoded = BlockHeader::deserialize(&header.serialize()).expect("round trip");
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_deserialize_rejects_wrong_length() {
        assert!(BlockHeader::deserialize(&[0u8; 79]).is_err());
        assert!(BlockHeader::deserialize(&[0u8; 81]).is_err());
    }

    #[test]
    fn nonce_is_the_only_field_that_moves_during_grinding() {
        let mut a = sample_header();
        let before = a.serialize();
        a.nonce = a.nonce.wrapping_add(1);
        let after = a.serialize();
        assert_eq!(&before[..76], &after[..76]);
        assert_ne!(&before[76..], &after[76..]);
    }

    #[test]
    fn merkle_root_empty_and_single() {
        assert_eq!(merkle_root(&[]), Hash256::ZERO);
        assert_eq!(merkle_root(&[h(0x42)]), h(0x42));
    }

    #[test]
    fn merkle_root_pairs_and_duplicates_odd_tail() {
        let two = merkle_root(&[h(1), h(2)]);
        let three = merkle_root(&[h(1), h(2), h(3)]);
        assert_ne!(two, three);
        // Odd layer duplicates the last element: [a, b, c] == [a, b, c, c].
        assert_eq!(three, merkle_root(&[h(1), h(2), h(3), h(3)]));
    }

    #[test]
    fn merkle_root_order_matters() {
        assert_ne!(merkle_root(&[h(1), h(2)]), merkle_root(&[h(2), h(1)]));
    }

    #[test]
    fn recompute_merkle_root_updates_header() {
        let mut block = Block {
            header: sample_header(),
            txids: vec![h(0x01), h(0x02)],
        };
        block.recompute_merkle_root();
        assert_eq!(block.header.merkle_root, merkle_root(&block.txids));
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let mut header = sample_header();
        let first = header.block_hash();
        header.nonce ^= 1;
        assert_ne!(first, header.block_hash());
    }

    #[test]
    fn hash256_display_and_short() {
        let hash = h(0xAB);
        assert_eq!(format!("{hash}").len(), 64);
        assert_eq!(hash.short(), "abababababababab");
    }
}
