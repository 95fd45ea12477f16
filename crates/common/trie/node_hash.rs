use bytes::BufMut;
use ethereum_types::H256;
use flatstate_rlp::encode::RLPEncode;

use crate::keccak;

/// Reference to a trie node as it appears inside its parent: nodes whose RLP
/// is shorter than 32 bytes are embedded verbatim, everything else is
/// referenced by its keccak hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeHash {
    Hashed(H256),
    Inline(([u8; 31], u8)),
}

impl NodeHash {
    pub fn from_encoded(encoded: &[u8]) -> Self {
        if encoded.len() < 32 {
            let mut data = [0u8; 31];
            data[..encoded.len()].copy_from_slice(encoded);
            NodeHash::Inline((data, encoded.len() as u8))
        } else {
            NodeHash::Hashed(keccak(encoded))
        }
    }

    /// The hash of the referenced node, forced even for inline references.
    /// Trie roots and the storage-root field of an account are always the
    /// keccak of the node RLP, regardless of its size.
    pub fn finalize(&self) -> H256 {
        match self {
            NodeHash::Hashed(hash) => *hash,
            NodeHash::Inline((data, len)) => keccak(&data[..*len as usize]),
        }
    }

    /// Writes the child reference as it is embedded in a parent node: the raw
    /// RLP for inline references, the hash as a 32-byte string otherwise.
    pub fn encode_child_ref(&self, buf: &mut dyn BufMut) {
        match self {
            NodeHash::Hashed(hash) => hash.encode(buf),
            NodeHash::Inline((data, len)) => buf.put_slice(&data[..*len as usize]),
        }
    }

    /// Length of the child reference written by [`Self::encode_child_ref`].
    pub fn child_ref_len(&self) -> usize {
        match self {
            NodeHash::Hashed(_) => 33,
            NodeHash::Inline((_, len)) => *len as usize,
        }
    }
}
