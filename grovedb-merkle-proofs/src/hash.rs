//! Hash primitives.
//!
//! - Leaf: `blake3(element_prefix || element)`
//! - Node: `blake3(left || right)`, or with sorted hashing the lesser operand
//!   first so the combine is commutative
//! - Mixed root: `combine(encode_count(element_count), root)`

use crate::MerkleError;

/// A 32-byte Blake3 digest.
pub type Hash = [u8; 32];

/// Root of an empty tree.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Order-sensitive combine: `blake3(left || right)`.
pub fn hash_node(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// Commutative combine: the two operands are ordered by byte value first.
pub fn hash_node_sorted(a: &Hash, b: &Hash) -> Hash {
    if a <= b {
        hash_node(a, b)
    } else {
        hash_node(b, a)
    }
}

/// Hash an element into a leaf under a domain-separation prefix.
pub fn hash_leaf(prefix: &[u8], element: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prefix);
    hasher.update(element);
    *hasher.finalize().as_bytes()
}

/// 32-byte big-endian encoding of a count or index.
pub fn encode_count(count: usize) -> Hash {
    let mut word = ZERO_HASH;
    word[24..].copy_from_slice(&(count as u64).to_be_bytes());
    word
}

/// Inverse of [`encode_count`]. Rejects words that do not fit in a `u64`.
pub fn decode_count(word: &Hash) -> Result<usize, MerkleError> {
    if word[..24].iter().any(|&b| b != 0) {
        return Err(MerkleError::InvalidProof(format!(
            "count word {} overflows",
            hex::encode(word)
        )));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(bytes))
        .map_err(|_| MerkleError::InvalidProof("count does not fit in usize".to_string()))
}

/// The node combine a tree was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHasher {
    sorted: bool,
}

impl NodeHasher {
    /// Hasher using [`hash_node_sorted`] when `sorted`, else [`hash_node`].
    pub fn new(sorted: bool) -> Self {
        Self { sorted }
    }

    /// Whether the combine is commutative.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Parent of `left` and `right`.
    pub fn combine(&self, left: &Hash, right: &Hash) -> Hash {
        if self.sorted {
            hash_node_sorted(left, right)
        } else {
            hash_node(left, right)
        }
    }

    /// Combine two optional nodes. An absent operand is the identity, so a
    /// lone child passes through unchanged.
    pub fn combine_optional(&self, left: Option<&Hash>, right: Option<&Hash>) -> Option<Hash> {
        match (left, right) {
            (Some(left), Some(right)) => Some(self.combine(left, right)),
            (Some(only), None) | (None, Some(only)) => Some(*only),
            (None, None) => None,
        }
    }

    /// Bind the element count into the root.
    pub fn mix_root(&self, element_count: usize, root: &Hash) -> Hash {
        self.combine(&encode_count(element_count), root)
    }
}
