//! Tree configuration.

use crate::hash::{Hash, NodeHasher, hash_leaf};

/// Settings shared by tree construction, proof generation and verification.
///
/// A verifier must use the same options as the prover; they are not carried
/// inside proofs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeOptions {
    /// Commutative node hashing. Required for flag encoded and combined
    /// multi proofs.
    pub sorted_hash: bool,
    /// Allow element counts that are not a power of two, and appends.
    pub unbalanced: bool,
    /// Domain-separation prefix hashed in front of every element.
    pub element_prefix: Vec<u8>,
    /// Emit index-keyed multi proofs instead of flag encoded ones.
    pub indexed: bool,
    /// Pack flag proofs into single 256-bit words.
    pub compact: bool,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            sorted_hash: true,
            unbalanced: true,
            element_prefix: vec![0x00],
            indexed: false,
            compact: false,
        }
    }
}

impl TreeOptions {
    /// Set [`Self::sorted_hash`].
    pub fn with_sorted_hash(mut self, sorted_hash: bool) -> Self {
        self.sorted_hash = sorted_hash;
        self
    }

    /// Set [`Self::unbalanced`].
    pub fn with_unbalanced(mut self, unbalanced: bool) -> Self {
        self.unbalanced = unbalanced;
        self
    }

    /// Set [`Self::element_prefix`].
    pub fn with_element_prefix(mut self, element_prefix: impl Into<Vec<u8>>) -> Self {
        self.element_prefix = element_prefix.into();
        self
    }

    /// Set [`Self::indexed`].
    pub fn with_indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    /// Set [`Self::compact`].
    pub fn with_compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    /// Node combine these options select.
    pub fn hasher(&self) -> NodeHasher {
        NodeHasher::new(self.sorted_hash)
    }

    /// Leaf value of `element`: its hash behind the element prefix.
    pub fn leaf_hash(&self, element: &[u8]) -> Hash {
        hash_leaf(&self.element_prefix, element)
    }

    pub(crate) fn leaf_hashes<E: AsRef<[u8]>>(&self, elements: &[E]) -> Vec<Hash> {
        elements.iter().map(|e| self.leaf_hash(e.as_ref())).collect()
    }
}
