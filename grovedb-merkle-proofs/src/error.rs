//! Error types for tree construction, proof generation and verification.

use std::collections::BTreeSet;

use thiserror::Error;

/// Errors from Merkle tree construction, proof generation and verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    /// An index does not address an element of the tree.
    #[error("index {index} is out of range (element count {element_count})")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of elements in the tree.
        element_count: usize,
    },
    /// An index list is not strictly ordered the way the operation needs.
    #[error("indices must be strictly {expected}")]
    InvalidIndexOrder {
        /// The order the operation expects.
        expected: IndexOrder,
    },
    /// An index appears more than once in an index list.
    #[error("duplicate index {0}")]
    DuplicateIndex(usize),
    /// A balanced tree was asked to hold a non power of two element count.
    #[error("element count {element_count} is not a power of two in a balanced tree")]
    SizeMismatch {
        /// The rejected element count.
        element_count: usize,
    },
    /// Appending needs an unbalanced tree.
    #[error("balanced trees cannot be appended to")]
    BalancedTreeNotAppendable,
    /// A combined proof must reach into the smallest frontier subtree.
    #[error("index {index} is below the minimum combined index {minimum}")]
    IndexBelowCombinedThreshold {
        /// Largest index of the proof.
        index: usize,
        /// Smallest index that still reaches the frontier.
        minimum: usize,
    },
    /// Too many hash steps for the packed flag encoding.
    #[error("proof needs {hash_count} hash steps, packed flags hold at most {capacity}")]
    ProofTooLarge {
        /// Hash steps the proof needs.
        hash_count: usize,
        /// Hash steps the packed words can describe.
        capacity: usize,
    },
    /// A partial tree lacks the data an operation needs about this element.
    #[error("element {0} is not known to this tree")]
    UnknownElement(usize),
    /// Flag encoded proofs only work with the commutative node hash.
    #[error("flag encoded proofs require sorted hashing")]
    SortedHashRequired,
    /// Caller supplied arguments that do not fit together.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A proof is malformed or does not match the trusted root.
    #[error("invalid proof: {0}")]
    InvalidProof(String),
    /// Bincode encoding or decoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Ordering a list of indices must follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrder {
    /// Strictly increasing, used by flag and combined proofs.
    Ascending,
    /// Strictly decreasing, used by indexed proofs.
    Descending,
}

impl std::fmt::Display for IndexOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexOrder::Ascending => write!(f, "ascending"),
            IndexOrder::Descending => write!(f, "descending"),
        }
    }
}

impl IndexOrder {
    /// Check that `indices` is non-empty and strictly ordered. Range and
    /// duplicates are checked element by element before the order, so a
    /// repeated index is a [`MerkleError::DuplicateIndex`] wherever it sits.
    pub(crate) fn validate(
        self,
        indices: &[usize],
        element_count: usize,
    ) -> Result<(), MerkleError> {
        if indices.is_empty() {
            return Err(MerkleError::InvalidInput("no indices given".to_string()));
        }
        let mut seen = BTreeSet::new();
        for &index in indices {
            if index >= element_count {
                return Err(MerkleError::IndexOutOfRange {
                    index,
                    element_count,
                });
            }
            if !seen.insert(index) {
                return Err(MerkleError::DuplicateIndex(index));
            }
        }
        let ordered = indices.windows(2).all(|pair| match self {
            IndexOrder::Ascending => pair[0] < pair[1],
            IndexOrder::Descending => pair[0] > pair[1],
        });
        if !ordered {
            return Err(MerkleError::InvalidIndexOrder { expected: self });
        }
        Ok(())
    }
}
