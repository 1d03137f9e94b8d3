//! Append-friendly binary Merkle trees with compact proofs, using Blake3.
//!
//! A tree over `n` elements lives in an array of `2 * next_power_of_two(n)`
//! node slots. Elements are hashed with a domain-separation prefix, nodes
//! combine their children (optionally in sorted order), and a node whose
//! right child lies past the last element takes its left child unchanged.
//! The trusted commitment is the mixed root, `combine(encode_count(n), root)`.
//!
//! # Proofs
//!
//! - [`SingleProof`]: one element, its sibling path.
//! - [`IndexedMultiProof`]: several elements keyed by descending indices.
//! - [`FlagMultiProof`]: several elements driven by flag bits (sorted
//!   hashing only), optionally packed into 256-bit words.
//! - [`AppendProof`]: the frontier, enough to append one or many elements.
//! - [`CombinedProof`]: prove or update elements and append in one pass.
//!
//! Every proof can also check an update of the elements it proves, and
//! [`PartialMerkleTree`] rebuilds a sparse tree from any of them.

#![warn(missing_docs)]

mod error;
pub mod hash;
mod merkle_tree;
mod options;
mod partial;
pub mod proof;
pub(crate) mod ring;
pub mod tree;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
#[cfg(test)]
mod tests;

pub use error::{IndexOrder, MerkleError};
pub use hash::{Hash, NodeHasher, ZERO_HASH, encode_count, hash_leaf, hash_node, hash_node_sorted};
pub use merkle_tree::MerkleTree;
pub use options::TreeOptions;
pub use partial::PartialMerkleTree;
pub use proof::{
    AppendProof, CombinedProof, FlagBits, FlagMultiProof, IndexedMultiProof, MAX_PACKED_HASH_COUNT,
    Proof, ProofKind, SingleProof, get_minimum_combined_index,
};
pub use tree::SerializedTree;
