//! Multi-element proofs keyed by an explicit descending index list.
//!
//! Decommitments appear in sweep order: deepest level first and, within a
//! level, right to left. The verifier keeps a ring of `(node, value)` pairs
//! no larger than the number of proven elements and folds it towards the
//! root, pairing each node with the next live node when they are siblings
//! and with the next decommitment otherwise.

use bincode::{Decode, Encode};
use tracing::{debug, trace};

use super::{Decommitments, Lane, Update, update_lanes};
use crate::{
    IndexOrder, MerkleError, TreeOptions,
    hash::{Hash, NodeHasher, decode_count, encode_count},
    ring::RingBuffer,
    tree::{SerializedTree, leaf_count_for, node_exists},
};

/// Proof for the elements at `indices`.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexedMultiProof {
    /// Element count of the tree the proof was generated against.
    pub element_count: usize,
    /// Strictly descending.
    pub indices: Vec<usize>,
    /// One per index, same order.
    pub elements: Vec<Vec<u8>>,
    /// Sibling nodes in sweep order.
    pub decommitments: Vec<Hash>,
}

pub(crate) fn generate_decommitments(
    tree: &SerializedTree,
    indices: &[usize],
) -> Result<Vec<Hash>, MerkleError> {
    IndexOrder::Descending.validate(indices, tree.element_count())?;
    let sweep = super::Sweep::run(tree.leaf_count(), tree.element_count(), indices);
    let decommitments = sweep
        .decommitment_nodes
        .iter()
        .map(|&node| tree.known_node(node).copied())
        .collect::<Result<Vec<_>, _>>()?;
    debug!(
        element_count = tree.element_count(),
        indices = indices.len(),
        decommitments = decommitments.len(),
        "generated indexed multi proof"
    );
    Ok(decommitments)
}

pub(crate) fn fold_indexed<L: Lane>(
    element_count: usize,
    indices: &[usize],
    leafs: Vec<L>,
    decommitments: &[Hash],
    hasher: NodeHasher,
) -> Result<L, MerkleError> {
    IndexOrder::Descending.validate(indices, element_count)?;
    if leafs.len() != indices.len() {
        return Err(MerkleError::InvalidInput(format!(
            "{} elements for {} indices",
            leafs.len(),
            indices.len()
        )));
    }
    let leaf_count = leaf_count_for(element_count)?;
    let mut live = RingBuffer::with_capacity(indices.len());
    for (&index, leaf) in indices.iter().zip(leafs) {
        live.push_back((leaf_count + index, leaf))?;
    }
    let mut decommitments = Decommitments::new(decommitments);

    loop {
        let (node, value) = live.pop_front()?;
        if node == 1 {
            if !live.is_empty() {
                return Err(MerkleError::InvalidProof(
                    "nodes left over after reaching the root".to_string(),
                ));
            }
            decommitments.finish()?;
            return Ok(value);
        }
        let parent = if node & 1 == 1 {
            let left_is_live = matches!(live.front(), Some((next, _)) if *next == node - 1);
            if left_is_live {
                let (_, left) = live.pop_front()?;
                L::join(&left, &value, hasher)
            } else {
                L::join(&L::lift(decommitments.take_front()?), &value, hasher)
            }
        } else if node_exists(leaf_count, element_count, node + 1) {
            L::join(&value, &L::lift(decommitments.take_front()?), hasher)
        } else {
            value
        };
        live.push_back((node >> 1, parent))?;
    }
}

impl IndexedMultiProof {
    /// Root implied by the proof.
    pub fn compute_root(&self, options: &TreeOptions) -> Result<Hash, MerkleError> {
        fold_indexed(
            self.element_count,
            &self.indices,
            options.leaf_hashes(&self.elements),
            &self.decommitments,
            options.hasher(),
        )
    }

    /// Whether the proof reproduces `expected_mixed_root`.
    pub fn verify(
        &self,
        expected_mixed_root: &Hash,
        options: &TreeOptions,
    ) -> Result<bool, MerkleError> {
        let root = self.compute_root(options)?;
        let computed = options.hasher().mix_root(self.element_count, &root);
        if &computed != expected_mixed_root {
            trace!(
                expected = hex::encode(expected_mixed_root),
                computed = hex::encode(computed),
                "indexed multi proof mismatch"
            );
        }
        Ok(&computed == expected_mixed_root)
    }

    /// Old and new roots when the proven elements are replaced by
    /// `new_elements` (same order as `indices`).
    pub fn compute_updated_root<E: AsRef<[u8]>>(
        &self,
        new_elements: &[E],
        options: &TreeOptions,
    ) -> Result<(Hash, Hash), MerkleError> {
        if new_elements.len() != self.elements.len() {
            return Err(MerkleError::InvalidInput(format!(
                "{} new elements for {} proven elements",
                new_elements.len(),
                self.elements.len()
            )));
        }
        let leafs = update_lanes(
            options.leaf_hashes(&self.elements),
            options.leaf_hashes(new_elements),
        );
        let Update { old, new } = fold_indexed(
            self.element_count,
            &self.indices,
            leafs,
            &self.decommitments,
            options.hasher(),
        )?;
        Ok((old, new))
    }

    /// Check the proof against `expected_mixed_root` and return the mixed
    /// root after the update.
    pub fn verify_update<E: AsRef<[u8]>>(
        &self,
        expected_mixed_root: &Hash,
        new_elements: &[E],
        options: &TreeOptions,
    ) -> Result<Hash, MerkleError> {
        let hasher = options.hasher();
        let (old_root, new_root) = self.compute_updated_root(new_elements, options)?;
        if &hasher.mix_root(self.element_count, &old_root) != expected_mixed_root {
            return Err(MerkleError::InvalidProof(
                "indexed multi proof does not match the trusted root".to_string(),
            ));
        }
        Ok(hasher.mix_root(self.element_count, &new_root))
    }

    /// `[count, decommitments...]`
    pub fn to_words(&self) -> Vec<Hash> {
        let mut words = Vec::with_capacity(self.decommitments.len() + 1);
        words.push(encode_count(self.element_count));
        words.extend_from_slice(&self.decommitments);
        words
    }

    /// Inverse of [`Self::to_words`]. Indices and elements travel
    /// separately.
    pub fn from_words(
        indices: Vec<usize>,
        elements: Vec<Vec<u8>>,
        words: &[Hash],
    ) -> Result<Self, MerkleError> {
        let (count, decommitments) = words
            .split_first()
            .ok_or_else(|| MerkleError::InvalidProof("missing count word".to_string()))?;
        Ok(Self {
            element_count: decode_count(count)?,
            indices,
            elements,
            decommitments: decommitments.to_vec(),
        })
    }
}
