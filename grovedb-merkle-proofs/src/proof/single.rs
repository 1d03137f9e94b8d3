//! Single-element inclusion proofs.
//!
//! The decommitments are the siblings along the leaf's path, stored from the
//! one nearest the root down to the leaf's own sibling. Levels where the
//! path node is the last node and has no right sibling contribute nothing.

use bincode::{Decode, Encode};
use tracing::{debug, trace};

use super::{Decommitments, Lane, Update};
use crate::{
    MerkleError, TreeOptions,
    hash::{Hash, NodeHasher, decode_count, encode_count},
    tree::{SerializedTree, depth_for},
};

/// Proof that one element sits at `index`.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SingleProof {
    /// Element count of the tree the proof was generated against.
    pub element_count: usize,
    /// Position of the proven element.
    pub index: usize,
    /// The proven element.
    pub element: Vec<u8>,
    /// Root-most sibling first.
    pub decommitments: Vec<Hash>,
}

/// Collect the sibling path of `index` from a (possibly partial) tree.
pub(crate) fn generate_decommitments(
    tree: &SerializedTree,
    index: usize,
) -> Result<Vec<Hash>, MerkleError> {
    let element_count = tree.element_count();
    if index >= element_count {
        return Err(MerkleError::IndexOutOfRange {
            index,
            element_count,
        });
    }
    let decommitments = decommitment_nodes(tree.leaf_count(), element_count, index)
        .into_iter()
        .map(|node| tree.known_node(node).copied())
        .collect::<Result<Vec<_>, _>>()?;
    debug!(
        element_count,
        index,
        decommitments = decommitments.len(),
        "generated single proof"
    );
    Ok(decommitments)
}

/// Sibling node indices matching [`generate_decommitments`], root-most first.
pub(crate) fn decommitment_nodes(
    leaf_count: usize,
    element_count: usize,
    index: usize,
) -> Vec<usize> {
    let mut nodes = Vec::new();
    let mut node = leaf_count + index;
    let mut position = index;
    let mut last = element_count - 1;
    while node > 1 {
        if position & 1 == 1 || position < last {
            nodes.push(node ^ 1);
        }
        node >>= 1;
        position >>= 1;
        last >>= 1;
    }
    nodes.reverse();
    nodes
}

/// Fold a leaf up to the root. `on_level` sees the accumulated value at
/// every height, from the leaf (height 0) to the root.
pub(crate) fn fold_single<L: Lane>(
    element_count: usize,
    index: usize,
    leaf: L,
    decommitments: &[Hash],
    hasher: NodeHasher,
    mut on_level: impl FnMut(u32, &L),
) -> Result<L, MerkleError> {
    if index >= element_count {
        return Err(MerkleError::IndexOutOfRange {
            index,
            element_count,
        });
    }
    let depth = depth_for(element_count)?;
    let mut decommitments = Decommitments::new(decommitments);
    let mut value = leaf;
    let mut position = index;
    let mut last = element_count - 1;
    for height in 0..depth {
        on_level(height, &value);
        if position & 1 == 1 {
            value = L::join(&L::lift(decommitments.take_back()?), &value, hasher);
        } else if position < last {
            value = L::join(&value, &L::lift(decommitments.take_back()?), hasher);
        }
        position >>= 1;
        last >>= 1;
    }
    on_level(depth, &value);
    decommitments.finish()?;
    Ok(value)
}

impl SingleProof {
    /// Root implied by the proof.
    pub fn compute_root(&self, options: &TreeOptions) -> Result<Hash, MerkleError> {
        fold_single(
            self.element_count,
            self.index,
            options.leaf_hash(&self.element),
            &self.decommitments,
            options.hasher(),
            |_, _| {},
        )
    }

    /// [`Self::compute_root`] with the element count mixed in.
    pub fn compute_mixed_root(&self, options: &TreeOptions) -> Result<Hash, MerkleError> {
        let root = self.compute_root(options)?;
        Ok(options.hasher().mix_root(self.element_count, &root))
    }

    /// Whether the proof reproduces `expected_mixed_root`.
    pub fn verify(
        &self,
        expected_mixed_root: &Hash,
        options: &TreeOptions,
    ) -> Result<bool, MerkleError> {
        let computed = self.compute_mixed_root(options)?;
        if &computed != expected_mixed_root {
            trace!(
                expected = hex::encode(expected_mixed_root),
                computed = hex::encode(computed),
                "single proof mismatch"
            );
        }
        Ok(&computed == expected_mixed_root)
    }

    /// Old and new roots when the proven element is replaced by
    /// `new_element`, computed in one pass.
    pub fn compute_updated_root(
        &self,
        new_element: &[u8],
        options: &TreeOptions,
    ) -> Result<(Hash, Hash), MerkleError> {
        let leaf = Update {
            old: options.leaf_hash(&self.element),
            new: options.leaf_hash(new_element),
        };
        let roots = fold_single(
            self.element_count,
            self.index,
            leaf,
            &self.decommitments,
            options.hasher(),
            |_, _| {},
        )?;
        Ok((roots.old, roots.new))
    }

    /// Check the proof against `expected_mixed_root` and return the mixed
    /// root after replacing the element with `new_element`.
    pub fn verify_update(
        &self,
        expected_mixed_root: &Hash,
        new_element: &[u8],
        options: &TreeOptions,
    ) -> Result<Hash, MerkleError> {
        let hasher = options.hasher();
        let (old_root, new_root) = self.compute_updated_root(new_element, options)?;
        if &hasher.mix_root(self.element_count, &old_root) != expected_mixed_root {
            return Err(MerkleError::InvalidProof(
                "single proof does not match the trusted root".to_string(),
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

    /// Inverse of [`Self::to_words`]. Index and element travel separately.
    pub fn from_words(index: usize, element: Vec<u8>, words: &[Hash]) -> Result<Self, MerkleError> {
        let (count, decommitments) = words
            .split_first()
            .ok_or_else(|| MerkleError::InvalidProof("missing count word".to_string()))?;
        Ok(Self {
            element_count: decode_count(count)?,
            index,
            element,
            decommitments: decommitments.to_vec(),
        })
    }
}
