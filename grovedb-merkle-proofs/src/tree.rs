//! Array-backed complete binary tree.
//!
//! For `leaf_count = next_power_of_two(element_count)` the tree holds
//! `2 * leaf_count` slots: slot 0 is the mixed root, slot 1 the root, and
//! leaves sit at `[leaf_count, leaf_count + element_count)`. Node `i` has
//! children `2i` and `2i + 1`. A node whose right child lies past the last
//! element takes its left child's value unchanged.

use std::collections::BTreeSet;

use crate::{
    MerkleError,
    hash::{Hash, NodeHasher, ZERO_HASH},
};

/// Largest element count whose slot array can be indexed without overflow.
pub(crate) const MAX_ELEMENT_COUNT: usize = 1 << (usize::BITS - 2);

/// Leaf slots for `element_count` elements. Counts come from untrusted
/// proofs, so oversized ones are an invalid proof rather than an overflow.
pub(crate) fn leaf_count_for(element_count: usize) -> Result<usize, MerkleError> {
    if element_count > MAX_ELEMENT_COUNT {
        return Err(MerkleError::InvalidProof(format!(
            "element count {} exceeds {}",
            element_count, MAX_ELEMENT_COUNT
        )));
    }
    Ok(element_count.next_power_of_two())
}

pub(crate) fn depth_for(element_count: usize) -> Result<u32, MerkleError> {
    Ok(leaf_count_for(element_count)?.trailing_zeros())
}

/// Element count after adding `added` elements.
pub(crate) fn grown_count(element_count: usize, added: usize) -> Result<usize, MerkleError> {
    let grown = element_count.checked_add(added).ok_or_else(|| {
        MerkleError::InvalidProof(format!(
            "element count {} cannot grow by {}",
            element_count, added
        ))
    })?;
    leaf_count_for(grown)?;
    Ok(grown)
}

/// `len` copies of `value`, failing instead of aborting when the
/// allocation cannot be made.
pub(crate) fn try_filled<T: Clone>(value: T, len: usize) -> Result<Vec<T>, MerkleError> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(len)
        .map_err(|e| MerkleError::InvalidProof(format!("cannot allocate {} slots: {}", len, e)))?;
    slots.resize(len, value);
    Ok(slots)
}

/// Distance of `node` from the root. `node` must be at least 1.
pub(crate) fn level_from_top(node: usize) -> u32 {
    usize::BITS - 1 - node.leading_zeros()
}

/// Whether the subtree at `node` covers at least one element.
pub(crate) fn node_exists(leaf_count: usize, element_count: usize, node: usize) -> bool {
    let height = leaf_count.trailing_zeros() - level_from_top(node);
    (node << height) < leaf_count + element_count
}

/// Index of the leftmost element below `node`.
pub(crate) fn first_element_below(leaf_count: usize, node: usize) -> usize {
    let height = leaf_count.trailing_zeros() - level_from_top(node);
    (node << height) - leaf_count
}

/// A serialized tree. Slots a partial tree does not know are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedTree {
    nodes: Vec<Option<Hash>>,
    element_count: usize,
}

impl SerializedTree {
    /// Build a tree over `leafs`.
    ///
    /// Balanced trees need a power-of-two leaf count.
    pub fn build(
        leafs: Vec<Hash>,
        hasher: NodeHasher,
        unbalanced: bool,
    ) -> Result<Self, MerkleError> {
        let element_count = leafs.len();
        if !unbalanced && !element_count.is_power_of_two() {
            return Err(MerkleError::SizeMismatch { element_count });
        }
        let leaf_count = leaf_count_for(element_count)?;
        let mut nodes = try_filled(None, 2 * leaf_count)?;
        for (index, leaf) in leafs.into_iter().enumerate() {
            nodes[leaf_count + index] = Some(leaf);
        }
        Self::from_sparse(nodes, element_count, hasher)
    }

    /// Complete a sparse node array: every missing internal node that can be
    /// derived from known children is filled in, then the root is mixed.
    ///
    /// Fails if the root cannot be derived.
    pub(crate) fn from_sparse(
        nodes: Vec<Option<Hash>>,
        element_count: usize,
        hasher: NodeHasher,
    ) -> Result<Self, MerkleError> {
        let mut tree = Self {
            nodes,
            element_count,
        };
        let leaf_count = tree.leaf_count();
        for node in (1..leaf_count).rev() {
            if tree.nodes[node].is_none() {
                tree.nodes[node] = tree.parent_value(node, hasher).ok();
            }
        }
        if element_count > 0 && tree.nodes[1].is_none() {
            return Err(MerkleError::InvalidProof(
                "proof does not determine the root".to_string(),
            ));
        }
        tree.remix(hasher);
        Ok(tree)
    }

    fn remix(&mut self, hasher: NodeHasher) {
        self.nodes[0] = Some(hasher.mix_root(self.element_count, &self.root()));
    }

    /// Value of internal `node` from its children.
    fn parent_value(&self, node: usize, hasher: NodeHasher) -> Result<Hash, MerkleError> {
        let left = self.known_node(2 * node)?;
        if self.node_exists(2 * node + 1) {
            Ok(hasher.combine(left, self.known_node(2 * node + 1)?))
        } else {
            Ok(*left)
        }
    }

    /// Number of elements.
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Leaf slots, a power of two.
    pub fn leaf_count(&self) -> usize {
        self.nodes.len() / 2
    }

    /// Height of the root above the leaves.
    pub fn depth(&self) -> u32 {
        self.leaf_count().trailing_zeros()
    }

    /// Slot 1, or [`ZERO_HASH`] for an empty tree.
    pub fn root(&self) -> Hash {
        self.nodes[1].unwrap_or(ZERO_HASH)
    }

    /// Slot 0.
    pub fn mixed_root(&self) -> Hash {
        self.nodes[0].unwrap_or(ZERO_HASH)
    }

    /// Every slot, `None` where a partial tree has no value.
    pub fn nodes(&self) -> &[Option<Hash>] {
        &self.nodes
    }

    /// Value of slot `node`, if known.
    pub fn node(&self, node: usize) -> Option<&Hash> {
        self.nodes.get(node).and_then(Option::as_ref)
    }

    /// Leaf value of the element at `index`, if known.
    pub fn leaf(&self, index: usize) -> Option<&Hash> {
        if index >= self.element_count {
            return None;
        }
        self.node(self.leaf_count() + index)
    }

    pub(crate) fn node_exists(&self, node: usize) -> bool {
        node_exists(self.leaf_count(), self.element_count, node)
    }

    pub(crate) fn known_node(&self, node: usize) -> Result<&Hash, MerkleError> {
        self.node(node).ok_or_else(|| {
            MerkleError::UnknownElement(first_element_below(self.leaf_count(), node))
        })
    }

    /// New tree with the given leaves replaced. Only the ancestors of the
    /// replaced leaves are recomputed.
    pub(crate) fn replace_leaves(
        &self,
        updates: &[(usize, Hash)],
        hasher: NodeHasher,
    ) -> Result<Self, MerkleError> {
        let leaf_count = self.leaf_count();
        let mut tree = self.clone();
        let mut dirty = BTreeSet::new();
        for &(index, leaf) in updates {
            if index >= self.element_count {
                return Err(MerkleError::IndexOutOfRange {
                    index,
                    element_count: self.element_count,
                });
            }
            tree.nodes[leaf_count + index] = Some(leaf);
            let mut node = (leaf_count + index) >> 1;
            while node >= 1 && dirty.insert(node) {
                node >>= 1;
            }
        }
        for &node in dirty.iter().rev() {
            tree.nodes[node] = Some(tree.parent_value(node, hasher)?);
        }
        tree.remix(hasher);
        Ok(tree)
    }

    /// New tree with `leafs` appended. Existing nodes move down as the tree
    /// deepens and only the nodes covering new leaves are recomputed, so a
    /// partial tree needs just its frontier.
    pub(crate) fn append_leaves(
        &self,
        leafs: &[Hash],
        hasher: NodeHasher,
    ) -> Result<Self, MerkleError> {
        let old_count = self.element_count;
        let new_count = grown_count(old_count, leafs.len())?;
        let new_leaf_count = leaf_count_for(new_count)?;
        let shift = new_leaf_count.trailing_zeros() - self.depth();

        let mut tree = Self {
            nodes: try_filled(None, 2 * new_leaf_count)?,
            element_count: new_count,
        };
        for (node, value) in self.nodes.iter().enumerate().skip(1) {
            if let Some(value) = value {
                let top = level_from_top(node);
                let position = node - (1 << top);
                tree.nodes[(1 << (top + shift)) + position] = Some(*value);
            }
        }
        for (offset, leaf) in leafs.iter().enumerate() {
            tree.nodes[new_leaf_count + old_count + offset] = Some(*leaf);
        }
        if new_count > 0 {
            for height in 1..=new_leaf_count.trailing_zeros() {
                let level_start = new_leaf_count >> height;
                for position in (old_count >> height)..=((new_count - 1) >> height) {
                    let node = level_start + position;
                    tree.nodes[node] = Some(tree.parent_value(node, hasher)?);
                }
            }
        }
        tree.remix(hasher);
        Ok(tree)
    }
}
