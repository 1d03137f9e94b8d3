//! Append proofs for unbalanced trees.
//!
//! The frontier of a tree with `n` elements is one perfect subtree per set
//! bit of `n`: for bit `h` the node covering elements
//! `[(n >> h << h) - 2^h, n >> h << h)`. Those subtree roots, largest first,
//! are all a verifier needs to recompute the root and to grow it.

use bincode::{Decode, Encode};
use tracing::{debug, trace};

use super::Decommitments;
use crate::{
    MerkleError, TreeOptions,
    hash::{Hash, NodeHasher, ZERO_HASH, decode_count, encode_count},
    ring::RingBuffer,
    tree::{SerializedTree, grown_count, leaf_count_for},
};

/// Proof of a tree's frontier.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AppendProof {
    /// Element count of the tree the proof was generated against.
    pub element_count: usize,
    /// Frontier subtree roots, largest first. One per set bit of
    /// `element_count`.
    pub decommitments: Vec<Hash>,
}

/// Serialized-tree nodes of the frontier, largest subtree first.
pub(crate) fn frontier_nodes(element_count: usize) -> Result<Vec<usize>, MerkleError> {
    let leaf_count = leaf_count_for(element_count)?;
    let mut nodes = Vec::with_capacity(element_count.count_ones() as usize);
    let mut height = 0;
    while element_count >> height != 0 {
        if (element_count >> height) & 1 == 1 {
            nodes.push((leaf_count >> height) + (element_count >> height) - 1);
        }
        height += 1;
    }
    nodes.reverse();
    Ok(nodes)
}

pub(crate) fn generate_decommitments(tree: &SerializedTree) -> Result<Vec<Hash>, MerkleError> {
    let decommitments = frontier_nodes(tree.element_count())?
        .into_iter()
        .map(|node| tree.known_node(node).copied())
        .collect::<Result<Vec<_>, _>>()?;
    debug!(
        element_count = tree.element_count(),
        decommitments = decommitments.len(),
        "generated append proof"
    );
    Ok(decommitments)
}

fn check_frontier(element_count: usize, decommitments: &[Hash]) -> Result<(), MerkleError> {
    leaf_count_for(element_count)?;
    let expected = element_count.count_ones() as usize;
    if decommitments.len() != expected {
        return Err(MerkleError::InvalidProof(format!(
            "{} frontier decommitments for element count {}, expected {}",
            decommitments.len(),
            element_count,
            expected
        )));
    }
    Ok(())
}

/// Root of the tree described by its frontier.
pub(crate) fn frontier_root(
    element_count: usize,
    decommitments: &[Hash],
    hasher: NodeHasher,
) -> Result<Hash, MerkleError> {
    check_frontier(element_count, decommitments)?;
    let Some((last, rest)) = decommitments.split_last() else {
        return Ok(ZERO_HASH);
    };
    Ok(rest
        .iter()
        .rev()
        .fold(*last, |acc, node| hasher.combine(node, &acc)))
}

/// Root after appending one leaf to the tree described by its frontier.
pub(crate) fn append_one_root(decommitments: &[Hash], leaf: Hash, hasher: NodeHasher) -> Hash {
    decommitments
        .iter()
        .rev()
        .fold(leaf, |acc, decommitment| hasher.combine(decommitment, &acc))
}

/// Root after appending `leafs` to the tree described by its frontier.
///
/// A ring of `(position, height, value)` entries, at most one per new leaf,
/// is folded level by level. A node at an odd position whose left sibling
/// is not new pairs with the next frontier root, taken from the smallest.
pub(crate) fn append_many_root(
    element_count: usize,
    decommitments: &[Hash],
    leafs: Vec<Hash>,
    hasher: NodeHasher,
) -> Result<Hash, MerkleError> {
    if leafs.is_empty() {
        return Err(MerkleError::InvalidInput("nothing to append".to_string()));
    }
    check_frontier(element_count, decommitments)?;
    grown_count(element_count, leafs.len())?;
    if element_count == 0 {
        return Ok(SerializedTree::build(leafs, hasher, true)?.root());
    }

    let mut live = RingBuffer::with_capacity(leafs.len());
    for (offset, leaf) in leafs.into_iter().enumerate() {
        live.push_back((element_count + offset, 0u32, leaf))?;
    }
    let mut decommitments = Decommitments::new(decommitments);

    loop {
        let (position, height, value) = live.pop_front()?;
        if position == 0 && live.is_empty() {
            decommitments.finish()?;
            return Ok(value);
        }
        let right_is_live =
            matches!(live.front(), Some((next, h, _)) if *next == position + 1 && *h == height);
        let parent = if position & 1 == 1 {
            hasher.combine(decommitments.take_back()?, &value)
        } else if right_is_live {
            let (_, _, right) = live.pop_front()?;
            hasher.combine(&value, &right)
        } else {
            value
        };
        live.push_back((position >> 1, height + 1, parent))?;
    }
}

impl AppendProof {
    fn check_options(options: &TreeOptions) -> Result<(), MerkleError> {
        if !options.unbalanced {
            return Err(MerkleError::BalancedTreeNotAppendable);
        }
        Ok(())
    }

    /// Root of the tree before appending.
    pub fn compute_root(&self, options: &TreeOptions) -> Result<Hash, MerkleError> {
        Self::check_options(options)?;
        frontier_root(self.element_count, &self.decommitments, options.hasher())
    }

    /// Whether the frontier reproduces `expected_mixed_root`.
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
                "append proof mismatch"
            );
        }
        Ok(&computed == expected_mixed_root)
    }

    fn anchor(&self, expected_mixed_root: &Hash, options: &TreeOptions) -> Result<(), MerkleError> {
        if !self.verify(expected_mixed_root, options)? {
            return Err(MerkleError::InvalidProof(
                "append proof does not match the trusted root".to_string(),
            ));
        }
        Ok(())
    }

    /// Check the frontier against `expected_mixed_root` and return the
    /// mixed root after appending `element`.
    pub fn append_single(
        &self,
        expected_mixed_root: &Hash,
        element: &[u8],
        options: &TreeOptions,
    ) -> Result<Hash, MerkleError> {
        self.anchor(expected_mixed_root, options)?;
        let hasher = options.hasher();
        let new_count = grown_count(self.element_count, 1)?;
        let root = append_one_root(&self.decommitments, options.leaf_hash(element), hasher);
        Ok(hasher.mix_root(new_count, &root))
    }

    /// Check the frontier against `expected_mixed_root` and return the
    /// mixed root after appending `elements`.
    pub fn append_many<E: AsRef<[u8]>>(
        &self,
        expected_mixed_root: &Hash,
        elements: &[E],
        options: &TreeOptions,
    ) -> Result<Hash, MerkleError> {
        self.anchor(expected_mixed_root, options)?;
        let hasher = options.hasher();
        let root = append_many_root(
            self.element_count,
            &self.decommitments,
            options.leaf_hashes(elements),
            hasher,
        )?;
        Ok(hasher.mix_root(self.element_count + elements.len(), &root))
    }

    /// `[count, decommitments...]`
    pub fn to_words(&self) -> Vec<Hash> {
        let mut words = Vec::with_capacity(self.decommitments.len() + 1);
        words.push(encode_count(self.element_count));
        words.extend_from_slice(&self.decommitments);
        words
    }

    /// Inverse of [`Self::to_words`].
    pub fn from_words(words: &[Hash]) -> Result<Self, MerkleError> {
        let (count, decommitments) = words
            .split_first()
            .ok_or_else(|| MerkleError::InvalidProof("missing count word".to_string()))?;
        Ok(Self {
            element_count: decode_count(count)?,
            decommitments: decommitments.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::MerkleTree;

    fn elements(range: std::ops::Range<u32>) -> Vec<Vec<u8>> {
        range.map(|i| i.to_be_bytes().to_vec()).collect()
    }

    #[test]
    fn frontier_has_one_root_per_set_bit() {
        assert!(frontier_nodes(0).unwrap().is_empty());
        assert_eq!(frontier_nodes(1).unwrap(), vec![1]);
        assert_eq!(frontier_nodes(8).unwrap(), vec![1]);
        // 13 = 8 + 4 + 1 in a 16 slot tree
        assert_eq!(frontier_nodes(13).unwrap(), vec![2, 6, 28]);
    }

    #[test]
    fn single_append_matches_rebuild() {
        for sorted in [false, true] {
            let options = TreeOptions::default().with_sorted_hash(sorted);
            for count in 0..20u32 {
                let tree = MerkleTree::new(elements(0..count), &options).unwrap();
                let proof = tree.generate_append_proof().unwrap();
                assert_eq!(proof.decommitments.len(), count.count_ones() as usize);
                let new_mixed = proof
                    .append_single(&tree.mixed_root(), b"next", &options)
                    .unwrap();
                let mut grown = elements(0..count);
                grown.push(b"next".to_vec());
                let rebuilt = MerkleTree::new(grown, &options).unwrap();
                assert_eq!(new_mixed, rebuilt.mixed_root(), "count {count}");
            }
        }
    }

    #[test]
    fn batch_append_matches_rebuild() {
        let options = TreeOptions::default().with_sorted_hash(false);
        for count in [0u32, 1, 2, 3, 5, 8, 12, 17] {
            for added in [1u32, 2, 3, 4, 5, 8, 20, 33] {
                let tree = MerkleTree::new(elements(0..count), &options).unwrap();
                let proof = tree.generate_append_proof().unwrap();
                let extra = elements(1000..1000 + added);
                let new_mixed = proof
                    .append_many(&tree.mixed_root(), &extra, &options)
                    .unwrap();
                let grown = elements(0..count).into_iter().chain(extra).collect();
                let rebuilt = MerkleTree::new(grown, &options).unwrap();
                assert_eq!(
                    new_mixed,
                    rebuilt.mixed_root(),
                    "count {count} added {added}"
                );
            }
        }
    }

    #[test]
    fn balanced_trees_refuse_appends() {
        let options = TreeOptions::default().with_unbalanced(false);
        let tree = MerkleTree::new(elements(0..8), &options).unwrap();
        assert_matches!(
            tree.generate_append_proof(),
            Err(MerkleError::BalancedTreeNotAppendable)
        );
        let proof = MerkleTree::new(elements(0..8), &TreeOptions::default())
            .unwrap()
            .generate_append_proof()
            .unwrap();
        assert_matches!(
            proof.append_single(&tree.mixed_root(), b"x", &options),
            Err(MerkleError::BalancedTreeNotAppendable)
        );
    }

    #[test]
    fn wrong_frontier_is_rejected() {
        let options = TreeOptions::default();
        let tree = MerkleTree::new(elements(0..11), &options).unwrap();
        let proof = tree.generate_append_proof().unwrap();

        let mut short = proof.clone();
        short.decommitments.pop();
        assert_matches!(
            short.verify(&tree.mixed_root(), &options),
            Err(MerkleError::InvalidProof(_))
        );

        let mut forged = proof.clone();
        forged.decommitments[1] = [9; 32];
        assert_matches!(
            forged.append_single(&tree.mixed_root(), b"x", &options),
            Err(MerkleError::InvalidProof(_))
        );

        assert_matches!(
            proof.append_many::<Vec<u8>>(&tree.mixed_root(), &[], &options),
            Err(MerkleError::InvalidInput(_))
        );
    }

    #[test]
    fn words_round_trip() {
        let options = TreeOptions::default();
        let tree = MerkleTree::new(elements(0..7), &options).unwrap();
        let proof = tree.generate_append_proof().unwrap();
        assert_eq!(AppendProof::from_words(&proof.to_words()).unwrap(), proof);
    }
}
