//! Combined proofs: prove (and optionally update) existing elements, then
//! append new ones, in a single verification pass.
//!
//! No separate append decommitments are carried. If the largest proven
//! index lies in the smallest frontier subtree, folding the base proof
//! passes through every frontier root: the larger ones are operands paired
//! with the path, the smallest is the path value at height
//! `trailing_zeros(element_count)`. Recording those during the fold yields
//! the frontier, already updated when the fold runs in update mode.

use bincode::{Decode, Encode};
use tracing::trace;

use super::{
    FlagMultiProof, Lane, SingleProof, Update,
    append::append_many_root,
    flags::Step,
    single::fold_single,
};
use crate::{
    MerkleError, TreeOptions,
    hash::Hash,
    tree::depth_for,
};

/// Smallest index a combined proof may reach up to: the first element of
/// the smallest frontier subtree.
pub fn get_minimum_combined_index(element_count: usize) -> usize {
    element_count & element_count.wrapping_sub(1)
}

/// A proof of existing elements that also carries the append frontier.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CombinedProof {
    /// One element. Works with either hashing mode.
    Single(SingleProof),
    /// Several elements, flag encoded. Needs sorted hashing.
    Multi(FlagMultiProof),
}

impl CombinedProof {
    /// Element count before appending.
    pub fn element_count(&self) -> usize {
        match self {
            CombinedProof::Single(proof) => proof.element_count,
            CombinedProof::Multi(proof) => proof.element_count,
        }
    }

    /// The proven elements, ascending by index.
    pub fn elements(&self) -> Vec<&[u8]> {
        match self {
            CombinedProof::Single(proof) => vec![proof.element.as_slice()],
            CombinedProof::Multi(proof) => proof.elements.iter().map(Vec::as_slice).collect(),
        }
    }

    /// Root of the tree before any update or append.
    pub fn compute_root(&self, options: &TreeOptions) -> Result<Hash, MerkleError> {
        let leafs = options.leaf_hashes(&self.elements());
        Ok(self.fold_frontier(leafs, options)?.0)
    }

    /// Whether the proof reproduces `expected_mixed_root`. Also checks that
    /// the proof reaches the append frontier.
    pub fn verify(
        &self,
        expected_mixed_root: &Hash,
        options: &TreeOptions,
    ) -> Result<bool, MerkleError> {
        let root = self.compute_root(options)?;
        let computed = options.hasher().mix_root(self.element_count(), &root);
        if &computed != expected_mixed_root {
            trace!(
                expected = hex::encode(expected_mixed_root),
                computed = hex::encode(computed),
                "combined proof mismatch"
            );
        }
        Ok(&computed == expected_mixed_root)
    }

    /// Check the proof against `expected_mixed_root` and return the mixed
    /// root after appending `append_elements`.
    pub fn verify_and_append<A: AsRef<[u8]>>(
        &self,
        expected_mixed_root: &Hash,
        append_elements: &[A],
        options: &TreeOptions,
    ) -> Result<Hash, MerkleError> {
        let hasher = options.hasher();
        let element_count = self.element_count();
        let leafs = options.leaf_hashes(&self.elements());
        let (root, frontier) = self.fold_frontier(leafs, options)?;
        if &hasher.mix_root(element_count, &root) != expected_mixed_root {
            return Err(MerkleError::InvalidProof(
                "combined proof does not match the trusted root".to_string(),
            ));
        }
        let new_root = append_many_root(
            element_count,
            &frontier,
            options.leaf_hashes(append_elements),
            hasher,
        )?;
        Ok(hasher.mix_root(element_count + append_elements.len(), &new_root))
    }

    /// Check the proof against `expected_mixed_root`, replace the proven
    /// elements with `new_elements` and append `append_elements`. Returns
    /// the resulting mixed root.
    pub fn verify_update_and_append<E: AsRef<[u8]>, A: AsRef<[u8]>>(
        &self,
        expected_mixed_root: &Hash,
        new_elements: &[E],
        append_elements: &[A],
        options: &TreeOptions,
    ) -> Result<Hash, MerkleError> {
        let hasher = options.hasher();
        let element_count = self.element_count();
        let leafs = match self {
            CombinedProof::Single(proof) => {
                let [new_element] = new_elements else {
                    return Err(MerkleError::InvalidInput(format!(
                        "{} new elements for a single proof",
                        new_elements.len()
                    )));
                };
                vec![Update {
                    old: options.leaf_hash(&proof.element),
                    new: options.leaf_hash(new_element.as_ref()),
                }]
            }
            CombinedProof::Multi(proof) => proof.update_lanes(new_elements, options)?,
        };
        let (roots, frontier) = self.fold_frontier(leafs, options)?;
        if &hasher.mix_root(element_count, &roots.old) != expected_mixed_root {
            return Err(MerkleError::InvalidProof(
                "combined proof does not match the trusted root".to_string(),
            ));
        }
        let frontier: Vec<Hash> = frontier.into_iter().map(|node| node.new).collect();
        let new_root = append_many_root(
            element_count,
            &frontier,
            options.leaf_hashes(append_elements),
            hasher,
        )?;
        Ok(hasher.mix_root(element_count + append_elements.len(), &new_root))
    }

    /// Word layout of the base proof.
    pub fn to_words(&self) -> Result<Vec<Hash>, MerkleError> {
        match self {
            CombinedProof::Single(proof) => Ok(proof.to_words()),
            CombinedProof::Multi(proof) => proof.to_words(),
        }
    }

    /// Fold the base proof, returning its root and the frontier subtree
    /// roots, largest first.
    fn fold_frontier<L: Lane>(
        &self,
        leafs: Vec<L>,
        options: &TreeOptions,
    ) -> Result<(L, Vec<L>), MerkleError> {
        if !options.unbalanced {
            return Err(MerkleError::BalancedTreeNotAppendable);
        }
        match self {
            CombinedProof::Single(proof) => single_frontier(proof, leafs, options),
            CombinedProof::Multi(proof) => multi_frontier(proof, leafs, options),
        }
    }
}

fn single_frontier<L: Lane>(
    proof: &SingleProof,
    leafs: Vec<L>,
    options: &TreeOptions,
) -> Result<(L, Vec<L>), MerkleError> {
    let element_count = proof.element_count;
    let minimum = get_minimum_combined_index(element_count);
    if proof.index < minimum {
        return Err(MerkleError::IndexBelowCombinedThreshold {
            index: proof.index,
            minimum,
        });
    }
    let Some(leaf) = leafs.into_iter().next() else {
        return Err(MerkleError::InvalidInput("no leaf to fold".to_string()));
    };
    let shared = (element_count.count_ones() as usize).saturating_sub(1);
    if proof.decommitments.len() < shared {
        return Err(MerkleError::InvalidProof(
            "too few decommitments for the frontier".to_string(),
        ));
    }
    let anchor_height = element_count.trailing_zeros();
    let mut anchor = None;
    let root = fold_single(
        element_count,
        proof.index,
        leaf,
        &proof.decommitments,
        options.hasher(),
        |height, value| {
            if height == anchor_height {
                anchor = Some(value.clone());
            }
        },
    )?;
    let anchor = anchor.ok_or_else(|| {
        MerkleError::InvalidProof("fold never reached the frontier".to_string())
    })?;
    let mut frontier: Vec<L> = proof.decommitments[..shared].iter().map(L::lift).collect();
    frontier.push(anchor);
    Ok((root, frontier))
}

fn multi_frontier<L: Lane>(
    proof: &FlagMultiProof,
    leafs: Vec<L>,
    options: &TreeOptions,
) -> Result<(L, Vec<L>), MerkleError> {
    let element_count = proof.element_count;
    if element_count == 0 {
        return Err(MerkleError::InvalidProof(
            "combined proof over an empty tree".to_string(),
        ));
    }
    let (root, levels) = proof.fold_traced(leafs, options)?;
    let depth = depth_for(element_count)?;
    if levels.len() != depth as usize + 1 {
        return Err(MerkleError::InvalidProof(format!(
            "proof spans {} levels, tree has {}",
            levels.len(),
            depth + 1
        )));
    }
    let anchor_height = element_count.trailing_zeros();
    // The smallest frontier subtree never has a right sibling, so unless it
    // is the whole tree its first step must be a skip.
    if anchor_height < depth && levels[anchor_height as usize].1 != Some(Step::Skip) {
        return Err(MerkleError::InvalidProof(
            "proof does not reach the append frontier".to_string(),
        ));
    }
    let mut frontier = Vec::with_capacity(element_count.count_ones() as usize);
    for height in (anchor_height..=depth).rev() {
        if (element_count >> height) & 1 == 0 {
            continue;
        }
        let (head, _, other) = &levels[height as usize];
        if height == anchor_height {
            frontier.push(head.clone());
        } else {
            frontier.push(other.clone().ok_or_else(|| {
                MerkleError::InvalidProof(format!("no frontier root at height {}", height))
            })?);
        }
    }
    Ok((root, frontier))
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
    fn minimum_index_is_start_of_smallest_frontier_subtree() {
        assert_eq!(get_minimum_combined_index(0), 0);
        assert_eq!(get_minimum_combined_index(1), 0);
        assert_eq!(get_minimum_combined_index(8), 0);
        assert_eq!(get_minimum_combined_index(12), 8);
        assert_eq!(get_minimum_combined_index(13), 12);
        assert_eq!(get_minimum_combined_index(200), 192);
    }

    #[test]
    fn single_combined_append_matches_rebuild() {
        for sorted in [false, true] {
            let options = TreeOptions::default().with_sorted_hash(sorted);
            for count in 1..24u32 {
                let tree = MerkleTree::new(elements(0..count), &options).unwrap();
                let index = count as usize - 1;
                let extra = elements(500..503);
                let proof = tree.generate_combined_proof(&[index]).unwrap();
                let new_mixed = proof
                    .verify_and_append(&tree.mixed_root(), &extra, &options)
                    .unwrap();
                let (grown, _) = tree.append_multi(extra).unwrap();
                assert_eq!(new_mixed, grown.mixed_root(), "count {count}");
            }
        }
    }

    #[test]
    fn multi_combined_update_and_append_matches_sequential() {
        let options = TreeOptions::default();
        for count in [3u32, 8, 12, 13, 20, 31] {
            let tree = MerkleTree::new(elements(0..count), &options).unwrap();
            let minimum = get_minimum_combined_index(count as usize);
            let indices = vec![0, minimum.max(1), count as usize - 1];
            let indices: Vec<usize> = {
                let mut unique = indices;
                unique.dedup();
                unique
            };
            let updates: Vec<Vec<u8>> = indices.iter().map(|i| vec![0xcc, *i as u8]).collect();
            let extra = elements(900..905);

            let proof = tree.generate_combined_proof(&indices).unwrap();
            let new_mixed = proof
                .verify_update_and_append(&tree.mixed_root(), &updates, &extra, &options)
                .unwrap();

            let (updated, _) = tree.update_multi(&indices, updates).unwrap();
            let (grown, _) = updated.append_multi(extra).unwrap();
            assert_eq!(new_mixed, grown.mixed_root(), "count {count}");
        }
    }

    #[test]
    fn index_below_threshold() {
        let options = TreeOptions::default();
        let tree = MerkleTree::new(elements(0..12), &options).unwrap();
        assert_matches!(
            tree.generate_combined_proof(&[7]),
            Err(MerkleError::IndexBelowCombinedThreshold {
                index: 7,
                minimum: 8
            })
        );
        assert_matches!(
            tree.generate_combined_proof(&[2, 5]),
            Err(MerkleError::IndexBelowCombinedThreshold {
                index: 5,
                minimum: 8
            })
        );

        // a flag proof that stops short of the frontier is caught on verify
        let short = tree.generate_flag_multi_proof(&[2, 5]).unwrap();
        let forged = CombinedProof::Multi(short);
        assert_matches!(
            forged.verify_and_append(&tree.mixed_root(), &elements(50..51), &options),
            Err(MerkleError::InvalidProof(_))
        );
    }

    #[test]
    fn wrong_trusted_root_is_rejected() {
        let options = TreeOptions::default();
        let tree = MerkleTree::new(elements(0..10), &options).unwrap();
        let proof = tree.generate_combined_proof(&[3, 9]).unwrap();
        assert_matches!(
            proof.verify_and_append(&[0; 32], &elements(20..22), &options),
            Err(MerkleError::InvalidProof(_))
        );
    }
}
