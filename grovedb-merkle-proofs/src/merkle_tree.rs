//! The full tree: elements, options and the serialized node array.
//!
//! Trees are values. Every update or append returns a new tree together
//! with the proof a verifier holding only the old mixed root needs to
//! follow the transition.

use tracing::{debug, instrument};

use crate::{
    IndexOrder, MerkleError, TreeOptions,
    hash::Hash,
    proof::{
        AppendProof, CombinedProof, FlagMultiProof, IndexedMultiProof, Proof, SingleProof, append,
        flags, get_minimum_combined_index, indexed, single,
    },
    tree::SerializedTree,
};

/// A tree holding every element, able to prove any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    elements: Vec<Vec<u8>>,
    options: TreeOptions,
    tree: SerializedTree,
}

impl MerkleTree {
    /// Build a tree over `elements`.
    pub fn new(elements: Vec<Vec<u8>>, options: &TreeOptions) -> Result<Self, MerkleError> {
        let leafs = options.leaf_hashes(&elements);
        let tree = SerializedTree::build(leafs, options.hasher(), options.unbalanced)?;
        debug!(
            element_count = elements.len(),
            depth = tree.depth(),
            root = hex::encode(tree.root()),
            "built merkle tree"
        );
        Ok(Self {
            elements,
            options: options.clone(),
            tree,
        })
    }

    /// The elements, in index order.
    pub fn elements(&self) -> &[Vec<u8>] {
        &self.elements
    }

    /// Number of elements.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Root without the element count mixed in.
    pub fn root(&self) -> Hash {
        self.tree.root()
    }

    /// The commitment verifiers trust.
    pub fn mixed_root(&self) -> Hash {
        self.tree.mixed_root()
    }

    /// Height of the root above the leaves.
    pub fn depth(&self) -> u32 {
        self.tree.depth()
    }

    /// Leaf slots, the element count rounded up to a power of two.
    pub fn leaf_count(&self) -> usize {
        self.tree.leaf_count()
    }

    /// Options the tree was built with.
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// The node array.
    pub fn serialized(&self) -> &SerializedTree {
        &self.tree
    }

    /// Proof for the element at `index`.
    pub fn generate_single_proof(&self, index: usize) -> Result<SingleProof, MerkleError> {
        Ok(SingleProof {
            element_count: self.element_count(),
            index,
            decommitments: single::generate_decommitments(&self.tree, index)?,
            element: self.elements[index].clone(),
        })
    }

    /// `indices` must be strictly descending.
    pub fn generate_indexed_multi_proof(
        &self,
        indices: &[usize],
    ) -> Result<IndexedMultiProof, MerkleError> {
        let decommitments = indexed::generate_decommitments(&self.tree, indices)?;
        Ok(IndexedMultiProof {
            element_count: self.element_count(),
            indices: indices.to_vec(),
            elements: self.pick(indices),
            decommitments,
        })
    }

    /// `indices` must be strictly ascending. Needs sorted hashing.
    pub fn generate_flag_multi_proof(
        &self,
        indices: &[usize],
    ) -> Result<FlagMultiProof, MerkleError> {
        if !self.options.sorted_hash {
            return Err(MerkleError::SortedHashRequired);
        }
        let (decommitments, bits) =
            flags::generate_flag_parts(&self.tree, indices, self.options.compact)?;
        Ok(FlagMultiProof {
            element_count: self.element_count(),
            elements: self.pick(indices),
            decommitments,
            bits,
        })
    }

    /// Multi proof in the encoding the options select: indexed proofs take
    /// descending indices, flag proofs ascending ones.
    pub fn generate_multi_proof(&self, indices: &[usize]) -> Result<Proof, MerkleError> {
        if self.options.indexed {
            Ok(self.generate_indexed_multi_proof(indices)?.into())
        } else {
            Ok(self.generate_flag_multi_proof(indices)?.into())
        }
    }

    /// Frontier proof for appending. Needs an unbalanced tree.
    pub fn generate_append_proof(&self) -> Result<AppendProof, MerkleError> {
        if !self.options.unbalanced {
            return Err(MerkleError::BalancedTreeNotAppendable);
        }
        Ok(AppendProof {
            element_count: self.element_count(),
            decommitments: append::generate_decommitments(&self.tree)?,
        })
    }

    /// Proof of the elements at `indices` (ascending) that also lets a
    /// verifier append. The largest index must be at least
    /// [`get_minimum_combined_index`]. A single index yields a single proof,
    /// several a flag proof.
    pub fn generate_combined_proof(&self, indices: &[usize]) -> Result<CombinedProof, MerkleError> {
        if !self.options.unbalanced {
            return Err(MerkleError::BalancedTreeNotAppendable);
        }
        IndexOrder::Ascending.validate(indices, self.element_count())?;
        let minimum = get_minimum_combined_index(self.element_count());
        let index = indices[indices.len() - 1];
        if index < minimum {
            return Err(MerkleError::IndexBelowCombinedThreshold { index, minimum });
        }
        if let [index] = indices {
            Ok(CombinedProof::Single(self.generate_single_proof(*index)?))
        } else {
            Ok(CombinedProof::Multi(
                self.generate_flag_multi_proof(indices)?,
            ))
        }
    }

    /// Replace one element. The proof is generated against this tree.
    #[instrument(
        level = "debug",
        skip(self, element),
        fields(element_count = self.element_count())
    )]
    pub fn update_single(
        &self,
        index: usize,
        element: Vec<u8>,
    ) -> Result<(Self, SingleProof), MerkleError> {
        let proof = self.generate_single_proof(index)?;
        let updated = self.with_updates(&[index], vec![element])?;
        Ok((updated, proof))
    }

    /// Replace several elements, in the index order the configured multi
    /// proof takes.
    #[instrument(
        level = "debug",
        skip(self, elements),
        fields(element_count = self.element_count())
    )]
    pub fn update_multi(
        &self,
        indices: &[usize],
        elements: Vec<Vec<u8>>,
    ) -> Result<(Self, Proof), MerkleError> {
        if indices.len() != elements.len() {
            return Err(MerkleError::InvalidInput(format!(
                "{} elements for {} indices",
                elements.len(),
                indices.len()
            )));
        }
        let proof = self.generate_multi_proof(indices)?;
        let updated = self.with_updates(indices, elements)?;
        Ok((updated, proof))
    }

    /// Append one element, returning the frontier proof of this tree.
    #[instrument(
        level = "debug",
        skip(self, element),
        fields(element_count = self.element_count())
    )]
    pub fn append_single(&self, element: Vec<u8>) -> Result<(Self, AppendProof), MerkleError> {
        self.append_multi(vec![element])
    }

    /// Append `elements`, returning the frontier proof of this tree.
    #[instrument(
        level = "debug",
        skip(self, elements),
        fields(element_count = self.element_count())
    )]
    pub fn append_multi(&self, elements: Vec<Vec<u8>>) -> Result<(Self, AppendProof), MerkleError> {
        if elements.is_empty() {
            return Err(MerkleError::InvalidInput("nothing to append".to_string()));
        }
        let proof = self.generate_append_proof()?;
        let grown = self.with_appended(elements)?;
        Ok((grown, proof))
    }

    /// Prove the elements at `indices` (ascending) and append `elements`.
    #[instrument(
        level = "debug",
        skip(self, elements),
        fields(element_count = self.element_count())
    )]
    pub fn use_and_append(
        &self,
        indices: &[usize],
        elements: Vec<Vec<u8>>,
    ) -> Result<(Self, CombinedProof), MerkleError> {
        if elements.is_empty() {
            return Err(MerkleError::InvalidInput("nothing to append".to_string()));
        }
        let proof = self.generate_combined_proof(indices)?;
        let grown = self.with_appended(elements)?;
        Ok((grown, proof))
    }

    /// Replace the elements at `indices` (ascending) with `update_elements`
    /// and append `append_elements`.
    #[instrument(
        level = "debug",
        skip(self, update_elements, append_elements),
        fields(element_count = self.element_count())
    )]
    pub fn update_and_append(
        &self,
        indices: &[usize],
        update_elements: Vec<Vec<u8>>,
        append_elements: Vec<Vec<u8>>,
    ) -> Result<(Self, CombinedProof), MerkleError> {
        if indices.len() != update_elements.len() {
            return Err(MerkleError::InvalidInput(format!(
                "{} elements for {} indices",
                update_elements.len(),
                indices.len()
            )));
        }
        if append_elements.is_empty() {
            return Err(MerkleError::InvalidInput("nothing to append".to_string()));
        }
        let proof = self.generate_combined_proof(indices)?;
        let grown = self
            .with_updates(indices, update_elements)?
            .with_appended(append_elements)?;
        Ok((grown, proof))
    }

    fn pick(&self, indices: &[usize]) -> Vec<Vec<u8>> {
        indices.iter().map(|&i| self.elements[i].clone()).collect()
    }

    fn with_updates(&self, indices: &[usize], elements: Vec<Vec<u8>>) -> Result<Self, MerkleError> {
        let updates: Vec<(usize, Hash)> = indices
            .iter()
            .zip(&elements)
            .map(|(&index, element)| (index, self.options.leaf_hash(element)))
            .collect();
        let tree = self.tree.replace_leaves(&updates, self.options.hasher())?;
        let mut updated = self.elements.clone();
        for (&index, element) in indices.iter().zip(elements) {
            updated[index] = element;
        }
        Ok(Self {
            elements: updated,
            options: self.options.clone(),
            tree,
        })
    }

    fn with_appended(&self, elements: Vec<Vec<u8>>) -> Result<Self, MerkleError> {
        let leafs = self.options.leaf_hashes(&elements);
        let tree = self.tree.append_leaves(&leafs, self.options.hasher())?;
        let mut grown = self.elements.clone();
        grown.extend(elements);
        Ok(Self {
            elements: grown,
            options: self.options.clone(),
            tree,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn elements(count: u32) -> Vec<Vec<u8>> {
        (0..count).map(|i| i.to_be_bytes().to_vec()).collect()
    }

    #[test]
    fn updates_return_new_trees() {
        let options = TreeOptions::default();
        let tree = MerkleTree::new(elements(6), &options).unwrap();
        let (updated, proof) = tree.update_single(2, b"two".to_vec()).unwrap();

        assert_eq!(tree.elements()[2], 2u32.to_be_bytes().to_vec());
        assert_eq!(updated.elements()[2], b"two".to_vec());
        assert!(proof.verify(&tree.mixed_root(), &options).unwrap());

        let mut expected = elements(6);
        expected[2] = b"two".to_vec();
        assert_eq!(updated, MerkleTree::new(expected, &options).unwrap());
    }

    #[test]
    fn multi_proof_dispatches_on_options() {
        let flag = TreeOptions::default();
        let tree = MerkleTree::new(elements(9), &flag).unwrap();
        let proof = tree.generate_multi_proof(&[1, 6]).unwrap();
        assert_eq!(proof.kind(), crate::ProofKind::FlagMulti);
        assert!(proof.verify(&tree.mixed_root(), &flag).unwrap());

        let indexed = TreeOptions::default().with_indexed(true);
        let tree = MerkleTree::new(elements(9), &indexed).unwrap();
        let proof = tree.generate_multi_proof(&[6, 1]).unwrap();
        assert_eq!(proof.kind(), crate::ProofKind::IndexedMulti);
        assert!(proof.verify(&tree.mixed_root(), &indexed).unwrap());
    }

    #[test]
    fn update_multi_checks_indices() {
        let options = TreeOptions::default();
        let tree = MerkleTree::new(elements(8), &options).unwrap();
        assert_matches!(
            tree.update_multi(&[4, 1], vec![vec![1], vec![2]]),
            Err(MerkleError::InvalidIndexOrder { .. })
        );
        assert_matches!(
            tree.update_multi(&[1, 1], vec![vec![1], vec![2]]),
            Err(MerkleError::DuplicateIndex(1))
        );
        assert_matches!(
            tree.update_multi(&[1, 2], vec![vec![1]]),
            Err(MerkleError::InvalidInput(_))
        );
    }

    #[test]
    fn append_to_empty_tree() {
        let options = TreeOptions::default().with_sorted_hash(false);
        let empty = MerkleTree::new(vec![], &options).unwrap();
        let (grown, proof) = empty.append_multi(elements(5)).unwrap();
        assert!(proof.decommitments.is_empty());
        assert_eq!(
            proof.append_many(&empty.mixed_root(), &elements(5), &options).unwrap(),
            grown.mixed_root()
        );
        assert_eq!(grown, MerkleTree::new(elements(5), &options).unwrap());
    }

    #[test]
    fn balanced_tree_cannot_append() {
        let options = TreeOptions::default().with_unbalanced(false);
        let tree = MerkleTree::new(elements(4), &options).unwrap();
        assert_matches!(
            tree.append_single(vec![9]),
            Err(MerkleError::BalancedTreeNotAppendable)
        );
        assert_matches!(
            tree.use_and_append(&[3], vec![vec![9]]),
            Err(MerkleError::BalancedTreeNotAppendable)
        );
    }
}
