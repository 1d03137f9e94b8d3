//! Sparse trees rebuilt from proofs.
//!
//! A partial tree holds the proven leaves, the decommitments the proof
//! carried and every ancestor derivable from them. That is enough to
//! produce new proofs for the proven elements, to update them and to
//! append, without the rest of the data set.

use tracing::debug;

use crate::{
    IndexOrder, MerkleError, TreeOptions,
    hash::Hash,
    proof::{
        AppendProof, FlagMultiProof, IndexedMultiProof, Proof, SingleProof, Sweep, append,
        flags, indexed, single,
    },
    tree::{SerializedTree, leaf_count_for, try_filled},
};

/// A tree that knows only some elements and the nodes proofs revealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialMerkleTree {
    elements: Vec<Option<Vec<u8>>>,
    options: TreeOptions,
    tree: SerializedTree,
}

impl PartialMerkleTree {
    fn assemble(
        element_count: usize,
        known: Vec<(usize, Vec<u8>)>,
        node_ids: &[usize],
        decommitments: &[Hash],
        options: &TreeOptions,
    ) -> Result<Self, MerkleError> {
        if node_ids.len() != decommitments.len() {
            return Err(MerkleError::InvalidProof(format!(
                "{} decommitments, expected {}",
                decommitments.len(),
                node_ids.len()
            )));
        }
        let leaf_count = leaf_count_for(element_count)?;
        let mut nodes = try_filled(None, 2 * leaf_count)?;
        for (&node, decommitment) in node_ids.iter().zip(decommitments) {
            nodes[node] = Some(*decommitment);
        }
        let mut elements = try_filled(None, element_count)?;
        for (index, element) in known {
            nodes[leaf_count + index] = Some(options.leaf_hash(&element));
            elements[index] = Some(element);
        }
        let tree = SerializedTree::from_sparse(nodes, element_count, options.hasher())?;
        debug!(
            element_count,
            known = elements.iter().filter(|e| e.is_some()).count(),
            "rebuilt partial tree"
        );
        Ok(Self {
            elements,
            options: options.clone(),
            tree,
        })
    }

    /// Rebuild the tree a single proof was generated against.
    pub fn from_single_proof(
        proof: &SingleProof,
        options: &TreeOptions,
    ) -> Result<Self, MerkleError> {
        let element_count = proof.element_count;
        if proof.index >= element_count {
            return Err(MerkleError::IndexOutOfRange {
                index: proof.index,
                element_count,
            });
        }
        let leaf_count = leaf_count_for(element_count)?;
        let node_ids = single::decommitment_nodes(leaf_count, element_count, proof.index);
        Self::assemble(
            element_count,
            vec![(proof.index, proof.element.clone())],
            &node_ids,
            &proof.decommitments,
            options,
        )
    }

    /// Rebuild the tree an indexed multi proof was generated against.
    pub fn from_indexed_multi_proof(
        proof: &IndexedMultiProof,
        options: &TreeOptions,
    ) -> Result<Self, MerkleError> {
        let element_count = proof.element_count;
        IndexOrder::Descending.validate(&proof.indices, element_count)?;
        if proof.elements.len() != proof.indices.len() {
            return Err(MerkleError::InvalidProof(format!(
                "{} elements for {} indices",
                proof.elements.len(),
                proof.indices.len()
            )));
        }
        let leaf_count = leaf_count_for(element_count)?;
        let sweep = Sweep::run(leaf_count, element_count, &proof.indices);
        let known = proof
            .indices
            .iter()
            .copied()
            .zip(proof.elements.iter().cloned())
            .collect();
        Self::assemble(
            element_count,
            known,
            &sweep.decommitment_nodes,
            &proof.decommitments,
            options,
        )
    }

    /// Flag proofs do not carry their indices; the caller supplies them in
    /// ascending order and they must agree with the proof's flags.
    pub fn from_flag_multi_proof(
        proof: &FlagMultiProof,
        indices: &[usize],
        options: &TreeOptions,
    ) -> Result<Self, MerkleError> {
        if !options.sorted_hash {
            return Err(MerkleError::SortedHashRequired);
        }
        let element_count = proof.element_count;
        IndexOrder::Ascending.validate(indices, element_count)?;
        if proof.elements.len() != indices.len() {
            return Err(MerkleError::InvalidProof(format!(
                "{} elements for {} indices",
                proof.elements.len(),
                indices.len()
            )));
        }
        let sweep = Sweep::run(leaf_count_for(element_count)?, element_count, indices);
        let expected = flags::FlagBits::new(sweep.flags, sweep.skips, false)?;
        if expected.steps()? != proof.bits.steps()? {
            return Err(MerkleError::InvalidProof(
                "flags do not match the given indices".to_string(),
            ));
        }
        let known = indices.iter().copied().zip(proof.elements.iter().cloned()).collect();
        Self::assemble(
            element_count,
            known,
            &sweep.decommitment_nodes,
            &proof.decommitments,
            options,
        )
    }

    /// Only the frontier is known afterwards; [`Self::append`] grows it.
    pub fn from_append_proof(
        proof: &AppendProof,
        options: &TreeOptions,
    ) -> Result<Self, MerkleError> {
        if !options.unbalanced {
            return Err(MerkleError::BalancedTreeNotAppendable);
        }
        let node_ids = append::frontier_nodes(proof.element_count)?;
        Self::assemble(
            proof.element_count,
            vec![],
            &node_ids,
            &proof.decommitments,
            options,
        )
    }

    /// Number of elements, known or not.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Every element slot, `None` where unknown.
    pub fn elements(&self) -> &[Option<Vec<u8>>] {
        &self.elements
    }

    /// The element at `index`, if known.
    pub fn element(&self, index: usize) -> Option<&[u8]> {
        self.elements.get(index)?.as_deref()
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

    /// Options the tree was rebuilt with.
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// The sparse node array.
    pub fn serialized(&self) -> &SerializedTree {
        &self.tree
    }

    /// Whether every element at `indices` is known.
    pub fn has(&self, indices: &[usize]) -> bool {
        indices.iter().all(|&i| self.element(i).is_some())
    }

    /// Compare candidate elements against the leaves this tree holds. A
    /// leaf is known for proven elements and for leaf-level decommitments.
    pub fn check<E: AsRef<[u8]>>(
        &self,
        indices: &[usize],
        elements: &[E],
    ) -> Result<Vec<bool>, MerkleError> {
        if indices.len() != elements.len() {
            return Err(MerkleError::InvalidInput(format!(
                "{} elements for {} indices",
                elements.len(),
                indices.len()
            )));
        }
        indices
            .iter()
            .zip(elements)
            .map(|(&index, element)| {
                if index >= self.element_count() {
                    return Err(MerkleError::IndexOutOfRange {
                        index,
                        element_count: self.element_count(),
                    });
                }
                Ok(self.tree.leaf(index) == Some(&self.options.leaf_hash(element.as_ref())))
            })
            .collect()
    }

    /// Replace one element. Its siblings along its path must be known.
    pub fn set(&self, index: usize, element: Vec<u8>) -> Result<Self, MerkleError> {
        self.set_many(&[index], vec![element])
    }

    /// Replace elements. Each replaced leaf's siblings along its path must
    /// be known.
    pub fn set_many(&self, indices: &[usize], elements: Vec<Vec<u8>>) -> Result<Self, MerkleError> {
        if indices.len() != elements.len() {
            return Err(MerkleError::InvalidInput(format!(
                "{} elements for {} indices",
                elements.len(),
                indices.len()
            )));
        }
        let updates: Vec<(usize, Hash)> = indices
            .iter()
            .zip(&elements)
            .map(|(&index, element)| (index, self.options.leaf_hash(element)))
            .collect();
        let tree = self.tree.replace_leaves(&updates, self.options.hasher())?;
        let mut updated = self.elements.clone();
        for (&index, element) in indices.iter().zip(elements) {
            updated[index] = Some(element);
        }
        Ok(Self {
            elements: updated,
            options: self.options.clone(),
            tree,
        })
    }

    /// Append elements. Needs the frontier.
    pub fn append(&self, elements: Vec<Vec<u8>>) -> Result<Self, MerkleError> {
        if !self.options.unbalanced {
            return Err(MerkleError::BalancedTreeNotAppendable);
        }
        if elements.is_empty() {
            return Err(MerkleError::InvalidInput("nothing to append".to_string()));
        }
        let leafs = self.options.leaf_hashes(&elements);
        let tree = self.tree.append_leaves(&leafs, self.options.hasher())?;
        let mut grown = self.elements.clone();
        grown.extend(elements.into_iter().map(Some));
        Ok(Self {
            elements: grown,
            options: self.options.clone(),
            tree,
        })
    }

    fn known_elements(&self, indices: &[usize]) -> Result<Vec<Vec<u8>>, MerkleError> {
        indices
            .iter()
            .map(|&index| {
                if index >= self.element_count() {
                    return Err(MerkleError::IndexOutOfRange {
                        index,
                        element_count: self.element_count(),
                    });
                }
                self.element(index)
                    .map(<[u8]>::to_vec)
                    .ok_or(MerkleError::UnknownElement(index))
            })
            .collect()
    }

    /// Proof for a known element.
    pub fn generate_single_proof(&self, index: usize) -> Result<SingleProof, MerkleError> {
        let element = self
            .known_elements(&[index])?
            .pop()
            .ok_or(MerkleError::UnknownElement(index))?;
        Ok(SingleProof {
            element_count: self.element_count(),
            index,
            element,
            decommitments: single::generate_decommitments(&self.tree, index)?,
        })
    }

    /// Multi proof in the encoding the options select.
    pub fn generate_multi_proof(&self, indices: &[usize]) -> Result<Proof, MerkleError> {
        if self.options.indexed {
            let decommitments = indexed::generate_decommitments(&self.tree, indices)?;
            Ok(IndexedMultiProof {
                element_count: self.element_count(),
                indices: indices.to_vec(),
                elements: self.known_elements(indices)?,
                decommitments,
            }
            .into())
        } else {
            if !self.options.sorted_hash {
                return Err(MerkleError::SortedHashRequired);
            }
            let (decommitments, bits) =
                flags::generate_flag_parts(&self.tree, indices, self.options.compact)?;
            Ok(FlagMultiProof {
                element_count: self.element_count(),
                elements: self.known_elements(indices)?,
                decommitments,
                bits,
            }
            .into())
        }
    }

    /// Frontier proof. Needs an unbalanced tree.
    pub fn generate_append_proof(&self) -> Result<AppendProof, MerkleError> {
        if !self.options.unbalanced {
            return Err(MerkleError::BalancedTreeNotAppendable);
        }
        Ok(AppendProof {
            element_count: self.element_count(),
            decommitments: append::generate_decommitments(&self.tree)?,
        })
    }
}
