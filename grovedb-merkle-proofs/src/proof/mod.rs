//! Proof types and the machinery their root folds share.
//!
//! Every proof is generated against a specific element count and verified
//! against a trusted mixed root. Multi-element proofs are folded with a
//! bounded ring of live nodes rather than by materializing the tree; the
//! same fold runs over plain hashes for verification and over
//! old/new pairs for updates.

pub mod append;
pub mod combined;
pub mod flags;
pub mod indexed;
pub mod single;

use bincode::{Decode, Encode};

use crate::{
    MerkleError, TreeOptions,
    hash::{Hash, NodeHasher},
    tree::node_exists,
};

pub use append::AppendProof;
pub use combined::{CombinedProof, get_minimum_combined_index};
pub use flags::{FlagBits, FlagMultiProof, MAX_PACKED_HASH_COUNT};
pub use indexed::IndexedMultiProof;
pub use single::SingleProof;

/// The algorithm a proof was generated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofKind {
    /// [`SingleProof`]
    Single,
    /// [`IndexedMultiProof`]
    IndexedMulti,
    /// [`FlagMultiProof`]
    FlagMulti,
    /// [`AppendProof`]
    Append,
    /// [`CombinedProof`]
    Combined,
}

/// Any proof the engine produces.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Proof {
    /// One element.
    Single(SingleProof),
    /// Several elements keyed by descending indices.
    IndexedMulti(IndexedMultiProof),
    /// Several elements driven by flag bits.
    FlagMulti(FlagMultiProof),
    /// The frontier.
    Append(AppendProof),
    /// Elements plus the frontier.
    Combined(CombinedProof),
}

impl Proof {
    /// Which algorithm produced the proof.
    pub fn kind(&self) -> ProofKind {
        match self {
            Proof::Single(_) => ProofKind::Single,
            Proof::IndexedMulti(_) => ProofKind::IndexedMulti,
            Proof::FlagMulti(_) => ProofKind::FlagMulti,
            Proof::Append(_) => ProofKind::Append,
            Proof::Combined(_) => ProofKind::Combined,
        }
    }

    /// Element count of the tree the proof was generated against.
    pub fn element_count(&self) -> usize {
        match self {
            Proof::Single(proof) => proof.element_count,
            Proof::IndexedMulti(proof) => proof.element_count,
            Proof::FlagMulti(proof) => proof.element_count,
            Proof::Append(proof) => proof.element_count,
            Proof::Combined(proof) => proof.element_count(),
        }
    }

    /// Check the proof against a trusted mixed root. Append proofs check
    /// the frontier, combined proofs their proven elements.
    pub fn verify(
        &self,
        expected_mixed_root: &Hash,
        options: &TreeOptions,
    ) -> Result<bool, MerkleError> {
        match self {
            Proof::Single(proof) => proof.verify(expected_mixed_root, options),
            Proof::IndexedMulti(proof) => proof.verify(expected_mixed_root, options),
            Proof::FlagMulti(proof) => proof.verify(expected_mixed_root, options),
            Proof::Append(proof) => proof.verify(expected_mixed_root, options),
            Proof::Combined(proof) => proof.verify(expected_mixed_root, options),
        }
    }

    /// Word layout handed to a verifier contract.
    pub fn to_words(&self) -> Result<Vec<Hash>, MerkleError> {
        match self {
            Proof::Single(proof) => Ok(proof.to_words()),
            Proof::IndexedMulti(proof) => Ok(proof.to_words()),
            Proof::FlagMulti(proof) => proof.to_words(),
            Proof::Append(proof) => Ok(proof.to_words()),
            Proof::Combined(proof) => proof.to_words(),
        }
    }

    /// Encode to bytes using bincode.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, MerkleError> {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_no_limit();
        bincode::encode_to_vec(self, config)
            .map_err(|e| MerkleError::Encoding(format!("encode error: {}", e)))
    }

    /// Decode from bytes using bincode.
    pub fn decode_from_slice(bytes: &[u8]) -> Result<Self, MerkleError> {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_limit::<{ 100 * 1024 * 1024 }>(); // 100MB limit
        let (proof, _): (Self, _) = bincode::decode_from_slice(bytes, config)
            .map_err(|e| MerkleError::Encoding(format!("decode error: {}", e)))?;
        Ok(proof)
    }
}

impl From<SingleProof> for Proof {
    fn from(proof: SingleProof) -> Self {
        Proof::Single(proof)
    }
}

impl From<IndexedMultiProof> for Proof {
    fn from(proof: IndexedMultiProof) -> Self {
        Proof::IndexedMulti(proof)
    }
}

impl From<FlagMultiProof> for Proof {
    fn from(proof: FlagMultiProof) -> Self {
        Proof::FlagMulti(proof)
    }
}

impl From<AppendProof> for Proof {
    fn from(proof: AppendProof) -> Self {
        Proof::Append(proof)
    }
}

impl From<CombinedProof> for Proof {
    fn from(proof: CombinedProof) -> Self {
        Proof::Combined(proof)
    }
}

/// A value carried through a root fold.
pub(crate) trait Lane: Clone {
    /// Lift a decommitment, which is shared by every lane.
    fn lift(decommitment: &Hash) -> Self;

    fn join(left: &Self, right: &Self, hasher: NodeHasher) -> Self;
}

impl Lane for Hash {
    fn lift(decommitment: &Hash) -> Self {
        *decommitment
    }

    fn join(left: &Self, right: &Self, hasher: NodeHasher) -> Self {
        hasher.combine(left, right)
    }
}

/// Old and new values of a node, folded in lockstep so one pass yields both
/// the root being replaced and its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Update {
    pub old: Hash,
    pub new: Hash,
}

impl Lane for Update {
    fn lift(decommitment: &Hash) -> Self {
        Self {
            old: *decommitment,
            new: *decommitment,
        }
    }

    fn join(left: &Self, right: &Self, hasher: NodeHasher) -> Self {
        Self {
            old: hasher.combine(&left.old, &right.old),
            new: hasher.combine(&left.new, &right.new),
        }
    }
}

pub(crate) fn update_lanes(old: Vec<Hash>, new: Vec<Hash>) -> Vec<Update> {
    old.into_iter()
        .zip(new)
        .map(|(old, new)| Update { old, new })
        .collect()
}

/// Decommitments consumed by a fold, from either end.
pub(crate) struct Decommitments<'a> {
    remaining: std::slice::Iter<'a, Hash>,
}

impl<'a> Decommitments<'a> {
    pub(crate) fn new(decommitments: &'a [Hash]) -> Self {
        Self {
            remaining: decommitments.iter(),
        }
    }

    pub(crate) fn take_front(&mut self) -> Result<&'a Hash, MerkleError> {
        self.remaining.next().ok_or_else(Self::exhausted)
    }

    pub(crate) fn take_back(&mut self) -> Result<&'a Hash, MerkleError> {
        self.remaining.next_back().ok_or_else(Self::exhausted)
    }

    /// Every decommitment must have been used.
    pub(crate) fn finish(self) -> Result<(), MerkleError> {
        match self.remaining.len() {
            0 => Ok(()),
            unused => Err(MerkleError::InvalidProof(format!("{} unused decommitments", unused))),
        }
    }

    fn exhausted() -> MerkleError {
        MerkleError::InvalidProof("ran out of decommitments".to_string())
    }
}

/// Result of sweeping the tree bottom-up over a set of proven leaves.
///
/// Nodes are visited level by level from the leaves up and, within a level,
/// right to left. A node with exactly one known child needs its other child
/// as a decommitment (if that child exists). Every node with a known child
/// is a hash step: `flags` records whether both children are known and
/// `skips` whether the lone known child passes through because its sibling
/// does not exist. Only ancestors of proven leaves are touched, so the
/// sweep costs `O(k log n)` regardless of the element count.
#[derive(Debug, Default)]
pub(crate) struct Sweep {
    pub decommitment_nodes: Vec<usize>,
    pub flags: Vec<bool>,
    pub skips: Vec<bool>,
}

impl Sweep {
    pub(crate) fn run(leaf_count: usize, element_count: usize, indices: &[usize]) -> Self {
        let mut level: Vec<usize> = indices.iter().map(|&index| leaf_count + index).collect();
        level.sort_unstable_by(|a, b| b.cmp(a));
        level.dedup();
        let mut sweep = Sweep::default();
        while level.first().is_some_and(|&node| node > 1) {
            let mut parents = Vec::with_capacity(level.len());
            let mut nodes = level.iter().copied().peekable();
            while let Some(node) = nodes.next() {
                let left = node & !1;
                let right = left + 1;
                if node == right {
                    if nodes.next_if_eq(&left).is_some() {
                        sweep.flags.push(true);
                    } else {
                        sweep.decommitment_nodes.push(left);
                        sweep.flags.push(false);
                    }
                    sweep.skips.push(false);
                } else {
                    let right_exists = node_exists(leaf_count, element_count, right);
                    if right_exists {
                        sweep.decommitment_nodes.push(right);
                    }
                    sweep.flags.push(false);
                    sweep.skips.push(!right_exists);
                }
                parents.push(node >> 1);
            }
            level = parents;
        }
        sweep
    }
}
