//! Multi-element proofs driven by flag bits instead of indices.
//!
//! Only valid for sorted hashing: the verifier never learns whether an
//! operand was a left or right child, so the combine must be commutative.
//!
//! Hash steps run in the same bottom-up, right-to-left order the indexed
//! proof uses. For step `i`:
//!
//! - skip: the next live node passes through unchanged
//! - flag: the next two live nodes are siblings and are combined
//! - neither: the next live node is combined with the next decommitment
//!
//! The packed form stores step `i` in bit `i` (least significant first) of a
//! 256-bit big-endian word and marks the end by setting bit `hash_count` in
//! both words, so at most 255 steps fit.

use bincode::{Decode, Encode};
use tracing::{debug, trace};

use super::{Decommitments, Lane, Sweep, Update, update_lanes};
use crate::{
    IndexOrder, MerkleError, TreeOptions,
    hash::{Hash, NodeHasher, ZERO_HASH, decode_count, encode_count},
    ring::RingBuffer,
    tree::SerializedTree,
};

/// Largest number of hash steps the packed encoding can describe.
pub const MAX_PACKED_HASH_COUNT: usize = 255;

/// Flag and skip bits of a [`FlagMultiProof`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlagBits {
    /// One entry per hash step. `skips` is omitted when no step skips.
    Bools {
        /// Whether each step pairs two live nodes.
        flags: Vec<bool>,
        /// Whether each step passes its node through.
        skips: Option<Vec<bool>>,
    },
    /// Bit-packed words with a stop bit.
    Packed {
        /// Flag bits, least significant first.
        flags: Hash,
        /// Skip bits, least significant first.
        skips: Hash,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Pair,
    Decommit,
    Skip,
}

fn bit(word: &Hash, i: usize) -> bool {
    (word[31 - i / 8] >> (i % 8)) & 1 == 1
}

fn set_bit(word: &mut Hash, i: usize) {
    word[31 - i / 8] |= 1 << (i % 8);
}

impl FlagBits {
    pub(crate) fn new(
        flags: Vec<bool>,
        skips: Vec<bool>,
        compact: bool,
    ) -> Result<Self, MerkleError> {
        let bits = FlagBits::Bools {
            skips: skips.iter().any(|&s| s).then_some(skips),
            flags,
        };
        if !compact {
            return Ok(bits);
        }
        let (flags, skips) = bits.to_packed()?;
        Ok(FlagBits::Packed { flags, skips })
    }

    /// Packed flag and skip words for these bits.
    pub fn to_packed(&self) -> Result<(Hash, Hash), MerkleError> {
        let (flags, skips) = match self {
            FlagBits::Packed { flags, skips } => return Ok((*flags, *skips)),
            FlagBits::Bools { flags, skips } => (flags, skips),
        };
        let hash_count = flags.len();
        if hash_count > MAX_PACKED_HASH_COUNT {
            return Err(MerkleError::ProofTooLarge {
                hash_count,
                capacity: MAX_PACKED_HASH_COUNT,
            });
        }
        let mut flag_word = ZERO_HASH;
        let mut skip_word = ZERO_HASH;
        for (i, &flag) in flags.iter().enumerate() {
            if flag {
                set_bit(&mut flag_word, i);
            }
        }
        if let Some(skips) = skips {
            for (i, &skip) in skips.iter().enumerate() {
                if skip {
                    set_bit(&mut skip_word, i);
                }
            }
        }
        set_bit(&mut flag_word, hash_count);
        set_bit(&mut skip_word, hash_count);
        Ok((flag_word, skip_word))
    }

    pub(crate) fn steps(&self) -> Result<Vec<Step>, MerkleError> {
        let step = |flag: bool, skip: bool| match (flag, skip) {
            (true, true) => Err(MerkleError::InvalidProof(
                "step is flagged and skipped".to_string(),
            )),
            (true, false) => Ok(Step::Pair),
            (false, true) => Ok(Step::Skip),
            (false, false) => Ok(Step::Decommit),
        };
        match self {
            FlagBits::Bools { flags, skips: None } => {
                flags.iter().map(|&flag| step(flag, false)).collect()
            }
            FlagBits::Bools {
                flags,
                skips: Some(skips),
            } => {
                if skips.len() != flags.len() {
                    return Err(MerkleError::InvalidProof(format!(
                        "{} skips for {} flags",
                        skips.len(),
                        flags.len()
                    )));
                }
                flags
                    .iter()
                    .zip(skips)
                    .map(|(&flag, &skip)| step(flag, skip))
                    .collect()
            }
            FlagBits::Packed { flags, skips } => {
                let mut steps = Vec::new();
                for i in 0..256 {
                    let (flag, skip) = (bit(flags, i), bit(skips, i));
                    if flag && skip {
                        return Ok(steps);
                    }
                    steps.push(step(flag, skip)?);
                }
                Err(MerkleError::InvalidProof("packed flags have no stop bit".to_string()))
            }
        }
    }

    /// Number of hash steps.
    pub fn hash_count(&self) -> Result<usize, MerkleError> {
        match self {
            FlagBits::Bools { flags, .. } => Ok(flags.len()),
            FlagBits::Packed { .. } => Ok(self.steps()?.len()),
        }
    }
}

/// Proof for a set of elements given in ascending index order.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlagMultiProof {
    /// Element count of the tree the proof was generated against.
    pub element_count: usize,
    /// Ascending by index.
    pub elements: Vec<Vec<u8>>,
    /// Sibling nodes in sweep order.
    pub decommitments: Vec<Hash>,
    /// One flag and skip bit per hash step.
    pub bits: FlagBits,
}

pub(crate) fn generate_flag_parts(
    tree: &SerializedTree,
    indices: &[usize],
    compact: bool,
) -> Result<(Vec<Hash>, FlagBits), MerkleError> {
    IndexOrder::Ascending.validate(indices, tree.element_count())?;
    let sweep = Sweep::run(tree.leaf_count(), tree.element_count(), indices);
    let decommitments = sweep
        .decommitment_nodes
        .iter()
        .map(|&node| tree.known_node(node).copied())
        .collect::<Result<Vec<_>, _>>()?;
    let hash_count = sweep.flags.len();
    let bits = FlagBits::new(sweep.flags, sweep.skips, compact)?;
    debug!(
        element_count = tree.element_count(),
        indices = indices.len(),
        hash_count,
        decommitments = decommitments.len(),
        "generated flag multi proof"
    );
    Ok((decommitments, bits))
}

/// Fold ascending leaves to the root following `steps`.
///
/// `on_level` is called once per tree height with the first node consumed
/// at that height, the step applied to it and the operand it was combined
/// with. The last call carries the root.
pub(crate) fn fold_flags<L: Lane>(
    leafs: Vec<L>,
    decommitments: &[Hash],
    steps: &[Step],
    hasher: NodeHasher,
    mut on_level: impl FnMut(&L, Option<Step>, Option<&L>),
) -> Result<L, MerkleError> {
    if leafs.is_empty() {
        return Err(MerkleError::InvalidInput("no elements to fold".to_string()));
    }
    let mut live = RingBuffer::with_capacity(leafs.len());
    for leaf in leafs.into_iter().rev() {
        live.push_back(leaf)?;
    }
    let mut decommitments = Decommitments::new(decommitments);
    let mut level_remaining = live.len();
    let mut next_level = 0;
    let mut first_of_level = true;

    for &step in steps {
        if level_remaining == 0 {
            level_remaining = next_level;
            next_level = 0;
            first_of_level = true;
        }
        let head = live.pop_front()?;
        let (value, other, consumed) = match step {
            Step::Skip => (head.clone(), None, 1),
            Step::Pair => {
                let left = live.pop_front()?;
                (L::join(&left, &head, hasher), Some(left), 2)
            }
            Step::Decommit => {
                let right = L::lift(decommitments.take_front()?);
                (L::join(&head, &right, hasher), Some(right), 1)
            }
        };
        if first_of_level {
            on_level(&head, Some(step), other.as_ref());
            first_of_level = false;
        }
        level_remaining = level_remaining.checked_sub(consumed).ok_or_else(|| {
            MerkleError::InvalidProof("hash step crosses a level boundary".to_string())
        })?;
        next_level += 1;
        live.push_back(value)?;
    }

    let root = live.pop_front()?;
    if !live.is_empty() {
        return Err(MerkleError::InvalidProof(format!(
            "{} nodes left unfolded",
            live.len()
        )));
    }
    decommitments.finish()?;
    on_level(&root, None, None);
    Ok(root)
}

impl FlagMultiProof {
    fn steps(&self, options: &TreeOptions) -> Result<Vec<Step>, MerkleError> {
        if !options.sorted_hash {
            return Err(MerkleError::SortedHashRequired);
        }
        self.bits.steps()
    }

    /// Root implied by the proof.
    pub fn compute_root(&self, options: &TreeOptions) -> Result<Hash, MerkleError> {
        fold_flags(
            options.leaf_hashes(&self.elements),
            &self.decommitments,
            &self.steps(options)?,
            options.hasher(),
            |_, _, _| {},
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
                "flag multi proof mismatch"
            );
        }
        Ok(&computed == expected_mixed_root)
    }

    pub(crate) fn update_lanes<E: AsRef<[u8]>>(
        &self,
        new_elements: &[E],
        options: &TreeOptions,
    ) -> Result<Vec<Update>, MerkleError> {
        if new_elements.len() != self.elements.len() {
            return Err(MerkleError::InvalidInput(format!(
                "{} new elements for {} proven elements",
                new_elements.len(),
                self.elements.len()
            )));
        }
        Ok(update_lanes(
            options.leaf_hashes(&self.elements),
            options.leaf_hashes(new_elements),
        ))
    }

    /// Old and new roots when the proven elements are replaced by
    /// `new_elements` (ascending index order).
    pub fn compute_updated_root<E: AsRef<[u8]>>(
        &self,
        new_elements: &[E],
        options: &TreeOptions,
    ) -> Result<(Hash, Hash), MerkleError> {
        let Update { old, new } = fold_flags(
            self.update_lanes(new_elements, options)?,
            &self.decommitments,
            &self.steps(options)?,
            options.hasher(),
            |_, _, _| {},
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
                "flag multi proof does not match the trusted root".to_string(),
            ));
        }
        Ok(hasher.mix_root(self.element_count, &new_root))
    }

    /// Root folded alongside the per-height trace combined proofs read the
    /// append frontier from.
    pub(crate) fn fold_traced<L: Lane>(
        &self,
        leafs: Vec<L>,
        options: &TreeOptions,
    ) -> Result<(L, Vec<(L, Option<Step>, Option<L>)>), MerkleError> {
        let mut levels = Vec::new();
        let root = fold_flags(
            leafs,
            &self.decommitments,
            &self.steps(options)?,
            options.hasher(),
            |head, step, other| levels.push((head.clone(), step, other.cloned())),
        )?;
        Ok((root, levels))
    }

    /// `[count, flags, skips, decommitments...]` with packed bits.
    pub fn to_words(&self) -> Result<Vec<Hash>, MerkleError> {
        let (flags, skips) = self.bits.to_packed()?;
        let mut words = Vec::with_capacity(self.decommitments.len() + 3);
        words.push(encode_count(self.element_count));
        words.push(flags);
        words.push(skips);
        words.extend_from_slice(&self.decommitments);
        Ok(words)
    }

    /// Inverse of [`Self::to_words`]; the bits come back packed.
    pub fn from_words(elements: Vec<Vec<u8>>, words: &[Hash]) -> Result<Self, MerkleError> {
        let [count, flags, skips, decommitments @ ..] = words else {
            return Err(MerkleError::InvalidProof(
                "flag proof needs count, flags and skips words".to_string(),
            ));
        };
        Ok(Self {
            element_count: decode_count(count)?,
            elements,
            decommitments: decommitments.to_vec(),
            bits: FlagBits::Packed {
                flags: *flags,
                skips: *skips,
            },
        })
    }
}
