use proptest::{collection::vec, prelude::*};

use crate::{
    MerkleTree, PartialMerkleTree, Proof, TreeOptions,
    hash::{NodeHasher, hash_leaf},
    test_utils::{generate_elements, numbered_elements},
};

fn pick_indices(mask: &[bool]) -> Vec<usize> {
    let indices: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter_map(|(i, &keep)| keep.then_some(i))
        .collect();
    if indices.is_empty() { vec![0] } else { indices }
}

proptest! {
    #[test]
    fn test_single_round_trip(
        count in 1usize..300,
        pick in any::<usize>(),
        sorted in any::<bool>(),
    ) {
        let options = TreeOptions::default().with_sorted_hash(sorted);
        let tree = MerkleTree::new(generate_elements(count, &[0x42]), &options).unwrap();
        let index = pick % count;
        let proof = tree.generate_single_proof(index).unwrap();
        prop_assert!(proof.verify(&tree.mixed_root(), &options).unwrap());

        let rebuilt = MerkleTree::new(tree.elements().to_vec(), &options).unwrap();
        prop_assert_eq!(rebuilt.root(), tree.root());
    }

    #[test]
    fn test_indexed_round_trip(mask in vec(any::<bool>(), 1..200), sorted in any::<bool>()) {
        let options = TreeOptions::default().with_sorted_hash(sorted).with_indexed(true);
        let tree = MerkleTree::new(numbered_elements(0..mask.len() as u32), &options).unwrap();
        let mut indices = pick_indices(&mask);
        indices.reverse();
        let proof = tree.generate_indexed_multi_proof(&indices).unwrap();
        prop_assert!(proof.verify(&tree.mixed_root(), &options).unwrap());

        let partial = PartialMerkleTree::from_indexed_multi_proof(&proof, &options).unwrap();
        prop_assert_eq!(partial.mixed_root(), tree.mixed_root());
        prop_assert!(partial.has(&indices));
    }

    #[test]
    fn test_flag_round_trip(mask in vec(any::<bool>(), 1..200)) {
        let options = TreeOptions::default();
        let tree = MerkleTree::new(numbered_elements(0..mask.len() as u32), &options).unwrap();
        let indices = pick_indices(&mask);
        let proof = tree.generate_flag_multi_proof(&indices).unwrap();
        prop_assert!(proof.verify(&tree.mixed_root(), &options).unwrap());

        let partial = PartialMerkleTree::from_flag_multi_proof(&proof, &indices, &options).unwrap();
        prop_assert_eq!(partial.generate_multi_proof(&indices).unwrap(), Proof::FlagMulti(proof));
    }

    #[test]
    fn test_append_any_size(count in 0usize..150, added in 1usize..40, sorted in any::<bool>()) {
        let options = TreeOptions::default().with_sorted_hash(sorted);
        let all = generate_elements(count + added, &[0x07]);
        let tree = MerkleTree::new(all[..count].to_vec(), &options).unwrap();
        let proof = tree.generate_append_proof().unwrap();
        let new_mixed = proof.append_many(&tree.mixed_root(), &all[count..], &options).unwrap();
        let rebuilt = MerkleTree::new(all, &options).unwrap();
        prop_assert_eq!(new_mixed, rebuilt.mixed_root());
    }

    #[test]
    fn test_combined_any_size(count in 1usize..150, added in 1usize..20, lower in any::<usize>()) {
        let options = TreeOptions::default();
        let tree = MerkleTree::new(numbered_elements(0..count as u32), &options).unwrap();
        let last = count - 1;
        let first = lower % count;
        let indices = if first < last { vec![first, last] } else { vec![last] };
        let updates: Vec<Vec<u8>> = indices.iter().map(|i| vec![0xdd, *i as u8]).collect();
        let extra = numbered_elements(10_000..10_000 + added as u32);

        let (combined_tree, proof) =
            tree.update_and_append(&indices, updates.clone(), extra.clone()).unwrap();
        let new_mixed = proof
            .verify_update_and_append(&tree.mixed_root(), &updates, &extra, &options)
            .unwrap();
        prop_assert_eq!(new_mixed, combined_tree.mixed_root());
    }
}

#[test]
fn test_balanced_and_unbalanced_agree_on_powers_of_two() {
    for sorted in [false, true] {
        for count in [1usize, 2, 4, 8, 16, 64, 256] {
            let elements = generate_elements(count, &[0x01]);
            let balanced = TreeOptions::default()
                .with_sorted_hash(sorted)
                .with_unbalanced(false);
            let unbalanced = balanced.clone().with_unbalanced(true);
            let a = MerkleTree::new(elements.clone(), &balanced).unwrap();
            let b = MerkleTree::new(elements, &unbalanced).unwrap();
            assert_eq!(a.serialized(), b.serialized());
            assert_eq!(a.root(), b.root());
            assert_eq!(a.mixed_root(), b.mixed_root());
            assert_eq!(a.depth(), b.depth());
        }
    }
}

#[test]
fn test_flag_proof_ignores_unrelated_leaves() {
    let options = TreeOptions::default();
    let indices = [1, 4, 5, 10];
    let elements = generate_elements(16, &[0xff]);
    let original = MerkleTree::new(elements.clone(), &options)
        .unwrap()
        .generate_flag_multi_proof(&indices)
        .unwrap();

    // swapping sibling leaves outside the proven set leaves every
    // decommitment unchanged under sorted hashing
    let mut swapped = elements.clone();
    for (a, b) in [(2, 3), (8, 9), (14, 15)] {
        swapped.swap(a, b);
    }
    let tree = MerkleTree::new(swapped, &options).unwrap();
    let proof = tree.generate_flag_multi_proof(&indices).unwrap();
    assert_eq!(
        Proof::from(proof).encode_to_vec().unwrap(),
        Proof::from(original.clone()).encode_to_vec().unwrap()
    );

    // flags depend only on the proven positions
    let unrelated = MerkleTree::new(numbered_elements(0..16), &options)
        .unwrap()
        .generate_flag_multi_proof(&indices)
        .unwrap();
    assert_eq!(unrelated.bits, original.bits);
    assert_eq!(unrelated.decommitments.len(), original.decommitments.len());
}

#[test]
fn test_append_one_at_a_time_matches_batch() {
    let options = TreeOptions::default().with_sorted_hash(false);
    for added in [1usize, 2, 3, 4, 5, 8, 20, 100] {
        for start in [0usize, 1, 6, 16, 37] {
            let all = generate_elements(start + added, &[0x33]);
            let tree = MerkleTree::new(all[..start].to_vec(), &options).unwrap();

            let (batch, batch_proof) = tree.append_multi(all[start..].to_vec()).unwrap();
            let batch_mixed = batch_proof
                .append_many(&tree.mixed_root(), &all[start..], &options)
                .unwrap();

            let mut stepwise = tree.clone();
            let mut trusted = tree.mixed_root();
            for element in &all[start..] {
                let (next, proof) = stepwise.append_single(element.clone()).unwrap();
                trusted = proof.append_single(&trusted, element, &options).unwrap();
                stepwise = next;
            }

            assert_eq!(stepwise.root(), batch.root(), "start {start} added {added}");
            assert_eq!(trusted, batch_mixed);
            assert_eq!(trusted, batch.mixed_root());
        }
    }
}

#[test]
fn test_combined_matches_update_then_append() {
    let options = TreeOptions::default();
    let tree = MerkleTree::new(generate_elements(45, &[0x99]), &options).unwrap();
    // 45 = 32 + 8 + 4 + 1, the smallest frontier subtree is element 44
    let indices = [3, 17, 44];
    let updates = vec![b"u3".to_vec(), b"u17".to_vec(), b"u44".to_vec()];
    let appends = generate_elements(7, &[0x98]);

    let (combined, proof) = tree
        .update_and_append(&indices, updates.clone(), appends.clone())
        .unwrap();
    let (updated, _) = tree.update_multi(&indices, updates.clone()).unwrap();
    let (sequential, _) = updated.append_multi(appends.clone()).unwrap();
    assert_eq!(combined, sequential);
    assert_eq!(
        proof
            .verify_update_and_append(&tree.mixed_root(), &updates, &appends, &options)
            .unwrap(),
        sequential.mixed_root()
    );

    let (used, proof) = tree.use_and_append(&indices, appends.clone()).unwrap();
    assert_eq!(
        proof
            .verify_and_append(&tree.mixed_root(), &appends, &options)
            .unwrap(),
        used.mixed_root()
    );
}

#[test]
fn test_mixed_roots_separate_counts() {
    let root = hash_leaf(&[0], b"shared root");
    for sorted in [false, true] {
        let hasher = NodeHasher::new(sorted);
        let mixed: std::collections::HashSet<_> =
            (0..2048).map(|count| hasher.mix_root(count, &root)).collect();
        assert_eq!(mixed.len(), 2048);
    }
}
