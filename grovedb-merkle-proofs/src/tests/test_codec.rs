use assert_matches::assert_matches;

use crate::{
    AppendProof, FlagMultiProof, MerkleError, MerkleTree, Proof, SingleProof, TreeOptions,
    test_utils::generate_elements,
};

fn tree(options: &TreeOptions) -> MerkleTree {
    MerkleTree::new(generate_elements(27, &[0x05]), options).unwrap()
}

#[test]
fn test_every_proof_kind_survives_bincode() {
    let options = TreeOptions::default();
    let tree = tree(&options);
    let indexed_options = options.clone().with_indexed(true);
    let proofs: Vec<Proof> = vec![
        tree.generate_single_proof(13).unwrap().into(),
        tree.generate_multi_proof(&[0, 9, 26]).unwrap(),
        MerkleTree::new(tree.elements().to_vec(), &indexed_options)
            .unwrap()
            .generate_multi_proof(&[26, 9, 0])
            .unwrap(),
        tree.generate_append_proof().unwrap().into(),
        tree.generate_combined_proof(&[5, 26]).unwrap().into(),
    ];
    for proof in proofs {
        let bytes = proof.encode_to_vec().unwrap();
        let decoded = Proof::decode_from_slice(&bytes).unwrap();
        assert!(decoded.verify(&tree.mixed_root(), &options).unwrap());
        assert_eq!(decoded, proof);
    }
}

#[test]
fn test_truncated_bytes_fail_to_decode() {
    let options = TreeOptions::default();
    let bytes = Proof::from(tree(&options).generate_single_proof(1).unwrap())
        .encode_to_vec()
        .unwrap();
    assert_matches!(
        Proof::decode_from_slice(&bytes[..bytes.len() - 1]),
        Err(MerkleError::Encoding(_))
    );
}

#[test]
fn test_word_layouts_round_trip() {
    let options = TreeOptions::default();
    let tree = tree(&options);

    let single = tree.generate_single_proof(20).unwrap();
    let from_words =
        SingleProof::from_words(20, single.element.clone(), &single.to_words()).unwrap();
    assert!(from_words.verify(&tree.mixed_root(), &options).unwrap());

    let flags = tree.generate_flag_multi_proof(&[2, 3, 21]).unwrap();
    let words = flags.to_words().unwrap();
    let from_words = FlagMultiProof::from_words(flags.elements.clone(), &words).unwrap();
    assert!(from_words.verify(&tree.mixed_root(), &options).unwrap());
    assert_eq!(
        from_words.bits.hash_count().unwrap(),
        flags.bits.hash_count().unwrap()
    );

    let append = tree.generate_append_proof().unwrap();
    assert_eq!(AppendProof::from_words(&append.to_words()).unwrap(), append);

    assert_matches!(
        FlagMultiProof::from_words(vec![], &words[..2]),
        Err(MerkleError::InvalidProof(_))
    );
}
