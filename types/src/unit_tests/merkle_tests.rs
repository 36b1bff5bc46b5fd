// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::digests::{HashAlgorithm, SecureHash};
use crate::error::TesseraError;
use crate::merkle::{MerkleTree, PartialMerkleTree};

fn leaves(n: u8) -> Vec<SecureHash> {
    (0..n).map(|i| SecureHash::compute(HashAlgorithm::default(), [i])).collect()
}

#[test]
fn build_rejects_empty_leaf_set() {
    assert!(matches!(MerkleTree::build(vec![]), Err(TesseraError::MerkleProof { .. })));
}

#[test]
fn build_rejects_mixed_algorithms() {
    let mixed = vec![
        SecureHash::compute(HashAlgorithm::Blake2b256, [1]),
        SecureHash::compute(HashAlgorithm::Sha256, [2]),
    ];
    assert!(matches!(
        MerkleTree::build(mixed),
        Err(TesseraError::MixedHashAlgorithms { .. })
    ));
}

#[test]
fn single_leaf_tree_root_is_the_leaf() {
    let leaf = SecureHash::compute(HashAlgorithm::default(), [9]);
    let tree = MerkleTree::build(vec![leaf]).unwrap();
    assert_eq!(tree.hash(), leaf);
}

#[test]
fn root_is_stable_for_same_leaves() {
    let tree_a = MerkleTree::build(leaves(5)).unwrap();
    let tree_b = MerkleTree::build(leaves(5)).unwrap();
    assert_eq!(tree_a.hash(), tree_b.hash());

    let tree_c = MerkleTree::build(leaves(6)).unwrap();
    assert_ne!(tree_a.hash(), tree_c.hash());
}

#[test]
fn partial_tree_proves_included_leaves() {
    let all = leaves(7);
    let tree = MerkleTree::build(all.clone()).unwrap();
    let included = vec![all[2], all[5]];

    let partial = PartialMerkleTree::build(&tree, &included).unwrap();
    partial.verify(tree.hash(), &included).unwrap();
}

#[test]
fn partial_tree_rejects_unknown_leaf() {
    let all = leaves(4);
    let tree = MerkleTree::build(all).unwrap();
    let foreign = SecureHash::compute(HashAlgorithm::default(), [99]);

    assert!(matches!(
        PartialMerkleTree::build(&tree, &[foreign]),
        Err(TesseraError::MerkleProof { .. })
    ));
}

#[test]
fn verify_rejects_wrong_root() {
    let all = leaves(4);
    let tree = MerkleTree::build(all.clone()).unwrap();
    let partial = PartialMerkleTree::build(&tree, &[all[0]]).unwrap();

    let wrong_root = SecureHash::compute(HashAlgorithm::default(), [42]);
    assert!(partial.verify(wrong_root, &[all[0]]).is_err());
}

#[test]
fn verify_rejects_wrong_leaf_set() {
    let all = leaves(4);
    let tree = MerkleTree::build(all.clone()).unwrap();
    let partial = PartialMerkleTree::build(&tree, &[all[0]]).unwrap();

    // Claiming a different leaf was included must fail even with the right root.
    assert!(partial.verify(tree.hash(), &[all[1]]).is_err());
}
