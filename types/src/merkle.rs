// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! Merkle trees over algorithm-tagged digests.
//!
//! Used in two places: a transaction id is the root of the tree built over
//! its component leaves, and a notary batch signature covers the root of the
//! tree built over the (re-hashed) ids in the batch. `PartialMerkleTree` is
//! the proof form shipped to a single participant.

use serde::{Deserialize, Serialize};

use crate::digests::{HashAlgorithm, SecureHash};
use crate::error::{TesseraError, TesseraResult};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MerkleTree {
    Leaf(SecureHash),
    Node {
        hash: SecureHash,
        left: Box<MerkleTree>,
        right: Box<MerkleTree>,
    },
}

impl MerkleTree {
    pub fn hash(&self) -> SecureHash {
        match self {
            MerkleTree::Leaf(hash) => *hash,
            MerkleTree::Node { hash, .. } => *hash,
        }
    }

    /// Builds a tree bottom-up, padding the leaf row with the zero hash up to
    /// the next power of two. All leaves must share one hash algorithm.
    pub fn build(leaves: Vec<SecureHash>) -> TesseraResult<MerkleTree> {
        if leaves.is_empty() {
            return Err(TesseraError::MerkleProof {
                message: "cannot build a Merkle tree with no leaves".to_owned(),
            });
        }
        let algorithm = leaves[0].algorithm();
        if leaves.iter().any(|leaf| leaf.algorithm() != algorithm) {
            let mut algorithms: Vec<String> =
                leaves.iter().map(|leaf| leaf.algorithm().to_string()).collect();
            algorithms.sort();
            algorithms.dedup();
            return Err(TesseraError::MixedHashAlgorithms { algorithms });
        }

        let padded_size = leaves.len().next_power_of_two();
        let padding = SecureHash::zero(algorithm);
        let mut row: Vec<MerkleTree> = leaves
            .into_iter()
            .chain(std::iter::repeat(padding).take(padded_size - 1))
            .take(padded_size)
            .map(MerkleTree::Leaf)
            .collect();

        while row.len() > 1 {
            let mut next = Vec::with_capacity(row.len() / 2);
            let mut iter = row.into_iter();
            while let (Some(left), Some(right)) = (iter.next(), iter.next()) {
                next.push(MerkleTree::Node {
                    hash: combine(algorithm, &left.hash(), &right.hash()),
                    left: Box::new(left),
                    right: Box::new(right),
                });
            }
            row = next;
        }
        Ok(row.remove(0))
    }
}

fn combine(algorithm: HashAlgorithm, left: &SecureHash, right: &SecureHash) -> SecureHash {
    let mut bytes = Vec::with_capacity(64);
    bytes.extend_from_slice(left.as_ref());
    bytes.extend_from_slice(right.as_ref());
    SecureHash::compute(algorithm, bytes)
}

/// One branch of a pruned tree: subtrees containing no included leaf collapse
/// to a single `Leaf` carrying their root hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartialTree {
    IncludedLeaf(SecureHash),
    Leaf(SecureHash),
    Node {
        left: Box<PartialTree>,
        right: Box<PartialTree>,
    },
}

/// A Merkle proof restricted to a chosen set of leaves.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialMerkleTree {
    root: PartialTree,
}

impl PartialMerkleTree {
    /// Prunes `tree` down to the subtrees on the paths to `included` leaves.
    /// Every requested leaf must be present in the tree.
    pub fn build(tree: &MerkleTree, included: &[SecureHash]) -> TesseraResult<PartialMerkleTree> {
        let mut used = Vec::new();
        let (_, root) = build_partial(tree, included, &mut used);
        for leaf in included {
            if !used.contains(leaf) {
                return Err(TesseraError::MerkleProof {
                    message: format!("leaf {leaf} is not present in the tree"),
                });
            }
        }
        Ok(PartialMerkleTree { root })
    }

    /// Checks the proof against `expected_root` and that the included leaves
    /// are exactly `hashes_to_check`.
    pub fn verify(&self, expected_root: SecureHash, hashes_to_check: &[SecureHash]) -> TesseraResult {
        let (root, mut included) = self.root_and_included_leaves();
        if root != expected_root {
            return Err(TesseraError::MerkleProof {
                message: format!("computed root {root} does not match expected root {expected_root}"),
            });
        }
        let mut expected: Vec<SecureHash> = hashes_to_check.to_vec();
        included.sort();
        expected.sort();
        if included != expected {
            return Err(TesseraError::MerkleProof {
                message: "included leaves do not match the hashes to check".to_owned(),
            });
        }
        Ok(())
    }

    /// Recomputes the root hash and collects the included leaves on the way.
    pub fn root_and_included_leaves(&self) -> (SecureHash, Vec<SecureHash>) {
        let mut included = Vec::new();
        let root = compute_root(&self.root, &mut included);
        (root, included)
    }
}

fn build_partial(
    tree: &MerkleTree,
    included: &[SecureHash],
    used: &mut Vec<SecureHash>,
) -> (bool, PartialTree) {
    match tree {
        MerkleTree::Leaf(hash) => {
            if included.contains(hash) {
                used.push(*hash);
                (true, PartialTree::IncludedLeaf(*hash))
            } else {
                (false, PartialTree::Leaf(*hash))
            }
        }
        MerkleTree::Node { hash, left, right } => {
            let (left_found, left_tree) = build_partial(left, included, used);
            let (right_found, right_tree) = build_partial(right, included, used);
            if left_found || right_found {
                (
                    true,
                    PartialTree::Node {
                        left: Box::new(left_tree),
                        right: Box::new(right_tree),
                    },
                )
            } else {
                (false, PartialTree::Leaf(*hash))
            }
        }
    }
}

fn compute_root(tree: &PartialTree, included: &mut Vec<SecureHash>) -> SecureHash {
    match tree {
        PartialTree::IncludedLeaf(hash) => {
            included.push(*hash);
            *hash
        }
        PartialTree::Leaf(hash) => *hash,
        PartialTree::Node { left, right } => {
            let left_hash = compute_root(left, included);
            let right_hash = compute_root(right, included);
            combine(left_hash.algorithm(), &left_hash, &right_hash)
        }
    }
}
