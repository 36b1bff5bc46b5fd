// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! Notary batch signing.
//!
//! A notary signs many transactions with one signature: the ids are re-hashed,
//! assembled into a Merkle tree and the root is signed. Each participant then
//! receives a [`TransactionSignature`] whose embedded partial tree proves that
//! their transaction was a leaf of the signed tree, without revealing the
//! other ids in the batch.

use itertools::Itertools;

use types::crypto::{
    sign_signable, PartyKeyPair, SignableData, SignatureMetadata, SignatureScheme,
    TransactionSignature,
};
use types::digests::SecureHash;
use types::error::{TesseraError, TesseraResult};
use types::merkle::{MerkleTree, PartialMerkleTree};

/// A root signature over a batch of transaction ids plus the full tree it was
/// computed from. The full tree never leaves the notary; participants only see
/// the partial trees derived by [`for_participant`](Self::for_participant).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchSignature {
    root_signature: TransactionSignature,
    full_tree: MerkleTree,
}

impl BatchSignature {
    pub fn root_signature(&self) -> &TransactionSignature {
        &self.root_signature
    }

    pub fn full_tree(&self) -> &MerkleTree {
        &self.full_tree
    }

    /// The signature to hand to the participant that submitted `tx_id`: the
    /// root signature with a partial tree proving `tx_id`'s inclusion. Fails
    /// if the id's hash algorithm differs from the tree's, or if the id was
    /// not part of the batch.
    pub fn for_participant(&self, tx_id: SecureHash) -> TesseraResult<TransactionSignature> {
        let root_algorithm = self.full_tree.hash().algorithm();
        if tx_id.algorithm() != root_algorithm {
            return Err(TesseraError::HashAlgorithmMismatch {
                leaf_algorithm: tx_id.algorithm().to_string(),
                root_algorithm: root_algorithm.to_string(),
            });
        }
        let partial_tree = PartialMerkleTree::build(&self.full_tree, &[tx_id.re_hash()])?;
        Ok(TransactionSignature::with_proof(
            self.root_signature.bytes.clone(),
            self.root_signature.by,
            self.root_signature.signature_metadata,
            partial_tree,
        ))
    }
}

/// Signs a batch of transaction ids with the notary's key. The batch must be
/// non-empty and all ids must share one hash algorithm; a batch cannot mix
/// hash families because the tree has a single root algorithm.
pub fn sign_batch(
    tx_ids: &[SecureHash],
    keypair: &PartyKeyPair,
    platform_version: u32,
) -> TesseraResult<BatchSignature> {
    if tx_ids.is_empty() {
        return Err(TesseraError::EmptyBatch);
    }
    let algorithms: Vec<String> = tx_ids
        .iter()
        .map(|id| id.algorithm().to_string())
        .sorted()
        .dedup()
        .collect();
    if algorithms.len() > 1 {
        return Err(TesseraError::MixedHashAlgorithms { algorithms });
    }

    let leaves: Vec<SecureHash> = tx_ids.iter().map(SecureHash::re_hash).collect();
    let full_tree = MerkleTree::build(leaves)?;

    let metadata = SignatureMetadata::new(platform_version, SignatureScheme::Ed25519);
    let root_signature =
        sign_signable(keypair, &SignableData::new(full_tree.hash(), metadata));
    Ok(BatchSignature { root_signature, full_tree })
}
