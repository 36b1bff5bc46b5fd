// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use fastcrypto::traits::KeyPair;

use crate::crypto::{sign_signable, SignableData};
use crate::digests::SecureHash;
use crate::merkle::{MerkleTree, PartialMerkleTree};
use crate::unit_tests::utils::{keypair, test_metadata};

#[test]
fn signature_verifies_against_signed_id() {
    let keypair = keypair(1);
    let tx_id = SecureHash::hash(b"tx");

    let sig = sign_signable(&keypair, &SignableData::new(tx_id, test_metadata()));
    sig.verify(tx_id).unwrap();
    assert_eq!(sig.by, keypair.public().into());
}

#[test]
fn signature_rejects_different_id() {
    let keypair = keypair(2);
    let sig = sign_signable(&keypair, &SignableData::new(SecureHash::hash(b"a"), test_metadata()));
    assert!(!sig.is_valid(SecureHash::hash(b"b")));
}

#[test]
fn signature_rejects_tampered_bytes() {
    let keypair = keypair(3);
    let tx_id = SecureHash::hash(b"tx");
    let mut sig = sign_signable(&keypair, &SignableData::new(tx_id, test_metadata()));
    sig.bytes[0] ^= 0xff;
    assert!(!sig.is_valid(tx_id));
}

#[test]
fn proof_carrying_signature_verifies_included_leaf_only() {
    let keypair = keypair(4);
    let ids: Vec<SecureHash> = (0u8..4).map(|i| SecureHash::hash([i])).collect();
    let tree = MerkleTree::build(ids.iter().map(|id| id.re_hash()).collect()).unwrap();

    let root_sig = sign_signable(&keypair, &SignableData::new(tree.hash(), test_metadata()));
    let proof = PartialMerkleTree::build(&tree, &[ids[1].re_hash()]).unwrap();
    let mut participant_sig = root_sig.clone();
    participant_sig.partial_merkle_tree = Some(proof);

    participant_sig.verify(ids[1]).unwrap();
    assert!(!participant_sig.is_valid(ids[2]));
}
