// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use fastcrypto::traits::KeyPair;
use nonempty::NonEmpty;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::contracts::{Command, SerializedBytes, StateRef, TransactionState};
use crate::crypto::{
    sign_signable, PartyKeyPair, PublicKeyBytes, SignableData, SignatureMetadata, SignatureScheme,
};
use crate::digests::SecureHash;
use crate::identity::Party;
use crate::transaction::{
    CoreTransaction, CoreTransactionAPI, SignedTransaction, WireTransaction,
};

pub fn keypair(seed: u64) -> PartyKeyPair {
    let mut rng = StdRng::seed_from_u64(seed);
    PartyKeyPair::generate(&mut rng)
}

pub fn party(name: &str, keypair: &PartyKeyPair) -> Party {
    Party::new(name, keypair.public().into())
}

pub fn test_metadata() -> SignatureMetadata {
    SignatureMetadata::new(4, SignatureScheme::Ed25519)
}

pub fn state(contract: &str, notary: &Party, participants: Vec<PublicKeyBytes>) -> TransactionState {
    TransactionState {
        contract: contract.to_owned(),
        notary: notary.clone(),
        participants,
        data: vec![7, 7, 7],
    }
}

/// A one-input one-output wire transaction with a single command signed by
/// `signer`, optionally carrying a network parameters hash.
pub fn wire_transaction(
    input: StateRef,
    notary: &Party,
    signer: PublicKeyBytes,
    network_parameters_hash: Option<SecureHash>,
) -> WireTransaction {
    let output = state("com.tessera.test.Token", notary, vec![signer]);
    WireTransaction {
        inputs: vec![input],
        references: vec![],
        outputs: vec![SerializedBytes::serialize(&output).unwrap()],
        commands: vec![Command::new("Move", vec![signer])],
        attachments: vec![],
        notary: Some(notary.clone()),
        network_parameters_hash,
    }
}

/// Signs `transaction` with the given keypairs and wraps it up.
pub fn signed_transaction(
    transaction: WireTransaction,
    keypairs: &[&PartyKeyPair],
) -> SignedTransaction {
    let id = transaction.id();
    let mut sigs = keypairs
        .iter()
        .map(|keypair| sign_signable(keypair, &SignableData::new(id, test_metadata())));
    let head = sigs.next().expect("at least one signer");
    let sigs = NonEmpty { head, tail: sigs.collect() };
    SignedTransaction::new(CoreTransaction::Wire(transaction), sigs).unwrap()
}
