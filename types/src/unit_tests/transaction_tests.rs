// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use fastcrypto::traits::KeyPair;

use crate::contracts::StateRef;
use crate::crypto::{sign_signable, SignableData};
use crate::digests::SecureHash;
use crate::error::TesseraError;
use crate::transaction::{CoreTransactionAPI, FilteredComponent};
use crate::unit_tests::utils::{
    keypair, party, signed_transaction, test_metadata, wire_transaction,
};

#[test]
fn adding_a_signature_never_changes_the_id() {
    let notary_keys = keypair(1);
    let signer_keys = keypair(2);
    let extra_keys = keypair(3);
    let notary = party("Notary", &notary_keys);

    let wire = wire_transaction(
        StateRef::new(SecureHash::hash(b"prev"), 0),
        &notary,
        signer_keys.public().into(),
        None,
    );
    let stx = signed_transaction(wire, &[&signer_keys]);
    let id = stx.id().unwrap();

    let extra_sig = sign_signable(&extra_keys, &SignableData::new(id, test_metadata()));
    let with_more = stx.with_additional_signature(extra_sig);

    assert_eq!(with_more.id().unwrap(), id);
    assert_eq!(with_more.sigs().len(), stx.sigs().len() + 1);

    let notary_sig = sign_signable(&notary_keys, &SignableData::new(id, test_metadata()));
    let fourth_keys = keypair(4);
    let fourth_sig = sign_signable(&fourth_keys, &SignableData::new(id, test_metadata()));
    let with_even_more = with_more.with_additional_signatures([notary_sig, fourth_sig]);

    assert_eq!(with_even_more.id().unwrap(), id);
    assert_eq!(with_even_more.sigs().len(), stx.sigs().len() + 3);
}

#[test]
fn serde_round_trip_preserves_identity_and_equality() {
    let notary_keys = keypair(1);
    let signer_keys = keypair(2);
    let notary = party("Notary", &notary_keys);

    let wire = wire_transaction(
        StateRef::new(SecureHash::hash(b"prev"), 0),
        &notary,
        signer_keys.public().into(),
        Some(SecureHash::hash(b"params")),
    );
    let stx = signed_transaction(wire, &[&signer_keys]);

    let bytes = bcs::to_bytes(&stx).unwrap();
    let decoded: crate::transaction::SignedTransaction = bcs::from_bytes(&bytes).unwrap();

    // The deserialized copy has a cold cache but identical identity and
    // equality: the cache is not observable.
    assert_eq!(decoded, stx);
    assert_eq!(decoded.id().unwrap(), stx.id().unwrap());

    // Rewrapping the raw bytes, as the wire path does, is equivalent too.
    let rewrapped = crate::transaction::SignedTransaction::from_bits(
        stx.tx_bits().clone(),
        stx.sigs().clone(),
    );
    assert_eq!(rewrapped, stx);
    assert_eq!(rewrapped.id().unwrap(), stx.id().unwrap());
}

#[test]
fn missing_required_signer_is_reported_with_descriptions() {
    let notary_keys = keypair(1);
    let signer_keys = keypair(2);
    let notary = party("Notary", &notary_keys);

    let wire = wire_transaction(
        StateRef::new(SecureHash::hash(b"prev"), 0),
        &notary,
        signer_keys.public().into(),
        None,
    );
    // Only the command signer signs; the notary signature is missing.
    let stx = signed_transaction(wire, &[&signer_keys]);

    match stx.verify_required_signatures() {
        Err(TesseraError::SignaturesMissing { missing, descriptions, .. }) => {
            assert_eq!(missing.len(), 1);
            assert!(descriptions.contains(&"notary".to_owned()));
        }
        other => panic!("expected SignaturesMissing, got {other:?}"),
    }

    // Allowing the notary key to be absent makes the same check pass.
    let notary_key = notary_keys.public().into();
    stx.verify_signatures_except(&[notary_key].into_iter().collect()).unwrap();
}

#[test]
fn invalid_signature_fails_validity_check() {
    let notary_keys = keypair(1);
    let signer_keys = keypair(2);
    let other_keys = keypair(3);
    let notary = party("Notary", &notary_keys);

    let wire = wire_transaction(
        StateRef::new(SecureHash::hash(b"prev"), 0),
        &notary,
        signer_keys.public().into(),
        None,
    );
    let stx = signed_transaction(wire, &[&signer_keys]);

    // A signature over a different transaction id is invalid here.
    let bogus = sign_signable(
        &other_keys,
        &SignableData::new(SecureHash::hash(b"other"), test_metadata()),
    );
    let tampered = stx.with_additional_signature(bogus);
    assert!(tampered.check_signatures_are_valid().is_err());
}

#[test]
fn filtered_transaction_verifies_and_hides_components() {
    let notary_keys = keypair(1);
    let signer_keys = keypair(2);
    let notary = party("Notary", &notary_keys);

    let wire = wire_transaction(
        StateRef::new(SecureHash::hash(b"prev"), 0),
        &notary,
        signer_keys.public().into(),
        None,
    );

    // Reveal only inputs and the notary, the view a notary service needs.
    let filtered = wire
        .build_filtered_transaction(|component| {
            matches!(
                component,
                FilteredComponent::Input(_) | FilteredComponent::Notary(_)
            )
        })
        .unwrap();

    filtered.verify().unwrap();
    assert_eq!(filtered.id(), wire.id());
    assert_eq!(filtered.inputs(), wire.inputs);
    assert_eq!(filtered.notary(), wire.notary);
    assert_eq!(filtered.partial_tree().root_and_included_leaves().0, wire.id());
    // Outputs were filtered out.
    assert!(filtered
        .components()
        .iter()
        .all(|(_, c)| !matches!(c, FilteredComponent::Output(_))));
}

#[test]
fn filtered_transaction_rejects_tampered_component() {
    let notary_keys = keypair(1);
    let signer_keys = keypair(2);
    let notary = party("Notary", &notary_keys);

    let wire = wire_transaction(
        StateRef::new(SecureHash::hash(b"prev"), 0),
        &notary,
        signer_keys.public().into(),
        None,
    );
    let filtered = wire
        .build_filtered_transaction(|component| matches!(component, FilteredComponent::Input(_)))
        .unwrap();

    let mut bytes = bcs::to_bytes(&filtered).unwrap();
    // Flip a byte somewhere in the middle of the serialized form.
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x01;
    if let Ok(tampered) = bcs::from_bytes::<crate::transaction::FilteredTransaction>(&bytes) {
        assert!(tampered.verify().is_err());
    }
}
