// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use types::digests::SecureHash;
use types::messages_verifier::{ExternalVerifierInbound, VerifierRequest};
use verification::test_utils::{
    attachment, contract_attachment, keypair, network_parameters, parameters_hash, party,
    TestStores,
};

use crate::handle::answer_verifier_request;

#[test]
fn parties_are_answered_in_key_order_with_absences_preserved() {
    let stores = TestStores::new(network_parameters(1));
    let alice = party("Alice", &keypair(1));
    stores.identities.add(alice.clone());
    let unknown = party("Unknown", &keypair(2)).owning_key;

    let response = answer_verifier_request(
        &stores.support(),
        VerifierRequest::GetParties {
            keys: [alice.owning_key, unknown].into_iter().collect(),
        },
    )
    .unwrap();
    let ExternalVerifierInbound::PartiesResult { parties } = response else {
        panic!("expected PartiesResult, got {response:?}");
    };
    // One slot per requested key, in the set's iteration order, with the
    // unknown key answered as None rather than dropped.
    let mut expected = vec![(alice.owning_key, Some(alice)), (unknown, None)];
    expected.sort_by_key(|(key, _)| *key);
    assert_eq!(parties, expected.into_iter().map(|(_, party)| party).collect::<Vec<_>>());
}

#[test]
fn batched_attachments_carry_the_trust_verdict() {
    let stores = TestStores::new(network_parameters(1));
    let trusted = contract_attachment("com.tessera.test.Token", 1);
    let untrusted = attachment("p2p", 1, &["com/tessera/test/Evil.class"]);
    stores.attachments.add(trusted.clone());
    stores.attachments.add(untrusted.clone());
    let missing = SecureHash::hash(b"never stored");

    let response = answer_verifier_request(
        &stores.support(),
        VerifierRequest::GetAttachments {
            ids: [trusted.id, untrusted.id, missing].into_iter().collect(),
        },
    )
    .unwrap();
    let ExternalVerifierInbound::AttachmentsResult { attachments } = response else {
        panic!("expected AttachmentsResult, got {response:?}");
    };

    let mut by_id = std::collections::BTreeMap::new();
    for entry in attachments.into_iter().flatten() {
        by_id.insert(entry.attachment.id, entry.is_trusted);
    }
    assert_eq!(by_id.get(&trusted.id), Some(&true));
    assert_eq!(by_id.get(&untrusted.id), Some(&false));
    assert!(!by_id.contains_key(&missing));
}

#[test]
fn trusted_class_lookup_returns_only_the_id() {
    let stores = TestStores::new(network_parameters(1));
    let token_jar = contract_attachment("com.tessera.test.Token", 3);
    stores.attachments.add(token_jar.clone());

    let response = answer_verifier_request(
        &stores.support(),
        VerifierRequest::GetTrustedClassAttachment {
            class_name: "com.tessera.test.Token".to_owned(),
        },
    )
    .unwrap();
    assert_eq!(
        response,
        ExternalVerifierInbound::TrustedClassAttachmentResult { id: Some(token_jar.id) }
    );

    let response = answer_verifier_request(
        &stores.support(),
        VerifierRequest::GetTrustedClassAttachment {
            class_name: "com.tessera.test.Nowhere".to_owned(),
        },
    )
    .unwrap();
    assert_eq!(
        response,
        ExternalVerifierInbound::TrustedClassAttachmentResult { id: None }
    );
}

#[test]
fn network_parameters_are_looked_up_by_hash() {
    let stores = TestStores::new(network_parameters(1));
    let newer = network_parameters(2);
    let newer_hash = stores.network_parameters.add(newer.clone());

    let response = answer_verifier_request(
        &stores.support(),
        VerifierRequest::GetNetworkParameters { id: newer_hash },
    )
    .unwrap();
    assert_eq!(
        response,
        ExternalVerifierInbound::NetworkParametersResult { network_parameters: Some(newer) }
    );

    let unknown = parameters_hash(&network_parameters(9));
    let response = answer_verifier_request(
        &stores.support(),
        VerifierRequest::GetNetworkParameters { id: unknown },
    )
    .unwrap();
    assert_eq!(
        response,
        ExternalVerifierInbound::NetworkParametersResult { network_parameters: None }
    );
}
