// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use fastcrypto::traits::KeyPair;

use types::attachment::Attachment;
use types::contracts::{SerializedStateAndRef, StateAndRef, StateRef};
use types::crypto::{PartyKeyPair, PublicKeyBytes};
use types::digests::SecureHash;
use types::error::{TesseraError, TesseraResult};
use types::identity::Party;
use types::network_parameters::NetworkParameters;
use types::transaction::{CoreTransaction, NotaryChangeWireTransaction, SignedTransaction};

use crate::fixup::AttachmentFixups;
use crate::support::{ContractVerifier, VerificationSupport};
use crate::test_utils::{
    contract_attachment, keypair, network_parameters, parameters_hash, party, sign_transaction,
    state, wire_transaction, TestStores, WireTransactionParams,
};
use crate::verifier::TransactionVerifier;

const TOKEN_CLASS: &str = "com.tessera.test.Token";

struct Fixture {
    stores: TestStores,
    notary_keys: PartyKeyPair,
    signer_keys: PartyKeyPair,
    notary: Party,
    signer: PublicKeyBytes,
}

impl Fixture {
    fn new() -> Self {
        let stores = TestStores::new(network_parameters(1));
        let notary_keys = keypair(1);
        let signer_keys = keypair(2);
        let notary = party("Notary", &notary_keys);
        let signer = signer_keys.public().into();
        Self { stores, notary_keys, signer_keys, notary, signer }
    }

    /// Stores an issuance of one Token state and returns a reference to it.
    fn issue_state(&self, network_parameters_hash: Option<SecureHash>) -> StateRef {
        let issuance = wire_transaction(WireTransactionParams {
            inputs: vec![],
            references: vec![],
            outputs: vec![state(TOKEN_CLASS, &self.notary, vec![self.signer])],
            signer: self.signer,
            attachments: vec![],
            notary: &self.notary,
            network_parameters_hash,
        });
        let stx = sign_transaction(CoreTransaction::Wire(issuance), &[&self.signer_keys]);
        let id = stx.id().unwrap();
        self.stores.transactions.add(stx);
        StateRef::new(id, 0)
    }

    /// A spend of `input` carrying the given attachments, signed by the
    /// command signer and the notary.
    fn spend(
        &self,
        input: StateRef,
        attachments: Vec<SecureHash>,
        network_parameters_hash: Option<SecureHash>,
    ) -> SignedTransaction {
        let spend = wire_transaction(WireTransactionParams {
            inputs: vec![input],
            references: vec![],
            outputs: vec![state(TOKEN_CLASS, &self.notary, vec![self.signer])],
            signer: self.signer,
            attachments,
            notary: &self.notary,
            network_parameters_hash,
        });
        sign_transaction(
            CoreTransaction::Wire(spend),
            &[&self.signer_keys, &self.notary_keys],
        )
    }
}

#[test]
fn valid_transaction_verifies() {
    let fixture = Fixture::new();
    let token_jar = contract_attachment(TOKEN_CLASS, 1);
    fixture.stores.attachments.add(token_jar.clone());
    let input = fixture.issue_state(None);
    let stx = fixture.spend(input, vec![token_jar.id], None);

    let support = fixture.stores.support();
    TransactionVerifier::new(&support).verify(&stx, true).unwrap();
}

#[test]
fn missing_notary_signature_is_reported_when_sufficiency_is_required() {
    let fixture = Fixture::new();
    let token_jar = contract_attachment(TOKEN_CLASS, 1);
    fixture.stores.attachments.add(token_jar.clone());
    let input = fixture.issue_state(None);

    let spend = wire_transaction(WireTransactionParams {
        inputs: vec![input],
        references: vec![],
        outputs: vec![state(TOKEN_CLASS, &fixture.notary, vec![fixture.signer])],
        signer: fixture.signer,
        attachments: vec![token_jar.id],
        notary: &fixture.notary,
        network_parameters_hash: None,
    });
    let stx = sign_transaction(CoreTransaction::Wire(spend), &[&fixture.signer_keys]);

    let support = fixture.stores.support();
    let verifier = TransactionVerifier::new(&support);
    match verifier.verify(&stx, true) {
        Err(TesseraError::SignaturesMissing { descriptions, .. }) => {
            assert!(descriptions.contains(&"notary".to_owned()));
        }
        other => panic!("expected SignaturesMissing, got {other:?}"),
    }
    // Signature validity alone is satisfied.
    verifier.verify(&stx, false).unwrap();
}

#[test]
fn decreasing_epoch_across_lineage_is_a_terminal_ordering_error() {
    let fixture = Fixture::new();
    let token_jar = contract_attachment(TOKEN_CLASS, 1);
    fixture.stores.attachments.add(token_jar.clone());

    // The issuance was created under epoch 2; the spend claims epoch 1.
    let newer_hash = fixture.stores.network_parameters.add(network_parameters(2));
    let input = fixture.issue_state(Some(newer_hash));
    let stx = fixture.spend(input, vec![token_jar.id], None);

    let support = fixture.stores.support();
    match TransactionVerifier::new(&support).verify(&stx, true) {
        Err(TesseraError::NetworkParametersOrdering {
            tx_id,
            state_ref,
            tx_parameters,
            input_parameters,
        }) => {
            assert_eq!(tx_id, stx.id().unwrap());
            assert_eq!(state_ref, input);
            assert_eq!(tx_parameters.epoch, 1);
            assert_eq!(input_parameters.epoch, 2);
        }
        other => panic!("expected NetworkParametersOrdering, got {other:?}"),
    }
}

#[test]
fn missing_dependency_is_a_resolution_error() {
    let fixture = Fixture::new();
    let missing = StateRef::new(SecureHash::hash(b"never stored"), 0);
    let stx = fixture.spend(missing, vec![], None);

    let support = fixture.stores.support();
    match TransactionVerifier::new(&support).verify(&stx, true) {
        Err(TesseraError::TransactionResolution { id }) => assert_eq!(id, missing.txhash),
        other => panic!("expected TransactionResolution, got {other:?}"),
    }
}

/// Counts contract verification runs so the tests can assert the repair path
/// retries exactly once.
struct CountingSupport<'a> {
    inner: &'a dyn VerificationSupport,
    verify_runs: AtomicUsize,
}

impl<'a> CountingSupport<'a> {
    fn new(inner: &'a dyn VerificationSupport) -> Self {
        Self { inner, verify_runs: AtomicUsize::new(0) }
    }
}

impl VerificationSupport for CountingSupport<'_> {
    fn get_party(&self, key: &PublicKeyBytes) -> TesseraResult<Option<Party>> {
        self.inner.get_party(key)
    }

    fn get_attachment(&self, id: &SecureHash) -> TesseraResult<Option<Attachment>> {
        self.inner.get_attachment(id)
    }

    fn is_attachment_trusted(&self, attachment: &Attachment) -> TesseraResult<bool> {
        self.inner.is_attachment_trusted(attachment)
    }

    fn get_network_parameters(
        &self,
        id: Option<&SecureHash>,
    ) -> TesseraResult<Option<NetworkParameters>> {
        self.inner.get_network_parameters(id)
    }

    fn get_signed_transaction(&self, id: &SecureHash) -> TesseraResult<Option<SignedTransaction>> {
        self.inner.get_signed_transaction(id)
    }

    fn get_serialized_state(&self, state_ref: &StateRef) -> TesseraResult<SerializedStateAndRef> {
        self.inner.get_serialized_state(state_ref)
    }

    fn get_trusted_class_attachment(&self, class_name: &str) -> TesseraResult<Option<Attachment>> {
        self.inner.get_trusted_class_attachment(class_name)
    }

    fn fixup_attachment_ids(&self, ids: &[SecureHash]) -> TesseraResult<BTreeSet<SecureHash>> {
        self.inner.fixup_attachment_ids(ids)
    }

    fn do_verify(&self, verifier: &dyn ContractVerifier) -> TesseraResult {
        self.verify_runs.fetch_add(1, Ordering::Relaxed);
        self.inner.do_verify(verifier)
    }
}

#[test]
fn missing_class_on_a_legacy_transaction_is_repaired_by_the_trusted_class_scan() {
    let fixture = Fixture::new();
    // The transaction references a broken attachment without the class file,
    // but a trusted attachment carrying it is installed locally.
    let broken = contract_attachment("com.tessera.test.Unrelated", 1);
    let token_jar = contract_attachment(TOKEN_CLASS, 2);
    fixture.stores.attachments.add(broken.clone());
    fixture.stores.attachments.add(token_jar);

    let input = fixture.issue_state(None);
    let stx = fixture.spend(input, vec![broken.id], None);

    let support = fixture.stores.support();
    let counting = CountingSupport::new(&support);
    TransactionVerifier::new(&counting).verify(&stx, true).unwrap();
    // One failed run plus exactly one repaired run.
    assert_eq!(counting.verify_runs.load(Ordering::Relaxed), 2);
}

#[test]
fn the_same_failure_on_a_current_format_transaction_is_not_repaired() {
    let fixture = Fixture::new();
    let broken = contract_attachment("com.tessera.test.Unrelated", 1);
    let token_jar = contract_attachment(TOKEN_CLASS, 2);
    fixture.stores.attachments.add(broken.clone());
    fixture.stores.attachments.add(token_jar);

    let current_hash = parameters_hash(&network_parameters(1));
    let input = fixture.issue_state(Some(current_hash));
    let stx = fixture.spend(input, vec![broken.id], Some(current_hash));

    let support = fixture.stores.support();
    let counting = CountingSupport::new(&support);
    match TransactionVerifier::new(&counting).verify(&stx, true) {
        Err(TesseraError::MissingContractClass { class_name }) => {
            assert_eq!(class_name, TOKEN_CLASS);
        }
        other => panic!("expected MissingContractClass, got {other:?}"),
    }
    // No repair attempt: the single failing run is all there was.
    assert_eq!(counting.verify_runs.load(Ordering::Relaxed), 1);
}

/// Fails with a missing-serializer error whenever the broken attachment is in
/// the set, standing in for contract code whose payload needs a custom
/// serializer from a missing attachment.
struct SerializerProbeVerifier {
    broken: SecureHash,
    attachment_ids: Vec<SecureHash>,
}

impl ContractVerifier for SerializerProbeVerifier {
    fn verify(&self) -> TesseraResult {
        if self.attachment_ids.contains(&self.broken) {
            return Err(TesseraError::MissingSerializer {
                type_descriptor: Some("com.tessera.test.TokenState".to_owned()),
                type_names: vec!["TokenState".to_owned()],
            });
        }
        Ok(())
    }
}

struct SerializerProbeSupport<'a> {
    inner: &'a dyn VerificationSupport,
    broken: SecureHash,
}

impl VerificationSupport for SerializerProbeSupport<'_> {
    fn get_party(&self, key: &PublicKeyBytes) -> TesseraResult<Option<Party>> {
        self.inner.get_party(key)
    }

    fn get_attachment(&self, id: &SecureHash) -> TesseraResult<Option<Attachment>> {
        self.inner.get_attachment(id)
    }

    fn is_attachment_trusted(&self, attachment: &Attachment) -> TesseraResult<bool> {
        self.inner.is_attachment_trusted(attachment)
    }

    fn get_network_parameters(
        &self,
        id: Option<&SecureHash>,
    ) -> TesseraResult<Option<NetworkParameters>> {
        self.inner.get_network_parameters(id)
    }

    fn get_signed_transaction(&self, id: &SecureHash) -> TesseraResult<Option<SignedTransaction>> {
        self.inner.get_signed_transaction(id)
    }

    fn get_serialized_state(&self, state_ref: &StateRef) -> TesseraResult<SerializedStateAndRef> {
        self.inner.get_serialized_state(state_ref)
    }

    fn get_trusted_class_attachment(&self, class_name: &str) -> TesseraResult<Option<Attachment>> {
        self.inner.get_trusted_class_attachment(class_name)
    }

    fn fixup_attachment_ids(&self, ids: &[SecureHash]) -> TesseraResult<BTreeSet<SecureHash>> {
        self.inner.fixup_attachment_ids(ids)
    }

    fn create_verifier(
        &self,
        _ltx: &types::transaction::LedgerTransaction,
        attachments: Vec<Attachment>,
    ) -> Box<dyn ContractVerifier + '_> {
        Box::new(SerializerProbeVerifier {
            broken: self.broken,
            attachment_ids: attachments.iter().map(|attachment| attachment.id).collect(),
        })
    }
}

#[test]
fn missing_serializer_on_a_legacy_transaction_is_repaired_by_fixup_rules() {
    let fixture = Fixture::new();
    let broken = contract_attachment("com.tessera.test.BrokenSerializers", 1);
    let replacement = contract_attachment("com.tessera.test.FixedSerializers", 2);
    fixture.stores.attachments.add(broken.clone());
    fixture.stores.attachments.add(replacement.clone());

    let mut fixups = AttachmentFixups::new();
    fixups.add_rule(
        [broken.id].into_iter().collect(),
        [replacement.id].into_iter().collect(),
    );

    let input = fixture.issue_state(None);
    let stx = fixture.spend(input, vec![broken.id], None);

    let store_support = fixture.stores.support_with_fixups(fixups);
    let support = SerializerProbeSupport { inner: &store_support, broken: broken.id };
    TransactionVerifier::new(&support).verify(&stx, true).unwrap();
}

#[test]
fn missing_serializer_without_fixup_rules_is_a_broken_transaction() {
    let fixture = Fixture::new();
    let broken = contract_attachment("com.tessera.test.BrokenSerializers", 1);
    fixture.stores.attachments.add(broken.clone());

    let input = fixture.issue_state(None);
    let stx = fixture.spend(input, vec![broken.id], None);

    // No fix-up rules, and a missing serializer names no class to scan for.
    let store_support = fixture.stores.support();
    let support = SerializerProbeSupport { inner: &store_support, broken: broken.id };
    match TransactionVerifier::new(&support).verify(&stx, true) {
        Err(TesseraError::BrokenTransaction { tx_id, .. }) => {
            assert_eq!(tx_id, stx.id().unwrap());
        }
        other => panic!("expected BrokenTransaction, got {other:?}"),
    }
}

#[test]
fn notary_change_transaction_runs_no_contract_code() {
    let fixture = Fixture::new();
    let new_notary_keys = keypair(3);
    let new_notary = party("NewNotary", &new_notary_keys);

    // No attachments exist at all; a wire transaction could not verify.
    let input = fixture.issue_state(None);
    let ntx = NotaryChangeWireTransaction {
        inputs: vec![input],
        notary: fixture.notary.clone(),
        new_notary: new_notary.clone(),
        network_parameters_hash: None,
    };
    let stx = sign_transaction(CoreTransaction::NotaryChange(ntx), &[&fixture.notary_keys]);

    let support = fixture.stores.support();
    TransactionVerifier::new(&support).verify(&stx, true).unwrap();

    // The change's output resolves to the input state with the notary swapped.
    fixture.stores.transactions.add(stx.clone());
    let resolved: StateAndRef = support
        .get_state_and_ref(&StateRef::new(stx.id().unwrap(), 0))
        .unwrap();
    assert_eq!(resolved.state.notary, new_notary);
    assert_eq!(resolved.state.contract, TOKEN_CLASS);
}

#[test]
fn notary_change_must_actually_change_the_notary() {
    let fixture = Fixture::new();
    let input = fixture.issue_state(None);
    let ntx = NotaryChangeWireTransaction {
        inputs: vec![input],
        notary: fixture.notary.clone(),
        new_notary: fixture.notary.clone(),
        network_parameters_hash: None,
    };
    let stx = sign_transaction(CoreTransaction::NotaryChange(ntx), &[&fixture.notary_keys]);

    let support = fixture.stores.support();
    assert!(matches!(
        TransactionVerifier::new(&support).verify(&stx, true),
        Err(TesseraError::InvariantViolation { .. })
    ));
}

#[test]
fn trusted_class_scan_prefers_the_highest_version() {
    let fixture = Fixture::new();
    let old = contract_attachment(TOKEN_CLASS, 1);
    let new = contract_attachment(TOKEN_CLASS, 7);
    fixture.stores.attachments.add(old);
    fixture.stores.attachments.add(new.clone());

    let support = fixture.stores.support();
    let found = support.get_trusted_class_attachment(TOKEN_CLASS).unwrap().unwrap();
    assert_eq!(found.id, new.id);
}
