// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory implementations of the collaborator store traits, for tests and
//! for the verifier process protocol tests. Not intended for production use;
//! the real stores live behind the persistence layer.

use std::collections::BTreeMap;
use std::sync::Arc;

use fastcrypto::traits::KeyPair;
use nonempty::NonEmpty;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;

use types::attachment::{Attachment, AttachmentQuery, DEPLOYED_APP_UPLOADER};
use types::contracts::{Command, SerializedBytes, StateRef, TransactionState};
use types::crypto::{
    sign_signable, PartyKeyPair, PublicKeyBytes, SignableData, SignatureMetadata, SignatureScheme,
};
use types::digests::SecureHash;
use types::identity::Party;
use types::network_parameters::NetworkParameters;
use types::transaction::{
    CoreTransaction, CoreTransactionAPI, SignedTransaction, WireTransaction,
};

use crate::fixup::AttachmentFixups;
use crate::store_support::{
    AttachmentStore, AttachmentTrustCalculator, IdentityService, NetworkParametersService,
    StoreVerificationSupport, TransactionStore,
};

#[derive(Default)]
pub struct InMemoryTransactionStore {
    transactions: RwLock<BTreeMap<SecureHash, SignedTransaction>>,
}

impl InMemoryTransactionStore {
    pub fn add(&self, stx: SignedTransaction) {
        let id = stx.id().expect("test transactions deserialize");
        self.transactions.write().insert(id, stx);
    }
}

impl TransactionStore for InMemoryTransactionStore {
    fn get_transaction(&self, id: &SecureHash) -> Option<SignedTransaction> {
        self.transactions.read().get(id).cloned()
    }
}

#[derive(Default)]
pub struct InMemoryAttachmentStore {
    attachments: RwLock<BTreeMap<SecureHash, Attachment>>,
}

impl InMemoryAttachmentStore {
    pub fn add(&self, attachment: Attachment) {
        self.attachments.write().insert(attachment.id, attachment);
    }
}

impl AttachmentStore for InMemoryAttachmentStore {
    fn open_attachment(&self, id: &SecureHash) -> Option<Attachment> {
        self.attachments.read().get(id).cloned()
    }

    fn query_attachments(&self, query: &AttachmentQuery) -> Vec<SecureHash> {
        let attachments = self.attachments.read();
        let mut matching: Vec<&Attachment> = attachments
            .values()
            .filter(|attachment| match &query.uploaders {
                Some(uploaders) => attachment
                    .uploader
                    .as_ref()
                    .is_some_and(|uploader| uploaders.contains(uploader)),
                None => true,
            })
            .collect();
        if query.version_descending {
            matching.sort_by(|a, b| b.version.cmp(&a.version));
        }
        matching.into_iter().map(|attachment| attachment.id).collect()
    }
}

#[derive(Default)]
pub struct InMemoryIdentityService {
    parties: RwLock<BTreeMap<PublicKeyBytes, Party>>,
}

impl InMemoryIdentityService {
    pub fn add(&self, party: Party) {
        self.parties.write().insert(party.owning_key, party);
    }
}

impl IdentityService for InMemoryIdentityService {
    fn party_from_key(&self, key: &PublicKeyBytes) -> Option<Party> {
        self.parties.read().get(key).cloned()
    }
}

pub struct InMemoryNetworkParametersService {
    parameters: RwLock<BTreeMap<SecureHash, NetworkParameters>>,
    default_hash: SecureHash,
}

impl InMemoryNetworkParametersService {
    /// A service whose current parameters are `current`, keyed by their
    /// canonical hash.
    pub fn new(current: NetworkParameters) -> Self {
        let default_hash = parameters_hash(&current);
        let mut parameters = BTreeMap::new();
        parameters.insert(default_hash, current);
        Self { parameters: RwLock::new(parameters), default_hash }
    }

    pub fn add(&self, parameters: NetworkParameters) -> SecureHash {
        let hash = parameters_hash(&parameters);
        self.parameters.write().insert(hash, parameters);
        hash
    }
}

impl NetworkParametersService for InMemoryNetworkParametersService {
    fn lookup(&self, hash: &SecureHash) -> Option<NetworkParameters> {
        self.parameters.read().get(hash).cloned()
    }

    fn default_hash(&self) -> SecureHash {
        self.default_hash
    }
}

/// Trusts exactly the attachments whose uploader is in the trusted set.
#[derive(Default)]
pub struct UploaderTrustCalculator;

impl AttachmentTrustCalculator for UploaderTrustCalculator {
    fn calculate(&self, attachment: &Attachment) -> bool {
        attachment.is_uploader_trusted()
    }
}

pub fn parameters_hash(parameters: &NetworkParameters) -> SecureHash {
    SerializedBytes::serialize(parameters).expect("parameters serialize").hash()
}

/// All the in-memory stores bundled together, plus the support binding built
/// over them. Tests populate the stores and hand `support()` to the verifier.
pub struct TestStores {
    pub transactions: Arc<InMemoryTransactionStore>,
    pub attachments: Arc<InMemoryAttachmentStore>,
    pub identities: Arc<InMemoryIdentityService>,
    pub network_parameters: Arc<InMemoryNetworkParametersService>,
}

impl TestStores {
    pub fn new(current_parameters: NetworkParameters) -> Self {
        Self {
            transactions: Arc::new(InMemoryTransactionStore::default()),
            attachments: Arc::new(InMemoryAttachmentStore::default()),
            identities: Arc::new(InMemoryIdentityService::default()),
            network_parameters: Arc::new(InMemoryNetworkParametersService::new(current_parameters)),
        }
    }

    pub fn support(&self) -> StoreVerificationSupport {
        self.support_with_fixups(AttachmentFixups::new())
    }

    pub fn support_with_fixups(&self, fixups: AttachmentFixups) -> StoreVerificationSupport {
        StoreVerificationSupport::new(
            self.transactions.clone(),
            self.attachments.clone(),
            self.identities.clone(),
            self.network_parameters.clone(),
            Arc::new(UploaderTrustCalculator),
            fixups,
        )
    }
}

pub fn network_parameters(epoch: u32) -> NetworkParameters {
    NetworkParameters {
        min_platform_version: 1,
        epoch,
        modified_time: 1_700_000_000_000 + u64::from(epoch),
        max_message_size: 10 * 1024 * 1024,
        max_transaction_size: 512 * 1024,
    }
}

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

/// A deterministic attachment whose id is derived from its contents.
pub fn attachment(uploader: &str, version: u32, entries: &[&str]) -> Attachment {
    let bytes: Vec<u8> = entries.join("\n").into_bytes();
    Attachment {
        id: SecureHash::hash(&bytes),
        uploader: Some(uploader.to_owned()),
        version,
        entries: entries.iter().map(|entry| (*entry).to_owned()).collect(),
        bytes,
    }
}

/// An attachment from a trusted uploader carrying the class file for
/// `class_name`.
pub fn contract_attachment(class_name: &str, version: u32) -> Attachment {
    let entry = format!("{}.class", class_name.replace('.', "/"));
    attachment(DEPLOYED_APP_UPLOADER, version, &["META-INF/MANIFEST.MF", &entry])
}

pub fn state(contract: &str, notary: &Party, participants: Vec<PublicKeyBytes>) -> TransactionState {
    TransactionState {
        contract: contract.to_owned(),
        notary: notary.clone(),
        participants,
        data: vec![1, 2, 3],
    }
}

pub struct WireTransactionParams<'a> {
    pub inputs: Vec<StateRef>,
    pub references: Vec<StateRef>,
    pub outputs: Vec<TransactionState>,
    pub signer: PublicKeyBytes,
    pub attachments: Vec<SecureHash>,
    pub notary: &'a Party,
    pub network_parameters_hash: Option<SecureHash>,
}

pub fn wire_transaction(params: WireTransactionParams<'_>) -> WireTransaction {
    WireTransaction {
        inputs: params.inputs,
        references: params.references,
        outputs: params
            .outputs
            .iter()
            .map(|output| SerializedBytes::serialize(output).expect("test states serialize"))
            .collect(),
        commands: vec![Command::new("Move", vec![params.signer])],
        attachments: params.attachments,
        notary: Some(params.notary.clone()),
        network_parameters_hash: params.network_parameters_hash,
    }
}

/// Signs a core transaction with every given keypair.
pub fn sign_transaction(
    transaction: CoreTransaction,
    keypairs: &[&PartyKeyPair],
) -> SignedTransaction {
    let id = transaction.id();
    let mut sigs = keypairs
        .iter()
        .map(|keypair| sign_signable(keypair, &SignableData::new(id, test_metadata())));
    let head = sigs.next().expect("at least one signer");
    let sigs = NonEmpty { head, tail: sigs.collect() };
    SignedTransaction::new(transaction, sigs).expect("test transactions serialize")
}
