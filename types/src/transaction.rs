// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Transaction Module
//!
//! ## Overview
//! Core transaction types for the Tessera ledger: the wire forms that travel
//! between peers, the signed envelope that carries them, and the fully
//! resolved view handed to contract verification.
//!
//! ## Responsibilities
//! - Define the `CoreTransaction` variants and their identities
//! - Wrap serialized transactions with signatures (`SignedTransaction`)
//! - Enforce the signature-set invariants (validity, sufficiency)
//! - Support Merkle-proof-backed filtering of wire transactions
//!
//! ## Design Patterns
//! - Envelope pattern: `SignedTransaction` separates transaction bytes from
//!   signatures, so adding a signature never changes the transaction id
//! - Immutable values: derived transactions are new values, never mutations
//! - Lazy deserialization: the core transaction is decoded once and cached in
//!   a cell that is excluded from equality, hashing and serialization

use std::collections::BTreeSet;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};

use enum_dispatch::enum_dispatch;
use nonempty::NonEmpty;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;
use crate::contracts::{
    Command, SerializedBytes, SerializedTransactionState, StateAndRef, StateRef, TransactionState,
};
use crate::crypto::{default_hash, PublicKeyBytes, TransactionSignature};
use crate::digests::{HashAlgorithm, SecureHash};
use crate::error::{TesseraError, TesseraResult};
use crate::identity::Party;
use crate::merkle::{MerkleTree, PartialMerkleTree};
use crate::network_parameters::NetworkParameters;

/// Component group discriminants. The group index is folded into every leaf
/// hash so that components of different kinds can never collide in the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ComponentGroup {
    Inputs = 0,
    Outputs = 1,
    Commands = 2,
    Attachments = 3,
    Notary = 4,
    Parameters = 5,
    References = 6,
}

fn component_leaf<T: Serialize>(group: ComponentGroup, index: u32, value: &T) -> SecureHash {
    default_hash(&(group as u32, index, value))
}

/// Read access common to all core transaction variants.
#[enum_dispatch]
pub trait CoreTransactionAPI {
    /// The transaction id. For wire transactions this is the Merkle root over
    /// the component leaves, so it is independent of any signatures.
    fn id(&self) -> SecureHash;
    fn inputs(&self) -> Vec<StateRef>;
    fn references(&self) -> Vec<StateRef>;
    fn notary(&self) -> Option<Party>;
    fn network_parameters_hash(&self) -> Option<SecureHash>;
}

/// An ordinary transaction as assembled by a flow: consumes input states,
/// produces output states, and runs contract code from its attachments.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WireTransaction {
    pub inputs: Vec<StateRef>,
    pub references: Vec<StateRef>,
    pub outputs: Vec<SerializedTransactionState>,
    pub commands: Vec<Command>,
    pub attachments: Vec<SecureHash>,
    pub notary: Option<Party>,
    pub network_parameters_hash: Option<SecureHash>,
}

impl WireTransaction {
    fn component_leaves(&self) -> Vec<SecureHash> {
        self.all_components()
            .iter()
            .map(|(index, component)| component.leaf(*index))
            .collect()
    }

    /// Every component of this transaction paired with its index within its
    /// group, in group order. This is the leaf ordering of the id tree.
    pub fn all_components(&self) -> Vec<(u32, FilteredComponent)> {
        let mut components = Vec::new();
        for (i, input) in self.inputs.iter().enumerate() {
            components.push((i as u32, FilteredComponent::Input(*input)));
        }
        for (i, output) in self.outputs.iter().enumerate() {
            components.push((i as u32, FilteredComponent::Output(output.clone())));
        }
        for (i, command) in self.commands.iter().enumerate() {
            components.push((i as u32, FilteredComponent::Command(command.clone())));
        }
        for (i, attachment) in self.attachments.iter().enumerate() {
            components.push((i as u32, FilteredComponent::Attachment(*attachment)));
        }
        if let Some(notary) = &self.notary {
            components.push((0, FilteredComponent::Notary(notary.clone())));
        }
        if let Some(hash) = self.network_parameters_hash {
            components.push((0, FilteredComponent::NetworkParametersHash(hash)));
        }
        for (i, reference) in self.references.iter().enumerate() {
            components.push((i as u32, FilteredComponent::ReferenceInput(*reference)));
        }
        components
    }

    pub fn merkle_tree(&self) -> MerkleTree {
        let mut leaves = self.component_leaves();
        if leaves.is_empty() {
            leaves.push(SecureHash::zero(HashAlgorithm::default()));
        }
        MerkleTree::build(leaves).expect("component leaves share the default hash algorithm")
    }

    /// All keys that must sign: every command signer plus the notary.
    pub fn required_signing_keys(&self) -> BTreeSet<PublicKeyBytes> {
        let mut keys: BTreeSet<PublicKeyBytes> =
            self.commands.iter().flat_map(|command| command.signers.iter().copied()).collect();
        if let Some(notary) = &self.notary {
            keys.insert(notary.owning_key);
        }
        keys
    }

    /// Human-readable descriptions of what each of `keys` was meant to sign,
    /// used to name missing signers in errors.
    pub fn key_descriptions(&self, keys: &BTreeSet<PublicKeyBytes>) -> Vec<String> {
        let mut descriptions = Vec::new();
        for command in &self.commands {
            if command.signers.iter().any(|signer| keys.contains(signer)) {
                descriptions.push(command.to_string());
            }
        }
        if let Some(notary) = &self.notary {
            if keys.contains(&notary.owning_key) {
                descriptions.push("notary".to_owned());
            }
        }
        descriptions
    }

    pub fn output_states(&self) -> TesseraResult<Vec<TransactionState>> {
        self.outputs.iter().map(|output| output.deserialize()).collect()
    }

    /// Builds a [`FilteredTransaction`] revealing only the components the
    /// predicate selects, with a Merkle proof tying them to this
    /// transaction's id.
    pub fn build_filtered_transaction(
        &self,
        filtering: impl Fn(&FilteredComponent) -> bool,
    ) -> TesseraResult<FilteredTransaction> {
        let components: Vec<(u32, FilteredComponent)> = self
            .all_components()
            .into_iter()
            .filter(|(_, component)| filtering(component))
            .collect();
        let leaves: Vec<SecureHash> =
            components.iter().map(|(index, component)| component.leaf(*index)).collect();
        let partial_tree = PartialMerkleTree::build(&self.merkle_tree(), &leaves)?;
        Ok(FilteredTransaction { id: self.id(), partial_tree, components })
    }
}

impl CoreTransactionAPI for WireTransaction {
    fn id(&self) -> SecureHash {
        self.merkle_tree().hash()
    }

    fn inputs(&self) -> Vec<StateRef> {
        self.inputs.clone()
    }

    fn references(&self) -> Vec<StateRef> {
        self.references.clone()
    }

    fn notary(&self) -> Option<Party> {
        self.notary.clone()
    }

    fn network_parameters_hash(&self) -> Option<SecureHash> {
        self.network_parameters_hash
    }
}

/// Swaps the notary of its input states. Outputs are not stored: output `i`
/// is input `i`'s state with the new notary, recomputed at resolution time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotaryChangeWireTransaction {
    pub inputs: Vec<StateRef>,
    pub notary: Party,
    pub new_notary: Party,
    pub network_parameters_hash: Option<SecureHash>,
}

impl CoreTransactionAPI for NotaryChangeWireTransaction {
    fn id(&self) -> SecureHash {
        default_hash(&("notary_change", self))
    }

    fn inputs(&self) -> Vec<StateRef> {
        self.inputs.clone()
    }

    fn references(&self) -> Vec<StateRef> {
        Vec::new()
    }

    fn notary(&self) -> Option<Party> {
        Some(self.notary.clone())
    }

    fn network_parameters_hash(&self) -> Option<SecureHash> {
        self.network_parameters_hash
    }
}

/// Upgrades the contract governing its input states. Output `i` is input
/// `i`'s state with the contract class replaced by the upgraded one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractUpgradeWireTransaction {
    pub inputs: Vec<StateRef>,
    pub notary: Party,
    pub legacy_contract_attachment_id: SecureHash,
    pub upgraded_contract_attachment_id: SecureHash,
    pub upgraded_contract_class_name: String,
    pub network_parameters_hash: Option<SecureHash>,
}

impl CoreTransactionAPI for ContractUpgradeWireTransaction {
    fn id(&self) -> SecureHash {
        default_hash(&("contract_upgrade", self))
    }

    fn inputs(&self) -> Vec<StateRef> {
        self.inputs.clone()
    }

    fn references(&self) -> Vec<StateRef> {
        Vec::new()
    }

    fn notary(&self) -> Option<Party> {
        Some(self.notary.clone())
    }

    fn network_parameters_hash(&self) -> Option<SecureHash> {
        self.network_parameters_hash
    }
}

/// A single revealed component of a filtered transaction, tagged by group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilteredComponent {
    Input(StateRef),
    ReferenceInput(StateRef),
    Output(SerializedTransactionState),
    Command(Command),
    Attachment(SecureHash),
    Notary(Party),
    NetworkParametersHash(SecureHash),
}

impl FilteredComponent {
    fn group(&self) -> ComponentGroup {
        match self {
            FilteredComponent::Input(_) => ComponentGroup::Inputs,
            FilteredComponent::ReferenceInput(_) => ComponentGroup::References,
            FilteredComponent::Output(_) => ComponentGroup::Outputs,
            FilteredComponent::Command(_) => ComponentGroup::Commands,
            FilteredComponent::Attachment(_) => ComponentGroup::Attachments,
            FilteredComponent::Notary(_) => ComponentGroup::Notary,
            FilteredComponent::NetworkParametersHash(_) => ComponentGroup::Parameters,
        }
    }

    fn leaf(&self, index: u32) -> SecureHash {
        match self {
            FilteredComponent::Input(value) => component_leaf(self.group(), index, value),
            FilteredComponent::ReferenceInput(value) => component_leaf(self.group(), index, value),
            FilteredComponent::Output(value) => component_leaf(self.group(), index, value),
            FilteredComponent::Command(value) => component_leaf(self.group(), index, value),
            FilteredComponent::Attachment(value) => component_leaf(self.group(), index, value),
            FilteredComponent::Notary(value) => component_leaf(self.group(), index, value),
            FilteredComponent::NetworkParametersHash(value) => {
                component_leaf(self.group(), index, value)
            }
        }
    }
}

/// A partial view of a wire transaction: only the revealed components, with a
/// Merkle proof tying them to the full transaction's id. Used where a party
/// (typically the notary) must see some components without seeing the rest.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilteredTransaction {
    id: SecureHash,
    partial_tree: PartialMerkleTree,
    components: Vec<(u32, FilteredComponent)>,
}

impl FilteredTransaction {
    /// Checks every revealed component against the embedded proof and the
    /// proof against the transaction id.
    pub fn verify(&self) -> TesseraResult {
        let leaves: Vec<SecureHash> =
            self.components.iter().map(|(index, component)| component.leaf(*index)).collect();
        self.partial_tree.verify(self.id, &leaves)
    }

    pub fn components(&self) -> &[(u32, FilteredComponent)] {
        &self.components
    }

    pub fn partial_tree(&self) -> &PartialMerkleTree {
        &self.partial_tree
    }
}

impl CoreTransactionAPI for FilteredTransaction {
    fn id(&self) -> SecureHash {
        self.id
    }

    fn inputs(&self) -> Vec<StateRef> {
        self.components
            .iter()
            .filter_map(|(_, component)| match component {
                FilteredComponent::Input(state_ref) => Some(*state_ref),
                _ => None,
            })
            .collect()
    }

    fn references(&self) -> Vec<StateRef> {
        self.components
            .iter()
            .filter_map(|(_, component)| match component {
                FilteredComponent::ReferenceInput(state_ref) => Some(*state_ref),
                _ => None,
            })
            .collect()
    }

    fn notary(&self) -> Option<Party> {
        self.components.iter().find_map(|(_, component)| match component {
            FilteredComponent::Notary(party) => Some(party.clone()),
            _ => None,
        })
    }

    fn network_parameters_hash(&self) -> Option<SecureHash> {
        self.components.iter().find_map(|(_, component)| match component {
            FilteredComponent::NetworkParametersHash(hash) => Some(*hash),
            _ => None,
        })
    }
}

/// The sum of every transaction form that can travel between peers.
#[enum_dispatch(CoreTransactionAPI)]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoreTransaction {
    Wire(WireTransaction),
    NotaryChange(NotaryChangeWireTransaction),
    ContractUpgrade(ContractUpgradeWireTransaction),
    Filtered(FilteredTransaction),
}

impl CoreTransaction {
    pub fn kind_name(&self) -> &'static str {
        match self {
            CoreTransaction::Wire(_) => "WireTransaction",
            CoreTransaction::NotaryChange(_) => "NotaryChangeWireTransaction",
            CoreTransaction::ContractUpgrade(_) => "ContractUpgradeWireTransaction",
            CoreTransaction::Filtered(_) => "FilteredTransaction",
        }
    }
}

/// A serialized core transaction together with one or more signatures over
/// its id. The signatures might be invalid or insufficient: holding a
/// `SignedTransaction` does not imply validity.
#[derive(Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    tx_bits: SerializedBytes<CoreTransaction>,
    sigs: NonEmpty<TransactionSignature>,
    #[serde(skip)]
    cached_transaction: OnceCell<CoreTransaction>,
}

impl SignedTransaction {
    /// Wraps an in-memory core transaction, seeding the deserialization cache
    /// so the transaction is not decoded again.
    pub fn new(
        transaction: CoreTransaction,
        sigs: NonEmpty<TransactionSignature>,
    ) -> TesseraResult<Self> {
        let tx_bits = SerializedBytes::serialize(&transaction)?;
        let cached_transaction = OnceCell::new();
        let _ = cached_transaction.set(transaction);
        Ok(Self { tx_bits, sigs, cached_transaction })
    }

    /// Wraps transaction bytes received off the wire. Decoding is deferred to
    /// the first access.
    pub fn from_bits(
        tx_bits: SerializedBytes<CoreTransaction>,
        sigs: NonEmpty<TransactionSignature>,
    ) -> Self {
        Self { tx_bits, sigs, cached_transaction: OnceCell::new() }
    }

    pub fn tx_bits(&self) -> &SerializedBytes<CoreTransaction> {
        &self.tx_bits
    }

    pub fn sigs(&self) -> &NonEmpty<TransactionSignature> {
        &self.sigs
    }

    /// The contained core transaction, deserialized once and cached.
    pub fn core_transaction(&self) -> TesseraResult<&CoreTransaction> {
        self.cached_transaction.get_or_try_init(|| self.tx_bits.deserialize())
    }

    /// The id of the contained transaction. Signatures are not part of it.
    pub fn id(&self) -> TesseraResult<SecureHash> {
        Ok(self.core_transaction()?.id())
    }

    /// The contained [`WireTransaction`], or an error for the special
    /// transaction forms.
    pub fn wire_transaction(&self) -> TesseraResult<&WireTransaction> {
        match self.core_transaction()? {
            CoreTransaction::Wire(wire) => Ok(wire),
            other => Err(TesseraError::UnexpectedTransactionType {
                expected: "WireTransaction".to_owned(),
                actual: other.kind_name().to_owned(),
            }),
        }
    }

    pub fn inputs(&self) -> TesseraResult<Vec<StateRef>> {
        Ok(self.core_transaction()?.inputs())
    }

    pub fn references(&self) -> TesseraResult<Vec<StateRef>> {
        Ok(self.core_transaction()?.references())
    }

    pub fn notary(&self) -> TesseraResult<Option<Party>> {
        Ok(self.core_transaction()?.notary())
    }

    pub fn network_parameters_hash(&self) -> TesseraResult<Option<SecureHash>> {
        Ok(self.core_transaction()?.network_parameters_hash())
    }

    /// The same transaction with one more (unchecked) signature. The
    /// deserialization cache carries over.
    pub fn with_additional_signature(&self, sig: TransactionSignature) -> Self {
        let mut new = self.clone();
        new.sigs.push(sig);
        new
    }

    /// The same transaction with more (unchecked) signatures.
    pub fn with_additional_signatures(
        &self,
        sigs: impl IntoIterator<Item = TransactionSignature>,
    ) -> Self {
        let mut new = self.clone();
        new.sigs.extend(sigs);
        new
    }

    /// Checks that every attached signature is valid for this transaction's
    /// id. Does not check that the signer set is sufficient.
    pub fn check_signatures_are_valid(&self) -> TesseraResult {
        let id = self.id()?;
        for sig in self.sigs.iter() {
            sig.verify(id)?;
        }
        Ok(())
    }

    /// Checks signature validity and that every required signing key has
    /// signed, reporting the missing keys and what they were meant to sign.
    pub fn verify_required_signatures(&self) -> TesseraResult {
        self.verify_signatures_except(&BTreeSet::new())
    }

    /// As [`verify_required_signatures`](Self::verify_required_signatures),
    /// but tolerating the given keys being absent.
    pub fn verify_signatures_except(
        &self,
        allowed_to_be_missing: &BTreeSet<PublicKeyBytes>,
    ) -> TesseraResult {
        self.check_signatures_are_valid()?;
        let wire = self.wire_transaction()?;
        let signed_by: BTreeSet<PublicKeyBytes> = self.sigs.iter().map(|sig| sig.by).collect();
        let missing: BTreeSet<PublicKeyBytes> = wire
            .required_signing_keys()
            .into_iter()
            .filter(|key| !signed_by.contains(key) && !allowed_to_be_missing.contains(key))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let descriptions = wire.key_descriptions(&missing);
        Err(TesseraError::SignaturesMissing {
            missing: missing.iter().map(|key| key.concise()).collect(),
            descriptions,
            id: self.id()?,
        })
    }
}

impl PartialEq for SignedTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.tx_bits == other.tx_bits && self.sigs == other.sigs
    }
}

impl Eq for SignedTransaction {}

impl Hash for SignedTransaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Hash::hash(&self.tx_bits, state);
        for sig in self.sigs.iter() {
            sig.hash(state);
        }
    }
}

impl Debug for SignedTransaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.id() {
            Ok(id) => write!(f, "SignedTransaction(id={id})"),
            Err(_) => write!(f, "SignedTransaction(bits={:?})", self.tx_bits),
        }
    }
}

/// A wire transaction with every reference resolved: concrete input states,
/// attachment contents and network parameters. Built only after signature
/// and parameter checks pass; this is the view contract code runs over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub id: SecureHash,
    pub inputs: Vec<StateAndRef>,
    pub references: Vec<StateAndRef>,
    pub outputs: Vec<TransactionState>,
    pub commands: Vec<Command>,
    pub attachments: Vec<Attachment>,
    pub notary: Option<Party>,
    pub network_parameters: NetworkParameters,
}

impl LedgerTransaction {
    /// Every contract class named by an input or output state.
    pub fn contract_class_names(&self) -> BTreeSet<String> {
        self.inputs
            .iter()
            .map(|input| input.state.contract.clone())
            .chain(self.outputs.iter().map(|output| output.contract.clone()))
            .collect()
    }

    pub fn attachment_ids(&self) -> Vec<SecureHash> {
        self.attachments.iter().map(|attachment| attachment.id).collect()
    }
}
