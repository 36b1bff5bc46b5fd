// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! The store-backed [`VerificationSupport`] binding: resolves everything
//! against the node's own stores. The collaborator traits here are the
//! contracts those stores must satisfy; their implementations (database
//! mappings, caching) live outside this crate.

use std::collections::BTreeSet;
use std::sync::Arc;

use types::attachment::{Attachment, AttachmentQuery};
use types::contracts::{SerializedBytes, SerializedStateAndRef, StateRef, TransactionState};
use types::crypto::PublicKeyBytes;
use types::digests::SecureHash;
use types::error::{TesseraError, TesseraResult};
use types::identity::Party;
use types::network_parameters::NetworkParameters;
use types::transaction::{
    ContractUpgradeWireTransaction, CoreTransaction, NotaryChangeWireTransaction,
    SignedTransaction,
};

use crate::fixup::AttachmentFixups;
use crate::no_db_access::NoDbAccessVerifier;
use crate::support::{ContractVerifier, VerificationSupport};

pub trait TransactionStore: Send + Sync {
    fn get_transaction(&self, id: &SecureHash) -> Option<SignedTransaction>;
}

pub trait AttachmentStore: Send + Sync {
    fn open_attachment(&self, id: &SecureHash) -> Option<Attachment>;
    fn query_attachments(&self, query: &AttachmentQuery) -> Vec<SecureHash>;
}

pub trait IdentityService: Send + Sync {
    fn party_from_key(&self, key: &PublicKeyBytes) -> Option<Party>;
}

pub trait NetworkParametersService: Send + Sync {
    fn lookup(&self, hash: &SecureHash) -> Option<NetworkParameters>;
    fn default_hash(&self) -> SecureHash;
}

pub trait AttachmentTrustCalculator: Send + Sync {
    fn calculate(&self, attachment: &Attachment) -> bool;
}

pub struct StoreVerificationSupport {
    transactions: Arc<dyn TransactionStore>,
    attachments: Arc<dyn AttachmentStore>,
    identities: Arc<dyn IdentityService>,
    network_parameters: Arc<dyn NetworkParametersService>,
    trust_calculator: Arc<dyn AttachmentTrustCalculator>,
    fixups: AttachmentFixups,
}

impl StoreVerificationSupport {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        attachments: Arc<dyn AttachmentStore>,
        identities: Arc<dyn IdentityService>,
        network_parameters: Arc<dyn NetworkParametersService>,
        trust_calculator: Arc<dyn AttachmentTrustCalculator>,
        fixups: AttachmentFixups,
    ) -> Self {
        Self { transactions, attachments, identities, network_parameters, trust_calculator, fixups }
    }

    fn get_required_transaction(&self, id: &SecureHash) -> TesseraResult<SignedTransaction> {
        self.transactions
            .get_transaction(id)
            .ok_or(TesseraError::TransactionResolution { id: *id })
    }

    /// Output `index` of a contract-upgrade transaction: the corresponding
    /// input state with its contract class replaced.
    fn resolve_contract_upgrade_output(
        &self,
        ctx: &ContractUpgradeWireTransaction,
        state_ref: &StateRef,
    ) -> TesseraResult<SerializedBytes<TransactionState>> {
        let input_ref = ctx
            .inputs
            .get(state_ref.index as usize)
            .copied()
            .ok_or(TesseraError::TransactionResolution { id: state_ref.txhash })?;
        let input = self.get_state_and_ref(&input_ref)?;
        let upgraded = TransactionState {
            contract: ctx.upgraded_contract_class_name.clone(),
            ..input.state
        };
        SerializedBytes::serialize(&upgraded)
    }

    /// Output `index` of a notary-change transaction: the corresponding input
    /// state with the notary swapped. Resolution recurses through chains of
    /// prior notary changes via `get_state_and_ref`.
    fn resolve_notary_change_output(
        &self,
        ntx: &NotaryChangeWireTransaction,
        state_ref: &StateRef,
    ) -> TesseraResult<SerializedBytes<TransactionState>> {
        let input_ref = ntx
            .inputs
            .get(state_ref.index as usize)
            .copied()
            .ok_or(TesseraError::TransactionResolution { id: state_ref.txhash })?;
        let input = self.get_state_and_ref(&input_ref)?;
        let reissued = TransactionState { notary: ntx.new_notary.clone(), ..input.state };
        SerializedBytes::serialize(&reissued)
    }

    /// Finds the attachment carrying the contract code for a state,
    /// recursing through notary-change transactions whose outputs have no
    /// attachments of their own.
    pub fn load_contract_attachment(&self, state_ref: &StateRef) -> TesseraResult<Attachment> {
        self.load_contract_attachment_for(state_ref, None)
    }

    fn load_contract_attachment_for(
        &self,
        state_ref: &StateRef,
        for_contract_class_name: Option<&str>,
    ) -> TesseraResult<Attachment> {
        let stx = self.get_required_transaction(&state_ref.txhash)?;
        match stx.core_transaction()? {
            CoreTransaction::Wire(wire) => {
                let contract = match for_contract_class_name {
                    Some(name) => name.to_owned(),
                    None => {
                        let output = wire
                            .outputs
                            .get(state_ref.index as usize)
                            .ok_or(TesseraError::TransactionResolution { id: state_ref.txhash })?
                            .deserialize()?;
                        output.contract
                    }
                };
                for id in &wire.attachments {
                    if let Some(attachment) = self.attachments.open_attachment(id) {
                        if attachment.contains_class(&contract) {
                            return Ok(attachment);
                        }
                    }
                }
                Err(TesseraError::AttachmentResolution { id: state_ref.txhash })
            }
            CoreTransaction::ContractUpgrade(ctx) => self
                .attachments
                .open_attachment(&ctx.upgraded_contract_attachment_id)
                .ok_or(TesseraError::AttachmentResolution { id: state_ref.txhash }),
            CoreTransaction::NotaryChange(ntx) => {
                let state = self.get_state_and_ref(state_ref)?.state;
                let input = ntx
                    .inputs
                    .first()
                    .copied()
                    .ok_or(TesseraError::AttachmentResolution { id: state_ref.txhash })?;
                self.load_contract_attachment_for(&input, Some(&state.contract))
            }
            CoreTransaction::Filtered(_) => Err(TesseraError::UnexpectedTransactionType {
                expected: "a resolvable transaction".to_owned(),
                actual: "FilteredTransaction".to_owned(),
            }),
        }
    }
}

impl VerificationSupport for StoreVerificationSupport {
    fn get_party(&self, key: &PublicKeyBytes) -> TesseraResult<Option<Party>> {
        Ok(self.identities.party_from_key(key))
    }

    fn get_attachment(&self, id: &SecureHash) -> TesseraResult<Option<Attachment>> {
        Ok(self.attachments.open_attachment(id))
    }

    fn is_attachment_trusted(&self, attachment: &Attachment) -> TesseraResult<bool> {
        Ok(self.trust_calculator.calculate(attachment))
    }

    fn get_network_parameters(
        &self,
        id: Option<&SecureHash>,
    ) -> TesseraResult<Option<NetworkParameters>> {
        let hash = id.copied().unwrap_or_else(|| self.network_parameters.default_hash());
        Ok(self.network_parameters.lookup(&hash))
    }

    fn get_signed_transaction(&self, id: &SecureHash) -> TesseraResult<Option<SignedTransaction>> {
        Ok(self.transactions.get_transaction(id))
    }

    fn get_serialized_state(&self, state_ref: &StateRef) -> TesseraResult<SerializedStateAndRef> {
        let stx = self.get_required_transaction(&state_ref.txhash)?;
        let serialized_state = match stx.core_transaction()? {
            CoreTransaction::Wire(wire) => wire
                .outputs
                .get(state_ref.index as usize)
                .cloned()
                .ok_or(TesseraError::TransactionResolution { id: state_ref.txhash })?,
            CoreTransaction::ContractUpgrade(ctx) => {
                self.resolve_contract_upgrade_output(ctx, state_ref)?
            }
            CoreTransaction::NotaryChange(ntx) => {
                self.resolve_notary_change_output(ntx, state_ref)?
            }
            CoreTransaction::Filtered(_) => {
                return Err(TesseraError::UnexpectedTransactionType {
                    expected: "a resolvable transaction".to_owned(),
                    actual: "FilteredTransaction".to_owned(),
                })
            }
        };
        Ok(SerializedStateAndRef { serialized_state, reference: *state_ref })
    }

    fn get_trusted_class_attachment(&self, class_name: &str) -> TesseraResult<Option<Attachment>> {
        let candidates =
            self.attachments.query_attachments(&AttachmentQuery::trusted_by_version_desc());
        for id in candidates {
            let Some(attachment) = self.attachments.open_attachment(&id) else { continue };
            if attachment.contains_class(class_name) {
                return Ok(Some(attachment));
            }
        }
        Ok(None)
    }

    fn fixup_attachment_ids(&self, ids: &[SecureHash]) -> TesseraResult<BTreeSet<SecureHash>> {
        Ok(self.fixups.fixup_attachment_ids(ids))
    }

    /// Contract verification must not touch the database; the decorator
    /// blocks access for the duration of the inner verify.
    fn do_verify(&self, verifier: &dyn ContractVerifier) -> TesseraResult {
        NoDbAccessVerifier::new(verifier).verify()
    }
}
