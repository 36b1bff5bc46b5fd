// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! The signed-transaction verification pipeline.
//!
//! Verification proceeds in a fixed order: network-parameter epoch ordering
//! across the input lineage, then signature checks, then a dispatch on the
//! core-transaction variant. Notary-change and contract-upgrade transactions
//! are fully validated by resolution and signature checks; ordinary wire
//! transactions additionally run contract verification, with a one-shot
//! repair path for transactions that predate network-parameter tracking.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use types::attachment::Attachment;
use types::contracts::StateRef;
use types::crypto::PublicKeyBytes;
use types::digests::SecureHash;
use types::error::{TesseraError, TesseraResult};
use types::network_parameters::NetworkParameters;
use types::transaction::{
    ContractUpgradeWireTransaction, CoreTransaction, LedgerTransaction,
    NotaryChangeWireTransaction, SignedTransaction,
};

use crate::support::VerificationSupport;

/// Verifies signed transactions against a [`VerificationSupport`] backend.
pub struct TransactionVerifier<'a> {
    support: &'a dyn VerificationSupport,
}

impl<'a> TransactionVerifier<'a> {
    pub fn new(support: &'a dyn VerificationSupport) -> Self {
        Self { support }
    }

    /// Full verification: parameter ordering, signatures, then the
    /// variant-specific checks. No partial success; the first failure is
    /// returned and nothing is recorded.
    pub fn verify(
        &self,
        stx: &SignedTransaction,
        check_sufficient_signatures: bool,
    ) -> TesseraResult {
        self.check_network_parameters_ordering(stx)?;
        self.verify_resolved(stx, check_sufficient_signatures)
    }

    /// Everything except the cross-lineage parameter ordering check. Used by
    /// backends that pre-check ordering where the dependency transactions are
    /// actually available, such as the node before proxying a request to the
    /// external verifier process.
    pub fn verify_resolved(
        &self,
        stx: &SignedTransaction,
        check_sufficient_signatures: bool,
    ) -> TesseraResult {
        match stx.core_transaction()? {
            CoreTransaction::NotaryChange(ntx) => {
                self.verify_notary_change(stx, ntx, check_sufficient_signatures)
            }
            CoreTransaction::ContractUpgrade(ctx) => {
                self.verify_contract_upgrade(stx, ctx, check_sufficient_signatures)
            }
            CoreTransaction::Wire(_) => self.verify_regular(stx, check_sufficient_signatures),
            CoreTransaction::Filtered(_) => Err(TesseraError::UnexpectedTransactionType {
                expected: "a verifiable transaction".to_owned(),
                actual: "FilteredTransaction".to_owned(),
            }),
        }
    }

    /// Requires the network-parameter epoch of every input and reference
    /// state's originating transaction to be no newer than this transaction's
    /// epoch. A violation is terminal and reports the offending state plus
    /// both parameter sets.
    pub fn check_network_parameters_ordering(&self, stx: &SignedTransaction) -> TesseraResult {
        let id = stx.id()?;
        let tx_parameters = self.required_network_parameters(stx, id)?;

        let mut grouped: BTreeMap<_, Vec<StateRef>> = BTreeMap::new();
        for state_ref in stx.inputs()?.into_iter().chain(stx.references()?) {
            grouped.entry(state_ref.txhash).or_default().push(state_ref);
        }
        for (txhash, state_refs) in grouped {
            let dependency = self
                .support
                .get_signed_transaction(&txhash)?
                .ok_or(TesseraError::TransactionResolution { id: txhash })?;
            let input_parameters = self.required_network_parameters(&dependency, txhash)?;
            if tx_parameters.epoch < input_parameters.epoch {
                return Err(TesseraError::NetworkParametersOrdering {
                    tx_id: id,
                    state_ref: state_refs[0],
                    tx_parameters,
                    input_parameters,
                });
            }
        }
        Ok(())
    }

    fn required_network_parameters(
        &self,
        stx: &SignedTransaction,
        id: SecureHash,
    ) -> TesseraResult<NetworkParameters> {
        self.support
            .get_network_parameters(stx.network_parameters_hash()?.as_ref())?
            .ok_or(TesseraError::TransactionResolution { id })
    }

    /// No contract code runs for a notary change; resolution and signature
    /// checks capture its validity entirely.
    fn verify_notary_change(
        &self,
        stx: &SignedTransaction,
        ntx: &NotaryChangeWireTransaction,
        check_sufficient_signatures: bool,
    ) -> TesseraResult {
        let id = stx.id()?;
        stx.check_signatures_are_valid()?;
        if ntx.inputs.is_empty() {
            return Err(TesseraError::InvariantViolation {
                tx_id: id,
                message: "a notary change transaction must consume at least one state".to_owned(),
            });
        }
        if ntx.new_notary == ntx.notary {
            return Err(TesseraError::InvariantViolation {
                tx_id: id,
                message: "the new notary must differ from the current notary".to_owned(),
            });
        }
        for input_ref in &ntx.inputs {
            let input = self.support.get_state_and_ref(input_ref)?;
            if input.state.notary != ntx.notary {
                return Err(TesseraError::InvariantViolation {
                    tx_id: id,
                    message: format!(
                        "input {input_ref} is not under the notary being changed"
                    ),
                });
            }
        }
        if check_sufficient_signatures {
            self.check_notary_signed(stx, &ntx.notary.owning_key, id)?;
        }
        Ok(())
    }

    /// Contract upgrades likewise validate by construction: both attachments
    /// must resolve and the inputs must exist. The upgraded contract's own
    /// logic is not run here.
    fn verify_contract_upgrade(
        &self,
        stx: &SignedTransaction,
        ctx: &ContractUpgradeWireTransaction,
        check_sufficient_signatures: bool,
    ) -> TesseraResult {
        let id = stx.id()?;
        stx.check_signatures_are_valid()?;
        if ctx.inputs.is_empty() {
            return Err(TesseraError::InvariantViolation {
                tx_id: id,
                message: "a contract upgrade transaction must consume at least one state".to_owned(),
            });
        }
        if ctx.legacy_contract_attachment_id == ctx.upgraded_contract_attachment_id {
            return Err(TesseraError::InvariantViolation {
                tx_id: id,
                message: "the upgraded contract attachment must differ from the legacy one"
                    .to_owned(),
            });
        }
        for attachment_id in [
            &ctx.legacy_contract_attachment_id,
            &ctx.upgraded_contract_attachment_id,
        ] {
            self.support
                .get_attachment(attachment_id)?
                .ok_or(TesseraError::AttachmentResolution { id: *attachment_id })?;
        }
        for input_ref in &ctx.inputs {
            self.support.get_state_and_ref(input_ref)?;
        }
        if check_sufficient_signatures {
            self.check_notary_signed(stx, &ctx.notary.owning_key, id)?;
        }
        Ok(())
    }

    fn check_notary_signed(
        &self,
        stx: &SignedTransaction,
        notary_key: &PublicKeyBytes,
        id: SecureHash,
    ) -> TesseraResult {
        if stx.sigs().iter().any(|sig| sig.by == *notary_key) {
            return Ok(());
        }
        Err(TesseraError::SignaturesMissing {
            missing: vec![notary_key.concise()],
            descriptions: vec!["notary".to_owned()],
            id,
        })
    }

    fn verify_regular(
        &self,
        stx: &SignedTransaction,
        check_sufficient_signatures: bool,
    ) -> TesseraResult {
        let ltx = self.resolve_ledger_transaction(stx, check_sufficient_signatures)?;
        let verifier = self.support.create_verifier(&ltx, ltx.attachments.clone());
        match self.support.do_verify(verifier.as_ref()) {
            Ok(()) => Ok(()),
            Err(TesseraError::MissingContractClass { class_name }) => {
                self.check_reverify_allowed(
                    stx,
                    TesseraError::MissingContractClass { class_name: class_name.clone() },
                )?;
                warn!(tx_id = %ltx.id, class_name = %class_name, "transaction has a missing class");
                self.reverify_with_fixups(&ltx, Some(&class_name))
            }
            Err(error @ TesseraError::MissingSerializer { .. }) => {
                self.check_reverify_allowed(stx, error.clone())?;
                warn!(tx_id = %ltx.id, %error, "transaction has a missing custom serializer");
                self.reverify_with_fixups(&ltx, None)
            }
            Err(other) => Err(other),
        }
    }

    /// Resolves a wire transaction into the fully concrete view contract code
    /// runs over. Signature checks happen first so an unsigned transaction
    /// never causes store lookups on behalf of an attacker.
    pub fn resolve_ledger_transaction(
        &self,
        stx: &SignedTransaction,
        check_sufficient_signatures: bool,
    ) -> TesseraResult<LedgerTransaction> {
        if check_sufficient_signatures {
            stx.verify_required_signatures()?;
        } else {
            stx.check_signatures_are_valid()?;
        }
        let id = stx.id()?;
        let wire = stx.wire_transaction()?;
        let inputs = wire
            .inputs
            .iter()
            .map(|state_ref| self.support.get_state_and_ref(state_ref))
            .collect::<TesseraResult<Vec<_>>>()?;
        let references = wire
            .references
            .iter()
            .map(|state_ref| self.support.get_state_and_ref(state_ref))
            .collect::<TesseraResult<Vec<_>>>()?;
        let attachments = wire
            .attachments
            .iter()
            .map(|attachment_id| {
                self.support
                    .get_attachment(attachment_id)?
                    .ok_or(TesseraError::AttachmentResolution { id: *attachment_id })
            })
            .collect::<TesseraResult<Vec<_>>>()?;
        let network_parameters = self
            .support
            .get_network_parameters(wire.network_parameters_hash.as_ref())?
            .ok_or(TesseraError::TransactionResolution { id })?;
        Ok(LedgerTransaction {
            id,
            inputs,
            references,
            outputs: wire.output_states()?,
            commands: wire.commands.clone(),
            attachments,
            notary: wire.notary.clone(),
            network_parameters,
        })
    }

    /// Repair is only for transactions created before network-parameter
    /// tracking, detected by the absence of a parameters hash. Anything from
    /// the current format fails immediately with the original error.
    fn check_reverify_allowed(&self, stx: &SignedTransaction, error: TesseraError) -> TesseraResult {
        if stx.network_parameters_hash()?.is_some() {
            warn!(
                tx_id = %stx.id()?,
                "verification failed and no repair was attempted: the transaction carries a \
                 network parameters hash"
            );
            return Err(error);
        }
        Ok(())
    }

    fn reverify_with_fixups(
        &self,
        ltx: &LedgerTransaction,
        missing_class: Option<&str>,
    ) -> TesseraResult {
        warn!(
            tx_id = %ltx.id,
            "transaction does not carry all of its dependencies, possibly the result of a bug in \
             an earlier platform version; re-verifying with this node's fix-up rules applied"
        );
        let replacements = self.compute_replacement_attachments(ltx, missing_class)?;
        warn!(
            tx_id = %ltx.id,
            attachments = ?replacements.iter().map(|a| a.id).collect::<Vec<_>>(),
            "re-verifying with replacement attachments"
        );
        let verifier = self.support.create_verifier(ltx, replacements);
        self.support.do_verify(verifier.as_ref())
    }

    fn compute_replacement_attachments(
        &self,
        ltx: &LedgerTransaction,
        missing_class: Option<&str>,
    ) -> TesseraResult<Vec<Attachment>> {
        let original_ids = ltx.attachment_ids();
        let fixed_ids = self.support.fixup_attachment_ids(&original_ids)?;
        let original_set: BTreeSet<_> = original_ids.iter().copied().collect();
        if fixed_ids != original_set {
            return fixed_ids
                .iter()
                .map(|attachment_id| {
                    self.support
                        .get_attachment(attachment_id)?
                        .ok_or(TesseraError::AttachmentResolution { id: *attachment_id })
                })
                .collect();
        }

        // The fix-up rules changed nothing; without a named missing class
        // there is nothing further to go on.
        let Some(missing_class) = missing_class else {
            return Err(TesseraError::BrokenTransaction {
                tx_id: ltx.id,
                message: "no fix-up rules provided for the broken attachment set".to_owned(),
            });
        };

        // Fall back to scanning trusted attachments for the missing class.
        let extra = self
            .support
            .get_trusted_class_attachment(missing_class)?
            .ok_or_else(|| TesseraError::BrokenTransaction {
                tx_id: ltx.id,
                message: format!(
                    "no trusted attachment carries the missing class {missing_class}; ask the \
                     originator for the attachment and install it"
                ),
            })?;
        if original_set.contains(&extra.id) {
            // The augmented set would equal the original one, so retrying
            // could only fail the same way again.
            return Err(TesseraError::BrokenTransaction {
                tx_id: ltx.id,
                message: format!(
                    "class {missing_class} is unlinkable inside the broken attachment set"
                ),
            });
        }
        let mut replacements = ltx.attachments.clone();
        replacements.push(extra);
        Ok(replacements)
    }
}
