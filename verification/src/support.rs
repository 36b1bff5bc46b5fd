// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! The capability set a transaction verifier needs from its environment.
//!
//! Every resolution backend implements [`VerificationSupport`]: the
//! store-backed binding reads node storage directly, while the external
//! verifier process implements it over its request/response channel. The
//! verifier pipeline only ever talks to this trait.

use std::collections::BTreeSet;

use types::attachment::Attachment;
use types::contracts::{SerializedStateAndRef, StateAndRef, StateRef};
use types::crypto::PublicKeyBytes;
use types::digests::SecureHash;
use types::error::{TesseraError, TesseraResult};
use types::identity::Party;
use types::network_parameters::NetworkParameters;
use types::transaction::{LedgerTransaction, SignedTransaction};

/// Runs the contract-level checks over a resolved transaction. Construction
/// chooses the attachment set, so the repair path can retry with an
/// augmented one.
pub trait ContractVerifier {
    fn verify(&self) -> TesseraResult;
}

pub trait VerificationSupport {
    fn get_party(&self, key: &PublicKeyBytes) -> TesseraResult<Option<Party>>;

    fn get_attachment(&self, id: &SecureHash) -> TesseraResult<Option<Attachment>>;

    fn is_attachment_trusted(&self, attachment: &Attachment) -> TesseraResult<bool>;

    /// `None` means the current network parameters.
    fn get_network_parameters(
        &self,
        id: Option<&SecureHash>,
    ) -> TesseraResult<Option<NetworkParameters>>;

    fn get_signed_transaction(&self, id: &SecureHash) -> TesseraResult<Option<SignedTransaction>>;

    /// The serialized output state a `StateRef` points at, resolved according
    /// to the owning transaction's variant.
    fn get_serialized_state(&self, state_ref: &StateRef) -> TesseraResult<SerializedStateAndRef>;

    /// Scans attachments from trusted uploaders, highest version first, for
    /// one carrying the class file. Deliberately uncached; callers that care
    /// memoize.
    fn get_trusted_class_attachment(&self, class_name: &str) -> TesseraResult<Option<Attachment>>;

    /// Applies node-local fix-up rules to an attachment id set.
    fn fixup_attachment_ids(&self, ids: &[SecureHash]) -> TesseraResult<BTreeSet<SecureHash>>;

    fn get_state_and_ref(&self, state_ref: &StateRef) -> TesseraResult<StateAndRef> {
        self.get_serialized_state(state_ref)?.to_state_and_ref()
    }

    fn create_verifier(
        &self,
        ltx: &LedgerTransaction,
        attachments: Vec<Attachment>,
    ) -> Box<dyn ContractVerifier + '_> {
        Box::new(DefaultContractVerifier::new(ltx, attachments))
    }

    fn do_verify(&self, verifier: &dyn ContractVerifier) -> TesseraResult {
        verifier.verify()
    }
}

/// The standard contract verifier: every contract class named by an input or
/// output state must be resolvable from the attachment set. Contract
/// execution itself happens behind this resolution boundary and is supplied
/// by the application.
pub struct DefaultContractVerifier {
    tx_id: SecureHash,
    contract_class_names: BTreeSet<String>,
    attachments: Vec<Attachment>,
}

impl DefaultContractVerifier {
    pub fn new(ltx: &LedgerTransaction, attachments: Vec<Attachment>) -> Self {
        Self {
            tx_id: ltx.id,
            contract_class_names: ltx.contract_class_names(),
            attachments,
        }
    }
}

impl ContractVerifier for DefaultContractVerifier {
    fn verify(&self) -> TesseraResult {
        for class_name in &self.contract_class_names {
            let found = self
                .attachments
                .iter()
                .any(|attachment| attachment.contains_class(class_name));
            if !found {
                tracing::debug!(
                    tx_id = %self.tx_id,
                    class_name = %class_name,
                    "contract class not found in any attachment"
                );
                return Err(TesseraError::MissingContractClass { class_name: class_name.clone() });
            }
        }
        Ok(())
    }
}
