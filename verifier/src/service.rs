// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! Child-side service loop of the external verifier process.
//!
//! The loop reads one verification request at a time and verifies it with a
//! [`VerificationSupport`] binding that proxies lookups back to the node.
//! Remote lookups are memoized for the lifetime of the process with
//! present/absent-aware caches: a `None` answer is cached as known-absent,
//! distinct from not-yet-requested, so repeated lookups of a missing key cost
//! one round-trip, not one per lookup.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hash;
use std::io::{Read, Write};
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, info};

use types::attachment::Attachment;
use types::contracts::{SerializedStateAndRef, SerializedTransactionState, StateRef};
use types::crypto::PublicKeyBytes;
use types::digests::SecureHash;
use types::error::{TesseraError, TesseraResult};
use types::identity::Party;
use types::messages_verifier::{
    read_message, read_message_or_eof, write_message, AttachmentWithTrust,
    ExternalVerifierInbound, ExternalVerifierOutbound, VerificationResult, VerifierRequest,
};
use types::network_parameters::NetworkParameters;
use types::transaction::SignedTransaction;
use verification::fixup::AttachmentFixups;
use verification::support::VerificationSupport;
use verification::verifier::TransactionVerifier;

const CACHE_CAPACITY: usize = 1024;

fn protocol_error(message: impl Into<String>) -> TesseraError {
    TesseraError::ExternalVerifierConnection { message: message.into() }
}

/// A memoizing cache whose entries distinguish "known absent" (`Some(None)`)
/// from "not yet requested" (outer `None`).
struct OptionCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, Option<V>>>,
}

impl<K: Hash + Eq, V: Clone> OptionCache<K, V> {
    fn new() -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero");
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }

    fn lookup(&self, key: &K) -> Option<Option<V>> {
        self.inner.lock().get(key).cloned()
    }

    fn store(&self, key: K, value: Option<V>) {
        self.inner.lock().put(key, value);
    }

    fn get_or_fetch(
        &self,
        key: K,
        fetch: impl FnOnce() -> TesseraResult<Option<V>>,
    ) -> TesseraResult<Option<V>>
    where
        K: Clone,
    {
        if let Some(cached) = self.lookup(&key) {
            return Ok(cached);
        }
        let fetched = fetch()?;
        self.store(key, fetched.clone());
        Ok(fetched)
    }
}

/// The verifier process's half of the protocol. Created by the handshake,
/// after which [`run`](Self::run) serves verification requests until the node
/// closes the connection.
pub struct ExternalVerifier<S: Read + Write> {
    channel: Mutex<S>,
    fixups: AttachmentFixups,
    current_network_parameters: NetworkParameters,
    parties: OptionCache<PublicKeyBytes, Party>,
    attachments: OptionCache<SecureHash, AttachmentWithTrust>,
    network_parameters: OptionCache<SecureHash, NetworkParameters>,
    trusted_class_attachments: OptionCache<String, SecureHash>,
}

impl<S: Read + Write> ExternalVerifier<S> {
    /// Waits for the node's initialisation message and builds the verifier
    /// around it. Must complete before any verification request arrives.
    pub fn initialise(mut channel: S, fixups: AttachmentFixups) -> TesseraResult<Self> {
        info!("waiting for initialisation message from the node");
        let message: ExternalVerifierInbound = read_message(&mut channel)?;
        let ExternalVerifierInbound::Initialisation {
            custom_serializer_class_names,
            serialization_whitelist_class_names,
            custom_serialization_scheme_class_name,
            serialized_current_network_parameters,
        } = message
        else {
            return Err(protocol_error("expected an initialisation message first"));
        };
        // Serializer registration is the codec layer's concern; the names are
        // surfaced here for diagnostics only.
        debug!(
            custom_serializers = custom_serializer_class_names.len(),
            whitelists = serialization_whitelist_class_names.len(),
            scheme = ?custom_serialization_scheme_class_name,
            "received serialization configuration"
        );

        let current_network_parameters: NetworkParameters =
            serialized_current_network_parameters.deserialize()?;
        let verifier = Self {
            channel: Mutex::new(channel),
            fixups,
            current_network_parameters: current_network_parameters.clone(),
            parties: OptionCache::new(),
            attachments: OptionCache::new(),
            network_parameters: OptionCache::new(),
            trusted_class_attachments: OptionCache::new(),
        };
        // Seed the cache so a lookup by the current parameters' hash does not
        // go back over the channel.
        verifier.network_parameters.store(
            serialized_current_network_parameters.hash(),
            Some(current_network_parameters),
        );
        info!("external verifier initialised");
        Ok(verifier)
    }

    /// Serves verification requests until the node closes the connection.
    pub fn run(&self) -> TesseraResult {
        loop {
            let message = {
                let mut channel = self.channel.lock();
                read_message_or_eof::<_, ExternalVerifierInbound>(&mut *channel)?
            };
            match message {
                None => {
                    info!("node closed the connection; exiting");
                    return Ok(());
                }
                Some(ExternalVerifierInbound::VerificationRequest {
                    stx,
                    stx_inputs_and_references,
                    check_sufficient_signatures,
                }) => {
                    self.serve_verification_request(
                        stx,
                        stx_inputs_and_references,
                        check_sufficient_signatures,
                    )?;
                }
                Some(other) => {
                    return Err(protocol_error(format!(
                        "expected a verification request, received {other:?}"
                    )));
                }
            }
        }
    }

    fn serve_verification_request(
        &self,
        stx: SignedTransaction,
        stx_inputs_and_references: BTreeMap<StateRef, SerializedTransactionState>,
        check_sufficient_signatures: bool,
    ) -> TesseraResult {
        debug!(?stx, check_sufficient_signatures, "received verification request");
        let context = ExternalVerificationContext {
            verifier: self,
            inputs_and_references: &stx_inputs_and_references,
        };
        // The cross-lineage parameter ordering check already ran on the node,
        // where the dependency transactions live.
        let result =
            match TransactionVerifier::new(&context).verify_resolved(&stx, check_sufficient_signatures) {
                Ok(()) => {
                    info!(?stx, "transaction verified");
                    VerificationResult::Success
                }
                Err(error) => {
                    info!(?stx, %error, "transaction failed to verify");
                    VerificationResult::Failure { error }
                }
            };
        let mut channel = self.channel.lock();
        write_message(&mut *channel, &ExternalVerifierOutbound::Result(result))
    }

    /// Sends one lookup to the node and decodes the expected response shape.
    fn request<T>(
        &self,
        request: VerifierRequest,
        decode: impl FnOnce(ExternalVerifierInbound) -> Option<T>,
    ) -> TesseraResult<T> {
        let mut channel = self.channel.lock();
        debug!(?request, "requesting from node");
        write_message(&mut *channel, &ExternalVerifierOutbound::Request(request))?;
        let response: ExternalVerifierInbound = read_message(&mut *channel)?;
        decode(response).ok_or_else(|| protocol_error("unexpected response type from node"))
    }

    pub(crate) fn get_parties(
        &self,
        keys: &[PublicKeyBytes],
    ) -> TesseraResult<Vec<Option<Party>>> {
        let missing: BTreeSet<PublicKeyBytes> = keys
            .iter()
            .filter(|key| self.parties.lookup(key).is_none())
            .copied()
            .collect();
        if !missing.is_empty() {
            let parties = self.request(
                VerifierRequest::GetParties { keys: missing.clone() },
                |response| match response {
                    ExternalVerifierInbound::PartiesResult { parties } => Some(parties),
                    _ => None,
                },
            )?;
            if parties.len() != missing.len() {
                return Err(protocol_error("parties result does not match the requested keys"));
            }
            for (key, party) in missing.into_iter().zip(parties) {
                self.parties.store(key, party);
            }
        }
        Ok(keys
            .iter()
            .map(|key| self.parties.lookup(key).expect("all keys were just cached"))
            .collect())
    }

    pub(crate) fn get_attachment_with_trust(
        &self,
        id: &SecureHash,
    ) -> TesseraResult<Option<AttachmentWithTrust>> {
        self.attachments.get_or_fetch(*id, || {
            self.request(
                VerifierRequest::GetAttachment { id: *id },
                |response| match response {
                    ExternalVerifierInbound::AttachmentResult { attachment } => Some(attachment),
                    _ => None,
                },
            )
        })
    }

    pub(crate) fn get_network_parameters(
        &self,
        id: Option<&SecureHash>,
    ) -> TesseraResult<Option<NetworkParameters>> {
        let Some(id) = id else {
            return Ok(Some(self.current_network_parameters.clone()));
        };
        self.network_parameters.get_or_fetch(*id, || {
            self.request(
                VerifierRequest::GetNetworkParameters { id: *id },
                |response| match response {
                    ExternalVerifierInbound::NetworkParametersResult { network_parameters } => {
                        Some(network_parameters)
                    }
                    _ => None,
                },
            )
        })
    }

    pub(crate) fn get_trusted_class_attachment(
        &self,
        class_name: &str,
    ) -> TesseraResult<Option<Attachment>> {
        // The node returns only the id, so an attachment already held locally
        // is not downloaded twice.
        let id = self.trusted_class_attachments.get_or_fetch(class_name.to_owned(), || {
            self.request(
                VerifierRequest::GetTrustedClassAttachment { class_name: class_name.to_owned() },
                |response| match response {
                    ExternalVerifierInbound::TrustedClassAttachmentResult { id } => Some(id),
                    _ => None,
                },
            )
        })?;
        match id {
            Some(id) => Ok(self
                .get_attachment_with_trust(&id)?
                .map(|with_trust| with_trust.attachment)),
            None => Ok(None),
        }
    }
}

/// The [`VerificationSupport`] binding the child verifies against: eagerly
/// shipped states resolve locally, everything else proxies through the
/// memoized lookups.
struct ExternalVerificationContext<'a, S: Read + Write> {
    verifier: &'a ExternalVerifier<S>,
    inputs_and_references: &'a BTreeMap<StateRef, SerializedTransactionState>,
}

impl<S: Read + Write> VerificationSupport for ExternalVerificationContext<'_, S> {
    fn get_party(&self, key: &PublicKeyBytes) -> TesseraResult<Option<Party>> {
        Ok(self.verifier.get_parties(&[*key])?.pop().flatten())
    }

    fn get_attachment(&self, id: &SecureHash) -> TesseraResult<Option<Attachment>> {
        Ok(self
            .verifier
            .get_attachment_with_trust(id)?
            .map(|with_trust| with_trust.attachment))
    }

    fn is_attachment_trusted(&self, attachment: &Attachment) -> TesseraResult<bool> {
        Ok(self
            .verifier
            .get_attachment_with_trust(&attachment.id)?
            .is_some_and(|with_trust| with_trust.is_trusted))
    }

    fn get_network_parameters(
        &self,
        id: Option<&SecureHash>,
    ) -> TesseraResult<Option<NetworkParameters>> {
        self.verifier.get_network_parameters(id)
    }

    fn get_signed_transaction(&self, _id: &SecureHash) -> TesseraResult<Option<SignedTransaction>> {
        // Dependency transactions never cross the channel; the node runs the
        // checks that need them before shipping the request.
        Ok(None)
    }

    fn get_serialized_state(&self, state_ref: &StateRef) -> TesseraResult<SerializedStateAndRef> {
        self.inputs_and_references
            .get(state_ref)
            .map(|serialized_state| SerializedStateAndRef {
                serialized_state: serialized_state.clone(),
                reference: *state_ref,
            })
            .ok_or(TesseraError::TransactionResolution { id: state_ref.txhash })
    }

    fn get_trusted_class_attachment(&self, class_name: &str) -> TesseraResult<Option<Attachment>> {
        self.verifier.get_trusted_class_attachment(class_name)
    }

    fn fixup_attachment_ids(&self, ids: &[SecureHash]) -> TesseraResult<BTreeSet<SecureHash>> {
        Ok(self.verifier.fixups.fixup_attachment_ids(ids))
    }
}
