// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! Parent-side handle to the external verifier process.
//!
//! The process is spawned lazily on the first verification request and one
//! connection is reused across requests. A watcher thread reaps the process
//! on exit and clears the connection, so the next request respawns; a request
//! that was in flight when the process died fails, and is not retried here.
//! Only one verification request is in flight per connection: the exchange
//! holds a mutex for its whole duration. That is a simplification, not a
//! protocol constraint.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use types::contracts::{SerializedBytes, SerializedTransactionState, StateRef};
use types::digests::SecureHash;
use types::error::{TesseraError, TesseraResult};
use types::messages_verifier::{
    read_message, write_message, AttachmentWithTrust, ExternalVerifierInbound,
    ExternalVerifierOutbound, VerificationResult, VerifierRequest,
};
use types::transaction::SignedTransaction;
use verification::support::VerificationSupport;
use verification::verifier::TransactionVerifier;

/// How to launch and initialise the verifier process.
pub struct ExternalVerifierConfig {
    /// The node's base directory; the process runs with this as its working
    /// directory and its output is appended under `logs/`.
    pub base_directory: PathBuf,
    /// Path to the `external-verifier` executable.
    pub verifier_command: PathBuf,
    /// Log level handed to the process as its second argument.
    pub log_level: String,
    pub custom_serializer_class_names: BTreeSet<String>,
    pub serialization_whitelist_class_names: BTreeSet<String>,
    pub custom_serialization_scheme_class_name: Option<String>,
}

struct Connection {
    generation: u64,
    stream: TcpStream,
}

struct HandleState {
    listener: Option<TcpListener>,
    connection: Option<Connection>,
    next_generation: u64,
}

pub struct ExternalVerifierHandle {
    config: ExternalVerifierConfig,
    support: Arc<dyn VerificationSupport + Send + Sync>,
    inner: Arc<Mutex<HandleState>>,
}

impl ExternalVerifierHandle {
    pub fn new(
        config: ExternalVerifierConfig,
        support: Arc<dyn VerificationSupport + Send + Sync>,
    ) -> Self {
        Self {
            config,
            support,
            inner: Arc::new(Mutex::new(HandleState {
                listener: None,
                connection: None,
                next_generation: 0,
            })),
        }
    }

    /// Verifies `stx` in the external process, answering its lookups from
    /// this node's stores. Returns once the process reports success or
    /// failure for this transaction.
    pub fn verify_transaction(
        &self,
        stx: &SignedTransaction,
        check_sufficient_signatures: bool,
    ) -> TesseraResult {
        info!(?stx, check_sufficient_signatures, "verifying transaction externally");
        // The ordering check needs the dependency transactions, which never
        // cross the channel; run it here before shipping the request.
        TransactionVerifier::new(self.support.as_ref())
            .check_network_parameters_ordering(stx)?;

        // Input states are unique to their transaction, so there is no
        // caching value in the process fetching them lazily: ship them with
        // the request.
        let mut stx_inputs_and_references: BTreeMap<StateRef, SerializedTransactionState> =
            BTreeMap::new();
        for state_ref in stx.inputs()?.into_iter().chain(stx.references()?) {
            let resolved = self.support.get_serialized_state(&state_ref)?;
            stx_inputs_and_references.insert(state_ref, resolved.serialized_state);
        }
        let request = ExternalVerifierInbound::VerificationRequest {
            stx: stx.clone(),
            stx_inputs_and_references,
            check_sufficient_signatures,
        };

        let mut state = self.inner.lock();
        self.ensure_connection(&mut state)?;
        let connection = state.connection.as_mut().expect("connection was just established");
        match self.exchange(connection, &request) {
            Ok(VerificationResult::Success) => Ok(()),
            Ok(VerificationResult::Failure { error }) => Err(error),
            Err(error) => {
                // The process died or broke protocol mid-request. Tear the
                // connection down; the next request respawns.
                state.connection = None;
                Err(error)
            }
        }
    }

    /// Drops the connection. The process sees end-of-stream and exits; the
    /// watcher thread reaps it.
    pub fn close(&self) {
        self.inner.lock().connection = None;
    }

    fn exchange(
        &self,
        connection: &mut Connection,
        request: &ExternalVerifierInbound,
    ) -> TesseraResult<VerificationResult> {
        write_message(&mut connection.stream, request)?;
        loop {
            let message: ExternalVerifierOutbound = read_message(&mut connection.stream)?;
            match message {
                ExternalVerifierOutbound::Request(request) => {
                    let response = answer_verifier_request(self.support.as_ref(), request)?;
                    write_message(&mut connection.stream, &response)?;
                }
                ExternalVerifierOutbound::Result(result) => return Ok(result),
            }
        }
    }

    fn ensure_connection(&self, state: &mut HandleState) -> TesseraResult {
        if state.connection.is_some() {
            return Ok(());
        }
        if state.listener.is_none() {
            state.listener = Some(TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?);
        }
        let listener = state.listener.as_ref().expect("listener was just bound");
        let port = listener.local_addr()?.port();

        let logs_directory = self.config.base_directory.join("logs");
        std::fs::create_dir_all(&logs_directory)?;
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(logs_directory.join("verifier-stdout.log"))?;
        let stderr = OpenOptions::new()
            .create(true)
            .append(true)
            .open(logs_directory.join("verifier-stderr.log"))?;

        let mut process = Command::new(&self.config.verifier_command)
            .arg(port.to_string())
            .arg(&self.config.log_level)
            .current_dir(&self.config.base_directory)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()?;
        info!(pid = process.id(), "external verifier process started");

        let (stream, _) = listener.accept()?;
        let generation = state.next_generation;
        state.next_generation += 1;

        // The watcher owns the process handle: it reaps the exit status and,
        // if this connection is still the current one, clears it so the next
        // request respawns.
        let inner = Arc::clone(&self.inner);
        std::thread::spawn(move || {
            let status = process.wait();
            let mut state = inner.lock();
            if state.connection.as_ref().is_some_and(|c| c.generation == generation) {
                error!(
                    ?status,
                    "the external verifier terminated unexpectedly; check the verifier logs"
                );
                state.connection = None;
            } else {
                debug!(?status, "external verifier process exited");
            }
        });

        let mut connection = Connection { generation, stream };
        let initialisation = self.initialisation_message()?;
        write_message(&mut connection.stream, &initialisation)?;
        state.connection = Some(connection);
        Ok(())
    }

    fn initialisation_message(&self) -> TesseraResult<ExternalVerifierInbound> {
        let current = self.support.get_network_parameters(None)?.ok_or_else(|| {
            TesseraError::ExternalVerifierConnection {
                message: "current network parameters are not available".to_owned(),
            }
        })?;
        Ok(ExternalVerifierInbound::Initialisation {
            custom_serializer_class_names: self.config.custom_serializer_class_names.clone(),
            serialization_whitelist_class_names: self
                .config
                .serialization_whitelist_class_names
                .clone(),
            custom_serialization_scheme_class_name: self
                .config
                .custom_serialization_scheme_class_name
                .clone(),
            serialized_current_network_parameters: SerializedBytes::serialize(&current)?,
        })
    }
}

impl Drop for ExternalVerifierHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Answers one lookup from the verifier process against the node's stores.
/// Batched lookups are answered in the key set's iteration order, which both
/// sides share.
pub fn answer_verifier_request(
    support: &dyn VerificationSupport,
    request: VerifierRequest,
) -> TesseraResult<ExternalVerifierInbound> {
    debug!(?request, "answering external verifier lookup");
    match request {
        VerifierRequest::GetParties { keys } => Ok(ExternalVerifierInbound::PartiesResult {
            parties: keys
                .iter()
                .map(|key| support.get_party(key))
                .collect::<TesseraResult<_>>()?,
        }),
        VerifierRequest::GetAttachment { id } => Ok(ExternalVerifierInbound::AttachmentResult {
            attachment: attachment_with_trust(support, &id)?,
        }),
        VerifierRequest::GetAttachments { ids } => {
            Ok(ExternalVerifierInbound::AttachmentsResult {
                attachments: ids
                    .iter()
                    .map(|id| attachment_with_trust(support, id))
                    .collect::<TesseraResult<_>>()?,
            })
        }
        VerifierRequest::GetNetworkParameters { id } => {
            Ok(ExternalVerifierInbound::NetworkParametersResult {
                network_parameters: support.get_network_parameters(Some(&id))?,
            })
        }
        VerifierRequest::GetTrustedClassAttachment { class_name } => {
            Ok(ExternalVerifierInbound::TrustedClassAttachmentResult {
                id: support
                    .get_trusted_class_attachment(&class_name)?
                    .map(|attachment| attachment.id),
            })
        }
    }
}

fn attachment_with_trust(
    support: &dyn VerificationSupport,
    id: &SecureHash,
) -> TesseraResult<Option<AttachmentWithTrust>> {
    match support.get_attachment(id)? {
        Some(attachment) => {
            let is_trusted = support.is_attachment_trusted(&attachment)?;
            Ok(Some(AttachmentWithTrust { attachment, is_trusted }))
        }
        None => Ok(None),
    }
}
