// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the verification and flow engines.
//!
//! Errors derive `Serialize`/`Deserialize` because verification failures
//! cross the external-verifier process boundary, and flow errors are stored
//! inside checkpointed session states. Resolution and signature errors are
//! always terminal for the current attempt; only the legacy-compatibility
//! variants (`MissingContractClass`, `MissingSerializer`) ever trigger a
//! repair retry, and then exactly once.

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use thiserror::Error;

use crate::contracts::StateRef;
use crate::digests::SecureHash;
use crate::flow::SessionId;
use crate::identity::Party;
use crate::network_parameters::NetworkParameters;

/// Standard result type, defaulting to `()` for operations that only signal
/// success or failure.
pub type TesseraResult<T = ()> = Result<T, TesseraError>;

#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize, Error, Hash, IntoStaticStr)]
pub enum TesseraError {
    #[error("Transaction {id} was not found in storage")]
    TransactionResolution { id: SecureHash },

    #[error("Attachment {id} was not found in storage")]
    AttachmentResolution { id: SecureHash },

    #[error("Signature is not valid: {error}")]
    InvalidSignature { error: String },

    #[error("Missing signatures on transaction {} for keys: {}, by signers: {}",
        id.prefix_chars(6), missing.join(", "), descriptions.join(", "))]
    SignaturesMissing {
        missing: Vec<String>,
        descriptions: Vec<String>,
        id: SecureHash,
    },

    #[error(
        "Network parameters epoch ({}) of transaction {tx_id} is older than the epoch ({}) of \
         input state {state_ref}",
        tx_parameters.epoch, input_parameters.epoch
    )]
    NetworkParametersOrdering {
        tx_id: SecureHash,
        state_ref: StateRef,
        tx_parameters: NetworkParameters,
        input_parameters: NetworkParameters,
    },

    #[error("Contract verification of transaction {tx_id} failed for {contract}: {message}")]
    ContractRejection {
        tx_id: SecureHash,
        contract: String,
        message: String,
    },

    #[error("Attachments are missing contract class {class_name}")]
    MissingContractClass { class_name: String },

    #[error("Missing custom serializer: typeDescriptor={}, typeNames={}",
        type_descriptor.as_deref().unwrap_or("<unknown>"), type_names.join(", "))]
    MissingSerializer {
        type_descriptor: Option<String>,
        type_names: Vec<String>,
    },

    #[error("Transaction {tx_id} is broken and cannot be repaired: {message}")]
    BrokenTransaction { tx_id: SecureHash, message: String },

    #[error("Transaction {tx_id} violates a construction invariant: {message}")]
    InvariantViolation { tx_id: SecureHash, message: String },

    #[error("Failed to deserialize: {message}")]
    Deserialization { message: String },

    #[error("Expected a {expected} but found a {actual}")]
    UnexpectedTransactionType { expected: String, actual: String },

    #[error("Cannot sign an empty batch")]
    EmptyBatch,

    #[error("Cannot sign a batch with multiple hash algorithms: {}", algorithms.join(", "))]
    MixedHashAlgorithms { algorithms: Vec<String> },

    #[error("The leaf hash algorithm {leaf_algorithm} does not match the root hash algorithm {root_algorithm}")]
    HashAlgorithmMismatch {
        leaf_algorithm: String,
        root_algorithm: String,
    },

    #[error("Invalid Merkle proof: {message}")]
    MerkleProof { message: String },

    #[error("Key conversion error: {error}")]
    KeyConversion { error: String },

    #[error("External verifier connection failure: {message}")]
    ExternalVerifierConnection { message: String },

    #[error("Failed to parse: {message}")]
    Parse { message: String },
}

impl From<std::io::Error> for TesseraError {
    fn from(error: std::io::Error) -> Self {
        TesseraError::ExternalVerifierConnection { message: error.to_string() }
    }
}

impl From<bcs::Error> for TesseraError {
    fn from(error: bcs::Error) -> Self {
        TesseraError::Deserialization { message: error.to_string() }
    }
}

/// Errors delivered *into* a suspended flow as the payload of a `Throw`
/// continuation. The flow logic decides whether to catch or propagate them;
/// the transition engine never retries on its own.
#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize, Error, Hash, IntoStaticStr)]
pub enum FlowError {
    #[error("Unexpected end of flow session (error id {error_id}): {message}")]
    UnexpectedFlowEnd {
        message: String,
        error_id: u64,
        peer: Option<Party>,
    },

    #[error("Session {session_id} was closed before it was initiated")]
    PrematureSessionClose { session_id: SessionId },

    #[error("Could not find session {session_id} in the checkpoint")]
    CannotFindSession { session_id: SessionId },

    #[error("Session initiation was rejected (error id {error_id}): {message}")]
    SessionRejected { message: String, error_id: u64 },

    #[error("Counter-flow raised an error (error id {error_id}): {message}")]
    Application {
        message: String,
        error_id: u64,
        peer: Option<Party>,
    },
}
